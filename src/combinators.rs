//! Normalizing values into promises and gathering many of them into one.
use crate::{Handler, Promise};
use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// Either a plain value or a promise of one.
#[derive(Debug, Clone)]
pub enum Settleable<T, E> {
    Value(T),
    Promise(Promise<T, E>),
}

impl<T, E> Settleable<T, E> {
    pub fn is_promise(&self) -> bool {
        matches!(self, Settleable::Promise(_))
    }
}

impl<T, E> From<Promise<T, E>> for Settleable<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Settleable::Promise(promise)
    }
}

/// Wraps a value in a resolved promise; a promise is returned as-is.
///
/// ```
/// use settle::{when, Promise, Settleable, Status};
///
/// let ten = when::<_, ()>(Settleable::Value(10));
/// assert_eq!(ten.status(), Status::Resolved);
///
/// let p = Promise::<i32, ()>::resolved(50);
/// assert!(when(Settleable::from(p.clone())).ptr_eq(&p));
/// ```
pub fn when<T, E>(item: Settleable<T, E>) -> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    match item {
        Settleable::Value(value) => Promise::resolved(value),
        Settleable::Promise(promise) => promise,
    }
}

/// Creates a pending promise, hands a handle to `f` and returns the promise.
///
/// ```
/// use settle::{promise, Status};
///
/// let p = promise::<i32, (), _>(|p| p.resolve(1));
/// assert_eq!(p.status(), Status::Resolved);
/// ```
pub fn promise<T, E, F>(f: F) -> Promise<T, E>
where
    F: FnOnce(Promise<T, E>),
{
    let promise = Promise::new();
    f(promise.clone());
    promise
}

struct Gather<T, E> {
    remaining: VecDeque<Settleable<T, E>>,
    values: Vec<T>,
}

/// Waits on `items` one after another and resolves with their values in
/// order. The first rejection rejects the aggregate and nothing after it is
/// looked at. An empty input resolves to an empty vector.
///
/// An item found already cancelled cancels the aggregate, since it can never
/// settle. Cancelling the aggregate stops further processing.
pub fn when_all<T, E, I>(items: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Settleable<T, E>>,
{
    let aggregate = Promise::new();
    let remaining: VecDeque<_> = items.into_iter().collect();
    let state = Rc::new(RefCell::new(Gather {
        values: Vec::with_capacity(remaining.len()),
        remaining,
    }));
    gather(aggregate.clone(), state);
    aggregate
}

fn gather<T, E>(aggregate: Promise<Vec<T>, E>, state: Rc<RefCell<Gather<T, E>>>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    // Items that are already settled are consumed here rather than through
    // reactions, so long runs of plain values do not recurse.
    loop {
        if aggregate.is_cancelled() {
            tracing::debug!("when_all aggregate cancelled, stopping");
            return;
        }
        let next = state.borrow_mut().remaining.pop_front();
        let Some(item) = next else {
            let values = std::mem::take(&mut state.borrow_mut().values);
            tracing::trace!(count = values.len(), "when_all resolved");
            aggregate.resolve(values);
            return;
        };

        let item = when(item);
        if item.is_cancelled() {
            tracing::debug!("when_all item cancelled, cancelling aggregate");
            aggregate.cancel();
            return;
        }
        match item.result() {
            Some(Ok(value)) => state.borrow_mut().values.push(value),
            Some(Err(reason)) => {
                aggregate.reject(reason);
                return;
            }
            None => {
                tracing::trace!(
                    remaining = state.borrow().remaining.len(),
                    "when_all waiting on pending item"
                );
                let on_reason = aggregate.clone();
                item.then(
                    Handler::call(move |value| {
                        state.borrow_mut().values.push(value);
                        gather(aggregate, state);
                    }),
                    Handler::call(move |reason| on_reason.reject(reason)),
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{when, when_all, Settleable};
    use crate::{Promise, Status};

    #[test]
    fn test_when_wraps_plain_value() {
        let p = when::<&str, ()>(Settleable::Value("x"));
        assert_eq!(p.result(), Some(Ok("x")));
    }

    #[test]
    fn test_when_returns_pending_promise_unchanged() {
        let p = Promise::<i32, ()>::new();
        let q = when(Settleable::from(p.clone()));
        assert!(q.ptr_eq(&p));
        assert!(q.is_pending());
    }

    #[test]
    fn test_when_all_of_values_resolves_synchronously() {
        let all = when_all::<i32, (), _>((0..10_000).map(Settleable::Value));
        let values = match all.result() {
            Some(Ok(values)) => values,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(values.len(), 10_000);
        assert_eq!(values[9_999], 9_999);
    }

    #[test]
    fn test_when_all_empty_resolves_to_empty_vec() {
        let all = when_all::<i32, (), _>(Vec::new());
        assert_eq!(all.status(), Status::Resolved);
        assert_eq!(all.result(), Some(Ok(vec![])));
    }

    #[test]
    fn test_when_all_stops_at_first_already_rejected_item() {
        let tail = Promise::<i32, &str>::new();
        let all = when_all(vec![
            Settleable::Value(1),
            Settleable::from(Promise::rejected("boom")),
            Settleable::from(tail.clone()),
        ]);
        assert_eq!(all.result(), Some(Err("boom")));
        assert_eq!(tail.reaction_count(), 0);
    }

    #[test]
    fn test_when_all_cancelled_item_cancels_aggregate() {
        let cancelled = Promise::<i32, ()>::new();
        cancelled.cancel();
        let all = when_all(vec![Settleable::Value(1), Settleable::from(cancelled)]);
        assert_eq!(all.status(), Status::Cancelled);
    }

    #[test]
    fn test_cancelled_aggregate_ignores_late_items() {
        let first = Promise::<i32, ()>::new();
        let second = Promise::<i32, ()>::new();
        let all = when_all(vec![
            Settleable::from(first.clone()),
            Settleable::from(second.clone()),
        ]);
        all.cancel();
        first.resolve(1);
        assert_eq!(second.reaction_count(), 0);
        assert_eq!(all.status(), Status::Cancelled);
    }
}
