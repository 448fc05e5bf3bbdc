//! The settlement state machine.
use crate::{
    handler::{Handler, Side},
    settled::Settled,
    status::Status,
    timer::{Timer, TimerId},
    Error,
};
use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
    time::Duration,
};

struct Reaction<T, E> {
    on_resolve: Handler<T>,
    on_reject: Handler<E>,
}

impl<T, E> Reaction<T, E> {
    fn fire(self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => self.on_resolve.fire(value),
            Err(reason) => self.on_reject.fire(reason),
        }
    }
}

/// An outstanding timeout; cancelling it unschedules the delayed rejection.
struct DelayHandle {
    cancel: Box<dyn FnOnce()>,
}

impl DelayHandle {
    fn new<S: Timer + Clone + 'static>(timer: &S, id: TimerId) -> Self {
        Self {
            cancel: timer.canceller(id),
        }
    }

    fn cancel(self) {
        (self.cancel)()
    }
}

struct Inner<T, E> {
    status: Status,
    result: Option<Result<T, E>>,
    reactions: VecDeque<Reaction<T, E>>,
    // Set while settlement is dispatching queued reactions, so reactions
    // registered from inside a callback queue up behind the earlier ones.
    draining: bool,
    pending_delay: Option<DelayHandle>,
    wakers: Vec<Waker>,
    // Every promise this one has adopted and is still waiting on.
    adopted: Vec<Weak<RefCell<Inner<T, E>>>>,
}

/// A deferred value that settles once.
///
/// `Promise` is a handle: clones share the same state, and
/// [`Promise::ptr_eq`] tells whether two handles are the same promise.
///
/// # Examples
///
/// ```
/// use settle::{Handler, Promise, Status};
/// use std::{cell::RefCell, rc::Rc};
///
/// let p = Promise::<&str, ()>::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let sink = seen.clone();
/// p.then(Handler::call(move |v| sink.borrow_mut().push(v)), Handler::Skip);
/// p.resolve("test");
///
/// // late registrations replay the settled value
/// let sink = seen.clone();
/// p.on_resolve(move |v| sink.borrow_mut().push(v));
///
/// assert_eq!(p.status(), Status::Resolved);
/// assert_eq!(*seen.borrow(), vec!["test", "test"]);
/// ```
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Promise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Promise<T, E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                status: Status::Pending,
                result: None,
                reactions: VecDeque::new(),
                draining: false,
                pending_delay: None,
                wakers: Vec::new(),
                adopted: Vec::new(),
            })),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().status
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// Number of reactions queued and waiting for settlement.
    pub fn reaction_count(&self) -> usize {
        self.inner.borrow().reactions.len()
    }

    /// Returns `true` if both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a future that completes once this promise settles.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.clone())
    }

    /// Searches everything `self` adopts, transitively, for `target`.
    fn follows(&self, target: &Self) -> bool {
        let mut stack = vec![self.inner.clone()];
        let mut seen: Vec<*const RefCell<Inner<T, E>>> = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&Rc::as_ptr(&current)) {
                continue;
            }
            seen.push(Rc::as_ptr(&current));
            for source in current.borrow().adopted.iter().filter_map(Weak::upgrade) {
                if Rc::ptr_eq(&source, &target.inner) {
                    return true;
                }
                stack.push(source);
            }
        }
        false
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Creates a promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    pub fn rejected(reason: E) -> Self {
        let promise = Self::new();
        promise.reject(reason);
        promise
    }

    /// The settled value or rejection reason, if there is one.
    ///
    /// Cancelling a settled promise keeps its result.
    pub fn result(&self) -> Option<Result<T, E>> {
        self.inner.borrow().result.clone()
    }

    /// Registers a reaction pair and returns `self`.
    ///
    /// If the promise has already resolved or rejected, the matching side
    /// fires right away. On a cancelled promise the reaction is dropped
    /// without ever firing.
    pub fn then(&self, on_resolve: Handler<T>, on_reject: Handler<E>) -> &Self {
        let reaction = Reaction {
            on_resolve,
            on_reject,
        };
        let ready = {
            let mut inner = self.inner.borrow_mut();
            if inner.status == Status::Cancelled {
                tracing::trace!("dropping reaction registered on a cancelled promise");
                None
            } else if inner.status == Status::Pending || inner.draining {
                inner.reactions.push_back(reaction);
                tracing::trace!(queued = inner.reactions.len(), "registered reaction");
                None
            } else {
                inner.result.clone().map(|outcome| (reaction, outcome))
            }
        };
        if let Some((reaction, outcome)) = ready {
            reaction.fire(outcome);
        }
        self
    }

    /// Registers callbacks held as opaque values.
    ///
    /// Each side must be a `Handler`, a `Box<dyn FnOnce(_)>`, a `fn(_)` or
    /// `false`; see [`Handler::from_dyn`]. Nothing is registered if either
    /// side is invalid.
    pub fn then_dyn(
        &self,
        on_resolve: Box<dyn Any>,
        on_reject: Box<dyn Any>,
    ) -> Result<&Self, Error> {
        let on_resolve = Handler::from_dyn(on_resolve, Side::Resolve)?;
        let on_reject = Handler::from_dyn(on_reject, Side::Reject)?;
        Ok(self.then(on_resolve, on_reject))
    }

    pub fn on_resolve<F>(&self, f: F) -> &Self
    where
        F: FnOnce(T) + 'static,
    {
        self.then(Handler::call(f), Handler::Skip)
    }

    pub fn on_reject<F>(&self, f: F) -> &Self
    where
        F: FnOnce(E) + 'static,
    {
        self.then(Handler::Skip, Handler::call(f))
    }

    pub fn resolve(&self, value: T) {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: E) {
        self.settle(Err(reason))
    }

    /// Makes this promise follow `other`: when `other` settles, this one
    /// settles the same way. Settling this promise directly in the meantime
    /// still wins, since only the first settlement counts. A promise may
    /// adopt several others while pending; whichever settles first decides.
    ///
    /// Fails with [`Error::CyclicSettlement`] if `other` is this promise or
    /// already follows it through any of its adoptions. Does nothing if this promise is no longer pending.
    ///
    /// ```
    /// use settle::{Error, Promise, Status};
    ///
    /// let outer = Promise::<i32, ()>::new();
    /// let inner = Promise::new();
    /// outer.adopt(&inner).unwrap();
    /// assert_eq!(inner.adopt(&outer), Err(Error::CyclicSettlement));
    ///
    /// inner.resolve(40);
    /// assert_eq!(outer.status(), Status::Resolved);
    /// assert_eq!(outer.result(), Some(Ok(40)));
    /// ```
    pub fn adopt(&self, other: &Self) -> Result<(), Error> {
        if self.ptr_eq(other) || other.follows(self) {
            tracing::warn!("refusing cyclic adoption");
            return Err(Error::CyclicSettlement);
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.status != Status::Pending {
                tracing::debug!(status = %inner.status, "ignoring adoption by a settled promise");
                return Ok(());
            }
            inner.adopted.push(Rc::downgrade(&other.inner));
        }
        let on_resolve = self.clone();
        let on_reject = self.clone();
        other.then(
            Handler::call(move |value| on_resolve.resolve(value)),
            Handler::call(move |reason| on_reject.reject(reason)),
        );
        Ok(())
    }

    /// Cancels the promise. Cancellation is terminal: later `resolve` and
    /// `reject` calls are ignored and no reaction fires again, even ones
    /// registered afterwards. A pending timeout is unscheduled.
    pub fn cancel(&self) {
        let (previous, reactions, wakers, delay) = {
            let mut inner = self.inner.borrow_mut();
            let previous = std::mem::replace(&mut inner.status, Status::Cancelled);
            inner.draining = false;
            inner.adopted.clear();
            (
                previous,
                std::mem::take(&mut inner.reactions),
                std::mem::take(&mut inner.wakers),
                inner.pending_delay.take(),
            )
        };
        drop(reactions);
        if let Some(delay) = delay {
            delay.cancel();
        }
        tracing::debug!(%previous, "cancelled promise");
        for waker in wakers {
            waker.wake();
        }
    }

    /// Rejects with `reason` once `after` has elapsed on `timer`, unless the
    /// promise settles first. A later call replaces the earlier timeout.
    ///
    /// ```
    /// use settle::{Promise, Status, TimerQueue};
    /// use std::time::Duration;
    ///
    /// let timer = TimerQueue::new();
    /// let p = Promise::<(), &str>::new();
    /// p.timeout(&timer, Duration::from_millis(50), "timed out");
    ///
    /// timer.advance(Duration::from_millis(50));
    /// assert_eq!(p.status(), Status::Rejected);
    /// assert_eq!(p.result(), Some(Err("timed out")));
    /// ```
    pub fn timeout<S>(&self, timer: &S, after: Duration, reason: E)
    where
        S: Timer + Clone + 'static,
    {
        if !self.is_pending() {
            tracing::debug!(status = %self.status(), "not scheduling timeout on a settled promise");
            return;
        }
        let target = self.clone();
        let id = timer.schedule(
            after,
            Box::new(move || {
                tracing::debug!(?after, "promise timed out");
                target.reject(reason);
            }),
        );
        let previous = self
            .inner
            .borrow_mut()
            .pending_delay
            .replace(DelayHandle::new(timer, id));
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn settle(&self, outcome: Result<T, E>) {
        let status = if outcome.is_ok() {
            Status::Resolved
        } else {
            Status::Rejected
        };
        let (queued, delay) = {
            let mut inner = self.inner.borrow_mut();
            if inner.status != Status::Pending {
                tracing::debug!(
                    current = %inner.status,
                    attempted = %status,
                    "ignoring settlement of a promise that is no longer pending"
                );
                return;
            }
            inner.status = status;
            inner.result = Some(outcome.clone());
            inner.draining = true;
            inner.adopted.clear();
            (inner.reactions.len(), inner.pending_delay.take())
        };
        if let Some(delay) = delay {
            delay.cancel();
        }
        tracing::trace!(%status, reactions = queued, "settled promise");

        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                if inner.status == Status::Cancelled {
                    break;
                }
                let next = inner.reactions.pop_front();
                if next.is_none() {
                    inner.draining = false;
                }
                next
            };
            match next {
                Some(reaction) => reaction.fire(outcome.clone()),
                None => break,
            }
        }

        let wakers = std::mem::take(&mut self.inner.borrow_mut().wakers);
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<Result<T, E>, Error>> {
        let mut inner = self.inner.borrow_mut();
        let status = inner.status;
        match status {
            Status::Cancelled => Poll::Ready(Err(Error::Cancelled)),
            Status::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Status::Resolved | Status::Rejected => match inner.result.clone() {
                Some(outcome) => Poll::Ready(Ok(outcome)),
                None => Poll::Pending,
            },
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("status", &inner.status)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}
