use crate::Promise;
use std::fmt;

/// A fresh promise together with its two settling entry points.
///
/// # Examples
///
/// ```
/// use settle::{deferred, Status};
///
/// let d = deferred::<i32, String>();
/// (d.reject)("💥".into());
/// assert_eq!(d.promise.status(), Status::Rejected);
/// ```
pub struct Deferred<T, E> {
    pub promise: Promise<T, E>,
    pub resolve: Box<dyn Fn(T)>,
    pub reject: Box<dyn Fn(E)>,
}

/// Builds a [`Deferred`] around a new pending promise.
pub fn deferred<T, E>() -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let promise = Promise::new();
    let resolver = promise.clone();
    let rejecter = promise.clone();
    Deferred {
        promise,
        resolve: Box::new(move |value| resolver.resolve(value)),
        reject: Box::new(move |reason| rejecter.reject(reason)),
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}
