use crate::{Error, Promise};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// A future that completes when a [`Promise`] settles. Any number of
/// `Settled` futures may wait on one promise; each gets its own clone of
/// the outcome.
///
/// A cancelled promise completes the future with [`Error::Cancelled`].
///
/// # Examples
///
/// ```
/// use settle::Promise;
/// use futures::executor::LocalPool;
/// use futures::task::LocalSpawnExt;
/// use std::{cell::RefCell, rc::Rc};
///
/// let mut pool = LocalPool::new();
/// let p = Promise::<String, ()>::new();
/// let got = Rc::new(RefCell::new(None));
///
/// let waiter = p.settled();
/// let sink = got.clone();
/// pool.spawner()
///     .spawn_local(async move { *sink.borrow_mut() = Some(waiter.await) })
///     .unwrap();
///
/// pool.run_until_stalled();
/// assert!(got.borrow().is_none());
///
/// p.resolve("🍓".into());
/// pool.run_until_stalled();
/// assert_eq!(*got.borrow(), Some(Ok(Ok("🍓".to_string()))));
/// ```
#[derive(Debug)]
pub struct Settled<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self { promise }
    }
}

impl<T, E> Clone for Settled<T, E> {
    fn clone(&self) -> Self {
        Self::new(self.promise.clone())
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future for Settled<T, E> {
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.promise.poll_outcome(cx)
    }
}
