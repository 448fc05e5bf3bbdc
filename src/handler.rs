use crate::Error;
use std::{any::Any, fmt};

/// Which slot of a reaction pair a handler occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Resolve,
    Reject,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Resolve => "resolve",
            Side::Reject => "reject",
        })
    }
}

/// One side of a reaction registered with [`Promise::then`](crate::Promise::then).
///
/// `Skip` is the explicit "no callback" marker: it is stored like any other
/// handler, but nothing is invoked when its side fires.
pub enum Handler<A> {
    Skip,
    Call(Box<dyn FnOnce(A)>),
}

impl<A> Handler<A> {
    pub fn call<F>(f: F) -> Self
    where
        F: FnOnce(A) + 'static,
    {
        Handler::Call(Box::new(f))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Handler::Call(_))
    }

    pub(crate) fn fire(self, arg: A) {
        if let Handler::Call(f) = self {
            f(arg)
        }
    }
}

impl<A: 'static> Handler<A> {
    /// Interprets an opaquely typed callback.
    ///
    /// Accepts a `Handler<A>`, a `Box<dyn FnOnce(A)>`, a plain `fn(A)` or
    /// `false`. Everything else, `true` included, is rejected with
    /// [`Error::InvalidCallback`].
    ///
    /// ```
    /// use settle::{Error, Handler, Side};
    ///
    /// assert!(Handler::<i32>::from_dyn(Box::new(false), Side::Resolve).is_ok());
    /// assert_eq!(
    ///     Handler::<i32>::from_dyn(Box::new(()), Side::Reject).err(),
    ///     Some(Error::InvalidCallback { side: Side::Reject }),
    /// );
    /// ```
    pub fn from_dyn(value: Box<dyn Any>, side: Side) -> Result<Self, Error> {
        let value = match value.downcast::<Handler<A>>() {
            Ok(handler) => return Ok(*handler),
            Err(value) => value,
        };
        let value = match value.downcast::<Box<dyn FnOnce(A)>>() {
            Ok(f) => return Ok(Handler::Call(*f)),
            Err(value) => value,
        };
        let value = match value.downcast::<fn(A)>() {
            Ok(f) => return Ok(Handler::call(*f)),
            Err(value) => value,
        };
        match value.downcast::<bool>() {
            Ok(flag) if !*flag => Ok(Handler::Skip),
            _ => Err(Error::InvalidCallback { side }),
        }
    }
}

impl<A> fmt::Debug for Handler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Skip => f.write_str("Skip"),
            Handler::Call(_) => f.write_str("Call(..)"),
        }
    }
}
