//! A lightweight, single-threaded deferred value.
//!
//! A [`Promise`] starts out pending and settles exactly once into a resolved,
//! rejected or cancelled state. Reactions registered with [`Promise::then`]
//! fire synchronously, in registration order, at the moment of settlement (or
//! immediately, if the promise has already settled). Cancellation is terminal
//! and silent: nothing fires after it.
//!
//! # Examples
//!
//! ```
//! use settle::{when_all, Handler, Promise, Settleable};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let later = Promise::<i32, String>::new();
//! let all = when_all(vec![
//!     Settleable::Value(10),
//!     Settleable::Value(20),
//!     Settleable::from(later.clone()),
//! ]);
//!
//! let seen = Rc::new(RefCell::new(None));
//! let sink = seen.clone();
//! all.then(Handler::call(move |v| *sink.borrow_mut() = Some(v)), Handler::Skip);
//!
//! later.resolve(30);
//! assert_eq!(*seen.borrow(), Some(vec![10, 20, 30]));
//! ```
pub mod combinators;
pub mod deferred;
pub mod handler;
pub mod settled;
pub mod settlement;
pub mod status;
pub mod timer;

pub use combinators::{promise, when, when_all, Settleable};
pub use deferred::{deferred, Deferred};
pub use handler::{Handler, Side};
pub use settled::Settled;
pub use settlement::Promise;
pub use status::Status;
pub use timer::{Timer, TimerId, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A reaction handed to [`Promise::then_dyn`] was neither a function nor `false`.
    #[error("invalid {side} callback: expected a function or `false`")]
    InvalidCallback { side: Side },
    /// A promise was asked to follow itself, directly or through a chain.
    #[error("cyclic settlement: a promise cannot adopt itself")]
    CyclicSettlement,
    #[error("promise was cancelled")]
    Cancelled,
}
