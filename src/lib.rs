//! # Undertow
//!
//! > *"What you can't see is what carries you"*
//!
//! A Rust library for running effects concurrently, with cancellation that
//! cleans up after itself.
//!
//! ## Philosophy
//!
//! **Undertow** keeps the *description* of work apart from *running* it:
//! - **Effects** are inert values you compose ([`effect`])
//! - **Fibers** run them, race them and cancel them ([`fx`])
//!
//! Every resource acquired with [`bracket`](fx::bracket) is released exactly
//! once, whether the work succeeds, fails or is canceled from outside.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::prelude::*;
//!
//! # tokio_test::block_on(async {
//! // Fetch two things in parallel, but give up after a second.
//! let user = sleep(Duration::from_millis(10)).map(|()| "alice");
//! let score = pure::<_, String, ()>(42);
//!
//! let program = par_map2(user, score, |user, score| format!("{user}: {score}"))
//!     .timeout(Duration::from_secs(1));
//!
//! assert_eq!(program.run(&()).await, Ok(Some("alice: 42".to_string())));
//! # });
//! ```
//!
//! ## Errors
//!
//! Errors used with fibers implement [`FxError`](fx::FxError): they can be
//! built from [`Canceled`](fx::Canceled) and combined with
//! [`Semigroup`]. When both the work and its cleanup fail, the caller gets
//! both errors, the work's first. `String` works out of the box.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod effect;
pub mod fx;
pub mod semigroup;

// Re-exports
pub use effect::{BoxedEffect, Effect, EffectExt};
pub use fx::{
    Canceled, CancelToken, ConcurrentExt, Connection, ExitCase, Fiber, FxError, Resource, Semaphore,
};
pub use semigroup::Semigroup;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::effect::prelude::*;
    pub use crate::semigroup::Semigroup;
}
