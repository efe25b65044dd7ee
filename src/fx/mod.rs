//! Concurrent runtime for [`Effect`](crate::effect::Effect)s.
//!
//! The pieces, from the bottom up:
//!
//! - [`CancelToken`]: an idempotent-by-construction async action that
//!   cancels something.
//! - [`Connection`]: a LIFO stack of tokens. Canceling it runs every token,
//!   newest first, exactly once.
//! - [`Fiber`]: an effect running on an [`Executor`] under its own
//!   connection. It can be joined or canceled.
//! - [`bracket_case`]: acquire, use, release, with release guaranteed under
//!   success, failure and cancellation.
//! - [`cancelable`]: turns callback APIs into cancelable effects.
//! - [`race_pair`] / [`par_map2`]: the racing and parallel combinators the
//!   rest are built from.
//! - [`Semaphore`] and [`Resource`]: permits and composable resources on top
//!   of brackets.
//!
//! # Cancellation model
//!
//! Cancellation is cooperative. A canceled fiber stops at its next `.await`
//! and joins as [`Canceled`]. Acquisition and release of bracketed
//! resources never stop halfway; a cancel waits for them to finish.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::effect::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let program = bracket(
//!     pure::<_, String, ()>("connection"),
//!     |conn| sleep(Duration::from_millis(5)).map(move |()| conn.len()),
//!     |_conn| pure(()),
//! );
//! assert_eq!(program.timeout(Duration::from_secs(1)).run(&()).await, Ok(Some(10)));
//! # });
//! ```

mod bracket;
mod cancelable;
mod connection;
mod error;
mod executor;
mod exit_case;
mod ext;
mod fiber;
mod par;
mod promise;
mod race;
mod region;
mod resource;
mod semaphore;
mod timer;
mod token;

pub use bracket::{bracket, bracket_case, guarantee, guarantee_case, on_cancel, BracketCase};
pub use cancelable::{async_callback, cancelable, cancelable_f, Callback};
pub use connection::Connection;
pub use error::{Canceled, FxError};
pub use executor::{Ambient, Executor};
pub use exit_case::ExitCase;
pub use ext::{evaluate_on, ConcurrentExt};
pub use fiber::{fork, spawn, Fiber};
pub use par::{par_map2, par_map3, par_sequence, par_traverse};
pub use promise::Promise;
pub use race::{race2, race3, race_all, race_pair, race_triple, Race2, Race3, RacePair, RaceTriple};
pub use region::{uncancelable, Uncancelable};
pub use resource::Resource;
pub use semaphore::Semaphore;
pub use timer::{sleep, timeout, timeout_or};
pub use token::CancelToken;
