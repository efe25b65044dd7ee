//! Zero-cost effects with opt-in boxing.
//!
//! An effect is a value describing work. Combinators return concrete types,
//! following the `futures` crate pattern, so nothing is allocated until you
//! ask for a [`BoxedEffect`].
//!
//! ```rust
//! use undertow::effect::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let effect = pure::<_, String, ()>(42)
//!     .map(|x| x + 1)
//!     .and_then(|x| pure(x * 2))
//!     .map(|x| x.to_string());
//!
//! assert_eq!(effect.run(&()).await, Ok("86".to_string()));
//! # });
//! ```
//!
//! # When to box
//!
//! - storing effects of different shapes in one collection
//!   (`race_all`, `par_sequence`)
//! - recursive effect builders
//! - match arms that return different effect types
//!
//! # Environment
//!
//! `Env` must be `Clone`. Boxing and forking clone it into a `'static`
//! future, so keep environments cheap to clone (`Arc` the heavy parts).

pub mod boxed;
pub mod combinators;
pub mod constructors;
pub mod ext;
pub mod prelude;
pub(crate) mod trait_def;

pub use boxed::{BoxFuture, BoxedEffect};
pub use combinators::{AndThen, Defer, Fail, FromAsync, FromFn, FromResult, Map, MapErr, OrElse, Pure};
pub use constructors::{defer, fail, from_async, from_fn, from_result, pure};
pub use ext::EffectExt;
pub use trait_def::Effect;
