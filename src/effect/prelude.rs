//! Everything needed to build and run effects, in one import.
//!
//! ```rust
//! use undertow::effect::prelude::*;
//! ```

pub use crate::effect::boxed::{BoxFuture, BoxedEffect};
pub use crate::effect::constructors::{defer, fail, from_async, from_fn, from_result, pure};
pub use crate::effect::ext::EffectExt;
pub use crate::effect::trait_def::Effect;

pub use crate::fx::{
    async_callback, bracket, bracket_case, cancelable, cancelable_f, evaluate_on, fork, guarantee,
    guarantee_case, on_cancel, par_map2, par_map3, par_sequence, par_traverse, race2, race3,
    race_all, race_pair, race_triple, sleep, spawn, timeout, timeout_or, uncancelable, Ambient,
    Callback, CancelToken, Canceled, ConcurrentExt, Connection, Executor, ExitCase, Fiber,
    FxError, Promise, Race2, Race3, RacePair, RaceTriple, Resource, Semaphore,
};
