//! Free functions that build the leaf effects.

use std::future::Future;

use crate::effect::combinators::{Defer, Fail, FromAsync, FromFn, FromResult, Pure};
use crate::effect::trait_def::Effect;

/// An effect that succeeds with `value`.
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// assert_eq!(pure::<_, String, ()>(42).run(&()).await, Ok(42));
/// # });
/// ```
pub fn pure<T, E, Env>(value: T) -> Pure<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    Pure::new(value)
}

/// An effect that fails with `error`.
///
/// This is the `raiseError` of the error-handling hierarchy.
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let effect = fail::<i32, _, ()>("boom".to_string());
/// assert_eq!(effect.run(&()).await, Err("boom".to_string()));
/// # });
/// ```
pub fn fail<T, E, Env>(error: E) -> Fail<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    Fail::new(error)
}

/// An effect from a synchronous function of the environment.
pub fn from_fn<T, E, Env, F>(f: F) -> FromFn<F, Env>
where
    F: FnOnce(&Env) -> Result<T, E> + Send,
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    FromFn::new(f)
}

/// An effect from an async function of the environment.
///
/// The returned future is polled inside whatever fiber runs the effect, so
/// every `.await` in it is a point where cancellation can be observed.
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let effect = from_async(|_: &()| async { Ok::<_, String>(7) });
/// assert_eq!(effect.run(&()).await, Ok(7));
/// # });
/// ```
pub fn from_async<T, E, Env, F, Fut>(f: F) -> FromAsync<F, Env>
where
    F: FnOnce(&Env) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    FromAsync::new(f)
}

/// An effect that yields `result` as is.
pub fn from_result<T, E, Env>(result: Result<T, E>) -> FromResult<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    FromResult::new(result)
}

/// Postpone building an effect until it is run.
///
/// Useful for recursive definitions and for effects whose construction has
/// side effects of its own.
pub fn defer<F, Inner>(thunk: F) -> Defer<F>
where
    F: FnOnce() -> Inner + Send,
    Inner: Effect,
{
    Defer::new(thunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Config {
        base: i32,
    }

    #[tokio::test]
    async fn from_fn_reads_environment() {
        let effect = from_fn(|env: &Config| Ok::<_, String>(env.base * 2));
        assert_eq!(effect.run(&Config { base: 21 }).await, Ok(42));
    }

    #[tokio::test]
    async fn from_result_passes_error_through() {
        let effect = from_result::<i32, _, ()>(Err("nope".to_string()));
        assert_eq!(effect.run(&()).await, Err("nope".to_string()));
    }

    #[tokio::test]
    async fn defer_does_not_build_until_run() {
        let built = Arc::new(AtomicBool::new(false));
        let flag = built.clone();
        let effect = defer(move || {
            flag.store(true, Ordering::SeqCst);
            pure::<_, String, ()>(1)
        });

        assert!(!built.load(Ordering::SeqCst));
        assert_eq!(effect.run(&()).await, Ok(1));
        assert!(built.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn or_else_recovers_with_new_error_type() {
        let effect = fail::<i32, _, ()>("bad")
            .or_else(|e| fail::<i32, String, ()>(format!("{e}!")))
            .or_else(|_| pure::<_, (), ()>(5));
        assert_eq!(effect.run(&()).await, Ok(5));
    }
}
