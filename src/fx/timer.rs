//! Time-based effects: sleeping and deadlines.

use std::time::Duration;

use crate::effect::constructors::from_async;
use crate::effect::ext::EffectExt;
use crate::effect::trait_def::Effect;
use crate::fx::error::FxError;
use crate::fx::race::{race2, Race2};

/// Suspend for `duration`.
///
/// The wait is a cancellation point like any other `.await`.
pub fn sleep<E, Env>(duration: Duration) -> impl Effect<Output = (), Error = E, Env = Env>
where
    E: Send,
    Env: Clone + Send + Sync,
{
    from_async(move |_: &Env| async move {
        tokio::time::sleep(duration).await;
        Ok(())
    })
}

/// Run `effect` with a deadline. `None` means the deadline passed first and
/// the effect was canceled.
///
/// ```rust
/// use std::time::Duration;
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let slow = sleep::<String, ()>(Duration::from_secs(5)).map(|()| 1);
/// assert_eq!(timeout(slow, Duration::from_millis(5)).run(&()).await, Ok(None));
/// # });
/// ```
pub fn timeout<Eff>(
    effect: Eff,
    duration: Duration,
) -> impl Effect<Output = Option<Eff::Output>, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
{
    race2(effect, sleep(duration)).map(|winner| match winner {
        Race2::First(value) => Some(value),
        Race2::Second(()) => None,
    })
}

/// Run `effect` with a deadline, switching to `fallback` if it passes.
pub fn timeout_or<Eff, Fb>(
    effect: Eff,
    duration: Duration,
    fallback: Fb,
) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
    Fb: Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>,
{
    from_async(move |env: &Eff::Env| {
        let env = env.clone();
        async move {
            match race2(effect, sleep(duration)).run(&env).await? {
                Race2::First(value) => Ok(value),
                Race2::Second(()) => {
                    tracing::debug!(?duration, "deadline passed, running fallback");
                    fallback.run(&env).await
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::constructors::{fail, pure};
    use crate::fx::bracket::on_cancel;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_waits() {
        let start = Instant::now();
        sleep::<String, ()>(Duration::from_millis(20)).run(&()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn timeout_keeps_fast_value() {
        let effect = pure::<_, String, ()>(5);
        assert_eq!(timeout(effect, Duration::from_secs(1)).run(&()).await, Ok(Some(5)));
    }

    #[tokio::test]
    async fn timeout_cancels_slow_effect() {
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = canceled.clone();
        let slow = on_cancel(
            sleep::<String, ()>(Duration::from_secs(5)).map(|()| 1),
            from_async(move |_: &()| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );

        let result = timeout(slow, Duration::from_millis(10)).run(&()).await;

        assert_eq!(result, Ok(None));
        assert!(canceled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_propagates_failure() {
        let effect = fail::<i32, _, ()>("broken".to_string());
        assert_eq!(
            timeout(effect, Duration::from_secs(1)).run(&()).await,
            Err("broken".to_string())
        );
    }

    #[tokio::test]
    async fn timeout_or_runs_fallback() {
        let slow = sleep::<String, ()>(Duration::from_secs(5)).map(|()| "slow");
        let effect = timeout_or(slow, Duration::from_millis(5), pure("fallback"));
        assert_eq!(effect.run(&()).await, Ok("fallback"));
    }

    #[tokio::test]
    async fn timeout_or_skips_fallback_when_in_time() {
        let effect = timeout_or(
            pure::<_, String, ()>("fast"),
            Duration::from_secs(1),
            fail("fallback should not run".to_string()),
        );
        assert_eq!(effect.run(&()).await, Ok("fast"));
    }
}
