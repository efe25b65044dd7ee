//! Acquire, use, release - with release guaranteed under cancellation.
//!
//! - [`bracket_case`] - release sees the [`ExitCase`] of `use`
//! - [`bracket`] - release does not care how `use` ended
//! - [`guarantee`], [`guarantee_case`], [`on_cancel`] - finalizers without a
//!   resource
//!
//! Acquisition and release run in uncancelable regions. Between the two,
//! the release is stacked on the current fiber's connection so that
//! canceling the fiber runs it with [`ExitCase::Canceled`]. Whichever of the
//! normal path and the cancellation gets there first releases; the other
//! finds nothing left to do.
//!
//! ```rust
//! use undertow::effect::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let effect = bracket_case(
//!     pure::<_, String, ()>("handle".to_string()),
//!     |handle| pure(handle.len()),
//!     |_handle, exit| {
//!         assert!(exit.is_completed());
//!         pure(())
//!     },
//! );
//! assert_eq!(effect.run(&()).await, Ok(6));
//! # });
//! ```

use std::fmt;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::effect::boxed::BoxFuture;
use crate::effect::constructors::{from_async, pure};
use crate::effect::trait_def::Effect;
use crate::fx::connection::{Connection, Pushed};
use crate::fx::error::{Canceled, FxError};
use crate::fx::exit_case::ExitCase;
use crate::fx::region::uncancelable_region;
use crate::fx::token::CancelToken;
use crate::semigroup::Semigroup;

// ============================================================================
// Release slot
// ============================================================================

type Release<E> = Box<dyn FnOnce(ExitCase<E>) -> BoxFuture<'static, Result<(), E>> + Send>;

/// Holds the release until exactly one party takes it.
struct ReleaseSlot<E> {
    release: Arc<Mutex<Option<Release<E>>>>,
}

impl<E> Clone for ReleaseSlot<E> {
    fn clone(&self) -> Self {
        ReleaseSlot {
            release: self.release.clone(),
        }
    }
}

impl<E: Send + 'static> ReleaseSlot<E> {
    fn new(release: Release<E>) -> Self {
        ReleaseSlot {
            release: Arc::new(Mutex::new(Some(release))),
        }
    }

    async fn fire(self, exit: ExitCase<E>) -> Result<(), E> {
        let release = self.release.lock().take();
        match release {
            Some(release) => release(exit).await,
            None => Ok(()),
        }
    }
}

// ============================================================================
// BracketCase
// ============================================================================

/// Effect returned by [`bracket_case`].
pub struct BracketCase<Acq, Use, Rel> {
    acquire: Acq,
    use_fn: Use,
    release: Rel,
}

impl<Acq, Use, Rel> fmt::Debug for BracketCase<Acq, Use, Rel> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BracketCase")
            .field("acquire", &"<effect>")
            .field("use_fn", &"<function>")
            .field("release", &"<function>")
            .finish()
    }
}

/// Acquire a resource, use it, and release it however `use` ends.
///
/// - If `acquire` fails, its error is returned and `release` never runs.
/// - `acquire` cannot be interrupted: a cancel arriving meanwhile takes
///   effect once the resource is acquired, and then releases it.
/// - `release` runs exactly once, with [`ExitCase::Completed`],
///   [`ExitCase::Error`] or [`ExitCase::Canceled`].
/// - If both `use` and `release` fail, the errors are combined with the
///   `use` error first.
/// - A panic in `use` releases with [`ExitCase::Canceled`] and is then
///   resumed.
///
/// The acquired value is handed to `use` and a clone of it is kept for
/// `release`, so running the bracket needs `Acq::Output: Clone + Sync`.
/// Handles that cannot be cloned, such as a `File` or a `TcpStream`, go in
/// an `Arc` (with a `Mutex` if `use` needs them mutably):
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use undertow::effect::prelude::*;
///
/// struct Socket {
///     open: bool,
/// }
///
/// # tokio_test::block_on(async {
/// let effect = bracket_case(
///     pure::<_, String, ()>(Arc::new(Mutex::new(Socket { open: true }))),
///     |socket| pure(socket.lock().open),
///     |socket, _exit| {
///         socket.lock().open = false;
///         pure(())
///     },
/// );
/// assert_eq!(effect.run(&()).await, Ok(true));
/// # });
/// ```
pub fn bracket_case<Acq, Use, UseEff, Rel, RelEff>(
    acquire: Acq,
    use_fn: Use,
    release: Rel,
) -> BracketCase<Acq, Use, Rel>
where
    Acq: Effect,
    Use: FnOnce(Acq::Output) -> UseEff + Send,
    UseEff: Effect<Error = Acq::Error, Env = Acq::Env>,
    Rel: FnOnce(Acq::Output, ExitCase<Acq::Error>) -> RelEff + Send,
    RelEff: Effect<Output = (), Error = Acq::Error, Env = Acq::Env>,
{
    BracketCase {
        acquire,
        use_fn,
        release,
    }
}

impl<Acq, Use, UseEff, Rel, RelEff> Effect for BracketCase<Acq, Use, Rel>
where
    Acq: Effect + 'static,
    Acq::Output: Clone + Sync + 'static,
    Acq::Error: FxError + Clone,
    Acq::Env: 'static,
    Use: FnOnce(Acq::Output) -> UseEff + Send,
    UseEff: Effect<Error = Acq::Error, Env = Acq::Env>,
    Rel: FnOnce(Acq::Output, ExitCase<Acq::Error>) -> RelEff + Send + 'static,
    RelEff: Effect<Output = (), Error = Acq::Error, Env = Acq::Env> + 'static,
{
    type Output = UseEff::Output;
    type Error = Acq::Error;
    type Env = Acq::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, Self::Error> {
        let BracketCase {
            acquire,
            use_fn,
            release,
        } = self;
        let outer = Connection::<Acq::Error>::current();

        let acquire_env = env.clone();
        let registration = outer.clone();
        let (resource, key, slot) = uncancelable_region::<_, Acq::Error, _>(async move {
            let resource = acquire.run(&acquire_env).await?;

            let owned = resource.clone();
            let slot = ReleaseSlot::new(Box::new(move |exit| {
                Box::pin(async move { release(owned, exit).run(&acquire_env).await })
            }));
            let on_cancel = slot.clone();
            let token = CancelToken::new(move || on_cancel.fire(ExitCase::Canceled));

            match registration.push_keyed(token).await {
                Ok(Pushed::Stacked(key)) => Ok((resource, Some(key), slot)),
                Ok(Pushed::Ignored) => Ok((resource, None, slot)),
                Ok(Pushed::Ran) => Err(Canceled.into()),
                Err(error) => {
                    registration.record_late(error);
                    Err(Canceled.into())
                }
            }
        })
        .await?;

        let used = AssertUnwindSafe(use_fn(resource).run(env))
            .catch_unwind()
            .await;

        let exit = match &used {
            Ok(result) => ExitCase::from_result(result),
            Err(_) => ExitCase::Canceled,
        };
        let released = uncancelable_region(async move {
            if let Some(key) = key {
                outer.registry.remove(key);
            }
            slot.fire(exit).await
        })
        .await;

        match used {
            Ok(Ok(value)) => released.map(|()| value),
            Ok(Err(error)) => Err(match released {
                Ok(()) => error,
                Err(release_error) => error.combine(release_error),
            }),
            Err(panic) => {
                if let Err(release_error) = released {
                    tracing::error!(?release_error, "release failed while unwinding from use");
                }
                resume_unwind(panic)
            }
        }
    }
}

// ============================================================================
// Derived forms
// ============================================================================

/// [`bracket_case`] whose release ignores the exit case.
pub fn bracket<Acq, Use, UseEff, Rel, RelEff>(
    acquire: Acq,
    use_fn: Use,
    release: Rel,
) -> impl Effect<Output = UseEff::Output, Error = Acq::Error, Env = Acq::Env>
where
    Acq: Effect + 'static,
    Acq::Output: Clone + Sync + 'static,
    Acq::Error: FxError + Clone,
    Acq::Env: 'static,
    Use: FnOnce(Acq::Output) -> UseEff + Send,
    UseEff: Effect<Error = Acq::Error, Env = Acq::Env>,
    Rel: FnOnce(Acq::Output) -> RelEff + Send + 'static,
    RelEff: Effect<Output = (), Error = Acq::Error, Env = Acq::Env> + 'static,
{
    bracket_case(acquire, use_fn, move |resource, _exit| release(resource))
}

/// Run `finalizer` after `effect`, however `effect` ends.
pub fn guarantee<Eff, Fin>(
    effect: Eff,
    finalizer: Fin,
) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect,
    Eff::Error: FxError + Clone,
    Eff::Env: 'static,
    Fin: Effect<Output = (), Error = Eff::Error, Env = Eff::Env> + 'static,
{
    guarantee_case(effect, move |_exit| finalizer)
}

/// Run the finalizer built from the exit case after `effect`.
pub fn guarantee_case<Eff, F, Fin>(
    effect: Eff,
    finalizer: F,
) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect,
    Eff::Error: FxError + Clone,
    Eff::Env: 'static,
    F: FnOnce(ExitCase<Eff::Error>) -> Fin + Send + 'static,
    Fin: Effect<Output = (), Error = Eff::Error, Env = Eff::Env> + 'static,
{
    bracket_case(
        pure::<(), Eff::Error, Eff::Env>(()),
        move |()| effect,
        move |(), exit| finalizer(exit),
    )
}

/// Run `finalizer` only if `effect` is canceled.
pub fn on_cancel<Eff, Fin>(
    effect: Eff,
    finalizer: Fin,
) -> impl Effect<Output = Eff::Output, Error = Eff::Error, Env = Eff::Env>
where
    Eff: Effect,
    Eff::Error: FxError + Clone,
    Eff::Env: 'static,
    Fin: Effect<Output = (), Error = Eff::Error, Env = Eff::Env> + 'static,
{
    guarantee_case(effect, move |exit| {
        from_async(move |env: &Eff::Env| {
            let env = env.clone();
            async move {
                match exit {
                    ExitCase::Canceled => finalizer.run(&env).await,
                    _ => Ok(()),
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::constructors::fail;
    use crate::effect::ext::EffectExt;
    use crate::fx::executor::Ambient;
    use crate::fx::fiber::Fiber;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: impl Into<String>) -> impl Effect<Output = (), Error = String, Env = ()> {
        let log = log.clone();
        let entry = entry.into();
        from_async(move |_: &()| async move {
            log.lock().push(entry);
            Ok(())
        })
    }

    fn releasing(log: &Log) -> impl FnOnce(i32, ExitCase<String>) -> BoxedRelease + Send + 'static {
        let log = log.clone();
        move |resource, exit| {
            let entry = format!("release {resource} {exit:?}");
            record(&log, entry).boxed()
        }
    }

    type BoxedRelease = crate::effect::boxed::BoxedEffect<(), String, ()>;

    #[tokio::test]
    async fn release_sees_completed() {
        let log = Log::default();
        let effect = bracket_case(pure::<_, String, ()>(1), |r| pure(r + 1), releasing(&log));

        assert_eq!(effect.run(&()).await, Ok(2));
        assert_eq!(*log.lock(), vec!["release 1 Completed"]);
    }

    #[tokio::test]
    async fn release_sees_error_and_error_propagates() {
        let log = Log::default();
        let effect = bracket_case(
            pure::<_, String, ()>(1),
            |_| fail::<i32, _, ()>("use failed".to_string()),
            releasing(&log),
        );

        assert_eq!(effect.run(&()).await, Err("use failed".to_string()));
        assert_eq!(*log.lock(), vec!["release 1 Error(\"use failed\")"]);
    }

    #[tokio::test]
    async fn acquire_failure_skips_release() {
        let log = Log::default();
        let effect = bracket_case(
            fail::<i32, _, ()>("no resource".to_string()),
            |r| pure(r),
            releasing(&log),
        );

        assert_eq!(effect.run(&()).await, Err("no resource".to_string()));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn use_and_release_failures_are_composed() {
        let effect = bracket(
            pure::<_, String, ()>(()),
            |()| fail::<i32, _, ()>("A".to_string()),
            |()| fail::<(), _, ()>("B".to_string()),
        );
        assert_eq!(effect.run(&()).await, Err("A; B".to_string()));
    }

    #[tokio::test]
    async fn release_failure_alone_fails_the_bracket() {
        let effect = bracket(
            pure::<_, String, ()>(()),
            |()| pure(5),
            |()| fail::<(), _, ()>("release".to_string()),
        );
        assert_eq!(effect.run(&()).await, Err("release".to_string()));
    }

    #[tokio::test]
    async fn canceled_use_releases_with_canceled() {
        let log = Log::default();
        let effect = bracket_case(
            pure::<_, String, ()>(7),
            |_| {
                from_async(|_: &()| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<i32, String>(0)
                })
            },
            releasing(&log),
        );
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(20)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert_eq!(*log.lock(), vec!["release 7 Canceled"]);
    }

    #[tokio::test]
    async fn acquire_is_not_interrupted() {
        let log = Log::default();
        let acquire_log = log.clone();
        let acquire = from_async(move |_: &()| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            acquire_log.lock().push("acquired".to_string());
            Ok::<_, String>(3)
        });
        let used = log.clone();
        let effect = bracket_case(
            acquire,
            move |r| record(&used, format!("use {r}")).map(move |()| r),
            releasing(&log),
        );
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(10)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert_eq!(*log.lock(), vec!["acquired", "release 3 Canceled"]);
    }

    struct Handle {
        closed: std::sync::atomic::AtomicBool,
    }

    #[tokio::test]
    async fn shared_handle_without_clone_is_released_on_cancel() {
        use std::sync::atomic::Ordering;

        let handle = Arc::new(Handle {
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        let effect = bracket(
            pure::<_, String, ()>(handle.clone()),
            |_| {
                from_async(|_: &()| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<i32, String>(0)
                })
            },
            |handle| {
                handle.closed.store(true, Ordering::SeqCst);
                pure(())
            },
        );
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(10)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert!(handle.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn on_cancel_only_runs_when_canceled() {
        let log = Log::default();
        let effect = on_cancel(pure::<_, String, ()>(1), record(&log, "canceled"));
        assert_eq!(effect.run(&()).await, Ok(1));
        assert!(log.lock().is_empty());

        let slow = from_async(|_: &()| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<i32, String>(1)
        });
        let fiber = Fiber::start(on_cancel(slow, record(&log, "canceled")), (), Arc::new(Ambient));
        tokio::time::sleep(Duration::from_millis(10)).await;
        fiber.cancel().run(&()).await.unwrap();
        assert_eq!(*log.lock(), vec!["canceled"]);
    }

    #[tokio::test]
    async fn guarantee_runs_on_failure() {
        let log = Log::default();
        let effect = guarantee(fail::<i32, _, ()>("x".to_string()), record(&log, "finally"));
        assert_eq!(effect.run(&()).await, Err("x".to_string()));
        assert_eq!(*log.lock(), vec!["finally"]);
    }

    #[tokio::test]
    async fn panic_in_use_releases_then_resumes() {
        let log = Log::default();
        let effect = bracket_case(
            pure::<_, String, ()>(4),
            |_| {
                from_async(|_: &()| async {
                    if true {
                        panic!("use panicked");
                    }
                    Ok::<i32, String>(0)
                })
            },
            releasing(&log),
        );

        let outcome = AssertUnwindSafe(effect.run(&())).catch_unwind().await;

        assert!(outcome.is_err());
        assert_eq!(*log.lock(), vec!["release 4 Canceled"]);
    }
}
