//! Composable acquire/release pairs.
//!
//! A [`Resource`] describes how to get a value and how to give it back.
//! Resources compose with [`map`](Resource::map),
//! [`and_then`](Resource::and_then) and [`zip`](Resource::zip); nothing is
//! acquired until [`with`](Resource::with) runs the whole chain inside one
//! [`bracket_case`]. Finalizers run in reverse order of acquisition and see
//! how the use ended.
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use undertow::effect::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (db_log, cache_log) = (log.clone(), log.clone());
//!
//! let db = Resource::new(pure::<_, String, ()>("db"), move |name| {
//!     db_log.lock().push(format!("close {name}"));
//!     pure(())
//! });
//! let cache = Resource::new(pure("cache"), move |name| {
//!     cache_log.lock().push(format!("close {name}"));
//!     pure(())
//! });
//!
//! let result = db.zip(cache).with(|(db, cache)| pure(format!("{db}+{cache}")));
//!
//! assert_eq!(result.run(&()).await, Ok("db+cache".to_string()));
//! assert_eq!(*log.lock(), vec!["close cache", "close db"]);
//! # });
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::effect::boxed::BoxFuture;
use crate::effect::constructors::{from_async, from_result};
use crate::effect::ext::EffectExt;
use crate::effect::trait_def::Effect;
use crate::fx::bracket::bracket_case;
use crate::fx::error::{compose, Canceled, FxError};
use crate::fx::exit_case::ExitCase;
use crate::semigroup::Semigroup;

type Finalizer<E> = Box<dyn FnOnce(ExitCase<E>) -> BoxFuture<'static, Result<(), E>> + Send>;

type Allocate<T, E, Env> =
    Box<dyn FnOnce(Env) -> BoxFuture<'static, Result<(T, Finalizer<E>), E>> + Send>;

fn no_finalizer<E: Send + 'static>() -> Finalizer<E> {
    Box::new(|_| Box::pin(async { Ok(()) }))
}

/// Run `inner` and then `outer`, the way nested brackets would.
///
/// `outer` sees the exit of everything it encloses, so a failing `inner`
/// turns a completed exit into an error exit.
fn chain<E: FxError + Clone>(inner: Finalizer<E>, outer: Finalizer<E>) -> Finalizer<E> {
    Box::new(move |exit: ExitCase<E>| {
        Box::pin(async move {
            let released = inner(exit.clone()).await;
            let outer_exit = match (exit, &released) {
                (exit, Ok(())) => exit,
                (ExitCase::Canceled, Err(_)) => ExitCase::Canceled,
                (ExitCase::Completed, Err(error)) => ExitCase::Error(error.clone()),
                (ExitCase::Error(cause), Err(error)) => ExitCase::Error(cause.combine(error.clone())),
            };
            let finished = outer(outer_exit).await;
            match released {
                Ok(()) => finished,
                Err(error) => Err(compose(error, finished)),
            }
        })
    })
}

/// A value paired with the steps that acquire and release it.
pub struct Resource<T, E, Env> {
    allocate: Allocate<T, E, Env>,
}

impl<T, E, Env> fmt::Debug for Resource<T, E, Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("allocate", &"<function>")
            .finish()
    }
}

/// What a running [`Resource::with`] holds between acquire and release.
struct Allocated<T, E> {
    value: Mutex<Option<T>>,
    finalizer: Mutex<Option<Finalizer<E>>>,
}

impl<T, E, Env> Resource<T, E, Env>
where
    T: Send + 'static,
    E: FxError + Clone,
    Env: Clone + Send + Sync + 'static,
{
    /// A resource released by `release`, which sees how the use ended.
    ///
    /// `release` gets its own clone of the acquired value.
    pub fn new_case<Acq, Rel, RelEff>(acquire: Acq, release: Rel) -> Self
    where
        T: Clone,
        Acq: Effect<Output = T, Error = E, Env = Env> + 'static,
        Rel: FnOnce(T, ExitCase<E>) -> RelEff + Send + 'static,
        RelEff: Effect<Output = (), Error = E, Env = Env> + 'static,
    {
        Resource {
            allocate: Box::new(move |env: Env| {
                Box::pin(async move {
                    let value = acquire.run(&env).await?;
                    let kept = value.clone();
                    let finalizer: Finalizer<E> = Box::new(move |exit| {
                        Box::pin(async move { release(kept, exit).run(&env).await })
                    });
                    Ok::<_, E>((value, finalizer))
                })
            }),
        }
    }

    /// A resource released by `release` however the use ended.
    pub fn new<Acq, Rel, RelEff>(acquire: Acq, release: Rel) -> Self
    where
        T: Clone,
        Acq: Effect<Output = T, Error = E, Env = Env> + 'static,
        Rel: FnOnce(T) -> RelEff + Send + 'static,
        RelEff: Effect<Output = (), Error = E, Env = Env> + 'static,
    {
        Resource::new_case(acquire, move |value, _exit| release(value))
    }

    /// A value that needs no release.
    pub fn pure(value: T) -> Self {
        Resource {
            allocate: Box::new(move |_env: Env| {
                Box::pin(async move { Ok((value, no_finalizer())) })
            }),
        }
    }

    /// The output of `effect`, with nothing to release.
    pub fn lift<Eff>(effect: Eff) -> Self
    where
        Eff: Effect<Output = T, Error = E, Env = Env> + 'static,
    {
        Resource {
            allocate: Box::new(move |env: Env| {
                Box::pin(async move {
                    let value = effect.run(&env).await?;
                    Ok::<_, E>((value, no_finalizer()))
                })
            }),
        }
    }

    /// Transform the acquired value. The release is unchanged.
    pub fn map<U, F>(self, f: F) -> Resource<U, E, Env>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let allocate = self.allocate;
        Resource {
            allocate: Box::new(move |env: Env| {
                Box::pin(async move {
                    let (value, finalizer) = allocate(env).await?;
                    Ok::<_, E>((f(value), finalizer))
                })
            }),
        }
    }

    /// Acquire a second resource built from the first.
    ///
    /// The second is released before the first. If acquiring the second
    /// fails, the first is released with that error and the errors are
    /// combined, acquisition error first.
    pub fn and_then<U, F>(self, f: F) -> Resource<U, E, Env>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Resource<U, E, Env> + Send + 'static,
    {
        let allocate = self.allocate;
        Resource {
            allocate: Box::new(move |env: Env| {
                Box::pin(async move {
                    let (value, outer) = allocate(env.clone()).await?;
                    match (f(value).allocate)(env).await {
                        Ok((value, inner)) => Ok((value, chain(inner, outer))),
                        Err(error) => {
                            let released = outer(ExitCase::Error(error.clone())).await;
                            Err(compose(error, released))
                        }
                    }
                })
            }),
        }
    }

    /// Acquire `self` then `other`; release `other` then `self`.
    pub fn zip<U>(self, other: Resource<U, E, Env>) -> Resource<(T, U), E, Env>
    where
        U: Send + 'static,
    {
        self.and_then(move |first| other.map(move |second| (first, second)))
    }

    /// Acquire, run `f` with the value, then release everything.
    ///
    /// Acquisition and release behave as in [`bracket_case`]: neither is
    /// interrupted by a cancel, and a cancel during `f` releases with
    /// [`ExitCase::Canceled`].
    pub fn with<F, UseEff>(self, f: F) -> impl Effect<Output = UseEff::Output, Error = E, Env = Env>
    where
        F: FnOnce(T) -> UseEff + Send + 'static,
        UseEff: Effect<Error = E, Env = Env>,
    {
        let allocate = self.allocate;
        let acquire = from_async(move |env: &Env| {
            let env = env.clone();
            async move {
                let (value, finalizer) = allocate(env).await?;
                Ok::<_, E>(Arc::new(Allocated {
                    value: Mutex::new(Some(value)),
                    finalizer: Mutex::new(Some(finalizer)),
                }))
            }
        });

        bracket_case(
            acquire,
            move |allocated: Arc<Allocated<T, E>>| {
                let value = allocated.value.lock().take();
                from_result(value.ok_or_else(|| E::from(Canceled))).and_then(f)
            },
            |allocated: Arc<Allocated<T, E>>, exit: ExitCase<E>| {
                from_async(move |_: &Env| async move {
                    let finalizer = allocated.finalizer.lock().take();
                    match finalizer {
                        Some(finalizer) => finalizer(exit).await,
                        None => Ok(()),
                    }
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::constructors::{fail, pure};
    use crate::fx::executor::Ambient;
    use crate::fx::fiber::Fiber;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn tracked(log: &Log, name: &'static str) -> Resource<&'static str, String, ()> {
        let (opened, closed) = (log.clone(), log.clone());
        Resource::new_case(
            from_async(move |_: &()| async move {
                opened.lock().push(format!("open {name}"));
                Ok::<_, String>(name)
            }),
            move |name, exit| {
                closed.lock().push(format!("close {name} {exit:?}"));
                pure(())
            },
        )
    }

    #[tokio::test]
    async fn releases_in_reverse_order_of_acquisition() {
        let log = Log::default();
        let resource = tracked(&log, "a")
            .zip(tracked(&log, "b"))
            .zip(tracked(&log, "c"));

        let result = resource
            .with(|((a, b), c)| pure::<_, String, ()>(format!("{a}{b}{c}")))
            .run(&())
            .await;

        assert_eq!(result, Ok("abc".to_string()));
        assert_eq!(
            *log.lock(),
            vec![
                "open a",
                "open b",
                "open c",
                "close c Completed",
                "close b Completed",
                "close a Completed",
            ]
        );
    }

    #[tokio::test]
    async fn map_keeps_the_release() {
        let log = Log::default();
        let result = tracked(&log, "conn")
            .map(str::len)
            .with(|len| pure::<_, String, ()>(len * 10))
            .run(&())
            .await;

        assert_eq!(result, Ok(40));
        assert_eq!(*log.lock(), vec!["open conn", "close conn Completed"]);
    }

    #[tokio::test]
    async fn and_then_sees_the_outer_value() {
        let log = Log::default();
        let inner_log = log.clone();
        let resource = tracked(&log, "pool").and_then(move |pool| {
            let checkout = if pool == "pool" { "conn" } else { "none" };
            tracked(&inner_log, checkout)
        });

        let result = resource.with(|conn| pure::<_, String, ()>(conn)).run(&()).await;

        assert_eq!(result, Ok("conn"));
        assert_eq!(
            *log.lock(),
            vec!["open pool", "open conn", "close conn Completed", "close pool Completed"]
        );
    }

    #[tokio::test]
    async fn failed_inner_acquire_releases_the_outer() {
        let log = Log::default();
        let resource = tracked(&log, "outer").and_then(|_| {
            Resource::<&'static str, String, ()>::lift(fail("no inner".to_string()))
        });

        let result = resource.with(|value| pure::<_, String, ()>(value)).run(&()).await;

        assert_eq!(result, Err("no inner".to_string()));
        assert_eq!(
            *log.lock(),
            vec!["open outer", r#"close outer Error("no inner")"#]
        );
    }

    #[tokio::test]
    async fn use_error_reaches_every_finalizer() {
        let log = Log::default();
        let result = tracked(&log, "a")
            .zip(tracked(&log, "b"))
            .with(|_| fail::<i32, _, ()>("bad query".to_string()))
            .run(&())
            .await;

        assert_eq!(result, Err("bad query".to_string()));
        assert_eq!(
            log.lock()[2..],
            [r#"close b Error("bad query")"#, r#"close a Error("bad query")"#]
        );
    }

    #[tokio::test]
    async fn inner_release_failure_is_seen_by_outer_and_combined() {
        let log = Log::default();
        let failing = Resource::new(pure::<_, String, ()>("b"), |_| {
            fail::<(), _, ()>("b would not close".to_string())
        });
        let result = tracked(&log, "a")
            .zip(failing)
            .with(|_| pure::<_, String, ()>(1))
            .run(&())
            .await;

        assert_eq!(result, Err("b would not close".to_string()));
        assert_eq!(
            *log.lock(),
            vec!["open a", r#"close a Error("b would not close")"#]
        );
    }

    #[tokio::test]
    async fn cancel_releases_in_reverse_order() {
        let log = Log::default();
        let effect = tracked(&log, "a")
            .zip(tracked(&log, "b"))
            .with(|_| {
                from_async(|_: &()| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<i32, String>(0)
                })
            });
        let fiber = Fiber::start(effect, (), Arc::new(Ambient));

        tokio::time::sleep(Duration::from_millis(20)).await;
        fiber.cancel().run(&()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["open a", "open b", "close b Canceled", "close a Canceled"]
        );
        assert_eq!(fiber.join().run(&()).await, Err("fiber was canceled".to_string()));
    }
}
