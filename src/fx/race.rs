//! Racing effects against each other.
//!
//! [`race_pair`] and [`race_triple`] hand back the losers still running, so
//! the caller decides what happens to them. [`race2`], [`race3`] and
//! [`race_all`] cancel the losers and wait for their cleanup before
//! returning; larger races are built from `race2` by pairwise composition.
//!
//! In every race, a participant that *fails* first fails the whole race:
//! the others are canceled and any failure of that cancellation is combined
//! into the error.
//!
//! When two participants finish at practically the same moment, which one
//! wins is not specified. Exactly one winner is always delivered.

use std::fmt;
use std::panic::resume_unwind;

use crate::effect::boxed::BoxedEffect;
use crate::effect::constructors::from_async;
use crate::effect::ext::EffectExt;
use crate::effect::trait_def::Effect;
use crate::fx::connection::{Connection, Stacked};
use crate::fx::error::{compose, FxError, Panic};
use crate::fx::executor::FiberContext;
use crate::fx::fiber::Fiber;
use crate::fx::token::CancelToken;

// ============================================================================
// Results
// ============================================================================

/// Winner of [`race_pair`], with the loser's fiber still running.
pub enum RacePair<A, B, E> {
    /// The first effect won.
    First(A, Fiber<B, E>),
    /// The second effect won.
    Second(Fiber<A, E>, B),
}

/// Winner of [`race_triple`], with the two losers still running.
pub enum RaceTriple<A, B, C, E> {
    /// The first effect won.
    First(A, Fiber<B, E>, Fiber<C, E>),
    /// The second effect won.
    Second(Fiber<A, E>, B, Fiber<C, E>),
    /// The third effect won.
    Third(Fiber<A, E>, Fiber<B, E>, C),
}

/// Winner of [`race2`]; the loser has been canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race2<A, B> {
    /// The first effect won.
    First(A),
    /// The second effect won.
    Second(B),
}

/// Winner of [`race3`]; the losers have been canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race3<A, B, C> {
    /// The first effect won.
    First(A),
    /// The second effect won.
    Second(B),
    /// The third effect won.
    Third(C),
}

impl<A, B, E> fmt::Debug for RacePair<A, B, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let winner = match self {
            RacePair::First(..) => "First",
            RacePair::Second(..) => "Second",
        };
        f.debug_tuple(winner).field(&"<value>").finish()
    }
}

impl<A, B, C, E> fmt::Debug for RaceTriple<A, B, C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let winner = match self {
            RaceTriple::First(..) => "First",
            RaceTriple::Second(..) => "Second",
            RaceTriple::Third(..) => "Third",
        };
        f.debug_tuple(winner).field(&"<value>").finish()
    }
}

// ============================================================================
// Fiber-level racing
// ============================================================================

enum Side {
    First,
    Second,
    Third,
}

/// Run every token in `losers`, in order, and compose their failures.
async fn cancel_all<E: FxError>(losers: Vec<CancelToken<E>>) -> Result<(), E> {
    let mut composed: Result<(), E> = Ok(());
    for token in losers {
        let result = token.invoke().await;
        composed = match composed {
            Ok(()) => result,
            Err(primary) => Err(compose(primary, result)),
        };
    }
    composed
}

/// Fail the race with `error` after canceling the still-running fibers.
async fn lose_with<T, E: FxError>(
    error: E,
    losers: Vec<CancelToken<E>>,
    stacked: Stacked<E>,
) -> Result<T, E> {
    let canceled = cancel_all(losers).await;
    stacked.disarm();
    Err(compose(error, canceled))
}

/// Resume `panic` after canceling the still-running fibers.
async fn unwind_with<T, E: FxError>(
    panic: Panic,
    losers: Vec<CancelToken<E>>,
    stacked: Stacked<E>,
) -> Result<T, E> {
    if let Err(error) = cancel_all(losers).await {
        tracing::error!(?error, "canceling race losers failed while unwinding");
    }
    stacked.disarm();
    resume_unwind(panic)
}

pub(crate) async fn race_pair_in<A, B, E, Env, FA, FB>(
    fa: FA,
    fb: FB,
    env: Env,
) -> Result<(RacePair<A, B, E>, Stacked<E>), E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: FxError,
    Env: Clone + Send + Sync + 'static,
    FA: Effect<Output = A, Error = E, Env = Env> + 'static,
    FB: Effect<Output = B, Error = E, Env = Env> + 'static,
{
    let context = FiberContext::current();
    let fiber_a = Fiber::start(fa, env.clone(), context.executor.clone());
    let fiber_b = Fiber::start(fb, env, context.executor.clone());
    let parent = Connection::<E>::from_registry(context.registry);
    let stacked = Stacked::install(parent, fiber_a.cancel_token().and(fiber_b.cancel_token())).await?;

    let first_won = tokio::select! {
        () = fiber_a.finished() => true,
        () = fiber_b.finished() => false,
    };

    if first_won {
        let loser = fiber_b.cancel_token();
        match fiber_a.try_outcome() {
            Ok(Ok(a)) => {
                tracing::debug!("race won by first participant");
                Ok((RacePair::First(a, fiber_b), stacked))
            }
            Ok(Err(error)) => lose_with(error, vec![loser], stacked).await,
            Err(panic) => unwind_with(panic, vec![loser], stacked).await,
        }
    } else {
        let loser = fiber_a.cancel_token();
        match fiber_b.try_outcome() {
            Ok(Ok(b)) => {
                tracing::debug!("race won by second participant");
                Ok((RacePair::Second(fiber_a, b), stacked))
            }
            Ok(Err(error)) => lose_with(error, vec![loser], stacked).await,
            Err(panic) => unwind_with(panic, vec![loser], stacked).await,
        }
    }
}

async fn race_triple_in<A, B, C, E, Env, FA, FB, FC>(
    fa: FA,
    fb: FB,
    fc: FC,
    env: Env,
) -> Result<(RaceTriple<A, B, C, E>, Stacked<E>), E>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    E: FxError,
    Env: Clone + Send + Sync + 'static,
    FA: Effect<Output = A, Error = E, Env = Env> + 'static,
    FB: Effect<Output = B, Error = E, Env = Env> + 'static,
    FC: Effect<Output = C, Error = E, Env = Env> + 'static,
{
    let context = FiberContext::current();
    let fiber_a = Fiber::start(fa, env.clone(), context.executor.clone());
    let fiber_b = Fiber::start(fb, env.clone(), context.executor.clone());
    let fiber_c = Fiber::start(fc, env, context.executor.clone());
    let parent = Connection::<E>::from_registry(context.registry);
    let all = fiber_a
        .cancel_token()
        .and(fiber_b.cancel_token())
        .and(fiber_c.cancel_token());
    let stacked = Stacked::install(parent, all).await?;

    let side = tokio::select! {
        () = fiber_a.finished() => Side::First,
        () = fiber_b.finished() => Side::Second,
        () = fiber_c.finished() => Side::Third,
    };

    match side {
        Side::First => {
            let losers = vec![fiber_b.cancel_token(), fiber_c.cancel_token()];
            match fiber_a.try_outcome() {
                Ok(Ok(a)) => {
                    tracing::debug!("race won by first participant");
                    Ok((RaceTriple::First(a, fiber_b, fiber_c), stacked))
                }
                Ok(Err(error)) => lose_with(error, losers, stacked).await,
                Err(panic) => unwind_with(panic, losers, stacked).await,
            }
        }
        Side::Second => {
            let losers = vec![fiber_a.cancel_token(), fiber_c.cancel_token()];
            match fiber_b.try_outcome() {
                Ok(Ok(b)) => {
                    tracing::debug!("race won by second participant");
                    Ok((RaceTriple::Second(fiber_a, b, fiber_c), stacked))
                }
                Ok(Err(error)) => lose_with(error, losers, stacked).await,
                Err(panic) => unwind_with(panic, losers, stacked).await,
            }
        }
        Side::Third => {
            let losers = vec![fiber_a.cancel_token(), fiber_b.cancel_token()];
            match fiber_c.try_outcome() {
                Ok(Ok(c)) => {
                    tracing::debug!("race won by third participant");
                    Ok((RaceTriple::Third(fiber_a, fiber_b, c), stacked))
                }
                Ok(Err(error)) => lose_with(error, losers, stacked).await,
                Err(panic) => unwind_with(panic, losers, stacked).await,
            }
        }
    }
}

// ============================================================================
// Public combinators
// ============================================================================

/// Run `fa` and `fb` as fibers and return as soon as one finishes.
///
/// The winner's value comes with the loser's [`Fiber`], still running and
/// not canceled. If the winner failed, the loser is canceled and the race
/// fails.
///
/// While the race is pending, canceling the current fiber cancels both.
pub fn race_pair<FA, FB>(
    fa: FA,
    fb: FB,
) -> impl Effect<Output = RacePair<FA::Output, FB::Output, FA::Error>, Error = FA::Error, Env = FA::Env>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
{
    from_async(move |env: &FA::Env| {
        let env = env.clone();
        async move {
            let (pair, stacked) = race_pair_in(fa, fb, env).await?;
            stacked.disarm();
            Ok(pair)
        }
    })
}

/// Three-way [`race_pair`].
pub fn race_triple<FA, FB, FC>(
    fa: FA,
    fb: FB,
    fc: FC,
) -> impl Effect<
    Output = RaceTriple<FA::Output, FB::Output, FC::Output, FA::Error>,
    Error = FA::Error,
    Env = FA::Env,
>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FC: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FC::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
{
    from_async(move |env: &FA::Env| {
        let env = env.clone();
        async move {
            let (triple, stacked) = race_triple_in(fa, fb, fc, env).await?;
            stacked.disarm();
            Ok(triple)
        }
    })
}

/// Race `fa` against `fb`, cancel the loser and wait for its cleanup.
///
/// ```rust
/// use std::time::Duration;
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let fast = pure::<_, String, ()>("fast");
/// let slow = sleep(Duration::from_secs(5)).map(|()| 0);
/// assert_eq!(race2(fast, slow).run(&()).await, Ok(Race2::First("fast")));
/// # });
/// ```
pub fn race2<FA, FB>(
    fa: FA,
    fb: FB,
) -> impl Effect<Output = Race2<FA::Output, FB::Output>, Error = FA::Error, Env = FA::Env>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
{
    from_async(move |env: &FA::Env| {
        let env = env.clone();
        async move {
            let (pair, stacked) = race_pair_in(fa, fb, env).await?;
            let result = match pair {
                RacePair::First(a, loser) => loser.cancel_token().invoke().await.map(|()| Race2::First(a)),
                RacePair::Second(loser, b) => loser.cancel_token().invoke().await.map(|()| Race2::Second(b)),
            };
            stacked.disarm();
            result
        }
    })
}

/// Race three effects, cancel both losers and wait for their cleanup.
pub fn race3<FA, FB, FC>(
    fa: FA,
    fb: FB,
    fc: FC,
) -> impl Effect<Output = Race3<FA::Output, FB::Output, FC::Output>, Error = FA::Error, Env = FA::Env>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FC: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FC::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
{
    from_async(move |env: &FA::Env| {
        let env = env.clone();
        async move {
            let (triple, stacked) = race_triple_in(fa, fb, fc, env).await?;
            let result = match triple {
                RaceTriple::First(a, b, c) => cancel_all(vec![b.cancel_token(), c.cancel_token()])
                    .await
                    .map(|()| Race3::First(a)),
                RaceTriple::Second(a, b, c) => cancel_all(vec![a.cancel_token(), c.cancel_token()])
                    .await
                    .map(|()| Race3::Second(b)),
                RaceTriple::Third(a, b, c) => cancel_all(vec![a.cancel_token(), b.cancel_token()])
                    .await
                    .map(|()| Race3::Third(c)),
            };
            stacked.disarm();
            result
        }
    })
}

/// Race any number of effects, returning the winner's index and value.
///
/// Built as a balanced tree of [`race2`]: every level cancels its loser, so
/// nothing is left running when this returns. An empty list never
/// completes.
pub fn race_all<T, E, Env>(effects: Vec<BoxedEffect<T, E, Env>>) -> BoxedEffect<(usize, T), E, Env>
where
    T: Send + 'static,
    E: FxError,
    Env: Clone + Send + Sync + 'static,
{
    let indexed = effects
        .into_iter()
        .enumerate()
        .map(|(index, effect)| effect.map(move |value| (index, value)).boxed())
        .collect();
    race_tree(indexed)
}

fn race_tree<T, E, Env>(mut effects: Vec<BoxedEffect<T, E, Env>>) -> BoxedEffect<T, E, Env>
where
    T: Send + 'static,
    E: FxError,
    Env: Clone + Send + Sync + 'static,
{
    if effects.len() > 1 {
        let right = effects.split_off(effects.len() / 2);
        return race2(race_tree(effects), race_tree(right))
            .map(|winner| match winner {
                Race2::First(value) | Race2::Second(value) => value,
            })
            .boxed();
    }
    match effects.pop() {
        Some(only) => only,
        None => from_async(|_: &Env| std::future::pending::<Result<T, E>>()).boxed(),
    }
}
