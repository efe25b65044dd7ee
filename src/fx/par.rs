//! Running effects in parallel and combining all their results.
//!
//! Everything here is built on [`par_map2`], which is built on
//! [`race_pair`](crate::fx::race_pair): whichever side finishes first keeps
//! its value while the other side is joined. A successful side is never
//! canceled. The first failure cancels the other side and fails the whole
//! operation, with any cancel failure combined into the error.

use crate::effect::boxed::BoxedEffect;
use crate::effect::constructors::{from_async, pure};
use crate::effect::ext::EffectExt;
use crate::effect::trait_def::Effect;
use crate::fx::error::FxError;
use crate::fx::race::{race_pair_in, RacePair};

/// Run `fa` and `fb` in parallel and combine their values with `f`.
///
/// ```rust
/// use std::time::Duration;
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let slow = sleep(Duration::from_millis(10)).map(|()| 2);
/// let fast = pure::<_, String, ()>(3);
/// assert_eq!(par_map2(slow, fast, |a, b| a * b).run(&()).await, Ok(6));
/// # });
/// ```
pub fn par_map2<FA, FB, F, C>(
    fa: FA,
    fb: FB,
    f: F,
) -> impl Effect<Output = C, Error = FA::Error, Env = FA::Env>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
    F: FnOnce(FA::Output, FB::Output) -> C + Send,
    C: Send,
{
    from_async(move |env: &FA::Env| {
        let env = env.clone();
        async move {
            let (pair, stacked) = race_pair_in(fa, fb, env).await?;
            let joined = match pair {
                RacePair::First(a, loser) => loser.outcome().await.map(|b| f(a, b)),
                RacePair::Second(loser, b) => loser.outcome().await.map(|a| f(a, b)),
            };
            stacked.disarm();
            joined
        }
    })
}

/// [`par_map2`] over three effects.
pub fn par_map3<FA, FB, FC, F, D>(
    fa: FA,
    fb: FB,
    fc: FC,
    f: F,
) -> impl Effect<Output = D, Error = FA::Error, Env = FA::Env>
where
    FA: Effect + 'static,
    FB: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FC: Effect<Error = FA::Error, Env = FA::Env> + 'static,
    FA::Output: 'static,
    FB::Output: 'static,
    FC::Output: 'static,
    FA::Error: FxError,
    FA::Env: 'static,
    F: FnOnce(FA::Output, FB::Output, FC::Output) -> D + Send,
    D: Send,
{
    par_map2(par_map2(fa, fb, |a, b| (a, b)), fc, move |(a, b), c| f(a, b, c))
}

/// Run every effect in parallel and collect the values in input order.
///
/// Built as a balanced tree of [`par_map2`].
pub fn par_sequence<T, E, Env>(mut effects: Vec<BoxedEffect<T, E, Env>>) -> BoxedEffect<Vec<T>, E, Env>
where
    T: Send + 'static,
    E: FxError,
    Env: Clone + Send + Sync + 'static,
{
    match effects.len() {
        0 => pure(Vec::new()).boxed(),
        1 => match effects.pop() {
            Some(only) => only.map(|value| vec![value]).boxed(),
            None => pure(Vec::new()).boxed(),
        },
        len => {
            let right = effects.split_off(len / 2);
            par_map2(par_sequence(effects), par_sequence(right), |mut left, right| {
                left.extend(right);
                left
            })
            .boxed()
        }
    }
}

/// Apply `f` to every item and run the resulting effects in parallel.
pub fn par_traverse<I, F, Eff>(
    items: impl IntoIterator<Item = I>,
    f: F,
) -> BoxedEffect<Vec<Eff::Output>, Eff::Error, Eff::Env>
where
    F: FnMut(I) -> Eff,
    Eff: Effect + 'static,
    Eff::Output: 'static,
    Eff::Error: FxError,
    Eff::Env: 'static,
{
    par_sequence(items.into_iter().map(f).map(EffectExt::boxed).collect())
}
