//! Concrete effect types returned by the constructors and by [`EffectExt`].
//!
//! These are plain structs over the inner effect and a closure, so a chain
//! of combinators compiles down to one nested future with no allocation.
//!
//! [`EffectExt`]: crate::effect::EffectExt

use std::future::Future;
use std::marker::PhantomData;

use crate::effect::trait_def::Effect;

macro_rules! opaque_debug {
    ($name:ident < $($param:ident),+ >, $($field:literal),+) => {
        impl<$($param),+> std::fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field($field, &"<opaque>"))+
                    .finish()
            }
        }
    };
}

/// A value lifted into an effect. See [`pure`](crate::effect::pure).
#[derive(Debug, Clone)]
pub struct Pure<T, E, Env> {
    value: T,
    _marker: PhantomData<fn() -> (E, Env)>,
}

impl<T, E, Env> Pure<T, E, Env> {
    pub(crate) fn new(value: T) -> Self {
        Pure {
            value,
            _marker: PhantomData,
        }
    }
}

impl<T, E, Env> Effect for Pure<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    type Output = T;
    type Error = E;
    type Env = Env;

    async fn run(self, _env: &Env) -> Result<T, E> {
        Ok(self.value)
    }
}

/// An error lifted into an effect. See [`fail`](crate::effect::fail).
#[derive(Debug, Clone)]
pub struct Fail<T, E, Env> {
    error: E,
    _marker: PhantomData<fn() -> (T, Env)>,
}

impl<T, E, Env> Fail<T, E, Env> {
    pub(crate) fn new(error: E) -> Self {
        Fail {
            error,
            _marker: PhantomData,
        }
    }
}

impl<T, E, Env> Effect for Fail<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    type Output = T;
    type Error = E;
    type Env = Env;

    async fn run(self, _env: &Env) -> Result<T, E> {
        Err(self.error)
    }
}

/// A `Result` lifted into an effect. See [`from_result`](crate::effect::from_result).
#[derive(Debug, Clone)]
pub struct FromResult<T, E, Env> {
    result: Result<T, E>,
    _env: PhantomData<fn(Env)>,
}

impl<T, E, Env> FromResult<T, E, Env> {
    pub(crate) fn new(result: Result<T, E>) -> Self {
        FromResult {
            result,
            _env: PhantomData,
        }
    }
}

impl<T, E, Env> Effect for FromResult<T, E, Env>
where
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    type Output = T;
    type Error = E;
    type Env = Env;

    async fn run(self, _env: &Env) -> Result<T, E> {
        self.result
    }
}

/// A synchronous function of the environment.
pub struct FromFn<F, Env> {
    f: F,
    _env: PhantomData<fn(Env)>,
}

opaque_debug!(FromFn<F, Env>, "f");

impl<F, Env> FromFn<F, Env> {
    pub(crate) fn new(f: F) -> Self {
        FromFn {
            f,
            _env: PhantomData,
        }
    }
}

impl<F, T, E, Env> Effect for FromFn<F, Env>
where
    F: FnOnce(&Env) -> Result<T, E> + Send,
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    type Output = T;
    type Error = E;
    type Env = Env;

    async fn run(self, env: &Env) -> Result<T, E> {
        (self.f)(env)
    }
}

/// An async function of the environment.
pub struct FromAsync<F, Env> {
    f: F,
    _env: PhantomData<fn(Env)>,
}

opaque_debug!(FromAsync<F, Env>, "f");

impl<F, Env> FromAsync<F, Env> {
    pub(crate) fn new(f: F) -> Self {
        FromAsync {
            f,
            _env: PhantomData,
        }
    }
}

impl<F, Fut, T, E, Env> Effect for FromAsync<F, Env>
where
    F: FnOnce(&Env) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
    Env: Clone + Send + Sync,
{
    type Output = T;
    type Error = E;
    type Env = Env;

    fn run(self, env: &Env) -> impl Future<Output = Result<T, E>> + Send {
        (self.f)(env)
    }
}

/// An effect whose construction is postponed until it runs.
pub struct Defer<F> {
    thunk: F,
}

opaque_debug!(Defer<F>, "thunk");

impl<F> Defer<F> {
    pub(crate) fn new(thunk: F) -> Self {
        Defer { thunk }
    }
}

impl<F, Inner> Effect for Defer<F>
where
    F: FnOnce() -> Inner + Send,
    Inner: Effect,
{
    type Output = Inner::Output;
    type Error = Inner::Error;
    type Env = Inner::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, Self::Error> {
        (self.thunk)().run(env).await
    }
}

/// Transforms the success value.
pub struct Map<Inner, F> {
    pub(crate) inner: Inner,
    pub(crate) f: F,
}

opaque_debug!(Map<Inner, F>, "inner", "f");

impl<Inner, F, U> Effect for Map<Inner, F>
where
    Inner: Effect,
    F: FnOnce(Inner::Output) -> U + Send,
    U: Send,
{
    type Output = U;
    type Error = Inner::Error;
    type Env = Inner::Env;

    async fn run(self, env: &Self::Env) -> Result<U, Self::Error> {
        let value = self.inner.run(env).await?;
        Ok((self.f)(value))
    }
}

/// Transforms the failure value.
pub struct MapErr<Inner, F> {
    pub(crate) inner: Inner,
    pub(crate) f: F,
}

opaque_debug!(MapErr<Inner, F>, "inner", "f");

impl<Inner, F, E2> Effect for MapErr<Inner, F>
where
    Inner: Effect,
    F: FnOnce(Inner::Error) -> E2 + Send,
    E2: Send,
{
    type Output = Inner::Output;
    type Error = E2;
    type Env = Inner::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, E2> {
        self.inner.run(env).await.map_err(self.f)
    }
}

/// Sequences a dependent effect (monadic bind).
pub struct AndThen<Inner, F> {
    pub(crate) inner: Inner,
    pub(crate) f: F,
}

opaque_debug!(AndThen<Inner, F>, "inner", "f");

impl<Inner, F, Next> Effect for AndThen<Inner, F>
where
    Inner: Effect,
    Next: Effect<Error = Inner::Error, Env = Inner::Env>,
    F: FnOnce(Inner::Output) -> Next + Send,
{
    type Output = Next::Output;
    type Error = Inner::Error;
    type Env = Inner::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, Self::Error> {
        let value = self.inner.run(env).await?;
        (self.f)(value).run(env).await
    }
}

/// Replaces a failure with the effect built from it.
pub struct OrElse<Inner, F> {
    pub(crate) inner: Inner,
    pub(crate) f: F,
}

opaque_debug!(OrElse<Inner, F>, "inner", "f");

impl<Inner, F, Recovery> Effect for OrElse<Inner, F>
where
    Inner: Effect,
    Recovery: Effect<Output = Inner::Output, Env = Inner::Env>,
    F: FnOnce(Inner::Error) -> Recovery + Send,
{
    type Output = Inner::Output;
    type Error = Recovery::Error;
    type Env = Inner::Env;

    async fn run(self, env: &Self::Env) -> Result<Self::Output, Self::Error> {
        match self.inner.run(env).await {
            Ok(value) => Ok(value),
            Err(error) => (self.f)(error).run(env).await,
        }
    }
}
