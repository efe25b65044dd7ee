//! Wrapping callback-based APIs as cancelable effects.
//!
//! The registration is bracketed: registering is the acquire step, waiting
//! for the callback is the use step, and the release step runs the returned
//! [`CancelToken`] only when the wait was canceled. The callback and the
//! cancellation race for one shared slot, so exactly one of them wins.

use std::fmt;
use std::future::pending;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::effect::constructors::{from_async, from_fn, pure};
use crate::effect::trait_def::Effect;
use crate::fx::bracket::bracket_case;
use crate::fx::error::FxError;
use crate::fx::exit_case::ExitCase;
use crate::fx::token::CancelToken;

type Slot<T, E> = Arc<Mutex<Option<oneshot::Sender<Result<T, E>>>>>;

struct Shared<T, E> {
    slot: Slot<T, E>,
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        if self.slot.lock().is_some() {
            tracing::warn!("cancelable callback dropped without being invoked; the effect will never complete");
        }
    }
}

/// Completion callback handed to a registrar.
///
/// Clone it freely; the first [`complete`](Callback::complete) across all
/// clones wins and every later call is ignored.
pub struct Callback<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Callback<T, E> {
    fn clone(&self) -> Self {
        Callback {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Callback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("pending", &self.shared.slot.lock().is_some())
            .finish()
    }
}

impl<T, E> Callback<T, E> {
    /// Deliver the outcome. Returns `false` if an outcome was already
    /// delivered or the wait was canceled.
    pub fn complete(&self, result: Result<T, E>) -> bool {
        let sender = self.shared.slot.lock().take();
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Deliver a value.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Deliver an error.
    pub fn fail(&self, error: E) -> bool {
        self.complete(Err(error))
    }
}

/// The bracketed resource: one pending registration.
struct Registration<T, E> {
    slot: Slot<T, E>,
    receiver: Arc<Mutex<Option<oneshot::Receiver<Result<T, E>>>>>,
    token: Arc<Mutex<Option<CancelToken<E>>>>,
}

impl<T, E> Clone for Registration<T, E> {
    fn clone(&self) -> Self {
        Registration {
            slot: self.slot.clone(),
            receiver: self.receiver.clone(),
            token: self.token.clone(),
        }
    }
}

/// Wrap a callback API whose registration is itself an effect.
///
/// `registrar` receives the [`Callback`] and yields the token that aborts
/// the pending operation. The token runs only if the wait is canceled before
/// the callback fired; once canceled, the callback's `complete` returns
/// `false` and its value is discarded.
pub fn cancelable_f<T, E, Env, F, Reg>(registrar: F) -> impl Effect<Output = T, Error = E, Env = Env>
where
    T: Send + 'static,
    E: FxError + Clone,
    Env: Clone + Send + Sync + 'static,
    F: FnOnce(Callback<T, E>) -> Reg + Send + 'static,
    Reg: Effect<Output = CancelToken<E>, Error = E, Env = Env> + 'static,
{
    let acquire = from_async(move |env: &Env| {
        let env = env.clone();
        async move {
            let (sender, receiver) = oneshot::channel();
            let slot: Slot<T, E> = Arc::new(Mutex::new(Some(sender)));
            let callback = Callback {
                shared: Arc::new(Shared { slot: slot.clone() }),
            };
            let token = registrar(callback).run(&env).await?;
            Ok(Registration {
                slot,
                receiver: Arc::new(Mutex::new(Some(receiver))),
                token: Arc::new(Mutex::new(Some(token))),
            })
        }
    });

    bracket_case(
        acquire,
        |registration: Registration<T, E>| {
            from_async(move |_: &Env| async move {
                let receiver = registration.receiver.lock().take();
                let Some(receiver) = receiver else {
                    return pending().await;
                };
                match receiver.await {
                    Ok(result) => result,
                    Err(_) => pending().await,
                }
            })
        },
        |registration: Registration<T, E>, exit: ExitCase<E>| {
            from_async(move |_: &Env| async move {
                if !exit.is_canceled() {
                    return Ok(());
                }
                // Taking the sender is what makes the callback lose.
                let still_pending = registration.slot.lock().take().is_some();
                let token = registration.token.lock().take();
                match token {
                    Some(token) if still_pending => token.invoke().await,
                    _ => Ok(()),
                }
            })
        },
    )
}

/// Wrap a callback API whose registration returns the abort token directly.
///
/// ```rust
/// use undertow::effect::prelude::*;
///
/// # tokio_test::block_on(async {
/// let effect = cancelable::<_, String, (), _>(|callback| {
///     std::thread::spawn(move || callback.succeed(42));
///     CancelToken::noop()
/// });
/// assert_eq!(effect.run(&()).await, Ok(42));
/// # });
/// ```
pub fn cancelable<T, E, Env, F>(registrar: F) -> impl Effect<Output = T, Error = E, Env = Env>
where
    T: Send + 'static,
    E: FxError + Clone,
    Env: Clone + Send + Sync + 'static,
    F: FnOnce(Callback<T, E>) -> CancelToken<E> + Send + 'static,
{
    cancelable_f(move |callback| from_fn(move |_: &Env| Ok(registrar(callback))))
}

/// Wrap a callback API that cannot be aborted.
pub fn async_callback<T, E, Env, F>(registrar: F) -> impl Effect<Output = T, Error = E, Env = Env>
where
    T: Send + 'static,
    E: FxError + Clone,
    Env: Clone + Send + Sync + 'static,
    F: FnOnce(Callback<T, E>) + Send + 'static,
{
    cancelable_f(move |callback| {
        registrar(callback);
        pure::<_, E, Env>(CancelToken::noop())
    })
}
