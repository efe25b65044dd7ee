//! Error model of the runtime.
//!
//! User errors travel through effects unchanged. The runtime adds exactly one
//! error of its own, [`Canceled`], and requires every error type used with
//! fibers to be able to absorb it and to compose with itself.

use std::any::Any;
use std::fmt;

use crate::semigroup::Semigroup;

/// The work was canceled before it produced a value.
///
/// Seen when joining a fiber whose connection was canceled, or when an
/// executor dropped a task before it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fiber was canceled")
    }
}

impl std::error::Error for Canceled {}

impl Semigroup for Canceled {
    fn combine(self, _other: Self) -> Self {
        self
    }
}

impl From<Canceled> for String {
    fn from(canceled: Canceled) -> Self {
        canceled.to_string()
    }
}

/// Requirements on error types used with fibers, races and brackets.
///
/// - [`Semigroup`] composes errors that happen together; the primary error
///   is always on the left.
/// - `From<Canceled>` lets a canceled join surface as a regular error.
/// - `Debug` is used when a failure can only be logged.
///
/// Blanket-implemented for every type meeting the bounds.
pub trait FxError: Semigroup + From<Canceled> + fmt::Debug + Send + 'static {}

impl<E> FxError for E where E: Semigroup + From<Canceled> + fmt::Debug + Send + 'static {}

/// Compose `primary` with the outcome of a secondary action.
pub(crate) fn compose<E: Semigroup>(primary: E, secondary: Result<(), E>) -> E {
    match secondary {
        Ok(()) => primary,
        Err(other) => primary.combine(other),
    }
}

/// Payload of a captured panic.
pub(crate) type Panic = Box<dyn Any + Send + 'static>;

/// A token failure with its type erased.
///
/// Connections hold tokens of any error type. A failure is turned back into
/// the drainer's error type when the types agree and logged otherwise.
pub(crate) struct Failure {
    error: Box<dyn Any + Send>,
    rendered: String,
}

impl Failure {
    pub(crate) fn new<E>(error: E) -> Self
    where
        E: fmt::Debug + Send + 'static,
    {
        Failure {
            rendered: format!("{error:?}"),
            error: Box::new(error),
        }
    }

    pub(crate) fn into_error<E: 'static>(self) -> Option<E> {
        let Failure { error, rendered } = self;
        match error.downcast::<E>() {
            Ok(error) => Some(*error),
            Err(_) => {
                tracing::error!(
                    error = %rendered,
                    expected = std::any::type_name::<E>(),
                    "cancel token failure has a foreign error type and cannot be composed"
                );
                None
            }
        }
    }

    pub(crate) fn log_unclaimed(&self) {
        tracing::error!(error = %self.rendered, "cancel token failure was never reported");
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("error", &self.rendered)
            .finish()
    }
}
