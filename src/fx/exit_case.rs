/// Why a bracketed resource is being released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCase<E> {
    /// `use` finished with a value.
    Completed,
    /// The surrounding fiber was canceled while `use` was running.
    Canceled,
    /// `use` failed with this error.
    Error(E),
}

impl<E> ExitCase<E> {
    /// Exit case matching how `result` terminated.
    pub fn from_result<T>(result: &Result<T, E>) -> Self
    where
        E: Clone,
    {
        match result {
            Ok(_) => ExitCase::Completed,
            Err(error) => ExitCase::Error(error.clone()),
        }
    }

    /// `true` for [`ExitCase::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, ExitCase::Completed)
    }

    /// `true` for [`ExitCase::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, ExitCase::Canceled)
    }

    /// The error, if `use` failed.
    pub fn error(&self) -> Option<&E> {
        match self {
            ExitCase::Error(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result_maps_outcomes() {
        assert_eq!(ExitCase::from_result(&Ok::<_, String>(1)), ExitCase::Completed);
        let failed = ExitCase::from_result(&Err::<i32, _>("x".to_string()));
        assert_eq!(failed.error(), Some(&"x".to_string()));
        assert!(!failed.is_canceled());
    }
}
