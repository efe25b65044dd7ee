//! Composition of errors that happen together.
//!
//! Concurrent code routinely ends up with more than one failure for a single
//! operation: a `par_map2` whose first branch failed and whose sibling's
//! cancel token failed too, or a bracket whose use and release both failed.
//! Neither error is allowed to disappear, so the runtime asks the error type
//! to combine them.
//!
//! # Law
//!
//! `combine` must be associative:
//!
//! ```text
//! a.combine(b).combine(c) == a.combine(b.combine(c))
//! ```
//!
//! The runtime always puts the primary error on the left.
//!
//! ```
//! use undertow::Semigroup;
//!
//! #[derive(Debug, PartialEq)]
//! enum AppError {
//!     Io(String),
//!     Many(Vec<AppError>),
//! }
//!
//! impl Semigroup for AppError {
//!     fn combine(self, other: Self) -> Self {
//!         let mut all = match self {
//!             AppError::Many(errors) => errors,
//!             single => vec![single],
//!         };
//!         match other {
//!             AppError::Many(errors) => all.extend(errors),
//!             single => all.push(single),
//!         }
//!         AppError::Many(all)
//!     }
//! }
//!
//! let both = AppError::Io("use".into()).combine(AppError::Io("release".into()));
//! assert_eq!(
//!     both,
//!     AppError::Many(vec![AppError::Io("use".into()), AppError::Io("release".into())])
//! );
//! ```

/// A type with an associative binary operation.
///
/// `combine` takes both sides by value; clone first if you need to keep them.
pub trait Semigroup: Sized {
    /// Combine `self` (the primary value) with `other`.
    fn combine(self, other: Self) -> Self;
}

impl<T> Semigroup for Vec<T> {
    #[inline]
    fn combine(mut self, other: Self) -> Self {
        self.extend(other);
        self
    }
}

/// Joins the messages with `"; "`, keeping the primary one first.
impl Semigroup for String {
    fn combine(mut self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if !self.is_empty() {
            self.push_str("; ");
        }
        self.push_str(&other);
        self
    }
}

macro_rules! impl_semigroup_tuple {
    ($($idx:tt $T:ident),+) => {
        impl<$($T: Semigroup),+> Semigroup for ($($T,)+) {
            #[inline]
            fn combine(self, other: Self) -> Self {
                ($(self.$idx.combine(other.$idx),)+)
            }
        }
    };
}

impl_semigroup_tuple!(0 A, 1 B);
impl_semigroup_tuple!(0 A, 1 B, 2 C);
impl_semigroup_tuple!(0 A, 1 B, 2 C, 3 D);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn vec_keeps_primary_first() {
        assert_eq!(vec!["use"].combine(vec!["release"]), vec!["use", "release"]);
    }

    #[test]
    fn string_joins_messages() {
        let combined = "acquire failed".to_string().combine("cleanup failed".to_string());
        assert_eq!(combined, "acquire failed; cleanup failed");
    }

    #[test]
    fn string_ignores_empty_sides() {
        assert_eq!(String::new().combine("b".to_string()), "b");
        assert_eq!("a".to_string().combine(String::new()), "a");
    }

    #[test]
    fn tuple_combines_componentwise() {
        let left = (vec![1], "a".to_string());
        let right = (vec![2], "b".to_string());
        assert_eq!(left.combine(right), (vec![1, 2], "a; b".to_string()));
    }

    proptest! {
        #[test]
        fn string_combine_is_associative(a in ".{0,8}", b in ".{0,8}", c in ".{0,8}") {
            let left = a.clone().combine(b.clone()).combine(c.clone());
            let right = a.combine(b.combine(c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn vec_combine_is_associative(
            a in proptest::collection::vec(any::<u8>(), 0..5),
            b in proptest::collection::vec(any::<u8>(), 0..5),
            c in proptest::collection::vec(any::<u8>(), 0..5),
        ) {
            let left = a.clone().combine(b.clone()).combine(c.clone());
            let right = a.combine(b.combine(c));
            prop_assert_eq!(left, right);
        }
    }
}
