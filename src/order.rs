//! Record ordering
//!
//! The total order over records is supplied by the caller as a strict-weak-ordering predicate
//! `less(a, b)`. Every sort and merge in the engine goes through [`Order`].

use std::cmp::Ordering;

/// Strict weak ordering over records
pub trait Order<T>: Send + 'static {
    /// `true` when `a` must come before `b`
    fn less(&self, a: &T, b: &T) -> bool;

    /// Three-way comparison derived from `less`, for slice sorting
    fn compare(&self, a: &T, b: &T) -> Ordering {
        if self.less(a, b) {
            Ordering::Less
        } else if self.less(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

impl<T, F> Order<T> for F
where
    F: Fn(&T, &T) -> bool + Send + 'static,
{
    fn less(&self, a: &T, b: &T) -> bool {
        self(a, b)
    }
}

/// Ascending order of `T: Ord`
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T: Ord> Order<T> for NaturalOrder {
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}
