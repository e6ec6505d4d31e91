//! Flag set algebra.
//!
//! A condition only needs three operations from its state type: union,
//! difference, and a superset test. Integers act as bitsets, `BTreeSet` and
//! `HashSet` as sets of named flags, and `bitflags` types opt in through
//! [`flag_set!`](crate::flag_set).

use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};

/// Set algebra over a combination of boolean conditions.
///
/// Implementations must be total: no operation may fail or panic.
pub trait FlagSet: Clone + Debug + Send + Sync + 'static {
    /// Returns `self ∪ other`.
    #[must_use]
    fn union(&self, other: &Self) -> Self;

    /// Returns `self − other`.
    #[must_use]
    fn difference(&self, other: &Self) -> Self;

    /// Returns true if every flag in `required` is also set in `self`.
    fn is_superset(&self, required: &Self) -> bool;
}

macro_rules! impl_flag_set_for_uint {
    ($($t:ty),* $(,)?) => {
        $(
            impl FlagSet for $t {
                fn union(&self, other: &Self) -> Self {
                    *self | *other
                }

                fn difference(&self, other: &Self) -> Self {
                    *self & !*other
                }

                fn is_superset(&self, required: &Self) -> bool {
                    *self & *required == *required
                }
            }
        )*
    };
}

impl_flag_set_for_uint!(u8, u16, u32, u64, u128, usize);

impl<K> FlagSet for BTreeSet<K>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
{
    fn union(&self, other: &Self) -> Self {
        self.iter().chain(other.iter()).cloned().collect()
    }

    fn difference(&self, other: &Self) -> Self {
        BTreeSet::difference(self, other).cloned().collect()
    }

    fn is_superset(&self, required: &Self) -> bool {
        BTreeSet::is_superset(self, required)
    }
}

impl<K, S> FlagSet for HashSet<K, S>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    S: BuildHasher + Default + Clone + Send + Sync + 'static,
{
    fn union(&self, other: &Self) -> Self {
        self.iter().chain(other.iter()).cloned().collect()
    }

    fn difference(&self, other: &Self) -> Self {
        HashSet::difference(self, other).cloned().collect()
    }

    fn is_superset(&self, required: &Self) -> bool {
        HashSet::is_superset(self, required)
    }
}

/// Implements [`FlagSet`] for one or more `bitflags` types.
///
/// ```rust,ignore
/// bitflags::bitflags! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
///     pub struct Ready: u8 {
///         const NETWORK = 1;
///         const DISK = 1 << 1;
///     }
/// }
/// condflags::flag_set!(Ready);
/// ```
#[macro_export]
macro_rules! flag_set {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::FlagSet for $t {
                fn union(&self, other: &Self) -> Self {
                    <$t>::union(*self, *other)
                }

                fn difference(&self, other: &Self) -> Self {
                    <$t>::difference(*self, *other)
                }

                fn is_superset(&self, required: &Self) -> bool {
                    <$t>::contains(self, *required)
                }
            }
        )+
    };
}
