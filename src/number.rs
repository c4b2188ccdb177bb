//! Provides the `Number` trait for the values in a `Dataset` and the distance
//! values produced by a `Metric`.

use std::iter::Sum;

use num_traits::{Num, NumCast};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A `Number` is a general numeric type. Instances in a `Dataset` are
/// sequences of `Number`s and distance values are `Number`s.
///
/// The serde bounds let distance values ride along in the records we write to
/// disk.
pub trait Number:
    Num
    + NumCast
    + Sum
    + Copy
    + PartialOrd
    + std::fmt::Debug
    + std::fmt::Display
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Casts the number to an `f64` for computations that need the full float
    /// range, e.g. local fractal dimensions and transition probabilities.
    fn as_f64(&self) -> f64 {
        num_traits::cast(*self).unwrap()
    }

    /// Casts an `f64` back into this `Number` type.
    fn from_f64(value: f64) -> Self {
        num_traits::cast(value).unwrap()
    }
}

impl<T> Number for T where
    T: Num
        + NumCast
        + Sum
        + Copy
        + PartialOrd
        + std::fmt::Debug
        + std::fmt::Display
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static
{
}
