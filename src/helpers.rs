//! Utility functions for CLAM and its dependents.

use crate::number::Number;

pub fn arg_min<T: PartialOrd + Copy>(values: &[T]) -> (usize, T) {
    values.iter().enumerate().fold(
        (0, values[0]),
        |(i_min, v_min), (i, &v)| {
            if v < v_min {
                (i, v)
            } else {
                (i_min, v_min)
            }
        },
    )
}

pub fn arg_max<T: PartialOrd + Copy>(values: &[T]) -> (usize, T) {
    values.iter().enumerate().fold(
        (0, values[0]),
        |(i_max, v_max), (i, &v)| {
            if v > v_max {
                (i, v)
            } else {
                (i_max, v_max)
            }
        },
    )
}

pub fn mean<T: Number>(values: &[T]) -> f64 {
    values.iter().cloned().sum::<T>().as_f64() / values.len() as f64
}
