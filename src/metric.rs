//! Provides the `Metric` trait and implementations for some common distance
//! functions.

use num_traits::NumCast;
use rayon::prelude::*;

use crate::number::Number;

/// A `Metric` is a function that takes two instances (over a `Number` T) from a
/// `Dataset` and deterministically produces a non-negative `Number` U.
///
/// The distance from an instance to itself must be zero and the function must
/// be symmetric. The triangle inequality is not required, but without it the
/// pruned searches lose their completeness guarantee.
pub trait Metric<T: Number, U: Number>: std::fmt::Debug + Send + Sync {
    /// Returns the name of the `Metric` as a String.
    fn name(&self) -> &str;

    /// Returns the distance between two instances.
    fn one_to_one(&self, x: &[T], y: &[T]) -> U;

    fn one_to_many(&self, x: &[T], ys: &[&[T]]) -> Vec<U> {
        ys.iter().map(|y| self.one_to_one(x, y)).collect()
    }

    fn par_one_to_many(&self, x: &[T], ys: &[&[T]]) -> Vec<U> {
        ys.par_iter().map(|y| self.one_to_one(x, y)).collect()
    }

    fn many_to_many(&self, xs: &[&[T]], ys: &[&[T]]) -> Vec<Vec<U>> {
        xs.iter().map(|x| self.one_to_many(x, ys)).collect()
    }

    fn par_many_to_many(&self, xs: &[&[T]], ys: &[&[T]]) -> Vec<Vec<U>> {
        xs.par_iter().map(|x| self.one_to_many(x, ys)).collect()
    }

    // TODO: Make this faster by computing only the lower triangle
    fn pairwise(&self, is: &[&[T]]) -> Vec<Vec<U>> {
        self.many_to_many(is, is)
    }

    /// Whether the metric is expensive to compute.
    fn is_expensive(&self) -> bool;
}

/// Returns the `Metric` with the given name, or Err if the name is not
/// recognized.
///
/// The available metrics are: "euclidean", "euclideansq", "manhattan",
/// "cosine" and "hamming".
pub fn metric_from_name<T: Number, U: Number>(
    name: &str,
    is_expensive: bool,
) -> Result<Box<dyn Metric<T, U>>, String> {
    match name {
        "euclidean" => Ok(Box::new(Euclidean { is_expensive })),
        "euclideansq" => Ok(Box::new(EuclideanSq { is_expensive })),
        "manhattan" => Ok(Box::new(Manhattan { is_expensive })),
        "cosine" => Ok(Box::new(Cosine { is_expensive })),
        "hamming" => Ok(Box::new(Hamming { is_expensive })),
        _ => Err(format!("{name} is not a metric we provide.")),
    }
}

/// L2-norm.
#[derive(Debug)]
pub struct Euclidean {
    pub is_expensive: bool,
}

impl<T: Number, U: Number> Metric<T, U> for Euclidean {
    fn name(&self) -> &str {
        "euclidean"
    }

    fn one_to_one(&self, x: &[T], y: &[T]) -> U {
        let d: T = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum();
        let d: f64 = NumCast::from(d).unwrap();
        U::from(d.sqrt()).unwrap()
    }

    fn is_expensive(&self) -> bool {
        self.is_expensive
    }
}

/// Squared L2-norm.
#[derive(Debug)]
pub struct EuclideanSq {
    pub is_expensive: bool,
}

impl<T: Number, U: Number> Metric<T, U> for EuclideanSq {
    fn name(&self) -> &str {
        "euclideansq"
    }

    fn one_to_one(&self, x: &[T], y: &[T]) -> U {
        let d: T = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum();
        U::from(d).unwrap()
    }

    fn is_expensive(&self) -> bool {
        self.is_expensive
    }
}

/// L1-norm.
#[derive(Debug)]
pub struct Manhattan {
    pub is_expensive: bool,
}

impl<T: Number, U: Number> Metric<T, U> for Manhattan {
    fn name(&self) -> &str {
        "manhattan"
    }

    fn one_to_one(&self, x: &[T], y: &[T]) -> U {
        let d: T = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| if a > b { a - b } else { b - a })
            .sum();
        U::from(d).unwrap()
    }

    fn is_expensive(&self) -> bool {
        self.is_expensive
    }
}

/// 1 - cosine-similarity.
#[derive(Debug)]
pub struct Cosine {
    pub is_expensive: bool,
}

impl<T: Number, U: Number> Metric<T, U> for Cosine {
    fn name(&self) -> &str {
        "cosine"
    }

    fn one_to_one(&self, x: &[T], y: &[T]) -> U {
        let (xx, yy, xy) = x.iter().zip(y.iter()).fold(
            (T::zero(), T::zero(), T::zero()),
            |(xx, yy, xy), (&a, &b)| (xx + a * a, yy + b * b, xy + a * b),
        );

        if xx == T::zero() || yy == T::zero() || xy <= T::zero() {
            return U::one();
        }

        U::from(1. - xy.as_f64() / (xx * yy).as_f64().sqrt()).unwrap()
    }

    fn is_expensive(&self) -> bool {
        self.is_expensive
    }
}

/// Count of differences at each indexed feature. This is not normalized by the
/// number of features.
#[derive(Debug)]
pub struct Hamming {
    pub is_expensive: bool,
}

impl<T: Number, U: Number> Metric<T, U> for Hamming {
    fn name(&self) -> &str {
        "hamming"
    }

    fn one_to_one(&self, x: &[T], y: &[T]) -> U {
        let d = x.iter().zip(y.iter()).filter(|(&a, &b)| a != b).count();
        U::from(d).unwrap()
    }

    fn is_expensive(&self) -> bool {
        self.is_expensive
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    #[test]
    fn test_on_two() {
        let a = vec![1., 2., 3.];
        let b = vec![3., 3., 1.];

        let metric = super::metric_from_name("euclideansq", false).unwrap();
        assert!(approx_eq!(f64, metric.one_to_one(&a, &a), 0.));
        assert!(approx_eq!(f64, metric.one_to_one(&a, &b), 9.));

        let metric = super::metric_from_name("euclidean", false).unwrap();
        assert!(approx_eq!(f64, metric.one_to_one(&a, &a), 0.));
        assert!(approx_eq!(f64, metric.one_to_one(&a, &b), 3.));

        let metric = super::metric_from_name("manhattan", false).unwrap();
        assert!(approx_eq!(f64, metric.one_to_one(&a, &a), 0.));
        assert!(approx_eq!(f64, metric.one_to_one(&a, &b), 5.));

        assert!(super::metric_from_name::<f64, f64>("levenshtein", false).is_err());
    }
}
