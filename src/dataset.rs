//! Provides the `Dataset` trait and the `Tabular` struct implementing it.

use crate::number::Number;

/// A `Dataset` is an ordered, immutable collection of instances. Instances are
/// addressed by their index and the collection never grows or shrinks while a
/// manifold is being learned from it.
pub trait Dataset<'a, T: Number + 'a>: std::fmt::Debug + Send + Sync {
    /// A name for the dataset, used in log messages and persisted records.
    fn name(&self) -> String;

    /// The number of instances in the dataset.
    fn cardinality(&self) -> usize;

    /// The number of features of each instance.
    fn dimensionality(&self) -> usize;

    /// Returns the indexed instance.
    fn get(&self, index: usize) -> &[T];

    /// The indices of all instances, in order.
    fn indices(&self) -> Vec<usize> {
        (0..self.cardinality()).collect()
    }
}

/// A `Tabular` dataset is a borrowed table of instances, one row per instance.
pub struct Tabular<'a, T: Number> {
    data: &'a [Vec<T>],
    name: String,
}

impl<'a, T: Number> Tabular<'a, T> {
    pub fn new(data: &'a [Vec<T>], name: String) -> Self {
        Self { data, name }
    }
}

impl<'a, T: Number> std::fmt::Debug for Tabular<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Tabular Dataset")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality())
            .field("dimensionality", &self.dimensionality())
            .finish()
    }
}

impl<'a, T: Number> Dataset<'a, T> for Tabular<'a, T> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn cardinality(&self) -> usize {
        self.data.len()
    }

    fn dimensionality(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    fn get(&self, index: usize) -> &[T] {
        &self.data[index]
    }
}
