//! Criteria used to shape a `Manifold`.
//!
//! There are three kinds, and `Manifold::build` tells them apart by the
//! `Criterion` tag:
//! * partition criteria decide whether a `Cluster` may be split further,
//! * at most one selection criterion picks the clusters of the optimal graph,
//! * graph criteria run after the graph is built and may mutate it.

use crate::core::cluster::Cluster;
use crate::core::manifold::Manifold;
use crate::core::tree::Tree;
use crate::number::Number;

/// A predicate over a `Cluster`, consulted before partitioning it.
pub trait PartitionCriterion<U: Number>: std::fmt::Debug + Send + Sync {
    fn check(&self, cluster: &Cluster<U>) -> bool;
}

/// The combination of all partition criteria for one tree build.
///
/// A cluster containing fewer than two distinct instances never passes,
/// regardless of the criteria.
#[derive(Debug)]
pub struct PartitionCriteria<U: Number> {
    criteria: Vec<Box<dyn PartitionCriterion<U>>>,
    check_all: bool,
}

impl<U: Number> PartitionCriteria<U> {
    pub fn new(check_all: bool) -> Self {
        Self {
            criteria: Vec::new(),
            check_all,
        }
    }

    pub fn with_max_depth(mut self, threshold: usize) -> Self {
        self.criteria.push(Box::new(MaxDepth(threshold)));
        self
    }

    pub fn with_min_cardinality(mut self, threshold: usize) -> Self {
        self.criteria.push(Box::new(MinCardinality(threshold)));
        self
    }

    pub fn with_min_radius(mut self, threshold: U) -> Self {
        self.criteria.push(Box::new(MinRadius(threshold)));
        self
    }

    pub fn with_custom(mut self, c: Box<dyn PartitionCriterion<U>>) -> Self {
        self.criteria.push(c);
        self
    }

    pub fn check(&self, cluster: &Cluster<U>) -> bool {
        !cluster.is_singleton()
            && if self.check_all {
                self.criteria.iter().all(|c| c.check(cluster))
            } else {
                self.criteria.iter().any(|c| c.check(cluster))
            }
    }
}

#[derive(Debug, Clone)]
struct MaxDepth(usize);

impl<U: Number> PartitionCriterion<U> for MaxDepth {
    fn check(&self, c: &Cluster<U>) -> bool {
        c.depth() < self.0
    }
}

#[derive(Debug, Clone)]
struct MinCardinality(usize);

impl<U: Number> PartitionCriterion<U> for MinCardinality {
    fn check(&self, c: &Cluster<U>) -> bool {
        c.cardinality() > self.0
    }
}

#[derive(Debug, Clone)]
struct MinRadius<U: Number>(U);

impl<U: Number> PartitionCriterion<U> for MinRadius<U> {
    fn check(&self, c: &Cluster<U>) -> bool {
        c.radius() > self.0
    }
}

/// Picks the clusters that will form the optimal `Graph`.
pub trait SelectionCriterion<U: Number>: std::fmt::Debug {
    fn select(&self, tree: &Tree<U>) -> Vec<usize>;
}

/// Selects the tree cut at the given depth: the clusters at that depth plus
/// any leaves that sit above it.
#[derive(Debug, Clone)]
pub struct LayerDepth(pub usize);

impl<U: Number> SelectionCriterion<U> for LayerDepth {
    fn select(&self, tree: &Tree<U>) -> Vec<usize> {
        tree.iter()
            .filter(|(_, c)| c.depth() == self.0 || (c.is_leaf() && c.depth() < self.0))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Selects every leaf of the tree.
#[derive(Debug, Clone)]
pub struct Leaves;

impl<U: Number> SelectionCriterion<U> for Leaves {
    fn select(&self, tree: &Tree<U>) -> Vec<usize> {
        tree.iter().filter(|(_, c)| c.is_leaf()).map(|(i, _)| i).collect()
    }
}

/// A hook that runs after the optimal graph is built and may mutate it,
/// typically through `Manifold::replace_graph_clusters`.
pub trait GraphCriterion<T: Number, U: Number>: std::fmt::Debug {
    fn apply(&self, manifold: &mut Manifold<T, U>) -> Result<(), String>;
}

/// A criterion for `Manifold::build`, tagged by kind so the builder can
/// partition its input.
#[derive(Debug)]
pub enum Criterion<T: Number, U: Number> {
    Partition(Box<dyn PartitionCriterion<U>>),
    Selection(Box<dyn SelectionCriterion<U>>),
    Graph(Box<dyn GraphCriterion<T, U>>),
}

impl<T: Number, U: Number> Criterion<T, U> {
    /// Partition clusters only above the given depth.
    pub fn max_depth(threshold: usize) -> Self {
        Self::Partition(Box::new(MaxDepth(threshold)))
    }

    /// Partition clusters only with more than the given number of instances.
    pub fn min_cardinality(threshold: usize) -> Self {
        Self::Partition(Box::new(MinCardinality(threshold)))
    }

    /// Partition clusters only with a radius above the given threshold.
    pub fn min_radius(threshold: U) -> Self {
        Self::Partition(Box::new(MinRadius(threshold)))
    }

    /// Build the graph from the tree cut at the given depth.
    pub fn layer_depth(depth: usize) -> Self {
        Self::Selection(Box::new(LayerDepth(depth)))
    }

    /// Build the graph from the leaves of the tree.
    pub fn leaves() -> Self {
        Self::Selection(Box::new(Leaves))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::tree::Tree;
    use crate::dataset::Tabular;
    use crate::metric::metric_from_name;
    use crate::space::TabularSpace;

    use super::PartitionCriteria;

    #[test]
    fn test_partition_criteria() {
        let data = (0..16).map(|i| vec![i as f64, 0.]).collect::<Vec<_>>();
        let dataset = Tabular::new(&data, "test_criteria".to_string());
        let metric = metric_from_name::<f64, f64>("euclidean", false).unwrap();
        let space = TabularSpace::new(&dataset, metric.as_ref(), false);

        let mut tree = Tree::new(&space, None);
        let layers = tree.build(&space, &PartitionCriteria::new(true).with_max_depth(2));
        assert_eq!(layers.len(), 3);
        assert!(tree.iter().all(|(_, c)| c.depth() <= 2));

        let mut tree = Tree::new(&space, None);
        tree.build(&space, &PartitionCriteria::new(true).with_min_cardinality(4));
        assert!(tree.iter().all(|(_, c)| !c.is_leaf() || c.cardinality() <= 4));
    }
}
