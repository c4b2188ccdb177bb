//! A `Tree` is the divisive hierarchical clustering of a dataset: the arena
//! of `Cluster`s produced by repeatedly partitioning the root.
//!
//! Clusters refer to each other by arena index, so graphs and search results
//! can hold cluster handles without owning the clusters themselves.

use std::collections::{BTreeMap, BTreeSet};

use log::info;
use rayon::prelude::*;

use crate::core::cluster::{Cluster, ClusterName};
use crate::core::criteria::PartitionCriteria;
use crate::number::Number;
use crate::space::Space;

/// A `Tree` owns the `Cluster` arena. The root is always at index 0.
///
/// Trees are built layer by layer: every cluster at the current frontier is
/// partitioned concurrently, and the resulting children are linked into the
/// arena sequentially. A cluster's state is written only by the task that
/// partitions it, so the parallel region is free of shared writes.
#[derive(Debug)]
pub struct Tree<U: Number> {
    clusters: Vec<Cluster<U>>,
    seed: Option<u64>,
}

impl<U: Number> Tree<U> {
    /// Creates a new `Tree` with an unpartitioned root covering the whole
    /// dataset of the given space.
    pub fn new<'a, T: Number>(space: &dyn Space<'a, T, U>, seed: Option<u64>) -> Self {
        let root = Cluster::new(space, ClusterName::root(), space.data().indices(), seed);
        Self {
            clusters: vec![root],
            seed,
        }
    }

    pub(crate) fn from_clusters(clusters: Vec<Cluster<U>>) -> Self {
        Self { clusters, seed: None }
    }

    /// A reference to the root `Cluster` of the tree.
    pub fn root(&self) -> &Cluster<U> {
        &self.clusters[0]
    }

    /// A reference to the indexed `Cluster`.
    pub fn get(&self, index: usize) -> &Cluster<U> {
        &self.clusters[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut Cluster<U> {
        &mut self.clusters[index]
    }

    /// The number of `Cluster`s in the tree.
    pub fn cardinality(&self) -> usize {
        self.clusters.len()
    }

    /// Iterates over `(index, cluster)` pairs in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Cluster<U>)> {
        self.clusters.iter().enumerate()
    }

    /// The depth of the deepest `Cluster` in the tree.
    pub fn depth(&self) -> usize {
        self.clusters.iter().map(Cluster::depth).max().unwrap_or(0)
    }

    /// Builds the tree by partitioning every frontier cluster, layer by
    /// layer, until no cluster splits any further. Returns the layer stack;
    /// layer `d` holds the indices of the clusters that form the tree cut at
    /// depth `d`.
    ///
    /// Each layer either grows the cluster count or ends the loop, so this
    /// terminates after at most `N` iterations.
    pub fn build<'a, T: Number>(
        &mut self,
        space: &dyn Space<'a, T, U>,
        criteria: &PartitionCriteria<U>,
    ) -> Vec<Vec<usize>> {
        let mut layers = vec![vec![0]];
        loop {
            let depth = layers.len() - 1;
            info!("depth: {}, {} clusters", depth, layers[depth].len());
            let (next, grew) = self.partition_layer(space, criteria, &layers[depth], depth);
            if grew {
                layers.push(next);
            } else {
                break;
            }
        }
        layers
    }

    /// Partitions, in parallel, every cluster of `layer` that sits at the
    /// frontier `depth`. Returns the next layer and whether any cluster was
    /// split.
    fn partition_layer<'a, T: Number>(
        &mut self,
        space: &dyn Space<'a, T, U>,
        criteria: &PartitionCriteria<U>,
        layer: &[usize],
        depth: usize,
    ) -> (Vec<usize>, bool) {
        let (frontier, shallower): (Vec<usize>, Vec<usize>) = layer
            .iter()
            .copied()
            .partition(|&i| self.clusters[i].depth() == depth);

        let split = {
            let clusters = &self.clusters;
            let seed = self.seed;
            frontier
                .par_iter()
                .map(|&i| {
                    let cluster = &clusters[i];
                    let children = if criteria.check(cluster) {
                        cluster.split_argpoints(space).map(|buckets| {
                            buckets
                                .into_iter()
                                .enumerate()
                                .map(|(k, argpoints)| {
                                    Cluster::new(space, cluster.name().child(k), argpoints, seed)
                                })
                                .collect::<Vec<_>>()
                        })
                    } else {
                        None
                    };
                    (i, children)
                })
                .collect::<Vec<_>>()
        };

        let mut next = shallower;
        let mut grew = false;
        for (i, children) in split {
            match children {
                Some(children) => {
                    grew = true;
                    let ids = children
                        .into_iter()
                        .map(|child| {
                            self.clusters.push(child);
                            self.clusters.len() - 1
                        })
                        .collect::<Vec<_>>();
                    next.extend(ids.iter().copied());
                    self.clusters[i].set_children(ids);
                }
                None => {
                    self.clusters[i].set_children(Vec::new());
                    next.push(i);
                }
            }
        }
        (next, grew)
    }

    /// Reconstructs the layer stack of an already-built tree by iterated
    /// child-expansion from the root.
    pub(crate) fn layers(&self) -> Vec<Vec<usize>> {
        let mut layers = vec![vec![0]];
        loop {
            let last = &layers[layers.len() - 1];
            if last.iter().all(|&c| self.clusters[c].is_leaf()) {
                break;
            }
            let next = last
                .iter()
                .flat_map(|&c| {
                    if self.clusters[c].is_leaf() {
                        vec![c]
                    } else {
                        self.clusters[c].children().map(<[usize]>::to_vec).unwrap_or_default()
                    }
                })
                .collect();
            layers.push(next);
        }
        layers
    }

    /// The sequence of clusters on the path from the root to the named
    /// cluster, both inclusive.
    ///
    /// Errors when the name does not materialize in this tree.
    pub fn ancestry(&self, name: &ClusterName) -> Result<Vec<usize>, String> {
        if name.depth() > self.depth() {
            return Err(format!(
                "depth of the requested cluster must not be greater than the depth of the tree. Got {:?} with max-depth {}",
                name.to_string(),
                self.depth(),
            ));
        }

        let mut lineage = vec![0];
        for ancestor in name.ancestry().into_iter().skip(1) {
            let tail = lineage[lineage.len() - 1];
            let child = self.clusters[tail]
                .children()
                .and_then(|children| children.iter().copied().find(|&c| *self.clusters[c].name() == ancestor));
            match child {
                Some(c) => lineage.push(c),
                None => break,
            }
        }

        let tail = lineage[lineage.len() - 1];
        if self.clusters[tail].name() == name {
            Ok(lineage)
        } else {
            Err(format!(
                "wanted cluster {:?} but the lineage ended at {:?}",
                name.to_string(),
                self.clusters[tail].name().to_string(),
            ))
        }
    }

    /// The index of the cluster with the given name.
    pub fn select(&self, name: &ClusterName) -> Result<usize, String> {
        self.ancestry(name).map(|lineage| lineage[lineage.len() - 1])
    }

    /// Fills the candidate-neighbor sets of every cluster on the path from
    /// the root down to `cluster`, skipping those already populated.
    ///
    /// A node's candidate pool is its parent's candidates plus their children
    /// at the parent's depth; a pool member `x` is kept iff
    /// `d(node.medoid, x.medoid) <= x.radius + r * 4`, where `r` is the most
    /// recent positive radius on the path so far. This keeps every cluster
    /// whose volume could overlap the node's reachable from its candidates.
    pub(crate) fn find_candidates<'a, T: Number>(
        &mut self,
        space: &dyn Space<'a, T, U>,
        cluster: usize,
    ) -> Result<(), String> {
        let name = self.clusters[cluster].name().clone();
        let lineage = self.ancestry(&name)?;

        if self.clusters[0].candidates().is_none() {
            self.clusters[0].set_candidates(vec![(0, U::zero())]);
        }

        let mut radius = self.clusters[0].radius();
        for depth in 0..name.depth() {
            let node = lineage[depth + 1];
            if self.clusters[node].radius() > U::zero() {
                radius = self.clusters[node].radius();
            }

            // Candidates are computed once per cluster and are final after.
            if self.clusters[node].candidates().is_some() {
                continue;
            }

            let parent_candidates = self.clusters[lineage[depth]]
                .candidates()
                .unwrap_or_else(|| unreachable!("ancestor candidates are filled top-down"))
                .iter()
                .map(|&(c, _)| c)
                .collect::<Vec<_>>();

            let mut pool = parent_candidates.iter().copied().collect::<BTreeSet<_>>();
            for &c in parent_candidates.iter() {
                if self.clusters[c].depth() == depth {
                    if let Some(children) = self.clusters[c].children() {
                        pool.extend(children.iter().copied());
                    }
                }
            }
            let pool = pool.into_iter().collect::<Vec<_>>();

            let candidates = if pool.is_empty() {
                Vec::new()
            } else {
                let margin = U::from(4).unwrap() * radius;
                let medoids = pool.iter().map(|&c| self.clusters[c].argmedoid()).collect::<Vec<_>>();
                let distances = space.one_to_many(self.clusters[node].argmedoid(), &medoids);
                pool.into_iter()
                    .zip(distances.into_iter())
                    .filter(|&(c, d)| d <= self.clusters[c].radius() + margin)
                    .collect()
            };
            self.clusters[node].set_candidates(candidates);
        }
        Ok(())
    }

    /// Searches down the tree for clusters at the target depth, or leaves
    /// above it, that overlap the query ball.
    ///
    /// A `depth` of `None` searches to the full depth of the tree. Errors when
    /// the target depth is shallower than the starting cluster.
    pub fn tree_search<'a, T: Number>(
        &self,
        space: &dyn Space<'a, T, U>,
        start: usize,
        query: &[T],
        radius: U,
        depth: Option<usize>,
    ) -> Result<BTreeMap<usize, U>, String> {
        let depth = depth.unwrap_or_else(|| self.depth());
        let cluster = &self.clusters[start];
        if depth < cluster.depth() {
            return Err(format!(
                "search depth ({depth}) must not be less than the depth ({}) of the starting cluster",
                cluster.depth(),
            ));
        }

        let distance = space.query_to_one(query, cluster.argmedoid());
        let mut results = BTreeMap::new();
        if distance > radius + cluster.radius() {
            return Ok(results);
        }
        if cluster.depth() == depth {
            results.insert(start, distance);
            return Ok(results);
        }

        // results and candidates only ever hold clusters that overlap the
        // query ball.
        let mut candidates = BTreeMap::from([(start, distance)]);
        for _ in cluster.depth()..depth {
            let (leaves, parents): (BTreeMap<usize, U>, BTreeMap<usize, U>) = candidates
                .into_iter()
                .partition(|&(c, _)| self.clusters[c].is_leaf());
            results.extend(leaves);

            let children = parents
                .keys()
                .flat_map(|&c| self.clusters[c].children().unwrap_or(&[]).iter().copied())
                .collect::<Vec<_>>();
            if children.is_empty() {
                candidates = BTreeMap::new();
                break;
            }

            let medoids = children.iter().map(|&c| self.clusters[c].argmedoid()).collect::<Vec<_>>();
            let distances = space.query_to_many(query, &medoids);
            candidates = children
                .into_iter()
                .zip(distances.into_iter())
                .filter(|&(c, d)| d <= radius + self.clusters[c].radius())
                .collect();
            if candidates.is_empty() {
                break;
            }
        }

        results.extend(candidates);
        debug_assert!(results.keys().all(|&c| self.clusters[c].depth() <= depth));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::core::cluster::ClusterName;
    use crate::core::criteria::PartitionCriteria;
    use crate::dataset::Tabular;
    use crate::metric::metric_from_name;
    use crate::space::TabularSpace;

    use super::Tree;

    fn line_data() -> Vec<Vec<f64>> {
        vec![vec![0., 0.], vec![1., 0.], vec![2., 0.], vec![3., 0.], vec![4., 0.]]
    }

    #[test]
    fn test_build_and_ancestry() {
        let data = line_data();
        let dataset = Tabular::new(&data, "test_ancestry".to_string());
        let metric = metric_from_name::<f64, f64>("euclidean", false).unwrap();
        let space = TabularSpace::new(&dataset, metric.as_ref(), false);

        let mut tree = Tree::new(&space, None);
        let layers = tree.build(&space, &PartitionCriteria::new(true));

        assert_eq!(layers[0], vec![0]);
        assert_eq!(tree.depth(), 3);
        assert_eq!(layers.len(), 4);

        // every cluster's lineage starts at the root and ends at itself
        for (i, cluster) in tree.iter() {
            let lineage = tree.ancestry(cluster.name()).unwrap();
            assert_eq!(lineage[0], 0);
            assert_eq!(lineage[lineage.len() - 1], i);
            assert_eq!(tree.select(cluster.name()).unwrap(), i);
        }

        // children partition their parent's argpoints
        for (_, cluster) in tree.iter() {
            if let Some(children) = cluster.children() {
                if children.is_empty() {
                    continue;
                }
                let mut union = children
                    .iter()
                    .flat_map(|&c| tree.get(c).argpoints().to_vec())
                    .collect::<Vec<_>>();
                union.sort_unstable();
                let mut expected = cluster.argpoints().to_vec();
                expected.sort_unstable();
                assert_eq!(union, expected);
            }
        }

        let missing = ClusterName::from_str("011").unwrap();
        assert!(tree.ancestry(&missing).is_err());
    }

    #[test]
    fn test_tree_search() {
        let data = line_data();
        let dataset = Tabular::new(&data, "test_tree_search".to_string());
        let metric = metric_from_name::<f64, f64>("euclidean", false).unwrap();
        let space = TabularSpace::new(&dataset, metric.as_ref(), false);

        let mut tree = Tree::new(&space, None);
        tree.build(&space, &PartitionCriteria::new(true));

        let query = vec![0., 0.];
        let results = tree.tree_search(&space, 0, &query, 0.5, None).unwrap();
        let hits = results
            .keys()
            .flat_map(|&c| tree.get(c).argpoints().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(hits, vec![0]);

        // a depth shallower than the starting cluster is an error
        let leaf = (0..tree.cardinality()).find(|&c| tree.get(c).depth() == 2).unwrap();
        assert!(tree.tree_search(&space, leaf, &query, 0.5, Some(1)).is_err());

        // searching at depth 0 returns the root when the balls overlap
        let results = tree.tree_search(&space, 0, &query, 0.5, Some(0)).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&0));
    }
}
