//! The `Cluster` is the heart of CLAM. A `Cluster` owns a subset of the
//! indices of a dataset along with cached geometric summaries of those
//! instances: a sample, a medoid, a radius and a local fractal dimension.
//!
//! `Cluster`s live in the arena owned by a `Tree` and refer to their children
//! by arena index. All cached properties are computed eagerly when a cluster
//! is created, so the later read-only phases (search, graph building,
//! traversals) never need to mutate a cluster.

use std::str::FromStr;

use bitvec::prelude::*;
use log::debug;
use rand::prelude::*;

use crate::constants::{BATCH_SIZE, SUB_SAMPLE_LIMIT};
use crate::helpers;
use crate::number::Number;
use crate::space::Space;

/// The name of a `Cluster` encodes its position in the tree.
///
/// A name is a string over the characters '0' and '1'. The root is named by
/// the empty string. When a cluster with name `p` is partitioned into `k`
/// children, child `i` is named `p + '0' + '1' * i`. The depth of a cluster
/// is therefore the number of '0's in its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterName(BitVec);

impl ClusterName {
    /// The name of the root cluster, i.e. the empty string.
    pub fn root() -> Self {
        Self(BitVec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The depth in the tree at which a cluster with this name exists.
    pub fn depth(&self) -> usize {
        self.0.count_zeros()
    }

    /// The name of the `i`-th child of a cluster with this name.
    pub fn child(&self, i: usize) -> Self {
        let mut bits = self.0.clone();
        bits.push(false);
        for _ in 0..i {
            bits.push(true);
        }
        Self(bits)
    }

    /// The names of all clusters on the path from the root to this one, both
    /// inclusive.
    ///
    /// Each proper ancestor name is the prefix of this name that ends just
    /// before a subsequent '0'.
    pub fn ancestry(&self) -> Vec<Self> {
        let mut names = vec![Self::root()];
        let zeros = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, b)| !**b)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        for d in 0..zeros.len() {
            let end = if d + 1 < zeros.len() { zeros[d + 1] } else { self.0.len() };
            names.push(Self(self.0[..end].to_bitvec()));
        }
        names
    }
}

impl std::fmt::Display for ClusterName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{}", if *b { '1' } else { '0' })?;
        }
        Ok(())
    }
}

impl FromStr for ClusterName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = BitVec::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => return Err(format!("invalid cluster name {s:?}: names are strings over '0' and '1'")),
            }
        }
        Ok(Self(bits))
    }
}

/// A `Cluster` represents a collection of "similar" instances from a metric
/// space.
///
/// Clusters are created by `Tree` during partitioning and are never mutated
/// afterwards, except to link in their children and to receive their
/// candidate-neighbor set.
#[derive(Debug)]
pub struct Cluster<U: Number> {
    name: ClusterName,
    argpoints: Vec<usize>,
    children: Option<Vec<usize>>,
    argsamples: Vec<usize>,
    argmedoid: usize,
    argradius: usize,
    radius: U,
    lfd: f64,
    candidates: Option<Vec<(usize, U)>>,
}

impl<U: Number> Cluster<U> {
    /// Creates a new `Cluster` and eagerly computes its cached properties.
    ///
    /// # Arguments
    ///
    /// * `space`: the metric space the cluster lives in.
    /// * `name`: the name of the cluster, encoding its position in the tree.
    /// * `argpoints`: the (nonempty) indices of the instances in the cluster.
    /// * `seed`: seed for subsampling, for deterministic reproduction.
    pub(crate) fn new<'a, T: Number>(
        space: &dyn Space<'a, T, U>,
        name: ClusterName,
        argpoints: Vec<usize>,
        seed: Option<u64>,
    ) -> Self {
        assert!(!argpoints.is_empty(), "a cluster may not own zero instances");
        debug!("building cluster {} with {} instances", name, argpoints.len());

        let n = if argpoints.len() <= SUB_SAMPLE_LIMIT {
            argpoints.len()
        } else {
            (argpoints.len() as f64).sqrt() as usize
        };
        let mut argsamples = if n == argpoints.len() {
            argpoints.clone()
        } else {
            let mut samples = argpoints.clone();
            let mut rng = seed.map_or_else(
                rand_chacha::ChaCha8Rng::from_entropy,
                rand_chacha::ChaCha8Rng::seed_from_u64,
            );
            samples.shuffle(&mut rng);
            samples.truncate(n);
            samples
        };

        // A sample whose pairwise distances are all zero may still have missed
        // distinct instances. Re-choose by uniqueness so that `argsamples` is
        // a singleton only when the cluster is all duplicates.
        let mut sample_distances = space.pairwise(&argsamples);
        if max_of(&sample_distances) == U::zero() {
            argsamples = space.choose_unique(n, &argpoints, seed);
            sample_distances = space.pairwise(&argsamples);
        }

        let argmedoid = {
            let row_sums = sample_distances
                .iter()
                .map(|row| row.iter().cloned().sum::<U>())
                .collect::<Vec<_>>();
            argsamples[helpers::arg_min(&row_sums).0]
        };

        let (mut argradius, mut radius) = (argmedoid, U::zero());
        for batch in argpoints.chunks(BATCH_SIZE) {
            let distances = space.one_to_many(argmedoid, batch);
            let (i, d) = helpers::arg_max(&distances);
            if d > radius {
                (argradius, radius) = (batch[i], d);
            }
        }

        let lfd = if argsamples.len() == 1 {
            0.
        } else {
            let half_radius = radius.as_f64() / 2.;
            let half_count = argpoints
                .chunks(BATCH_SIZE)
                .flat_map(|batch| space.one_to_many(argmedoid, batch))
                .filter(|d| d.as_f64() <= half_radius)
                .count();
            if half_count == 0 {
                0.
            } else {
                (argpoints.len() as f64 / half_count as f64).log2()
            }
        };

        Self {
            name,
            argpoints,
            children: None,
            argsamples,
            argmedoid,
            argradius,
            radius,
            lfd,
            candidates: None,
        }
    }

    /// Reassembles a `Cluster` from previously computed parts, e.g. when
    /// loading a manifold from disk.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: ClusterName,
        argpoints: Vec<usize>,
        children: Option<Vec<usize>>,
        argsamples: Vec<usize>,
        argmedoid: usize,
        argradius: usize,
        radius: U,
        lfd: f64,
    ) -> Self {
        Self {
            name,
            argpoints,
            children,
            argsamples,
            argmedoid,
            argradius,
            radius,
            lfd,
            candidates: None,
        }
    }

    pub fn name(&self) -> &ClusterName {
        &self.name
    }

    /// The depth in the tree at which the cluster exists.
    pub fn depth(&self) -> usize {
        self.name.depth()
    }

    /// The number of instances in this `Cluster`.
    pub fn cardinality(&self) -> usize {
        self.argpoints.len()
    }

    /// The indices of the instances contained in this `Cluster`.
    pub fn argpoints(&self) -> &[usize] {
        &self.argpoints
    }

    /// Indices of the samples used for finding poles and the medoid.
    ///
    /// There are at least 2 distinct samples unless the cluster contains only
    /// duplicates, in which case there is exactly 1.
    pub fn argsamples(&self) -> &[usize] {
        &self.argsamples
    }

    pub fn nsamples(&self) -> usize {
        self.argsamples.len()
    }

    /// The index of the instance at the geometric median of the cluster's
    /// samples. For clusters with a large `cardinality`, this is an
    /// approximation.
    pub fn argmedoid(&self) -> usize {
        self.argmedoid
    }

    /// The index of the instance that is farthest from the medoid.
    pub fn argradius(&self) -> usize {
        self.argradius
    }

    /// The distance from the medoid to the instance farthest from it.
    pub fn radius(&self) -> U {
        self.radius
    }

    /// The local fractal dimension of the `Cluster` at the length scales of
    /// the `radius` and half that `radius`. Zero when undefined, i.e. when the
    /// cluster contains only duplicates or no instance falls within half the
    /// radius.
    pub fn local_fractal_dimension(&self) -> f64 {
        self.lfd
    }

    /// Whether the `Cluster` contains only one instance or only identical
    /// instances.
    pub fn is_singleton(&self) -> bool {
        self.nsamples() == 1
    }

    /// The arena indices of this cluster's children. `None` if the cluster has
    /// not been through partitioning yet.
    pub fn children(&self) -> Option<&[usize]> {
        self.children.as_deref()
    }

    /// Whether this cluster has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.as_ref().map_or(true, |c| c.is_empty())
    }

    pub(crate) fn set_children(&mut self, children: Vec<usize>) {
        self.children = Some(children);
    }

    /// The candidate neighbors of this cluster and the distances to them, or
    /// `None` if candidates have not been propagated to this cluster yet.
    ///
    /// Candidates `(x, d)` satisfy `x.depth <= self.depth` and
    /// `d <= x.radius + r * 4` where `r` is an ancestor radius; any cluster
    /// whose volume could overlap this one's is reachable through them.
    pub fn candidates(&self) -> Option<&[(usize, U)]> {
        self.candidates.as_deref()
    }

    pub(crate) fn set_candidates(&mut self, candidates: Vec<(usize, U)>) {
        self.candidates = Some(candidates);
    }

    /// Checks if the query ball could share any instance with this cluster.
    pub fn overlaps<'a, T: Number>(&self, space: &dyn Space<'a, T, U>, query: &[T], radius: U) -> bool {
        space.query_to_one(query, self.argmedoid) <= radius + self.radius
    }

    /// Splits the cluster's instances into buckets around two poles, the
    /// approximately farthest pair of instances in the cluster.
    ///
    /// Returns `None` when the cluster contains fewer than 2 distinct
    /// instances. Otherwise, each instance lands in the bucket of the nearer
    /// pole (ties go to the first pole) and the buckets are returned sorted by
    /// ascending size. The caller is responsible for having checked any
    /// partition criteria.
    pub(crate) fn split_argpoints<'a, T: Number>(
        &self,
        space: &dyn Space<'a, T, U>,
    ) -> Option<Vec<Vec<usize>>> {
        if self.nsamples() < 2 {
            return None;
        }

        let poles = if self.nsamples() > 2 {
            let distances = space.one_to_many(self.argradius, &self.argsamples);
            let farthest = self.argsamples[helpers::arg_max(&distances).0];
            vec![self.argradius, farthest]
        } else {
            self.argsamples.clone()
        };
        debug_assert_ne!(poles[0], poles[1], "poles cannot be duplicate instances");

        let mut buckets = poles.iter().map(|&p| vec![p]).collect::<Vec<_>>();
        for batch in self.argpoints.chunks(BATCH_SIZE) {
            let batch = batch
                .iter()
                .copied()
                .filter(|p| !poles.contains(p))
                .collect::<Vec<_>>();
            if batch.is_empty() {
                continue;
            }
            let distances = space.many_to_many(&batch, &poles);
            for (&p, row) in batch.iter().zip(distances.iter()) {
                buckets[helpers::arg_min(row).0].push(p);
            }
        }

        buckets.sort_by_key(Vec::len);
        Some(buckets)
    }
}

impl<U: Number> std::fmt::Display for Cluster<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn max_of<U: Number>(distances: &[Vec<U>]) -> U {
    distances
        .iter()
        .flat_map(|row| row.iter())
        .fold(U::zero(), |max, &d| if d > max { d } else { max })
}
