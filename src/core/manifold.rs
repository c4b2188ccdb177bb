//! The `Manifold` organizes the underlying `Cluster`s and `Graph`s.
//!
//! It builds the cluster tree and the graph stack from a metric space and a
//! set of criteria, and with those provides rho-nearest-neighbor search,
//! k-nearest-neighbor search, random walks, and persistence to disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::{BATCH_SIZE, MIN_KNN_RADIUS};
use crate::core::cluster::{Cluster, ClusterName};
use crate::core::criteria::{Criterion, GraphCriterion, PartitionCriteria, SelectionCriterion};
use crate::core::graph::Graph;
use crate::core::tree::Tree;
use crate::helpers;
use crate::number::Number;
use crate::space::Space;

/// A `Manifold` owns the cluster tree and the graphs learned from a metric
/// space.
///
/// `layers` holds one graph per tree layer; `graph` is the optimal graph over
/// the clusters picked by the selection criterion. The clusters themselves
/// live in the tree's arena, and the graphs address them by index.
#[derive(Debug)]
pub struct Manifold<'a, T: Number, U: Number> {
    space: &'a dyn Space<'a, T, U>,
    tree: Tree<U>,
    layers: Vec<Graph<U>>,
    graph: Graph<U>,
    seed: Option<u64>,
}

impl<'a, T: Number, U: Number> Manifold<'a, T, U> {
    /// Creates a new `Manifold` over the given space, with an unpartitioned
    /// root as its only cluster. Call `build` to learn the tree and graphs.
    pub fn new(space: &'a dyn Space<'a, T, U>, seed: Option<u64>) -> Self {
        Self {
            space,
            tree: Tree::new(space, seed),
            layers: vec![Graph::new([0])],
            graph: Graph::new([0]),
            seed,
        }
    }

    pub fn space(&self) -> &dyn Space<'a, T, U> {
        self.space
    }

    pub fn tree(&self) -> &Tree<U> {
        &self.tree
    }

    /// The graphs over the tree cuts at each depth, in depth order.
    pub fn layers(&self) -> &[Graph<U>] {
        &self.layers
    }

    /// The optimal graph, as picked by the selection criterion.
    pub fn graph(&self) -> &Graph<U> {
        &self.graph
    }

    /// The depth of the deepest cluster in the tree.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// The number of instances the manifold was learned from.
    pub fn cardinality(&self) -> usize {
        self.space.data().cardinality()
    }

    /// Rebuilds the cluster tree and the graph stack.
    ///
    /// The criteria are partitioned by kind: partition criteria gate the tree
    /// build, the (at most one) selection criterion picks the clusters of the
    /// optimal graph, and graph criteria run in order after the graph's edges
    /// are built.
    pub fn build(mut self, criteria: Vec<Criterion<T, U>>) -> Result<Self, String> {
        let mut partition_criteria = PartitionCriteria::new(true);
        let mut selection: Option<Box<dyn SelectionCriterion<U>>> = None;
        let mut graph_criteria: Vec<Box<dyn GraphCriterion<T, U>>> = Vec::new();
        for criterion in criteria {
            match criterion {
                Criterion::Partition(c) => partition_criteria = partition_criteria.with_custom(c),
                Criterion::Selection(c) => {
                    if selection.is_some() {
                        return Err("cannot have more than one selection criterion".to_string());
                    }
                    selection = Some(c);
                }
                Criterion::Graph(c) => graph_criteria.push(c),
            }
        }

        self.tree = Tree::new(self.space, self.seed);
        let layers = self.tree.build(self.space, &partition_criteria);
        self.layers = layers.into_iter().map(Graph::new).collect();

        let selected = match selection {
            Some(criterion) => criterion.select(&self.tree),
            None => {
                warn!("no selection criterion was provided. Using the deepest layer for the graph");
                self.layers[self.layers.len() - 1].clusters().collect()
            }
        };
        if !selected.is_empty() {
            let (min_depth, max_depth) = selected.iter().fold((usize::MAX, 0), |(lo, hi), &c| {
                let d = self.tree.get(c).depth();
                (lo.min(d), hi.max(d))
            });
            info!(
                "building graph with {} clusters at depths ({min_depth}, {max_depth})",
                selected.len(),
            );
        }
        self.graph = Graph::new(selected);

        self.tree.get_mut(0).set_candidates(vec![(0, U::zero())]);
        {
            let Self { space, tree, graph, .. } = &mut self;
            graph.build_edges(tree, *space)?;
        }

        for criterion in graph_criteria {
            criterion.apply(&mut self)?;
        }
        Ok(self)
    }

    /// Replaces clusters of the optimal graph, rebuilding its edges. This is
    /// the mutation path for graph criteria.
    pub fn replace_graph_clusters(
        &mut self,
        removals: &BTreeSet<usize>,
        additions: &BTreeSet<usize>,
    ) -> Result<(), String> {
        let Self { space, tree, graph, .. } = self;
        graph.replace_clusters(removals, additions, tree, *space, true)
    }

    /// The clusters on the path from the root to the named cluster, both
    /// inclusive.
    pub fn ancestry(&self, name: &str) -> Result<Vec<&Cluster<U>>, String> {
        let name = ClusterName::from_str(name)?;
        let lineage = self.tree.ancestry(&name)?;
        Ok(lineage.into_iter().map(|c| self.tree.get(c)).collect())
    }

    /// The cluster with the given name.
    pub fn select(&self, name: &str) -> Result<&Cluster<U>, String> {
        let name = ClusterName::from_str(name)?;
        self.tree.select(&name).map(|c| self.tree.get(c))
    }

    /// All clusters, at or above the given depth, that contain instances
    /// within `radius` of the query. A `depth` of `None` searches the full
    /// tree.
    pub fn find_clusters(
        &self,
        query: &[T],
        radius: U,
        depth: Option<usize>,
    ) -> Result<BTreeMap<usize, U>, String> {
        self.tree.tree_search(self.space, 0, query, radius, depth)
    }

    /// The indices of, and distances to, every instance within `radius` of
    /// the query, sorted by ascending distance.
    pub fn find_points(&self, query: &[T], radius: U) -> Result<Vec<(usize, U)>, String> {
        let clusters = self.find_clusters(query, radius, None)?;
        let candidates = clusters
            .keys()
            .flat_map(|&c| self.tree.get(c).argpoints().iter().copied())
            .collect::<Vec<_>>();

        let mut results = BTreeMap::new();
        for batch in candidates.chunks(BATCH_SIZE) {
            let distances = self.space.query_to_many(query, batch);
            results.extend(
                batch
                    .iter()
                    .copied()
                    .zip(distances.into_iter())
                    .filter(|&(_, d)| d <= radius),
            );
        }

        let mut results = results.into_iter().collect::<Vec<_>>();
        results.sort_by(|&(i, a), &(j, b)| {
            a.partial_cmp(&b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(i.cmp(&j))
        });
        Ok(results)
    }

    /// The `min(k, N)` nearest neighbors of the query, sorted by ascending
    /// distance.
    ///
    /// Starts from the mean radius of the deepest layer and doubles the
    /// search radius until at least `k` instances are in range.
    pub fn find_knn(&self, query: &[T], k: usize) -> Result<Vec<(usize, U)>, String> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let k = k.min(self.cardinality());

        let leaf_radii = self.layers[self.layers.len() - 1]
            .clusters()
            .map(|c| self.tree.get(c).radius())
            .collect::<Vec<_>>();
        let mut radius = helpers::mean(&leaf_radii).max(MIN_KNN_RADIUS);

        let mut results = self.find_points(query, U::from_f64(radius))?;
        while results.len() < k {
            radius *= 2.;
            results = self.find_points(query, U::from_f64(radius))?;
        }
        results.truncate(k);
        Ok(results)
    }

    /// Random walks over the optimal graph, started at the named clusters.
    /// Returns the visit counts per cluster index.
    pub fn random_walks(
        &self,
        starts: &[&str],
        steps: usize,
    ) -> Result<BTreeMap<usize, usize>, String> {
        let mut start_indices = Vec::with_capacity(starts.len());
        for name in starts {
            let name = ClusterName::from_str(name)?;
            start_indices.push(self.tree.select(&name)?);
        }
        self.graph.random_walks(&start_indices, steps, self.seed)
    }

    /// Writes the manifold to the given writer as a binary record of the
    /// metric name, the cluster tree, and the names of the optimal graph's
    /// clusters.
    pub fn save(&self, writer: &mut impl Write) -> Result<(), String> {
        let record = ManifoldRecord {
            metric: self.space.metric().name().to_string(),
            root: self.cluster_record(0),
            graph: self
                .graph
                .clusters()
                .map(|c| self.tree.get(c).name().to_string())
                .collect(),
        };
        bincode::serialize_into(writer, &record).map_err(|e| e.to_string())
    }

    fn cluster_record(&self, index: usize) -> ClusterRecord<U> {
        let cluster = self.tree.get(index);
        let children = cluster
            .children()
            .unwrap_or(&[])
            .iter()
            .map(|&c| self.cluster_record(c))
            .collect::<Vec<_>>();
        ClusterRecord {
            name: cluster.name().to_string(),
            argpoints: cluster.is_leaf().then(|| cluster.argpoints().to_vec()),
            children,
            radius: cluster.radius(),
            argradius: cluster.argradius(),
            argsamples: cluster.argsamples().to_vec(),
            argmedoid: cluster.argmedoid(),
            local_fractal_dimension: cluster.local_fractal_dimension(),
            candidates: cluster.candidates().map(|candidates| {
                candidates
                    .iter()
                    .map(|&(c, d)| (self.tree.get(c).name().to_string(), d))
                    .collect()
            }),
        }
    }

    /// Reads a manifold back from the given reader.
    ///
    /// The space must use the same metric the manifold was saved with. Leaves
    /// are rebuilt from their stored argpoints, parents take the union of
    /// their children's, candidate names are resolved once the tree exists,
    /// the layer graphs are rebuilt by iterated child-expansion, and the
    /// optimal graph's edges are rebuilt.
    pub fn load(reader: &mut impl Read, space: &'a dyn Space<'a, T, U>) -> Result<Self, String> {
        let record: ManifoldRecord<U> = bincode::deserialize_from(reader).map_err(|e| e.to_string())?;
        if record.metric != space.metric().name() {
            return Err(format!(
                "the manifold was saved with metric {:?} but the given space uses {:?}",
                record.metric,
                space.metric().name(),
            ));
        }

        let mut clusters = Vec::new();
        let mut candidate_names = Vec::new();
        Self::insert_record(record.root, &mut clusters, &mut candidate_names)?;
        let mut tree = Tree::from_clusters(clusters);

        // resolve candidate names now that every cluster exists
        for index in 0..tree.cardinality() {
            if let Some(names) = candidate_names[index].take() {
                let mut candidates = Vec::with_capacity(names.len());
                for (name, d) in names {
                    let c = tree.select(&ClusterName::from_str(&name)?)?;
                    candidates.push((c, d));
                }
                candidates.sort_by_key(|&(c, _)| c);
                tree.get_mut(index).set_candidates(candidates);
            }
        }

        let layers = tree.layers().into_iter().map(Graph::new).collect();

        let mut graph_clusters = Vec::with_capacity(record.graph.len());
        for name in record.graph {
            graph_clusters.push(tree.select(&ClusterName::from_str(&name)?)?);
        }
        let mut graph = Graph::new(graph_clusters);
        graph.build_edges(&mut tree, space)?;

        Ok(Self {
            space,
            tree,
            layers,
            graph,
            seed: None,
        })
    }

    /// Inserts a cluster record and its descendants into the arena. Returns
    /// the arena index and the argpoints of the inserted cluster.
    fn insert_record(
        record: ClusterRecord<U>,
        clusters: &mut Vec<Cluster<U>>,
        candidate_names: &mut Vec<Option<Vec<(String, U)>>>,
    ) -> Result<(usize, Vec<usize>), String> {
        let index = clusters.len();
        clusters.push(Cluster::from_parts(
            ClusterName::root(),
            Vec::new(),
            None,
            Vec::new(),
            0,
            0,
            U::zero(),
            0.,
        ));
        candidate_names.push(None);

        let name = ClusterName::from_str(&record.name)?;
        let mut child_ids = Vec::with_capacity(record.children.len());
        let mut argpoints = Vec::new();
        for child in record.children {
            let (id, child_argpoints) = Self::insert_record(child, clusters, candidate_names)?;
            child_ids.push(id);
            argpoints.extend(child_argpoints);
        }
        let argpoints = if child_ids.is_empty() {
            record.argpoints.ok_or_else(|| {
                format!(
                    "cluster {:?} needs the argpoints of its children when reading from file",
                    record.name,
                )
            })?
        } else {
            argpoints
        };

        clusters[index] = Cluster::from_parts(
            name,
            argpoints.clone(),
            Some(child_ids),
            record.argsamples,
            record.argmedoid,
            record.argradius,
            record.radius,
            record.local_fractal_dimension,
        );
        candidate_names[index] = record.candidates;
        Ok((index, argpoints))
    }

    fn leaf_signature(&self) -> BTreeSet<(String, Vec<usize>)> {
        self.layers[self.layers.len() - 1]
            .clusters()
            .map(|c| {
                let cluster = self.tree.get(c);
                let mut argpoints = cluster.argpoints().to_vec();
                argpoints.sort_unstable();
                (cluster.name().to_string(), argpoints)
            })
            .collect()
    }
}

/// Two manifolds are identical if they use the same metric and their deepest
/// layers hold the same clusters.
impl<'a, T: Number, U: Number> PartialEq for Manifold<'a, T, U> {
    fn eq(&self, other: &Self) -> bool {
        self.space.metric().name() == other.space.metric().name()
            && self.leaf_signature() == other.leaf_signature()
    }
}

/// The persisted form of a cluster. Only leaves store their argpoints; parents
/// recover theirs as the union of their children's.
#[derive(Serialize, Deserialize)]
struct ClusterRecord<U> {
    name: String,
    argpoints: Option<Vec<usize>>,
    children: Vec<ClusterRecord<U>>,
    radius: U,
    argradius: usize,
    argsamples: Vec<usize>,
    argmedoid: usize,
    local_fractal_dimension: f64,
    candidates: Option<Vec<(String, U)>>,
}

/// The persisted form of a manifold.
#[derive(Serialize, Deserialize)]
struct ManifoldRecord<U> {
    metric: String,
    root: ClusterRecord<U>,
    graph: Vec<String>,
}
