//! Provides the `Graph` over the clusters of a tree cut.
//!
//! Nodes in a `Graph` are `Cluster`s, addressed by their arena index in the
//! owning `Tree`. Two clusters have an edge between them iff their volumes
//! overlap, i.e. the distance between their medoids is no greater than the
//! sum of their radii. Every edge is stored in both directions.
//!
//! After `build_edges`, the clusters are split into *walkable* clusters and
//! *subsumed* clusters (those whose volume lies entirely inside a neighbor's
//! volume). Traversals and random walks move along walkable edges only, and
//! each walkable edge carries a transition probability proportional to the
//! inverse of its length.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::debug;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::core::tree::Tree;
use crate::number::Number;
use crate::space::Space;

/// Which neighbors of a cluster to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChoice {
    All,
    Walkable,
    Subsumed,
}

/// A `Graph` over a set of clusters with overlap edges between them.
///
/// The edge map of each cluster is `None` until `build_edges` runs; queries
/// on an unbuilt graph return an error. All query results over the same graph
/// state come back in a consistent order, so `probabilities` aligns
/// positionally with `neighbors(_, EdgeChoice::Walkable)`.
#[derive(Debug, Clone)]
pub struct Graph<U: Number> {
    /// cluster -> (neighbor -> distance), `None` until built.
    edges: BTreeMap<usize, Option<BTreeMap<usize, U>>>,
    subsumed_clusters: BTreeSet<usize>,
    walkable_clusters: BTreeSet<usize>,
    /// Outgoing edges from any cluster to its subsumed neighbors.
    subsumed_edges: BTreeMap<usize, BTreeMap<usize, U>>,
    /// Edges among walkable clusters, with transition probabilities.
    walkable_edges: BTreeMap<usize, BTreeMap<usize, (U, f64)>>,
}

impl<U: Number> Graph<U> {
    /// Creates a new `Graph` over the given clusters, with no edges yet.
    pub fn new(clusters: impl IntoIterator<Item = usize>) -> Self {
        Self {
            edges: clusters.into_iter().map(|c| (c, None)).collect(),
            subsumed_clusters: BTreeSet::new(),
            walkable_clusters: BTreeSet::new(),
            subsumed_edges: BTreeMap::new(),
            walkable_edges: BTreeMap::new(),
        }
    }

    /// The arena indices of the clusters in this graph, in ascending order.
    pub fn clusters(&self) -> impl Iterator<Item = usize> + '_ {
        self.edges.keys().copied()
    }

    /// The number of clusters in this graph.
    pub fn cardinality(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, cluster: usize) -> bool {
        self.edges.contains_key(&cluster)
    }

    /// The total number of instances across the clusters of this graph.
    pub fn population(&self, tree: &Tree<U>) -> usize {
        self.clusters().map(|c| tree.get(c).cardinality()).sum()
    }

    /// The minimum and maximum cluster depth in this graph.
    pub fn depth_range(&self, tree: &Tree<U>) -> (usize, usize) {
        self.clusters().fold((usize::MAX, 0), |(min, max), c| {
            let d = tree.get(c).depth();
            (min.min(d), max.max(d))
        })
    }

    /// Whether `build_edges` has run for the current cluster set.
    pub fn is_built(&self) -> bool {
        self.edges.values().all(Option::is_some)
    }

    /// The clusters of this graph that are subsumed by a neighbor.
    pub fn subsumed_clusters(&self) -> &BTreeSet<usize> {
        &self.subsumed_clusters
    }

    /// The clusters of this graph that are not subsumed by any neighbor.
    pub fn walkable_clusters(&self) -> &BTreeSet<usize> {
        &self.walkable_clusters
    }

    fn assert_contains(&self, cluster: usize) -> Result<(), String> {
        if self.contains(cluster) {
            Ok(())
        } else {
            Err(format!("cluster {cluster} is not in this graph"))
        }
    }

    fn assert_built(&self) -> Result<(), String> {
        if self.is_built() {
            Ok(())
        } else {
            Err("the edges of this graph have not been built. Call `build_edges` first".to_string())
        }
    }

    fn edges_of(&self, cluster: usize) -> Result<&BTreeMap<usize, U>, String> {
        self.assert_contains(cluster)?;
        self.edges[&cluster]
            .as_ref()
            .ok_or_else(|| "the edges of this graph have not been built. Call `build_edges` first".to_string())
    }

    /// Computes the edges of the graph.
    ///
    /// Every cluster keeps the candidate neighbors that are members of this
    /// graph and whose volume overlaps its own. Edges are then made symmetric,
    /// self-edges are dropped, the walkable/subsumed split is computed, and
    /// transition probabilities are assigned to walkable edges.
    pub fn build_edges<'a, T: Number>(
        &mut self,
        tree: &mut Tree<U>,
        space: &dyn Space<'a, T, U>,
    ) -> Result<(), String> {
        debug!("building edges for graph with {} clusters", self.cardinality());
        let members = self.edges.keys().copied().collect::<Vec<_>>();
        for &c in members.iter() {
            tree.find_candidates(space, c)?;
        }

        for &c in members.iter() {
            let radius = tree.get(c).radius();
            let edges = tree
                .get(c)
                .candidates()
                .unwrap_or_else(|| unreachable!("candidates were propagated just above"))
                .iter()
                .filter(|&&(x, d)| self.edges.contains_key(&x) && d <= radius + tree.get(x).radius())
                .copied()
                .collect::<BTreeMap<_, _>>();
            self.edges.insert(c, Some(edges));
        }

        // handshake between all neighbors
        let triples = self
            .edges
            .iter()
            .flat_map(|(&c, edges)| {
                edges
                    .as_ref()
                    .into_iter()
                    .flat_map(move |edges| edges.iter().map(move |(&n, &d)| (c, n, d)))
            })
            .collect::<Vec<_>>();
        for (c, n, d) in triples {
            if let Some(Some(edges)) = self.edges.get_mut(&n) {
                edges.insert(c, d);
            }
        }

        // remove edges to self
        for (&c, edges) in self.edges.iter_mut() {
            if let Some(edges) = edges {
                edges.remove(&c);
            }
        }

        self.split_walkable_vs_subsumed(tree);
        self.recompute_transition_probabilities();
        Ok(())
    }

    /// A cluster is subsumed iff some neighbor's volume contains its own:
    /// `neighbor.radius >= distance + cluster.radius`.
    fn split_walkable_vs_subsumed(&mut self, tree: &Tree<U>) {
        debug!(
            "marking subsumed clusters for graph with {} clusters",
            self.cardinality(),
        );
        self.subsumed_clusters = self
            .edges
            .iter()
            .filter(|(&c, edges)| {
                edges.as_ref().map_or(false, |edges| {
                    edges
                        .iter()
                        .any(|(&n, &d)| tree.get(n).radius() >= d + tree.get(c).radius())
                })
            })
            .map(|(&c, _)| c)
            .collect();
        self.walkable_clusters = self
            .edges
            .keys()
            .copied()
            .filter(|c| !self.subsumed_clusters.contains(c))
            .collect();

        self.subsumed_edges = self
            .edges
            .iter()
            .map(|(&c, edges)| {
                let subsumed = edges
                    .as_ref()
                    .map(|edges| {
                        edges
                            .iter()
                            .filter(|&(n, _)| self.subsumed_clusters.contains(n))
                            .map(|(&n, &d)| (n, d))
                            .collect()
                    })
                    .unwrap_or_default();
                (c, subsumed)
            })
            .collect();

        self.walkable_edges = self
            .walkable_clusters
            .iter()
            .map(|&c| {
                let walkable = self.edges[&c]
                    .as_ref()
                    .map(|edges| {
                        edges
                            .iter()
                            .filter(|&(n, _)| self.walkable_clusters.contains(n))
                            .map(|(&n, &d)| (n, (d, 0.)))
                            .collect()
                    })
                    .unwrap_or_default();
                (c, walkable)
            })
            .collect();
    }

    /// Assigns each walkable edge the probability of being taken in a random
    /// walk: the inverse of its length, normalized per cluster.
    fn recompute_transition_probabilities(&mut self) {
        debug!(
            "computing transition probabilities for graph with {} clusters",
            self.cardinality(),
        );
        for edges in self.walkable_edges.values_mut() {
            if edges.is_empty() {
                continue;
            }
            let factor = edges.values().map(|&(d, _)| d.as_f64().recip()).sum::<f64>();
            for (d, p) in edges.values_mut() {
                *p = (d.as_f64() * factor).recip();
            }

            let total = edges.values().map(|&(_, p)| p).sum::<f64>();
            debug_assert!(
                (total - 1.).abs() <= 1e-6,
                "transition probabilities summed to {total:.8} instead of 1",
            );
        }
    }

    /// Replaces the clusters in `removals` by those in `additions` and
    /// rebuilds the edges.
    ///
    /// The instances owned by the removed clusters must be exactly the
    /// instances owned by the added clusters.
    pub fn replace_clusters<'a, T: Number>(
        &mut self,
        removals: &BTreeSet<usize>,
        additions: &BTreeSet<usize>,
        tree: &mut Tree<U>,
        space: &dyn Space<'a, T, U>,
        recompute_probabilities: bool,
    ) -> Result<(), String> {
        if let Some(&c) = removals.iter().find(|c| !self.contains(**c)) {
            return Err(format!("cannot remove cluster {c}: it is not present in the graph"));
        }
        if let Some(&c) = additions.iter().find(|c| self.contains(**c)) {
            return Err(format!("cannot add cluster {c}: it is already present in the graph"));
        }

        let points_removed = removals
            .iter()
            .flat_map(|&c| tree.get(c).argpoints().iter().copied())
            .collect::<BTreeSet<_>>();
        let points_added = additions
            .iter()
            .flat_map(|&c| tree.get(c).argpoints().iter().copied())
            .collect::<BTreeSet<_>>();
        if points_removed != points_added {
            return Err("the clusters being removed own different points than those being added".to_string());
        }

        let clusters = self
            .clusters()
            .filter(|c| !removals.contains(c))
            .chain(additions.iter().copied())
            .collect::<Vec<_>>();
        *self = Self::new(clusters);

        if recompute_probabilities {
            self.build_edges(tree, space)?;
        }
        Ok(())
    }

    /// The neighbors of the given cluster, in ascending index order.
    ///
    /// With `EdgeChoice::Walkable`, a subsumed cluster has no entries.
    pub fn neighbors(&self, cluster: usize, choice: EdgeChoice) -> Result<Vec<usize>, String> {
        let edges = self.edges_of(cluster)?;
        Ok(match choice {
            EdgeChoice::All => edges.keys().copied().collect(),
            EdgeChoice::Subsumed => self.subsumed_edges[&cluster].keys().copied().collect(),
            EdgeChoice::Walkable => self
                .walkable_edges
                .get(&cluster)
                .map(|edges| edges.keys().copied().collect())
                .unwrap_or_default(),
        })
    }

    /// The distances to the neighbors of the given cluster, aligned with
    /// `neighbors` under the same choice.
    pub fn distances(&self, cluster: usize, choice: EdgeChoice) -> Result<Vec<U>, String> {
        let edges = self.edges_of(cluster)?;
        Ok(match choice {
            EdgeChoice::All => edges.values().copied().collect(),
            EdgeChoice::Subsumed => self.subsumed_edges[&cluster].values().copied().collect(),
            EdgeChoice::Walkable => self
                .walkable_edges
                .get(&cluster)
                .map(|edges| edges.values().map(|&(d, _)| d).collect())
                .unwrap_or_default(),
        })
    }

    /// The transition probabilities from the given cluster to its walkable
    /// neighbors, aligned with `neighbors(_, EdgeChoice::Walkable)`.
    ///
    /// Transition probabilities only exist among walkable clusters, so asking
    /// for those of a subsumed cluster is an error.
    pub fn probabilities(&self, cluster: usize) -> Result<Vec<f64>, String> {
        self.edges_of(cluster)?;
        if self.subsumed_clusters.contains(&cluster) {
            return Err("cannot compute transition probabilities for a subsumed cluster".to_string());
        }
        Ok(self
            .walkable_edges
            .get(&cluster)
            .map(|edges| edges.values().map(|&(_, p)| p).collect())
            .unwrap_or_default())
    }

    /// Every edge of the graph as a `(cluster, neighbor, distance)` triple,
    /// each unordered pair reported once with `cluster < neighbor`.
    pub fn cached_edges(&self) -> Result<Vec<(usize, usize, U)>, String> {
        self.assert_built()?;
        Ok(self
            .edges
            .iter()
            .flat_map(|(&c, edges)| {
                edges
                    .as_ref()
                    .into_iter()
                    .flat_map(move |edges| edges.iter().map(move |(&n, &d)| (c, n, d)))
            })
            .filter(|&(c, n, _)| c < n)
            .collect())
    }

    /// The number of (undirected) edges in the graph.
    pub fn edge_cardinality(&self) -> Result<usize, String> {
        self.cached_edges().map(|edges| edges.len())
    }

    fn assert_traversal_start(&self, start: usize) -> Result<(), String> {
        self.assert_contains(start)?;
        self.assert_built()?;
        if self.subsumed_clusters.contains(&start) {
            return Err("traversal may not start from a subsumed cluster".to_string());
        }
        Ok(())
    }

    /// Unordered graph traversal from `start`: a flood fill over walkable
    /// edges, with the subsumed neighbors of every visited cluster attached
    /// at the end.
    pub fn traverse(&self, start: usize) -> Result<BTreeSet<usize>, String> {
        self.assert_traversal_start(start)?;
        debug!("starting traversal from cluster {start}");

        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut frontier = BTreeSet::from([start]);
        while !frontier.is_empty() {
            visited.extend(frontier.iter().copied());
            frontier = frontier
                .iter()
                .flat_map(|&c| self.walkable_edges[&c].keys().copied())
                .filter(|n| !visited.contains(n))
                .collect();
        }

        let subsumed = visited
            .iter()
            .flat_map(|&c| self.subsumed_edges[&c].keys().copied())
            .collect::<Vec<_>>();
        visited.extend(subsumed);
        Ok(visited)
    }

    /// Breadth-first traversal from `start` over walkable edges, with the
    /// subsumed neighbors of the visited set attached at the end.
    pub fn bft(&self, start: usize) -> Result<BTreeSet<usize>, String> {
        self.assert_traversal_start(start)?;
        debug!("starting breadth-first traversal from cluster {start}");

        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(c) = queue.pop_front() {
            if visited.insert(c) {
                queue.extend(self.walkable_edges[&c].keys().copied().filter(|n| !visited.contains(n)));
            }
        }

        let subsumed = visited
            .iter()
            .flat_map(|&c| self.subsumed_edges[&c].keys().copied())
            .collect::<Vec<_>>();
        visited.extend(subsumed);
        Ok(visited)
    }

    /// Depth-first traversal from `start` over walkable edges, with the
    /// subsumed neighbors of the visited set attached at the end.
    pub fn dft(&self, start: usize) -> Result<BTreeSet<usize>, String> {
        self.assert_traversal_start(start)?;
        debug!("starting depth-first traversal from cluster {start}");

        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            if visited.insert(c) {
                stack.extend(self.walkable_edges[&c].keys().copied().filter(|n| !visited.contains(n)));
            }
        }

        let subsumed = visited
            .iter()
            .flat_map(|&c| self.subsumed_edges[&c].keys().copied())
            .collect::<Vec<_>>();
        visited.extend(subsumed);
        Ok(visited)
    }

    /// The connected components of the graph over walkable edges. Subsumed
    /// clusters are attached to every component containing a walkable cluster
    /// that subsumes them.
    pub fn subgraphs(&self) -> Result<Vec<Graph<U>>, String> {
        self.assert_built()?;
        let mut subgraphs = Vec::new();
        let mut unvisited = self.walkable_clusters.clone();
        while let Some(&start) = unvisited.iter().next() {
            let component = self.traverse(start)?;
            unvisited.retain(|c| !component.contains(c));
            subgraphs.push(self.restrict_to(&component));
        }
        Ok(subgraphs)
    }

    /// The subgraph to which the given cluster belongs.
    pub fn subgraph(&self, cluster: usize) -> Result<Graph<U>, String> {
        self.assert_contains(cluster)?;
        self.subgraphs()?
            .into_iter()
            .find(|g| g.contains(cluster))
            .ok_or_else(|| format!("cluster {cluster} was not found in any subgraph"))
    }

    /// A copy of this graph restricted to `members`, with all edge maps and
    /// caches filtered down to the membership.
    fn restrict_to(&self, members: &BTreeSet<usize>) -> Graph<U> {
        let edges = members
            .iter()
            .map(|&c| {
                let restricted = self.edges[&c].as_ref().map(|edges| {
                    edges
                        .iter()
                        .filter(|&(n, _)| members.contains(n))
                        .map(|(&n, &d)| (n, d))
                        .collect::<BTreeMap<_, _>>()
                });
                (c, restricted)
            })
            .collect();
        let subsumed_edges = members
            .iter()
            .map(|&c| {
                let restricted = self.subsumed_edges[&c]
                    .iter()
                    .filter(|&(n, _)| members.contains(n))
                    .map(|(&n, &d)| (n, d))
                    .collect::<BTreeMap<_, _>>();
                (c, restricted)
            })
            .collect();
        let walkable_clusters = self
            .walkable_clusters
            .intersection(members)
            .copied()
            .collect::<BTreeSet<_>>();
        let walkable_edges = walkable_clusters
            .iter()
            .map(|&c| {
                let restricted = self.walkable_edges[&c]
                    .iter()
                    .filter(|&(n, _)| members.contains(n))
                    .map(|(&n, &e)| (n, e))
                    .collect::<BTreeMap<_, _>>();
                (c, restricted)
            })
            .collect();

        Graph {
            edges,
            subsumed_clusters: self.subsumed_clusters.intersection(members).copied().collect(),
            walkable_clusters,
            subsumed_edges,
            walkable_edges,
        }
    }

    /// Performs random walks from each of `starts`, counting the visits to
    /// each cluster.
    ///
    /// Walks move along walkable edges, picking each step by the transition
    /// probabilities. The counts of subsumed clusters are folded in from the
    /// walkable clusters that subsume them.
    pub fn random_walks(
        &self,
        starts: &[usize],
        steps: usize,
        seed: Option<u64>,
    ) -> Result<BTreeMap<usize, usize>, String> {
        self.assert_built()?;
        if self.cardinality() < 2 {
            return Ok(self.clusters().map(|c| (c, 1)).collect());
        }

        for &start in starts {
            self.assert_contains(start)?;
            if self.subsumed_clusters.contains(&start) {
                return Err("random walks may only start from clusters that are not subsumed".to_string());
            }
        }

        let mut counts: BTreeMap<usize, usize> = self.clusters().map(|c| (c, 0)).collect();
        for &start in starts {
            counts.insert(start, 1);
        }

        // only walk from clusters that have some walkable neighbors
        let mut rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        let mut walks = starts
            .iter()
            .copied()
            .filter(|&c| !self.walkable_edges[&c].is_empty())
            .collect::<Vec<_>>();
        for _ in 0..steps {
            let mut next = Vec::with_capacity(walks.len());
            for &c in walks.iter() {
                let edges = &self.walkable_edges[&c];
                let neighbors = edges.keys().copied().collect::<Vec<_>>();
                let weights = edges.values().map(|&(_, p)| p).collect::<Vec<_>>();
                let chooser = WeightedIndex::new(&weights).map_err(|e| e.to_string())?;
                let n = neighbors[chooser.sample(&mut rng)];
                if let Some(count) = counts.get_mut(&n) {
                    *count += 1;
                }
                next.push(n);
            }
            walks = next;
        }

        for &c in self.walkable_clusters.iter() {
            let c_count = counts[&c];
            let subsumed = self.subsumed_edges[&c].keys().copied().collect::<Vec<_>>();
            for n in subsumed {
                if let Some(count) = counts.get_mut(&n) {
                    *count += c_count;
                }
            }
        }
        Ok(counts)
    }
}
