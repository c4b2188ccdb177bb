//! CLAM: Clustered Learning of Approximate Manifolds.
//!
//! Given a dataset and a distance metric, CLAM builds a hierarchical binary
//! partitioning of the data (the cluster tree) and derives graphs whose nodes
//! are clusters and whose edges connect clusters with overlapping volumes.
//! These structures support rho-nearest-neighbor search, k-nearest-neighbor
//! search, and the graph traversals and random walks used by downstream
//! applications such as anomaly detection.

mod core;
mod dataset;
mod metric;
mod number;
mod space;

pub mod constants;
pub mod helpers;
pub mod prelude;

pub use crate::core::cluster::{Cluster, ClusterName};
pub use crate::core::criteria::{
    Criterion, GraphCriterion, Leaves, LayerDepth, PartitionCriteria, PartitionCriterion,
    SelectionCriterion,
};
pub use crate::core::graph::{EdgeChoice, Graph};
pub use crate::core::manifold::Manifold;
pub use crate::core::tree::Tree;
pub use dataset::{Dataset, Tabular};
pub use metric::{metric_from_name, Metric};
pub use number::Number;
pub use space::{Space, TabularSpace};
