//! Common imports from CLAM.

pub use crate::dataset::Dataset;
pub use crate::metric::metric_from_name;
pub use crate::metric::Metric;
pub use crate::number::Number;
pub use crate::space::Space;

pub use crate::core::cluster::Cluster;
pub use crate::core::criteria::Criterion;
pub use crate::core::criteria::PartitionCriteria;
pub use crate::core::graph::EdgeChoice;
pub use crate::core::graph::Graph;
pub use crate::core::manifold::Manifold;
pub use crate::core::tree::Tree;
