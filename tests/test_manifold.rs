use std::collections::BTreeSet;
use std::str::FromStr;

use float_cmp::approx_eq;
use rand::prelude::*;

use clam::prelude::*;
use clam::{ClusterName, GraphCriterion, SelectionCriterion, Tabular, TabularSpace};

/// Uniform points in the square `[origin, origin + side)^2`.
fn square_blob(rng: &mut rand_chacha::ChaCha8Rng, origin: f64, side: f64, n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|_| {
            vec![
                origin + rng.gen_range(0.0..side),
                origin + rng.gen_range(0.0..side),
            ]
        })
        .collect()
}

fn build_manifold<'a>(
    space: &'a TabularSpace<'a, f64, f64>,
    criteria: Vec<Criterion<f64, f64>>,
) -> Manifold<'a, f64, f64> {
    let _ = env_logger::builder().is_test(true).try_init();
    Manifold::new(space, Some(42)).build(criteria).unwrap()
}

/// Selects clusters by name, for tests that need a specific graph.
#[derive(Debug)]
struct PickNames(Vec<String>);

impl SelectionCriterion<f64> for PickNames {
    fn select(&self, tree: &Tree<f64>) -> Vec<usize> {
        self.0
            .iter()
            .map(|name| tree.select(&ClusterName::from_str(name).unwrap()).unwrap())
            .collect()
    }
}

/// Replaces the named graph cluster by its children.
#[derive(Debug)]
struct SplitGraphCluster(String);

impl GraphCriterion<f64, f64> for SplitGraphCluster {
    fn apply(&self, manifold: &mut Manifold<f64, f64>) -> Result<(), String> {
        let name = ClusterName::from_str(&self.0)?;
        let target = manifold.tree().select(&name)?;
        let children = manifold
            .tree()
            .get(target)
            .children()
            .map(|children| children.iter().copied().collect::<BTreeSet<_>>())
            .unwrap_or_default();
        manifold.replace_graph_clusters(&BTreeSet::from([target]), &children)
    }
}

#[test]
fn test_singletons() {
    let data = vec![vec![0., 0.], vec![10., 0.]];
    let dataset = Tabular::new(&data, "singletons".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![Criterion::max_depth(10)]);
    assert_eq!(manifold.depth(), 1);

    let graph = manifold.graph();
    assert_eq!(graph.cardinality(), 2);
    for c in graph.clusters() {
        assert_eq!(manifold.tree().get(c).cardinality(), 1);
        assert_eq!(manifold.tree().get(c).radius(), 0.);
        // singleton volumes cannot overlap, so there are no edges
        assert!(graph.neighbors(c, EdgeChoice::All).unwrap().is_empty());
    }
    assert_eq!(graph.walkable_clusters().len(), 2);
    assert_eq!(graph.subgraphs().unwrap().len(), 2);
}

#[test]
fn test_duplicates() {
    let data = vec![vec![1., 1.]; 5];
    let dataset = Tabular::new(&data, "duplicates".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![Criterion::max_depth(10)]);

    // the root holds only duplicates, so it refuses to partition
    assert_eq!(manifold.depth(), 0);
    assert_eq!(manifold.tree().root().nsamples(), 1);
    assert!(manifold.tree().root().is_leaf());

    let hits = manifold.find_knn(&[1., 1.], 3).unwrap();
    assert_eq!(hits.len(), 3);
    for &(_, d) in hits.iter() {
        assert!(approx_eq!(f64, d, 0.));
    }
}

#[test]
fn test_two_blobs() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let mut data = square_blob(&mut rng, 0., 0.2, 50);
    data.extend(square_blob(&mut rng, 10., 0.2, 50));
    let dataset = Tabular::new(&data, "two_blobs".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![Criterion::layer_depth(1)]);

    // the first partition separates the blobs exactly
    let graph = manifold.graph();
    assert_eq!(graph.cardinality(), 2);
    let mut cardinalities = graph
        .clusters()
        .map(|c| manifold.tree().get(c).cardinality())
        .collect::<Vec<_>>();
    cardinalities.sort_unstable();
    assert_eq!(cardinalities, vec![50, 50]);

    // the blobs are far apart, so the graph has no edge between them
    for c in graph.clusters() {
        assert!(graph.neighbors(c, EdgeChoice::All).unwrap().is_empty());
    }
    assert_eq!(graph.subgraphs().unwrap().len(), 2);
}

#[test]
fn test_subsumption() {
    // the root's volume contains the volume of its child "01"
    let data = (0..5).map(|i| vec![i as f64, 0.]).collect::<Vec<_>>();
    let dataset = Tabular::new(&data, "subsumption".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(
        &space,
        vec![Criterion::Selection(Box::new(PickNames(vec![
            "".to_string(),
            "01".to_string(),
        ])))],
    );

    let graph = manifold.graph();
    let root = 0;
    let small = manifold.tree().select(&ClusterName::from_str("01").unwrap()).unwrap();

    assert_eq!(graph.subsumed_clusters(), &BTreeSet::from([small]));
    assert_eq!(graph.walkable_clusters(), &BTreeSet::from([root]));
    assert!(graph.probabilities(small).is_err());
    assert!(graph.traverse(small).is_err());
    assert_eq!(graph.traverse(root).unwrap(), BTreeSet::from([root, small]));
}

#[test]
fn test_graph_criterion() {
    let data = (0..5).map(|i| vec![i as f64, 0.]).collect::<Vec<_>>();
    let dataset = Tabular::new(&data, "graph_criterion".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(
        &space,
        vec![
            Criterion::Selection(Box::new(PickNames(vec!["".to_string(), "01".to_string()]))),
            Criterion::Graph(Box::new(SplitGraphCluster("01".to_string()))),
        ],
    );

    // the hook replaced "01" with its children "010" and "0101"
    let graph = manifold.graph();
    assert_eq!(graph.cardinality(), 3);
    assert!(graph.is_built());
    let names = graph
        .clusters()
        .map(|c| manifold.tree().get(c).name().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["".to_string(), "010".to_string(), "0101".to_string()]);
}

#[test]
fn test_range_search_lattice() {
    let data = (0..10)
        .flat_map(|x| (0..10).map(move |y| vec![x as f64, y as f64]))
        .collect::<Vec<_>>();
    let dataset = Tabular::new(&data, "lattice".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![]);

    let query = vec![4.5, 4.5];
    let results = manifold.find_points(&query, 1.5).unwrap();

    // exactly the four corners of the unit square around the query
    let indices = results.iter().map(|&(i, _)| i).collect::<Vec<_>>();
    assert_eq!(indices, vec![44, 45, 54, 55]);
    for &(_, d) in results.iter() {
        assert!(approx_eq!(f64, d, 0.5_f64.sqrt(), epsilon = 1e-12));
    }

    // soundness and completeness against a linear scan
    for radius in [0.5, 1.5, 3.] {
        let results = manifold.find_points(&query, radius).unwrap();
        let linear = data
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let d = ((p[0] - query[0]).powi(2) + (p[1] - query[1]).powi(2)).sqrt();
                d <= radius
            })
            .map(|(i, _)| i)
            .collect::<BTreeSet<_>>();
        let found = results.iter().map(|&(i, _)| i).collect::<BTreeSet<_>>();
        assert_eq!(found, linear);
    }
}

#[test]
fn test_knn() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
    let data = square_blob(&mut rng, 0., 1., 100);
    let dataset = Tabular::new(&data, "knn".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![]);

    for query in [vec![0.5, 0.5], vec![0., 0.], vec![2., 2.]] {
        let hits = manifold.find_knn(&query, 5).unwrap();
        assert_eq!(hits.len(), 5);

        // distinct indices, sorted by ascending distance
        let indices = hits.iter().map(|&(i, _)| i).collect::<BTreeSet<_>>();
        assert_eq!(indices.len(), 5);
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }

        // the radius-doubling search is exact for a metric with the triangle
        // inequality
        let mut linear = data
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d = ((p[0] - query[0]).powi(2) + (p[1] - query[1]).powi(2)).sqrt();
                (i, d)
            })
            .collect::<Vec<_>>();
        linear.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let expected = linear[..5].iter().map(|&(i, _)| i).collect::<Vec<_>>();
        assert_eq!(hits.iter().map(|&(i, _)| i).collect::<Vec<_>>(), expected);
    }

    // k greater than the cardinality returns every instance
    let hits = manifold.find_knn(&[0.5, 0.5], 200).unwrap();
    assert_eq!(hits.len(), 100);
}

#[test]
fn test_graph_invariants() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(13);
    let data = square_blob(&mut rng, 0., 1., 300);
    let dataset = Tabular::new(&data, "invariants".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(
        &space,
        vec![Criterion::min_cardinality(5), Criterion::layer_depth(4)],
    );
    let tree = manifold.tree();
    let graph = manifold.graph();

    // every cluster's name encodes its depth, and children partition parents
    for (_, cluster) in tree.iter() {
        let zeros = cluster.name().to_string().matches('0').count();
        assert_eq!(cluster.depth(), zeros);
        assert!(cluster.cardinality() > 0);
        if let Some(children) = cluster.children() {
            let union = children.iter().map(|&c| tree.get(c).cardinality()).sum::<usize>();
            if !children.is_empty() {
                assert_eq!(union, cluster.cardinality());
            }
        }
    }

    // walkable and subsumed partition the graph's clusters
    let clusters = graph.clusters().collect::<BTreeSet<_>>();
    let split = graph
        .walkable_clusters()
        .union(graph.subsumed_clusters())
        .copied()
        .collect::<BTreeSet<_>>();
    assert_eq!(clusters, split);
    assert!(graph.walkable_clusters().is_disjoint(graph.subsumed_clusters()));

    for &c in clusters.iter() {
        let neighbors = graph.neighbors(c, EdgeChoice::All).unwrap();
        let distances = graph.distances(c, EdgeChoice::All).unwrap();

        // no self-edges; symmetric edges; edges only between overlapping volumes
        assert!(!neighbors.contains(&c));
        for (&n, &d) in neighbors.iter().zip(distances.iter()) {
            assert!(d <= tree.get(c).radius() + tree.get(n).radius());
            let reverse = graph.neighbors(n, EdgeChoice::All).unwrap();
            let reverse_distances = graph.distances(n, EdgeChoice::All).unwrap();
            let i = reverse.iter().position(|&m| m == c).unwrap();
            assert!(approx_eq!(f64, reverse_distances[i], d));
        }

        // a cluster is subsumed iff some neighbor's volume contains its own
        let subsumed = neighbors
            .iter()
            .zip(distances.iter())
            .any(|(&n, &d)| tree.get(n).radius() >= d + tree.get(c).radius());
        assert_eq!(subsumed, graph.subsumed_clusters().contains(&c));

        // walkable transition probabilities sum to 1
        if graph.walkable_clusters().contains(&c) {
            let walkable = graph.neighbors(c, EdgeChoice::Walkable).unwrap();
            let probabilities = graph.probabilities(c).unwrap();
            assert_eq!(walkable.len(), probabilities.len());
            if !walkable.is_empty() {
                let total = probabilities.iter().sum::<f64>();
                assert!((total - 1.).abs() <= 1e-6);
            }
        } else {
            assert!(graph.probabilities(c).is_err());
        }
    }
}

#[test]
fn test_round_trip() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let mut data = square_blob(&mut rng, 0., 0.2, 30);
    data.extend(square_blob(&mut rng, 5., 0.2, 30));
    let dataset = Tabular::new(&data, "round_trip".to_string());
    let metric = metric_from_name("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = build_manifold(&space, vec![Criterion::layer_depth(1)]);

    let mut buffer = Vec::new();
    manifold.save(&mut buffer).unwrap();

    let loaded = Manifold::load(&mut buffer.as_slice(), &space).unwrap();
    assert!(manifold == loaded);
    assert_eq!(loaded.depth(), manifold.depth());

    // the arena order may differ between the two trees, so compare the
    // graphs by cluster name
    let graph_names = |m: &Manifold<f64, f64>| {
        m.graph()
            .clusters()
            .map(|c| m.tree().get(c).name().to_string())
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(graph_names(&manifold), graph_names(&loaded));

    // searches over both manifolds agree pointwise
    for query in [vec![0.1, 0.1], vec![5.1, 5.1], vec![2.5, 2.5]] {
        assert_eq!(
            manifold.find_points(&query, 1.).unwrap(),
            loaded.find_points(&query, 1.).unwrap(),
        );
        assert_eq!(
            manifold.find_knn(&query, 7).unwrap(),
            loaded.find_knn(&query, 7).unwrap(),
        );
    }

    // a space with a different metric is rejected
    let manhattan = metric_from_name("manhattan", false).unwrap();
    let other_space = TabularSpace::new(&dataset, manhattan.as_ref(), false);
    assert!(Manifold::<f64, f64>::load(&mut buffer.as_slice(), &other_space).is_err());
}
