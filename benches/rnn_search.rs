use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;

use rand::prelude::*;

use clam::{metric_from_name, Dataset, Manifold, Tabular, TabularSpace};

fn gen_data(cardinality: usize, dimensionality: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    (0..cardinality)
        .map(|_| (0..dimensionality).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn rnn_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("rnn-search");
    group
        .significance_level(0.05)
        .measurement_time(std::time::Duration::new(10, 0))
        .sample_size(30);

    let features = gen_data(10_000, 10, 42);
    let dataset = Tabular::new(&features, "uniform".to_string());
    let metric = metric_from_name::<f32, f32>("euclidean", false).unwrap();
    let space = TabularSpace::new(&dataset, metric.as_ref(), false);

    let manifold = Manifold::new(&space, Some(42))
        .build(vec![clam::Criterion::min_cardinality(10)])
        .unwrap();
    let radius = manifold.tree().root().radius();
    let queries = (0..100).map(|i| dataset.get(i).to_vec()).collect::<Vec<_>>();

    let bench_name = format!("uniform-{}-{}", dataset.cardinality(), dataset.dimensionality());
    for factor in [10, 25, 50, 100] {
        group.bench_with_input(BenchmarkId::new(&bench_name, factor), &factor, |b, &factor| {
            b.iter(|| {
                queries
                    .iter()
                    .map(|query| manifold.find_points(query, radius / (factor as f32)).unwrap())
                    .collect::<Vec<_>>()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, rnn_search);
criterion_main!(benches);
