use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use metasource::catalog::SourceCatalog;
use metasource::constants::arcsec_to_deg;
use metasource::resolver::IdentityResolver;
use metasource::sources::NewDetection;

/// `n_epochs` batches observing the same `n_sources` field sources with a few arcseconds
/// of scatter.
fn make_epochs(n_sources: usize, n_epochs: u32, rng: &mut StdRng) -> Vec<Vec<NewDetection>> {
    let field: Vec<(f64, f64)> = (0..n_sources)
        .map(|_| {
            (
                150.0 + rng.random::<f64>() * 10.0,
                rng.random::<f64>() * 10.0 - 5.0,
            )
        })
        .collect();

    (1..=n_epochs)
        .map(|survey| {
            field
                .iter()
                .enumerate()
                .map(|(i, (ra, dec))| {
                    let jitter = arcsec_to_deg(rng.random_range(-3.0..3.0));
                    NewDetection::new(survey, i as i64, ra + jitter, dec + jitter)
                        .with_pos_error(rng.random_range(1.0..15.0))
                        .with_likelihood(rng.random_range(6.0..500.0))
                        .with_flux(rng.random_range(1.0e-15..1.0e-12))
                })
                .collect()
        })
        .collect()
}

fn bench_serial_ingestion(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xE90C);
    let mut group = c.benchmark_group("ingest_serial");
    group.sample_size(10);

    for n_sources in [1_000usize, 10_000] {
        let epochs = make_epochs(n_sources, 5, &mut rng);
        group.throughput(Throughput::Elements((n_sources * 5) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n_sources), &epochs, |b, epochs| {
            b.iter_batched(
                || epochs.clone(),
                |epochs| {
                    let mut resolver = IdentityResolver::new().unwrap();
                    for batch in epochs {
                        resolver.ingest_batch(batch).unwrap();
                    }
                    resolver.n_identities()
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_parallel_ingestion(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xE90C);
    let epochs = make_epochs(10_000, 5, &mut rng);
    let mut group = c.benchmark_group("ingest_parallel");
    group.sample_size(10);
    group.throughput(Throughput::Elements(50_000));

    group.bench_function("five_epochs", |b| {
        b.iter_batched(
            || epochs.clone(),
            |epochs| {
                let catalog = SourceCatalog::new().unwrap();
                catalog.ingest_epochs_parallel(epochs).unwrap();
                catalog.n_identities()
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_serial_ingestion, bench_parallel_ingestion);
criterion_main!(benches);
