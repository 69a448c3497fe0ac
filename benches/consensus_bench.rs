use criterion::{black_box, criterion_group, criterion_main, Criterion};

use flatcon::depth_correct::depth_corrected_vote;
use flatcon::example_gen::{generate_alignment, generate_position_counts};
use flatcon::flat_consensus::FlatConsensus;
use flatcon::voting::CoverageGatedVoter;

pub fn bench_flat_consensus(c: &mut Criterion) {
    let widths = [3000, 30000];
    let num_rows = [8, 64];
    let gap_rates = [0.0, 0.2];

    let mut benchmark_group = c.benchmark_group("flat-consensus-group");
    benchmark_group.sample_size(10);

    let voter = CoverageGatedVoter::default();
    for &w in widths.iter() {
        for &nr in num_rows.iter() {
            for &gr in gap_rates.iter() {
                let (_truth, rows) = generate_alignment(w, nr, gr, 0.02);
                let test_label = format!("flat_{w}x{nr}_{gr}");
                benchmark_group.bench_function(&test_label, |b| b.iter(|| {
                    black_box(FlatConsensus::from_alignment("bench", &rows, &voter).unwrap())
                }));
            }
        }
    }

    benchmark_group.finish();
}

pub fn bench_depth_vote(c: &mut Criterion) {
    let seq_lens = [3000, 30000];

    let mut benchmark_group = c.benchmark_group("depth-vote-group");
    benchmark_group.sample_size(10);

    for &sl in seq_lens.iter() {
        let (_truth, rows) = generate_position_counts(sl, 1000, 0.05);
        let test_label = format!("depth_vote_{sl}");
        benchmark_group.bench_function(&test_label, |b| b.iter(|| {
            black_box(depth_corrected_vote(&rows))
        }));
    }

    benchmark_group.finish();
}

criterion_group!(benches, bench_flat_consensus, bench_depth_vote);
criterion_main!(benches);
