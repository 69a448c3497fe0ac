
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};

use crate::depth_correct::{PositionCount, BASE_PRECEDENCE};
use crate::voting::GAP_SYMBOL;

/// Creates a gapped alignment we can verify the column vote against
/// # Arguments
/// * `seq_len` - the number of alignment columns
/// * `num_rows` - the number of aligned sequences
/// * `gap_rate` - chance that any one cell is a gap
/// * `error_rate` - chance that a non-gap cell carries a different base than the truth
pub fn generate_alignment(seq_len: usize, num_rows: usize, gap_rate: f64, error_rate: f64) -> (Vec<u8>, Vec<Vec<u8>>) {
    assert!((0.0..=1.0).contains(&gap_rate));
    assert!((0.0..=1.0).contains(&error_rate));

    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let base_distribution = Uniform::new(0, BASE_PRECEDENCE.len());
    let offset_distribution = Uniform::new(1, BASE_PRECEDENCE.len());
    let event_distribution = Uniform::new(0.0, 1.0);

    let truth: Vec<u8> = (0..seq_len)
        .map(|_i| BASE_PRECEDENCE[rng.sample(base_distribution)])
        .collect();

    let rows: Vec<Vec<u8>> = (0..num_rows)
        .map(|_i| {
            truth.iter()
                .map(|&c| {
                    if rng.sample(event_distribution) < gap_rate {
                        GAP_SYMBOL
                    } else if rng.sample(event_distribution) < error_rate {
                        // substitution
                        let index = BASE_PRECEDENCE.iter().position(|&b| b == c).unwrap_or(0);
                        BASE_PRECEDENCE[(index + rng.sample(offset_distribution)) % BASE_PRECEDENCE.len()]
                    } else {
                        c
                    }
                })
                .collect()
        })
        .collect();

    (truth, rows)
}

/// Creates a position-count table around a random truth sequence
/// # Arguments
/// * `seq_len` - the number of positions
/// * `max_depth` - depth at each position is drawn uniformly from 0..=max_depth
/// * `error_rate` - fraction of each position's depth spread over the other bases
pub fn generate_position_counts(seq_len: usize, max_depth: u64, error_rate: f64) -> (Vec<u8>, Vec<PositionCount>) {
    assert!((0.0..=1.0).contains(&error_rate));

    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let base_distribution = Uniform::new(0, BASE_PRECEDENCE.len());
    let depth_distribution = Uniform::new_inclusive(0, max_depth);

    let mut truth = Vec::with_capacity(seq_len);
    let rows: Vec<PositionCount> = (0..seq_len)
        .map(|i| {
            let true_index = rng.sample(base_distribution);
            truth.push(BASE_PRECEDENCE[true_index]);
            let depth = rng.sample(depth_distribution);
            let errors = (depth as f64 * error_rate).floor() as u64;

            let mut counts = [0_u64; 4];
            counts[true_index] = depth - errors;
            for _e in 0..errors {
                let other = (true_index + 1 + rng.sample(Uniform::new(0, 3))) % 4;
                counts[other] += 1;
            }
            PositionCount::new(i as u64 + 1, counts, depth)
        })
        .collect();

    (truth, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::depth_correct::depth_corrected_vote;
    use crate::flat_consensus::FlatConsensus;
    use crate::voting::CoverageGatedVoter;

    #[test]
    fn test_flat_recovers_truth() {
        // no gaps and a low error rate with many rows, the vote should be exact
        let (truth, rows) = generate_alignment(500, 30, 0.0, 0.05);
        let flat = FlatConsensus::from_alignment("synthetic", &rows, &CoverageGatedVoter::default()).unwrap();
        assert_eq!(flat.sequence(), truth);
    }

    #[test]
    fn test_flat_with_gaps() {
        let (_truth, rows) = generate_alignment(500, 20, 0.3, 0.02);
        let flat = FlatConsensus::from_alignment("synthetic", &rows, &CoverageGatedVoter::default()).unwrap();
        assert!(flat.sequence().len() <= 500);
        assert!(flat.per_position_identity().iter().all(|&v| v > 0.0 && v <= 1.0));
        assert!(!flat.sequence().contains(&GAP_SYMBOL));
    }

    #[test]
    fn test_depth_vote_recovers_truth() {
        let (truth, rows) = generate_position_counts(1000, 400, 0.1);
        let refined = depth_corrected_vote(&rows);

        let expected: Vec<u8> = truth.iter().zip(rows.iter())
            .filter(|(_b, r)| r.passes_depth())
            .map(|(&b, _r)| b)
            .collect();
        assert_eq!(refined.sequence(), expected);
        assert_eq!(refined.dropped_low_depth() + expected.len(), 1000);
    }
}
