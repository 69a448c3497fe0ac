/*!
Depth-corrected majority vote over a per-position base-count table, as produced by the pileup/position-count generator.

# Example usage
```rust
use flatcon::depth_correct::{depth_corrected_vote, PositionCount};

let rows = [
    PositionCount::new(5, [40, 0, 0, 55], 95),
    PositionCount::new(6, [10, 0, 0, 95], 105),
];
let refined = depth_corrected_vote(&rows);
assert_eq!(refined.sequence(), b"T");
assert_eq!(refined.dropped_low_depth(), 1);
```
*/

use std::path::Path;

use log::debug;

use crate::consensus_config::DEPTH_FLOOR;
use crate::errors::ConsensusError;

/// Column precedence for the vote; on equal counts the earlier base wins
pub const BASE_PRECEDENCE: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// One row of the position-count table; columns other than these are ignored
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct PositionCount {
    #[serde(rename = "Pos")]
    position: u64,
    #[serde(rename = "A")]
    count_a: u64,
    #[serde(rename = "C")]
    count_c: u64,
    #[serde(rename = "G")]
    count_g: u64,
    #[serde(rename = "T")]
    count_t: u64,
    #[serde(rename = "Total")]
    total: u64
}

impl PositionCount {
    /// Constructor
    /// # Arguments
    /// * `position` - the reference position
    /// * `counts` - counts for A, C, G, T in that order
    /// * `total` - total depth at the position, which may include symbols other than ACGT
    pub fn new(position: u64, counts: [u64; 4], total: u64) -> PositionCount {
        PositionCount {
            position,
            count_a: counts[0],
            count_c: counts[1],
            count_g: counts[2],
            count_t: counts[3],
            total
        }
    }

    /// Counts in `BASE_PRECEDENCE` order
    pub fn counts(&self) -> [u64; 4] {
        [self.count_a, self.count_c, self.count_g, self.count_t]
    }

    /// Returns true if this position has more than `DEPTH_FLOOR` total support
    pub fn passes_depth(&self) -> bool {
        self.total > DEPTH_FLOOR
    }

    /// The base with the highest count, first in precedence on ties.
    /// Returns None if no A/C/G/T was observed at all.
    pub fn call(&self) -> Option<u8> {
        let mut best: Option<(u8, u64)> = None;
        for (&base, count) in BASE_PRECEDENCE.iter().zip(self.counts()) {
            if count > best.map_or(0, |(_, c)| c) {
                best = Some((base, count));
            }
        }
        best.map(|(base, _)| base)
    }

    /// Reference position, 1-based
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total depth, including symbols other than A/C/G/T
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// The result of a depth-corrected vote
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefinedConsensus {
    /// The called bases, in ascending position order
    sequence: Vec<u8>,
    /// Rows removed because their total was at or below the depth floor
    dropped_low_depth: usize,
    /// Rows that passed the floor but had no A/C/G/T counts (only N or deletions)
    dropped_no_call: usize
}

impl RefinedConsensus {
    /// The called bases
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Number of rows at or below the depth floor
    pub fn dropped_low_depth(&self) -> usize {
        self.dropped_low_depth
    }

    /// Number of rows above the floor without any A/C/G/T count
    pub fn dropped_no_call(&self) -> usize {
        self.dropped_no_call
    }

    /// True if no position was called
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Loads a tab-separated position-count table with a header row.
/// # Arguments
/// * `path` - the table to load
/// # Errors
/// * if the file cannot be read or a row does not parse
pub fn load_position_counts(path: &Path) -> Result<Vec<PositionCount>, Box<dyn std::error::Error>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;
    let mut rows = vec![];
    for row in csv_reader.deserialize() {
        let record: PositionCount = row.map_err(|e| ConsensusError::MalformedTable {
            path: path.to_path_buf(),
            reason: e.to_string()
        })?;
        rows.push(record);
    }
    Ok(rows)
}

/// Builds the refined consensus from position counts.
/// Rows with a total at or below the depth floor are dropped, the rest contribute their highest-count base.
/// # Arguments
/// * `rows` - the position-count rows, in any order
pub fn depth_corrected_vote(rows: &[PositionCount]) -> RefinedConsensus {
    let mut ordered: Vec<&PositionCount> = rows.iter().collect();
    ordered.sort_by_key(|r| r.position);

    let mut ret = RefinedConsensus::default();
    for row in ordered.into_iter() {
        if !row.passes_depth() {
            ret.dropped_low_depth += 1;
            continue;
        }
        match row.call() {
            Some(base) => ret.sequence.push(base),
            None => ret.dropped_no_call += 1
        };
    }

    debug!(
        "Depth-corrected vote: {} kept, {} below depth, {} without a base call",
        ret.sequence.len(), ret.dropped_low_depth, ret.dropped_no_call
    );
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_floor() {
        let rows = [
            PositionCount::new(1, [0, 99, 0, 0], 99),
            PositionCount::new(2, [0, 100, 0, 0], 100),
            PositionCount::new(3, [0, 0, 150, 0], 150)
        ];
        let refined = depth_corrected_vote(&rows);
        assert_eq!(refined.sequence(), b"CG");
        assert_eq!(refined.dropped_low_depth(), 1);
    }

    #[test]
    fn test_argmax_and_ties() {
        assert_eq!(PositionCount::new(1, [10, 0, 0, 95], 105).call(), Some(b'T'));
        assert_eq!(PositionCount::new(1, [60, 60, 0, 0], 120).call(), Some(b'A'));
        assert_eq!(PositionCount::new(1, [0, 50, 50, 50], 150).call(), Some(b'C'));
        assert_eq!(PositionCount::new(1, [0, 0, 70, 70], 140).call(), Some(b'G'));
        assert_eq!(PositionCount::new(1, [0, 0, 0, 0], 140).call(), None);
    }

    #[test]
    fn test_ascending_order() {
        let rows = [
            PositionCount::new(3, [0, 0, 0, 200], 200),
            PositionCount::new(1, [200, 0, 0, 0], 200),
            PositionCount::new(2, [0, 200, 0, 0], 200)
        ];
        assert_eq!(depth_corrected_vote(&rows).sequence(), b"ACT");
    }

    #[test]
    fn test_no_call_rows() {
        // all of the depth is deletions
        let rows = [
            PositionCount::new(1, [0, 0, 0, 0], 300),
            PositionCount::new(2, [0, 0, 300, 0], 300)
        ];
        let refined = depth_corrected_vote(&rows);
        assert_eq!(refined.sequence(), b"G");
        assert_eq!(refined.dropped_no_call(), 1);
    }

    #[test]
    fn test_load_fixture() {
        let rows = load_position_counts(Path::new("./tests/pos_counts_001.tsv")).unwrap();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[4], PositionCount::new(5, [40, 0, 0, 55], 95));

        // positions 5 and 8 are below the floor
        let refined = depth_corrected_vote(&rows);
        assert_eq!(refined.sequence(), b"ACGTTT");
        assert_eq!(refined.dropped_low_depth(), 2);
    }

    #[test]
    fn test_load_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.tsv");
        std::fs::write(&path, "Pos\tA\tC\tG\tT\tTotal\n1\t5\tx\t0\t0\t5\n").unwrap();
        let err = load_position_counts(&path).unwrap_err();
        assert!(err.to_string().starts_with("Malformed table"));
    }
}
