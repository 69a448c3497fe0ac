/*!
Column-wise voting over a multiple-sequence alignment.
The `ConsensusVoter` trait leaves room for alternate voting schemes; `CoverageGatedVoter` is the one used to flatten alignments.

# Example usage
```rust
use flatcon::voting::{ConsensusVoter, CoverageGatedVoter};

let voter = CoverageGatedVoter::default();
let call = voter.vote(b"AAc-").unwrap();
assert_eq!(call.base, b'A');
assert!((call.identity - 2.0 / 3.0).abs() < 1e-12);

// one base out of eleven rows is not enough support
assert!(voter.vote(b"A----------").is_none());
```
*/

use simple_error::bail;

use crate::consensus_config::MIN_NONGAP_FRACTION;

/// Gap symbol emitted by the MSA tool
pub const GAP_SYMBOL: u8 = b'-';

/// The outcome of a vote on a single alignment column
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnCall {
    /// The winning base, upper-cased
    pub base: u8,
    /// Fraction of the non-gap symbols that agree with the winner
    pub identity: f64
}

/// Something that can pick a consensus symbol for one alignment column
pub trait ConsensusVoter {
    /// Returns the call for a column, or None if the column should not contribute to the consensus.
    /// # Arguments
    /// * `column` - the symbols of every aligned sequence at this column, gaps included
    fn vote(&self, column: &[u8]) -> Option<ColumnCall>;
}

/// Majority vote that ignores gaps and drops columns with too little non-gap support.
/// Counting is case-insensitive; ties go to the lowest byte value, i.e. A < C < G < T.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageGatedVoter {
    /// The gap symbol to strip from each column
    gap_symbol: u8,
    /// Columns whose non-gap count is <= this fraction of the column size are dropped
    min_nongap_fraction: f64
}

impl Default for CoverageGatedVoter {
    fn default() -> Self {
        Self {
            gap_symbol: GAP_SYMBOL,
            min_nongap_fraction: MIN_NONGAP_FRACTION
        }
    }
}

impl CoverageGatedVoter {
    /// Constructor with a custom gap symbol and support fraction
    /// # Arguments
    /// * `gap_symbol` - the symbol ignored by the vote
    /// * `min_nongap_fraction` - columns with at most this fraction of non-gap symbols are dropped
    /// # Errors
    /// * if `min_nongap_fraction` is outside [0, 1]
    pub fn new(gap_symbol: u8, min_nongap_fraction: f64) -> Result<CoverageGatedVoter, Box<dyn std::error::Error>> {
        if !(0.0..=1.0).contains(&min_nongap_fraction) {
            bail!("min_nongap_fraction must be in [0, 1], got {min_nongap_fraction}");
        }
        Ok(CoverageGatedVoter {
            gap_symbol,
            min_nongap_fraction
        })
    }

    /// The support fraction a column must exceed
    pub fn min_nongap_fraction(&self) -> f64 {
        self.min_nongap_fraction
    }
}

impl ConsensusVoter for CoverageGatedVoter {
    fn vote(&self, column: &[u8]) -> Option<ColumnCall> {
        let mut counts = [0_usize; 256];
        let mut nongap: usize = 0;
        for &symbol in column.iter() {
            if symbol == self.gap_symbol {
                continue;
            }
            counts[symbol.to_ascii_uppercase() as usize] += 1;
            nongap += 1;
        }

        if nongap == 0 || (nongap as f64) <= self.min_nongap_fraction * column.len() as f64 {
            return None;
        }

        // strictly greater keeps the first (lowest) symbol on a tie
        let mut best_symbol = 0_usize;
        let mut best_count = 0_usize;
        for (symbol, &count) in counts.iter().enumerate() {
            if count > best_count {
                best_symbol = symbol;
                best_count = count;
            }
        }

        Some(ColumnCall {
            base: best_symbol as u8,
            identity: best_count as f64 / nongap as f64
        })
    }
}
