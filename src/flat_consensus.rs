/*!
Builds the flat consensus of an organism group: reference fragments are aligned, the per-target consensus fragments are added to that alignment,
and every column is voted on. Columns without enough non-gap support are dropped rather than filled, so the consensus can be shorter than the alignment.

# Example usage
```rust
use flatcon::flat_consensus::FlatConsensus;
use flatcon::voting::CoverageGatedVoter;

let rows = [
    b"ACGT-".to_vec(),
    b"ACGA-".to_vec(),
    b"AC-T-".to_vec()
];
let flat = FlatConsensus::from_alignment("Viridae", &rows, &CoverageGatedVoter::default()).unwrap();
assert_eq!(flat.sequence(), b"ACGT");
assert_eq!(flat.alignment_width(), 5);
```
*/

use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, info};
use simple_error::bail;

use crate::consensus_config::IDENTITY_WINDOW;
use crate::errors::ConsensusError;
use crate::fasta::{read_fasta, write_fasta, write_single, NamedSequence};
use crate::identity_plot::{plot_identity, write_identity_table};
use crate::layout::OrganismLayout;
use crate::organism::OrganismGroup;
use crate::tools::ExternalTools;
use crate::voting::ConsensusVoter;

/// Suffix that separates consensus fragments from the reference records in the alignment
pub const FRAGMENT_SUFFIX: &str = "_CONS";

/// A flattened consensus with its per-position identity track
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatConsensus {
    /// The organism this consensus represents
    organism: String,
    /// The called bases
    sequence: Vec<u8>,
    /// Identity of each called base, same length as `sequence`
    per_position_identity: Vec<f64>,
    /// Number of columns in the source alignment
    alignment_width: usize
}

impl FlatConsensus {
    /// Votes over every column of an alignment.
    /// # Arguments
    /// * `organism` - the organism label
    /// * `rows` - aligned sequences, all the same length
    /// * `voter` - decides each column
    /// # Errors
    /// * if there are no rows or the rows differ in length
    pub fn from_alignment<V: ConsensusVoter + ?Sized>(organism: &str, rows: &[Vec<u8>], voter: &V) -> Result<FlatConsensus, Box<dyn std::error::Error>> {
        if rows.is_empty() {
            bail!("Alignment for {organism} has no sequences");
        }
        let width = rows[0].len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            bail!("Alignment for {organism} has rows of length {width} and {}", bad.len());
        }

        let mut sequence = Vec::with_capacity(width);
        let mut per_position_identity = Vec::with_capacity(width);
        let mut column = vec![0_u8; rows.len()];
        for col_index in 0..width {
            for (slot, row) in column.iter_mut().zip(rows.iter()) {
                *slot = row[col_index];
            }
            if let Some(call) = voter.vote(&column) {
                sequence.push(call.base);
                per_position_identity.push(call.identity);
            }
        }

        debug!("{organism}: {} of {width} columns retained", sequence.len());
        Ok(FlatConsensus {
            organism: organism.to_string(),
            sequence,
            per_position_identity,
            alignment_width: width
        })
    }

    /// Mean identity over all called positions, None if nothing was called
    pub fn mean_identity(&self) -> Option<f64> {
        if self.per_position_identity.is_empty() {
            None
        } else {
            Some(self.per_position_identity.iter().sum::<f64>() / self.per_position_identity.len() as f64)
        }
    }

    /// Name of the record when written to FASTA
    pub fn record_name(&self) -> String {
        format!("{}_consensus", self.organism)
    }

    // Getters
    pub fn organism(&self) -> &str {
        &self.organism
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn per_position_identity(&self) -> &[f64] {
        &self.per_position_identity
    }

    pub fn alignment_width(&self) -> usize {
        self.alignment_width
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Loads an aligned FASTA into rows.
/// # Errors
/// * if the file cannot be read, is empty, or has rows of different lengths
pub fn load_alignment(path: &Path) -> Result<Vec<Vec<u8>>, Box<dyn std::error::Error>> {
    let rows: Vec<Vec<u8>> = read_fasta(path)?
        .into_iter()
        .map(|r| r.sequence)
        .collect();
    if rows.is_empty() {
        return Err(ConsensusError::MalformedAlignment {
            path: path.to_path_buf(),
            reason: "no sequences".to_string()
        }.into());
    }
    let width = rows[0].len();
    if rows.iter().any(|r| r.len() != width) {
        return Err(ConsensusError::MalformedAlignment {
            path: path.to_path_buf(),
            reason: "rows differ in length".to_string()
        }.into());
    }
    Ok(rows)
}

/// The two MSA inputs for a group: distinct reference fragments, and the consensus fragments
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MsaInputs {
    pub references: Vec<NamedSequence>,
    pub fragments: Vec<NamedSequence>
}

/// Collects the MSA inputs for the retained members of a group.
/// Targets without a reference sequence are left out of the reference set; empty fragments are skipped.
/// A target with several fragments gets a numbered label for each one after the first.
/// # Arguments
/// * `group` - the filtered organism group
/// * `reference_lookup` - returns the reference sequence of a target
pub fn assemble_msa_inputs<'r, F>(group: &OrganismGroup, reference_lookup: F) -> MsaInputs
where
    F: Fn(&str) -> Option<&'r [u8]>
{
    let mut inputs = MsaInputs::default();
    let mut seen_references: BTreeSet<Vec<u8>> = BTreeSet::new();
    for target in group.member_ids().iter() {
        match reference_lookup(target) {
            Some(seq) => {
                // identical references would only add weight to the same columns
                if seen_references.insert(seq.to_vec()) {
                    inputs.references.push(NamedSequence::new(target.as_str(), seq.to_vec()));
                }
            },
            None => debug!("{}: no reference sequence for {target}", group.name())
        };
    }

    for member in group.members().iter() {
        for (i, seq) in member.non_empty_sequences().enumerate() {
            let label = if i == 0 {
                format!("{}{FRAGMENT_SUFFIX}", member.target_id())
            } else {
                format!("{}{FRAGMENT_SUFFIX}_{}", member.target_id(), i + 1)
            };
            inputs.fragments.push(NamedSequence::new(label, seq.to_vec()));
        }
    }
    inputs
}

/// Outcome of the flat consensus stage
#[derive(Clone, Debug, PartialEq)]
pub enum FlatOutcome {
    /// A consensus was produced and written
    Built(FlatConsensus),
    /// The alignment ran but no column had enough support
    NoUsableColumns
}

/// Runs the full flat consensus stage for a filtered group and writes its outputs.
/// # Arguments
/// * `group` - the filtered organism group; statistics are recorded on it
/// * `reference_lookup` - returns the reference sequence of a target
/// * `voter` - decides each alignment column
/// * `layout` - this organism's folder
/// * `tools` - external tool layer
/// # Errors
/// * if there are no references to align against, or if any tool or file operation fails
pub fn build_flat_consensus<'r, F, V>(
    group: &mut OrganismGroup,
    reference_lookup: F,
    voter: &V,
    layout: &OrganismLayout,
    tools: &dyn ExternalTools
) -> Result<FlatOutcome, Box<dyn std::error::Error>>
where
    F: Fn(&str) -> Option<&'r [u8]>,
    V: ConsensusVoter + ?Sized
{
    info!("Making consensus alignments for target group: {}", group.name());
    let inputs = assemble_msa_inputs(group, reference_lookup);
    if inputs.references.is_empty() {
        bail!("None of the retained targets of {} have a reference sequence", group.name());
    }
    write_fasta(&layout.flat_references(), &inputs.references)?;
    write_fasta(&layout.flat_fragments(), &inputs.fragments)?;

    // references first, then the fragments get added into that frame
    tools.align_sequences(&layout.flat_references(), &layout.reference_alignment())?;
    let alignment_path = if inputs.fragments.is_empty() {
        debug!("{}: no consensus fragments to add", group.name());
        layout.reference_alignment()
    } else {
        tools.add_fragments(&layout.flat_fragments(), &layout.reference_alignment(), &layout.consensus_alignment())?;
        layout.consensus_alignment()
    };

    let rows = load_alignment(&alignment_path)?;
    let flat = FlatConsensus::from_alignment(group.name(), &rows, voter)?;
    let stats = group.stats_mut();
    stats.record("alignment_width", flat.alignment_width());
    stats.record("flat_consensus_length", flat.sequence().len());
    if flat.is_empty() {
        return Ok(FlatOutcome::NoUsableColumns);
    }
    if let Some(mean) = flat.mean_identity() {
        stats.record("flat_mean_identity", mean);
    }

    write_single(&layout.flat_consensus(), &flat.record_name(), flat.sequence())?;
    write_identity_table(&layout.identity_table(), flat.per_position_identity(), IDENTITY_WINDOW)?;
    plot_identity(&layout.identity_plot(), flat.per_position_identity(), IDENTITY_WINDOW)?;
    Ok(FlatOutcome::Built(flat))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::organism::TargetConsensusFragment;
    use crate::voting::CoverageGatedVoter;

    fn rows(seqs: &[&[u8]]) -> Vec<Vec<u8>> {
        seqs.iter().map(|s| s.to_vec()).collect()
    }

    #[test]
    fn test_two_fragment_tie() {
        // T1 -> Viridae with fragments ACGT and ACGA, column 4 is a tie
        let alignment = rows(&[b"ACGT", b"ACGA"]);
        let voter = CoverageGatedVoter::default();
        let first = FlatConsensus::from_alignment("Viridae", &alignment, &voter).unwrap();
        assert_eq!(first.sequence(), b"ACGA");
        assert_eq!(first.per_position_identity(), &[1.0, 1.0, 1.0, 0.5]);
        for _ in 0..5 {
            assert_eq!(FlatConsensus::from_alignment("Viridae", &alignment, &voter).unwrap(), first);
        }
    }

    #[test]
    fn test_sparse_columns_dropped() {
        // eleven rows; the middle column has a single base (<= 10%) and must vanish
        let mut alignment = vec![b"A-C".to_vec(); 10];
        alignment.push(b"AGC".to_vec());
        let flat = FlatConsensus::from_alignment("Viridae", &alignment, &CoverageGatedVoter::default()).unwrap();
        assert_eq!(flat.sequence(), b"AC");
        assert_eq!(flat.per_position_identity().len(), 2);
        assert!(flat.sequence().len() < flat.alignment_width());
        assert!(!flat.sequence().contains(&b'-'));
    }

    #[test]
    fn test_case_insensitive() {
        let alignment = rows(&[b"acgt", b"ACGT", b"acga"]);
        let flat = FlatConsensus::from_alignment("Viridae", &alignment, &CoverageGatedVoter::default()).unwrap();
        assert_eq!(flat.sequence(), b"ACGT");
    }

    #[test]
    fn test_ragged_alignment() {
        let alignment = rows(&[b"ACGT", b"ACG"]);
        assert!(FlatConsensus::from_alignment("Viridae", &alignment, &CoverageGatedVoter::default()).is_err());
        assert!(FlatConsensus::from_alignment("Viridae", &[], &CoverageGatedVoter::default()).is_err());
    }

    #[test]
    fn test_alignment_fixture() {
        let alignment = load_alignment(Path::new("./tests/consensus_alignment_001.aln")).unwrap();
        assert_eq!(alignment.len(), 4);
        let flat = FlatConsensus::from_alignment("HBV", &alignment, &CoverageGatedVoter::default()).unwrap();
        assert_eq!(flat.alignment_width(), 24);
        assert_eq!(flat.sequence(), b"ACGTTGCAAGCTTGACCTGAAG");
        assert_eq!(flat.mean_identity().unwrap(), (21.0 + 0.75) / 22.0);
    }

    #[test]
    fn test_assemble_msa_inputs() {
        let mut group = OrganismGroup::new("Viridae".to_string());
        group.push(TargetConsensusFragment::new("T1".to_string(), vec![b"ACGT".to_vec(), b"ACGA".to_vec()]));
        group.push(TargetConsensusFragment::new("T2".to_string(), vec![b"".to_vec()]));
        group.push(TargetConsensusFragment::new("T3".to_string(), vec![b"TTTT".to_vec()]));

        let references = [("T1", b"ACGTAA".as_slice()), ("T2", b"ACGTAA".as_slice()), ("T3", b"TTTTGG".as_slice())];
        let lookup = |t: &str| references.iter().find(|(name, _)| *name == t).map(|(_, s)| *s);
        let inputs = assemble_msa_inputs(&group, lookup);

        // T2 has the same reference as T1
        let reference_names: Vec<&str> = inputs.references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(reference_names, vec!["T1", "T3"]);
        let fragment_names: Vec<&str> = inputs.fragments.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(fragment_names, vec!["T1_CONS", "T1_CONS_2", "T3_CONS"]);
    }
}
