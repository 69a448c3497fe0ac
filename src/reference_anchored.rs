/*!
Optional reference-anchored consensus: when a ground-truth FASTA is supplied, the filtered reads are remapped against the matching ground-truth record
and refined with the same depth-corrected vote as the flat-consensus path.
*/

use log::{info, warn};

use crate::consensus_config::ConsensusConfig;
use crate::depth_correct::{depth_corrected_vote, load_position_counts};
use crate::fasta::{read_fasta, write_single, NamedSequence};
use crate::layout::OrganismLayout;
use crate::organism::OrganismGroup;
use crate::remap::remove_aligner_index;
use crate::tools::ExternalTools;

/// Outcome of the reference-anchored stage
#[derive(Clone, Debug, PartialEq)]
pub enum AnchoredOutcome {
    /// The reference-adjusted consensus was written, with this length
    Built(usize),
    /// The stage did not run, for the given reason
    Skipped(String)
}

/// Picks the ground-truth record for an organism: the first record whose name mentions the organism,
/// otherwise the first one that mentions the sample.
pub fn select_ground_truth<'a>(records: &'a [NamedSequence], organism: &str, sample_name: &str) -> Option<&'a NamedSequence> {
    records.iter()
        .find(|r| r.name.contains(organism))
        .or_else(|| {
            if sample_name.is_empty() {
                None
            } else {
                records.iter().find(|r| r.name.contains(sample_name))
            }
        })
}

/// Runs the reference-anchored path for one group, if its preconditions hold.
/// # Arguments
/// * `group` - the organism group; statistics are recorded on it
/// * `config` - run configuration holding the optional ground-truth FASTA
/// * `layout` - this organism's folder
/// * `tools` - external tool layer
/// # Errors
/// * if a precondition holds but a tool or file operation then fails
pub fn build_reference_anchored(
    group: &mut OrganismGroup,
    config: &ConsensusConfig,
    layout: &OrganismLayout,
    tools: &dyn ExternalTools
) -> Result<AnchoredOutcome, Box<dyn std::error::Error>> {
    let ground_truth = match config.ground_truth_fasta.as_deref() {
        Some(p) if p.exists() => p,
        Some(p) => return Ok(skip(group, format!("ground truth {} does not exist", p.display()))),
        None => return Ok(AnchoredOutcome::Skipped("no ground truth configured".to_string()))
    };
    if !layout.collated().exists() {
        return Ok(skip(group, "no filtered alignment".to_string()));
    }

    let records = read_fasta(ground_truth)?;
    let Some(record) = select_ground_truth(&records, group.name(), &config.sample_name) else {
        return Ok(skip(group, format!("no ground truth record for {} in {}", group.name(), ground_truth.display())));
    };

    info!("Building reference-adjusted consensus for {} from {}", group.name(), record.name);
    std::fs::create_dir_all(layout.temp_dir())?;
    let reference = layout.temp_reference();
    write_single(&reference, &record.name, &record.sequence)?;
    tools.build_aligner_index(&reference)?;
    tools.remap_with_counts(
        &layout.collated(),
        &reference,
        &layout.ref_adjusted_provisional(),
        &layout.ref_adjusted_position_counts(),
        None
    )?;

    let rows = load_position_counts(&layout.ref_adjusted_position_counts())?;
    let refined = depth_corrected_vote(&rows);
    remove_aligner_index(&reference)?;

    group.stats_mut().record("ref_anchored_consensus_length", refined.sequence().len());
    if refined.is_empty() {
        return Ok(skip(group, "no position has enough depth".to_string()));
    }
    write_single(&layout.ref_adjusted_consensus(), &format!("{}_ref_adjusted_consensus", group.name()), refined.sequence())?;
    Ok(AnchoredOutcome::Built(refined.sequence().len()))
}

fn skip(group: &OrganismGroup, reason: String) -> AnchoredOutcome {
    warn!("Skipping reference-adjusted consensus for {}: {reason}", group.name());
    AnchoredOutcome::Skipped(reason)
}
