/*!
Remap-and-refine: the filtered reads are re-aligned against the flat consensus and a depth-corrected vote replaces the provisional call.
*/

use std::path::Path;

use log::{debug, info};

use crate::consensus_config::ConsensusConfig;
use crate::depth_correct::{depth_corrected_vote, load_position_counts, RefinedConsensus};
use crate::fasta::write_single;
use crate::layout::OrganismLayout;
use crate::organism::OrganismGroup;
use crate::tools::ExternalTools;

/// Outcome of the remap-and-refine stage
#[derive(Clone, Debug, PartialEq)]
pub enum RemapOutcome {
    /// The refined consensus was written
    Refined(RefinedConsensus),
    /// No position had enough depth to call; nothing was written
    NoCallablePositions
}

/// Removes the short-read aligner index files that sit next to `fasta` (`<fasta>.*`).
/// Returns the number of files removed.
pub fn remove_aligner_index(fasta: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let (Some(dir), Some(name)) = (fasta.parent(), fasta.file_name()) else {
        return Ok(0);
    };
    let prefix = format!("{}.", name.to_string_lossy());
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_index = path.file_name()
            .map(|n| n.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if is_index && path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Runs remap-and-refine for a group whose flat consensus has been written.
/// # Arguments
/// * `group` - the organism group; statistics are recorded on it
/// * `config` - run configuration, for the depth passed to the count generator
/// * `layout` - this organism's folder
/// * `tools` - external tool layer
/// # Errors
/// * if any tool fails or the position-count table cannot be parsed
pub fn remap_and_refine(
    group: &mut OrganismGroup,
    config: &ConsensusConfig,
    layout: &OrganismLayout,
    tools: &dyn ExternalTools
) -> Result<RemapOutcome, Box<dyn std::error::Error>> {
    info!("Remapping reads to flat consensus for {}", group.name());
    let reference = layout.flat_consensus();
    tools.build_aligner_index(&reference)?;
    tools.remap_with_counts(
        &layout.collated(),
        &reference,
        &layout.remap_provisional(),
        &layout.remap_position_counts(),
        Some(config.target_min_depth)
    )?;

    let rows = load_position_counts(&layout.remap_position_counts())?;
    let refined = depth_corrected_vote(&rows);
    let removed = remove_aligner_index(&reference)?;
    debug!("{}: removed {removed} index files", group.name());

    let stats = group.stats_mut();
    stats.record("refined_consensus_length", refined.sequence().len());
    stats.record("refined_positions_dropped", refined.dropped_low_depth() + refined.dropped_no_call());
    if refined.is_empty() {
        info!("{}: no position of the remapped consensus has enough depth", group.name());
        return Ok(RemapOutcome::NoCallablePositions);
    }

    write_single(&layout.remapped_consensus(), &format!("{}_remapped_consensus", group.name()), refined.sequence())?;
    Ok(RemapOutcome::Refined(refined))
}
