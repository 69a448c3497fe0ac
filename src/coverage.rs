/*!
Coverage/quality filtering of an organism group.
The group's per-target alignments are merged, per-target coverage is computed, and only targets that clear both thresholds survive.
*/

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};

use crate::consensus_config::ConsensusConfig;
use crate::errors::ConsensusError;
use crate::layout::{OrganismLayout, RunLayout};
use crate::organism::OrganismGroup;
use crate::tools::ExternalTools;

/// One row of the coverage table
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoverageRecord {
    pub target_id: String,
    pub start: u64,
    pub end: u64,
    pub n_reads: u64,
    pub coverage_bases: u64,
    /// Covered share of the target, in the units emitted by the coverage tool (percent)
    pub coverage_fraction: f64,
    pub mean_depth: f64,
    pub mean_base_quality: f64,
    pub mean_mapping_quality: f64
}

/// Retention thresholds for a target
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageThresholds {
    pub min_coverage_fraction: f64,
    pub min_mean_mapping_quality: f64
}

impl CoverageThresholds {
    /// Returns true if a target clears both thresholds
    pub fn passes(&self, record: &CoverageRecord) -> bool {
        record.coverage_fraction >= self.min_coverage_fraction && record.mean_mapping_quality >= self.min_mean_mapping_quality
    }
}

impl From<&ConsensusConfig> for CoverageThresholds {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            min_coverage_fraction: config.min_coverage_fraction,
            min_mean_mapping_quality: config.min_mean_mapping_quality
        }
    }
}

/// Result of applying the thresholds to a coverage table
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoverageSelection {
    /// Records of member targets that cleared the thresholds, in table order
    pub retained: Vec<CoverageRecord>,
    /// Member targets that failed a threshold
    pub rejected: Vec<String>,
    /// Targets that had reads in the merged alignment without being a member of the group
    pub foreign: Vec<String>
}

impl CoverageSelection {
    pub fn retained_ids(&self) -> BTreeSet<String> {
        self.retained.iter().map(|r| r.target_id.clone()).collect()
    }
}

/// Outcome of the filter stage
#[derive(Clone, Debug, PartialEq)]
pub enum FilterOutcome {
    /// At least one target was retained; the restricted alignment is ready for consensus building
    Retained {
        /// The alignment holding only retained targets
        alignment: PathBuf,
        /// Estimated mapped read pairs
        effective_read_count: u64
    },
    /// Nothing cleared the thresholds, no consensus will be generated
    NoTargetsRetained
}

/// Reads a coverage table as emitted by the coverage tool (tab-separated, '#' header).
/// # Errors
/// * if the file cannot be read or a row does not parse
pub fn load_coverage_table(path: &Path) -> Result<Vec<CoverageRecord>, Box<dyn std::error::Error>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(path)?;
    let mut records = vec![];
    for row in csv_reader.deserialize() {
        let record: CoverageRecord = row.map_err(|e| ConsensusError::MalformedTable {
            path: path.to_path_buf(),
            reason: e.to_string()
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Writes coverage records as a tab-separated table with a header row.
pub fn write_coverage_table(path: &Path, records: &[CoverageRecord]) -> Result<(), Box<dyn std::error::Error>> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;
    for record in records.iter() {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Splits a coverage table into retained, rejected, and foreign targets.
/// Rows for targets outside the group are expected (the merged header lists every target) and skipped,
/// unless they carry reads, in which case they are reported as foreign and excluded.
/// # Arguments
/// * `records` - the full coverage table
/// * `members` - target ids of the group
/// * `thresholds` - the retention thresholds
pub fn select_targets(records: Vec<CoverageRecord>, members: &BTreeSet<String>, thresholds: &CoverageThresholds) -> CoverageSelection {
    let mut selection = CoverageSelection::default();
    for record in records.into_iter() {
        if !members.contains(&record.target_id) {
            if record.n_reads > 0 {
                selection.foreign.push(record.target_id);
            }
            continue;
        }

        if thresholds.passes(&record) {
            selection.retained.push(record);
        } else {
            trace!("Rejected {}: coverage {}, mapq {}", record.target_id, record.coverage_fraction, record.mean_mapping_quality);
            selection.rejected.push(record.target_id);
        }
    }
    selection
}

/// Halves a read count to estimate read pairs, rounding halves to even.
pub fn effective_read_count(alignments: u64) -> u64 {
    let half = alignments / 2;
    if alignments % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

/// Runs the coverage/quality filter over one organism group.
/// On success the group's members are restricted to the retained targets.
/// # Arguments
/// * `group` - the group to filter; members are shrunk in place
/// * `config` - run configuration
/// * `run_layout` - for locating per-target alignments
/// * `layout` - this organism's folder
/// * `tools` - external tool layer
/// # Errors
/// * if an external tool fails or the coverage table is unreadable
pub fn filter_group(
    group: &mut OrganismGroup,
    config: &ConsensusConfig,
    run_layout: &RunLayout,
    layout: &OrganismLayout,
    tools: &dyn ExternalTools
) -> Result<FilterOutcome, Box<dyn std::error::Error>> {
    let member_ids = group.member_ids();
    let alignments: Vec<PathBuf> = member_ids.iter()
        .map(|t| run_layout.target_alignment(t))
        .filter(|p| {
            let exists = p.exists();
            if !exists {
                warn!("{}: no alignment found at {}, target excluded", group.name(), p.display());
            }
            exists
        })
        .collect();

    if alignments.is_empty() {
        info!("No remapped consensus will be generated for {} as none of its targets have alignments", group.name());
        group.retain_targets(BTreeSet::new());
        return Ok(FilterOutcome::NoTargetsRetained);
    }

    tools.merge_alignments(&alignments, &layout.collated_unfiltered())?;
    tools.coverage_table(&layout.collated_unfiltered(), &layout.coverage_raw())?;

    let members: BTreeSet<String> = alignments.iter()
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    let records = load_coverage_table(&layout.coverage_raw())?;
    let selection = select_targets(records, &members, &CoverageThresholds::from(config));
    for target in selection.foreign.iter() {
        warn!("{}: coverage reported reads on {target}, which is not a member; excluded", group.name());
    }
    debug!("{}: {} retained, {} rejected", group.name(), selection.retained.len(), selection.rejected.len());

    write_coverage_table(&layout.coverage_table(), &selection.retained)?;

    let retained = selection.retained_ids();
    group.retain_targets(retained.clone());
    if retained.is_empty() {
        info!("No remapped consensus will be generated for {} as coverage was too low on all target consensuses", group.name());
        return Ok(FilterOutcome::NoTargetsRetained);
    }

    tools.index_alignment(&layout.collated_unfiltered())?;
    let retained: Vec<String> = retained.into_iter().collect();
    tools.extract_targets(&layout.collated_unfiltered(), &retained, &layout.collated())?;

    let read_count = tools.count_reads(&layout.collated(), config.read_count_exclude_flags, config.read_count_min_mapq)?;
    let effective = effective_read_count(read_count);
    let stats = group.stats_mut();
    stats.record("filtered_collated_read_num", effective);
    stats.record("targets_retained", retained.len());

    Ok(FilterOutcome::Retained {
        alignment: layout.collated(),
        effective_read_count: effective
    })
}
