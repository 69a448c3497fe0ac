/*!
Contains the run configuration for the consensus aggregation engine.
Typical usage is to the use the builder to construct the config, e.g.
```
use flatcon::consensus_config::{ConsensusConfig, ConsensusConfigBuilder};
let config: ConsensusConfig = ConsensusConfigBuilder::default()
    .experiment_dir("experiments/run_01".into())
    .sample_name("sample_01".to_string())
    .min_coverage_fraction(50.0)
    .build()
    .unwrap();
assert_eq!(config.min_mean_mapping_quality, 20.0);
```
*/

use std::path::PathBuf;

/// Columns with a non-gap fraction at or below this value do not contribute to a flat consensus.
pub const MIN_NONGAP_FRACTION: f64 = 0.1;
/// Position-count rows with a total at or below this value are dropped from a refined consensus.
pub const DEPTH_FLOOR: u64 = 99;
/// Window size for the rolling identity curve of a flat consensus.
pub const IDENTITY_WINDOW: usize = 120;
/// Organism label for targets missing from the probe aggregation table.
pub const UNMATCHED_ORGANISM: &str = "Unmatched";
/// Delimiter used when joining all consensus fragments of one target into a single field.
pub const FRAGMENT_DELIMITER: &str = ", ";

/// Locations of the external binaries; bare names get resolved from `PATH`.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolPaths {
    pub samtools: PathBuf,
    pub bwa_mem2: PathBuf,
    pub mafft: PathBuf,
    pub viral_consensus: PathBuf
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            samtools: PathBuf::from("samtools"),
            bwa_mem2: PathBuf::from("bwa-mem2"),
            mafft: PathBuf::from("mafft"),
            viral_consensus: PathBuf::from("viral_consensus")
        }
    }
}

/**
Immutable configuration shared by every stage of a run.
Typical usage is to the use the builder to construct the config, e.g.
```
use flatcon::consensus_config::{ConsensusConfig, ConsensusConfigBuilder};
let config: ConsensusConfig = ConsensusConfigBuilder::default()
    .experiment_dir("experiments/run_01".into())
    .tidy(false)
    .build()
    .unwrap();
assert_eq!(config.probe_table(), std::path::PathBuf::from("experiments/run_01/probe_aggregation.csv"));
```
*/
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(default)]
pub struct ConsensusConfig {
    /// Experiment folder containing `grouped_reads/`, the sample alignment, and receiving `consensus_data/`
    pub experiment_dir: PathBuf,
    /// Sample name; the master alignment is `<experiment_dir>/<sample_name>.bam`
    pub sample_name: String,
    /// Reference FASTA holding one record per capture target
    pub reference_fasta: PathBuf,
    /// Probe aggregation table, if None then `<experiment_dir>/probe_aggregation.csv`
    pub probe_table: Option<PathBuf>,
    /// Optional ground-truth FASTA used by the reference-anchored consensus
    pub ground_truth_fasta: Option<PathBuf>,
    /// Minimum coverage (as reported by the coverage tool, percent of target covered) to retain a target
    pub min_coverage_fraction: f64,
    /// Minimum mean mapping quality to retain a target
    pub min_mean_mapping_quality: f64,
    /// Minimum depth passed to the per-target and remap consensus callers
    pub target_min_depth: u32,
    /// Minimum fraction of agreeing reads for the per-target consensus caller
    pub target_call_fraction: f64,
    /// Mapping quality floor when estimating the effective mapped-read count
    pub read_count_min_mapq: u8,
    /// SAM flags excluded when estimating the effective mapped-read count
    pub read_count_exclude_flags: u16,
    /// Threads handed to the short-read aligner
    pub aligner_threads: usize,
    /// Threads handed to the MSA tool
    pub msa_threads: usize,
    /// Number of organism groups processed concurrently
    pub workers: usize,
    /// If true, intermediate files are removed once a group completes
    pub tidy: bool,
    /// External binaries
    pub tools: ToolPaths
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            experiment_dir: PathBuf::from("."),
            sample_name: String::new(),
            reference_fasta: PathBuf::from("references.fasta"),
            probe_table: None,
            ground_truth_fasta: None,
            min_coverage_fraction: 30.0,
            min_mean_mapping_quality: 20.0,
            target_min_depth: 10,
            target_call_fraction: 0.9,
            // unmapped, secondary, duplicate, supplementary
            read_count_min_mapq: 20,
            read_count_exclude_flags: 0xD04,
            aligner_threads: 4,
            msa_threads: 4,
            workers: 1,
            tidy: true,
            tools: Default::default()
        }
    }
}

impl ConsensusConfig {
    /// Returns the probe aggregation table path, falling back to the experiment default.
    pub fn probe_table(&self) -> PathBuf {
        match self.probe_table.as_ref() {
            Some(p) => p.clone(),
            None => self.experiment_dir.join("probe_aggregation.csv")
        }
    }

    /// Path to the sample-wide alignment that every per-target alignment is extracted from.
    pub fn master_alignment(&self) -> PathBuf {
        self.experiment_dir.join(format!("{}.bam", self.sample_name))
    }
}
