use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use flatcon::consensus_config::{ConsensusConfig, ConsensusConfigBuilder, ToolPaths};
use flatcon::pipeline::ConsensusRun;
use flatcon::tools::CommandLineTools;

/// Builds flat, depth-refined and reference-anchored consensus sequences per organism from a targeted capture experiment
#[derive(Parser, Debug)]
#[command(name = "flatcon", version, about)]
struct Cli {
    /// Experiment folder holding `grouped_reads/` and the sample alignment
    #[arg(short, long, value_name = "DIR")]
    experiment_dir: PathBuf,

    /// Sample name; the sample alignment is `<experiment_dir>/<sample>.bam`
    #[arg(short, long)]
    sample: String,

    /// Reference FASTA with one record per capture target
    #[arg(short, long, value_name = "FASTA")]
    reference: PathBuf,

    /// Probe aggregation CSV (target_id, probetype); defaults to `<experiment_dir>/probe_aggregation.csv`
    #[arg(short, long, value_name = "CSV")]
    probe_table: Option<PathBuf>,

    /// Ground-truth FASTA; enables the reference-adjusted consensus
    #[arg(short, long, value_name = "FASTA")]
    ground_truth: Option<PathBuf>,

    /// Minimum percent of a target covered by reads to keep it
    #[arg(long, default_value_t = 30.0, help_heading = "Filtering")]
    min_coverage: f64,

    /// Minimum mean mapping quality to keep a target
    #[arg(long, default_value_t = 20.0, help_heading = "Filtering")]
    min_mapq: f64,

    /// Minimum depth for the per-target and remapped consensus calls
    #[arg(long, default_value_t = 10, help_heading = "Filtering")]
    min_depth: u32,

    /// Threads for each short-read alignment
    #[arg(long, default_value_t = 4, help_heading = "Resources")]
    aligner_threads: usize,

    /// Threads for each multiple sequence alignment
    #[arg(long, default_value_t = 4, help_heading = "Resources")]
    msa_threads: usize,

    /// Organisms processed at the same time
    #[arg(short, long, default_value_t = 1, help_heading = "Resources")]
    workers: usize,

    /// Keep intermediate files
    #[arg(long)]
    no_tidy: bool,

    /// samtools binary
    #[arg(long, default_value = "samtools", help_heading = "Tools")]
    samtools: PathBuf,

    /// bwa-mem2 binary
    #[arg(long, default_value = "bwa-mem2", help_heading = "Tools")]
    bwa_mem2: PathBuf,

    /// mafft binary
    #[arg(long, default_value = "mafft", help_heading = "Tools")]
    mafft: PathBuf,

    /// viral_consensus binary
    #[arg(long, default_value = "viral_consensus", help_heading = "Tools")]
    viral_consensus: PathBuf
}

impl Cli {
    fn config(&self) -> Result<ConsensusConfig, Box<dyn std::error::Error>> {
        let config = ConsensusConfigBuilder::default()
            .experiment_dir(self.experiment_dir.clone())
            .sample_name(self.sample.clone())
            .reference_fasta(self.reference.clone())
            .probe_table(self.probe_table.clone())
            .ground_truth_fasta(self.ground_truth.clone())
            .min_coverage_fraction(self.min_coverage)
            .min_mean_mapping_quality(self.min_mapq)
            .target_min_depth(self.min_depth)
            .aligner_threads(self.aligner_threads)
            .msa_threads(self.msa_threads)
            .workers(self.workers)
            .tidy(!self.no_tidy)
            .tools(ToolPaths {
                samtools: self.samtools.clone(),
                bwa_mem2: self.bwa_mem2.clone(),
                mafft: self.mafft.clone(),
                viral_consensus: self.viral_consensus.clone()
            })
            .build()?;
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = cli.config()?;
    let tools = CommandLineTools::new(&config.tools, config.aligner_threads, config.msa_threads)?;
    let summary = ConsensusRun::new(&config, &tools).run()?;
    Ok(summary.is_success())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    info!("flatcon {}", env!("CARGO_PKG_VERSION"));

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("At least one organism failed, see the log above");
            ExitCode::FAILURE
        },
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
