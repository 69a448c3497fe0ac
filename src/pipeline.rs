/*!
Run controller: prepares every target, groups the per-target consensuses by organism, then runs each organism through
filter, flat consensus, remap-and-refine and the reference-anchored path.
Organisms are processed in parallel and a failure in one never stops the others.
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;

use crate::collector::TargetConsensusCollector;
use crate::consensus_config::ConsensusConfig;
use crate::coverage::{filter_group, FilterOutcome};
use crate::fasta::read_fasta;
use crate::flat_consensus::{build_flat_consensus, FlatOutcome};
use crate::layout::{OrganismLayout, RunLayout};
use crate::organism::{OrganismGroup, OrganismStats};
use crate::probe_resolver::ProbeAggregationTable;
use crate::reference_anchored::{build_reference_anchored, AnchoredOutcome};
use crate::remap::{remap_and_refine, remove_aligner_index, RemapOutcome};
use crate::tools::ExternalTools;
use crate::voting::CoverageGatedVoter;

/// Final state of one organism
#[derive(Clone, Debug, PartialEq)]
pub enum OrganismOutcome {
    /// Every stage ran; the flags say which consensus files were produced
    Completed {
        flat: bool,
        refined: bool,
        reference_anchored: bool
    },
    /// The coverage filter retained nothing, so no consensus was attempted
    NoTargetsRetained,
    /// A hard failure, with the error that caused it
    Failed(String)
}

impl std::fmt::Display for OrganismOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrganismOutcome::Completed { flat, refined, reference_anchored } => {
                let produced: Vec<&str> = [(flat, "flat"), (refined, "refined"), (reference_anchored, "reference-anchored")]
                    .into_iter()
                    .filter_map(|(&made, label)| if made { Some(label) } else { None })
                    .collect();
                if produced.is_empty() {
                    write!(f, "completed (no usable consensus)")
                } else {
                    write!(f, "completed ({})", produced.join(", "))
                }
            },
            OrganismOutcome::NoTargetsRetained => write!(f, "no targets retained"),
            OrganismOutcome::Failed(reason) => write!(f, "failed: {reason}")
        }
    }
}

/// Outcome of one organism, by name
#[derive(Clone, Debug, PartialEq)]
pub struct OrganismReport {
    pub organism: String,
    pub outcome: OrganismOutcome
}

/// Everything a run produced, for reporting
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// One report per organism, sorted by organism
    reports: Vec<OrganismReport>,
    /// Statistics keyed by organism
    stats: BTreeMap<String, OrganismStats>
}

impl RunSummary {
    /// Number of organisms that failed
    pub fn failures(&self) -> usize {
        self.reports.iter()
            .filter(|r| matches!(r.outcome, OrganismOutcome::Failed(_)))
            .count()
    }

    /// True if no organism failed
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    /// Returns the report for an organism
    pub fn report(&self, organism: &str) -> Option<&OrganismReport> {
        self.reports.iter().find(|r| r.organism == organism)
    }

    pub fn reports(&self) -> &[OrganismReport] {
        &self.reports
    }

    pub fn stats(&self) -> &BTreeMap<String, OrganismStats> {
        &self.stats
    }
}

/// Drives a full run over one experiment folder
pub struct ConsensusRun<'a> {
    /// Run configuration
    config: &'a ConsensusConfig,
    /// External tool layer
    tools: &'a dyn ExternalTools,
    /// Experiment folder layout
    layout: RunLayout
}

impl<'a> ConsensusRun<'a> {
    /// Constructor
    pub fn new(config: &'a ConsensusConfig, tools: &'a dyn ExternalTools) -> ConsensusRun<'a> {
        ConsensusRun {
            config,
            tools,
            layout: RunLayout::new(&config.experiment_dir)
        }
    }

    /// Runs every stage for every organism.
    /// # Errors
    /// * if the inputs shared by all organisms cannot be loaded, or the sample alignment cannot be indexed
    /// * per-organism failures are reported in the summary instead
    pub fn run(&self) -> Result<RunSummary, Box<dyn std::error::Error>> {
        let table = ProbeAggregationTable::from_csv(&self.config.probe_table())?;
        let references = load_references(&self.config.reference_fasta)?;
        let targets = self.discover_targets()?;
        info!("Found {} targets, {} references, {} table entries", targets.len(), references.len(), table.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()?;

        let extracted = self.config.master_alignment().exists();
        if extracted {
            self.tools.index_alignment(&self.config.master_alignment())?;
        } else {
            warn!("No sample alignment at {}, using existing per-target alignments", self.config.master_alignment().display());
        }

        // per-target failures become failures of the organism the target belongs to
        let target_failures: Vec<(String, String)> = pool.install(|| {
            targets.par_iter()
                .filter_map(|t| {
                    self.prepare_target(t, extracted).err()
                        .map(|e| (t.clone(), e.to_string()))
                })
                .collect()
        });
        let mut failed_organisms: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (target, reason) in target_failures.into_iter() {
            error!("Target {target} failed: {reason}");
            failed_organisms.entry(table.resolve(&target).to_string())
                .or_default()
                .push(format!("{target}: {reason}"));
        }

        let mut collector = TargetConsensusCollector::new(&table);
        for target in targets.iter() {
            if let Err(e) = collector.collect_file(target, &self.layout.target_consensus(target)) {
                error!("Could not read the consensus of {target}: {e}");
                failed_organisms.entry(table.resolve(target).to_string())
                    .or_default()
                    .push(format!("{target}: {e}"));
            }
        }
        info!("Collected target consensuses into {} organism groups", collector.len());

        let mut reports: Vec<OrganismReport> = vec![];
        let mut runnable = vec![];
        for group in collector.into_groups().into_iter() {
            match failed_organisms.remove(group.name()) {
                Some(reasons) => reports.push(OrganismReport {
                    organism: group.name().to_string(),
                    outcome: OrganismOutcome::Failed(reasons.join("; "))
                }),
                None => runnable.push(group)
            };
        }
        // organisms whose only targets failed before producing anything
        for (organism, reasons) in failed_organisms.into_iter() {
            reports.push(OrganismReport {
                organism,
                outcome: OrganismOutcome::Failed(reasons.join("; "))
            });
        }

        let results: Vec<(OrganismReport, OrganismStats)> = pool.install(|| {
            runnable.into_par_iter()
                .map(|group| self.process_group(group, &references))
                .collect()
        });
        let mut stats = BTreeMap::new();
        for (report, organism_stats) in results.into_iter() {
            stats.insert(report.organism.clone(), organism_stats);
            reports.push(report);
        }
        reports.sort_by(|a, b| a.organism.cmp(&b.organism));

        if self.config.tidy && extracted {
            tidy_targets(&self.layout, &targets)?;
        }

        for report in reports.iter() {
            info!("{}: {}", report.organism, report.outcome);
        }
        let summary = RunSummary { reports, stats };
        info!("Finished {} organisms, {} failed", summary.reports().len(), summary.failures());
        Ok(summary)
    }

    /// Lists the per-target folders under `grouped_reads/`, sorted
    fn discover_targets(&self) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let grouped = self.layout.grouped_reads_dir();
        if !grouped.is_dir() {
            bail!("Missing target folder: {}", grouped.display());
        }
        let mut targets = vec![];
        for entry in std::fs::read_dir(&grouped)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                targets.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        targets.sort();
        Ok(targets)
    }

    /// Extracts a target's reads (if a sample alignment is available) and calls its consensus
    fn prepare_target(&self, target: &str, extract: bool) -> Result<(), Box<dyn std::error::Error>> {
        let alignment = self.layout.target_alignment(target);
        if extract {
            self.tools.extract_targets(&self.config.master_alignment(), &[target.to_string()], &alignment)?;
        } else if !alignment.exists() {
            debug!("No alignment for {target}");
            return Ok(());
        }
        self.tools.call_target_consensus(
            &alignment,
            &self.layout.target_consensus(target),
            self.config.target_min_depth,
            self.config.target_call_fraction
        )?;
        Ok(())
    }

    /// Runs one organism end to end; never fails, errors are folded into the report
    fn process_group(&self, mut group: OrganismGroup, references: &HashMap<String, Vec<u8>>) -> (OrganismReport, OrganismStats) {
        let layout = self.layout.organism(group.dir_name());
        let outcome = match self.run_stages(&mut group, &layout, references) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} failed: {e}", group.name());
                OrganismOutcome::Failed(e.to_string())
            }
        };

        // intermediates of a failed organism are left in place for inspection
        if self.config.tidy && !matches!(outcome, OrganismOutcome::Failed(_)) {
            if let Err(e) = tidy_organism(&layout) {
                warn!("Could not tidy {}: {e}", layout.dir().display());
            }
        }

        let report = OrganismReport {
            organism: group.name().to_string(),
            outcome
        };
        (report, group.stats().clone())
    }

    fn run_stages(&self, group: &mut OrganismGroup, layout: &OrganismLayout, references: &HashMap<String, Vec<u8>>) -> Result<OrganismOutcome, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(layout.dir())?;
        let collected = group.member_ids().len();
        group.stats_mut().record("targets_collected", collected);

        if let FilterOutcome::NoTargetsRetained = filter_group(group, self.config, &self.layout, layout, self.tools)? {
            group.stats_mut().record("targets_retained", 0);
            write_stats(&layout.stats(), group.stats())?;
            return Ok(OrganismOutcome::NoTargetsRetained);
        }

        let voter = CoverageGatedVoter::default();
        let lookup = |target: &str| references.get(target).map(|s| s.as_slice());
        let flat = match build_flat_consensus(group, lookup, &voter, layout, self.tools)? {
            FlatOutcome::Built(_) => true,
            FlatOutcome::NoUsableColumns => {
                info!("No flat consensus for {}: no alignment column had enough support", group.name());
                false
            }
        };

        let refined = flat && matches!(remap_and_refine(group, self.config, layout, self.tools)?, RemapOutcome::Refined(_));
        let reference_anchored = matches!(build_reference_anchored(group, self.config, layout, self.tools)?, AnchoredOutcome::Built(_));

        write_stats(&layout.stats(), group.stats())?;
        Ok(OrganismOutcome::Completed { flat, refined, reference_anchored })
    }
}

/// Loads the target reference sequences, keyed by record name
pub fn load_references(path: &Path) -> Result<HashMap<String, Vec<u8>>, Box<dyn std::error::Error>> {
    let mut references: HashMap<String, Vec<u8>> = Default::default();
    for record in read_fasta(path)?.into_iter() {
        if references.insert(record.name.clone(), record.sequence).is_some() {
            warn!("Duplicate reference {} in {}, keeping the last one", record.name, path.display());
        }
    }
    Ok(references)
}

/// Writes an organism's statistics as a JSON object
pub fn write_stats(path: &Path, stats: &OrganismStats) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, stats)?;
    writer.flush()?;
    Ok(())
}

/// Removes the intermediate files and temp folder of an organism, leaving its final outputs
pub fn tidy_organism(layout: &OrganismLayout) -> Result<(), Box<dyn std::error::Error>> {
    let mut removed = 0;
    for path in layout.intermediates().into_iter() {
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    removed += remove_aligner_index(&layout.flat_consensus())?;
    if layout.temp_dir().is_dir() {
        std::fs::remove_dir_all(layout.temp_dir())?;
        removed += 1;
    }
    debug!("Tidied {}: {removed} entries removed", layout.dir().display());
    Ok(())
}

/// Removes the per-target alignments extracted during this run
pub fn tidy_targets(layout: &RunLayout, targets: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    for target in targets.iter() {
        let alignment = layout.target_alignment(target);
        let mut index = alignment.clone().into_os_string();
        index.push(".bai");
        for path in [alignment, index.into()] {
            if path.is_file() {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use crate::consensus_config::ConsensusConfigBuilder;
    use crate::fasta::{write_fasta, NamedSequence};
    use crate::tools::scripted::ScriptedTools;

    const TARGETS: [&str; 5] = ["HBV_gtA_1", "HBV_gtA_2", "HBV_gtC_1", "SARS2_orf1ab_3", "SARS2_spike_7"];

    /// Lays out an experiment folder with a sample alignment and one folder per target
    fn experiment(root: &Path) -> PathBuf {
        let exp = root.join("exp");
        for target in TARGETS.iter() {
            std::fs::create_dir_all(exp.join("grouped_reads").join(target)).unwrap();
        }
        std::fs::copy("./tests/probe_aggregation.csv", exp.join("probe_aggregation.csv")).unwrap();
        std::fs::write(exp.join("sample_01.bam"), "bam").unwrap();
        let references: Vec<NamedSequence> = TARGETS.iter()
            .map(|t| NamedSequence::new(*t, b"ACGTTGCAAGCTTGACCTGAAG".to_vec()))
            .collect();
        write_fasta(&exp.join("references.fasta"), &references).unwrap();
        exp
    }

    fn config(exp: &Path, min_coverage_fraction: f64, tidy: bool) -> ConsensusConfig {
        ConsensusConfigBuilder::default()
            .experiment_dir(exp.to_path_buf())
            .sample_name("sample_01".to_string())
            .reference_fasta(exp.join("references.fasta"))
            .min_coverage_fraction(min_coverage_fraction)
            .workers(2)
            .tidy(tidy)
            .build()
            .unwrap()
    }

    fn scripted_tools() -> ScriptedTools {
        let mut tools = ScriptedTools::new();
        for (target, seq) in [("HBV_gtA_1", "ACGTTGCAAGCTTGACCTGAAG"), ("HBV_gtC_1", "TTGCAAGCTTGACCTG"), ("SARS2_spike_7", "GCAAGCTTGA")] {
            tools.target_consensus.insert(target.to_string(), seq.to_string());
        }
        tools
    }

    #[test_log::test]
    fn test_empty_result_and_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        // 50% coverage removes the only SARS-CoV-2 target with a consensus
        let config = config(&exp, 50.0, false);
        let tools = scripted_tools();
        let summary = ConsensusRun::new(&config, &tools).run().unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.reports().len(), 2);
        assert_eq!(summary.report("HBV").unwrap().outcome, OrganismOutcome::Completed { flat: true, refined: true, reference_anchored: false });
        assert_eq!(summary.report("SARS-CoV-2").unwrap().outcome, OrganismOutcome::NoTargetsRetained);

        let layout = RunLayout::new(&exp);
        let hbv = layout.organism("HBV");
        let flat = read_fasta(&hbv.flat_consensus()).unwrap();
        assert_eq!(flat, vec![NamedSequence::new("HBV_consensus", b"ACGTTGCAAGCTTGACCTGAAG".to_vec())]);
        let refined = read_fasta(&hbv.remapped_consensus()).unwrap();
        assert_eq!(refined[0].sequence, b"ACGTTT");
        assert!(hbv.identity_plot().exists());
        assert!(hbv.identity_table().exists());

        // the filter kept gtA_1 only; gtC_1 fails mapping quality
        let text = std::fs::read_to_string(hbv.coverage_table()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("HBV_gtA_1\t"));

        let stats = &summary.stats()["HBV"];
        assert_eq!(stats.get("targets_collected"), Some(&serde_json::json!(2)));
        assert_eq!(stats.get("targets_retained"), Some(&serde_json::json!(1)));
        assert_eq!(stats.get("filtered_collated_read_num"), Some(&serde_json::json!(812)));
        assert_eq!(stats.get("flat_consensus_length"), Some(&serde_json::json!(22)));
        assert_eq!(stats.get("refined_consensus_length"), Some(&serde_json::json!(6)));
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(hbv.stats()).unwrap()).unwrap();
        assert_eq!(written["alignment_width"], serde_json::json!(24));

        // nothing downstream of the filter exists for the empty organism
        let sars = layout.organism("SARS-CoV-2");
        assert!(sars.coverage_table().exists());
        assert!(!sars.flat_consensus().exists());
        assert!(!sars.remapped_consensus().exists());
        assert!(!sars.ref_adjusted_consensus().exists());
        assert!(!tools.calls().iter().any(|c| c.starts_with("align_sequences") && c.contains("SARS-CoV-2")));
    }

    #[test_log::test]
    fn test_failure_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        let config = config(&exp, 30.0, false);
        let mut tools = scripted_tools();
        tools.fail_on = Some(("add_fragments".to_string(), "consensus_data/HBV/".to_string()));
        let summary = ConsensusRun::new(&config, &tools).run().unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.failures(), 1);
        match &summary.report("HBV").unwrap().outcome {
            OrganismOutcome::Failed(reason) => assert!(reason.contains("add_fragments")),
            other => panic!("unexpected outcome {other:?}")
        };
        // SARS2_spike_7 clears 30% coverage, so this organism runs to completion
        assert_eq!(summary.report("SARS-CoV-2").unwrap().outcome, OrganismOutcome::Completed { flat: true, refined: true, reference_anchored: false });

        let layout = RunLayout::new(&exp);
        assert!(!layout.organism("HBV").flat_consensus().exists());
        assert!(layout.organism("SARS-CoV-2").remapped_consensus().exists());
    }

    #[test_log::test]
    fn test_colliding_labels_get_separate_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        std::fs::write(exp.join("probe_aggregation.csv"), "target_id,probetype\n\
            HBV_gtA_1,Hepatitis B/virus\n\
            HBV_gtA_2,Hepatitis B/virus\n\
            HBV_gtC_1,Hepatitis B/virus\n\
            SARS2_orf1ab_3,Hepatitis B_virus\n\
            SARS2_spike_7,Hepatitis B_virus\n").unwrap();
        let config = config(&exp, 30.0, false);
        let tools = scripted_tools();
        let summary = ConsensusRun::new(&config, &tools).run().unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.reports().len(), 2);
        for organism in ["Hepatitis B/virus", "Hepatitis B_virus"] {
            assert!(matches!(summary.report(organism).unwrap().outcome, OrganismOutcome::Completed { flat: true, .. }));
        }

        // labels are sorted, so the '/' label keeps the plain folder name
        let layout = RunLayout::new(&exp);
        let first = layout.organism("Hepatitis_B_virus");
        let second = layout.organism("Hepatitis_B_virus_2");
        assert_ne!(first.dir(), second.dir());
        for (organism_layout, collected) in [(&first, 2), (&second, 1)] {
            assert!(organism_layout.flat_consensus().exists());
            assert!(organism_layout.remapped_consensus().exists());
            let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(organism_layout.stats()).unwrap()).unwrap();
            assert_eq!(written["targets_collected"], serde_json::json!(collected));
        }
    }

    #[test]
    fn test_target_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        let config = config(&exp, 30.0, false);
        let mut tools = scripted_tools();
        tools.fail_on = Some(("call_target_consensus".to_string(), "SARS2_spike_7".to_string()));
        let summary = ConsensusRun::new(&config, &tools).run().unwrap();

        // the failing target had no output, so SARS-CoV-2 is reported without ever forming a group
        assert_eq!(summary.failures(), 1);
        assert!(matches!(summary.report("SARS-CoV-2").unwrap().outcome, OrganismOutcome::Failed(_)));
        assert!(matches!(summary.report("HBV").unwrap().outcome, OrganismOutcome::Completed { .. }));
        assert!(!summary.stats().contains_key("SARS-CoV-2"));
    }

    #[test]
    fn test_tidy() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        let config = config(&exp, 30.0, true);
        let tools = scripted_tools();
        let summary = ConsensusRun::new(&config, &tools).run().unwrap();
        assert!(summary.is_success());

        let layout = RunLayout::new(&exp);
        let hbv = layout.organism("HBV");
        for path in hbv.intermediates().iter() {
            assert!(!path.exists(), "{} was not removed", path.display());
        }
        assert!(!hbv.temp_dir().exists());
        assert!(!PathBuf::from(format!("{}.bwt.2bit.64", hbv.flat_consensus().display())).exists());
        for kept in [hbv.flat_consensus(), hbv.remapped_consensus(), hbv.coverage_table(), hbv.consensus_alignment(), hbv.stats()] {
            assert!(kept.exists(), "{} was removed", kept.display());
        }
        for target in TARGETS.iter() {
            assert!(!layout.target_alignment(target).exists());
        }
        // inputs are untouched
        assert!(exp.join("sample_01.bam").exists());
    }

    #[test]
    fn test_missing_target_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = experiment(tmp.path());
        std::fs::remove_dir_all(exp.join("grouped_reads")).unwrap();
        let config = config(&exp, 30.0, false);
        let tools = scripted_tools();
        assert!(ConsensusRun::new(&config, &tools).run().is_err());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(OrganismOutcome::NoTargetsRetained.to_string(), "no targets retained");
        let done = OrganismOutcome::Completed { flat: true, refined: false, reference_anchored: true };
        assert_eq!(done.to_string(), "completed (flat, reference-anchored)");
        assert_eq!(OrganismOutcome::Failed("mafft".to_string()).to_string(), "failed: mafft");
    }
}
