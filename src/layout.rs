/*!
File layout of an experiment folder.
Inputs live under `grouped_reads/<target>/`, each organism gets its own `consensus_data/<organism>/` folder so concurrent groups never share a path.
*/

use std::path::{Path, PathBuf};

/// Paths shared by the whole run
#[derive(Clone, Debug)]
pub struct RunLayout {
    experiment_dir: PathBuf
}

impl RunLayout {
    /// Constructor
    pub fn new(experiment_dir: &Path) -> RunLayout {
        RunLayout {
            experiment_dir: experiment_dir.to_path_buf()
        }
    }

    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    /// Folder holding one sub-folder per capture target
    pub fn grouped_reads_dir(&self) -> PathBuf {
        self.experiment_dir.join("grouped_reads")
    }

    pub fn target_dir(&self, target_id: &str) -> PathBuf {
        self.grouped_reads_dir().join(target_id)
    }

    /// Reads extracted from the sample alignment for one target
    pub fn target_alignment(&self, target_id: &str) -> PathBuf {
        self.target_dir(target_id).join(format!("{target_id}.bam"))
    }

    /// Output of the per-target consensus caller
    pub fn target_consensus(&self, target_id: &str) -> PathBuf {
        self.target_dir(target_id).join(format!("consensus_seqs_{target_id}.fasta"))
    }

    /// Folder holding one sub-folder per organism
    pub fn consensus_data_dir(&self) -> PathBuf {
        self.experiment_dir.join("consensus_data")
    }

    /// Layout for one organism
    /// # Arguments
    /// * `dir_name` - the sanitized organism name
    pub fn organism(&self, dir_name: &str) -> OrganismLayout {
        OrganismLayout {
            dir: self.consensus_data_dir().join(dir_name),
            stem: dir_name.to_string()
        }
    }
}

/// Paths for everything produced while processing one organism
#[derive(Clone, Debug)]
pub struct OrganismLayout {
    dir: PathBuf,
    stem: String
}

impl OrganismLayout {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    fn stemmed(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{suffix}", self.stem))
    }

    // intermediates
    pub fn collated_unfiltered(&self) -> PathBuf {
        self.dir.join("collated_reads_unf.bam")
    }

    pub fn collated(&self) -> PathBuf {
        self.dir.join("collated_reads.bam")
    }

    pub fn coverage_raw(&self) -> PathBuf {
        self.dir.join("target_consensus_coverage_raw.tsv")
    }

    pub fn flat_references(&self) -> PathBuf {
        self.dir.join("flat_cons_refs.fasta")
    }

    pub fn flat_fragments(&self) -> PathBuf {
        self.dir.join("flat_cons_seqs.fasta")
    }

    pub fn remap_provisional(&self) -> PathBuf {
        self.stemmed("remapped_consensus_provisional.fasta")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.dir.join("temp")
    }

    pub fn temp_reference(&self) -> PathBuf {
        self.temp_dir().join("ref_seq.fasta")
    }

    pub fn ref_adjusted_provisional(&self) -> PathBuf {
        self.temp_dir().join("ref_adjusted_provisional.fasta")
    }

    /// Every intermediate file of this organism, indexes included; the temp folder is not listed
    pub fn intermediates(&self) -> Vec<PathBuf> {
        let with_suffix = |p: PathBuf, suffix: &str| {
            let mut s = p.into_os_string();
            s.push(suffix);
            PathBuf::from(s)
        };
        vec![
            self.collated_unfiltered(),
            with_suffix(self.collated_unfiltered(), ".bai"),
            self.collated(),
            with_suffix(self.collated(), ".bai"),
            self.coverage_raw(),
            self.flat_references(),
            self.flat_fragments(),
            self.remap_provisional()
        ]
    }

    // final artifacts
    pub fn coverage_table(&self) -> PathBuf {
        self.dir.join("target_consensus_coverage.tsv")
    }

    pub fn reference_alignment(&self) -> PathBuf {
        self.stemmed("ref_alignment.aln")
    }

    pub fn consensus_alignment(&self) -> PathBuf {
        self.stemmed("consensus_alignment.aln")
    }

    pub fn flat_consensus(&self) -> PathBuf {
        self.stemmed("consensus_sequence.fasta")
    }

    pub fn identity_plot(&self) -> PathBuf {
        self.stemmed("flat_consensus_identity.svg")
    }

    pub fn identity_table(&self) -> PathBuf {
        self.stemmed("flat_consensus_identity.tsv")
    }

    pub fn remapped_consensus(&self) -> PathBuf {
        self.stemmed("remapped_consensus_sequence.fasta")
    }

    pub fn remap_position_counts(&self) -> PathBuf {
        self.stemmed("consensus_pos_counts.tsv")
    }

    pub fn ref_adjusted_consensus(&self) -> PathBuf {
        self.stemmed("ref_adjusted_consensus.fasta")
    }

    pub fn ref_adjusted_position_counts(&self) -> PathBuf {
        self.stemmed("refadjconsensus_pos_counts.tsv")
    }

    pub fn stats(&self) -> PathBuf {
        self.dir.join("supplementary_stats.json")
    }
}
