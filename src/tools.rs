/*!
Invocation layer for the external programs: the short-read aligner, the alignment utilities, the MSA tool, and the position-count generator.
Every call blocks until the program (or pipe chain) exits, and an unsuccessful exit or a missing expected output is reported as a `ConsensusError` naming the command.
*/

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use itertools::Itertools;
use log::{debug, trace, warn};

use crate::consensus_config::ToolPaths;
use crate::errors::ConsensusError;

pub type ToolResult<T> = Result<T, ConsensusError>;

/// The external operations the consensus engine relies on.
/// Implementations must be shareable across the organism workers.
pub trait ExternalTools: Sync {
    /// Writes the records of `input` that align to any of `targets` into `output` (requires an index on `input`)
    fn extract_targets(&self, input: &Path, targets: &[String], output: &Path) -> ToolResult<()>;

    /// Builds the random-access index of an alignment container
    fn index_alignment(&self, alignment: &Path) -> ToolResult<()>;

    /// Merges several alignment containers into one
    fn merge_alignments(&self, inputs: &[PathBuf], output: &Path) -> ToolResult<()>;

    /// Writes the per-target coverage table of an alignment container
    fn coverage_table(&self, alignment: &Path, output: &Path) -> ToolResult<()>;

    /// Counts records, skipping any with a flag in `exclude_flags` or a mapping quality below `min_mapq`
    fn count_reads(&self, alignment: &Path, exclude_flags: u16, min_mapq: u8) -> ToolResult<u64>;

    /// Calls the per-target consensus; an empty output is allowed
    fn call_target_consensus(&self, alignment: &Path, output: &Path, min_depth: u32, call_fraction: f64) -> ToolResult<()>;

    /// Indexes a FASTA for the short-read aligner
    fn build_aligner_index(&self, fasta: &Path) -> ToolResult<()>;

    /// Aligns every sequence of `fasta` against each other
    fn align_sequences(&self, fasta: &Path, output: &Path) -> ToolResult<()>;

    /// Adds the sequences of `fragments` to an existing alignment
    fn add_fragments(&self, fragments: &Path, alignment: &Path, output: &Path) -> ToolResult<()>;

    /// Re-aligns the reads in `alignment` against `reference`, writing a provisional consensus and a position-count table
    fn remap_with_counts(&self, alignment: &Path, reference: &Path, consensus: &Path, position_counts: &Path, min_depth: Option<u32>) -> ToolResult<()>;
}

/// Renders a command the way it would be typed
fn describe(command: &Command) -> String {
    std::iter::once(command.get_program().to_string_lossy())
        .chain(command.get_args().map(|a| a.to_string_lossy()))
        .join(" ")
}

/// Fails unless `path` exists with a non-zero size
fn require_output(tool: &str, command: &str, path: &Path) -> ToolResult<()> {
    match std::fs::metadata(path) {
        Ok(m) if m.len() > 0 => Ok(()),
        _ => Err(ConsensusError::MissingOutput {
            tool: tool.to_string(),
            command: command.to_string(),
            path: path.to_path_buf()
        })
    }
}

fn launch_failure(tool: &str, command: &str, error: std::io::Error) -> ConsensusError {
    ConsensusError::ToolFailed {
        tool: tool.to_string(),
        command: command.to_string(),
        status: "not started".to_string(),
        stderr: error.to_string()
    }
}

/// Kills and reaps the stages of a chain that could not be completed
fn stop_all(children: &mut [(String, Child)]) {
    for (stage_description, child) in children.iter_mut() {
        if let Err(e) = child.kill().and_then(|_| child.wait().map(|_| ())) {
            warn!("Could not stop {stage_description}: {e}");
        }
    }
}

/// Runs the real binaries
#[derive(Clone, Debug)]
pub struct CommandLineTools {
    /// Resolved binaries
    paths: ToolPaths,
    /// Threads for `bwa-mem2 mem`
    aligner_threads: usize,
    /// Threads for `mafft`
    msa_threads: usize
}

impl CommandLineTools {
    /// Resolves every binary, failing early if one cannot be found.
    /// # Arguments
    /// * `paths` - binary names or paths
    /// * `aligner_threads` - threads for the short-read aligner
    /// * `msa_threads` - threads for the MSA tool
    /// # Errors
    /// * if any binary is not found
    pub fn new(paths: &ToolPaths, aligner_threads: usize, msa_threads: usize) -> Result<CommandLineTools, Box<dyn std::error::Error>> {
        let resolve = |p: &Path| -> Result<PathBuf, Box<dyn std::error::Error>> {
            which::which(p).map_err(|e| format!("{}: {e}", p.display()).into())
        };
        let resolved = ToolPaths {
            samtools: resolve(&paths.samtools)?,
            bwa_mem2: resolve(&paths.bwa_mem2)?,
            mafft: resolve(&paths.mafft)?,
            viral_consensus: resolve(&paths.viral_consensus)?
        };
        debug!("Resolved tools: {resolved:?}");
        Ok(CommandLineTools {
            paths: resolved,
            aligner_threads: aligner_threads.max(1),
            msa_threads: msa_threads.max(1)
        })
    }

    fn samtools(&self) -> Command {
        Command::new(&self.paths.samtools)
    }

    fn mafft(&self) -> Command {
        let mut cmd = Command::new(&self.paths.mafft);
        cmd.arg("--thread").arg(self.msa_threads.to_string())
            .args(["--localpair", "--maxiterate", "1000", "--lexp", "-1.5", "--lop", "0.5", "--lep", "-0.5"]);
        cmd
    }

    /// Runs one program to completion, optionally saving its stdout to a file.
    /// Returns the captured stdout.
    fn run_single(&self, tool: &str, mut command: Command, stdout_to: Option<&Path>) -> ToolResult<Vec<u8>> {
        let description = describe(&command);
        debug!("Running {description}");
        let output = command.stdin(Stdio::null())
            .output()
            .map_err(|e| launch_failure(tool, &description, e))?;

        if !output.status.success() {
            return Err(ConsensusError::ToolFailed {
                tool: tool.to_string(),
                command: description,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string()
            });
        }
        trace!("{tool} stderr: {}", String::from_utf8_lossy(&output.stderr));

        if let Some(path) = stdout_to {
            File::create(path)
                .and_then(|mut f| f.write_all(&output.stdout))
                .map_err(|e| launch_failure(tool, &description, e))?;
        }
        Ok(output.stdout)
    }

    /// Runs a chain of programs connected stdout-to-stdin, the last one optionally writing into a file.
    /// Standard error is left attached to ours so a long-running chain cannot block on it.
    fn run_pipeline(&self, tool: &str, mut stages: Vec<Command>, stdout_to: Option<&Path>) -> ToolResult<()> {
        let description = stages.iter().map(describe).join(" | ");
        debug!("Running {description}");

        let last_index = stages.len().saturating_sub(1);
        let mut children: Vec<(String, Child)> = vec![];
        let mut previous_stdout = None;
        for (index, stage) in stages.iter_mut().enumerate() {
            let stage_description = describe(stage);
            match previous_stdout.take() {
                Some(out) => stage.stdin(Stdio::from(out)),
                None => stage.stdin(Stdio::null())
            };
            if index == last_index {
                match stdout_to {
                    Some(path) => match File::create(path) {
                        Ok(file) => stage.stdout(Stdio::from(file)),
                        Err(e) => {
                            stop_all(&mut children);
                            return Err(launch_failure(tool, &description, e));
                        }
                    },
                    None => stage.stdout(Stdio::null())
                };
            } else {
                stage.stdout(Stdio::piped());
            }

            let mut child = match stage.spawn() {
                Ok(child) => child,
                Err(e) => {
                    stop_all(&mut children);
                    return Err(launch_failure(tool, &stage_description, e));
                }
            };
            previous_stdout = child.stdout.take();
            children.push((stage_description, child));
        }

        // wait on everything before reporting so no stage is left running
        let mut failure = None;
        for (stage_description, mut child) in children.into_iter() {
            let status = child.wait().map_err(|e| launch_failure(tool, &stage_description, e))?;
            if !status.success() && failure.is_none() {
                failure = Some(ConsensusError::ToolFailed {
                    tool: tool.to_string(),
                    command: description.clone(),
                    status: format!("{stage_description}: {status}"),
                    stderr: "see log output".to_string()
                });
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(())
        }
    }
}

impl ExternalTools for CommandLineTools {
    fn extract_targets(&self, input: &Path, targets: &[String], output: &Path) -> ToolResult<()> {
        let mut cmd = self.samtools();
        cmd.arg("view").arg("-b").arg("-o").arg(output).arg(input).args(targets);
        let description = describe(&cmd);
        self.run_single("samtools view", cmd, None)?;
        require_output("samtools view", &description, output)
    }

    fn index_alignment(&self, alignment: &Path) -> ToolResult<()> {
        let mut cmd = self.samtools();
        cmd.arg("index").arg(alignment);
        let description = describe(&cmd);
        self.run_single("samtools index", cmd, None)?;
        let mut index = alignment.as_os_str().to_owned();
        index.push(".bai");
        require_output("samtools index", &description, Path::new(&index))
    }

    fn merge_alignments(&self, inputs: &[PathBuf], output: &Path) -> ToolResult<()> {
        let mut cmd = self.samtools();
        cmd.arg("merge").arg("-f").arg(output).args(inputs);
        let description = describe(&cmd);
        self.run_single("samtools merge", cmd, None)?;
        require_output("samtools merge", &description, output)
    }

    fn coverage_table(&self, alignment: &Path, output: &Path) -> ToolResult<()> {
        let mut cmd = self.samtools();
        cmd.arg("coverage").arg("-o").arg(output).arg(alignment);
        let description = describe(&cmd);
        self.run_single("samtools coverage", cmd, None)?;
        require_output("samtools coverage", &description, output)
    }

    fn count_reads(&self, alignment: &Path, exclude_flags: u16, min_mapq: u8) -> ToolResult<u64> {
        let mut cmd = self.samtools();
        cmd.arg("view").arg("-c")
            .arg("-F").arg(format!("{exclude_flags:#x}"))
            .arg("-q").arg(min_mapq.to_string())
            .arg(alignment);
        let description = describe(&cmd);
        let stdout = self.run_single("samtools view", cmd, None)?;
        String::from_utf8_lossy(&stdout).trim().parse::<u64>()
            .map_err(|e| ConsensusError::ToolFailed {
                tool: "samtools view".to_string(),
                command: description,
                status: "unparseable count".to_string(),
                stderr: e.to_string()
            })
    }

    fn call_target_consensus(&self, alignment: &Path, output: &Path, min_depth: u32, call_fraction: f64) -> ToolResult<()> {
        let mut cmd = self.samtools();
        cmd.arg("consensus")
            .arg("--call-fract").arg(call_fraction.to_string())
            .arg("--min-depth").arg(min_depth.to_string())
            .arg("-f").arg("fasta")
            .arg(alignment)
            .arg("-o").arg(output);
        self.run_single("samtools consensus", cmd, None)?;
        Ok(())
    }

    fn build_aligner_index(&self, fasta: &Path) -> ToolResult<()> {
        let mut cmd = Command::new(&self.paths.bwa_mem2);
        cmd.arg("index").arg(fasta);
        let description = describe(&cmd);
        self.run_single("bwa-mem2 index", cmd, None)?;
        let mut index = fasta.as_os_str().to_owned();
        index.push(".bwt.2bit.64");
        require_output("bwa-mem2 index", &description, Path::new(&index))
    }

    fn align_sequences(&self, fasta: &Path, output: &Path) -> ToolResult<()> {
        let mut cmd = self.mafft();
        cmd.arg(fasta);
        let description = describe(&cmd);
        self.run_single("mafft", cmd, Some(output))?;
        require_output("mafft", &description, output)
    }

    fn add_fragments(&self, fragments: &Path, alignment: &Path, output: &Path) -> ToolResult<()> {
        let mut cmd = self.mafft();
        cmd.arg("--addfragments").arg(fragments).arg(alignment);
        let description = describe(&cmd);
        self.run_single("mafft --addfragments", cmd, Some(output))?;
        require_output("mafft --addfragments", &description, output)
    }

    fn remap_with_counts(&self, alignment: &Path, reference: &Path, consensus: &Path, position_counts: &Path, min_depth: Option<u32>) -> ToolResult<()> {
        let mut fastq = self.samtools();
        fastq.arg("fastq").arg(alignment);

        // -p: samtools fastq interleaves mates, singletons are handled by smart pairing
        let mut align = Command::new(&self.paths.bwa_mem2);
        align.arg("mem").arg("-p")
            .arg("-t").arg(self.aligner_threads.to_string())
            .arg(reference).arg("-");

        let mut counts = Command::new(&self.paths.viral_consensus);
        counts.arg("-i").arg("-")
            .arg("-r").arg(reference)
            .arg("-o").arg(consensus)
            .arg("--out_pos_counts").arg(position_counts);
        if let Some(depth) = min_depth {
            counts.arg("--min_depth").arg(depth.to_string());
        }

        let description = [&fastq, &align, &counts].iter().map(|c| describe(c)).join(" | ");
        self.run_pipeline("viral_consensus", vec![fastq, align, counts], None)?;
        require_output("viral_consensus", &description, position_counts)
    }
}


/// A stand-in for the external binaries, writing fixture files instead of running anything
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;

    use std::sync::Mutex;

    use rustc_hash::FxHashMap;

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTools {
        /// Sequence written by the per-target consensus caller, keyed by target; absent targets get an empty FASTA
        pub target_consensus: FxHashMap<String, String>,
        /// Copied into every coverage table output
        pub coverage_fixture: PathBuf,
        /// Copied into every `--addfragments` output
        pub alignment_fixture: PathBuf,
        /// Copied into every position-count output
        pub position_count_fixture: PathBuf,
        /// Returned by every read count
        pub read_count: u64,
        /// (operation, path fragment): the operation fails when any of its paths contains the fragment
        pub fail_on: Option<(String, String)>,
        /// Every operation performed, in order
        pub calls: Mutex<Vec<String>>
    }

    impl ScriptedTools {
        pub(crate) fn new() -> ScriptedTools {
            ScriptedTools {
                coverage_fixture: PathBuf::from("./tests/coverage_001.tsv"),
                alignment_fixture: PathBuf::from("./tests/consensus_alignment_001.aln"),
                position_count_fixture: PathBuf::from("./tests/pos_counts_001.tsv"),
                read_count: 1623,
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn enter(&self, operation: &str, paths: &[&Path]) -> ToolResult<()> {
            let command = format!("{operation} {}", paths.iter().map(|p| p.display()).join(" "));
            self.calls.lock().unwrap().push(command.clone());
            if let Some((failing, fragment)) = self.fail_on.as_ref() {
                if failing == operation && paths.iter().any(|p| p.to_string_lossy().contains(fragment.as_str())) {
                    return Err(ConsensusError::ToolFailed {
                        tool: operation.to_string(),
                        command,
                        status: "exit status: 1".to_string(),
                        stderr: "scripted failure".to_string()
                    });
                }
            }
            Ok(())
        }

        fn touch(path: &Path) -> ToolResult<()> {
            std::fs::write(path, b"scripted").map_err(|e| launch_failure("scripted", "touch", e))
        }

        fn copy(from: &Path, to: &Path) -> ToolResult<()> {
            std::fs::copy(from, to).map(|_| ()).map_err(|e| launch_failure("scripted", "copy", e))
        }

        fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
            let mut p = path.as_os_str().to_owned();
            p.push(suffix);
            PathBuf::from(p)
        }
    }

    impl ExternalTools for ScriptedTools {
        fn extract_targets(&self, input: &Path, _targets: &[String], output: &Path) -> ToolResult<()> {
            self.enter("extract_targets", &[input, output])?;
            Self::touch(output)
        }

        fn index_alignment(&self, alignment: &Path) -> ToolResult<()> {
            self.enter("index_alignment", &[alignment])?;
            Self::touch(&Self::with_suffix(alignment, ".bai"))
        }

        fn merge_alignments(&self, inputs: &[PathBuf], output: &Path) -> ToolResult<()> {
            let mut paths: Vec<&Path> = inputs.iter().map(|p| p.as_path()).collect();
            paths.push(output);
            self.enter("merge_alignments", &paths)?;
            Self::touch(output)
        }

        fn coverage_table(&self, alignment: &Path, output: &Path) -> ToolResult<()> {
            self.enter("coverage_table", &[alignment, output])?;
            Self::copy(&self.coverage_fixture, output)
        }

        fn count_reads(&self, alignment: &Path, _exclude_flags: u16, _min_mapq: u8) -> ToolResult<u64> {
            self.enter("count_reads", &[alignment])?;
            Ok(self.read_count)
        }

        fn call_target_consensus(&self, alignment: &Path, output: &Path, _min_depth: u32, _call_fraction: f64) -> ToolResult<()> {
            self.enter("call_target_consensus", &[alignment, output])?;
            let target = alignment.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let text = match self.target_consensus.get(&target) {
                Some(seq) => format!(">{target}\n{seq}\n"),
                None => String::new()
            };
            std::fs::write(output, text).map_err(|e| launch_failure("scripted", "write", e))
        }

        fn build_aligner_index(&self, fasta: &Path) -> ToolResult<()> {
            self.enter("build_aligner_index", &[fasta])?;
            Self::touch(&Self::with_suffix(fasta, ".bwt.2bit.64"))
        }

        fn align_sequences(&self, fasta: &Path, output: &Path) -> ToolResult<()> {
            self.enter("align_sequences", &[fasta, output])?;
            Self::copy(fasta, output)
        }

        fn add_fragments(&self, fragments: &Path, alignment: &Path, output: &Path) -> ToolResult<()> {
            self.enter("add_fragments", &[fragments, alignment, output])?;
            Self::copy(&self.alignment_fixture, output)
        }

        fn remap_with_counts(&self, alignment: &Path, reference: &Path, consensus: &Path, position_counts: &Path, _min_depth: Option<u32>) -> ToolResult<()> {
            self.enter("remap_with_counts", &[alignment, reference, consensus, position_counts])?;
            Self::copy(reference, consensus)?;
            Self::copy(&self.position_count_fixture, position_counts)
        }
    }
}
