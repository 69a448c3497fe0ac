//! Error types that callers need to tell apart from generic failures.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the consensus engine that identify the responsible tool or input
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// An external program exited unsuccessfully
    #[error("{tool} failed ({status}): `{command}`: {stderr}")]
    ToolFailed {
        /// Short tool label, e.g. "mafft"
        tool: String,
        /// The full command line that was run
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error, trimmed
        stderr: String
    },

    /// An external program exited cleanly but did not produce its expected output
    #[error("{tool} produced no output at '{}': `{command}`", .path.display())]
    MissingOutput {
        tool: String,
        command: String,
        path: PathBuf
    },

    /// An alignment file could not be interpreted as a multiple-sequence alignment
    #[error("Malformed alignment '{}': {reason}", .path.display())]
    MalformedAlignment {
        path: PathBuf,
        reason: String
    },

    /// A tabular tool output could not be parsed
    #[error("Malformed table '{}': {reason}", .path.display())]
    MalformedTable {
        path: PathBuf,
        reason: String
    }
}
