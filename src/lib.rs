/*!
# flatcon
This library aggregates per-target consensus sequences from a targeted capture experiment into one consensus per organism.

Stages, per organism:
* Targets are resolved to organisms with a probe aggregation table and their per-target consensuses are collected
* Targets without enough coverage or mapping quality are filtered out
* References and consensus fragments are aligned and flattened into a single consensus by a column vote
* Reads are remapped to the flat consensus and a depth-corrected vote gives the refined consensus
* Optionally, reads are also remapped to a ground-truth reference for a reference-anchored consensus

Notes:
* Alignment, pileup and MSA work is delegated to external tools (samtools, bwa-mem2, mafft, viral_consensus) through the `tools::ExternalTools` trait
* Organisms are processed in parallel, a failure in one organism does not affect the others

# Example usage
```rust
use flatcon::flat_consensus::FlatConsensus;
use flatcon::depth_correct::{depth_corrected_vote, PositionCount};
use flatcon::voting::CoverageGatedVoter;

// flatten an alignment; the last column is all gaps and gets dropped
let alignment = [
    b"ACGT-".to_vec(),
    b"ACGA-".to_vec(),
    b"ACGT-".to_vec()
];
let flat = FlatConsensus::from_alignment("Viridae", &alignment, &CoverageGatedVoter::default()).unwrap();
assert_eq!(flat.sequence(), b"ACGT");

// refine from position counts; the first row is below the depth floor
let counts = [
    PositionCount::new(1, [40, 0, 0, 55], 95),
    PositionCount::new(2, [10, 0, 0, 95], 105)
];
assert_eq!(depth_corrected_vote(&counts).sequence(), b"T");
```
*/

/// Collects per-target consensus fragments into organism groups
pub mod collector;
/// Configuration for a consensus run
pub mod consensus_config;
/// Coverage/quality filtering of an organism group
pub mod coverage;
/// Depth-corrected vote over position counts
pub mod depth_correct;
/// Error types for external tools and malformed inputs
pub mod errors;
/// Utility for generating examples
pub mod example_gen;
/// FASTA reading and writing
pub mod fasta;
/// Flat consensus from a multiple sequence alignment
pub mod flat_consensus;
/// Identity table and plot for a flat consensus
pub mod identity_plot;
/// File layout of an experiment folder
pub mod layout;
/// Organism groups and their statistics
pub mod organism;
/// Run controller over every organism
pub mod pipeline;
/// Probe-to-organism resolution
pub mod probe_resolver;
/// Consensus against a ground-truth reference
pub mod reference_anchored;
/// Remap reads to the flat consensus and refine it
pub mod remap;
/// Wrappers for the external tools
pub mod tools;
/// Column voting over alignments
pub mod voting;
