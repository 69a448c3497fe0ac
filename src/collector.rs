/*!
Collects the per-target consensus fragments produced by the external consensus caller and groups them by organism.

# Example usage
```rust
use flatcon::collector::TargetConsensusCollector;
use flatcon::fasta::NamedSequence;
use flatcon::probe_resolver::ProbeAggregationTable;

let table = ProbeAggregationTable::from_pairs([("T1", "Viridae")]).unwrap();
let mut collector = TargetConsensusCollector::new(&table);
collector.collect_records("T1", vec![
    NamedSequence::new("T1", b"ACGT".to_vec()),
    NamedSequence::new("T1", b"ACGA".to_vec()),
    NamedSequence::new("reference_only", b"TTTT".to_vec())
]);

let groups = collector.into_groups();
assert_eq!(groups.len(), 1);
assert_eq!(groups[0].name(), "Viridae");
assert_eq!(groups[0].members()[0].joined(), "ACGT, ACGA");
```
*/

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, trace, warn};
use rustc_hash::FxHashSet as HashSet;

use crate::fasta::{read_fasta, strip_header_marker, NamedSequence};
use crate::organism::{OrganismGroup, TargetConsensusFragment};
use crate::probe_resolver::ProbeAggregationTable;

/// Accumulates target fragments into organism groups
#[derive(Debug)]
pub struct TargetConsensusCollector<'a> {
    /// Resolves targets to organisms
    table: &'a ProbeAggregationTable,
    /// Groups keyed by organism name, so iteration order is fixed
    groups: BTreeMap<String, OrganismGroup>
}

impl<'a> TargetConsensusCollector<'a> {
    /// Creates a collector with no groups yet
    pub fn new(table: &'a ProbeAggregationTable) -> TargetConsensusCollector<'a> {
        TargetConsensusCollector {
            table,
            groups: Default::default()
        }
    }

    /// Reads a per-target consensus FASTA and collects its qualifying records.
    /// A missing file is treated as a target without output.
    /// # Arguments
    /// * `target_id` - the target the file was produced for
    /// * `path` - the consensus FASTA
    /// # Errors
    /// * if the file exists but cannot be parsed
    pub fn collect_file(&mut self, target_id: &str, path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
        if !path.exists() {
            debug!("No consensus output for {target_id} at {}", path.display());
            return Ok(false);
        }
        let records = read_fasta(path)?;
        Ok(self.collect_records(target_id, records))
    }

    /// Collects the records whose name contains the target id; everything else is ignored.
    /// Returns false if nothing qualified.
    /// # Arguments
    /// * `target_id` - the target these records were produced for
    /// * `records` - every record from the consensus caller output
    pub fn collect_records(&mut self, target_id: &str, records: Vec<NamedSequence>) -> bool {
        let target_id = strip_header_marker(target_id);
        let sequences: Vec<Vec<u8>> = records.into_iter()
            .filter(|r| r.name.contains(target_id))
            .map(|r| r.sequence)
            .collect();

        if sequences.is_empty() {
            trace!("No qualifying consensus records for {target_id}");
            return false;
        }

        let organism = self.table.resolve(target_id);
        let group = self.groups.entry(organism.to_string())
            .or_insert_with(|| OrganismGroup::new(organism.to_string()));
        trace!("{target_id} => {organism} ({} sequences)", sequences.len());
        group.push(TargetConsensusFragment::new(target_id.to_string(), sequences));
        true
    }

    /// Returns a group by organism name
    pub fn group(&self, organism: &str) -> Option<&OrganismGroup> {
        self.groups.get(organism)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consumes the collector, returning groups sorted by organism name.
    /// Labels that sanitize to the same directory name get `_2`, `_3`, ... appended in that order.
    pub fn into_groups(self) -> Vec<OrganismGroup> {
        let mut taken: HashSet<String> = Default::default();
        self.groups.into_values()
            .map(|mut group| {
                let base = group.dir_name().to_string();
                let mut candidate = base.clone();
                let mut suffix = 1;
                while taken.contains(&candidate) {
                    suffix += 1;
                    candidate = format!("{base}_{suffix}");
                }
                if candidate != base {
                    warn!("{} shares its directory name with another organism, using {candidate}", group.name());
                    group.set_dir_name(candidate.clone());
                }
                taken.insert(candidate);
                group
            })
            .collect()
    }
}
