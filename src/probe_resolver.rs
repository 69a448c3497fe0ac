/*!
Resolves capture targets to the organism (probe type) they belong to.

# Example usage
```rust
use flatcon::probe_resolver::ProbeAggregationTable;

let table = ProbeAggregationTable::from_pairs([
    ("HBV_target_1", "HBV"),
    ("HBV_target_2", "HBV")
]).unwrap();
assert_eq!(table.resolve(">HBV_target_1"), "HBV");
assert_eq!(table.resolve("unknown"), "Unmatched");
```
*/

use std::path::Path;

use log::debug;
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;

use crate::consensus_config::UNMATCHED_ORGANISM;
use crate::fasta::strip_header_marker;

/// One row of the aggregation table; any other columns are ignored
#[derive(Debug, serde::Deserialize)]
struct ProbeRow {
    target_id: String,
    probetype: String
}

/// Read-only mapping from target identifier to organism label
#[derive(Clone, Debug, Default)]
pub struct ProbeAggregationTable {
    /// Lookup from target id to organism
    organisms: HashMap<String, String>,
    /// Target ids in the order they were loaded
    target_order: Vec<String>
}

impl ProbeAggregationTable {
    /// Loads the table from a CSV with (at least) the columns `target_id` and `probetype`.
    /// # Arguments
    /// * `path` - the CSV file
    /// # Errors
    /// * if the file cannot be read or parsed
    /// * if one target id maps to two different organisms
    pub fn from_csv(path: &Path) -> Result<ProbeAggregationTable, Box<dyn std::error::Error>> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let mut pairs = vec![];
        for row in csv_reader.deserialize() {
            let record: ProbeRow = row?;
            pairs.push((record.target_id, record.probetype));
        }
        let table = Self::from_pairs(pairs)?;
        debug!("Loaded {} targets from {}", table.len(), path.display());
        Ok(table)
    }

    /// Builds a table from (target id, organism) pairs.
    /// # Errors
    /// * if one target id maps to two different organisms
    pub fn from_pairs<I, T, O>(pairs: I) -> Result<ProbeAggregationTable, Box<dyn std::error::Error>>
    where
        I: IntoIterator<Item = (T, O)>,
        T: Into<String>,
        O: Into<String>
    {
        let mut organisms: HashMap<String, String> = Default::default();
        let mut target_order = vec![];
        for (target, organism) in pairs.into_iter() {
            let target: String = target.into();
            let organism: String = organism.into();
            match organisms.get(&target) {
                Some(existing) if existing != &organism => {
                    bail!("Target {target} is assigned to both {existing} and {organism}");
                },
                Some(_) => {},
                None => {
                    target_order.push(target.clone());
                    organisms.insert(target, organism);
                }
            }
        }
        Ok(ProbeAggregationTable {
            organisms,
            target_order
        })
    }

    /// Returns the organism label for a target, or the "Unmatched" label.
    /// A leading '>' on the identifier is ignored.
    /// # Arguments
    /// * `target_id` - the target identifier as emitted by the consensus caller
    pub fn resolve(&self, target_id: &str) -> &str {
        self.organisms.get(strip_header_marker(target_id))
            .map(|s| s.as_str())
            .unwrap_or(UNMATCHED_ORGANISM)
    }

    /// Target ids in load order.
    pub fn targets(&self) -> &[String] {
        &self.target_order
    }

    pub fn len(&self) -> usize {
        self.target_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_order.is_empty()
    }
}
