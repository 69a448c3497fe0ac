/*!
Data model for organism groups: the per-target consensus fragments that belong to one organism,
the coverage filter result, and the statistics gathered while the group is processed.
*/

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::consensus_config::FRAGMENT_DELIMITER;

/// All consensus fragments emitted for one target by the per-target consensus caller
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetConsensusFragment {
    /// The target identifier, without any leading '>'
    target_id: String,
    /// Every qualifying consensus sequence for this target, in file order; any may be empty
    sequences: Vec<Vec<u8>>
}

impl TargetConsensusFragment {
    /// Constructor
    pub fn new(target_id: String, sequences: Vec<Vec<u8>>) -> TargetConsensusFragment {
        TargetConsensusFragment {
            target_id,
            sequences
        }
    }

    /// All sequences joined into one field with the fixed fragment delimiter.
    pub fn joined(&self) -> String {
        self.sequences.iter()
            .map(|s| String::from_utf8_lossy(s))
            .join(FRAGMENT_DELIMITER)
    }

    /// Iterates over the sequences that actually contain bases
    pub fn non_empty_sequences(&self) -> impl Iterator<Item = &[u8]> {
        self.sequences.iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_slice())
    }

    // Getters
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn sequences(&self) -> &[Vec<u8>] {
        &self.sequences
    }
}

/// Named metrics recorded while processing an organism; serialized as a JSON object
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct OrganismStats(BTreeMap<String, serde_json::Value>);

impl OrganismStats {
    /// Records a metric, replacing any previous value with the same name
    pub fn record(&mut self, metric: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(metric.to_string(), value.into());
    }

    pub fn get(&self, metric: &str) -> Option<&serde_json::Value> {
        self.0.get(metric)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The set of targets sharing one organism label, plus everything derived from them
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrganismGroup {
    /// The organism label
    name: String,
    /// Working directory name, unique among the groups of a run
    dir_name: String,
    /// Target fragments in the order they were collected
    members: Vec<TargetConsensusFragment>,
    /// Targets retained by the most recent coverage filter; None until filtering runs
    coverage_filter_result: Option<BTreeSet<String>>,
    /// Metrics gathered for this organism
    stats: OrganismStats
}

impl OrganismGroup {
    /// Creates an empty group
    pub fn new(name: String) -> OrganismGroup {
        OrganismGroup {
            dir_name: sanitize_name(&name),
            name,
            ..Default::default()
        }
    }

    /// Adds a target fragment to the group
    pub fn push(&mut self, fragment: TargetConsensusFragment) {
        self.members.push(fragment);
    }

    /// Restricts the members to the retained targets, keeping their relative order.
    /// The retained set is stored as the coverage filter result.
    /// # Arguments
    /// * `retained` - target ids that passed the coverage filter
    pub fn retain_targets(&mut self, retained: BTreeSet<String>) {
        let members = std::mem::take(&mut self.members);
        self.members = members.into_iter()
            .filter(|m| retained.contains(m.target_id()))
            .collect();

        // members may not cover every retained id (e.g. duplicated headers), the result must stay a subset
        let member_ids: BTreeSet<String> = self.member_ids().into_iter().collect();
        self.coverage_filter_result = Some(retained.intersection(&member_ids).cloned().collect());
    }

    /// Distinct member target ids, in collection order.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter()
            .map(|m| m.target_id().to_string())
            .unique()
            .collect()
    }

    /// Returns the member with a given target id, if present
    pub fn member(&self, target_id: &str) -> Option<&TargetConsensusFragment> {
        self.members.iter().find(|m| m.target_id() == target_id)
    }

    /// The organism name made safe for use as a directory or file stem.
    /// Defaults to `sanitize_name` of the label; the collector may add a suffix to keep it unique.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    pub(crate) fn set_dir_name(&mut self, dir_name: String) {
        self.dir_name = dir_name;
    }

    // Getters
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[TargetConsensusFragment] {
        &self.members
    }

    pub fn coverage_filter_result(&self) -> Option<&BTreeSet<String>> {
        self.coverage_filter_result.as_ref()
    }

    pub fn stats(&self) -> &OrganismStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut OrganismStats {
        &mut self.stats
    }
}

/// Replaces anything other than ASCII alphanumerics, '.', '-' and '_' with '_'.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        // "", "." and ".." are not usable as directory names
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(target: &str, seqs: &[&[u8]]) -> TargetConsensusFragment {
        TargetConsensusFragment::new(target.to_string(), seqs.iter().map(|s| s.to_vec()).collect())
    }

    #[test]
    fn test_joined_fragments() {
        let f = fragment("T1", &[b"ACGT", b"ACGA"]);
        assert_eq!(f.joined(), "ACGT, ACGA");
        let f = fragment("T2", &[b"", b"AC"]);
        assert_eq!(f.non_empty_sequences().collect::<Vec<_>>(), vec![b"AC".as_slice()]);
    }

    #[test]
    fn test_retain_targets() {
        let mut group = OrganismGroup::new("Viridae".to_string());
        group.push(fragment("T1", &[b"ACGT"]));
        group.push(fragment("T2", &[b"CCGT"]));
        group.push(fragment("T3", &[b"GCGT"]));
        assert!(group.coverage_filter_result().is_none());

        let retained: BTreeSet<String> = ["T1", "T3", "T9"].iter().map(|s| s.to_string()).collect();
        group.retain_targets(retained);
        assert_eq!(group.member_ids(), vec!["T1".to_string(), "T3".to_string()]);

        // T9 was never a member, so it cannot be part of the result
        let result: Vec<&String> = group.coverage_filter_result().unwrap().iter().collect();
        assert_eq!(result, vec!["T1", "T3"]);
    }

    #[test]
    fn test_retain_is_idempotent() {
        let mut group = OrganismGroup::new("Viridae".to_string());
        group.push(fragment("T1", &[b"ACGT"]));
        group.push(fragment("T2", &[b"CCGT"]));
        let retained: BTreeSet<String> = ["T1", "T2"].iter().map(|s| s.to_string()).collect();
        group.retain_targets(retained.clone());
        let before = group.members().to_vec();
        group.retain_targets(retained);
        assert_eq!(group.members(), before.as_slice());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("SARS-CoV-2"), "SARS-CoV-2");
        assert_eq!(sanitize_name("Human alphaherpesvirus 1/HSV"), "Human_alphaherpesvirus_1_HSV");
        assert_eq!(sanitize_name(".."), "_..");
        assert_eq!(OrganismGroup::new("Hepatitis B/virus".to_string()).dir_name(), "Hepatitis_B_virus");
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = OrganismStats::default();
        stats.record("targets_retained", 3);
        stats.record("flat_mean_identity", 0.5);
        assert_eq!(serde_json::to_string(&stats).unwrap(), r#"{"flat_mean_identity":0.5,"targets_retained":3}"#);
    }
}
