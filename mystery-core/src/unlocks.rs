//! Unlock resolution for suspects, scenes, and records.
//!
//! Two coexisting mechanisms gate content: rule-driven unlocks (a matched
//! theory rule names ids to add) and condition-driven gates (a catalog
//! entry lists facts that must be discovered first). Rule-driven unlocks
//! accumulate in three monotone sets that never shrink outside a
//! whole-session reset.

use crate::content::{FactId, RecordId, RuleUnlocks, SceneId, SuspectId, UnlockCondition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// The three monotone unlocked-content sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedContent {
    pub suspects: BTreeSet<SuspectId>,
    pub scenes: BTreeSet<SceneId>,
    pub records: BTreeSet<RecordId>,
}

/// Ids that just became available, for notification rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockDelta {
    pub suspects: BTreeSet<SuspectId>,
    pub scenes: BTreeSet<SceneId>,
    pub records: BTreeSet<RecordId>,
}

impl UnlockDelta {
    pub fn is_empty(&self) -> bool {
        self.suspects.is_empty() && self.scenes.is_empty() && self.records.is_empty()
    }
}

impl UnlockedContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a rule's unlock directive.
    ///
    /// Pure set-union: returns the grown sets plus the delta of genuinely
    /// new ids, leaving `self` untouched so callers can detect what is new
    /// and commit only on success. Re-adding a present id is a no-op.
    pub fn apply(&self, unlocks: &RuleUnlocks) -> (UnlockedContent, UnlockDelta) {
        let mut next = self.clone();
        let mut delta = UnlockDelta::default();

        for id in &unlocks.suspects {
            if next.suspects.insert(id.clone()) {
                delta.suspects.insert(id.clone());
            }
        }
        for id in &unlocks.scenes {
            if next.scenes.insert(id.clone()) {
                delta.scenes.insert(id.clone());
            }
        }
        for id in &unlocks.records {
            if next.records.insert(id.clone()) {
                delta.records.insert(id.clone());
            }
        }

        if !delta.is_empty() {
            debug!(
                suspects = delta.suspects.len(),
                scenes = delta.scenes.len(),
                records = delta.records.len(),
                "applied unlock directive"
            );
        }

        (next, delta)
    }

    /// Union with another unlocked set. Used by reconciliation.
    pub fn merge(&self, other: &UnlockedContent) -> UnlockedContent {
        let mut merged = self.clone();
        merged.suspects.extend(other.suspects.iter().cloned());
        merged.scenes.extend(other.scenes.iter().cloned());
        merged.records.extend(other.records.iter().cloned());
        merged
    }

    /// Monotonicity check: does `self` contain everything in `earlier`?
    pub fn is_superset_of(&self, earlier: &UnlockedContent) -> bool {
        earlier.suspects.is_subset(&self.suspects)
            && earlier.scenes.is_subset(&self.scenes)
            && earlier.records.is_subset(&self.records)
    }

    pub fn is_empty(&self) -> bool {
        self.suspects.is_empty() && self.scenes.is_empty() && self.records.is_empty()
    }
}

/// Condition-driven gate check for a catalog entry.
///
/// Open when the entry has no condition, or when every required fact has
/// been discovered.
pub fn catalog_gate_open(
    condition: Option<&UnlockCondition>,
    discovered: &BTreeSet<FactId>,
) -> bool {
    match condition {
        None => true,
        Some(c) => c.required_facts.is_subset(discovered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fact_set;

    fn unlocks(suspects: &[&str], scenes: &[&str], records: &[&str]) -> RuleUnlocks {
        RuleUnlocks {
            suspects: suspects.iter().map(|s| SuspectId::from(*s)).collect(),
            scenes: scenes.iter().map(|s| SceneId::from(*s)).collect(),
            records: records.iter().map(|r| RecordId::from(*r)).collect(),
            stage: None,
        }
    }

    #[test]
    fn test_apply_returns_delta() {
        let current = UnlockedContent::new();
        let (next, delta) = current.apply(&unlocks(&["s_butler"], &["sc_cellar"], &[]));

        assert!(next.suspects.contains(&SuspectId::from("s_butler")));
        assert!(next.scenes.contains(&SceneId::from("sc_cellar")));
        assert_eq!(delta.suspects.len(), 1);
        assert_eq!(delta.scenes.len(), 1);
        assert!(delta.records.is_empty());

        // Caller's copy untouched.
        assert!(current.is_empty());
    }

    #[test]
    fn test_reapply_is_noop() {
        let current = UnlockedContent::new();
        let (next, _) = current.apply(&unlocks(&["s_butler"], &[], &[]));
        let (again, delta) = next.apply(&unlocks(&["s_butler"], &[], &[]));

        assert_eq!(next, again);
        assert!(delta.is_empty(), "re-add produces no notification");
    }

    #[test]
    fn test_monotone_growth() {
        let mut current = UnlockedContent::new();
        let steps = [
            unlocks(&["s_butler"], &[], &[]),
            unlocks(&[], &["sc_cellar"], &["r_will"]),
            unlocks(&["s_sister"], &["sc_cellar"], &[]),
        ];

        for step in &steps {
            let (next, _) = current.apply(step);
            assert!(next.is_superset_of(&current));
            current = next;
        }
        assert_eq!(current.suspects.len(), 2);
    }

    #[test]
    fn test_merge_unions() {
        let (a, _) = UnlockedContent::new().apply(&unlocks(&["s_butler"], &[], &[]));
        let (b, _) = UnlockedContent::new().apply(&unlocks(&["s_sister"], &[], &["r_will"]));

        let merged = a.merge(&b);
        assert!(merged.is_superset_of(&a));
        assert!(merged.is_superset_of(&b));
        assert_eq!(merged.suspects.len(), 2);
        assert_eq!(merged.records.len(), 1);
    }

    #[test]
    fn test_gate_absent_condition_is_open() {
        assert!(catalog_gate_open(None, &BTreeSet::new()));
    }

    #[test]
    fn test_gate_requires_all_facts() {
        let condition = UnlockCondition {
            required_facts: fact_set(["f1", "f2"]),
        };

        assert!(!catalog_gate_open(Some(&condition), &fact_set(["f1"])));
        assert!(catalog_gate_open(Some(&condition), &fact_set(["f1", "f2"])));
        assert!(catalog_gate_open(
            Some(&condition),
            &fact_set(["f1", "f2", "f3"])
        ));
    }
}
