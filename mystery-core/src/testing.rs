//! Testing utilities for the investigation engine.
//!
//! Provides a small but complete sample case used across the test suite,
//! a [`Playthrough`] harness for scripted scenarios against the sync
//! coordinator, and assertion helpers for verifying session state.

use crate::content::{CaseContent, FactId, SuspectId};
use crate::facts::{DiscoveredFact, DiscoverySource};
use crate::session::{Accusation, GameSession, SolutionReport, TheoryReport};
use crate::stage::Stage;
use crate::sync::{MemoryStore, SessionSnapshot, SyncCoordinator, SyncError};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Build a fact-id set from string literals.
pub fn fact_set<'a>(ids: impl IntoIterator<Item = &'a str>) -> BTreeSet<FactId> {
    ids.into_iter().map(FactId::from).collect()
}

/// A compact murder case exercising every engine mechanism: overlapping
/// rules, stage directives (one deliberately illegal), both unlock
/// mechanisms, clue suppression, and a placeholdered solution narrative.
pub fn sample_case() -> CaseContent {
    let bundle = serde_json::json!({
        "id": "blackwood-manor",
        "title": "The Blackwood Manor Affair",
        "facts": [
            {
                "id": "f_poison_bottle",
                "content": "A half-empty bottle of rat poison hidden behind the brandy decanter",
                "category": "physical_evidence",
                "importance": 0.9,
                "sources": [{"scene": "sc_study"}]
            },
            {
                "id": "f_pharmacy_receipt",
                "content": "A pharmacy receipt for rat poison, signed three days before the death",
                "category": "physical_evidence",
                "importance": 0.8,
                "sources": [{"record": "r_pharmacy_ledger"}]
            },
            {
                "id": "f_no_forced_entry",
                "content": "No window or door shows any sign of forced entry",
                "category": "timeline",
                "sources": [{"scene": "sc_study"}]
            },
            {
                "id": "f_locked_door",
                "content": "The study door was locked from the inside",
                "category": "timeline",
                "sources": [{"scene": "sc_study"}]
            },
            {
                "id": "f_forged_will",
                "content": "The signature on the amended will does not match Lord Blackwood's hand",
                "category": "physical_evidence",
                "importance": 0.9,
                "sources": [{"record": "r_will"}]
            },
            {
                "id": "f_inheritance_motive",
                "content": "Vivian inherits the estate only under the amended will",
                "category": "motive",
                "sources": [{"suspect": "s_butler"}]
            }
        ],
        "suspects": [
            {"id": "s_butler", "name": "Edmund Gray"},
            {
                "id": "s_sister",
                "name": "Vivian Ashcroft",
                "unlock_condition": {"required_facts": ["f_forged_will"]}
            },
            {"id": "s_chauffeur", "name": "Tom Hollis"}
        ],
        "scenes": [
            {"id": "sc_study", "name": "The Study"},
            {
                "id": "sc_cellar",
                "name": "The Wine Cellar",
                "unlock_condition": {"required_facts": ["f_locked_door"]}
            }
        ],
        "records": [
            {"id": "r_will", "name": "The Amended Will"},
            {
                "id": "r_pharmacy_ledger",
                "name": "Crowhurst Pharmacy Ledger",
                "unlock_condition": {"required_facts": ["f_poison_bottle"]}
            }
        ],
        "theory_rules": [
            {
                "id": "r_first_break",
                "required_facts": ["f_poison_bottle", "f_no_forced_entry"],
                "result": "correct",
                "feedback": "Poison, and no intruder. Someone in this house did it.",
                "unlocks": {"scenes": ["sc_cellar"], "stage": "act_i"}
            },
            {
                "id": "r_poison_hunch",
                "required_facts": ["f_poison_bottle"],
                "result": "partial",
                "feedback": "The poison matters, but who bought it?",
                "unlocks": {"records": ["r_pharmacy_ledger"]}
            },
            {
                "id": "r_poison_proof",
                "required_facts": ["f_poison_bottle", "f_pharmacy_receipt"],
                "result": "partial",
                "feedback": "You can prove the poison was bought deliberately."
            },
            {
                "id": "r_too_eager",
                "required_facts": ["f_forged_will", "f_locked_door"],
                "result": "partial",
                "feedback": "A forged will and a locked door don't yet make a case.",
                "unlocks": {"stage": "act_ii"}
            },
            {
                "id": "r_motive",
                "required_facts": ["f_forged_will", "f_inheritance_motive"],
                "result": "correct",
                "feedback": "The forged will gives Vivian everything. Now prove she acted on it.",
                "unlocks": {"suspects": ["s_sister"], "stage": "act_ii"}
            }
        ],
        "solutions": [
            {
                "killer": "s_sister",
                "required_evidence": ["f_poison_bottle", "f_forged_will"],
                "narrative_correct": "Vivian Ashcroft goes very still as the forged will and the hidden poison are laid side by side. The estate was never going to be hers any other way.",
                "narrative_incorrect": "{killer} protests, and the evidence agrees: nothing ties {killer} to the poison. The real killer walks free."
            }
        ],
        "clues": [
            {
                "text": "Begin where the body was found: the study holds more than grief.",
                "priority": 10,
                "context": {"missing_facts": ["f_poison_bottle"]}
            },
            {
                "text": "Poison has a paper trail. Someone signed for it at the pharmacy.",
                "priority": 5,
                "context": {
                    "discovered_facts": ["f_poison_bottle"],
                    "missing_facts": ["f_pharmacy_receipt"]
                }
            },
            {
                "text": "Lay out what you have on the board; a theory may force the next door open.",
                "priority": 1,
                "context": {"min_actions": 4}
            }
        ]
    });

    match CaseContent::from_value(bundle) {
        Ok(content) => content,
        Err(e) => panic!("sample case must validate: {e}"),
    }
}

/// A fresh session over the sample case.
pub fn sample_session() -> GameSession {
    GameSession::new(Arc::new(sample_case()))
}

/// An accusation with stock prose, for tests that only care about the
/// killer and evidence.
pub fn accuse<'a>(killer: &str, evidence: impl IntoIterator<Item = &'a str>) -> Accusation {
    Accusation {
        killer: SuspectId::from(killer),
        motive: "the inheritance".to_string(),
        key_evidence: fact_set(evidence),
        explanation: "The evidence leaves no other possibility.".to_string(),
    }
}

/// Scripted scenario harness over a coordinator with an in-memory store.
pub struct Playthrough {
    coordinator: SyncCoordinator<MemoryStore>,
}

impl Playthrough {
    /// Start a playthrough of the sample case.
    pub fn new() -> Self {
        Self {
            coordinator: SyncCoordinator::new(sample_session(), MemoryStore::new()),
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator<MemoryStore> {
        &self.coordinator
    }

    /// Discover a catalog fact by id, attributed to a chat source.
    pub async fn discover(&self, fact_id: &str) -> Result<DiscoveredFact, SyncError> {
        self.coordinator
            .discover_fact(fact_id, DiscoverySource::Chat, "harness")
            .await
    }

    pub async fn submit_theory<'a>(
        &self,
        description: &str,
        evidence: impl IntoIterator<Item = &'a str>,
    ) -> Result<TheoryReport, SyncError> {
        self.coordinator
            .submit_theory(description, fact_set(evidence))
            .await
    }

    pub async fn accuse<'a>(
        &self,
        killer: &str,
        evidence: impl IntoIterator<Item = &'a str>,
    ) -> Result<SolutionReport, SyncError> {
        self.coordinator.submit_solution(&accuse(killer, evidence)).await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.coordinator.snapshot().await
    }
}

impl Default for Playthrough {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the snapshot is at the expected stage.
#[track_caller]
pub fn assert_stage(snapshot: &SessionSnapshot, expected: Stage) {
    assert_eq!(
        snapshot.stage, expected,
        "expected stage {expected}, got {}",
        snapshot.stage
    );
}

/// Assert a suspect id is in the rule-unlocked set.
#[track_caller]
pub fn assert_unlocked_suspect(snapshot: &SessionSnapshot, id: &str) {
    assert!(
        snapshot.unlocked.suspects.contains(&SuspectId::from(id)),
        "expected suspect '{id}' to be unlocked; unlocked: {:?}",
        snapshot.unlocked.suspects
    );
}

/// Assert the number of recorded discoveries.
#[track_caller]
pub fn assert_fact_count(snapshot: &SessionSnapshot, expected: usize) {
    assert_eq!(
        snapshot.discovered.len(),
        expected,
        "expected {expected} discoveries, got {}",
        snapshot.discovered.len()
    );
}

/// Assert the number of recorded theory submissions.
#[track_caller]
pub fn assert_submission_count(snapshot: &SessionSnapshot, expected: usize) {
    assert_eq!(
        snapshot.submissions.len(),
        expected,
        "expected {expected} submissions, got {}",
        snapshot.submissions.len()
    );
}
