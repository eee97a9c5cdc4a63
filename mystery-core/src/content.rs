//! Case content definitions and the validated content index.
//!
//! A case bundle is immutable for the lifetime of a session: facts, theory
//! rules, the single solution, contextual clues, and the suspect/scene/record
//! catalog are loaded once, validated strictly, and served read-only.

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// ID Types
// ============================================================================

macro_rules! content_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

content_id!(
    /// Identifier for a case bundle.
    CaseId
);
content_id!(
    /// Author-assigned identifier for a catalog fact.
    FactId
);
content_id!(
    /// Identifier for a suspect.
    SuspectId
);
content_id!(
    /// Identifier for an examinable scene.
    SceneId
);
content_id!(
    /// Identifier for a reviewable record (document, report, photo).
    RecordId
);
content_id!(
    /// Identifier for a theory rule.
    RuleId
);

// ============================================================================
// Facts
// ============================================================================

/// Broad classification of a catalog fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Testimony,
    PhysicalEvidence,
    Timeline,
    Motive,
    Background,
}

/// A collaborator a fact may legitimately be discovered from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    Suspect(SuspectId),
    Scene(SceneId),
    Record(RecordId),
}

/// A catalog-defined piece of case knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,

    /// Human-readable content of the fact.
    pub content: String,

    pub category: FactCategory,

    /// Importance score (0.0 - 1.0) for display prioritization.
    #[serde(default = "default_importance")]
    pub importance: f32,

    /// Every collaborator this fact may be discovered from.
    #[serde(default)]
    pub sources: BTreeSet<SourceRef>,
}

fn default_importance() -> f32 {
    0.5
}

// ============================================================================
// Theory Rules
// ============================================================================

/// Outcome class of a matched theory rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryVerdict {
    Correct,
    Partial,
    Incorrect,
}

/// Content a matched rule unlocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUnlocks {
    #[serde(default)]
    pub suspects: Vec<SuspectId>,

    #[serde(default)]
    pub scenes: Vec<SceneId>,

    #[serde(default)]
    pub records: Vec<RecordId>,

    /// Explicit stage directive. The only way any code path moves the stage.
    #[serde(default)]
    pub stage: Option<Stage>,
}

/// A mid-game checkpoint rule.
///
/// Rules live in a `Vec`, not a set: declaration order is the evaluation
/// order, and the first rule whose `required_facts` is a subset of the
/// submitted evidence wins. Overlapping rules are resolved by position,
/// never by specificity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheoryRule {
    pub id: RuleId,

    pub required_facts: BTreeSet<FactId>,

    pub result: TheoryVerdict,

    /// Feedback text shown to the player when this rule matches.
    pub feedback: String,

    #[serde(default)]
    pub unlocks: Option<RuleUnlocks>,
}

// ============================================================================
// Solution
// ============================================================================

/// The single end-game correctness check for a case.
///
/// Validated on a separate code path from theory rules: an accusation is
/// correct iff the killer matches exactly and `required_evidence` is a
/// subset of the submitted evidence. No partial credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub killer: SuspectId,

    pub required_evidence: BTreeSet<FactId>,

    pub narrative_correct: String,

    /// May contain a `{killer}` placeholder, substituted with the accused
    /// suspect's catalog name.
    pub narrative_incorrect: String,
}

// ============================================================================
// Clues
// ============================================================================

/// Predicate deciding whether a clue applies to the current session state.
///
/// Quantifier asymmetry, preserved from the source material: every id in
/// `discovered_facts` must already be known, while a single known id in
/// `missing_facts` suppresses the clue. Case authors should be warned that
/// `missing_facts` is an ANY, not an ALL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClueContext {
    /// Minimum number of player actions before the clue applies.
    #[serde(default)]
    pub min_actions: Option<u32>,

    /// ALL of these must be discovered.
    #[serde(default)]
    pub discovered_facts: Vec<FactId>,

    /// Skip the clue if ANY of these is discovered.
    #[serde(default)]
    pub missing_facts: Vec<FactId>,
}

impl ClueContext {
    /// Evaluate the predicate against current session state.
    pub fn is_satisfied(&self, action_count: u32, discovered: &BTreeSet<FactId>) -> bool {
        if let Some(min) = self.min_actions {
            if action_count < min {
                return false;
            }
        }
        if !self.discovered_facts.iter().all(|f| discovered.contains(f)) {
            return false;
        }
        if self.missing_facts.iter().any(|f| discovered.contains(f)) {
            return false;
        }
        true
    }
}

/// A contextual hint, recomputed fresh from session state on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clue {
    pub text: String,

    /// Higher priority wins when several clues apply.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub context: ClueContext,
}

// ============================================================================
// Catalog Entries
// ============================================================================

/// Fact-discovery gate on a catalog entry. Absent means always available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockCondition {
    pub required_facts: BTreeSet<FactId>,
}

/// A suspect the player can interrogate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspect {
    pub id: SuspectId,
    pub name: String,
    #[serde(default)]
    pub unlock_condition: Option<UnlockCondition>,
}

/// A location the player can examine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    #[serde(default)]
    pub unlock_condition: Option<UnlockCondition>,
}

/// A document or report the player can review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub unlock_condition: Option<UnlockCondition>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from loading or validating a case bundle.
///
/// All of these are fatal and surface at load time; nothing here is
/// recovered during gameplay.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("case bundle not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate fact id: {0}")]
    DuplicateFact(FactId),

    #[error("duplicate {kind} id: {id}")]
    DuplicateEntry { kind: &'static str, id: String },

    #[error("{referrer} references unknown fact id: {fact}")]
    UnknownFact { referrer: String, fact: FactId },

    #[error("{referrer} references unknown {kind} id: {id}")]
    UnknownEntry {
        referrer: String,
        kind: &'static str,
        id: String,
    },

    #[error("case must define exactly one solution, found {0}")]
    SolutionCount(usize),

    #[error("solution names unknown killer: {0}")]
    UnknownKiller(SuspectId),
}

// ============================================================================
// Case Content Index
// ============================================================================

/// Raw bundle shape as authored. Converted into a [`CaseContent`] by the
/// strict validation pass; never used directly by gameplay code.
#[derive(Debug, Deserialize)]
struct RawCase {
    id: CaseId,
    title: String,
    #[serde(default)]
    facts: Vec<Fact>,
    #[serde(default)]
    theory_rules: Vec<TheoryRule>,
    /// Authored as a list so that zero or multiple solutions is a
    /// detectable authoring error rather than a parse failure.
    #[serde(default)]
    solutions: Vec<Solution>,
    #[serde(default)]
    clues: Vec<Clue>,
    #[serde(default)]
    suspects: Vec<Suspect>,
    #[serde(default)]
    scenes: Vec<Scene>,
    #[serde(default)]
    records: Vec<CaseRecord>,
}

/// The validated, read-only content index for one case.
#[derive(Debug, Clone)]
pub struct CaseContent {
    id: CaseId,
    title: String,
    facts: Vec<Fact>,
    fact_index: HashMap<FactId, usize>,
    theory_rules: Vec<TheoryRule>,
    solution: Solution,
    /// Sorted by descending priority at load time.
    clues: Vec<Clue>,
    suspects: Vec<Suspect>,
    suspect_index: HashMap<SuspectId, usize>,
    scenes: Vec<Scene>,
    scene_index: HashMap<SceneId, usize>,
    records: Vec<CaseRecord>,
    record_index: HashMap<RecordId, usize>,
}

impl CaseContent {
    /// Parse and validate a case bundle from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let raw: RawCase = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Parse and validate a case bundle from an in-memory JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ContentError> {
        let raw: RawCase = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    /// Load and validate a case bundle from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContentError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    fn from_raw(raw: RawCase) -> Result<Self, ContentError> {
        // Fact catalog: ids must be unique.
        let mut fact_index = HashMap::new();
        for (i, fact) in raw.facts.iter().enumerate() {
            if fact_index.insert(fact.id.clone(), i).is_some() {
                return Err(ContentError::DuplicateFact(fact.id.clone()));
            }
        }

        let suspect_index = index_entries("suspect", raw.suspects.iter().map(|s| s.id.as_str()))?;
        let scene_index_raw = index_entries("scene", raw.scenes.iter().map(|s| s.id.as_str()))?;
        let record_index_raw = index_entries("record", raw.records.iter().map(|r| r.id.as_str()))?;

        let known_fact = |id: &FactId| fact_index.contains_key(id);

        // Theory rules: every referenced fact and unlock target must exist.
        for rule in &raw.theory_rules {
            let referrer = format!("theory rule '{}'", rule.id);
            for fact in &rule.required_facts {
                if !known_fact(fact) {
                    return Err(ContentError::UnknownFact {
                        referrer: referrer.clone(),
                        fact: fact.clone(),
                    });
                }
            }
            if let Some(unlocks) = &rule.unlocks {
                check_unlock_targets(
                    &referrer,
                    unlocks,
                    &suspect_index,
                    &scene_index_raw,
                    &record_index_raw,
                )?;
            }
        }

        // Catalog unlock conditions.
        let conditions = raw
            .suspects
            .iter()
            .map(|s| (format!("suspect '{}'", s.id), &s.unlock_condition))
            .chain(
                raw.scenes
                    .iter()
                    .map(|s| (format!("scene '{}'", s.id), &s.unlock_condition)),
            )
            .chain(
                raw.records
                    .iter()
                    .map(|r| (format!("record '{}'", r.id), &r.unlock_condition)),
            );
        for (referrer, condition) in conditions {
            if let Some(condition) = condition {
                for fact in &condition.required_facts {
                    if !known_fact(fact) {
                        return Err(ContentError::UnknownFact {
                            referrer: referrer.clone(),
                            fact: fact.clone(),
                        });
                    }
                }
            }
        }

        // Exactly one solution, naming a known killer and known evidence.
        let mut solutions = raw.solutions;
        let solution = match solutions.pop() {
            Some(solution) if solutions.is_empty() => solution,
            Some(_) => return Err(ContentError::SolutionCount(solutions.len() + 1)),
            None => return Err(ContentError::SolutionCount(0)),
        };
        if !suspect_index.contains(solution.killer.as_str()) {
            return Err(ContentError::UnknownKiller(solution.killer.clone()));
        }
        for fact in &solution.required_evidence {
            if !known_fact(fact) {
                return Err(ContentError::UnknownFact {
                    referrer: "solution".to_string(),
                    fact: fact.clone(),
                });
            }
        }

        // Clue contexts.
        for (i, clue) in raw.clues.iter().enumerate() {
            let referrer = format!("clue #{i}");
            for fact in clue
                .context
                .discovered_facts
                .iter()
                .chain(clue.context.missing_facts.iter())
            {
                if !known_fact(fact) {
                    return Err(ContentError::UnknownFact {
                        referrer: referrer.clone(),
                        fact: fact.clone(),
                    });
                }
            }
        }

        let mut clues = raw.clues;
        clues.sort_by(|a, b| b.priority.cmp(&a.priority));

        let suspect_index = raw
            .suspects
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let scene_index = raw
            .scenes
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let record_index = raw
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        Ok(Self {
            id: raw.id,
            title: raw.title,
            facts: raw.facts,
            fact_index,
            theory_rules: raw.theory_rules,
            solution,
            clues,
            suspects: raw.suspects,
            suspect_index,
            scenes: raw.scenes,
            scene_index,
            records: raw.records,
            record_index,
        })
    }

    // ------------------------------------------------------------------------
    // Read-only accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> &CaseId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Look up a catalog fact by id.
    pub fn fact(&self, id: &FactId) -> Option<&Fact> {
        self.fact_index.get(id).map(|&i| &self.facts[i])
    }

    /// Whether the catalog defines this fact id.
    pub fn has_fact(&self, id: &FactId) -> bool {
        self.fact_index.contains_key(id)
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Theory rules in declaration (= evaluation) order.
    pub fn theory_rules(&self) -> &[TheoryRule] {
        &self.theory_rules
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// Clues sorted by descending priority.
    pub fn clues_by_priority(&self) -> &[Clue] {
        &self.clues
    }

    pub fn suspect(&self, id: &SuspectId) -> Option<&Suspect> {
        self.suspect_index.get(id).map(|&i| &self.suspects[i])
    }

    pub fn scene(&self, id: &SceneId) -> Option<&Scene> {
        self.scene_index.get(id).map(|&i| &self.scenes[i])
    }

    pub fn record(&self, id: &RecordId) -> Option<&CaseRecord> {
        self.record_index.get(id).map(|&i| &self.records[i])
    }

    pub fn suspects(&self) -> &[Suspect] {
        &self.suspects
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }
}

fn index_entries<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<String>, ContentError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.to_string()) {
            return Err(ContentError::DuplicateEntry {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(seen)
}

fn check_unlock_targets(
    referrer: &str,
    unlocks: &RuleUnlocks,
    suspects: &HashSet<String>,
    scenes: &HashSet<String>,
    records: &HashSet<String>,
) -> Result<(), ContentError> {
    for id in &unlocks.suspects {
        if !suspects.contains(id.as_str()) {
            return Err(ContentError::UnknownEntry {
                referrer: referrer.to_string(),
                kind: "suspect",
                id: id.to_string(),
            });
        }
    }
    for id in &unlocks.scenes {
        if !scenes.contains(id.as_str()) {
            return Err(ContentError::UnknownEntry {
                referrer: referrer.to_string(),
                kind: "scene",
                id: id.to_string(),
            });
        }
    }
    for id in &unlocks.records {
        if !records.contains(id.as_str()) {
            return Err(ContentError::UnknownEntry {
                referrer: referrer.to_string(),
                kind: "record",
                id: id.to_string(),
            });
        }
    }
    Ok(())
}
