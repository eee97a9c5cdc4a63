//! The session aggregate and its mutation pipeline.
//!
//! A [`GameSession`] is the single session-scoped aggregate for one
//! player/case pair. All state it owns (discoveries, unlocks, stage,
//! submission history) mutates exclusively through the pipeline in this
//! module: evaluate, then resolve unlocks, then move stage, as one atomic
//! step per player action. It is never a process-wide singleton; callers
//! hold it by value or behind the sync coordinator.

use crate::content::{CaseContent, Clue, FactId, RecordId, SceneId, SuspectId, TheoryVerdict};
use crate::facts::{unix_now, DiscoveredFact, DiscoverySource, FactStore};
use crate::stage::{self, Stage, StageChange, StageError};
use crate::theory::{self, SubmissionError};
use crate::unlocks::{catalog_gate_open, UnlockDelta, UnlockedContent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Feedback used when no theory rule matches. The content index never
/// invents text, so the session supplies this stock line.
const NO_MATCH_FEEDBACK: &str =
    "The pieces don't fit together yet. Keep digging and try another angle.";

/// Unique identifier for a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("the case is closed; no further discoveries are recorded")]
    SessionCompleted,
}

/// A recorded theory submission, with its content-addressed key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheorySubmission {
    /// Idempotency key: same description + same artifact-id set within a
    /// session means the same submission, not a new one.
    pub key: String,
    pub description: String,
    pub artifact_ids: BTreeSet<FactId>,
    pub verdict: TheoryVerdict,
    pub feedback: String,
    pub submitted_at: u64,
}

/// Outcome of a theory submission, handed to rendering collaborators.
#[derive(Debug, Clone)]
pub struct TheoryReport {
    pub verdict: TheoryVerdict,
    pub feedback: String,
    pub unlock_delta: UnlockDelta,
    pub stage_change: Option<StageChange>,
    /// True when this was a retried submission replaying a stored outcome;
    /// no effects were applied.
    pub replay: bool,
}

/// A final accusation as submitted by the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accusation {
    pub killer: SuspectId,
    pub motive: String,
    pub key_evidence: BTreeSet<FactId>,
    pub explanation: String,
}

/// Outcome of a final accusation.
#[derive(Debug, Clone)]
pub struct SolutionReport {
    pub is_correct: bool,
    pub narrative: String,
    pub stage_change: Option<StageChange>,
}

/// Derive the content-addressed idempotency key for a theory submission.
///
/// Every part is length-prefixed, so a description or fact id containing
/// the delimiter characters cannot collide with a different submission.
pub fn submission_key(description: &str, artifact_ids: &BTreeSet<FactId>) -> String {
    let description = description.trim();
    let mut key = format!("{}:{description}", description.len());
    for id in artifact_ids {
        key.push('|');
        key.push_str(&id.as_str().len().to_string());
        key.push(':');
        key.push_str(id.as_str());
    }
    key
}

/// One player's progress through one case.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    content: Arc<CaseContent>,
    facts: FactStore,
    unlocked: UnlockedContent,
    stage: Stage,
    submissions: Vec<TheorySubmission>,
    action_count: u32,
    is_completed: bool,
    is_solved_correctly: bool,
}

impl GameSession {
    /// Start a fresh session over a loaded case.
    pub fn new(content: Arc<CaseContent>) -> Self {
        Self {
            id: SessionId::new(),
            content,
            facts: FactStore::new(),
            unlocked: UnlockedContent::new(),
            stage: Stage::Start,
            submissions: Vec::new(),
            action_count: 0,
            is_completed: false,
            is_solved_correctly: false,
        }
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Record a fact-discovered event from a collaborator.
    ///
    /// Resolves the event against the catalog (by fact id, then by exact
    /// content match) and appends it idempotently. Counts as a player
    /// action only when it records something new.
    pub fn discover_fact(
        &mut self,
        text: &str,
        source: DiscoverySource,
        source_id: &str,
    ) -> Result<DiscoveredFact, SessionError> {
        if self.is_completed {
            return Err(SessionError::SessionCompleted);
        }

        let already_known = self.facts.contains(text, source_id);
        let fact_ref = self.resolve_fact_ref(text);
        let record = self
            .facts
            .discover(text, source, source_id, fact_ref)
            .clone();

        if !already_known {
            self.action_count += 1;
        }
        Ok(record)
    }

    fn resolve_fact_ref(&self, text: &str) -> Option<FactId> {
        let as_id = FactId::new(text);
        if self.content.has_fact(&as_id) {
            return Some(as_id);
        }
        self.content
            .facts()
            .iter()
            .find(|f| f.content == text)
            .map(|f| f.id.clone())
    }

    // ------------------------------------------------------------------------
    // Theory submission
    // ------------------------------------------------------------------------

    /// Submit a theory: evaluate, unlock, and advance stage atomically.
    ///
    /// A retried submission (same description, same artifact-id set)
    /// replays the stored outcome without applying any effect. Once the
    /// session is completed, submissions are still evaluated for display
    /// but mutate nothing.
    pub fn submit_theory(
        &mut self,
        description: &str,
        artifact_ids: impl IntoIterator<Item = FactId>,
    ) -> Result<TheoryReport, SessionError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(SubmissionError::EmptyDescription.into());
        }
        let submitted: BTreeSet<FactId> = artifact_ids.into_iter().collect();
        theory::validate_evidence(&self.content, &submitted)?;

        let key = submission_key(description, &submitted);
        if let Some(existing) = self.submissions.iter().find(|s| s.key == key) {
            return Ok(TheoryReport {
                verdict: existing.verdict,
                feedback: existing.feedback.clone(),
                unlock_delta: UnlockDelta::default(),
                stage_change: None,
                replay: true,
            });
        }

        // Evaluate against the ordered rule list, then drop the content
        // borrow before committing anything.
        let (verdict, feedback, unlocks) = match theory::evaluate_theory(&self.content, &submitted)?
        {
            Some(rule) => (rule.result, rule.feedback.clone(), rule.unlocks.clone()),
            None => (TheoryVerdict::Incorrect, NO_MATCH_FEEDBACK.to_string(), None),
        };

        if self.is_completed {
            return Ok(TheoryReport {
                verdict,
                feedback,
                unlock_delta: UnlockDelta::default(),
                stage_change: None,
                replay: false,
            });
        }

        // Compute all effects on temporaries first; nothing below can fail
        // once the stage directive has validated.
        let (next_unlocked, unlock_delta) = match &unlocks {
            Some(u) => self.unlocked.apply(u),
            None => (self.unlocked.clone(), UnlockDelta::default()),
        };
        let stage_change = match unlocks.as_ref().and_then(|u| u.stage) {
            Some(to) => Some(stage::advance(self.stage, to)?),
            None => None,
        };

        self.unlocked = next_unlocked;
        if let Some(change) = &stage_change {
            self.stage = change.to;
        }
        self.submissions.push(TheorySubmission {
            key,
            description: description.to_string(),
            artifact_ids: submitted,
            verdict,
            feedback: feedback.clone(),
            submitted_at: unix_now(),
        });
        self.action_count += 1;

        Ok(TheoryReport {
            verdict,
            feedback,
            unlock_delta,
            stage_change,
            replay: false,
        })
    }

    // ------------------------------------------------------------------------
    // Final accusation
    // ------------------------------------------------------------------------

    /// Submit the final accusation.
    ///
    /// A valid accusation always closes the case: `is_completed` becomes
    /// true and `is_solved_correctly` records whether the player got it
    /// right (both write-once). The stage moves to `Completed` only when
    /// the session already reached `act_ii`; an early accusation closes
    /// the flags without skipping stages.
    pub fn submit_solution(&mut self, accusation: &Accusation) -> Result<SolutionReport, SessionError> {
        let outcome =
            theory::evaluate_solution(&self.content, &accusation.killer, &accusation.key_evidence)?;

        if self.is_completed {
            return Ok(SolutionReport {
                is_correct: outcome.is_correct,
                narrative: outcome.narrative,
                stage_change: None,
            });
        }

        let stage_change = if self.stage.successor() == Some(Stage::Completed) {
            let change = stage::advance(self.stage, Stage::Completed)?;
            self.stage = change.to;
            Some(change)
        } else {
            None
        };

        self.is_completed = true;
        if outcome.is_correct {
            self.is_solved_correctly = true;
        }
        self.action_count += 1;

        Ok(SolutionReport {
            is_correct: outcome.is_correct,
            narrative: outcome.narrative,
            stage_change,
        })
    }

    // ------------------------------------------------------------------------
    // Clues and availability
    // ------------------------------------------------------------------------

    /// The highest-priority clue whose context predicate holds right now.
    ///
    /// Recomputed fresh from `(action_count, discovered fact ids)` on every
    /// call; clues are never persisted.
    pub fn next_clue(&self) -> Option<&Clue> {
        let discovered = self.facts.discovered_fact_ids();
        self.content
            .clues_by_priority()
            .iter()
            .find(|c| c.context.is_satisfied(self.action_count, &discovered))
    }

    /// Whether a suspect is renderable as available.
    ///
    /// Rule-driven and condition-driven unlocks coexist; either grants
    /// availability. An entry with no condition and no rule unlock is
    /// always available.
    pub fn is_suspect_available(&self, id: &SuspectId) -> bool {
        match self.content.suspect(id) {
            None => false,
            Some(s) => {
                self.unlocked.suspects.contains(id)
                    || catalog_gate_open(
                        s.unlock_condition.as_ref(),
                        &self.facts.discovered_fact_ids(),
                    )
            }
        }
    }

    /// Whether a scene is renderable as available.
    pub fn is_scene_available(&self, id: &SceneId) -> bool {
        match self.content.scene(id) {
            None => false,
            Some(s) => {
                self.unlocked.scenes.contains(id)
                    || catalog_gate_open(
                        s.unlock_condition.as_ref(),
                        &self.facts.discovered_fact_ids(),
                    )
            }
        }
    }

    /// Whether a record is renderable as available.
    pub fn is_record_available(&self, id: &RecordId) -> bool {
        match self.content.record(id) {
            None => false,
            Some(r) => {
                self.unlocked.records.contains(id)
                    || catalog_gate_open(
                        r.unlock_condition.as_ref(),
                        &self.facts.discovered_fact_ids(),
                    )
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------------

    /// Reset the whole session atomically.
    ///
    /// Discoveries, submission history, unlocked content, stage, action
    /// count, and completion flags all clear together. Partial resets do
    /// not exist.
    pub fn reset(&mut self) {
        self.facts = FactStore::new();
        self.unlocked = UnlockedContent::new();
        self.stage = Stage::Start;
        self.submissions.clear();
        self.action_count = 0;
        self.is_completed = false;
        self.is_solved_correctly = false;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn content(&self) -> &Arc<CaseContent> {
        &self.content
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn unlocked(&self) -> &UnlockedContent {
        &self.unlocked
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn submissions(&self) -> &[TheorySubmission] {
        &self.submissions
    }

    pub fn action_count(&self) -> u32 {
        self.action_count
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn is_solved_correctly(&self) -> bool {
        self.is_solved_correctly
    }

    // Crate-internal constructor used by snapshot restore.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: SessionId,
        content: Arc<CaseContent>,
        facts: FactStore,
        unlocked: UnlockedContent,
        stage: Stage,
        submissions: Vec<TheorySubmission>,
        action_count: u32,
        is_completed: bool,
        is_solved_correctly: bool,
    ) -> Self {
        Self {
            id,
            content,
            facts,
            unlocked,
            stage,
            submissions,
            action_count,
            is_completed,
            is_solved_correctly,
        }
    }
}
