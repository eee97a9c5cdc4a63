//! Theory and solution evaluation.
//!
//! Two independent code paths. Theory submissions walk the ordered rule
//! list; accusations are checked directly against the case solution and
//! never consult the rules. Malformed input is rejected before any
//! evaluation happens, not silently treated as a non-match.

use crate::content::{CaseContent, FactId, SuspectId, TheoryRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Placeholder in `narrative_incorrect` replaced by the accused's name.
const KILLER_PLACEHOLDER: &str = "{killer}";

/// Fallback when the accused id has no catalog entry.
const UNKNOWN_ACCUSED: &str = "the accused";

/// Malformed player input, rejected before evaluation.
///
/// Surfaced as form validation to the player; not a system fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("submission carries no evidence")]
    EmptyEvidence,

    #[error("submission references unknown fact id: {0}")]
    UnknownFact(FactId),

    #[error("submission has an empty description")]
    EmptyDescription,
}

/// Reject empty or unresolvable evidence sets up front.
pub fn validate_evidence(
    content: &CaseContent,
    evidence: &BTreeSet<FactId>,
) -> Result<(), SubmissionError> {
    if evidence.is_empty() {
        return Err(SubmissionError::EmptyEvidence);
    }
    for id in evidence {
        if !content.has_fact(id) {
            return Err(SubmissionError::UnknownFact(id.clone()));
        }
    }
    Ok(())
}

/// Match a submitted evidence set against the ordered rule list.
///
/// First match wins: rules are evaluated in declaration order and the first
/// whose `required_facts` is a subset of the submission is returned. `None`
/// means no rule matched; the caller synthesizes a generic incorrect result
/// (the evaluator does not invent feedback text).
pub fn evaluate_theory<'a>(
    content: &'a CaseContent,
    submitted: &BTreeSet<FactId>,
) -> Result<Option<&'a TheoryRule>, SubmissionError> {
    validate_evidence(content, submitted)?;

    Ok(content
        .theory_rules()
        .iter()
        .find(|rule| rule.required_facts.is_subset(submitted)))
}

/// Result of a final accusation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionOutcome {
    pub is_correct: bool,
    pub narrative: String,
}

/// Validate a final accusation against the case solution.
///
/// Correct iff the accused matches the solution's killer exactly AND the
/// solution's required evidence is a subset of the submitted evidence.
/// An accused id with no catalog entry is not a submission error; it is
/// simply an incorrect accusation.
pub fn evaluate_solution(
    content: &CaseContent,
    accused: &SuspectId,
    evidence: &BTreeSet<FactId>,
) -> Result<SolutionOutcome, SubmissionError> {
    validate_evidence(content, evidence)?;

    let solution = content.solution();
    let is_correct =
        *accused == solution.killer && solution.required_evidence.is_subset(evidence);

    let narrative = if is_correct {
        solution.narrative_correct.clone()
    } else {
        let accused_name = content
            .suspect(accused)
            .map(|s| s.name.as_str())
            .unwrap_or(UNKNOWN_ACCUSED);
        solution
            .narrative_incorrect
            .replace(KILLER_PLACEHOLDER, accused_name)
    };

    Ok(SolutionOutcome {
        is_correct,
        narrative,
    })
}
