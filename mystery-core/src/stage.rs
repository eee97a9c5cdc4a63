//! Narrative stage machine.
//!
//! Four ordered stages, no branching, no cycles. The stage only ever moves
//! as a side effect of a theory or solution outcome carrying an explicit
//! stage directive, and only to the immediate successor of the current
//! stage. Anything else is a content-authoring bug.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::error;

/// One of the four ordered narrative phases.
///
/// Derived `Ord` follows declaration order, which is the machine order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Stage {
    #[default]
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "act_i")]
    ActOne,
    #[serde(rename = "act_ii")]
    ActTwo,
    #[serde(rename = "completed")]
    Completed,
}

impl Stage {
    /// The next stage in machine order, or `None` at the terminal stage.
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::ActOne),
            Stage::ActOne => Some(Stage::ActTwo),
            Stage::ActTwo => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::ActOne => "act_i",
            Stage::ActTwo => "act_ii",
            Stage::Completed => "completed",
        }
    }

    /// The later of two stages in machine order. Used by reconciliation.
    pub fn later(a: Stage, b: Stage) -> Stage {
        a.max(b)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Emitted to collaborators when the stage moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    pub from: Stage,
    pub to: Stage,
}

/// Errors from stage transition requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("illegal stage transition: {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },
}

/// Validate a directed transition request.
///
/// Accepts only the immediate successor of `from`; backward moves and stage
/// skips are rejected. Rejection is an authoring bug in the case content,
/// so it is logged loudly before being surfaced to the caller.
pub fn advance(from: Stage, to: Stage) -> Result<StageChange, StageError> {
    if from.successor() == Some(to) {
        Ok(StageChange { from, to })
    } else {
        error!(%from, %to, "rejected illegal stage transition (content authoring bug)");
        Err(StageError::IllegalTransition { from, to })
    }
}
