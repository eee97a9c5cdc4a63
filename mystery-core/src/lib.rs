//! Investigation-progression engine for a detective narrative game.
//!
//! This crate provides:
//! - An immutable, strictly validated case content index
//! - An append-only, deduplicated store of discovered facts
//! - Theory and final-accusation evaluation (first-match-wins rules, a
//!   single exact solution)
//! - Monotone content unlocking and a linear four-stage narrative machine
//! - A sync coordinator reconciling optimistic client state against an
//!   authoritative store without double-applying effects
//!
//! Chat rendering, AI dialogue, board drawing, and storage technology are
//! collaborator concerns: the engine consumes a case bundle and discovery
//! events, and emits reports, unlock deltas, and stage changes.
//!
//! # Quick Start
//!
//! ```ignore
//! use mystery_core::{CaseContent, GameSession, SyncCoordinator, JsonSnapshotStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let content = Arc::new(CaseContent::load("cases/blackwood.json").await?);
//!     let session = GameSession::new(content);
//!     let engine = SyncCoordinator::new(session, JsonSnapshotStore::new("saves"));
//!
//!     let report = engine
//!         .submit_theory("The poison was planted", my_evidence)
//!         .await?;
//!     println!("{}", report.feedback);
//!     Ok(())
//! }
//! ```

pub mod content;
pub mod facts;
pub mod session;
pub mod stage;
pub mod sync;
pub mod testing;
pub mod theory;
pub mod unlocks;

// Primary public API
pub use content::{
    CaseContent, CaseId, Clue, ClueContext, ContentError, Fact, FactCategory, FactId,
    RecordId, RuleId, RuleUnlocks, SceneId, Solution, SuspectId, TheoryRule, TheoryVerdict,
    UnlockCondition,
};
pub use facts::{DiscoveredFact, DiscoverySource, DiscoveryId, FactStore};
pub use session::{
    Accusation, GameSession, SessionError, SessionId, SolutionReport, TheoryReport,
    TheorySubmission,
};
pub use stage::{Stage, StageChange, StageError};
pub use sync::{
    reconcile, JsonSnapshotStore, MemoryStore, SessionSnapshot, SnapshotStore, SyncCoordinator,
    SyncError,
};
pub use theory::{SolutionOutcome, SubmissionError};
pub use unlocks::{catalog_gate_open, UnlockDelta, UnlockedContent};
