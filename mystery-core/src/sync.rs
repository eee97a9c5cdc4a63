//! Client/server state reconciliation and persistence.
//!
//! Every mutation the engine performs is an idempotent insert, a monotone
//! set-union, or a single validated forward stage move, so reconciliation
//! is conflict-free by construction: union the discoveries, union the
//! unlocks, take the later stage, OR the write-once completion flags. The
//! coordinator serializes writers per session and commits copy-on-write,
//! so a failed persist leaves no visible state change.

use crate::content::{CaseContent, CaseId, FactId};
use crate::facts::{unix_now, DiscoveredFact, DiscoverySource, FactStore};
use crate::session::{
    Accusation, GameSession, SessionError, SessionId, SolutionReport, TheoryReport,
    TheorySubmission,
};
use crate::stage::Stage;
use crate::unlocks::UnlockedContent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

/// Current snapshot envelope version.
const SNAPSHOT_VERSION: u32 = 1;

/// Errors from synchronization and persistence.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Should not occur given the monotone model; when it does, the
    /// server-authoritative snapshot wins and the client refetches.
    #[error("unmergeable submission conflict on idempotency key '{key}'")]
    Conflict { key: String },

    #[error("snapshot belongs to case '{found}', session content is '{expected}'")]
    CaseMismatch { expected: CaseId, found: CaseId },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// Snapshots
// ============================================================================

/// Serializable image of one session's mutable state.
///
/// This is the persisted state shape: the append-only discovery rows, the
/// submission rows with their idempotency keys, the unlocked-content sets,
/// and the scalar session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub case_id: CaseId,
    pub discovered: Vec<DiscoveredFact>,
    pub unlocked: UnlockedContent,
    pub stage: Stage,
    pub action_count: u32,
    pub is_completed: bool,
    pub is_solved_correctly: bool,
    pub submissions: Vec<TheorySubmission>,
}

impl GameSession {
    /// Capture the session's mutable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id(),
            case_id: self.content().id().clone(),
            discovered: self.facts().all().to_vec(),
            unlocked: self.unlocked().clone(),
            stage: self.stage(),
            action_count: self.action_count(),
            is_completed: self.is_completed(),
            is_solved_correctly: self.is_solved_correctly(),
            submissions: self.submissions().to_vec(),
        }
    }

    /// Rebuild a session from a snapshot over the same case content.
    pub fn restore(
        content: std::sync::Arc<CaseContent>,
        snapshot: SessionSnapshot,
    ) -> Result<GameSession, SyncError> {
        if snapshot.case_id != *content.id() {
            return Err(SyncError::CaseMismatch {
                expected: content.id().clone(),
                found: snapshot.case_id,
            });
        }
        Ok(GameSession::from_parts(
            snapshot.session_id,
            content,
            FactStore::from_entries(snapshot.discovered),
            snapshot.unlocked,
            snapshot.stage,
            snapshot.submissions,
            snapshot.action_count,
            snapshot.is_completed,
            snapshot.is_solved_correctly,
        ))
    }
}

/// Merge an optimistic local snapshot with the server-authoritative one.
///
/// Conflict-free for everything this engine writes: discoveries union on
/// their dedup key, unlocks union, stage takes the later value in machine
/// order, and the completion flags are write-once ORs. The only detectable
/// conflict is two submissions sharing an idempotency key but recording
/// different verdicts; that is surfaced as [`SyncError::Conflict`] and the
/// caller must adopt the server snapshot.
pub fn reconcile(
    local: &SessionSnapshot,
    server: &SessionSnapshot,
) -> Result<SessionSnapshot, SyncError> {
    // Server rows first so authoritative ordering survives the union.
    let mut discovered = server.discovered.clone();
    discovered.extend(local.discovered.iter().cloned());
    let discovered = FactStore::from_entries(discovered).all().to_vec();

    let mut submissions = server.submissions.clone();
    for sub in &local.submissions {
        match submissions.iter().find(|s| s.key == sub.key) {
            Some(existing) if existing.verdict != sub.verdict => {
                warn!(
                    key = %sub.key,
                    "submission verdict diverged between client and server"
                );
                return Err(SyncError::Conflict {
                    key: sub.key.clone(),
                });
            }
            Some(_) => {}
            None => submissions.push(sub.clone()),
        }
    }

    Ok(SessionSnapshot {
        session_id: server.session_id,
        case_id: server.case_id.clone(),
        discovered,
        unlocked: server.unlocked.merge(&local.unlocked),
        stage: Stage::later(local.stage, server.stage),
        action_count: local.action_count.max(server.action_count),
        is_completed: local.is_completed || server.is_completed,
        is_solved_correctly: local.is_solved_correctly || server.is_solved_correctly,
        submissions,
    })
}

// ============================================================================
// Snapshot Stores
// ============================================================================

/// Authoritative persistence boundary for session snapshots.
///
/// Saving is all-or-nothing from the engine's perspective: either the full
/// delta commits or none of it does.
#[allow(async_fn_in_trait)]
pub trait SnapshotStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError>;

    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, SyncError>;
}

/// In-memory store for tests, with an injectable save failure.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: StdMutex<HashMap<SessionId, SessionSnapshot>>,
    fail_next_save: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save` call fail, to exercise rollback paths.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }
}

impl SnapshotStore for MemoryStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Store("injected save failure".to_string()));
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SyncError::Store("memory store poisoned".to_string()))?;
        inner.insert(snapshot.session_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, SyncError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| SyncError::Store("memory store poisoned".to_string()))?;
        Ok(inner.get(session_id).cloned())
    }
}

/// Versioned snapshot file envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SavedSnapshot {
    version: u32,
    saved_at: u64,
    snapshot: SessionSnapshot,
}

/// JSON-file snapshot store, one file per session id.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SyncError> {
        fs::create_dir_all(&self.dir).await?;
        let saved = SavedSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: unix_now(),
            snapshot: snapshot.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(self.path_for(&snapshot.session_id), content).await?;
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, SyncError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        let saved: SavedSnapshot = serde_json::from_str(&content)?;
        if saved.version != SNAPSHOT_VERSION {
            return Err(SyncError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: saved.version,
            });
        }
        Ok(Some(saved.snapshot))
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns one session behind a per-session write lock.
///
/// Every mutating call runs copy-on-write: clone the session, apply the
/// operation, persist the resulting snapshot, and only on successful
/// persist swap the visible state. Two near-simultaneous submissions
/// serialize on the lock, so the second observes the first's idempotency
/// key instead of double-applying effects.
pub struct SyncCoordinator<S> {
    store: S,
    session: Mutex<GameSession>,
}

impl<S: SnapshotStore> SyncCoordinator<S> {
    pub fn new(session: GameSession, store: S) -> Self {
        Self {
            store,
            session: Mutex::new(session),
        }
    }

    /// Record a discovery and persist it.
    pub async fn discover_fact(
        &self,
        text: &str,
        source: DiscoverySource,
        source_id: &str,
    ) -> Result<DiscoveredFact, SyncError> {
        let mut guard = self.session.lock().await;
        let mut working = guard.clone();
        let record = working.discover_fact(text, source, source_id)?;
        self.store.save(&working.snapshot()).await?;
        *guard = working;
        Ok(record)
    }

    /// Submit a theory and persist the full resulting delta.
    pub async fn submit_theory(
        &self,
        description: &str,
        artifact_ids: BTreeSet<FactId>,
    ) -> Result<TheoryReport, SyncError> {
        let mut guard = self.session.lock().await;
        let mut working = guard.clone();
        let report = working.submit_theory(description, artifact_ids)?;
        self.store.save(&working.snapshot()).await?;
        *guard = working;
        Ok(report)
    }

    /// Submit the final accusation and persist the outcome.
    pub async fn submit_solution(
        &self,
        accusation: &Accusation,
    ) -> Result<SolutionReport, SyncError> {
        let mut guard = self.session.lock().await;
        let mut working = guard.clone();
        let report = working.submit_solution(accusation)?;
        self.store.save(&working.snapshot()).await?;
        *guard = working;
        Ok(report)
    }

    /// Reset the session and persist the cleared state as one unit.
    pub async fn reset(&self) -> Result<(), SyncError> {
        let mut guard = self.session.lock().await;
        let mut working = guard.clone();
        working.reset();
        self.store.save(&working.snapshot()).await?;
        *guard = working;
        Ok(())
    }

    /// Pull the authoritative snapshot and merge it into local state.
    ///
    /// On an unmergeable conflict the server snapshot wins outright.
    pub async fn reconcile_with_server(&self) -> Result<(), SyncError> {
        let mut guard = self.session.lock().await;
        let server = match self.store.load(&guard.id()).await? {
            Some(snapshot) => snapshot,
            None => return Ok(()),
        };

        let merged = match reconcile(&guard.snapshot(), &server) {
            Ok(merged) => merged,
            Err(SyncError::Conflict { key }) => {
                warn!(%key, "reconcile conflict; adopting server snapshot");
                server
            }
            Err(e) => return Err(e),
        };

        *guard = GameSession::restore(guard.content().clone(), merged)?;
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A consistent copy of the current visible state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Run a read-only closure against the current session state.
    pub async fn with_session<R>(&self, f: impl FnOnce(&GameSession) -> R) -> R {
        let guard = self.session.lock().await;
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use crate::testing::{fact_set, sample_session};

    fn snapshot_with(
        base: &SessionSnapshot,
        stage: Stage,
        completed: bool,
    ) -> SessionSnapshot {
        let mut s = base.clone();
        s.stage = stage;
        s.is_completed = completed;
        s
    }

    #[test]
    fn test_reconcile_takes_later_stage() {
        let base = sample_session().snapshot();
        let local = snapshot_with(&base, Stage::ActTwo, false);
        let server = snapshot_with(&base, Stage::ActOne, false);

        let merged = reconcile(&local, &server).unwrap();
        assert_eq!(merged.stage, Stage::ActTwo);
    }

    #[test]
    fn test_reconcile_completion_is_write_once() {
        let base = sample_session().snapshot();
        let local = snapshot_with(&base, Stage::Start, false);
        let server = snapshot_with(&base, Stage::Start, true);

        let merged = reconcile(&local, &server).unwrap();
        assert!(merged.is_completed);
    }

    #[test]
    fn test_reconcile_unions_discoveries_and_unlocks() {
        let mut local_session = sample_session();
        local_session
            .discover_fact("f_poison_bottle", DiscoverySource::Scene, "sc_study")
            .unwrap();
        let mut server_session = sample_session();
        server_session
            .discover_fact("f_forged_will", DiscoverySource::Record, "r_will")
            .unwrap();

        let mut local = local_session.snapshot();
        let mut server = server_session.snapshot();
        server.session_id = local.session_id;
        local
            .unlocked
            .suspects
            .insert(crate::content::SuspectId::from("s_butler"));
        server
            .unlocked
            .scenes
            .insert(crate::content::SceneId::from("sc_cellar"));

        let merged = reconcile(&local, &server).unwrap();
        assert_eq!(merged.discovered.len(), 2);
        assert!(merged.unlocked.is_superset_of(&local.unlocked));
        assert!(merged.unlocked.is_superset_of(&server.unlocked));
    }

    #[test]
    fn test_reconcile_submission_union_by_key() {
        let mut a = sample_session();
        a.submit_theory("Poison theory", fact_set(["f_poison_bottle"]))
            .unwrap();
        let mut local = a.snapshot();
        let server = a.snapshot();

        // A divergent verdict under the same key is a conflict.
        local.submissions[0].verdict = crate::content::TheoryVerdict::Correct;
        let err = reconcile(&local, &server).unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));

        // Identical rows merge to one.
        let local = a.snapshot();
        let merged = reconcile(&local, &server).unwrap();
        assert_eq!(merged.submissions.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let snapshot = sample_session().snapshot();
        store.save(&snapshot).await.unwrap();

        let loaded = store.load(&snapshot.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.case_id, snapshot.case_id);

        let missing = store.load(&SessionId::new()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_restore_rejects_wrong_case() {
        let session = sample_session();
        let mut snapshot = session.snapshot();
        snapshot.case_id = CaseId::from("some-other-case");

        let err = GameSession::restore(session.content().clone(), snapshot).unwrap_err();
        assert!(matches!(err, SyncError::CaseMismatch { .. }));
    }
}
