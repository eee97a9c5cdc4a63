//! Append-only store of discovery events.
//!
//! A [`DiscoveredFact`] is a discovery event instance, distinct from the
//! catalog [`Fact`](crate::content::Fact) it may reference. Re-discovering
//! the same thing is a no-op: the store is deduplicated on
//! `(content, source_id)` and never shrinks outside a whole-session reset.

use crate::content::FactId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique identifier for a discovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryId(pub Uuid);

impl DiscoveryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DiscoveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of player action produced a discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Parsed out of an AI-suspect chat response by a collaborator.
    Chat,
    /// Found while reviewing a record.
    Record,
    /// Found while examining a scene.
    Scene,
    /// Handed out by the clue system.
    Clue,
}

/// A session-scoped record that a specific piece of knowledge was uncovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFact {
    pub id: DiscoveryId,

    /// The catalog fact this discovery resolved to, when it did.
    pub fact_ref: Option<FactId>,

    pub content: String,

    pub source: DiscoverySource,

    /// Id of the suspect/scene/record/clue the discovery came from.
    pub source_id: String,

    /// Unix timestamp (seconds).
    pub discovered_at: u64,
}

/// Deduplicated, append-only discovery log.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    entries: Vec<DiscoveredFact>,
    /// Dedup index: `(content, source_id)` -> position in `entries`.
    seen: HashMap<(String, String), usize>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted entries, restoring the dedup index.
    pub fn from_entries(entries: Vec<DiscoveredFact>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            let key = (entry.content.clone(), entry.source_id.clone());
            if !store.seen.contains_key(&key) {
                store.seen.insert(key, store.entries.len());
                store.entries.push(entry);
            }
        }
        store
    }

    /// Record a discovery.
    ///
    /// Idempotent: if an equivalent discovery (same content and source id)
    /// was already recorded, the existing record is returned unchanged.
    pub fn discover(
        &mut self,
        content: impl Into<String>,
        source: DiscoverySource,
        source_id: impl Into<String>,
        fact_ref: Option<FactId>,
    ) -> &DiscoveredFact {
        let content = content.into();
        let source_id = source_id.into();
        let key = (content.clone(), source_id.clone());

        let idx = match self.seen.get(&key).copied() {
            Some(i) => i,
            None => {
                let entry = DiscoveredFact {
                    id: DiscoveryId::new(),
                    fact_ref,
                    content,
                    source,
                    source_id,
                    discovered_at: unix_now(),
                };
                let i = self.entries.len();
                self.seen.insert(key, i);
                self.entries.push(entry);
                i
            }
        };
        &self.entries[idx]
    }

    /// All discoveries in insertion order.
    pub fn all(&self) -> &[DiscoveredFact] {
        &self.entries
    }

    /// Catalog fact ids resolved so far, for subset checks.
    pub fn discovered_fact_ids(&self) -> BTreeSet<FactId> {
        self.entries
            .iter()
            .filter_map(|e| e.fact_ref.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an equivalent discovery is already recorded.
    pub fn contains(&self, content: &str, source_id: &str) -> bool {
        self.seen
            .contains_key(&(content.to_string(), source_id.to_string()))
    }
}

/// Current Unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
