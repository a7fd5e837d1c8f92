//! Flip record persistence
//!
//! Each trial is written as its own record. Nothing groups the writes of a
//! batch, so a failure part-way through leaves the earlier records in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use qflip_core::{Outcome, Trial};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::Result;

/// One stored coin flip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlipRecord {
    pub id: Uuid,

    pub result: Outcome,

    /// Raw user id; stored records are never shared externally
    pub user_id: String,

    pub timestamp: DateTime<Utc>,

    /// Produced by the external service rather than locally
    pub quantum: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub privacy_preserved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl FlipRecord {
    /// A flip the client performed itself and asked us to save
    pub fn classical(result: Outcome, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            result,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            quantum: false,
            batch_id: None,
            session_id: None,
            privacy_preserved: false,
            circuit_depth: None,
            gate_count: None,
            backend: None,
        }
    }

    /// A trial produced by the outcome agent
    pub fn from_trial(trial: &Trial, user_id: impl Into<String>, privacy_preserved: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            result: trial.outcome,
            user_id: user_id.into(),
            timestamp: trial.timestamp,
            quantum: trial.is_external(),
            batch_id: Some(trial.batch_id.clone()),
            session_id: Some(trial.session_id.clone()),
            privacy_preserved,
            circuit_depth: Some(trial.circuit_depth),
            gate_count: Some(trial.gate_count),
            backend: Some(trial.backend.clone()),
        }
    }
}

/// Storage for flip records
#[async_trait]
pub trait FlipStore: Send + Sync {
    /// Persist a record, returning it as stored
    async fn save(&self, record: FlipRecord) -> Result<FlipRecord>;

    /// A user's records, newest first, at most `limit`
    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<FlipRecord>>;

    /// Total stored records
    async fn count(&self) -> Result<usize>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryFlipStore {
    records: Arc<RwLock<Vec<FlipRecord>>>,
}

impl InMemoryFlipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlipStore for InMemoryFlipStore {
    async fn save(&self, record: FlipRecord) -> Result<FlipRecord> {
        self.records.write().push(record.clone());
        tracing::debug!("Saved flip {}: {}", record.id, record.result);
        Ok(record)
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<FlipRecord>> {
        let records = self.records.read();
        // Reverse first so records sharing a timestamp come out latest-saved first.
        let mut history: Vec<FlipRecord> = records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history.truncate(limit);
        Ok(history)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflip_core::TrialOrigin;

    #[tokio::test]
    async fn test_history_is_per_user_and_newest_first() {
        let store = InMemoryFlipStore::new();

        let mut older = FlipRecord::classical(Outcome::Heads, "alice");
        older.timestamp = Utc::now() - chrono::Duration::seconds(60);
        store.save(older.clone()).await.unwrap();
        let newer = store
            .save(FlipRecord::classical(Outcome::Tails, "alice"))
            .await
            .unwrap();
        store
            .save(FlipRecord::classical(Outcome::Heads, "bob"))
            .await
            .unwrap();

        let history = store.history("alice", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, newer.id);
        assert_eq!(history[1].id, older.id);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = InMemoryFlipStore::new();
        for _ in 0..5 {
            store
                .save(FlipRecord::classical(Outcome::Heads, "alice"))
                .await
                .unwrap();
        }
        assert_eq!(store.history("alice", 3).await.unwrap().len(), 3);
        assert!(store.history("nobody", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_ties_are_latest_saved_first() {
        let store = InMemoryFlipStore::new();
        let stamp = Utc::now();

        let mut saved = Vec::new();
        for n in 1..=4 {
            let mut record = FlipRecord::from_trial(
                &Trial::local(Outcome::Heads, "batch", "session", n),
                "alice",
                true,
            );
            record.timestamp = stamp;
            saved.push(store.save(record).await.unwrap().id);
        }

        let ids: Vec<Uuid> = store
            .history("alice", 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        saved.reverse();
        assert_eq!(ids, saved);
    }

    #[test]
    fn test_record_from_trial() {
        let trial = Trial::local(Outcome::Tails, "batch", "session", 2);
        assert_eq!(trial.origin, TrialOrigin::Local);

        let record = FlipRecord::from_trial(&trial, "alice", true);
        assert_eq!(record.result, Outcome::Tails);
        assert!(!record.quantum);
        assert!(record.privacy_preserved);
        assert_eq!(record.batch_id.as_deref(), Some("batch"));
        assert_eq!(record.backend.as_deref(), Some(qflip_core::types::LOCAL_BACKEND));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["privacyPreserved"], true);
    }
}
