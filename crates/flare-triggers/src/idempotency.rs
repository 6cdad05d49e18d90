//! At-most-once firing.
//!
//! A [`Fingerprint`] identifies one logical firing: the trigger, the kind of
//! event, and the exact artifact and manifest set it resolved to. The guard
//! lets exactly one caller per fingerprint proceed to dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flare_core::artifact::{Artifact, HelmChart};
use flare_core::idempotency::{Acquisition, IdempotencyRecord, IdempotencyState};
use flare_core::ids::{ExecutionId, TriggerId};
use flare_core::ports::IdempotencyStore;
use flare_core::trigger::ConditionKind;
use flare_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint from the resolved payload.
    ///
    /// Artifact and chart ids are sorted so resolution order does not matter.
    /// `discriminator` separates firings that resolve identical payloads but
    /// are distinct occurrences, such as two cron ticks.
    pub fn derive(
        trigger_id: TriggerId,
        kind: ConditionKind,
        artifacts: &[Artifact],
        helm_charts: &[HelmChart],
        discriminator: Option<&str>,
    ) -> Self {
        let mut artifact_ids: Vec<String> = artifacts.iter().map(|a| a.id.to_string()).collect();
        artifact_ids.sort();
        artifact_ids.dedup();
        let mut chart_ids: Vec<String> = helm_charts.iter().map(|c| c.id.to_string()).collect();
        chart_ids.sort();
        chart_ids.dedup();

        let mut hasher = Sha256::new();
        hasher.update(trigger_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"|a:");
        hasher.update(artifact_ids.join(",").as_bytes());
        hasher.update(b"|h:");
        hasher.update(chart_ids.join(",").as_bytes());
        if let Some(discriminator) = discriminator {
            hasher.update(b"|d:");
            hasher.update(discriminator.as_bytes());
        }
        Self(format!("{}:{}", trigger_id, hex::encode(hasher.finalize())))
    }

    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinates create-once acquisition against a shared store.
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    /// Try to become the single dispatcher for `fingerprint`.
    pub async fn with_lock(&self, fingerprint: &Fingerprint, ttl: Duration) -> Result<Acquisition> {
        let acquisition = self.store.try_create(fingerprint.as_str(), ttl).await?;
        match &acquisition {
            Acquisition::Acquired => debug!(fingerprint = %fingerprint, "Acquired firing lock"),
            Acquisition::Present(record) => info!(
                fingerprint = %fingerprint,
                state = %record.state,
                "Duplicate firing suppressed"
            ),
        }
        Ok(acquisition)
    }

    pub async fn on_success(
        &self,
        fingerprint: &Fingerprint,
        execution_id: Option<ExecutionId>,
    ) -> Result<()> {
        self.store
            .mark_succeeded(fingerprint.as_str(), execution_id)
            .await
    }

    /// Mark the firing failed so a later event can acquire it again.
    pub async fn on_failure(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.store.mark_failed(fingerprint.as_str()).await
    }
}

/// Process-local store, for single-node deployments and tests.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Drop expired records.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        before - records.len()
    }

    async fn update_state(
        &self,
        key: &str,
        state: IdempotencyState,
        execution_id: Option<ExecutionId>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| Error::Internal(format!("No idempotency record for {key}")))?;
        record.state = state;
        if execution_id.is_some() {
            record.execution_id = execution_id;
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_create(&self, key: &str, ttl: Duration) -> Result<Acquisition> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(key) {
            if existing.blocks_acquire(now) {
                return Ok(Acquisition::Present(existing.clone()));
            }
        }
        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                state: IdempotencyState::Pending,
                execution_id: None,
                created_at: now,
                expires_at,
            },
        );
        Ok(Acquisition::Acquired)
    }

    async fn mark_succeeded(&self, key: &str, execution_id: Option<ExecutionId>) -> Result<()> {
        self.update_state(key, IdempotencyState::Succeeded, execution_id)
            .await
    }

    async fn mark_failed(&self, key: &str) -> Result<()> {
        self.update_state(key, IdempotencyState::Failed, None).await
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_core::ids::*;

    fn artifact(id: ArtifactId) -> Artifact {
        Artifact {
            id,
            app_id: AppId::new(),
            artifact_stream_id: ArtifactStreamId::new(),
            service_id: ServiceId::new(),
            build_no: "1".into(),
            source_name: String::new(),
            metadata: Default::default(),
            duplicate: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let trigger_id = TriggerId::new();
        let (a, b) = (ArtifactId::new(), ArtifactId::new());
        let first = Fingerprint::derive(
            trigger_id,
            ConditionKind::NewArtifact,
            &[artifact(a), artifact(b)],
            &[],
            None,
        );
        let second = Fingerprint::derive(
            trigger_id,
            ConditionKind::NewArtifact,
            &[artifact(b), artifact(a)],
            &[],
            None,
        );
        assert_eq!(first, second);
        assert!(first.as_str().starts_with(&trigger_id.to_string()));
    }

    #[test]
    fn test_fingerprint_separates_payloads() {
        let trigger_id = TriggerId::new();
        let first = Fingerprint::derive(
            trigger_id,
            ConditionKind::NewArtifact,
            &[artifact(ArtifactId::new())],
            &[],
            None,
        );
        let second = Fingerprint::derive(
            trigger_id,
            ConditionKind::NewArtifact,
            &[artifact(ArtifactId::new())],
            &[],
            None,
        );
        assert_ne!(first, second);

        let tick_one =
            Fingerprint::derive(trigger_id, ConditionKind::Scheduled, &[], &[], Some("1000"));
        let tick_two =
            Fingerprint::derive(trigger_id, ConditionKind::Scheduled, &[], &[], Some("2000"));
        assert_ne!(tick_one, tick_two);
    }

    #[tokio::test]
    async fn test_second_acquire_sees_record() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = IdempotencyGuard::new(store.clone());
        let fp = Fingerprint::from_key("trg:abc");
        let ttl = Duration::from_secs(60);

        assert_eq!(guard.with_lock(&fp, ttl).await.unwrap(), Acquisition::Acquired);
        let execution_id = ExecutionId::new();
        guard.on_success(&fp, Some(execution_id)).await.unwrap();

        match guard.with_lock(&fp, ttl).await.unwrap() {
            Acquisition::Present(record) => {
                assert_eq!(record.state, IdempotencyState::Succeeded);
                assert_eq!(record.execution_id, Some(execution_id));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_record_can_be_reacquired() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = IdempotencyGuard::new(store);
        let fp = Fingerprint::from_key("trg:failed");
        let ttl = Duration::from_secs(60);

        guard.with_lock(&fp, ttl).await.unwrap();
        guard.on_failure(&fp).await.unwrap();
        assert_eq!(guard.with_lock(&fp, ttl).await.unwrap(), Acquisition::Acquired);
    }

    #[tokio::test]
    async fn test_expired_record_can_be_reacquired() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = IdempotencyGuard::new(store.clone());
        let fp = Fingerprint::from_key("trg:expired");

        guard.with_lock(&fp, Duration::ZERO).await.unwrap();
        assert_eq!(
            guard.with_lock(&fp, Duration::from_secs(60)).await.unwrap(),
            Acquisition::Acquired
        );
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let store = InMemoryIdempotencyStore::new();

        assert_eq!(
            store.try_create("trg:forever", Duration::MAX).await.unwrap(),
            Acquisition::Acquired
        );
        let record = store.get("trg:forever").await.unwrap().unwrap();
        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(matches!(
            store.try_create("trg:forever", Duration::MAX).await.unwrap(),
            Acquisition::Present(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = Arc::new(IdempotencyGuard::new(store));
        let fp = Fingerprint::from_key("trg:race");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let fp = fp.clone();
            handles.push(tokio::spawn(async move {
                guard.with_lock(&fp, Duration::from_secs(60)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() == Acquisition::Acquired {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
