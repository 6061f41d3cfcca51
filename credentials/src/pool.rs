use chrono::Utc;
use config::CredentialPoolConfig;
use dashmap::DashMap;
use errors::{CredentialError, ErrorKind, StoreError};
use observability::EngineTelemetry;
use parking_lot::Mutex;
use scribe_core::{CredentialId, CredentialStatus, CredentialStore, DeactivationReason};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// A leased credential. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct Credential {
    id: CredentialId,
    secret: Zeroizing<String>
}

impl Credential {
    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

struct CredentialEntry {
    secret: Zeroizing<String>,
    status: CredentialStatus,
    /// Sequence number of the most recent lease; 0 if never leased.
    last_lease: u64,
    /// Registration order, the final tie-breaker.
    registered: u64,
    deactivated_instant: Option<Instant>
}

impl CredentialEntry {
    fn is_eligible(&self) -> bool {
        self.status.active && !self.status.removed
    }

    fn selection_key(&self) -> (u64, u64, u64) {
        (self.last_lease, self.status.usage_count, self.registered)
    }

    fn deactivate(&mut self, reason: DeactivationReason) {
        self.status.active = false;
        self.status.deactivated_at = Some(Utc::now());
        self.status.deactivation_reason = Some(reason);
        self.deactivated_instant = Some(Instant::now());
    }

    fn reactivate(&mut self) {
        self.status.active = true;
        self.status.consecutive_failures = 0;
        self.status.deactivated_at = None;
        self.status.deactivation_reason = None;
        self.deactivated_instant = None;
    }
}

/// Pool of API credentials shared by every in-flight invocation.
///
/// Each credential sits behind its own lock, so counters of one credential
/// are updated atomically without blocking work on the others. Selection
/// holds a short pool-wide lock only while picking the next lease.
pub struct CredentialPool {
    entries: DashMap<CredentialId, Arc<Mutex<CredentialEntry>>>,
    sequence: AtomicU64,
    selection: Mutex<()>,
    failure_threshold: u32,
    reactivate_after: Option<Duration>,
    telemetry: EngineTelemetry
}

impl CredentialPool {
    pub fn new(config: &CredentialPoolConfig) -> Self {
        Self {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            selection: Mutex::new(()),
            failure_threshold: config.failure_threshold.max(1),
            reactivate_after: config.reactivate_after(),
            telemetry: EngineTelemetry::new()
        }
    }

    /// Builds a pool from `(id, secret)` pairs, skipping invalid or
    /// duplicate ids.
    pub fn with_credentials<I, S1, S2>(config: &CredentialPoolConfig, credentials: I) -> Self
    where
        I: IntoIterator<Item = (S1, S2)>,
        S1: Into<String>,
        S2: Into<String>
    {
        let pool = Self::new(config);
        for (id, secret) in credentials {
            let id: String = id.into();
            let Some(id) = CredentialId::new(id.clone()) else {
                warn!(id = %id, "Skipping credential with invalid id");
                continue;
            };
            if let Err(e) = pool.add(id, secret) {
                warn!(error = %e, "Skipping credential");
            }
        }
        pool
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn entry(&self, id: &CredentialId) -> Result<Arc<Mutex<CredentialEntry>>, CredentialError> {
        self.entries
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CredentialError::NotFound {
                id: id.to_string()
            })
    }

    fn maybe_reactivate(&self, entry: &mut CredentialEntry, now: Instant) {
        let Some(cooldown) = self.reactivate_after else {
            return;
        };
        if entry.status.active
            || entry.status.removed
            || entry.status.deactivation_reason != Some(DeactivationReason::FailureThreshold)
        {
            return;
        }
        if entry
            .deactivated_instant
            .is_some_and(|at| now.saturating_duration_since(at) >= cooldown)
        {
            entry.reactivate();
            info!(credential = %entry.status.id, "Credential reactivated after cooldown");
        }
    }

    /// Registers a credential. A previously removed id may be added again;
    /// its audit counters are kept.
    pub fn add(&self, id: CredentialId, secret: impl Into<String>) -> Result<(), CredentialError> {
        let secret = Zeroizing::new(secret.into());

        let existing = self.entries.get(&id).map(|e| Arc::clone(e.value()));
        if let Some(existing) = existing {
            let mut entry = existing.lock();
            if !entry.status.removed {
                return Err(CredentialError::AlreadyExists { id: id.to_string() });
            }
            entry.secret = secret;
            entry.status.removed = false;
            entry.reactivate();
            info!(credential = %id, "Credential re-added");
        } else {
            let entry = CredentialEntry {
                secret,
                status: CredentialStatus::new(id.clone()),
                last_lease: 0,
                registered: self.next_sequence(),
                deactivated_instant: None
            };
            self.entries.insert(id.clone(), Arc::new(Mutex::new(entry)));
            info!(credential = %id, "Credential added");
        }

        self.telemetry.record_active_credentials(self.active_count());
        Ok(())
    }

    /// Logical removal: the credential is never selected again but stays
    /// listed with its counters.
    pub fn remove(&self, id: &CredentialId) -> Result<(), CredentialError> {
        let entry = self.entry(id)?;
        {
            let mut entry = entry.lock();
            entry.status.removed = true;
            entry.status.active = false;
            entry.secret = Zeroizing::new(String::new());
        }
        info!(credential = %id, "Credential removed");
        self.telemetry.record_active_credentials(self.active_count());
        Ok(())
    }

    /// Leases the least-recently-used active credential.
    ///
    /// Ties between never-used credentials go to the lowest usage counter,
    /// then to registration order.
    pub fn acquire(&self) -> Result<Credential, CredentialError> {
        let _selection = self.selection.lock();
        let now = Instant::now();

        let mut best: Option<((u64, u64, u64), Arc<Mutex<CredentialEntry>>)> = None;
        for item in self.entries.iter() {
            let mut entry = item.value().lock();
            self.maybe_reactivate(&mut entry, now);
            if !entry.is_eligible() {
                continue;
            }
            let key = entry.selection_key();
            if best.as_ref().is_none_or(|(best_key, _)| key < *best_key) {
                best = Some((key, Arc::clone(item.value())));
            }
        }

        let Some((_, chosen)) = best else {
            warn!("No active credential available");
            return Err(CredentialError::NoCredentialAvailable);
        };

        let mut entry = chosen.lock();
        entry.last_lease = self.next_sequence();
        entry.status.last_used_at = Some(Utc::now());
        Ok(Credential {
            id: entry.status.id.clone(),
            secret: entry.secret.clone()
        })
    }

    /// Resets the failure streak and counts a successful use.
    pub fn report_success(&self, id: &CredentialId) -> Result<(), CredentialError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        entry.status.consecutive_failures = 0;
        entry.status.usage_count += 1;
        entry.status.last_used_at = Some(Utc::now());
        Ok(())
    }

    /// Counts a failure. Returns `true` when this failure crossed the
    /// threshold and deactivated the credential.
    pub fn report_failure(&self, id: &CredentialId) -> Result<bool, CredentialError> {
        let entry = self.entry(id)?;
        let deactivated = {
            let mut entry = entry.lock();
            entry.status.consecutive_failures += 1;
            entry.status.total_failures += 1;

            if entry.is_eligible() && entry.status.consecutive_failures >= self.failure_threshold {
                entry.deactivate(DeactivationReason::FailureThreshold);
                warn!(
                    credential = %id,
                    consecutive_failures = entry.status.consecutive_failures,
                    "Credential deactivated after repeated failures"
                );
                true
            } else {
                false
            }
        };

        if deactivated {
            self.telemetry
                .record_credential_deactivation(&DeactivationReason::FailureThreshold.to_string());
            self.telemetry.record_active_credentials(self.active_count());
        }
        Ok(deactivated)
    }

    /// Routes an attempt outcome to success or failure accounting.
    ///
    /// Failures that say nothing about the credential (content policy,
    /// malformed output, invalid request) still prove it works, so they
    /// reset the streak like a success.
    pub fn report_outcome(
        &self,
        id: &CredentialId,
        error: Option<ErrorKind>
    ) -> Result<bool, CredentialError> {
        match error {
            Some(kind) if kind.counts_against_credential() => self.report_failure(id),
            _ => self.report_success(id).map(|()| false)
        }
    }

    /// Manual deactivation. Never undone by the automatic cooldown.
    pub fn deactivate(&self, id: &CredentialId) -> Result<(), CredentialError> {
        let entry = self.entry(id)?;
        {
            let mut entry = entry.lock();
            if entry.status.removed {
                return Err(CredentialError::NotFound { id: id.to_string() });
            }
            entry.deactivate(DeactivationReason::Manual);
        }
        info!(credential = %id, "Credential deactivated manually");
        self.telemetry
            .record_credential_deactivation(&DeactivationReason::Manual.to_string());
        self.telemetry.record_active_credentials(self.active_count());
        Ok(())
    }

    /// Restores eligibility with the failure streak reset to zero.
    pub fn reactivate(&self, id: &CredentialId) -> Result<(), CredentialError> {
        let entry = self.entry(id)?;
        {
            let mut entry = entry.lock();
            if entry.status.removed {
                return Err(CredentialError::NotFound { id: id.to_string() });
            }
            entry.reactivate();
        }
        info!(credential = %id, "Credential reactivated");
        self.telemetry.record_active_credentials(self.active_count());
        Ok(())
    }

    pub fn status(&self, id: &CredentialId) -> Option<CredentialStatus> {
        self.entries
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .map(|e| e.lock().status.clone())
    }

    /// Every credential ever registered, in registration order.
    pub fn list(&self) -> Vec<CredentialStatus> {
        let mut all: Vec<(u64, CredentialStatus)> = self
            .entries
            .iter()
            .map(|item| {
                let entry = item.value().lock();
                (entry.registered, entry.status.clone())
            })
            .collect();
        all.sort_by_key(|(registered, _)| *registered);
        all.into_iter().map(|(_, status)| status).collect()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|item| item.value().lock().is_eligible())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every credential's status and counters to the store.
    pub async fn persist(&self, store: &dyn CredentialStore) -> Result<(), StoreError> {
        for status in self.list() {
            store.upsert_credential(&status).await?;
        }
        Ok(())
    }

    /// Applies stored counters to credentials already registered by id.
    ///
    /// Secrets are never persisted, so records without a registered
    /// credential are skipped. LRU order is rebuilt from `last_used_at`.
    pub async fn restore(&self, store: &dyn CredentialStore) -> Result<usize, StoreError> {
        let mut records = store.list_credentials().await?;
        records.sort_by_key(|r| r.last_used_at);

        let mut restored = 0;
        for record in records {
            let Some(entry) = self.entries.get(&record.id).map(|e| Arc::clone(e.value())) else {
                warn!(credential = %record.id, "Stored credential has no secret loaded, skipping");
                continue;
            };
            let mut entry = entry.lock();
            if record.last_used_at.is_some() {
                entry.last_lease = self.next_sequence();
            }
            entry.deactivated_instant = (!record.active).then(Instant::now);
            entry.status = record;
            restored += 1;
        }

        self.telemetry.record_active_credentials(self.active_count());
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CredentialId {
        CredentialId::new(s).unwrap()
    }

    fn pool_of(n: usize) -> CredentialPool {
        CredentialPool::with_credentials(
            &CredentialPoolConfig::default(),
            (1..=n).map(|i| (format!("key-{i}"), format!("sk-{i}")))
        )
    }

    #[test]
    fn test_lru_rotation_never_repeats() {
        let pool = pool_of(3);
        let mut previous: Option<CredentialId> = None;
        let mut seen = Vec::new();

        for _ in 0..9 {
            let credential = pool.acquire().unwrap();
            assert_ne!(Some(credential.id().clone()), previous);
            pool.report_success(credential.id()).unwrap();
            previous = Some(credential.id().clone());
            seen.push(credential.id().to_string());
        }

        assert_eq!(&seen[..3], &["key-1", "key-2", "key-3"]);
        assert_eq!(&seen[3..6], &["key-1", "key-2", "key-3"]);
    }

    #[test]
    fn test_single_credential_is_reused() {
        let pool = pool_of(1);
        assert_eq!(pool.acquire().unwrap().id().as_str(), "key-1");
        assert_eq!(pool.acquire().unwrap().id().as_str(), "key-1");
    }

    #[test]
    fn test_never_used_ties_break_on_usage() {
        let pool = pool_of(2);
        // Restored usage without a lease: key-1 looks busier.
        {
            let entry = pool.entry(&id("key-1")).unwrap();
            entry.lock().status.usage_count = 10;
        }
        assert_eq!(pool.acquire().unwrap().id().as_str(), "key-2");
    }

    #[test]
    fn test_auto_deactivation_at_threshold() {
        let pool = pool_of(2);
        let key = id("key-1");

        assert!(!pool.report_failure(&key).unwrap());
        assert!(!pool.report_failure(&key).unwrap());
        assert!(pool.report_failure(&key).unwrap());

        let status = pool.status(&key).unwrap();
        assert!(!status.active);
        assert_eq!(
            status.deactivation_reason,
            Some(DeactivationReason::FailureThreshold)
        );

        for _ in 0..4 {
            assert_eq!(pool.acquire().unwrap().id().as_str(), "key-2");
        }

        pool.reactivate(&key).unwrap();
        let status = pool.status(&key).unwrap();
        assert!(status.active);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 3);
        assert_eq!(pool.acquire().unwrap().id().as_str(), "key-1");
    }

    #[test]
    fn test_success_resets_streak() {
        let pool = pool_of(1);
        let key = id("key-1");
        pool.report_failure(&key).unwrap();
        pool.report_failure(&key).unwrap();
        pool.report_success(&key).unwrap();
        assert!(!pool.report_failure(&key).unwrap());
        assert!(pool.status(&key).unwrap().active);
    }

    #[test]
    fn test_content_failures_do_not_count() {
        let pool = pool_of(1);
        let key = id("key-1");
        for _ in 0..5 {
            pool.report_outcome(&key, Some(ErrorKind::ContentPolicyBlocked))
                .unwrap();
        }
        assert!(pool.status(&key).unwrap().active);

        pool.report_outcome(&key, Some(ErrorKind::QuotaExceeded))
            .unwrap();
        assert_eq!(pool.status(&key).unwrap().consecutive_failures, 1);
    }

    #[test]
    fn test_empty_pool_has_no_credential() {
        let pool = pool_of(0);
        assert!(matches!(
            pool.acquire(),
            Err(CredentialError::NoCredentialAvailable)
        ));

        let pool = pool_of(1);
        pool.deactivate(&id("key-1")).unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(CredentialError::NoCredentialAvailable)
        ));
    }

    #[test]
    fn test_remove_keeps_audit_record() {
        let pool = pool_of(2);
        let key = id("key-1");
        pool.report_failure(&key).unwrap();
        pool.remove(&key).unwrap();

        assert_eq!(pool.acquire().unwrap().id().as_str(), "key-2");
        let listed = pool.list();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].removed);
        assert_eq!(listed[0].total_failures, 1);
        assert!(matches!(
            pool.reactivate(&key),
            Err(CredentialError::NotFound { .. })
        ));

        pool.add(key.clone(), "sk-new").unwrap();
        assert!(pool.status(&key).unwrap().active);
        assert!(matches!(
            pool.add(key, "sk-again"),
            Err(CredentialError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let pool = pool_of(1);
        let credential = pool.acquire().unwrap();
        assert_eq!(credential.secret(), "sk-1");
        assert!(!format!("{credential:?}").contains("sk-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_reactivates_auto_deactivated_only() {
        let config = CredentialPoolConfig {
            failure_threshold: 1,
            reactivate_after_secs: Some(60)
        };
        let pool = CredentialPool::with_credentials(&config, [("auto", "a"), ("manual", "m")]);
        pool.report_failure(&id("auto")).unwrap();
        pool.deactivate(&id("manual")).unwrap();

        assert!(pool.acquire().is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(pool.acquire().is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.acquire().unwrap().id().as_str(), "auto");
        assert_eq!(pool.status(&id("auto")).unwrap().consecutive_failures, 0);
        assert!(!pool.status(&id("manual")).unwrap().active);
    }
}
