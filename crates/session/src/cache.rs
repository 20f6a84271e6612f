//! Session cache keyed by (server, user, app).
//!
//! The table is a [`DashMap`] of per-key slots. Each slot has its own async
//! mutex, so a probe or issuance for one key never blocks another key, and
//! concurrent acquisitions of the same key issue at most one credential.
//! The table shard lock is only held long enough to clone the slot handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use reportbridge_core::script::{SessionContext, SessionCredential};
use tokio::sync::Mutex;

use crate::provider::{SessionError, SessionKey, SessionProvider};

#[derive(Default)]
struct Slot {
    credential: Option<SessionCredential>,
    /// Jobs currently holding `credential`.
    holders: usize,
    /// Evicted credentials that jobs still hold, with their holder counts.
    /// Each one is torn down when its last holder lets go.
    retired: Vec<(SessionCredential, usize)>,
}

impl Slot {
    /// Drop the current credential, keeping it around while it is held.
    fn evict(&mut self) {
        if let Some(credential) = self.credential.take() {
            if self.holders > 0 {
                self.retired.push((credential, self.holders));
            }
        }
        self.holders = 0;
    }

    fn total_holders(&self) -> usize {
        self.holders + self.retired.iter().map(|(_, n)| n).sum::<usize>()
    }
}

/// A job's claim on a cached session.
///
/// Released through [`SessionCache::release`]; a lease only ever counts
/// down once no matter how often it is released.
#[derive(Debug)]
pub struct SessionLease {
    key: SessionKey,
    credential: SessionCredential,
    released: AtomicBool,
}

impl SessionLease {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn credential(&self) -> &SessionCredential {
        &self.credential
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Resolution context for scripts running under this session.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            server_uri: self.key.server_uri.clone(),
            app_id: self.key.app_id.clone(),
            user: self.key.user.clone(),
            credential: self.credential.clone(),
        }
    }
}

/// Issues and reuses platform sessions.
pub struct SessionCache {
    provider: Arc<dyn SessionProvider>,
    slots: DashMap<SessionKey, Arc<Mutex<Slot>>>,
}

impl SessionCache {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            slots: DashMap::new(),
        }
    }

    /// Return a live session for `key`, issuing one when none is cached or
    /// the cached one fails its liveness probe.
    pub async fn acquire(&self, key: SessionKey) -> Result<SessionLease, SessionError> {
        let slot = self.slot(&key);
        let mut slot = slot.lock().await;

        if let Some(credential) = slot.credential.clone() {
            if self.provider.validate(&key, &credential).await {
                slot.holders += 1;
                tracing::debug!(session = %key, holders = slot.holders, "Reusing cached session");
                return Ok(SessionLease {
                    key,
                    credential,
                    released: AtomicBool::new(false),
                });
            }
            tracing::info!(session = %key, "Cached session failed its probe, evicting");
            slot.evict();
        }

        let credential = self
            .provider
            .issue(&key)
            .await?
            .ok_or_else(|| SessionError::NotIssued {
                key: key.to_string(),
            })?;

        slot.credential = Some(credential.clone());
        slot.holders += 1;
        tracing::info!(session = %key, holders = slot.holders, "Cached new session");
        Ok(SessionLease {
            key,
            credential,
            released: AtomicBool::new(false),
        })
    }

    /// Drop a job's hold on its session. The last holder tears down the
    /// live connection; the credential stays cached either way.
    pub async fn release(&self, lease: &SessionLease) {
        if lease.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(slot) = self.slots.get(&lease.key).map(|entry| Arc::clone(entry.value())) else {
            return;
        };
        let mut slot = slot.lock().await;

        let remaining = if slot.credential.as_ref() == Some(&lease.credential) {
            slot.holders = slot.holders.saturating_sub(1);
            slot.holders
        } else if let Some(index) = slot.retired.iter().position(|(c, _)| *c == lease.credential) {
            let entry = &mut slot.retired[index];
            entry.1 = entry.1.saturating_sub(1);
            let remaining = entry.1;
            if remaining == 0 {
                slot.retired.swap_remove(index);
            }
            remaining
        } else {
            tracing::warn!(session = %lease.key, "Released a session the cache no longer tracks");
            return;
        };

        if remaining == 0 {
            self.provider.release(&lease.key, &lease.credential).await;
        }
        tracing::debug!(session = %lease.key, holders = slot.total_holders(), "Released session");
    }

    /// Forget the cached credential for `key`. Jobs still holding it keep
    /// it until they release.
    pub async fn invalidate(&self, key: &SessionKey) {
        if let Some(slot) = self.slots.get(key).map(|entry| Arc::clone(entry.value())) {
            slot.lock().await.evict();
        }
    }

    /// Number of jobs holding the session for `key`.
    pub async fn holders(&self, key: &SessionKey) -> usize {
        match self.slots.get(key).map(|entry| Arc::clone(entry.value())) {
            Some(slot) => slot.lock().await.total_holders(),
            None => 0,
        }
    }

    /// Number of keys with a slot in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, key: &SessionKey) -> Arc<Mutex<Slot>> {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }
}
