//! attest-session
//!
//! Per-endpoint pairing state. A session ties a conversational endpoint to
//! the wallet address it claimed, and expires after a period of inactivity.
//!
//! Clock values are passed in so expiry is deterministic under test.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use attest_schemas::{Address, DeviceAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub device: DeviceAddress,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub address: Option<Address>,
}

impl Session {
    fn new(device: DeviceAddress, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            created_at: now,
            last_seen: now,
            address: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_seen > ttl
    }
}

/// Longest idle period a session may be configured to survive.
pub const MAX_TTL_SECS: u64 = 365 * 86_400;

/// TTL-evicting session cache keyed by endpoint.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<DeviceAddress, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Clamped to `MAX_TTL_SECS`.
    pub fn with_ttl_secs(secs: u64) -> Self {
        let secs = secs.min(MAX_TTL_SECS) as i64;
        Self::new(Duration::try_seconds(secs).unwrap_or(Duration::zero()))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<DeviceAddress, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    /// Get-or-create under one lock, refreshing `last_seen`. An expired
    /// entry is replaced by a fresh session.
    pub fn touch(&self, device: &DeviceAddress, now: DateTime<Utc>) -> Result<Session> {
        let mut map = self.lock()?;
        let fresh = match map.get(device) {
            Some(s) => s.is_expired(now, self.ttl),
            None => true,
        };
        if fresh {
            tracing::debug!(device = %device, "session created");
            map.insert(device.clone(), Session::new(device.clone(), now));
        }
        let session = map
            .get_mut(device)
            .ok_or_else(|| anyhow!("session vanished under lock"))?;
        session.last_seen = now;
        Ok(session.clone())
    }

    /// Record the endpoint's claimed address, creating the session if needed.
    pub fn claim_address(
        &self,
        device: &DeviceAddress,
        address: &Address,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut map = self.lock()?;
        let expired = map
            .get(device)
            .map_or(true, |s| s.is_expired(now, self.ttl));
        if expired {
            map.insert(device.clone(), Session::new(device.clone(), now));
        }
        let session = map
            .get_mut(device)
            .ok_or_else(|| anyhow!("session vanished under lock"))?;
        session.address = Some(address.clone());
        session.last_seen = now;
        Ok(session.clone())
    }

    /// Live session for `device`, without refreshing it. Drops an expired one.
    pub fn get(&self, device: &DeviceAddress, now: DateTime<Utc>) -> Result<Option<Session>> {
        let mut map = self.lock()?;
        let live = map.get(device).filter(|s| !s.is_expired(now, self.ttl)).cloned();
        if live.is_none() {
            map.remove(device);
        }
        Ok(live)
    }

    /// Remove every expired session; returns how many were dropped.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut map = self.lock()?;
        let before = map.len();
        let ttl = self.ttl;
        map.retain(|_, s| !s.is_expired(now, ttl));
        Ok(before - map.len())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
