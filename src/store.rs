//! Patient record store.
//!
//! Records are keyed by three upper-case initials. All mutation goes through
//! [`PatientStore::update`], which applies a synchronous transformation to the
//! whole record and bumps `last_modified`. A locked record rejects updates.

use std::collections::BTreeMap;
use std::sync::{LazyLock, RwLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::PatientRecord;

static RE_INITIALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("Patient record not found: {0}")]
    NotFound(String),

    #[error("Patient record is locked: {0}")]
    Locked(String),

    #[error("Record limit reached ({0} open records)")]
    CapacityReached(usize),

    #[error("Invalid initials: {0:?} (expected three letters)")]
    InvalidInitials(String),

    #[error("Patient record already exists: {0}")]
    AlreadyExists(String),

    #[error("Store lock poisoned")]
    LockFailed,
}

/// Record store contract used by the import and evaluation passes.
pub trait PatientStore: Send + Sync {
    fn get(&self, id: &str) -> Result<PatientRecord, StoreError>;

    /// Apply `mutator` to the stored record and return the updated copy.
    fn update(
        &self,
        id: &str,
        mutator: &mut dyn FnMut(&mut PatientRecord),
    ) -> Result<PatientRecord, StoreError>;

    fn create(&self, id: &str) -> Result<PatientRecord, StoreError>;

    fn set_locked(&self, id: &str, locked: bool) -> Result<(), StoreError>;

    fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Open records, most recently modified first.
    fn list(&self) -> Result<Vec<PatientRecord>, StoreError>;
}

/// Upper-case and validate patient initials.
pub fn normalize_initials(raw: &str) -> Result<String, StoreError> {
    let id = raw.trim().to_uppercase();
    if RE_INITIALS.is_match(&id) {
        Ok(id)
    } else {
        Err(StoreError::InvalidInitials(raw.to_string()))
    }
}

/// In-memory store backed by RwLock, with TTL eviction and a capacity cap.
pub struct MemoryPatientStore {
    records: RwLock<BTreeMap<String, PatientRecord>>,
    config: StoreConfig,
}

impl MemoryPatientStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Drop records created more than `ttl_hours` before `now`.
    /// Returns the evicted ids.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let ttl = Duration::hours(self.config.ttl_hours);
        let mut records = self.records.write().map_err(|_| StoreError::LockFailed)?;
        let expired: Vec<String> = records
            .values()
            .filter(|r| now - r.created_at > ttl)
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            records.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(evicted = expired.len(), "Expired patient records evicted");
        }
        Ok(expired)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPatientStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl PatientStore for MemoryPatientStore {
    fn get(&self, id: &str) -> Result<PatientRecord, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockFailed)?;
        records
            .get(&id.to_uppercase())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(
        &self,
        id: &str,
        mutator: &mut dyn FnMut(&mut PatientRecord),
    ) -> Result<PatientRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockFailed)?;
        let record = records
            .get_mut(&id.to_uppercase())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.locked {
            return Err(StoreError::Locked(record.id.clone()));
        }
        mutator(record);
        record.last_modified = Utc::now();
        Ok(record.clone())
    }

    fn create(&self, id: &str) -> Result<PatientRecord, StoreError> {
        let id = normalize_initials(id)?;
        self.evict_expired(Utc::now())?;

        let mut records = self.records.write().map_err(|_| StoreError::LockFailed)?;
        if records.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        if records.len() >= self.config.max_records {
            return Err(StoreError::CapacityReached(self.config.max_records));
        }
        let record = PatientRecord::new(&id, Utc::now());
        records.insert(id.clone(), record.clone());
        tracing::info!(patient = %id, open = records.len(), "Patient record created");
        Ok(record)
    }

    fn set_locked(&self, id: &str, locked: bool) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockFailed)?;
        let record = records
            .get_mut(&id.to_uppercase())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.locked = locked;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockFailed)?;
        records
            .remove(&id.to_uppercase())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockFailed)?;
        let mut all: Vec<PatientRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(all)
    }
}
