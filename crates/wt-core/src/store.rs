//! The durable key-value store the tracker persists into.
//!
//! The tracker only ever writes through [`Store::apply`], which takes a batch
//! of [`StoreOp`]s and must apply them atomically: a session's final
//! increment, its timeline block and the clearing of the pending marker land
//! together or not at all.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::day::{DayRecord, TimelineBlock};
use crate::session::{LiveSession, PendingSession};
use crate::settings::Settings;
use crate::types::Domain;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded.
    #[error("corrupt value for {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// A single write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Adds `ms` to the cumulative total of `domain` on `day`.
    AddTotal {
        day: NaiveDate,
        domain: Domain,
        ms: i64,
    },
    /// Appends a finished block to the timeline of `day`.
    AppendBlock { day: NaiveDate, block: TimelineBlock },
    /// Sets or clears the live session indicator.
    SetLive(Option<LiveSession>),
    /// Sets or clears the pending-session recovery marker.
    SetPending(Option<PendingSession>),
}

/// Persistence used by the session tracker.
#[async_trait]
pub trait Store: Send + Sync {
    async fn settings(&self) -> Result<Settings, StoreError>;

    async fn set_settings(&self, settings: &Settings) -> Result<(), StoreError>;

    /// Returns the record for `day`, empty if nothing was recorded.
    async fn day(&self, day: NaiveDate) -> Result<DayRecord, StoreError>;

    async fn live_session(&self) -> Result<Option<LiveSession>, StoreError>;

    async fn pending_session(&self) -> Result<Option<PendingSession>, StoreError>;

    /// Applies a batch of writes atomically.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    settings: Settings,
    days: HashMap<NaiveDate, DayRecord>,
    live: Option<LiveSession>,
    pending: Option<PendingSession>,
}

impl MemoryState {
    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::AddTotal { day, domain, ms } => {
                self.days.entry(day).or_default().add_total(&domain, ms);
            }
            StoreOp::AppendBlock { day, block } => {
                self.days.entry(day).or_default().append_block(block);
            }
            StoreOp::SetLive(live) => self.live = live,
            StoreOp::SetPending(pending) => self.pending = pending,
        }
    }
}

/// An in-process store.
///
/// Used by tests and by embedders that persist elsewhere. Every batch is
/// applied under one lock, so batches are atomic with respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    batches: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = Self::default();
        store.lock().settings = settings;
        store
    }

    /// Number of batches applied so far.
    pub fn batches_applied(&self) -> usize {
        *self
            .batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn settings(&self) -> Result<Settings, StoreError> {
        Ok(self.lock().settings.clone())
    }

    async fn set_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.lock().settings = settings.clone();
        Ok(())
    }

    async fn day(&self, day: NaiveDate) -> Result<DayRecord, StoreError> {
        Ok(self.lock().days.get(&day).cloned().unwrap_or_default())
    }

    async fn live_session(&self) -> Result<Option<LiveSession>, StoreError> {
        Ok(self.lock().live.clone())
    }

    async fn pending_session(&self) -> Result<Option<PendingSession>, StoreError> {
        Ok(self.lock().pending.clone())
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut state = self.lock();
        for op in ops {
            state.apply(op);
        }
        drop(state);
        *self
            .batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
        Ok(())
    }
}
