//! Core logic for the web time tracker.
//!
//! This crate contains:
//! - Classification: mapping tab URLs to tracked domains
//! - The session tracker: start/flush/stop with exact, non-overlapping accounting
//! - Event reconciliation: turning tab/window/idle/alarm signals into session transitions
//! - Day records: cumulative domain totals and the timeline of finished blocks

pub mod clock;
pub mod day;
mod domain;
pub mod host;
mod model;
pub mod reconcile;
pub mod session;
pub mod settings;
pub mod store;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, day_key, round_ms};
pub use day::{DayRecord, DomainShare, DomainTotal, TimelineBlock, aggregate};
pub use domain::classify;
pub use host::{Host, HostError, HostEvent, IdleState, TabInfo};
pub use model::ModelHost;
pub use reconcile::{FocusContext, Reconciler, Transition, decide};
pub use session::{LiveSession, PendingSession, Session};
pub use settings::Settings;
pub use store::{MemoryStore, Store, StoreError, StoreOp};
pub use tracker::{FlushOutcome, RecoveryOutcome, StopOutcome, Tracker};
pub use types::{Domain, TabId, ValidationError, WindowId};
