//! The session tracker: owns the in-memory session and persists it.
//!
//! # Concurrency
//!
//! Operations are driven from async event handlers, so several of them can be
//! in flight at once. Three rules keep the accounting exact:
//!
//! - [`Tracker::stop`] takes the session out of memory synchronously, before
//!   any I/O. A second concurrent stop sees either no session or the
//!   in-flight stop, never the same session again.
//! - At most one stop is in flight. Later stop requests attach to the same
//!   shared future instead of issuing their own write.
//! - Flush deltas are anchored at `last_flush`, which is advanced in memory
//!   before the write is issued, and all store writes pass through a FIFO
//!   write gate. A stop that captures the session after a flush advanced it
//!   therefore writes after that flush and only counts what is left.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::clock::{Clock, day_key, elapsed_ms, round_ms};
use crate::day::TimelineBlock;
use crate::session::{PendingSession, Session};
use crate::settings::Settings;
use crate::store::{Store, StoreOp};
use crate::types::{Domain, TabId, WindowId};

/// Result of ending a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no session to stop.
    Idle,
    /// The session was dropped without writing time: its domain is now
    /// excluded, or it was private and private time is not retained.
    Discarded { domain: Domain },
    /// The final increment and the session's timeline block were written.
    Recorded {
        block: TimelineBlock,
        increment_ms: i64,
    },
    /// The session was cleared but persisting it failed.
    Failed { domain: Domain, message: String },
}

/// Result of a periodic flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No session is active.
    Idle,
    /// Less than one granularity unit elapsed since the last flush.
    Skipped,
    Flushed { increment_ms: i64 },
    /// The session became untrackable and was stopped without writing time.
    Discarded,
    Failed { message: String },
}

/// Result of startup recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A session is already tracked, or no marker was left behind.
    NothingToRecover,
    /// The marker's window still exists; the session continues.
    Resumed { domain: Domain },
    /// The marker's window is gone; the session was ended at its last flush.
    Finalized(StopOutcome),
    Failed { message: String },
}

enum FlushStep {
    Idle,
    Skip,
    Discard,
    Write {
        domain: Domain,
        increment_ms: i64,
        pending: PendingSession,
    },
}

type SharedStop = Shared<BoxFuture<'static, StopOutcome>>;

struct InFlightStop {
    generation: u64,
    outcome: SharedStop,
}

#[derive(Default)]
struct TrackerState {
    session: Option<Session>,
    stopping: Option<InFlightStop>,
    generation: u64,
}

struct Inner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    state: Mutex<TrackerState>,
    write_gate: tokio::sync::Mutex<()>,
}

/// Tracks the current session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Tracker")
            .field("session", &state.session)
            .field("stopping", &state.stopping.is_some())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persists a session that has already been removed from memory.
    async fn finish(&self, session: Session, end: DateTime<Utc>) -> StopOutcome {
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(domain = %session.domain, error = %err, "failed to read settings while stopping");
                return StopOutcome::Failed {
                    domain: session.domain,
                    message: err.to_string(),
                };
            }
        };

        let _gate = self.write_gate.lock().await;

        if !persistable(&settings, &session) {
            tracing::debug!(domain = %session.domain, "discarding session");
            if let Err(err) = self
                .store
                .apply(vec![StoreOp::SetPending(None), StoreOp::SetLive(None)])
                .await
            {
                tracing::warn!(error = %err, "failed to clear session markers");
            }
            return StopOutcome::Discarded {
                domain: session.domain,
            };
        }

        let increment_ms = round_ms(elapsed_ms(session.last_flush, end), settings.granularity_ms);
        let day = day_key(end);
        let block = TimelineBlock::new(session.domain.clone(), session.start, end);

        let mut ops = Vec::with_capacity(4);
        if increment_ms > 0 {
            ops.push(StoreOp::AddTotal {
                day,
                domain: session.domain.clone(),
                ms: increment_ms,
            });
        }
        ops.push(StoreOp::AppendBlock {
            day,
            block: block.clone(),
        });
        ops.push(StoreOp::SetPending(None));
        ops.push(StoreOp::SetLive(None));

        match self.store.apply(ops).await {
            Ok(()) => {
                tracing::debug!(
                    domain = %block.domain,
                    duration_ms = block.duration_ms(),
                    increment_ms,
                    "session recorded"
                );
                StopOutcome::Recorded {
                    block,
                    increment_ms,
                }
            }
            Err(err) => {
                tracing::warn!(domain = %session.domain, error = %err, "failed to persist session");
                StopOutcome::Failed {
                    domain: session.domain,
                    message: err.to_string(),
                }
            }
        }
    }
}

fn persistable(settings: &Settings, session: &Session) -> bool {
    !settings.excluded.contains(&session.domain) && settings.allows_private(session.private)
}

impl Tracker {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                state: Mutex::new(TrackerState::default()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// A copy of the current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.inner.lock().session.clone()
    }

    /// Whether a stop is still persisting.
    pub fn is_stopping(&self) -> bool {
        self.inner.lock().stopping.is_some()
    }

    /// Starts tracking `domain` in the given tab.
    ///
    /// Any current session is stopped first, and an in-flight stop is
    /// awaited, so the new session's writes can't interleave with the old
    /// one's. Returns `false` without doing anything when the domain is
    /// excluded or private time may not be kept.
    pub async fn start(
        &self,
        domain: Domain,
        tab_id: TabId,
        window_id: WindowId,
        private: bool,
    ) -> bool {
        self.stop().await;

        let settings = match self.inner.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read settings, not starting");
                return false;
            }
        };
        if !settings.is_trackable(Some(&domain)) || !settings.allows_private(private) {
            tracing::debug!(%domain, private, "not trackable");
            return false;
        }

        let _gate = self.inner.write_gate.lock().await;
        let session = Session::new(domain, tab_id, window_id, private, self.inner.clock.now());
        {
            let mut state = self.inner.lock();
            if state.session.is_some() || state.stopping.is_some() {
                tracing::debug!(domain = %session.domain, "another session won the race");
                return false;
            }
            state.session = Some(session.clone());
        }

        tracing::debug!(domain = %session.domain, tab = %tab_id, window = %window_id, "session started");
        if let Err(err) = self
            .inner
            .store
            .apply(vec![
                StoreOp::SetPending(Some(session.pending())),
                StoreOp::SetLive(Some(session.live())),
            ])
            .await
        {
            tracing::warn!(error = %err, "failed to write session markers");
        }
        true
    }

    /// Persists the time accumulated since the last flush.
    ///
    /// Never ends the session and never writes a timeline block. If the
    /// session's domain has been excluded (or private time is no longer
    /// kept), the session is stopped without recording anything.
    pub async fn flush(&self) -> FlushOutcome {
        if self.session().is_none() {
            return FlushOutcome::Idle;
        }

        let settings = match self.inner.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read settings while flushing");
                return FlushOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };

        let gate = self.inner.write_gate.lock().await;
        let now = self.inner.clock.now();
        let step = {
            let mut state = self.inner.lock();
            match state.session.as_mut() {
                None => FlushStep::Idle,
                Some(session) if !persistable(&settings, session) => FlushStep::Discard,
                Some(session) => {
                    let increment_ms =
                        round_ms(elapsed_ms(session.last_flush, now), settings.granularity_ms);
                    if increment_ms <= 0 {
                        FlushStep::Skip
                    } else {
                        // Carry the sub-granularity remainder into the next interval.
                        session.last_flush += chrono::Duration::milliseconds(increment_ms);
                        FlushStep::Write {
                            domain: session.domain.clone(),
                            increment_ms,
                            pending: session.pending(),
                        }
                    }
                }
            }
        };

        let (domain, increment_ms, pending) = match step {
            FlushStep::Idle => return FlushOutcome::Idle,
            FlushStep::Skip => return FlushOutcome::Skipped,
            FlushStep::Discard => {
                drop(gate);
                return match self.stop().await {
                    StopOutcome::Failed { message, .. } => FlushOutcome::Failed { message },
                    _ => FlushOutcome::Discarded,
                };
            }
            FlushStep::Write {
                domain,
                increment_ms,
                pending,
            } => (domain, increment_ms, pending),
        };

        let ops = vec![
            StoreOp::AddTotal {
                day: day_key(now),
                domain: domain.clone(),
                ms: increment_ms,
            },
            StoreOp::SetPending(Some(pending)),
        ];
        let result = self.inner.store.apply(ops).await;
        drop(gate);
        match result {
            Ok(()) => {
                tracing::debug!(%domain, increment_ms, "flushed");
                FlushOutcome::Flushed { increment_ms }
            }
            Err(err) => {
                tracing::warn!(%domain, error = %err, "failed to flush");
                FlushOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Ends the current session.
    ///
    /// Idempotent and coalescing: without a session this returns
    /// [`StopOutcome::Idle`] immediately, and while a stop is persisting every
    /// caller receives that stop's outcome.
    pub async fn stop(&self) -> StopOutcome {
        let now = self.inner.clock.now();
        let outcome = {
            let mut state = self.inner.lock();
            if let Some(in_flight) = &state.stopping {
                in_flight.outcome.clone()
            } else {
                let Some(session) = state.session.take() else {
                    return StopOutcome::Idle;
                };
                self.begin_stop(&mut state, session, now)
            }
        };
        outcome.await
    }

    /// Spawns the persistence of `session` and installs it as the in-flight
    /// stop. Spawned so that it completes even if every caller is dropped.
    fn begin_stop(
        &self,
        state: &mut TrackerState,
        session: Session,
        end: DateTime<Utc>,
    ) -> SharedStop {
        state.generation += 1;
        let generation = state.generation;
        let domain = session.domain.clone();
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let outcome = inner.finish(session, end).await;
            let mut state = inner.lock();
            if state
                .stopping
                .as_ref()
                .is_some_and(|s| s.generation == generation)
            {
                state.stopping = None;
            }
            outcome
        });

        let outcome = handle
            .map(move |joined| {
                joined.unwrap_or_else(|err| StopOutcome::Failed {
                    domain,
                    message: err.to_string(),
                })
            })
            .boxed()
            .shared();
        state.stopping = Some(InFlightStop {
            generation,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Points the current session at a different tab without ending it.
    ///
    /// Returns `false` if there is no session.
    pub fn retarget(&self, tab_id: TabId) -> bool {
        let mut state = self.inner.lock();
        match state.session.as_mut() {
            Some(session) => {
                session.tab_id = tab_id;
                true
            }
            None => false,
        }
    }

    /// Clears the live indicator when nothing is being tracked.
    pub async fn clear_live(&self) {
        let _gate = self.inner.write_gate.lock().await;
        if self.session().is_some() {
            return;
        }
        match self.inner.store.live_session().await {
            Ok(None) => return,
            Ok(Some(_)) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read live session"),
        }
        if let Err(err) = self.inner.store.apply(vec![StoreOp::SetLive(None)]).await {
            tracing::warn!(error = %err, "failed to clear live session");
        }
    }

    /// Recovers a session interrupted by a process restart.
    ///
    /// If the marker's window is still open the session simply continues.
    /// Otherwise it is ended at its last flush: time after that point was
    /// never observed and is not attributed.
    pub async fn recover(&self, open_windows: &[WindowId]) -> RecoveryOutcome {
        if self.session().is_some() || self.is_stopping() {
            return RecoveryOutcome::NothingToRecover;
        }
        let pending = match self.inner.store.pending_session().await {
            Ok(Some(pending)) => pending,
            Ok(None) => return RecoveryOutcome::NothingToRecover,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pending session");
                return RecoveryOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };

        let session = Session::from(pending);
        let outcome = {
            let mut state = self.inner.lock();
            if state.session.is_some() || state.stopping.is_some() {
                return RecoveryOutcome::NothingToRecover;
            }
            if open_windows.contains(&session.window_id) {
                tracing::info!(domain = %session.domain, "resuming interrupted session");
                let domain = session.domain.clone();
                state.session = Some(session);
                return RecoveryOutcome::Resumed { domain };
            }
            tracing::info!(domain = %session.domain, "finalizing interrupted session");
            let end = session.last_flush;
            self.begin_stop(&mut state, session, end)
        };
        RecoveryOutcome::Finalized(outcome.await)
    }
}
