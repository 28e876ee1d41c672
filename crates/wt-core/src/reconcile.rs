//! Event reconciliation: deciding what each host signal means for the session.
//!
//! The reconciler never keeps its own copy of tab state. On every event it
//! re-derives the focus context from the [`Host`] and compares it with the
//! tracker's session, so a missed or reordered event is corrected by the next
//! one. The comparison itself is the pure function [`decide`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::classify;
use crate::host::{Host, HostError, HostEvent, IdleState};
use crate::session::Session;
use crate::tracker::{StopOutcome, Tracker};
use crate::types::{Domain, TabId, WindowId};

/// What the user is looking at right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusContext {
    pub tab_id: TabId,
    pub window_id: WindowId,
    /// `None` when the URL is missing, internal or unparsable.
    pub domain: Option<Domain>,
    pub loading: bool,
    pub private: bool,
}

/// The session change an event calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session (or the lack of one) already matches the context.
    Keep,
    /// Same logical session, now produced by a different tab.
    Retarget(TabId),
    /// No session yet; start one for the context.
    Start(FocusContext),
    /// End the session and start a new one for the context.
    Restart(FocusContext),
    /// End the session, if any, and clear the live indicator.
    Stop,
}

/// Computes the transition from the current session to `context`.
///
/// `trackable` says whether the context's domain may be tracked (classified,
/// not excluded, privacy rules permitting). A context of `None` means nothing
/// trackable has focus: the browser is unfocused, idle, or could not be
/// queried.
pub fn decide(
    session: Option<&Session>,
    context: Option<&FocusContext>,
    trackable: bool,
) -> Transition {
    let Some(context) = context else {
        return Transition::Stop;
    };
    let Some(session) = session else {
        return if trackable {
            Transition::Start(context.clone())
        } else {
            Transition::Stop
        };
    };

    if session.window_id != context.window_id {
        return replace(context, trackable);
    }

    let same_domain = trackable && context.domain.as_ref() == Some(&session.domain);
    // Navigations briefly report no URL; don't end the session over that.
    let undetermined = context.loading && context.domain.is_none();

    if same_domain || undetermined {
        if session.tab_id == context.tab_id {
            Transition::Keep
        } else {
            Transition::Retarget(context.tab_id)
        }
    } else {
        replace(context, trackable)
    }
}

fn replace(context: &FocusContext, trackable: bool) -> Transition {
    if trackable {
        Transition::Restart(context.clone())
    } else {
        Transition::Stop
    }
}

#[derive(Debug, Default)]
struct ReconcilerState {
    focused: Option<WindowId>,
    idle: bool,
    /// Set once the pending marker of a previous run has been dealt with.
    recovered: bool,
}

/// Drives the [`Tracker`] from host events.
pub struct Reconciler {
    tracker: Tracker,
    host: Arc<dyn Host>,
    state: Mutex<ReconcilerState>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("tracker", &self.tracker)
            .field("state", &self.lock())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(tracker: Tracker, host: Arc<dyn Host>) -> Self {
        Self {
            tracker,
            host,
            state: Mutex::new(ReconcilerState::default()),
        }
    }

    pub const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// The focused window as of the last event or query.
    pub fn last_focused(&self) -> Option<WindowId> {
        self.lock().focused
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles one host event and returns the transition it led to.
    pub async fn handle(&self, event: &HostEvent) -> Transition {
        tracing::debug!(?event, "host event");
        match event {
            HostEvent::Startup => self.sync().await,
            HostEvent::TabCreated { .. } | HostEvent::WindowCreated { .. } => Transition::Keep,
            HostEvent::TabUpdated { .. } | HostEvent::TabActivated { .. } => self.sync().await,
            HostEvent::TabRemoved { tab_id, .. } => {
                if self.tracks(|s| s.tab_id == *tab_id) {
                    self.stop("tracked tab closed").await;
                }
                self.sync().await
            }
            HostEvent::WindowFocusChanged { window_id } => {
                self.lock().focused = *window_id;
                if self.tracks(|s| Some(s.window_id) != *window_id) {
                    self.stop("focus moved to another window").await;
                }
                self.sync().await
            }
            HostEvent::WindowRemoved { window_id } => {
                {
                    let mut state = self.lock();
                    if state.focused == Some(*window_id) {
                        state.focused = None;
                    }
                }
                if self.tracks(|s| s.window_id == *window_id) {
                    self.stop("tracked window closed").await;
                }
                self.sync().await
            }
            HostEvent::IdleChanged { state } => self.set_idle(*state).await,
            HostEvent::Alarm => {
                self.tracker.flush().await;
                self.sync().await
            }
        }
    }

    fn tracks(&self, predicate: impl FnOnce(&Session) -> bool) -> bool {
        self.tracker.session().as_ref().is_some_and(predicate)
    }

    async fn set_idle(&self, idle: IdleState) -> Transition {
        self.lock().idle = idle.is_idle();
        if idle.is_idle() {
            self.stop("user is idle").await;
            Transition::Stop
        } else {
            self.sync().await
        }
    }

    /// Resolves a previous run's pending marker, once, before anything can
    /// start a session and overwrite it.
    async fn recover_once(&self) {
        if std::mem::replace(&mut self.lock().recovered, true) {
            return;
        }
        match self.host.windows().await {
            Ok(windows) => {
                let outcome = self.tracker.recover(&windows).await;
                tracing::debug!(?outcome, "startup recovery");
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot list windows, skipping recovery");
            }
        }
    }

    async fn stop(&self, reason: &str) {
        let outcome = self.tracker.stop().await;
        if outcome != StopOutcome::Idle {
            tracing::debug!(reason, ?outcome, "session stopped");
        }
        self.tracker.clear_live().await;
    }

    async fn focus_context(&self) -> Result<Option<FocusContext>, HostError> {
        let Some(window) = self.host.focused_window().await? else {
            return Ok(None);
        };
        self.lock().focused = Some(window);
        let Some(tab) = self.host.active_tab(window).await? else {
            return Ok(None);
        };
        Ok(Some(FocusContext {
            tab_id: tab.id,
            window_id: tab.window_id,
            domain: tab.url.as_deref().and_then(classify),
            loading: tab.loading,
            private: tab.private,
        }))
    }

    /// Re-derives the focus context from the host and applies the transition.
    pub async fn sync(&self) -> Transition {
        self.recover_once().await;
        if self.lock().idle {
            self.stop("user is idle").await;
            return Transition::Stop;
        }

        let context = match self.focus_context().await {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(error = %err, "lost focus context");
                self.stop("host query failed").await;
                return Transition::Stop;
            }
        };
        let settings = match self.tracker.store().settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "cannot read settings");
                self.stop("settings unavailable").await;
                return Transition::Stop;
            }
        };

        let trackable = context.as_ref().is_some_and(|c| {
            settings.is_trackable(c.domain.as_ref()) && settings.allows_private(c.private)
        });
        let session = self.tracker.session();
        let transition = decide(session.as_ref(), context.as_ref(), trackable);
        tracing::debug!(?transition, "reconciled");
        self.apply(&transition).await;
        transition
    }

    async fn apply(&self, transition: &Transition) {
        match transition {
            Transition::Keep => {}
            Transition::Retarget(tab_id) => {
                self.tracker.retarget(*tab_id);
            }
            Transition::Start(context) | Transition::Restart(context) => {
                self.tracker.stop().await;
                let Some(domain) = context.domain.clone() else {
                    return;
                };
                self.tracker
                    .start(domain, context.tab_id, context.window_id, context.private)
                    .await;
            }
            Transition::Stop => {
                self.stop("focused tab is not trackable").await;
            }
        }
    }
}
