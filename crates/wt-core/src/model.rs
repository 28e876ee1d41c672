//! A [`Host`] that mirrors browser state from the event stream.
//!
//! Hosts that can only push events (a native-messaging pipe, a recorded
//! session) have nothing to query. `ModelHost` keeps the last reported
//! windows, tabs and focus so the reconciler can query it like a live
//! browser. Feed every event to [`ModelHost::observe`] before handing it to
//! the reconciler.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::host::{Host, HostError, HostEvent, TabInfo};
use crate::types::{TabId, WindowId};

#[derive(Debug, Default, Clone)]
struct WindowModel {
    private: bool,
    active: Option<TabId>,
}

#[derive(Debug, Default)]
struct ModelState {
    windows: BTreeMap<WindowId, WindowModel>,
    tabs: HashMap<TabId, TabInfo>,
    focused: Option<WindowId>,
}

impl ModelState {
    fn window(&mut self, id: WindowId) -> &mut WindowModel {
        self.windows.entry(id).or_default()
    }

    fn upsert_tab(&mut self, mut tab: TabInfo) {
        let window = self.window(tab.window_id);
        tab.private |= window.private;
        self.tabs.insert(tab.id, tab);
    }
}

/// Browser state reconstructed from [`HostEvent`]s.
#[derive(Debug, Default)]
pub struct ModelHost {
    state: Mutex<ModelState>,
}

impl ModelHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies an event to the model.
    pub fn observe(&self, event: &HostEvent) {
        let mut state = self.lock();
        match event {
            HostEvent::TabCreated { tab } | HostEvent::TabUpdated { tab } => {
                state.upsert_tab(tab.clone());
            }
            HostEvent::TabActivated { tab_id, window_id } => {
                state.window(*window_id).active = Some(*tab_id);
                if let Some(tab) = state.tabs.get_mut(tab_id) {
                    tab.window_id = *window_id;
                }
            }
            HostEvent::TabRemoved { tab_id, window_id } => {
                state.tabs.remove(tab_id);
                if let Some(window) = state.windows.get_mut(window_id) {
                    if window.active == Some(*tab_id) {
                        window.active = None;
                    }
                }
            }
            HostEvent::WindowCreated { window_id, private } => {
                state.window(*window_id).private = *private;
            }
            HostEvent::WindowFocusChanged { window_id } => {
                if let Some(id) = window_id {
                    state.window(*id);
                }
                state.focused = *window_id;
            }
            HostEvent::WindowRemoved { window_id } => {
                state.windows.remove(window_id);
                state.tabs.retain(|_, tab| tab.window_id != *window_id);
                if state.focused == Some(*window_id) {
                    state.focused = None;
                }
            }
            HostEvent::Startup | HostEvent::IdleChanged { .. } | HostEvent::Alarm => {}
        }
    }
}

#[async_trait]
impl Host for ModelHost {
    async fn focused_window(&self) -> Result<Option<WindowId>, HostError> {
        Ok(self.lock().focused)
    }

    async fn active_tab(&self, window: WindowId) -> Result<Option<TabInfo>, HostError> {
        let state = self.lock();
        let model = state
            .windows
            .get(&window)
            .ok_or(HostError::NoSuchWindow(window))?;
        let Some(tab_id) = model.active else {
            return Ok(None);
        };
        state
            .tabs
            .get(&tab_id)
            .cloned()
            .map(Some)
            .ok_or(HostError::NoSuchTab(tab_id))
    }

    async fn windows(&self) -> Result<Vec<WindowId>, HostError> {
        Ok(self.lock().windows.keys().copied().collect())
    }
}
