//! The browser host: live tab/window queries and the signals it emits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TabId, WindowId};

/// Host query errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The window was closed before it could be queried.
    #[error("window {0} no longer exists")]
    NoSuchWindow(WindowId),
    /// The tab was closed before it could be queried.
    #[error("tab {0} no longer exists")]
    NoSuchTab(TabId),
    /// Any other failure reported by the host.
    #[error("host query failed: {0}")]
    Query(String),
}

/// A tab as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    /// `None` while the host has not reported a URL yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The tab is still navigating.
    #[serde(default)]
    pub loading: bool,
    /// The tab lives in a private/incognito window.
    #[serde(default)]
    pub private: bool,
}

/// User presence as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

impl IdleState {
    pub const fn is_idle(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A signal from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The process started (or the service worker woke up).
    Startup,
    TabCreated {
        tab: TabInfo,
    },
    /// A tab's URL or loading status changed.
    TabUpdated {
        tab: TabInfo,
    },
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
    },
    TabRemoved {
        tab_id: TabId,
        window_id: WindowId,
    },
    WindowCreated {
        window_id: WindowId,
        #[serde(default)]
        private: bool,
    },
    /// Focus moved to `window_id`, or away from the browser when `None`.
    WindowFocusChanged {
        #[serde(default)]
        window_id: Option<WindowId>,
    },
    WindowRemoved {
        window_id: WindowId,
    },
    IdleChanged {
        state: IdleState,
    },
    /// The recurring low-frequency timer fired.
    Alarm,
}

/// Live queries against the browser.
#[async_trait]
pub trait Host: Send + Sync {
    /// The window that currently has focus, if the browser has focus at all.
    async fn focused_window(&self) -> Result<Option<WindowId>, HostError>;

    /// The active tab of `window`.
    async fn active_tab(&self, window: WindowId) -> Result<Option<TabInfo>, HostError>;

    /// All open windows.
    async fn windows(&self) -> Result<Vec<WindowId>, HostError>;
}
