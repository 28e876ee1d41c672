//! Reconciler scenarios driven by synthetic host event sequences.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use wt_core::{
    Clock, DayRecord, Domain, Host, HostError, HostEvent, IdleState, ManualClock, MemoryStore,
    ModelHost, PendingSession, Reconciler, Settings, Store, StoreOp, TabId, TabInfo, Tracker,
    Transition, WindowId, day_key,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
}

fn domain(name: &str) -> Domain {
    Domain::new(name).unwrap()
}

/// A host whose queries can be made to fail.
struct FlakyHost {
    model: ModelHost,
    failing: AtomicBool,
}

#[async_trait]
impl Host for FlakyHost {
    async fn focused_window(&self) -> Result<Option<WindowId>, HostError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HostError::Query("browser went away".to_string()));
        }
        self.model.focused_window().await
    }

    async fn active_tab(&self, window: WindowId) -> Result<Option<TabInfo>, HostError> {
        self.model.active_tab(window).await
    }

    async fn windows(&self) -> Result<Vec<WindowId>, HostError> {
        self.model.windows().await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    host: Arc<FlakyHost>,
    reconciler: Reconciler,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(t0()));
        let host = Arc::new(FlakyHost {
            model: ModelHost::new(),
            failing: AtomicBool::new(false),
        });
        let tracker = Tracker::new(store.clone(), clock.clone());
        let reconciler = Reconciler::new(tracker, host.clone());
        Self {
            store,
            clock,
            host,
            reconciler,
        }
    }

    async fn emit(&self, event: HostEvent) -> Transition {
        self.host.model.observe(&event);
        self.reconciler.handle(&event).await
    }

    fn tracker(&self) -> &Tracker {
        self.reconciler.tracker()
    }

    fn tracked(&self) -> Option<String> {
        self.tracker().session().map(|s| s.domain.to_string())
    }

    async fn today(&self) -> DayRecord {
        self.store.day(day_key(self.clock.now())).await.unwrap()
    }

    async fn live(&self) -> Option<String> {
        self.store
            .live_session()
            .await
            .unwrap()
            .map(|l| l.domain.to_string())
    }

    /// Opens a focused window with one active tab.
    async fn open_window(&self, window: i64, tab: i64, url: &str) {
        self.emit(HostEvent::WindowCreated {
            window_id: WindowId(window),
            private: false,
        })
        .await;
        self.open_tab(window, tab, url).await;
        self.emit(HostEvent::WindowFocusChanged {
            window_id: Some(WindowId(window)),
        })
        .await;
    }

    /// Creates and activates a tab.
    async fn open_tab(&self, window: i64, tab: i64, url: &str) -> Transition {
        self.emit(HostEvent::TabCreated {
            tab: tab_info(window, tab, Some(url), false),
        })
        .await;
        self.emit(HostEvent::TabActivated {
            tab_id: TabId(tab),
            window_id: WindowId(window),
        })
        .await
    }

    async fn navigate(&self, window: i64, tab: i64, url: Option<&str>, loading: bool) -> Transition {
        self.emit(HostEvent::TabUpdated {
            tab: tab_info(window, tab, url, loading),
        })
        .await
    }
}

fn tab_info(window: i64, tab: i64, url: Option<&str>, loading: bool) -> TabInfo {
    TabInfo {
        id: TabId(tab),
        window_id: WindowId(window),
        url: url.map(str::to_string),
        loading,
        private: false,
    }
}

#[tokio::test]
async fn focused_tab_starts_a_session() {
    let h = Harness::new();
    h.open_window(1, 10, "https://www.github.com/rust-lang").await;

    assert_eq!(h.tracked().as_deref(), Some("github.com"));
    assert_eq!(h.live().await.as_deref(), Some("github.com"));
    assert_eq!(h.reconciler.last_focused(), Some(WindowId(1)));
}

#[tokio::test]
async fn switching_domains_ends_the_old_session() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(5000);

    let transition = h.open_tab(1, 11, "https://b.com/").await;

    assert!(matches!(transition, Transition::Restart(_)));
    assert_eq!(h.tracked().as_deref(), Some("b.com"));
    let day = h.today().await;
    assert_eq!(day.timeline.len(), 1);
    assert_eq!(day.timeline[0].domain, domain("a.com"));
    assert_eq!(day.timeline[0].start, t0());
    assert_eq!(day.timeline[0].end, t0() + Duration::seconds(5));
    assert_eq!(day.domains.get(&domain("a.com")), Some(&5000));
}

#[tokio::test]
async fn same_domain_tab_switch_keeps_the_session() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/one").await;
    h.clock.advance_ms(3000);

    let transition = h.open_tab(1, 11, "https://www.a.com/two").await;

    assert_eq!(transition, Transition::Retarget(TabId(11)));
    let session = h.tracker().session().unwrap();
    assert_eq!(session.tab_id, TabId(11));
    assert_eq!(session.start, t0());
    assert!(h.today().await.timeline.is_empty());
}

#[tokio::test]
async fn loading_navigation_does_not_churn() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(1000);

    assert_eq!(h.navigate(1, 10, None, true).await, Transition::Keep);
    assert_eq!(
        h.navigate(1, 10, Some("https://a.com/next"), false).await,
        Transition::Keep
    );

    assert!(h.today().await.timeline.is_empty());
    assert_eq!(h.tracker().session().unwrap().start, t0());
}

#[tokio::test]
async fn navigating_to_internal_page_stops_and_clears_live() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(2000);

    let transition = h.navigate(1, 10, Some("chrome://settings"), false).await;

    assert_eq!(transition, Transition::Stop);
    assert_eq!(h.tracked(), None);
    assert_eq!(h.live().await, None);
    assert_eq!(h.today().await.timeline.len(), 1);
}

#[tokio::test]
async fn browser_losing_focus_stops_tracking() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(4000);

    h.emit(HostEvent::WindowFocusChanged { window_id: None })
        .await;

    assert_eq!(h.tracked(), None);
    assert_eq!(h.live().await, None);
    assert_eq!(h.today().await.domains.get(&domain("a.com")), Some(&4000));

    h.clock.advance_ms(60_000);
    h.emit(HostEvent::WindowFocusChanged {
        window_id: Some(WindowId(1)),
    })
    .await;
    let session = h.tracker().session().unwrap();
    assert_eq!(session.start, t0() + Duration::seconds(64));
}

#[tokio::test]
async fn focusing_another_window_switches_sessions() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(2000);
    h.open_window(2, 20, "https://a.com/").await;

    let session = h.tracker().session().unwrap();
    assert_eq!(session.window_id, WindowId(2));
    assert_eq!(session.tab_id, TabId(20));
    let day = h.today().await;
    assert_eq!(day.timeline.len(), 1);
    assert_eq!(day.timeline[0].end, t0() + Duration::seconds(2));
}

#[tokio::test]
async fn idle_stops_and_activity_resumes() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(10_000);

    let transition = h
        .emit(HostEvent::IdleChanged {
            state: IdleState::Idle,
        })
        .await;
    assert_eq!(transition, Transition::Stop);
    assert_eq!(h.tracked(), None);

    // Alarms and tab events while idle don't restart tracking.
    h.clock.advance_ms(300_000);
    h.emit(HostEvent::Alarm).await;
    h.open_tab(1, 11, "https://b.com/").await;
    assert_eq!(h.tracked(), None);

    h.emit(HostEvent::IdleChanged {
        state: IdleState::Active,
    })
    .await;
    assert_eq!(h.tracked().as_deref(), Some("b.com"));

    let day = h.today().await;
    assert_eq!(day.domains.get(&domain("a.com")), Some(&10_000));
    assert_eq!(day.domains.get(&domain("b.com")), None);
}

#[tokio::test]
async fn closing_the_tracked_tab_ends_the_session() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.open_tab(1, 11, "https://b.com/").await;
    h.clock.advance_ms(3000);

    h.emit(HostEvent::TabRemoved {
        tab_id: TabId(11),
        window_id: WindowId(1),
    })
    .await;
    assert_eq!(h.tracked(), None);

    h.emit(HostEvent::TabActivated {
        tab_id: TabId(10),
        window_id: WindowId(1),
    })
    .await;
    assert_eq!(h.tracked().as_deref(), Some("a.com"));
    assert_eq!(h.today().await.domains.get(&domain("b.com")), Some(&3000));
}

#[tokio::test]
async fn closing_the_tracked_window_resumes_in_the_remaining_one() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.open_window(2, 20, "https://b.com/").await;
    h.clock.advance_ms(7000);

    h.emit(HostEvent::WindowRemoved {
        window_id: WindowId(2),
    })
    .await;
    assert_eq!(h.tracked(), None);
    assert_eq!(h.reconciler.last_focused(), None);

    h.emit(HostEvent::WindowFocusChanged {
        window_id: Some(WindowId(1)),
    })
    .await;
    assert_eq!(h.tracked().as_deref(), Some("a.com"));
    assert_eq!(h.today().await.domains.get(&domain("b.com")), Some(&7000));
}

#[tokio::test]
async fn alarm_flushes_without_ending_the_session() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(2500);

    let transition = h.emit(HostEvent::Alarm).await;

    assert_eq!(transition, Transition::Keep);
    let day = h.today().await;
    assert_eq!(day.domains.get(&domain("a.com")), Some(&2000));
    assert!(day.timeline.is_empty());
    assert_eq!(h.tracker().session().unwrap().start, t0());

    h.clock.advance_ms(1500);
    h.emit(HostEvent::WindowFocusChanged { window_id: None })
        .await;
    let day = h.today().await;
    assert_eq!(day.domains.get(&domain("a.com")), Some(&4000));
    assert_eq!(day.timeline[0].end, t0() + Duration::milliseconds(4000));
}

#[tokio::test]
async fn alarm_resyncs_after_a_missed_event() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    // The activation event for tab 11 never reaches the reconciler.
    h.host.model.observe(&HostEvent::TabCreated {
        tab: tab_info(1, 11, Some("https://b.com/"), false),
    });
    h.host.model.observe(&HostEvent::TabActivated {
        tab_id: TabId(11),
        window_id: WindowId(1),
    });
    h.clock.advance_ms(1000);

    h.emit(HostEvent::Alarm).await;

    assert_eq!(h.tracked().as_deref(), Some("b.com"));
}

#[tokio::test]
async fn excluded_domains_are_never_tracked() {
    let mut settings = Settings::default();
    settings.excluded.insert(domain("b.com"));
    let h = Harness::with_store(MemoryStore::with_settings(settings));
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(1000);

    let transition = h.open_tab(1, 11, "https://b.com/").await;

    assert_eq!(transition, Transition::Stop);
    assert_eq!(h.tracked(), None);
    assert_eq!(h.live().await, None);
}

#[tokio::test]
async fn private_windows_are_not_tracked_by_default() {
    let h = Harness::new();
    h.emit(HostEvent::WindowCreated {
        window_id: WindowId(5),
        private: true,
    })
    .await;
    h.open_tab(5, 50, "https://a.com/").await;
    h.emit(HostEvent::WindowFocusChanged {
        window_id: Some(WindowId(5)),
    })
    .await;

    assert_eq!(h.tracked(), None);
}

#[tokio::test]
async fn host_failure_stops_defensively() {
    let h = Harness::new();
    h.open_window(1, 10, "https://a.com/").await;
    h.clock.advance_ms(2000);
    h.host.failing.store(true, Ordering::SeqCst);

    let transition = h.emit(HostEvent::Alarm).await;

    assert_eq!(transition, Transition::Stop);
    assert_eq!(h.tracked(), None);
    assert_eq!(h.today().await.timeline.len(), 1);

    h.host.failing.store(false, Ordering::SeqCst);
    h.emit(HostEvent::Alarm).await;
    assert_eq!(h.tracked().as_deref(), Some("a.com"));
}

#[tokio::test]
async fn startup_finalizes_session_from_a_closed_window() {
    let store = MemoryStore::new();
    store
        .apply(vec![StoreOp::SetPending(Some(PendingSession {
            domain: domain("old.com"),
            start: t0() - Duration::minutes(10),
            last_flush: t0() - Duration::minutes(8),
            tab_id: TabId(99),
            window_id: WindowId(99),
            private: false,
        }))])
        .await
        .unwrap();
    let h = Harness::with_store(store);
    h.host.model.observe(&HostEvent::TabCreated {
        tab: tab_info(1, 10, Some("https://a.com/"), false),
    });
    h.host.model.observe(&HostEvent::TabActivated {
        tab_id: TabId(10),
        window_id: WindowId(1),
    });
    h.host.model.observe(&HostEvent::WindowFocusChanged {
        window_id: Some(WindowId(1)),
    });

    h.emit(HostEvent::Startup).await;

    let recovered = h
        .store
        .day(day_key(t0() - Duration::minutes(8)))
        .await
        .unwrap();
    let block = recovered
        .timeline
        .iter()
        .find(|b| b.domain == domain("old.com"))
        .unwrap();
    assert_eq!(block.end, t0() - Duration::minutes(8));
    assert_eq!(h.tracked().as_deref(), Some("a.com"));
    let pending = h.store.pending_session().await.unwrap().unwrap();
    assert_eq!(pending.domain, domain("a.com"));
}

#[tokio::test]
async fn startup_resumes_session_in_an_open_window() {
    let store = MemoryStore::new();
    store
        .apply(vec![StoreOp::SetPending(Some(PendingSession {
            domain: domain("a.com"),
            start: t0() - Duration::minutes(5),
            last_flush: t0() - Duration::minutes(1),
            tab_id: TabId(10),
            window_id: WindowId(1),
            private: false,
        }))])
        .await
        .unwrap();
    let h = Harness::with_store(store);
    h.host.model.observe(&HostEvent::TabCreated {
        tab: tab_info(1, 10, Some("https://a.com/"), false),
    });
    h.host.model.observe(&HostEvent::TabActivated {
        tab_id: TabId(10),
        window_id: WindowId(1),
    });
    h.host.model.observe(&HostEvent::WindowFocusChanged {
        window_id: Some(WindowId(1)),
    });

    let transition = h.emit(HostEvent::Startup).await;

    assert_eq!(transition, Transition::Keep);
    assert_eq!(
        h.tracker().session().unwrap().start,
        t0() - Duration::minutes(5)
    );
}

#[tokio::test]
async fn marker_is_recovered_before_the_first_session_starts() {
    let store = MemoryStore::new();
    store
        .apply(vec![StoreOp::SetPending(Some(PendingSession {
            domain: domain("old.com"),
            start: t0() - Duration::minutes(10),
            last_flush: t0() - Duration::minutes(8),
            tab_id: TabId(99),
            window_id: WindowId(99),
            private: false,
        }))])
        .await
        .unwrap();
    let h = Harness::with_store(store);

    h.open_window(1, 10, "https://a.com/").await;
    h.emit(HostEvent::Startup).await;

    let recovered = h
        .store
        .day(day_key(t0() - Duration::minutes(8)))
        .await
        .unwrap();
    let blocks: Vec<_> = recovered
        .timeline
        .iter()
        .filter(|b| b.domain == domain("old.com"))
        .collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].end, t0() - Duration::minutes(8));
    assert_eq!(h.tracked().as_deref(), Some("a.com"));
    let pending = h.store.pending_session().await.unwrap().unwrap();
    assert_eq!(pending.domain, domain("a.com"));
}
