//! `wt run`: the tracking loop.
//!
//! Reads one JSON [`HostEvent`] per line, mirrors browser state in a
//! [`ModelHost`] and hands every event to the [`Reconciler`]. A timer injects
//! `alarm` events so long sessions are flushed periodically. When the stream
//! ends the browser is gone: the current session is stopped and recorded.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{Instant, MissedTickBehavior};

use wt_core::{Clock, HostEvent, ModelHost, Reconciler, Store, Tracker};

/// Counts from one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Events read from the stream and handled.
    pub events: usize,
    /// Lines that were not valid events.
    pub skipped: usize,
    /// Alarms fired by the timer.
    pub alarms: usize,
}

/// Takes the exclusive run lock, failing if another `wt run` holds it.
///
/// The lock is released when the returned file is dropped.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = File::create(path)
        .with_context(|| format!("failed to create lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("another `wt run` is active ({} is locked)", path.display()))?;
    Ok(file)
}

fn parse_event(line: &str) -> Result<Option<HostEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

struct Driver {
    host: Arc<ModelHost>,
    reconciler: Reconciler,
}

impl Driver {
    async fn dispatch(&self, event: &HostEvent) {
        self.host.observe(event);
        let transition = self.reconciler.handle(event).await;
        tracing::trace!(?transition, "event handled");
    }
}

/// Runs the tracking loop until `input` is exhausted.
pub async fn run<R>(
    input: R,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    alarm_every: Duration,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let host = Arc::new(ModelHost::new());
    let driver = Driver {
        reconciler: Reconciler::new(Tracker::new(store, clock), host.clone()),
        host,
    };
    let mut summary = RunSummary::default();

    let mut lines = input.lines();
    let mut alarm = tokio::time::interval_at(Instant::now() + alarm_every, alarm_every);
    alarm.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut line_number = 0_usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read event stream")? else {
                    break;
                };
                line_number += 1;
                match parse_event(&line) {
                    Ok(Some(event)) => {
                        driver.dispatch(&event).await;
                        summary.events += 1;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(line = line_number, error = %err, "skipping malformed event");
                        summary.skipped += 1;
                    }
                }
            }
            _ = alarm.tick() => {
                driver.dispatch(&HostEvent::Alarm).await;
                summary.alarms += 1;
            }
        }
    }

    let tracker = driver.reconciler.tracker();
    let outcome = tracker.stop().await;
    tracker.clear_live().await;
    tracing::info!(
        events = summary.events,
        skipped = summary.skipped,
        ?outcome,
        "event stream closed"
    );
    Ok(summary)
}
