//! Per-day records: cumulative domain totals and the timeline of blocks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_ms;
use crate::types::Domain;

/// One uninterrupted tracked interval.
///
/// Blocks record the exact wall-clock span of a session. They are never
/// merged, even when two blocks for the same domain are adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBlock {
    pub domain: Domain,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimelineBlock {
    /// Creates a block, clamping `end` so that `end >= start`.
    pub fn new(domain: Domain, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            domain,
            start,
            end: end.max(start),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        elapsed_ms(self.start, self.end).max(0)
    }
}

/// Everything recorded for one local calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    /// Cumulative milliseconds per domain, built from rounded increments.
    #[serde(default)]
    pub domains: BTreeMap<Domain, i64>,
    /// Finished blocks in insertion order.
    #[serde(default)]
    pub timeline: Vec<TimelineBlock>,
}

/// Time attributed to one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainTotal {
    pub domain: Domain,
    pub ms: i64,
}

/// A domain's share of the day, for percentage views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainShare {
    pub domain: Domain,
    pub ms: i64,
    pub percent: f64,
}

impl DayRecord {
    pub fn add_total(&mut self, domain: &Domain, ms: i64) {
        if ms <= 0 {
            return;
        }
        *self.domains.entry(domain.clone()).or_insert(0) += ms;
    }

    pub fn append_block(&mut self, block: TimelineBlock) {
        self.timeline.push(block);
    }

    /// Sum of all cumulative domain totals.
    pub fn total_ms(&self) -> i64 {
        self.domains.values().sum()
    }

    /// Domain totals ordered by descending time.
    pub fn ranked_totals(&self) -> Vec<DomainTotal> {
        rank(self.domains.iter().map(|(d, ms)| (d.clone(), *ms)))
    }

    /// Each domain's share of the day's cumulative total.
    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond totals for one day fit comfortably in f64"
    )]
    pub fn percentages(&self) -> Vec<DomainShare> {
        let total = self.total_ms();
        self.ranked_totals()
            .into_iter()
            .map(|t| DomainShare {
                percent: if total > 0 {
                    t.ms as f64 * 100.0 / total as f64
                } else {
                    0.0
                },
                domain: t.domain,
                ms: t.ms,
            })
            .collect()
    }

    /// Timeline blocks sorted by start time.
    pub fn sorted_timeline(&self) -> Vec<TimelineBlock> {
        let mut blocks = self.timeline.clone();
        blocks.sort_by_key(|b| b.start);
        blocks
    }
}

/// Sums block durations per domain, ordered by descending duration.
///
/// Ties are broken by domain name so the output is stable.
pub fn aggregate(timeline: &[TimelineBlock]) -> Vec<DomainTotal> {
    let mut sums: BTreeMap<Domain, i64> = BTreeMap::new();
    for block in timeline {
        *sums.entry(block.domain.clone()).or_insert(0) += block.duration_ms();
    }
    rank(sums)
}

fn rank(totals: impl IntoIterator<Item = (Domain, i64)>) -> Vec<DomainTotal> {
    let mut ranked: Vec<DomainTotal> = totals
        .into_iter()
        .filter(|(_, ms)| *ms > 0)
        .map(|(domain, ms)| DomainTotal { domain, ms })
        .collect();
    ranked.sort_by(|a, b| b.ms.cmp(&a.ms).then_with(|| a.domain.cmp(&b.domain)));
    ranked
}
