//! Report command: time per domain for one local day.
//!
//! The human-readable output lists the day's cumulative totals with their
//! share of the day, then the timeline summed per domain. `--json` emits the
//! same data plus every timeline block.

use std::fmt::Write;

use anyhow::Result;
use chrono::{NaiveDate, SecondsFormat};
use serde::Serialize;
use wt_core::{DayRecord, DomainShare, DomainTotal, aggregate};
use wt_db::Database;

/// Computed report data.
#[derive(Debug)]
pub struct ReportData {
    pub date: NaiveDate,
    pub record: DayRecord,
}

impl ReportData {
    pub fn load(db: &Database, date: NaiveDate) -> Result<Self> {
        Ok(Self {
            date,
            record: db.load_day(date)?,
        })
    }
}

// ========== Duration Formatting ==========

/// Formats milliseconds as a duration string.
/// Returns "Xh Ym" if >= 1 hour, "Xm" if >= 1 minute, "Xs" otherwise.
/// Negative durations are treated as 0s.
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    if total_seconds < 60 {
        return format!("{total_seconds}s");
    }
    let total_minutes = total_seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn block_count(record: &DayRecord, total: &DomainTotal) -> usize {
    record
        .timeline
        .iter()
        .filter(|b| b.domain == total.domain)
        .count()
}

/// Formats the human-readable report output.
pub fn format_report(data: &ReportData) -> String {
    let mut output = String::new();

    writeln!(output, "WEB TIME: {}", data.date.format("%A, %b %-d, %Y")).unwrap();

    let shares = data.record.percentages();
    if shares.is_empty() && data.record.timeline.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "Nothing tracked this day.").unwrap();
        return output;
    }

    writeln!(output).unwrap();
    writeln!(output, "BY DOMAIN").unwrap();
    writeln!(output, "─────────").unwrap();
    for share in &shares {
        writeln!(
            output,
            "{:<28}{:>9}  {:>5.1}%",
            share.domain.as_str(),
            format_duration(share.ms),
            share.percent
        )
        .unwrap();
    }

    let timeline = aggregate(&data.record.timeline);
    if !timeline.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "TIMELINE").unwrap();
        writeln!(output, "────────").unwrap();
        for total in &timeline {
            let blocks = block_count(&data.record, total);
            let noun = if blocks == 1 { "block" } else { "blocks" };
            writeln!(
                output,
                "{:<28}{:>9}  {blocks} {noun}",
                total.domain.as_str(),
                format_duration(total.ms)
            )
            .unwrap();
        }
    }

    writeln!(output).unwrap();
    writeln!(
        output,
        "Total tracked: {}",
        format_duration(data.record.total_ms())
    )
    .unwrap();

    output
}

// ========== JSON Output ==========

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub date: String,
    pub total_ms: i64,
    pub domains: Vec<DomainShare>,
    pub timeline_totals: Vec<DomainTotal>,
    pub blocks: Vec<JsonBlock>,
}

#[derive(Debug, Serialize)]
pub struct JsonBlock {
    pub domain: String,
    pub start: String,
    pub end: String,
    pub duration_ms: i64,
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData) -> Result<String> {
    let report = JsonReport {
        date: data.date.format("%Y-%m-%d").to_string(),
        total_ms: data.record.total_ms(),
        domains: data.record.percentages(),
        timeline_totals: aggregate(&data.record.timeline),
        blocks: data
            .record
            .sorted_timeline()
            .into_iter()
            .map(|block| JsonBlock {
                duration_ms: block.duration_ms(),
                domain: block.domain.to_string(),
                start: block.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end: block.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run<W: std::io::Write>(
    writer: &mut W,
    db: &Database,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let data = ReportData::load(db, date)?;
    let output = if json {
        format_report_json(&data)?
    } else {
        format_report(&data)
    };
    writer.write_all(output.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}
