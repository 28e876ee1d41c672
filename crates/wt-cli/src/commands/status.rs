//! Status command: the live session and today's totals.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use wt_core::clock::elapsed_ms;
use wt_core::day_key;
use wt_db::Database;

use super::report::format_duration;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    database_path: &Path,
    now: DateTime<Utc>,
) -> Result<()> {
    writeln!(writer, "Web time tracker status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    match db.load_live()? {
        Some(live) => writeln!(
            writer,
            "Tracking: {} for {}",
            live.domain,
            format_duration(elapsed_ms(live.start, now))
        )?,
        None => writeln!(writer, "Not tracking.")?,
    }

    let today = db.load_day(day_key(now))?;
    let totals = today.ranked_totals();
    if totals.is_empty() {
        writeln!(writer, "Nothing tracked today.")?;
        return Ok(());
    }

    writeln!(writer, "Today: {}", format_duration(today.total_ms()))?;
    for total in totals {
        writeln!(
            writer,
            "  {:<26}{:>9}",
            total.domain.as_str(),
            format_duration(total.ms)
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use insta::assert_snapshot;
    use wt_core::{Domain, LiveSession, StoreOp};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 15, 30, 0).unwrap()
    }

    fn render(db: &Database, db_path: &Path) -> String {
        let mut output = Vec::new();
        run(&mut output, db, db_path, now()).unwrap();
        let output = String::from_utf8(output).unwrap();
        output.replace(&db_path.display().to_string(), "[TEMP]/wt.db")
    }

    #[test]
    fn status_command_shows_live_session_and_totals() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("wt.db");
        let db = Database::open(&db_path).unwrap();
        let github = Domain::new("github.com").unwrap();

        db.apply_batch(&[
            StoreOp::AddTotal {
                day: day_key(now()),
                domain: github.clone(),
                ms: 4_000_000,
            },
            StoreOp::AddTotal {
                day: day_key(now()),
                domain: Domain::new("news.ycombinator.com").unwrap(),
                ms: 45_000,
            },
            StoreOp::SetLive(Some(LiveSession {
                domain: github,
                start: now() - chrono::Duration::minutes(12),
            })),
        ])
        .unwrap();

        assert_snapshot!(render(&db, &db_path), @r"
        Web time tracker status
        Database: [TEMP]/wt.db
        Tracking: github.com for 12m
        Today: 1h 7m
          github.com                    1h 6m
          news.ycombinator.com            45s
        ");
    }

    #[test]
    fn status_command_on_empty_database() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("wt.db");
        let db = Database::open(&db_path).unwrap();

        assert_snapshot!(render(&db, &db_path), @r"
        Web time tracker status
        Database: [TEMP]/wt.db
        Not tracking.
        Nothing tracked today.
        ");
    }
}
