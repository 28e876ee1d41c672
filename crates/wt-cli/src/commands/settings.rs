//! Exclusion list and tracking settings.
//!
//! Settings live in the database, so a running `wt run` picks up changes on
//! its next flush without a restart.

use std::io::Write;

use anyhow::{Context, Result};

use wt_core::{Domain, Settings};
use wt_db::Database;

/// Adds `domain` to the exclusion list.
pub fn exclude<W: Write>(writer: &mut W, db: &Database, domain: &Domain) -> Result<()> {
    let mut settings = db.load_settings().context("failed to read settings")?;
    if settings.excluded.insert(domain.clone()) {
        db.save_settings(&settings)
            .context("failed to save settings")?;
        tracing::info!(%domain, "domain excluded");
        writeln!(writer, "Excluded {domain}.")?;
    } else {
        writeln!(writer, "{domain} is already excluded.")?;
    }
    Ok(())
}

/// Removes `domain` from the exclusion list.
pub fn include<W: Write>(writer: &mut W, db: &Database, domain: &Domain) -> Result<()> {
    let mut settings = db.load_settings().context("failed to read settings")?;
    if settings.excluded.remove(domain) {
        db.save_settings(&settings)
            .context("failed to save settings")?;
        tracing::info!(%domain, "domain included");
        writeln!(writer, "Tracking {domain} again.")?;
    } else {
        writeln!(writer, "{domain} was not excluded.")?;
    }
    Ok(())
}

/// Applies any given changes, then prints the settings.
pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    granularity_ms: Option<i64>,
    retain_private: Option<bool>,
) -> Result<()> {
    let mut settings = db.load_settings().context("failed to read settings")?;

    if granularity_ms.is_some() || retain_private.is_some() {
        if let Some(ms) = granularity_ms {
            if ms < 0 {
                anyhow::bail!("granularity must be zero or more milliseconds, got {ms}");
            }
            settings.granularity_ms = ms;
        }
        if let Some(retain) = retain_private {
            settings.retain_private = retain;
        }
        db.save_settings(&settings)
            .context("failed to save settings")?;
        tracing::info!(?settings, "settings updated");
    }

    write_settings(writer, &settings)
}

fn write_settings<W: Write>(writer: &mut W, settings: &Settings) -> Result<()> {
    writeln!(writer, "granularity_ms: {}", settings.granularity_ms)?;
    writeln!(writer, "retain_private: {}", settings.retain_private)?;
    if settings.excluded.is_empty() {
        writeln!(writer, "excluded: (none)")?;
    } else {
        writeln!(writer, "excluded:")?;
        for domain in &settings.excluded {
            writeln!(writer, "  - {domain}")?;
        }
    }
    Ok(())
}
