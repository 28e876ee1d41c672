//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use wt_core::Domain;

/// Per-domain browser time tracker.
///
/// Follows which site has the user's attention and records how long it had
/// it, per local day.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Track browser activity from a stream of JSON events on stdin.
    ///
    /// Each line is one host event, e.g.
    /// `{"type":"tab_activated","tab_id":3,"window_id":1}`. The producer
    /// should report open windows and tabs first, then send `startup`.
    Run,

    /// Show the live session and today's totals.
    Status,

    /// Show time per domain for a day.
    Report {
        /// Day to report on (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output as JSON instead of human-readable format.
        #[arg(long)]
        json: bool,
    },

    /// Stop tracking a domain.
    Exclude {
        /// Domain to exclude, e.g. `reddit.com`.
        domain: Domain,
    },

    /// Resume tracking a previously excluded domain.
    Include {
        /// Domain to include again.
        domain: Domain,
    },

    /// Show or change tracking settings.
    Settings {
        /// Round persisted time down to multiples of this many milliseconds.
        #[arg(long)]
        granularity_ms: Option<i64>,

        /// Record time spent in private windows.
        #[arg(long)]
        retain_private: Option<bool>,
    },
}
