//! CLI subcommand implementations.

pub mod report;
pub mod run;
pub mod settings;
pub mod status;
