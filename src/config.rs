//! CLI-facing server settings, parsed with `clap` since the server's entry
//! point is a process rather than a library call site.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI for the `newsd` binary.
#[derive(Debug, Parser)]
#[command(name = "newsd", about = "NNTP server core")]
pub struct Cli {
    /// Path to the database (journal file; data segments live alongside it
    /// as `<db>.data.N`).
    #[arg(long, default_value = "newsd.db")]
    pub db: PathBuf,

    /// Plain-text listener address.
    #[arg(long, default_value = "0.0.0.0:119")]
    pub listen: String,

    /// Server name used in synthesized message-ids and rendered
    /// `Message-Id` headers.
    #[arg(long, default_value = "newsd")]
    pub server_name: String,

    /// TLS listener address. Certificate loading is out of scope; passing
    /// this flag without wiring a certificate elsewhere is accepted but
    /// inert.
    #[arg(long)]
    pub listen_tls: Option<String>,

    /// HTTP status-page listener address. The HTTP surface itself is out
    /// of scope; this flag is accepted for CLI compatibility only.
    #[arg(long)]
    pub listen_http: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Run an admin action that emits a journal record and exits instead of
    /// starting any listener.
    #[command(subcommand)]
    pub admin: Option<AdminCommand>,
}

/// Interactive admin modes: each emits the journal record described in §4.2
/// and exits without starting servers.
#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Add or update a newsgroup (`G` record).
    Group {
        name: String,
        #[arg(long, default_value = "")]
        desc: String,
        #[arg(long, value_enum, default_value = "permitted")]
        posting: PostingArg,
        #[arg(long, default_value_t = 0)]
        max_lives: usize,
        #[arg(long, default_value_t = 0)]
        max_post_size: u64,
    },
    /// Add or remove a moderator (`m` record, toggled by repetition).
    Mod { email: String, password: String },
    /// Add or remove a blacklist entry (`B` record; `0.0.0.0/32` removes).
    Blacklist { name: String, cidr: String },
    /// Replace the server-wide posting configuration (`C` record).
    Config {
        #[arg(long)]
        max_post_size: u64,
        #[arg(long)]
        throt_cmd_window_seconds: u64,
        #[arg(long)]
        throt_cmd_interval_millis: u64,
        #[arg(long)]
        post_interval_seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum PostingArg {
    Permitted,
    NotPermitted,
    Moderated,
}

impl From<PostingArg> for crate::model::PostingStatus {
    fn from(v: PostingArg) -> Self {
        match v {
            PostingArg::Permitted => crate::model::PostingStatus::Permitted,
            PostingArg::NotPermitted => crate::model::PostingStatus::NotPermitted,
            PostingArg::Moderated => crate::model::PostingStatus::Moderated,
        }
    }
}

/// Translate `-v` counts into a `tracing` filter directive for
/// `tracing-subscriber`.
pub fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates() {
        assert_eq!(verbosity_filter(0), "warn");
        assert_eq!(verbosity_filter(3), "trace");
    }
}
