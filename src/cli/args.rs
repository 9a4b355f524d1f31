//! CLI argument definitions using clap
//!
//! Commands:
//! - keystage enable --config <path> [--rollback]
//! - keystage status --config <path>
//! - keystage rdb-apply --config <path> --key <key> [--value <json>] [--abort]
//! - keystage recover --config <path> [--abort-all]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// keystage - staged keystore changes for a clustered key manager
#[derive(Parser, Debug)]
#[command(name = "keystage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enable the keystore on this node and sync it to the partner
    Enable {
        /// Path to configuration file
        #[arg(long, default_value = "./keystage.json")]
        config: PathBuf,

        /// Undo the change after it is applied instead of committing it
        #[arg(long)]
        rollback: bool,
    },

    /// Print this node's keystore record
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./keystage.json")]
        config: PathBuf,
    },

    /// Drive one replicated write through precommit and commit (or abort)
    RdbApply {
        /// Path to configuration file
        #[arg(long, default_value = "./keystage.json")]
        config: PathBuf,

        /// Key database key to write
        #[arg(long)]
        key: String,

        /// JSON value to write; omit to delete the key
        #[arg(long)]
        value: Option<String>,

        /// Abort after precommit instead of committing
        #[arg(long)]
        abort: bool,
    },

    /// Report transactions left prepared by a previous run
    Recover {
        /// Path to configuration file
        #[arg(long, default_value = "./keystage.json")]
        config: PathBuf,

        /// Abort every recovered transaction
        #[arg(long)]
        abort_all: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
