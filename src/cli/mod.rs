//! CLI module for keystage
//!
//! Provides command-line interface for:
//! - enable: Run a keystore enable through execute and commit (or rollback)
//! - status: Print the node's keystore record
//! - rdb-apply: Drive a replicated write through the RDB callback phases
//! - recover: Inspect or abort transactions left prepared by a crash

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{enable, enable_keystore, rdb_apply, recover, run, run_command, status};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{error_response, response, write_error, write_response};
