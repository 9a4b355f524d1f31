//! CLI command implementations
//!
//! Each command loads the configuration, opens the node's key database and
//! prints one JSON response. The `*_keystore` / `*_prepared` / `apply_*`
//! helpers take an already-loaded config and an observer so tests can drive
//! them without touching stdout.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::StagingConfig;
use crate::observability::{LogObserver, Logger, Observer, ObserverSet, StagingMetrics};
use crate::peer::{PeerSynchronizer, StorePeer, SyncOutcome};
use crate::rdb::{
    KeyDbCallbackHandler, RdbCallback, RdbDispatcher, RdbTransaction, TransactionId,
};
use crate::staging::{KeystoreEnable, KeystoreRecord, RollbackOutcome, StagedOperation};
use crate::storage::{FileStore, LocalStore};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        // Best effort: the error is also returned to main for stderr.
        let _ = write_error(e.code_str(), e.message());
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Enable { config, rollback } => enable(&config, rollback),
        Command::Status { config } => status(&config),
        Command::RdbApply {
            config,
            key,
            value,
            abort,
        } => rdb_apply(&config, key, value, abort),
        Command::Recover { config, abort_all } => recover(&config, abort_all),
    }
}

/// Enable the keystore on the configured node.
pub fn enable(config_path: &Path, rollback: bool) -> CliResult<()> {
    let config = StagingConfig::load(config_path)?;
    let data = enable_keystore(&config, rollback, Arc::new(LogObserver::default()))?;
    write_response(data)
}

/// Print the configured node's keystore record.
pub fn status(config_path: &Path) -> CliResult<()> {
    let config = StagingConfig::load(config_path)?;
    write_response(keystore_status(&config)?)
}

/// Drive one replicated write through the RDB phases.
pub fn rdb_apply(
    config_path: &Path,
    key: String,
    value: Option<String>,
    abort: bool,
) -> CliResult<()> {
    let config = StagingConfig::load(config_path)?;
    let value = parse_value(value)?;

    let txn = RdbTransaction {
        id: TransactionId::new(),
        key,
        value,
    };
    let data = apply_rdb_transaction(&config, &txn, abort, Arc::new(LogObserver::default()))?;
    write_response(data)
}

/// Report, and optionally abort, transactions left prepared.
pub fn recover(config_path: &Path, abort_all: bool) -> CliResult<()> {
    let config = StagingConfig::load(config_path)?;
    let data = recover_prepared(&config, abort_all, Arc::new(LogObserver::default()))?;
    write_response(data)
}

/// Parse the raw `--value` argument as JSON. No value means a delete.
pub fn parse_value(raw: Option<String>) -> CliResult<Option<Value>> {
    raw.map(|raw| {
        serde_json::from_str::<Value>(&raw)
            .map_err(|e| CliError::invalid_argument(format!("Invalid --value JSON: {}", e)))
    })
    .transpose()
}

/// Run a `KeystoreEnable` through execute and then commit or rollback.
///
/// Fails only if the local change fails; a peer that cannot be reached is
/// reported in the response, not as an error.
pub fn enable_keystore(
    config: &StagingConfig,
    rollback: bool,
    observer: Arc<dyn Observer>,
) -> CliResult<Value> {
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let metrics = Arc::new(StagingMetrics::new());
    let observers = ObserverSet::new().with(observer).with(metrics.clone());

    let change = KeystoreEnable::new(store, config.key_manager.clone());
    let mut op = StagedOperation::new(config.node_name.clone(), change, Arc::new(observers));
    if let Some(peer) = open_peer(config) {
        op = op.with_peer(peer);
    }

    let sync = op.execute()?;

    let rollback_outcome = if rollback {
        let outcome = op.rollback();
        if let RollbackOutcome::UndoFailed { reason } = &outcome {
            return Err(CliError::operation_failed(format!(
                "rollback failed, operation halted: {}",
                reason
            )));
        }
        Some(rollback_label(&outcome))
    } else {
        op.commit()?;
        None
    };

    Ok(json!({
        "operation_id": op.operation_id().to_string(),
        "node": op.target_node(),
        "state": op.state().state_name(),
        "peer_sync": sync_label(&sync),
        "rollback": rollback_outcome,
        "metrics": metrics.snapshot(),
    }))
}

/// Keystore record of the configured node, or `null`.
pub fn keystore_status(config: &StagingConfig) -> CliResult<Value> {
    let store = FileStore::open(&config.data_dir)?;
    let record = KeystoreRecord::load(&store, &config.node_name)?;
    Ok(json!({
        "node": config.node_name,
        "keystore": record,
    }))
}

/// Precommit `txn` through a dispatcher over the local key database, then
/// commit it (or abort it when `abort` is set).
///
/// The command is the coordinator for this transaction, so once the
/// decision is delivered it closes the transaction and the handlers drop
/// their bookkeeping for it.
pub fn apply_rdb_transaction(
    config: &StagingConfig,
    txn: &RdbTransaction,
    abort: bool,
    observer: Arc<dyn Observer>,
) -> CliResult<Value> {
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let keydb = Arc::new(KeyDbCallbackHandler::new(store, observer.clone()));
    let dispatcher = RdbDispatcher::new(observer).register("keydb", keydb);

    dispatcher.on_precommit(txn)?;
    let decision = if abort {
        dispatcher.on_abort(txn.id)?;
        "aborted"
    } else {
        dispatcher.on_commit(txn.id)?;
        "committed"
    };
    dispatcher.forget(txn.id)?;

    Ok(json!({
        "txn_id": txn.id.to_string(),
        "key": txn.key,
        "decision": decision,
    }))
}

/// Reload pending markers from the key database and optionally abort them.
pub fn recover_prepared(
    config: &StagingConfig,
    abort_all: bool,
    observer: Arc<dyn Observer>,
) -> CliResult<Value> {
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let keydb = KeyDbCallbackHandler::new(store, observer);

    let recovered = keydb.recover_prepared()?;
    let prepared = keydb.prepared_ids();
    if abort_all {
        for txn_id in &prepared {
            keydb.on_abort(*txn_id)?;
        }
    }

    Ok(json!({
        "recovered": recovered,
        "prepared": prepared.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "aborted": abort_all,
    }))
}

/// Peer synchronizer for the configured partner, if any.
///
/// A partner directory that cannot be opened means the peer is unreachable,
/// which never blocks the local change.
fn open_peer(config: &StagingConfig) -> Option<PeerSynchronizer> {
    let dir = config.partner_data_dir.as_ref()?;
    match FileStore::open(dir) {
        Ok(store) => {
            let peer = StorePeer::new(config.partner_name.clone(), Arc::new(store));
            Some(PeerSynchronizer::new(Arc::new(peer), config.peer_sync.clone()))
        }
        Err(e) => {
            Logger::warn(
                "cli.peer.unavailable",
                &[
                    ("peer", config.partner_name.as_str()),
                    ("error", e.to_string().as_str()),
                ],
            );
            None
        }
    }
}

fn sync_label(outcome: &SyncOutcome) -> Value {
    match outcome {
        SyncOutcome::Synchronized { peer, attempts } => json!({
            "result": "synchronized",
            "peer": peer,
            "attempts": attempts,
        }),
        SyncOutcome::Failed {
            peer,
            attempts,
            error,
        } => json!({
            "result": "failed",
            "peer": peer,
            "attempts": attempts,
            "error": error.to_string(),
        }),
        SyncOutcome::Skipped => json!({ "result": "skipped" }),
    }
}

fn rollback_label(outcome: &RollbackOutcome) -> &'static str {
    match outcome {
        RollbackOutcome::RolledBack => "rolled_back",
        RollbackOutcome::NothingToUndo => "nothing_to_undo",
        RollbackOutcome::AlreadyCommitted => "already_committed",
        RollbackOutcome::AlreadyRolledBack => "already_rolled_back",
        RollbackOutcome::Halted { .. } => "halted",
        RollbackOutcome::UndoFailed { .. } => "undo_failed",
    }
}
