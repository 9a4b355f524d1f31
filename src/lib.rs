//! keystage - staged administrative changes for a clustered key manager
//!
//! A node-local change (e.g. enabling the keystore on one node) runs
//! validate → apply → commit/rollback and is propagated to the paired peer
//! node on a best-effort basis. Replicated key-database writes follow the
//! precommit / commit / abort protocol of an external RDB coordinator.

pub mod cli;
pub mod config;
pub mod observability;
pub mod peer;
pub mod rdb;
pub mod staging;
pub mod storage;
