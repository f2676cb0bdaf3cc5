//! streakust - daily task tracker with a 30-day completion streak
//!
//! # Core Concepts
//!
//! - **Tasks**: dated, optionally timed items checked off per day
//! - **Routine**: templates applied to a day to spawn its tasks
//! - **Streak**: consecutive days on which every eligible task was done
//! - **Snapshot**: tasks, routine and streak, persisted and mirrored as a unit
//! - **Remote mirror**: optional shared document store merged per record
//!
//! # Module Organization
//!
//! - `app`: the tracker, single owner of the application state
//! - `commands`: CLI command handlers
//! - `config`: configuration loading from `config.toml`
//! - `error`: error types and result alias
//! - `merge`: local/remote reconciliation
//! - `models`: data model
//! - `remote`: remote mirror trait and implementations
//! - `storage`: local persistent store
//! - `streak`: streak engine
//! - `sync`: initial load, outbox writer and change consumer
//! - `tasks`: task and routine operations
//! - `transfer`: JSON export and import

pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod remote;
pub mod storage;
pub mod streak;
pub mod sync;
pub mod tasks;
pub mod transfer;

pub use error::{Error, Result};
