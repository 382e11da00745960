//! Core types, errors and configuration for Jari
//!
//! This crate defines the foundational types shared by every other crate in
//! the workspace:
//! - `Todo`, `TodoId`, `Status`, `Priority`, `Version`, `FieldChange`: the
//!   data model
//! - `Conflict`, `PendingRead`, `AgentRecord`, `HistorySnapshot`: the
//!   concurrency engine's bookkeeping records
//! - `JariError` / `ErrorCategory`: the closed error sum
//! - `DbPaths`: `JARI_DB` resolution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{DbPaths, JARI_DB_ENV};
pub use error::{ErrorCategory, JariError, Result};
pub use types::{
    now, AgentName, AgentRecord, Conflict, FieldChange, HistorySnapshot, ParseTodoIdError,
    PendingRead, Priority, PriorityRangeError, ResolveStrategy, Status, Timestamp, Todo, TodoId,
    TreeDirection, TreeNode, Version,
};
