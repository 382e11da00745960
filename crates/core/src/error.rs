//! Error types for Jari
//!
//! `JariError` is the unified error type returned by every public operation
//! in the workspace. Fatal storage errors (`StorageFull`, `StorageCorrupt`)
//! are never caught and retried inside the core; they propagate out of the
//! enclosing transaction untouched. Every other variant is a recoverable
//! domain error, returned to the caller with enough context to render a
//! one-line message.
//!
//! ## Usage
//!
//! ```ignore
//! match result {
//!     Err(JariError::ConflictPending { fields }) => {
//!         println!("conflict on: {:?}", fields);
//!     }
//!     Err(e) => println!("{}", e.category()),
//!     Ok(todo) => { /* success */ }
//! }
//! ```

use crate::types::{AgentName, TodoId};
use thiserror::Error;

/// Result type alias for Jari operations.
pub type Result<T> = std::result::Result<T, JariError>;

/// Coarse classification of a `JariError`, used by the (out-of-scope) CLI
/// adapter to pick an exit code without needing to match on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Not found, invalid input, not claimable: caller made a mistake.
    UserError,
    /// A conflict was materialized and is awaiting resolution; non-fatal.
    ConflictPending,
    /// A dependency edge would have created a cycle.
    CycleDetected,
    /// The storage engine failed in a way the core cannot recover from.
    StorageError,
}

/// Unified error type for Jari's core API.
#[derive(Debug, Error)]
pub enum JariError {
    /// The referenced todo does not exist.
    #[error("todo not found: {0}")]
    NotFound(TodoId),

    /// Bad input: an empty title, an out-of-range priority, an unknown
    /// resolution strategy, and so on.
    #[error("invalid input for `{field}`: {reason}")]
    InvalidInput {
        /// The field or argument that failed validation.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// Adding the edge `child -> parent` would create a cycle in the
    /// dependency graph. `path` is the cycle, parent-to-child.
    #[error("adding dependency would create a cycle: {}", format_cycle(.path))]
    CycleDetected {
        /// The cyclic path, from the proposed parent back to the proposed child.
        path: Vec<TodoId>,
    },

    /// `dep add` was given identical child and parent ids.
    #[error("a todo cannot depend on itself: {0}")]
    SelfEdge(TodoId),

    /// `update` materialized one or more field-level conflicts; the caller
    /// must `resolve` them before issuing another mutating update on the
    /// same todo.
    #[error("update conflicts on fields: {}", .fields.join(", "))]
    ConflictPending {
        /// The logical field names that conflicted.
        fields: Vec<String>,
    },

    /// `claim` lost the race: `by` is the agent that got there first.
    #[error("todo {id} already claimed by {by}")]
    AlreadyClaimed {
        /// The todo that was claimed out from under the caller.
        id: TodoId,
        /// The agent holding the claim.
        by: AgentName,
    },

    /// `claim` was attempted on a todo that isn't claimable right now.
    #[error("todo {id} is not claimable: {reason}")]
    NotClaimable {
        /// The todo that cannot be claimed.
        id: TodoId,
        /// Why: active blockers, wrong status, etc.
        reason: String,
    },

    /// `reopen` was attempted on a todo that isn't closed.
    #[error("todo {0} is not closed")]
    NotClosed(TodoId),

    /// `resolve` was invoked with nothing pending for that todo/agent pair.
    #[error("no pending conflicts on {0}")]
    NoConflicts(TodoId),

    /// A `MANUAL_MERGE` override did not match the conflicting field's
    /// domain (wrong type, out-of-range value, targets a non-conflicting
    /// field).
    #[error("invalid override for `{field}`: {reason}")]
    InvalidOverride {
        /// The field the override targeted.
        field: String,
        /// Why the override was rejected.
        reason: String,
    },

    /// The underlying `redb` database is full.
    #[error("storage full")]
    StorageFull,

    /// The underlying `redb` database failed a consistency check.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),
}

fn format_cycle(path: &[TodoId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl JariError {
    /// Coarse classification for exit-code mapping by an external adapter.
    pub fn category(&self) -> ErrorCategory {
        match self {
            JariError::NotFound(_)
            | JariError::InvalidInput { .. }
            | JariError::SelfEdge(_)
            | JariError::AlreadyClaimed { .. }
            | JariError::NotClaimable { .. }
            | JariError::NotClosed(_)
            | JariError::NoConflicts(_)
            | JariError::InvalidOverride { .. } => ErrorCategory::UserError,
            JariError::ConflictPending { .. } => ErrorCategory::ConflictPending,
            JariError::CycleDetected { .. } => ErrorCategory::CycleDetected,
            JariError::StorageFull | JariError::StorageCorrupt(_) => ErrorCategory::StorageError,
        }
    }

    /// True for errors where retrying the exact same write might succeed
    /// without caller intervention (currently: none — every Jari error
    /// either needs caller action or is fatal). Kept as a seam so the
    /// concurrency engine's callers don't have to special-case on variant
    /// names if that ever changes.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
