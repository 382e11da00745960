//! # Jari
//!
//! An embedded task/issue tracker for concurrent autonomous agents.
//!
//! Jari stores todos in a single memory-mapped `redb` file and reconciles
//! concurrent writes at the field level instead of rejecting them outright:
//! two agents updating different fields of the same todo both succeed;
//! two agents updating the *same* field to different values get a
//! [`Conflict`] to resolve, not a lost update.
//!
//! # Quick Start
//!
//! ```no_run
//! use jari::{Jari, FieldChange, Priority};
//!
//! fn main() -> jari::Result<()> {
//!     let db = Jari::open("./jari.redb")?;
//!
//!     let todo = db.create("agent-a", "fix flaky test".into(), "".into(), Priority::default(), "bug".into(), None, None)?;
//!     db.claim("agent-a", todo.id)?;
//!     db.update("agent-a", todo.id, vec![FieldChange::AddLabel("ci".into())])?;
//!     db.close("agent-a", todo.id, Some("fixed in #42".into()))?;
//!
//!     for ready in db.ready()? {
//!         println!("{}: {}", ready.id, ready.title);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! [`Jari`] is the facade over six internal crates: `jari-core` (data
//! model and errors), `jari-storage` (the `redb`-backed store), `jari-graph`
//! (dependency edges and cycle detection), `jari-concurrency` (field-level
//! diff and conflict resolution), `jari-engine` (the todo service — one
//! transaction per mutating operation), and `jari-query` (read-only queues,
//! search and history). Only this crate's surface is meant to be stable.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::Path;

pub use jari_core::{
    now, AgentName, AgentRecord, Conflict, DbPaths, ErrorCategory, FieldChange, HistorySnapshot, JariError,
    ParseTodoIdError, PendingRead, Priority, PriorityRangeError, ResolveStrategy, Result, Status, Timestamp, Todo,
    TodoId, TreeDirection, TreeNode, Version, JARI_DB_ENV,
};
pub use jari_query::AgentStatus;

use jari_engine::Engine;

/// The embedded task tracker. Every mutating method opens and commits one
/// transaction; every read method opens one consistent-snapshot read
/// transaction.
pub struct Jari {
    engine: Engine,
}

impl Jari {
    /// Open (creating if absent) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Jari { engine: Engine::open(path)? })
    }

    /// Open the database at the location resolved from `JARI_DB`, or the
    /// per-user default if unset.
    pub fn open_default() -> Result<Self> {
        let paths = DbPaths::resolve();
        paths.ensure_parent_dir().map_err(|e| JariError::StorageCorrupt(e.to_string()))?;
        Self::open(paths.file())
    }

    /// Create a new todo.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        agent: &str,
        title: String,
        description: String,
        priority: Priority,
        kind: String,
        parent_id: Option<TodoId>,
        niwa_ref: Option<String>,
    ) -> Result<Todo> {
        self.engine.create(agent, title, description, priority, kind, parent_id, niwa_ref)
    }

    /// Fetch a todo and record `agent`'s observed version as the base for
    /// its next `update`.
    pub fn show(&self, agent: &str, id: TodoId) -> Result<Todo> {
        self.engine.show(agent, id)
    }

    /// Propose field changes, reconciled against the current record.
    pub fn update(&self, agent: &str, id: TodoId, changes: Vec<FieldChange>) -> Result<Todo> {
        self.engine.update(agent, id, changes)
    }

    /// Resolve every pending conflict on a todo.
    pub fn resolve(&self, agent: &str, id: TodoId, strategy: ResolveStrategy) -> Result<Todo> {
        self.engine.resolve(agent, id, strategy)
    }

    /// Close a todo with an optional reason.
    pub fn close(&self, agent: &str, id: TodoId, reason: Option<String>) -> Result<Todo> {
        self.engine.close(agent, id, reason)
    }

    /// Reopen a closed todo.
    pub fn reopen(&self, agent: &str, id: TodoId) -> Result<Todo> {
        self.engine.reopen(agent, id)
    }

    /// Permanently remove a todo, keeping its history.
    pub fn delete(&self, id: TodoId) -> Result<()> {
        self.engine.delete(id)
    }

    /// Atomically claim an unassigned, unblocked todo.
    pub fn claim(&self, agent: &str, id: TodoId) -> Result<Todo> {
        self.engine.claim(agent, id)
    }

    /// Add the dependency edge `child` depends on `parent`.
    pub fn dep_add(&self, agent: &str, child: TodoId, parent: TodoId) -> Result<Todo> {
        self.engine.dep_add(agent, child, parent)
    }

    /// Remove the dependency edge `child` depends on `parent`.
    pub fn dep_remove(&self, agent: &str, child: TodoId, parent: TodoId) -> Result<Todo> {
        self.engine.dep_remove(agent, child, parent)
    }

    /// Add a label.
    pub fn label_add(&self, agent: &str, id: TodoId, label: String) -> Result<Todo> {
        self.engine.label_add(agent, id, label)
    }

    /// Remove a label.
    pub fn label_remove(&self, agent: &str, id: TodoId, label: String) -> Result<Todo> {
        self.engine.label_remove(agent, id, label)
    }

    /// Link an external node reference.
    pub fn link(&self, agent: &str, id: TodoId, niwa_ref: String) -> Result<Todo> {
        self.engine.link(agent, id, niwa_ref)
    }

    /// Remove an external node reference.
    pub fn unlink(&self, agent: &str, id: TodoId, niwa_ref: String) -> Result<Todo> {
        self.engine.unlink(agent, id, niwa_ref)
    }

    /// Todos that are active and have no active blockers, in
    /// `(priority, created_at, id)` order.
    pub fn ready(&self) -> Result<Vec<Todo>> {
        let txn = self.engine.store().begin_read()?;
        jari_query::ready_queue(&txn)
    }

    /// Active todos that still have at least one active blocker, paired
    /// with those blockers.
    pub fn blocked(&self) -> Result<Vec<(Todo, Vec<TodoId>)>> {
        let txn = self.engine.store().begin_read()?;
        jari_query::blocked_queue(&txn)
    }

    /// Case-insensitive substring search over title, description and labels.
    pub fn search(&self, query: &str) -> Result<Vec<Todo>> {
        let txn = self.engine.store().begin_read()?;
        jari_query::search(&txn, query)
    }

    /// Every committed version of a todo, oldest first.
    pub fn history(&self, id: TodoId) -> Result<Vec<HistorySnapshot>> {
        let txn = self.engine.store().begin_read()?;
        jari_query::history(&txn, id)
    }

    /// Status summary for one agent, capped to `recent_limit` history entries.
    pub fn agent_status(&self, agent: &str, recent_limit: usize) -> Result<jari_query::AgentStatus> {
        let txn = self.engine.store().begin_read()?;
        jari_query::agent_status(&txn, agent, recent_limit)
    }

    /// The transitive blocker/blocks tree rooted at `id`.
    pub fn tree(&self, id: TodoId, direction: TreeDirection) -> Result<TreeNode> {
        let txn = self.engine.store().begin_read()?;
        jari_graph::tree(&txn, id, direction)
    }

    /// Every todo in the store, unordered.
    pub fn list(&self) -> Result<Vec<Todo>> {
        let txn = self.engine.store().begin_read()?;
        txn.list_todos()
    }

    /// Every agent that has ever been observed.
    pub fn agents(&self) -> Result<Vec<AgentRecord>> {
        let txn = self.engine.store().begin_read()?;
        txn.list_agents()
    }

    /// Every todo, ascending by id, for line-oriented export formats.
    pub fn export(&self) -> Result<Vec<Todo>> {
        let txn = self.engine.store().begin_read()?;
        Ok(jari_query::export(&txn)?.collect())
    }
}
