//! Todo service for Jari
//!
//! `Engine` is the single entry point for every mutating operation: each
//! method opens one `jari_storage::WriteTxn`, composes `jari_graph` (edge
//! validation and index maintenance) with `jari_concurrency` (field-level
//! diff, auto-merge, conflict materialization), and commits or aborts the
//! transaction as a unit. Read-only queries (ready/blocked queues, search,
//! history, agent status) live in `jari_query` and are not re-exported
//! here — they take their own `jari_storage::ReadTxn` and have no need for
//! this crate's write-path machinery.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeSet;
use std::path::Path;

use jari_core::{now, FieldChange, HistorySnapshot, JariError, Priority, ResolveStrategy, Result, Status, Todo, TodoId};
use jari_storage::{Store, WriteTxn};

/// The todo service: one `Store` plus the write-path orchestration over it.
pub struct Engine {
    store: Store,
}

impl Engine {
    /// Open (creating if absent) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Engine { store: Store::open(path)? })
    }

    /// Access to the underlying store, for read-only callers (`jari_query`)
    /// that need their own `ReadTxn`.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a new todo at version 1, status `Open`.
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
        if title.trim().is_empty() {
            return Err(JariError::InvalidInput {
                field: "title",
                reason: "must not be empty".to_string(),
            });
        }
        let txn = self.store.begin_write()?;
        let id = txn.next_todo_id()?;
        let todo = Todo::new(id, title, description, priority, kind, agent.to_string(), parent_id, niwa_ref);
        txn.touch_agent(agent)?;
        txn.put_todo(&todo)?;
        append_history(&txn, &todo, agent, "create")?;
        txn.commit()?;
        Ok(todo)
    }

    /// Fetch a todo and record that `agent` has observed it at its current
    /// version, establishing the base for that agent's next `update`.
    pub fn show(&self, agent: &str, id: TodoId) -> Result<Todo> {
        let txn = self.store.begin_write()?;
        let todo = jari_concurrency::record_read(&txn, agent, id)?;
        txn.commit()?;
        Ok(todo)
    }

    /// Propose a set of field changes, reconciled against the current
    /// record via field-level diff. Returns `Err(ConflictPending)` if any
    /// field conflicted; the non-conflicting fields are still auto-merged
    /// and committed.
    pub fn update(&self, agent: &str, id: TodoId, changes: Vec<FieldChange>) -> Result<Todo> {
        let txn = self.store.begin_write()?;
        let before = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;

        match jari_concurrency::update(&txn, agent, id, changes) {
            Ok(outcome) => {
                reconcile_blocked_by_edges(&txn, &before, &outcome.todo)?;
                txn.commit()?;
                Ok(outcome.todo)
            }
            Err(JariError::ConflictPending { fields }) => {
                let after = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
                reconcile_blocked_by_edges(&txn, &before, &after)?;
                txn.commit()?;
                Err(JariError::ConflictPending { fields })
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// Resolve every pending conflict on `id`.
    pub fn resolve(&self, agent: &str, id: TodoId, strategy: ResolveStrategy) -> Result<Todo> {
        let txn = self.store.begin_write()?;
        let before = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
        let resolved = jari_concurrency::resolve(&txn, agent, id, strategy)?;
        reconcile_blocked_by_edges(&txn, &before, &resolved)?;
        txn.commit()?;
        Ok(resolved)
    }

    /// Close a todo, recording `reason`.
    pub fn close(&self, agent: &str, id: TodoId, reason: Option<String>) -> Result<Todo> {
        let mut todo = self.update(
            agent,
            id,
            vec![FieldChange::Status(Status::Closed), FieldChange::Reason(reason)],
        )?;
        if todo.status == Status::Closed && todo.closed_at.is_none() {
            let txn = self.store.begin_write()?;
            todo.closed_at = Some(now());
            txn.put_todo(&todo)?;
            txn.commit()?;
        }
        Ok(todo)
    }

    /// Reopen a closed todo.
    pub fn reopen(&self, agent: &str, id: TodoId) -> Result<Todo> {
        let txn = self.store.begin_write()?;
        let current = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
        if current.status != Status::Closed {
            txn.abort()?;
            return Err(JariError::NotClosed(id));
        }
        txn.abort()?;

        let mut todo = self.update(agent, id, vec![FieldChange::Status(Status::Open), FieldChange::Reason(None)])?;
        if todo.closed_at.is_some() {
            let txn = self.store.begin_write()?;
            todo.closed_at = None;
            txn.put_todo(&todo)?;
            txn.commit()?;
        }
        Ok(todo)
    }

    /// Permanently remove a todo. Its history is append-only and is kept.
    pub fn delete(&self, id: TodoId) -> Result<()> {
        let txn = self.store.begin_write()?;
        if txn.get_todo(id)?.is_none() {
            txn.abort()?;
            return Err(JariError::NotFound(id));
        }
        txn.delete_todo(id)?;
        txn.commit()?;
        Ok(())
    }

    /// Atomically claim an unassigned, unblocked todo. First committer
    /// wins: `redb`'s single-writer transaction serialization is the whole
    /// mechanism, no extra compare-and-swap is needed.
    pub fn claim(&self, agent: &str, id: TodoId) -> Result<Todo> {
        let txn = self.store.begin_write()?;
        let mut todo = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;

        if !todo.assignee.is_empty() && todo.assignee != agent {
            txn.abort()?;
            return Err(JariError::AlreadyClaimed { id, by: todo.assignee });
        }
        if !todo.status.is_active() {
            txn.abort()?;
            return Err(JariError::NotClaimable {
                id,
                reason: format!("status is {}", todo.status),
            });
        }
        let active_blockers = jari_graph::active_blockers_of(&txn, id)?;
        if !active_blockers.is_empty() {
            txn.abort()?;
            return Err(JariError::NotClaimable {
                id,
                reason: format!("blocked by {} open dependencies", active_blockers.len()),
            });
        }

        todo.assignee = agent.to_string();
        todo.status = Status::InProgress;
        todo.version = todo.version.next();
        todo.updated_at = now();
        todo.updated_by = agent.to_string();
        txn.touch_agent(agent)?;
        txn.put_todo(&todo)?;
        append_history(&txn, &todo, agent, "claim")?;
        txn.commit()?;
        Ok(todo)
    }

    /// Add the dependency edge `child` depends on `parent`.
    pub fn dep_add(&self, agent: &str, child: TodoId, parent: TodoId) -> Result<Todo> {
        self.update(agent, child, vec![FieldChange::AddBlockedBy(parent)])
    }

    /// Remove the dependency edge `child` depends on `parent`.
    pub fn dep_remove(&self, agent: &str, child: TodoId, parent: TodoId) -> Result<Todo> {
        self.update(agent, child, vec![FieldChange::RemoveBlockedBy(parent)])
    }

    /// Add a label.
    pub fn label_add(&self, agent: &str, id: TodoId, label: String) -> Result<Todo> {
        self.update(agent, id, vec![FieldChange::AddLabel(label)])
    }

    /// Remove a label.
    pub fn label_remove(&self, agent: &str, id: TodoId, label: String) -> Result<Todo> {
        self.update(agent, id, vec![FieldChange::RemoveLabel(label)])
    }

    /// Link an external node reference.
    pub fn link(&self, agent: &str, id: TodoId, niwa_ref: String) -> Result<Todo> {
        self.update(agent, id, vec![FieldChange::AddNiwaRef(niwa_ref)])
    }

    /// Remove an external node reference.
    pub fn unlink(&self, agent: &str, id: TodoId, niwa_ref: String) -> Result<Todo> {
        self.update(agent, id, vec![FieldChange::RemoveNiwaRef(niwa_ref)])
    }
}

/// Validate and persist any `blocked_by` edges that changed between
/// `before` and `after`, aborting the whole update with `CycleDetected` if
/// a newly added edge would close a cycle. This is the one place
/// `jari_concurrency`'s field-level merge and `jari_graph`'s structural
/// invariant meet: the concurrency crate does not know about the
/// dependency graph, so the engine revalidates here before committing.
fn reconcile_blocked_by_edges(txn: &WriteTxn, before: &Todo, after: &Todo) -> Result<()> {
    let before_set: BTreeSet<TodoId> = before.blocked_by.clone();
    let after_set: BTreeSet<TodoId> = after.blocked_by.clone();

    for parent in after_set.difference(&before_set) {
        jari_graph::add_edge(txn, *parent, after.id)?;
    }
    for parent in before_set.difference(&after_set) {
        jari_graph::remove_edge(txn, *parent, after.id)?;
    }
    Ok(())
}

fn append_history(txn: &WriteTxn, todo: &Todo, agent: &str, operation: &str) -> Result<()> {
    txn.append_history(
        todo.id,
        todo.version.as_u64(),
        &HistorySnapshot {
            todo: todo.clone(),
            agent: agent.to_string(),
            timestamp: todo.updated_at,
            operation: operation.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use jari_core::ResolveStrategy;

    fn temp_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("jari.redb")).unwrap();
        (dir, engine)
    }

    #[test]
    fn create_then_show_round_trips() {
        let (_dir, engine) = temp_engine();
        let created = engine
            .create("agent-a", "write docs".into(), "".into(), Priority::default(), "task".into(), None, None)
            .unwrap();
        let shown = engine.show("agent-b", created.id).unwrap();
        assert_eq!(shown.title, "write docs");
    }

    #[test]
    fn claim_then_second_claim_fails() {
        let (_dir, engine) = temp_engine();
        let todo = engine.create("a", "t".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        let claimed = engine.claim("agent-a", todo.id).unwrap();
        assert_eq!(claimed.status, Status::InProgress);
        let err = engine.claim("agent-b", todo.id).unwrap_err();
        assert!(matches!(err, JariError::AlreadyClaimed { .. }));
    }

    #[test]
    fn claim_with_active_blocker_is_rejected() {
        let (_dir, engine) = temp_engine();
        let parent = engine.create("a", "parent".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        let child = engine.create("a", "child".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        engine.dep_add("a", child.id, parent.id).unwrap();

        let err = engine.claim("agent-a", child.id).unwrap_err();
        assert!(matches!(err, JariError::NotClaimable { .. }));

        engine.close("a", parent.id, Some("done".into())).unwrap();
        engine.claim("agent-a", child.id).unwrap();
    }

    #[test]
    fn dep_add_rejects_cycle() {
        let (_dir, engine) = temp_engine();
        let a = engine.create("a", "a".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        let b = engine.create("a", "b".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        engine.dep_add("a", b.id, a.id).unwrap();
        let err = engine.dep_add("a", a.id, b.id).unwrap_err();
        assert!(matches!(err, JariError::CycleDetected { .. }));
    }

    #[test]
    fn close_then_reopen_clears_closed_at() {
        let (_dir, engine) = temp_engine();
        let todo = engine.create("a", "t".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        let closed = engine.close("a", todo.id, Some("fixed".into())).unwrap();
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.reason.as_deref(), Some("fixed"));

        let reopened = engine.reopen("a", todo.id).unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert!(reopened.closed_at.is_none());
        assert!(reopened.reason.is_none());
    }

    #[test]
    fn reopen_non_closed_todo_errors() {
        let (_dir, engine) = temp_engine();
        let todo = engine.create("a", "t".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        let err = engine.reopen("a", todo.id).unwrap_err();
        assert!(matches!(err, JariError::NotClosed(_)));
    }

    #[test]
    fn conflicting_update_is_committed_with_conflict_recorded() {
        let (_dir, engine) = temp_engine();
        let todo = engine.create("a", "t".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        engine.show("agent-a", todo.id).unwrap();

        engine.update("agent-b", todo.id, vec![FieldChange::Title("theirs".into())]).unwrap();

        let err = engine
            .update("agent-a", todo.id, vec![FieldChange::Title("yours".into())])
            .unwrap_err();
        assert!(matches!(err, JariError::ConflictPending { .. }));

        let resolved = engine.resolve("agent-a", todo.id, ResolveStrategy::AcceptYours).unwrap();
        assert_eq!(resolved.title, "yours");
    }

    #[test]
    fn delete_keeps_history_but_removes_the_record() {
        let (_dir, engine) = temp_engine();
        let todo = engine.create("a", "t".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
        engine.delete(todo.id).unwrap();
        assert!(matches!(engine.show("a", todo.id).unwrap_err(), JariError::NotFound(_)));

        let txn = engine.store().begin_write().unwrap();
        assert!(!txn.history_for(todo.id).unwrap().is_empty());
    }
}
