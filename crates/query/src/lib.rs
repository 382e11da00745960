//! Read-side queues, search, history and agent status views over Jari's
//! store.
//!
//! Every function here is a pure query: it never mutates the store and
//! never participates in the write path's conflict/version bookkeeping.
//! The "blocked" queue and "cascading unblock" are properties of these
//! queries rather than engine state: a todo moves from blocked to ready
//! the moment its last active blocker closes, with no separate recompute
//! step. Status is never computed or rewritten by the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

use jari_core::{AgentRecord, Conflict, HistorySnapshot, JariError, Result, Todo, TodoId};
use jari_storage::ReadTxn;

/// A todo in the ready queue, in display order.
pub fn ready_queue(txn: &ReadTxn) -> Result<Vec<Todo>> {
    let mut out = Vec::new();
    for todo in txn.list_todos()? {
        if todo.status.is_active() && active_blockers(txn, &todo)?.is_empty() {
            out.push(todo);
        }
    }
    sort_ready(&mut out);
    Ok(out)
}

/// A todo in the blocked queue, paired with its still-active blockers, in
/// display order.
pub fn blocked_queue(txn: &ReadTxn) -> Result<Vec<(Todo, Vec<TodoId>)>> {
    let mut out = Vec::new();
    for todo in txn.list_todos()? {
        if !todo.status.is_active() {
            continue;
        }
        let blockers = active_blockers(txn, &todo)?;
        if !blockers.is_empty() {
            out.push((todo, blockers));
        }
    }
    out.sort_by(|a, b| a.0.priority.cmp(&b.0.priority).then(a.0.created_at.cmp(&b.0.created_at)).then(a.0.id.cmp(&b.0.id)));
    Ok(out)
}

fn active_blockers(txn: &ReadTxn, todo: &Todo) -> Result<Vec<TodoId>> {
    let mut active = Vec::new();
    for blocker_id in &todo.blocked_by {
        if let Some(blocker) = txn.get_todo(*blocker_id)? {
            if !matches!(blocker.status, jari_core::Status::Closed | jari_core::Status::Deferred) {
                active.push(*blocker_id);
            }
        }
    }
    Ok(active)
}

fn sort_ready(todos: &mut [Todo]) {
    todos.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)).then(a.id.cmp(&b.id)));
}

/// Case-insensitive substring search over title, description and labels.
pub fn search(txn: &ReadTxn, query: &str) -> Result<Vec<Todo>> {
    let needle = query.to_lowercase();
    let mut out: Vec<Todo> = txn
        .list_todos()?
        .into_iter()
        .filter(|t| {
            t.title.to_lowercase().contains(&needle)
                || t.description.to_lowercase().contains(&needle)
                || t.labels.iter().any(|l| l.to_lowercase().contains(&needle))
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(out)
}

/// Every todo in the store, ascending by id. Backs line-oriented export
/// formats, which are an external interface and not this crate's concern.
pub fn export(txn: &ReadTxn) -> Result<impl Iterator<Item = Todo>> {
    let mut todos = txn.list_todos()?;
    todos.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(todos.into_iter())
}

/// Every committed version of `id`, oldest first.
pub fn history(txn: &ReadTxn, id: TodoId) -> Result<Vec<HistorySnapshot>> {
    let snapshots = txn.history_for(id)?;
    if snapshots.is_empty() && txn.get_todo(id)?.is_none() {
        return Err(JariError::NotFound(id));
    }
    Ok(snapshots)
}

/// A summary of one agent's current state: what it holds, what it's
/// waiting on, and what it most recently did.
pub struct AgentStatus {
    /// The agent's registry record.
    pub record: AgentRecord,
    /// Todos currently assigned to this agent.
    pub assigned: Vec<TodoId>,
    /// Conflicts materialized against this agent's writes, awaiting `resolve`.
    pub pending_conflicts: Vec<Conflict>,
    /// This agent's most recent history contributions, newest first.
    pub recent_history: Vec<HistorySnapshot>,
}

/// Build the status summary for `agent`. The recency window is capped at
/// `recent_limit` entries so a long-lived agent's status stays bounded.
pub fn agent_status(txn: &ReadTxn, agent: &str, recent_limit: usize) -> Result<AgentStatus> {
    let record = txn
        .list_agents()?
        .into_iter()
        .find(|a| a.name == agent)
        .ok_or_else(|| JariError::InvalidInput {
            field: "agent",
            reason: format!("unknown agent `{agent}`"),
        })?;

    let todos = txn.list_todos()?;
    let assigned = todos.iter().filter(|t| t.assignee == agent).map(|t| t.id).collect();

    let mut pending_conflicts = Vec::new();
    let mut recent_history = Vec::new();
    for todo in &todos {
        pending_conflicts.extend(txn.conflicts_for(todo.id)?.into_iter().filter(|c| c.agent == agent));
        recent_history.extend(txn.history_for(todo.id)?.into_iter().filter(|h| h.agent == agent));
    }
    recent_history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent_history.truncate(recent_limit);

    Ok(AgentStatus {
        record,
        assigned,
        pending_conflicts,
        recent_history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jari_core::{FieldChange, Priority, Status};
    use jari_storage::Store;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("jari.redb")).unwrap();
        (dir, store)
    }

    fn make_todo(store: &Store, title: &str, priority: u8) -> TodoId {
        let txn = store.begin_write().unwrap();
        let id = txn.next_todo_id().unwrap();
        let todo = Todo::new(
            id,
            title.into(),
            "".into(),
            Priority::new(priority).unwrap(),
            "task".into(),
            "a".into(),
            None,
            None,
        );
        txn.put_todo(&todo).unwrap();
        txn.commit().unwrap();
        id
    }

    #[test]
    fn ready_queue_sorts_by_priority_then_created_then_id() {
        let (_dir, store) = temp_store();
        let low = make_todo(&store, "low", 4);
        let high = make_todo(&store, "high", 0);
        let mid = make_todo(&store, "mid", 2);

        let read = store.begin_read().unwrap();
        let ready: Vec<TodoId> = ready_queue(&read).unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![high, mid, low]);
    }

    #[test]
    fn closing_last_blocker_moves_todo_from_blocked_to_ready() {
        let (_dir, store) = temp_store();
        let parent = make_todo(&store, "parent", 2);
        let child = make_todo(&store, "child", 2);

        {
            let txn = store.begin_write().unwrap();
            jari_graph::add_edge(&txn, parent, child).unwrap();
            let mut t = txn.get_todo(child).unwrap().unwrap();
            jari_concurrency::apply_change(&mut t, &FieldChange::AddBlockedBy(parent)).unwrap();
            txn.put_todo(&t).unwrap();
            txn.commit().unwrap();
        }

        let read = store.begin_read().unwrap();
        assert!(ready_queue(&read).unwrap().iter().all(|t| t.id != child));
        assert_eq!(blocked_queue(&read).unwrap().len(), 1);
        drop(read);

        {
            let txn = store.begin_write().unwrap();
            let mut p = txn.get_todo(parent).unwrap().unwrap();
            p.status = Status::Closed;
            txn.put_todo(&p).unwrap();
            txn.commit().unwrap();
        }

        let read = store.begin_read().unwrap();
        let ready: Vec<TodoId> = ready_queue(&read).unwrap().into_iter().map(|t| t.id).collect();
        assert!(ready.contains(&child));
        assert!(blocked_queue(&read).unwrap().is_empty());
    }

    #[test]
    fn search_matches_title_description_and_labels_case_insensitively() {
        let (_dir, store) = temp_store();
        let id = make_todo(&store, "Fix Flaky Test", 2);
        {
            let txn = store.begin_write().unwrap();
            let mut t = txn.get_todo(id).unwrap().unwrap();
            t.labels.insert("CI".into());
            txn.put_todo(&t).unwrap();
            txn.commit().unwrap();
        }

        let read = store.begin_read().unwrap();
        assert_eq!(search(&read, "flaky").unwrap().len(), 1);
        assert_eq!(search(&read, "ci").unwrap().len(), 1);
        assert_eq!(search(&read, "nonexistent").unwrap().len(), 0);
    }

    #[test]
    fn history_round_trips_every_committed_version() {
        let (_dir, store) = temp_store();
        let id = make_todo(&store, "t", 2);
        let read = store.begin_read().unwrap();
        assert!(history(&read, id).unwrap().is_empty());
        assert!(matches!(history(&read, TodoId::new(999)).unwrap_err(), JariError::NotFound(_)));
    }

    #[test]
    fn export_is_ordered_ascending_by_id() {
        let (_dir, store) = temp_store();
        let c = make_todo(&store, "c", 2);
        let a = make_todo(&store, "a", 2);
        let b = make_todo(&store, "b", 2);

        let read = store.begin_read().unwrap();
        let ids: Vec<TodoId> = export(&read).unwrap().map(|t| t.id).collect();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
