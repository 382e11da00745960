//! Orchestration of the read/update/resolve write path over a single
//! [`jari_storage::WriteTxn`].
//!
//! Each function here runs inside a transaction the caller already opened
//! and commits; none of them call `commit`/`abort` themselves, so the
//! engine layer can compose a `blocked_by` cycle check into the same
//! transaction before deciding whether to commit.

use jari_core::{now, FieldChange, HistorySnapshot, JariError, PendingRead, Result, ResolveStrategy, Todo, TodoId};
use jari_storage::WriteTxn;

use crate::diff::{self, reconcile};

/// Outcome of [`update`].
#[derive(Debug)]
pub struct UpdateOutcome {
    /// The record after auto-merge (equal to the pre-update record if
    /// nothing was merged because every field conflicted).
    pub todo: Todo,
    /// True if at least one field was auto-merged and the version bumped.
    pub merged: bool,
}

/// Record that `agent` has just observed `id` at its current committed
/// version, and return that record.
pub fn record_read(txn: &WriteTxn, agent: &str, id: TodoId) -> Result<Todo> {
    let todo = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
    txn.touch_agent(agent)?;
    txn.put_pending_read(agent, id, &PendingRead { version: todo.version })?;
    Ok(todo)
}

/// Reconcile `agent`'s proposed `changes` against the current record,
/// auto-merging disjoint fields and materializing a `Conflict` for every
/// field both sides touched to different values.
///
/// Returns `Err(ConflictPending { fields })` if any conflicts were created.
/// The pending read is cleared only when the call fully succeeds with no
/// new conflicts: an agent with unresolved conflicts on a todo cannot issue
/// another update until it resolves them.
pub fn update(txn: &WriteTxn, agent: &str, id: TodoId, changes: Vec<FieldChange>) -> Result<UpdateOutcome> {
    let existing_conflicts = txn.conflicts_for(id)?;
    if !existing_conflicts.is_empty() {
        return Err(JariError::ConflictPending {
            fields: existing_conflicts.into_iter().map(|c| c.field).collect(),
        });
    }

    let t = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
    let pending = txn.get_pending_read(agent, id)?;
    let base_version = pending.map(|p| p.version).unwrap_or(t.version);

    // Without a prior `record_read`, the agent's base view is taken to be
    // the current record itself (first write, nothing to diff against).
    let y = if pending.is_some() {
        find_version(txn, id, base_version)?.unwrap_or_else(|| t.clone())
    } else {
        t.clone()
    };

    let outcome = reconcile(&y, &changes, &t, base_version, agent)?;

    txn.touch_agent(agent)?;

    if !outcome.conflicts.is_empty() {
        let existing = txn.conflicts_for(id)?.len() as u64;
        for (i, mut conflict) in outcome.conflicts.into_iter().enumerate() {
            conflict.seq = existing + i as u64 + 1;
            txn.append_conflict(id, &conflict)?;
        }
        let fields: Vec<String> = txn.conflicts_for(id)?.into_iter().map(|c| c.field).collect();
        if outcome.any_merged {
            commit_merge(txn, agent, id, outcome.merged, "update")?;
        }
        return Err(JariError::ConflictPending { fields });
    }

    if outcome.any_merged {
        let merged = commit_merge(txn, agent, id, outcome.merged, "update")?;
        txn.clear_pending_read(agent, id)?;
        Ok(UpdateOutcome { todo: merged, merged: true })
    } else {
        txn.clear_pending_read(agent, id)?;
        Ok(UpdateOutcome { todo: t, merged: false })
    }
}

/// Resolve every pending conflict on `id` according to `strategy`.
pub fn resolve(txn: &WriteTxn, agent: &str, id: TodoId, strategy: ResolveStrategy) -> Result<Todo> {
    let conflicts = txn.conflicts_for(id)?;
    if conflicts.is_empty() {
        return Err(JariError::NoConflicts(id));
    }
    let mut t = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;

    match strategy {
        ResolveStrategy::AcceptYours => {
            for conflict in &conflicts {
                diff::apply_change(&mut t, &conflict.change)?;
            }
        }
        ResolveStrategy::AcceptTheirs => {
            // Current values are already in `t`; nothing to apply.
        }
        ResolveStrategy::ManualMerge(overrides) => {
            let conflicting_fields: std::collections::BTreeSet<&str> =
                conflicts.iter().map(|c| c.field.as_str()).collect();
            for change in &overrides {
                if !conflicting_fields.contains(change.field_name()) {
                    return Err(JariError::InvalidOverride {
                        field: change.field_name().to_string(),
                        reason: "field has no pending conflict".to_string(),
                    });
                }
                diff::apply_change(&mut t, change)?;
            }
        }
    }

    let resolved = commit_merge(txn, agent, id, t, "conflict resolved")?;
    txn.clear_conflicts(id)?;
    txn.clear_pending_read(agent, id)?;
    Ok(resolved)
}

fn find_version(txn: &WriteTxn, id: TodoId, version: jari_core::Version) -> Result<Option<Todo>> {
    Ok(txn
        .history_for(id)?
        .into_iter()
        .find(|snap| snap.todo.version == version)
        .map(|snap| snap.todo))
}

fn commit_merge(txn: &WriteTxn, agent: &str, id: TodoId, mut todo: Todo, operation: &str) -> Result<Todo> {
    todo.version = todo.version.next();
    todo.updated_at = now();
    todo.updated_by = agent.to_string();
    txn.put_todo(&todo)?;
    txn.append_history(
        id,
        todo.version.as_u64(),
        &HistorySnapshot {
            todo: todo.clone(),
            agent: agent.to_string(),
            timestamp: todo.updated_at,
            operation: operation.to_string(),
        },
    )?;
    Ok(todo)
}
