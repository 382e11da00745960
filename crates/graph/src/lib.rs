//! Dependency graph queries and cycle detection for Jari
//!
//! Edges point from a child to the parent it depends on (`Todo::blocked_by`)
//! and are mirrored into `jari_storage`'s `BLOCKS_INDEX` reverse index so
//! both directions can be range-scanned without loading every todo. This
//! crate only reasons about edges and ids; it knows nothing about
//! versions, conflicts, or the storage write path beyond the index
//! operations it needs.
//!
//! Queries (`blockers_of`, `active_blockers_of`, `tree`) run over
//! [`TodoLookup`], implemented by both `jari_storage::ReadTxn` and
//! `WriteTxn`, so a read-only caller never has to take the single writer
//! lock just to walk the graph. Mutations (`add_edge`, `remove_edge`)
//! need `WriteTxn` directly, since only a write transaction can touch the
//! index.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashSet;

use jari_core::{JariError, Result, Status, Todo, TodoId, TreeDirection, TreeNode};
use jari_storage::{ReadTxn, WriteTxn};

/// Read-only access to todos and the dependency index, implemented by both
/// transaction kinds so graph queries work from either.
pub trait TodoLookup {
    /// Look up a todo by id.
    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>>;
    /// Every todo that directly depends on `parent`.
    fn children_of(&self, parent: TodoId) -> Result<Vec<TodoId>>;
}

impl TodoLookup for ReadTxn {
    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        ReadTxn::get_todo(self, id)
    }
    fn children_of(&self, parent: TodoId) -> Result<Vec<TodoId>> {
        ReadTxn::children_of(self, parent)
    }
}

impl TodoLookup for WriteTxn {
    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        WriteTxn::get_todo(self, id)
    }
    fn children_of(&self, parent: TodoId) -> Result<Vec<TodoId>> {
        WriteTxn::children_of(self, parent)
    }
}

/// Add the dependency edge `child` depends on `parent`, rejecting it if it
/// would create a cycle. The caller is responsible for also applying
/// `FieldChange::AddBlockedBy` to the child's record; this only maintains
/// the reverse index and validates acyclicity.
pub fn add_edge(txn: &WriteTxn, parent: TodoId, child: TodoId) -> Result<()> {
    if parent == child {
        return Err(JariError::SelfEdge(child));
    }
    if let Some(path) = find_path(txn, parent, child)? {
        let mut full = vec![child];
        full.extend(path);
        return Err(JariError::CycleDetected { path: full });
    }
    txn.add_block_edge(parent, child)
}

/// Remove the dependency edge `child` depends on `parent`.
pub fn remove_edge(txn: &WriteTxn, parent: TodoId, child: TodoId) -> Result<()> {
    txn.remove_block_edge(parent, child)
}

/// Direct blockers of `id`: the todos `id` depends on.
pub fn blockers_of(txn: &impl TodoLookup, id: TodoId) -> Result<Vec<TodoId>> {
    Ok(txn.get_todo(id)?.map(|t| t.blocked_by.into_iter().collect()).unwrap_or_default())
}

/// Direct blockers of `id` that are not yet closed or deferred — the set
/// that must shrink to empty before `id` can be claimed.
pub fn active_blockers_of(txn: &impl TodoLookup, id: TodoId) -> Result<Vec<TodoId>> {
    let blockers = blockers_of(txn, id)?;
    let mut active = Vec::new();
    for blocker_id in blockers {
        if let Some(blocker) = txn.get_todo(blocker_id)? {
            if !matches!(blocker.status, Status::Closed | Status::Deferred) {
                active.push(blocker_id);
            }
        }
        // A dangling blocker (deleted todo) is tolerated and does not
        // block: see the dangling-reference Open Question resolution.
    }
    Ok(active)
}

/// Whether a directed path exists from `from` to `to` following
/// `blocked_by` edges, returning the path (from -> ... -> to) if so.
fn find_path(txn: &impl TodoLookup, from: TodoId, to: TodoId) -> Result<Option<Vec<TodoId>>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    dfs(txn, from, to, &mut visited, &mut path)
}

fn dfs(
    txn: &impl TodoLookup,
    node: TodoId,
    target: TodoId,
    visited: &mut HashSet<TodoId>,
    path: &mut Vec<TodoId>,
) -> Result<Option<Vec<TodoId>>> {
    if node == target {
        path.push(node);
        return Ok(Some(path.clone()));
    }
    if !visited.insert(node) {
        return Ok(None);
    }
    path.push(node);
    let blockers = blockers_of(txn, node)?;
    for next in blockers {
        if let Some(found) = dfs(txn, next, target, visited, path)? {
            return Ok(Some(found));
        }
    }
    path.pop();
    Ok(None)
}

/// Build the transitive tree rooted at `id`, following `blocked_by` edges
/// (`TreeDirection::Blockers`) or the reverse index (`TreeDirection::Blocks`).
/// Cycles cannot occur by construction (every edge is cycle-checked on
/// insert) but a node already on the current path is still skipped
/// defensively rather than recursed into.
pub fn tree(txn: &impl TodoLookup, id: TodoId, direction: TreeDirection) -> Result<TreeNode> {
    let mut visited = HashSet::new();
    build_tree(txn, id, direction, &mut visited)
}

fn build_tree(
    txn: &impl TodoLookup,
    id: TodoId,
    direction: TreeDirection,
    visited: &mut HashSet<TodoId>,
) -> Result<TreeNode> {
    let todo = txn.get_todo(id)?.ok_or(JariError::NotFound(id))?;
    visited.insert(id);

    let child_ids = match direction {
        TreeDirection::Blockers => todo.blocked_by.iter().copied().collect::<Vec<_>>(),
        TreeDirection::Blocks => txn.children_of(id)?,
    };

    let mut children = Vec::new();
    for child_id in child_ids {
        if visited.contains(&child_id) {
            continue;
        }
        if txn.get_todo(child_id)?.is_none() {
            continue;
        }
        children.push(build_tree(txn, child_id, direction, visited)?);
    }

    Ok(TreeNode {
        id: todo.id,
        title: todo.title,
        status: todo.status,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jari_core::{FieldChange, Priority};
    use jari_storage::Store;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("jari.redb")).unwrap();
        (dir, store)
    }

    fn make_todo(txn: &WriteTxn, title: &str) -> TodoId {
        let id = txn.next_todo_id().unwrap();
        let todo = Todo::new(id, title.into(), "".into(), Priority::default(), "task".into(), "a".into(), None, None);
        txn.put_todo(&todo).unwrap();
        id
    }

    fn link(txn: &WriteTxn, child: TodoId, parent: TodoId) {
        add_edge(txn, parent, child).unwrap();
        let mut todo = txn.get_todo(child).unwrap().unwrap();
        jari_concurrency::apply_change(&mut todo, &FieldChange::AddBlockedBy(parent)).unwrap();
        txn.put_todo(&todo).unwrap();
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        link(&txn, b, a);
        let err = add_edge(&txn, b, a).unwrap_err();
        assert!(matches!(err, JariError::CycleDetected { .. }));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        let c = make_todo(&txn, "c");
        link(&txn, b, a); // b depends on a
        link(&txn, c, b); // c depends on b
        let err = add_edge(&txn, c, a).unwrap_err(); // a depends on c would close the loop
        assert!(matches!(err, JariError::CycleDetected { .. }));
    }

    #[test]
    fn diamond_dependency_is_allowed() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        let c = make_todo(&txn, "c");
        let d = make_todo(&txn, "d");
        link(&txn, b, a);
        link(&txn, c, a);
        link(&txn, d, b);
        add_edge(&txn, c, d).unwrap();
    }

    #[test]
    fn active_blockers_excludes_closed_and_deferred() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        link(&txn, b, a);

        let mut blocker = txn.get_todo(a).unwrap().unwrap();
        blocker.status = Status::Closed;
        txn.put_todo(&blocker).unwrap();

        assert!(active_blockers_of(&txn, b).unwrap().is_empty());
        assert_eq!(blockers_of(&txn, b).unwrap(), vec![a]);
    }

    #[test]
    fn dangling_blocker_is_tolerated_and_not_active() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        link(&txn, b, a);
        txn.delete_todo(a).unwrap();

        assert!(active_blockers_of(&txn, b).unwrap().is_empty());
    }

    #[test]
    fn tree_blocks_direction_follows_reverse_index() {
        let (_dir, store) = temp_store();
        let txn = store.begin_write().unwrap();
        let a = make_todo(&txn, "a");
        let b = make_todo(&txn, "b");
        link(&txn, b, a);

        let t = tree(&txn, a, TreeDirection::Blocks).unwrap();
        assert_eq!(t.children.len(), 1);
        assert_eq!(t.children[0].id, b);
    }

    #[test]
    fn tree_can_be_built_from_a_read_only_transaction() {
        let (_dir, store) = temp_store();
        {
            let txn = store.begin_write().unwrap();
            let a = make_todo(&txn, "a");
            let b = make_todo(&txn, "b");
            link(&txn, b, a);
            txn.commit().unwrap();
        }
        let read = store.begin_read().unwrap();
        let t = tree(&read, TodoId::new(1), TreeDirection::Blocks).unwrap();
        assert_eq!(t.children.len(), 1);
    }

    proptest::proptest! {
        // Feeding a random sequence of candidate edges through `add_edge`,
        // skipping whichever ones it rejects, must never leave a cycle
        // reachable in the accepted graph: every add that succeeds keeps
        // the whole index acyclic.
        #[test]
        fn add_edge_never_admits_a_cycle(
            edges in proptest::collection::vec((0usize..6, 0usize..6), 0..20)
        ) {
            let (_dir, store) = temp_store();
            let txn = store.begin_write().unwrap();
            let ids: Vec<TodoId> = (0..6).map(|i| make_todo(&txn, &format!("n{i}"))).collect();

            for (p, c) in edges {
                let parent = ids[p];
                let child = ids[c];
                if add_edge(&txn, parent, child).is_ok() {
                    let mut todo = txn.get_todo(child).unwrap().unwrap();
                    jari_concurrency::apply_change(&mut todo, &FieldChange::AddBlockedBy(parent)).unwrap();
                    txn.put_todo(&todo).unwrap();
                }
            }

            // No node can reach itself via `blocked_by` edges.
            for &id in &ids {
                proptest::prop_assert!(find_path(&txn, id, id).unwrap().is_none());
            }
        }
    }
}
