//! Field-level diff, auto-merge and conflict materialization
//!
//! Implements the optimistic write path: given the record as an agent last
//! observed it (`Y`), the record as it stands now (`T`), and the agent's
//! proposed changes, a field that only the agent touched is auto-merged
//! into `T`; a field both sides touched to different final values is
//! materialized as a `Conflict` and left untouched. Set-valued fields
//! (`labels`, `niwa_refs`, `blocked_by`) are diffed by add/remove operation
//! rather than by final value, so that e.g. one agent's `AddLabel("x")`
//! only conflicts with another agent's concurrent `RemoveLabel("x")`, never
//! with an unrelated label touched by someone else.

use jari_core::{now, Conflict, FieldChange, JariError, Result, Todo, TodoId, Version};

/// Apply one proposed change to a todo in place.
pub fn apply_change(todo: &mut Todo, change: &FieldChange) -> Result<()> {
    match change {
        FieldChange::Title(v) => {
            if v.trim().is_empty() {
                return Err(JariError::InvalidInput {
                    field: "title",
                    reason: "must not be empty".to_string(),
                });
            }
            todo.title = v.clone();
        }
        FieldChange::Description(v) => todo.description = v.clone(),
        FieldChange::Priority(p) => todo.priority = *p,
        FieldChange::Status(s) => todo.status = *s,
        FieldChange::Kind(k) => todo.kind = k.clone(),
        FieldChange::Assignee(a) => todo.assignee = a.clone(),
        FieldChange::Reason(r) => todo.reason = r.clone(),
        FieldChange::Parent(p) => todo.parent_id = *p,
        FieldChange::AddLabel(l) => {
            todo.labels.insert(l.clone());
        }
        FieldChange::RemoveLabel(l) => {
            todo.labels.remove(l);
        }
        FieldChange::AddNiwaRef(r) => {
            todo.niwa_refs.insert(r.clone());
        }
        FieldChange::RemoveNiwaRef(r) => {
            todo.niwa_refs.remove(r);
        }
        FieldChange::AddBlockedBy(id) => {
            if *id == todo.id {
                return Err(JariError::SelfEdge(*id));
            }
            todo.blocked_by.insert(*id);
        }
        FieldChange::RemoveBlockedBy(id) => {
            todo.blocked_by.remove(id);
        }
    }
    Ok(())
}

/// Outcome of reconciling one agent's proposed changes against the current
/// record.
#[derive(Debug)]
pub struct MergeOutcome {
    /// `T` with every auto-mergeable field applied.
    pub merged: Todo,
    /// Newly materialized conflicts (`seq` left at 0; the caller assigns it).
    pub conflicts: Vec<Conflict>,
    /// True if at least one field was auto-merged into `merged`.
    pub any_merged: bool,
}

struct Ctx<'a> {
    base_version: Version,
    their_version: Version,
    agent: &'a str,
    ts: i64,
}

fn scalar_conflict(ctx: &Ctx, field: &'static str, change: FieldChange, yours: String, theirs: String) -> Conflict {
    Conflict {
        seq: 0,
        agent: ctx.agent.to_string(),
        base_version: ctx.base_version,
        their_version: ctx.their_version,
        field: field.to_string(),
        yours_value: yours,
        theirs_value: theirs,
        change,
        timestamp: ctx.ts,
    }
}

/// Reconcile `agent`'s proposed `changes` against the current record `t`,
/// given the agent's base view `y` (the record as of `base_version`).
pub fn reconcile(
    y: &Todo,
    changes: &[FieldChange],
    t: &Todo,
    base_version: Version,
    agent: &str,
) -> Result<MergeOutcome> {
    let mut y_prime = y.clone();
    for change in changes {
        apply_change(&mut y_prime, change)?;
    }

    let mut merged = t.clone();
    let mut conflicts = Vec::new();
    let mut any_merged = false;
    let ctx = Ctx {
        base_version,
        their_version: t.version,
        agent,
        ts: now(),
    };

    // Scalar fields: a proposed change conflicts only if the field also
    // changed concurrently to a *different* final value than this agent
    // intends.
    for change in changes {
        let (theirs_changed, yours_changed, yours_val, theirs_val, same_target): (bool, bool, String, String, bool) =
            match change {
                FieldChange::Title(v) => (
                    t.title != y.title,
                    y_prime.title != y.title,
                    v.clone(),
                    t.title.clone(),
                    t.title == y_prime.title,
                ),
                FieldChange::Description(v) => (
                    t.description != y.description,
                    y_prime.description != y.description,
                    v.clone(),
                    t.description.clone(),
                    t.description == y_prime.description,
                ),
                FieldChange::Priority(_) => (
                    t.priority != y.priority,
                    y_prime.priority != y.priority,
                    format!("{}", y_prime.priority.value()),
                    format!("{}", t.priority.value()),
                    t.priority == y_prime.priority,
                ),
                FieldChange::Status(_) => (
                    t.status != y.status,
                    y_prime.status != y.status,
                    y_prime.status.to_string(),
                    t.status.to_string(),
                    t.status == y_prime.status,
                ),
                FieldChange::Kind(v) => (
                    t.kind != y.kind,
                    y_prime.kind != y.kind,
                    v.clone(),
                    t.kind.clone(),
                    t.kind == y_prime.kind,
                ),
                FieldChange::Assignee(v) => (
                    t.assignee != y.assignee,
                    y_prime.assignee != y.assignee,
                    v.clone(),
                    t.assignee.clone(),
                    t.assignee == y_prime.assignee,
                ),
                FieldChange::Reason(v) => (
                    t.reason != y.reason,
                    y_prime.reason != y.reason,
                    format!("{v:?}"),
                    format!("{:?}", t.reason),
                    t.reason == y_prime.reason,
                ),
                FieldChange::Parent(v) => (
                    t.parent_id != y.parent_id,
                    y_prime.parent_id != y.parent_id,
                    format!("{v:?}"),
                    format!("{:?}", t.parent_id),
                    t.parent_id == y_prime.parent_id,
                ),
                // Set-valued fields are handled separately below.
                FieldChange::AddLabel(_)
                | FieldChange::RemoveLabel(_)
                | FieldChange::AddNiwaRef(_)
                | FieldChange::RemoveNiwaRef(_)
                | FieldChange::AddBlockedBy(_)
                | FieldChange::RemoveBlockedBy(_) => continue,
            };

        if !yours_changed {
            continue;
        }
        if theirs_changed {
            if !same_target {
                conflicts.push(scalar_conflict(&ctx, change.field_name(), change.clone(), yours_val, theirs_val));
            }
        } else {
            apply_change(&mut merged, change)?;
            any_merged = true;
        }
    }

    reconcile_set_field(
        "labels",
        changes,
        |c| matches!(c, FieldChange::AddLabel(_)),
        |c| matches!(c, FieldChange::RemoveLabel(_)),
        |c| match c {
            FieldChange::AddLabel(v) | FieldChange::RemoveLabel(v) => v.clone(),
            _ => unreachable!(),
        },
        &y.labels,
        &t.labels,
        &mut merged.labels,
        |v| FieldChange::AddLabel(v.clone()),
        |v| FieldChange::RemoveLabel(v.clone()),
        |v: &String| format!("+{v}"),
        |v: &String| format!("-{v}"),
        &ctx,
        &mut conflicts,
        &mut any_merged,
    );
    reconcile_set_field(
        "niwa_refs",
        changes,
        |c| matches!(c, FieldChange::AddNiwaRef(_)),
        |c| matches!(c, FieldChange::RemoveNiwaRef(_)),
        |c| match c {
            FieldChange::AddNiwaRef(v) | FieldChange::RemoveNiwaRef(v) => v.clone(),
            _ => unreachable!(),
        },
        &y.niwa_refs,
        &t.niwa_refs,
        &mut merged.niwa_refs,
        |v| FieldChange::AddNiwaRef(v.clone()),
        |v| FieldChange::RemoveNiwaRef(v.clone()),
        |v: &String| format!("+{v}"),
        |v: &String| format!("-{v}"),
        &ctx,
        &mut conflicts,
        &mut any_merged,
    );
    reconcile_set_field(
        "blocked_by",
        changes,
        |c| matches!(c, FieldChange::AddBlockedBy(_)),
        |c| matches!(c, FieldChange::RemoveBlockedBy(_)),
        |c| match c {
            FieldChange::AddBlockedBy(v) | FieldChange::RemoveBlockedBy(v) => *v,
            _ => unreachable!(),
        },
        &y.blocked_by,
        &t.blocked_by,
        &mut merged.blocked_by,
        |v| FieldChange::AddBlockedBy(*v),
        |v| FieldChange::RemoveBlockedBy(*v),
        |v: &TodoId| format!("+{v}"),
        |v: &TodoId| format!("-{v}"),
        &ctx,
        &mut conflicts,
        &mut any_merged,
    );

    Ok(MergeOutcome {
        merged,
        conflicts,
        any_merged,
    })
}

/// Reconcile one set-valued field by explicit add/remove operation: an
/// element conflicts only when this agent's operation on it opposes the
/// operation derived from the concurrent `y` -> `t` change on that same
/// element, never because of unrelated activity on the field.
#[allow(clippy::too_many_arguments)]
fn reconcile_set_field<E: Ord + Clone>(
    name: &'static str,
    changes: &[FieldChange],
    is_add: impl Fn(&FieldChange) -> bool,
    is_remove: impl Fn(&FieldChange) -> bool,
    element_of: impl Fn(&FieldChange) -> E,
    y_field: &std::collections::BTreeSet<E>,
    t_field: &std::collections::BTreeSet<E>,
    merged_field: &mut std::collections::BTreeSet<E>,
    to_add_change: impl Fn(&E) -> FieldChange,
    to_remove_change: impl Fn(&E) -> FieldChange,
    fmt_plus: impl Fn(&E) -> String,
    fmt_minus: impl Fn(&E) -> String,
    ctx: &Ctx,
    conflicts: &mut Vec<Conflict>,
    any_merged: &mut bool,
) {
    let yours_add: std::collections::BTreeSet<E> = changes.iter().filter(|c| is_add(c)).map(&element_of).collect();
    let yours_remove: std::collections::BTreeSet<E> = changes.iter().filter(|c| is_remove(c)).map(&element_of).collect();

    let theirs_added: std::collections::BTreeSet<E> = t_field.difference(y_field).cloned().collect();
    let theirs_removed: std::collections::BTreeSet<E> = y_field.difference(t_field).cloned().collect();

    let conflict_added: std::collections::BTreeSet<E> = yours_add.intersection(&theirs_removed).cloned().collect();
    let conflict_removed: std::collections::BTreeSet<E> = yours_remove.intersection(&theirs_added).cloned().collect();

    for elem in &conflict_added {
        conflicts.push(scalar_conflict(
            ctx,
            name,
            to_add_change(elem),
            fmt_plus(elem),
            fmt_minus(elem),
        ));
    }
    for elem in &conflict_removed {
        conflicts.push(scalar_conflict(
            ctx,
            name,
            to_remove_change(elem),
            fmt_minus(elem),
            fmt_plus(elem),
        ));
    }

    for elem in yours_add.difference(&conflict_added) {
        if merged_field.insert(elem.clone()) {
            *any_merged = true;
        }
    }
    for elem in yours_remove.difference(&conflict_removed) {
        if merged_field.remove(elem) {
            *any_merged = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jari_core::{Priority, Todo, TodoId};

    fn base_todo() -> Todo {
        Todo::new(
            TodoId::new(1),
            "t".into(),
            "".into(),
            Priority::default(),
            "task".into(),
            "creator".into(),
            None,
            None,
        )
    }

    #[test]
    fn disjoint_fields_auto_merge_without_conflict() {
        let y = base_todo();
        let mut t = y.clone();
        t.title = "changed by other".into();

        let changes = vec![FieldChange::Priority(Priority::CRITICAL)];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(outcome.any_merged);
        assert_eq!(outcome.merged.priority, Priority::CRITICAL);
        assert_eq!(outcome.merged.title, "changed by other");
    }

    #[test]
    fn same_field_different_value_conflicts() {
        let y = base_todo();
        let mut t = y.clone();
        t.priority = Priority::new(0).unwrap();

        let changes = vec![FieldChange::Priority(Priority::new(2).unwrap())];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert!(!outcome.any_merged);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].field, "priority");
        assert_eq!(outcome.conflicts[0].change, FieldChange::Priority(Priority::new(2).unwrap()));
        assert_eq!(outcome.merged.priority, Priority::new(0).unwrap());
    }

    #[test]
    fn same_field_same_resulting_value_is_not_a_conflict() {
        let y = base_todo();
        let mut t = y.clone();
        t.priority = Priority::new(1).unwrap();

        let changes = vec![FieldChange::Priority(Priority::new(1).unwrap())];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(!outcome.any_merged);
    }

    #[test]
    fn disjoint_label_adds_merge() {
        let y = base_todo();
        let mut t = y.clone();
        t.labels.insert("theirs".into());

        let changes = vec![FieldChange::AddLabel("yours".into())];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(outcome.merged.labels.contains("theirs"));
        assert!(outcome.merged.labels.contains("yours"));
    }

    #[test]
    fn add_vs_concurrent_remove_of_same_label_conflicts() {
        let mut y = base_todo();
        y.labels.insert("shared".into());
        let mut t = y.clone();
        t.labels.remove("shared");

        let changes = vec![FieldChange::AddLabel("shared".into())];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].field, "labels");
        assert!(!outcome.any_merged);
        assert!(!outcome.merged.labels.contains("shared"));
    }

    #[test]
    fn remove_vs_concurrent_add_of_same_label_conflicts() {
        let y = base_todo();
        let mut t = y.clone();
        t.labels.insert("shared".into());

        let changes = vec![FieldChange::RemoveLabel("shared".into())];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].field, "labels");
        assert!(!outcome.any_merged);
        assert!(outcome.merged.labels.contains("shared"));
    }

    #[test]
    fn blocked_by_add_merges_when_disjoint() {
        let y = base_todo();
        let t = y.clone();

        let changes = vec![FieldChange::AddBlockedBy(TodoId::new(2))];
        let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

        assert!(outcome.conflicts.is_empty());
        assert!(outcome.any_merged);
        assert!(outcome.merged.blocked_by.contains(&TodoId::new(2)));
    }

    #[test]
    fn self_edge_is_rejected() {
        let y = base_todo();
        let t = y.clone();
        let changes = vec![FieldChange::AddBlockedBy(TodoId::new(1))];
        let err = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap_err();
        assert!(matches!(err, JariError::SelfEdge(_)));
    }

    proptest::proptest! {
        // Any label this agent adds to an untouched `t` ends up in the
        // merge with no conflict, regardless of how many other unrelated
        // labels `t` picked up concurrently.
        #[test]
        fn adding_a_fresh_label_never_conflicts(
            new_label in "[a-z]{1,8}",
            other_labels in proptest::collection::btree_set("[a-z]{1,8}", 0..5),
        ) {
            let y = base_todo();
            let mut t = y.clone();
            t.labels = other_labels.clone();
            proptest::prop_assume!(!other_labels.contains(&new_label));

            let changes = vec![FieldChange::AddLabel(new_label.clone())];
            let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

            proptest::prop_assert!(outcome.conflicts.is_empty());
            proptest::prop_assert!(outcome.merged.labels.contains(&new_label));
            proptest::prop_assert!(other_labels.is_subset(&outcome.merged.labels));
        }

        // Two priority changes to different values, where only one side
        // actually ran (t's priority stayed at its base), always auto-merge
        // to the proposed value and never conflict.
        #[test]
        fn lone_priority_change_always_merges(p in 0u8..5) {
            let y = base_todo();
            let t = y.clone();
            let changes = vec![FieldChange::Priority(Priority::new(p).unwrap())];
            let outcome = reconcile(&y, &changes, &t, Version::INITIAL, "agent-b").unwrap();

            proptest::prop_assert!(outcome.conflicts.is_empty());
            proptest::prop_assert_eq!(outcome.merged.priority, Priority::new(p).unwrap());
        }
    }
}
