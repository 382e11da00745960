//! Checks for cross-cutting laws (ready idempotence, auto-merge
//! commutativity, ready/blocked partitioning) not already covered by
//! `end_to_end.rs`'s scenario tests.

use jari::{FieldChange, Jari, Priority};

fn temp_db() -> (tempfile::TempDir, Jari) {
    let dir = tempfile::tempdir().unwrap();
    let db = Jari::open(dir.path().join("jari.redb")).unwrap();
    (dir, db)
}

#[test]
fn ready_is_idempotent_with_no_intervening_mutation() {
    let (_dir, db) = temp_db();
    db.create("a", "one".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
    db.create("a", "two".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();

    let first: Vec<_> = db.ready().unwrap().into_iter().map(|t| t.id).collect();
    let second: Vec<_> = db.ready().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(first, second);
}

#[test]
fn auto_merge_is_commutative_in_commit_order() {
    // Run the same disjoint-field updates in both commit orders and check
    // the resulting record is identical either way.
    let run = |a_first: bool| {
        let dir = tempfile::tempdir().unwrap();
        let db = Jari::open(dir.path().join("jari.redb")).unwrap();
        let todo = db.create("a", "orig".into(), "".into(), Priority::new(3).unwrap(), "task".into(), None, None).unwrap();

        db.show("agent-a", todo.id).unwrap();
        db.show("agent-b", todo.id).unwrap();

        let update_a = |db: &Jari| db.update("agent-a", todo.id, vec![FieldChange::Priority(Priority::new(0).unwrap())]).unwrap();
        let update_b = |db: &Jari| db.update("agent-b", todo.id, vec![FieldChange::Description("described".into())]).unwrap();

        if a_first {
            update_a(&db);
            update_b(&db);
        } else {
            update_b(&db);
            update_a(&db);
        }

        db.show("observer", todo.id).unwrap()
    };

    let first = run(true);
    let second = run(false);
    assert_eq!(first.priority, second.priority);
    assert_eq!(first.description, second.description);
    assert_eq!(first.version, second.version);
}

#[test]
fn ready_and_blocked_partition_active_todos() {
    let (_dir, db) = temp_db();
    let parent = db.create("a", "parent".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
    let child = db.create("a", "child".into(), "".into(), Priority::default(), "task".into(), None, None).unwrap();
    db.dep_add("a", child.id, parent.id).unwrap();
    db.create("a", "closed".into(), "".into(), Priority::default(), "task".into(), None, None)
        .and_then(|t| db.close("a", t.id, None))
        .unwrap();

    let ready: Vec<_> = db.ready().unwrap().into_iter().map(|t| t.id).collect();
    let blocked: Vec<_> = db.blocked().unwrap().into_iter().map(|(t, _)| t.id).collect();

    assert!(ready.iter().all(|id| !blocked.contains(id)));
    assert_eq!(ready, vec![parent.id]);
    assert_eq!(blocked, vec![child.id]);
}
