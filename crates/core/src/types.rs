//! Core data types for Jari
//!
//! This module defines the entities described in the data model:
//! - TodoId: stable, monotonically issued identifier
//! - Status / Priority: closed enums for a todo's lifecycle state
//! - Version: the per-todo optimistic-concurrency counter
//! - Timestamp: monotonic wall-clock stamp used on every mutation
//! - Todo: the tracked unit of work itself
//! - FieldChange: a closed, tagged union of the mutable fields an `update`
//!   may propose, used by the concurrency engine's field-level diff
//! - Conflict / PendingRead / AgentRecord: the bookkeeping records the
//!   concurrency engine persists alongside each todo

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable identifier of the form `todo_{n}`.
///
/// `n` is issued by a monotonic counter (`meta/counter/todo_id`) and is
/// never reused, even after the todo is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TodoId(pub u64);

impl TodoId {
    /// Construct a `TodoId` from its numeric component.
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    /// The numeric component, as issued by the counter.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "todo_{}", self.0)
    }
}

impl std::str::FromStr for TodoId {
    type Err = ParseTodoIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s
            .strip_prefix("todo_")
            .ok_or(ParseTodoIdError)?
            .parse::<u64>()
            .map_err(|_| ParseTodoIdError)?;
        Ok(Self(n))
    }
}

/// Error returned when a string does not match `todo_{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid todo id: expected `todo_<n>`")]
pub struct ParseTodoIdError;

/// Durable lifecycle status of a todo.
///
/// `Blocked` is a user-set override, never computed by the engine — see
/// the Open Question resolution in DESIGN.md. The ready/blocked *queues*
/// are derived separately from dependency edges and are independent of
/// this field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Open and unclaimed (or claimed but not yet started in the tracker's eyes).
    Open,
    /// Claimed and actively being worked.
    InProgress,
    /// User-set override; never written by the engine itself.
    Blocked,
    /// Terminal: done.
    Closed,
    /// Terminal-ish: explicitly deferred, excluded from ready/blocked queues.
    Deferred,
}

impl Status {
    /// Todos with one of these two statuses participate in the ready/blocked
    /// queue split.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Open | Status::InProgress)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Closed => "closed",
            Status::Deferred => "deferred",
        };
        write!(f, "{s}")
    }
}

/// Priority, 0 (critical) through 4 (backlog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    /// Lowest (most urgent) priority.
    pub const CRITICAL: Priority = Priority(0);
    /// Highest (least urgent) priority.
    pub const BACKLOG: Priority = Priority(4);

    /// Construct a priority, rejecting values outside `[0, 4]`.
    pub fn new(value: u8) -> Result<Self, PriorityRangeError> {
        if value > 4 {
            Err(PriorityRangeError(value))
        } else {
            Ok(Self(value))
        }
    }

    /// The raw numeric value.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(2)
    }
}

/// Error returned when a priority falls outside `[0, 4]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("priority {0} out of range [0, 4]")]
pub struct PriorityRangeError(pub u8);

/// Monotonically increasing per-todo version counter.
///
/// Starts at 1 on creation and is bumped on every committed mutation
/// (auto-merge, conflict resolution, claim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// The version assigned to a freshly created todo.
    pub const INITIAL: Version = Version(1);

    /// Returns the next version after this one.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    /// The raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic wall-clock timestamp, milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// An agent name: a self-asserted label, not an authenticated identity.
pub type AgentName = String;

/// The tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    /// Stable identifier.
    pub id: TodoId,
    /// Non-empty short description of the work.
    pub title: String,
    /// Longer-form description; may be empty.
    pub description: String,
    /// Durable lifecycle status.
    pub status: Status,
    /// Urgency, 0 (critical) through 4 (backlog).
    pub priority: Priority,
    /// Free-form short category, e.g. `bug`, `task`, `feature`.
    pub kind: String,
    /// Agent currently assigned, or empty if unassigned.
    pub assignee: AgentName,
    /// Arbitrary labels.
    pub labels: BTreeSet<String>,
    /// External node identifiers this todo is linked to.
    pub niwa_refs: BTreeSet<String>,
    /// Optional parent (epic/subtask relationship). May dangle after the
    /// parent is deleted; display-only, never enforced.
    pub parent_id: Option<TodoId>,
    /// Todos this one depends on (dependency edges point from child to parent).
    pub blocked_by: BTreeSet<TodoId>,
    /// Closure reason, set when `status` becomes `Closed`.
    pub reason: Option<String>,
    /// Denormalized close timestamp, kept consistent with the latest
    /// history snapshot when `status == Closed`. Supplementary convenience
    /// field (SPEC_FULL.md §3), not a new invariant.
    pub closed_at: Option<Timestamp>,
    /// Bumped on every committed mutation.
    pub version: Version,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Timestamp of the most recent committed mutation.
    pub updated_at: Timestamp,
    /// Agent that created this todo.
    pub created_by: AgentName,
    /// Agent that performed the most recent committed mutation.
    pub updated_by: AgentName,
    /// Fields present in the encoded record that this version of the schema
    /// does not recognize. Preserved verbatim on every read-modify-write so
    /// that a newer writer's extensions survive an older writer's update.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, rmpv::Value>,
}

impl Todo {
    /// Construct a brand-new todo at version 1, status `Open`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TodoId,
        title: String,
        description: String,
        priority: Priority,
        kind: String,
        agent: AgentName,
        parent_id: Option<TodoId>,
        niwa_ref: Option<String>,
    ) -> Self {
        let ts = now();
        let mut niwa_refs = BTreeSet::new();
        if let Some(r) = niwa_ref {
            niwa_refs.insert(r);
        }
        Todo {
            id,
            title,
            description,
            status: Status::Open,
            priority,
            kind,
            assignee: String::new(),
            labels: BTreeSet::new(),
            niwa_refs,
            parent_id,
            blocked_by: BTreeSet::new(),
            reason: None,
            closed_at: None,
            version: Version::INITIAL,
            created_at: ts,
            updated_at: ts,
            created_by: agent.clone(),
            updated_by: agent,
            extra: BTreeMap::new(),
        }
    }
}

/// A single field an agent may propose changing in an `update` call.
///
/// This is the typed, closed-schema equivalent of dispatching on a field
/// name at runtime: `update` accepts a list of these, and the concurrency
/// engine's diff is a comparison over this closed set rather than a
/// dynamic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldChange {
    /// Replace the title.
    Title(String),
    /// Replace the description.
    Description(String),
    /// Replace the priority.
    Priority(Priority),
    /// Replace the durable status.
    Status(Status),
    /// Replace the free-form type/category.
    Kind(String),
    /// Replace the assignee (empty string clears it).
    Assignee(AgentName),
    /// Replace the closure reason.
    Reason(Option<String>),
    /// Replace the parent id.
    Parent(Option<TodoId>),
    /// Add a label (set-union semantics).
    AddLabel(String),
    /// Remove a label (set-difference semantics).
    RemoveLabel(String),
    /// Add an external node reference.
    AddNiwaRef(String),
    /// Remove an external node reference.
    RemoveNiwaRef(String),
    /// Add a dependency edge (this todo depends on `TodoId`).
    AddBlockedBy(TodoId),
    /// Remove a dependency edge.
    RemoveBlockedBy(TodoId),
}

impl FieldChange {
    /// The name of the logical field this change targets, used to group
    /// changes for the field-level diff (set-valued fields share one name
    /// regardless of whether the change is an add or a remove).
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldChange::Title(_) => "title",
            FieldChange::Description(_) => "description",
            FieldChange::Priority(_) => "priority",
            FieldChange::Status(_) => "status",
            FieldChange::Kind(_) => "kind",
            FieldChange::Assignee(_) => "assignee",
            FieldChange::Reason(_) => "reason",
            FieldChange::Parent(_) => "parent_id",
            FieldChange::AddLabel(_) | FieldChange::RemoveLabel(_) => "labels",
            FieldChange::AddNiwaRef(_) | FieldChange::RemoveNiwaRef(_) => "niwa_refs",
            FieldChange::AddBlockedBy(_) | FieldChange::RemoveBlockedBy(_) => "blocked_by",
        }
    }
}

/// An immutable copy of a todo at a given version, keyed by `(id, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// The todo as it existed immediately after this version was committed.
    pub todo: Todo,
    /// Agent that produced this version.
    pub agent: AgentName,
    /// Commit timestamp.
    pub timestamp: Timestamp,
    /// Short label for the operation that produced this version, e.g.
    /// `"create"`, `"update"`, `"close"`, `"conflict resolved"`.
    pub operation: String,
}

/// The version an agent last observed for a given todo; the optimistic
/// base for that agent's next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRead {
    /// The observed version.
    pub version: Version,
}

/// A single field-level conflict awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Monotonic per-todo sequence number.
    pub seq: u64,
    /// Agent whose write produced this conflict.
    pub agent: AgentName,
    /// The version the agent's write was based on.
    pub base_version: Version,
    /// The version the todo was actually at when the write landed.
    pub their_version: Version,
    /// The logical field in conflict (see `FieldChange::field_name`).
    pub field: String,
    /// The value the agent intended to write, serialized for display.
    pub yours_value: String,
    /// The value already committed by someone else, serialized for display.
    pub theirs_value: String,
    /// The agent's original proposed change, kept so `ACCEPT_YOURS` can
    /// reapply it exactly rather than re-parsing `yours_value`.
    pub change: FieldChange,
    /// When the conflict was materialized.
    pub timestamp: Timestamp,
}

/// A registered agent: any name that has ever interacted with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// The agent's self-asserted name.
    pub name: AgentName,
    /// First time this agent was observed.
    pub first_seen: Timestamp,
    /// Most recent time this agent was observed.
    pub last_seen: Timestamp,
}

/// Strategy for resolving a todo's pending conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolveStrategy {
    /// Apply the agent's intended values for every conflicting field.
    AcceptYours,
    /// Keep the currently committed values for every conflicting field.
    AcceptTheirs,
    /// Apply caller-supplied overrides for the named fields.
    ManualMerge(Vec<FieldChange>),
}

/// A node in the transitive blocker/blocks tree, used for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The todo at this node.
    pub id: TodoId,
    /// Its title, denormalized for display without a second lookup.
    pub title: String,
    /// Its current status, denormalized for display.
    pub status: Status,
    /// Children in the requested direction (blockers, or blocked-by-this).
    pub children: Vec<TreeNode>,
}

/// Direction of traversal for `Graph::tree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeDirection {
    /// Follow `blocked_by`: show what blocks this todo, transitively.
    Blockers,
    /// Follow the reverse index: show what this todo blocks, transitively.
    Blocks,
}
