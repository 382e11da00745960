//! Named sub-stores and key encodings
//!
//! Jari keeps one `redb` database file with six named tables. Composite
//! keys are big-endian byte strings so that `redb`'s range scans (which
//! iterate keys in byte order) double as prefix scans — the same trick the
//! teacher's WAL segment keys used, adapted to `redb`'s table model instead
//! of a hand-rolled sharded map.

use jari_core::TodoId;
use redb::TableDefinition;

/// `todo_id -> encoded Todo`
pub const TODOS: TableDefinition<u64, &[u8]> = TableDefinition::new("todos");

/// `(todo_id, version) -> encoded HistorySnapshot`, see `history_key`.
pub const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");

/// `(agent, todo_id) -> encoded PendingRead`, see `pending_key`.
pub const PENDING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending");

/// `(todo_id, seq) -> encoded Conflict`, see `conflict_key`.
pub const CONFLICTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("conflicts");

/// `agent_name -> encoded AgentRecord`
pub const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");

/// `(parent_id, child_id) -> ()`, the reverse of `Todo::blocked_by`:
/// everything that depends on `parent_id`. See `block_edge_key`.
pub const BLOCKS_INDEX: TableDefinition<&[u8], ()> = TableDefinition::new("blocks_index");

/// Singleton values: the `todo_id` counter and anything else scalar.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key under `META` for the monotonic todo id counter.
pub const COUNTER_KEY: &str = "counter/todo_id";

/// Build a `HISTORY` key: `id` big-endian, then `version` big-endian, so a
/// range over `history_prefix(id)` yields every version for that todo in
/// ascending order.
pub fn history_key(id: TodoId, version: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(16);
    k.extend_from_slice(&id.as_u64().to_be_bytes());
    k.extend_from_slice(&version.to_be_bytes());
    k
}

/// Inclusive..exclusive byte range covering every `history_key(id, _)`.
pub fn history_prefix(id: TodoId) -> (Vec<u8>, Vec<u8>) {
    be_prefix_range(id.as_u64())
}

/// Build a `PENDING` key: `agent` bytes, a NUL separator, then `id`
/// big-endian. The NUL separator keeps agent-name prefixes from colliding
/// since agent names are arbitrary UTF-8 and may themselves be prefixes of
/// one another.
pub fn pending_key(agent: &str, id: TodoId) -> Vec<u8> {
    let mut k = Vec::with_capacity(agent.len() + 9);
    k.extend_from_slice(agent.as_bytes());
    k.push(0);
    k.extend_from_slice(&id.as_u64().to_be_bytes());
    k
}

/// Byte range covering every `pending_key(agent, _)`.
pub fn pending_prefix(agent: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = agent.as_bytes().to_vec();
    start.push(0);
    let mut end = start.clone();
    end.push(0xff);
    (start, end)
}

/// Build a `CONFLICTS` key: `id` big-endian, then `seq` big-endian.
pub fn conflict_key(id: TodoId, seq: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(16);
    k.extend_from_slice(&id.as_u64().to_be_bytes());
    k.extend_from_slice(&seq.to_be_bytes());
    k
}

/// Byte range covering every `conflict_key(id, _)`.
pub fn conflict_prefix(id: TodoId) -> (Vec<u8>, Vec<u8>) {
    be_prefix_range(id.as_u64())
}

/// Build a `BLOCKS_INDEX` key: `parent` big-endian, then `child` big-endian.
pub fn block_edge_key(parent: TodoId, child: TodoId) -> Vec<u8> {
    let mut k = Vec::with_capacity(16);
    k.extend_from_slice(&parent.as_u64().to_be_bytes());
    k.extend_from_slice(&child.as_u64().to_be_bytes());
    k
}

/// Byte range covering every `block_edge_key(parent, _)`.
pub fn block_edge_prefix(parent: TodoId) -> (Vec<u8>, Vec<u8>) {
    be_prefix_range(parent.as_u64())
}

/// `[start, end)` bounding every 16-byte key whose first 8 bytes are
/// `prefix`'s big-endian encoding.
fn be_prefix_range(prefix: u64) -> (Vec<u8>, Vec<u8>) {
    let start = prefix.to_be_bytes().to_vec();
    let end = (prefix + 1).to_be_bytes().to_vec();
    (start, end)
}
