//! The embedded, memory-mapped storage engine
//!
//! `Store` wraps a single `redb::Database`. `redb` gives Jari everything
//! the data layer needs natively: memory-mapped pages, a single writer with
//! many concurrent MVCC readers, and crash-safe ACID commits — without
//! Jari having to own a WAL or recovery path itself.

use std::path::Path;
use std::sync::Arc;

use jari_core::{now, AgentRecord, Conflict, HistorySnapshot, JariError, PendingRead, Result, Todo, TodoId};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use redb::{Database, ReadableTable, ReadableTableMetadata};

use crate::codec;
use crate::tables::{
    block_edge_key, block_edge_prefix, conflict_key, conflict_prefix, history_key, history_prefix,
    pending_key, AGENTS, BLOCKS_INDEX, CONFLICTS, COUNTER_KEY, HISTORY, META,
    PENDING, TODOS,
};

/// An open Jari database.
pub struct Store {
    db: Database,
    // `redb` already serializes `begin_write` internally, but we still take
    // an explicit commit lock up front so a writer blocks here rather than
    // inside `redb`, and so a future multi-database deployment can swap
    // this for a per-resource lock without touching callers.
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Open (creating if absent) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(map_database_err)?;
        let store = Store { db, write_lock: Arc::new(Mutex::new(())) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create every table if this is a freshly created file. `redb` creates
    /// tables lazily on first `open_table` in a write transaction, so this
    /// just forces that to happen once up front.
    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(map_txn_err)?;
        {
            txn.open_table(TODOS).map_err(map_table_err)?;
            txn.open_table(HISTORY).map_err(map_table_err)?;
            txn.open_table(PENDING).map_err(map_table_err)?;
            txn.open_table(CONFLICTS).map_err(map_table_err)?;
            txn.open_table(AGENTS).map_err(map_table_err)?;
            txn.open_table(BLOCKS_INDEX).map_err(map_table_err)?;
            txn.open_table(META).map_err(map_table_err)?;
        }
        txn.commit().map_err(map_commit_err)
    }

    /// Begin a read-write transaction. Only one may be open at a time; the
    /// commit lock is acquired here, before `redb` is even asked.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let guard = self.write_lock.clone().lock_arc();
        let txn = self.db.begin_write().map_err(map_txn_err)?;
        Ok(WriteTxn { txn, _guard: guard })
    }

    /// Begin a read-only transaction against a consistent snapshot.
    pub fn begin_read(&self) -> Result<ReadTxn> {
        let txn = self.db.begin_read().map_err(map_txn_err)?;
        Ok(ReadTxn { txn })
    }
}

/// A read-only snapshot transaction.
pub struct ReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn {
    /// Look up a todo by id.
    pub fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        let table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        match table.get(id.as_u64()).map_err(map_storage_err)? {
            Some(bytes) => Ok(Some(codec::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// All todos in the store. Used by the query layer's queues and search,
    /// which scan the full set rather than maintaining secondary indexes.
    pub fn list_todos(&self) -> Result<Vec<Todo>> {
        let table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        let mut out = Vec::with_capacity(table.len().unwrap_or(0) as usize);
        for entry in table.iter().map_err(map_storage_err)? {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Every committed version of a todo, oldest first.
    pub fn history_for(&self, id: TodoId) -> Result<Vec<HistorySnapshot>> {
        let table = self.txn.open_table(HISTORY).map_err(map_table_err)?;
        let (start, end) = history_prefix(id);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// `agent`'s last observed version of `id`, if any.
    pub fn get_pending_read(&self, agent: &str, id: TodoId) -> Result<Option<PendingRead>> {
        let table = self.txn.open_table(PENDING).map_err(map_table_err)?;
        let key = pending_key(agent, id);
        match table.get(key.as_slice()).map_err(map_storage_err)? {
            Some(bytes) => Ok(Some(codec::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Unresolved conflicts on a todo, oldest first.
    pub fn conflicts_for(&self, id: TodoId) -> Result<Vec<Conflict>> {
        let table = self.txn.open_table(CONFLICTS).map_err(map_table_err)?;
        let (start, end) = conflict_prefix(id);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Every todo that directly depends on `parent` (the reverse of
    /// `Todo::blocked_by`).
    pub fn children_of(&self, parent: TodoId) -> Result<Vec<TodoId>> {
        let table = self.txn.open_table(BLOCKS_INDEX).map_err(map_table_err)?;
        let (start, end) = block_edge_prefix(parent);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (key, _) = entry.map_err(map_storage_err)?;
            let child_bytes: [u8; 8] = key.value()[8..16].try_into().unwrap();
            out.push(TodoId::new(u64::from_be_bytes(child_bytes)));
        }
        Ok(out)
    }

    /// Every agent that has ever been observed.
    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let table = self.txn.open_table(AGENTS).map_err(map_table_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(map_storage_err)? {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }
}

/// A single read-write transaction. Every mutation the engine performs
/// (create, update, claim, resolve, delete, ...) happens inside exactly one
/// of these, committed atomically.
pub struct WriteTxn {
    txn: redb::WriteTransaction,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl WriteTxn {
    /// Allocate the next monotonic todo id.
    pub fn next_todo_id(&self) -> Result<TodoId> {
        let mut table = self.txn.open_table(META).map_err(map_table_err)?;
        let current = table.get(COUNTER_KEY).map_err(map_storage_err)?.map(|v| v.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(COUNTER_KEY, next).map_err(map_storage_err)?;
        Ok(TodoId::new(next))
    }

    /// Look up a todo by id, within this transaction's view.
    pub fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        let table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        let result = match table.get(id.as_u64()).map_err(map_storage_err)? {
            Some(bytes) => Ok(Some(codec::decode(bytes.value())?)),
            None => Ok(None),
        };
        result
    }

    /// Insert or overwrite a todo record.
    pub fn put_todo(&self, todo: &Todo) -> Result<()> {
        let bytes = codec::encode(todo)?;
        let mut table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        table
            .insert(todo.id.as_u64(), bytes.as_slice())
            .map_err(map_storage_err)?;
        Ok(())
    }

    /// Remove a todo record. Does not touch its history, which is
    /// append-only and outlives the todo.
    pub fn delete_todo(&self, id: TodoId) -> Result<()> {
        let mut table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        table.remove(id.as_u64()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Append one version to a todo's history.
    pub fn append_history(&self, id: TodoId, version: u64, snapshot: &HistorySnapshot) -> Result<()> {
        let bytes = codec::encode(snapshot)?;
        let key = history_key(id, version);
        let mut table = self.txn.open_table(HISTORY).map_err(map_table_err)?;
        table.insert(key.as_slice(), bytes.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Every committed version of a todo, oldest first.
    pub fn history_for(&self, id: TodoId) -> Result<Vec<HistorySnapshot>> {
        let table = self.txn.open_table(HISTORY).map_err(map_table_err)?;
        let (start, end) = history_prefix(id);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// `agent`'s last observed version of `id`, if any.
    pub fn get_pending_read(&self, agent: &str, id: TodoId) -> Result<Option<PendingRead>> {
        let table = self.txn.open_table(PENDING).map_err(map_table_err)?;
        let key = pending_key(agent, id);
        let result = match table.get(key.as_slice()).map_err(map_storage_err)? {
            Some(bytes) => Ok(Some(codec::decode(bytes.value())?)),
            None => Ok(None),
        };
        result
    }

    /// Record `agent`'s observed version of `id`.
    pub fn put_pending_read(&self, agent: &str, id: TodoId, pending: &PendingRead) -> Result<()> {
        let bytes = codec::encode(pending)?;
        let key = pending_key(agent, id);
        let mut table = self.txn.open_table(PENDING).map_err(map_table_err)?;
        table.insert(key.as_slice(), bytes.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Drop every pending-read record belonging to `agent` for `id` (called
    /// once a conflict involving them is resolved).
    pub fn clear_pending_read(&self, agent: &str, id: TodoId) -> Result<()> {
        let key = pending_key(agent, id);
        let mut table = self.txn.open_table(PENDING).map_err(map_table_err)?;
        table.remove(key.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Unresolved conflicts on a todo, oldest first.
    pub fn conflicts_for(&self, id: TodoId) -> Result<Vec<Conflict>> {
        let table = self.txn.open_table(CONFLICTS).map_err(map_table_err)?;
        let (start, end) = conflict_prefix(id);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Materialize one field-level conflict for `id`.
    pub fn append_conflict(&self, id: TodoId, conflict: &Conflict) -> Result<()> {
        let bytes = codec::encode(conflict)?;
        let key = conflict_key(id, conflict.seq);
        let mut table = self.txn.open_table(CONFLICTS).map_err(map_table_err)?;
        table.insert(key.as_slice(), bytes.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Remove every conflict recorded against `id` (called once they're
    /// all resolved in a single `resolve` call).
    pub fn clear_conflicts(&self, id: TodoId) -> Result<()> {
        let (start, end) = conflict_prefix(id);
        let mut table = self.txn.open_table(CONFLICTS).map_err(map_table_err)?;
        let keys: Vec<Vec<u8>> = table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
            .map(|entry| entry.map(|(k, _)| k.value().to_vec()))
            .collect::<std::result::Result<_, _>>()
            .map_err(map_storage_err)?;
        for key in keys {
            table.remove(key.as_slice()).map_err(map_storage_err)?;
        }
        Ok(())
    }

    /// Add the dependency edge `child` depends on `parent`.
    pub fn add_block_edge(&self, parent: TodoId, child: TodoId) -> Result<()> {
        let key = block_edge_key(parent, child);
        let mut table = self.txn.open_table(BLOCKS_INDEX).map_err(map_table_err)?;
        table.insert(key.as_slice(), ()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Remove the dependency edge `child` depends on `parent`.
    pub fn remove_block_edge(&self, parent: TodoId, child: TodoId) -> Result<()> {
        let key = block_edge_key(parent, child);
        let mut table = self.txn.open_table(BLOCKS_INDEX).map_err(map_table_err)?;
        table.remove(key.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Every todo that directly depends on `parent`.
    pub fn children_of(&self, parent: TodoId) -> Result<Vec<TodoId>> {
        let table = self.txn.open_table(BLOCKS_INDEX).map_err(map_table_err)?;
        let (start, end) = block_edge_prefix(parent);
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(map_storage_err)?
        {
            let (key, _) = entry.map_err(map_storage_err)?;
            let child_bytes: [u8; 8] = key.value()[8..16].try_into().unwrap();
            out.push(TodoId::new(u64::from_be_bytes(child_bytes)));
        }
        Ok(out)
    }

    /// All todos in the store.
    pub fn list_todos(&self) -> Result<Vec<Todo>> {
        let table = self.txn.open_table(TODOS).map_err(map_table_err)?;
        let mut out = Vec::with_capacity(table.len().unwrap_or(0) as usize);
        for entry in table.iter().map_err(map_storage_err)? {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Record that `agent` was just observed, inserting a fresh
    /// `AgentRecord` the first time.
    pub fn touch_agent(&self, agent: &str) -> Result<()> {
        let mut table = self.txn.open_table(AGENTS).map_err(map_table_err)?;
        let ts = now();
        let record = match table.get(agent).map_err(map_storage_err)? {
            Some(bytes) => {
                let mut rec: AgentRecord = codec::decode(bytes.value())?;
                rec.last_seen = ts;
                rec
            }
            None => AgentRecord {
                name: agent.to_string(),
                first_seen: ts,
                last_seen: ts,
            },
        };
        let bytes = codec::encode(&record)?;
        table.insert(agent, bytes.as_slice()).map_err(map_storage_err)?;
        Ok(())
    }

    /// Every agent that has ever been observed.
    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let table = self.txn.open_table(AGENTS).map_err(map_table_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(map_storage_err)? {
            let (_, bytes) = entry.map_err(map_storage_err)?;
            out.push(codec::decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Commit every write made in this transaction atomically.
    pub fn commit(self) -> Result<()> {
        self.txn.commit().map_err(map_commit_err)
    }

    /// Discard every write made in this transaction.
    pub fn abort(self) -> Result<()> {
        self.txn.abort().map_err(map_storage_err)
    }
}

fn map_database_err(e: redb::DatabaseError) -> JariError {
    tracing::error!(error = %e, "failed to open database");
    JariError::StorageCorrupt(e.to_string())
}

fn map_txn_err(e: redb::TransactionError) -> JariError {
    tracing::error!(error = %e, "failed to begin transaction");
    JariError::StorageCorrupt(e.to_string())
}

fn map_table_err(e: redb::TableError) -> JariError {
    tracing::error!(error = %e, "failed to open table");
    JariError::StorageCorrupt(e.to_string())
}

fn map_commit_err(e: redb::CommitError) -> JariError {
    tracing::error!(error = %e, "failed to commit transaction");
    JariError::StorageCorrupt(e.to_string())
}

fn map_storage_err(e: redb::StorageError) -> JariError {
    tracing::error!(error = %e, "storage operation failed");
    match e {
        redb::StorageError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::StorageFull => {
            JariError::StorageFull
        }
        other => JariError::StorageCorrupt(other.to_string()),
    }
}
