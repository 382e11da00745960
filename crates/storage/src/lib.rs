//! Memory-mapped transactional storage engine for Jari
//!
//! `Store` is a single `redb` database file holding the named sub-stores
//! (todos, history, pending reads, conflicts, agents, the dependency
//! reverse-index, and a scalar counter). Every mutation happens inside one
//! `WriteTxn`, committed or aborted as a unit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod store;
pub mod tables;

pub use store::{ReadTxn, Store, WriteTxn};
