//! Field-level optimistic concurrency control for Jari
//!
//! This crate implements the write path described by the concurrency
//! engine: every agent carries a `PendingRead` recording the version it
//! last observed for a todo, and every `update` is reconciled against the
//! current committed record by the field-level diff in [`diff`] rather
//! than rejected outright on a version mismatch. Fields only the caller
//! touched are auto-merged; fields both sides touched to different values
//! are materialized as a [`jari_core::Conflict`] and left untouched until
//! [`manager::resolve`] is called.
//!
//! Dependency-cycle revalidation on `blocked_by` edges is **not** done
//! here — it requires the dependency graph, which this crate deliberately
//! does not depend on. The engine layer composes this crate's merge
//! outcome with the graph crate's cycle check before committing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod manager;

pub use diff::{apply_change, reconcile, MergeOutcome};
pub use manager::{record_read, resolve, update, UpdateOutcome};
