//! Component inventory reconciliation.
//!
//! Machines periodically report the full list of components they carry. This
//! crate turns one such report into the smallest set of store mutations that
//! makes the persisted record match it:
//!
//! - **Snapshot**: every stored row for the machine, live or deactivated.
//! - **Classification**: each name becomes an insert, an update (which also
//!   covers reactivation), a deactivation, or nothing at all.
//! - **Application**: the resulting [`ActionSet`] is applied inside a single
//!   store transaction, which either commits whole or rolls back whole.
//!
//! # Invariants
//!
//! - A machine never sends deletions; absence from a report means deactivate.
//! - Rows are never physically deleted, so a returning component keeps its id.
//! - Reconciling the same report twice yields no mutations the second time.
//! - Classification is pure and deterministic given the same inputs.
//!
//! The store is reached only through [`ComponentStore`] and [`ComponentTx`],
//! so the engine holds no connection state of its own.

mod diff;
mod digest;
mod error;
mod model;
mod reconciler;
mod snapshot;
mod store;

pub use diff::{classify, ActionSet, Deactivate, DeactivationPolicy, Insert, Update};
pub use digest::SnapshotDigest;
pub use error::{ReconcileError, SyncPhase};
pub use model::{description_from_json, normalize_description, Component, ReportedComponent};
pub use reconciler::{ReconcileRequest, ReconciliationResult, Reconciler};
pub use snapshot::{load_snapshot, Snapshot};
pub use store::{BoxError, ComponentStore, ComponentTx, StoreError};
