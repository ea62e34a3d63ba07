//! Store seam for the reconciler.
//!
//! The engine never owns connections. A [`ComponentStore`] hands out
//! snapshots and transactions; a [`ComponentTx`] carries the mutations of one
//! reconciliation call and is consumed by `commit` or `rollback`.
//! Implementations must roll back a transaction that is dropped without
//! either, so a cancelled call never leaves work applied.

use async_trait::async_trait;
use fleetsync_id::{ComponentId, MachineId};
use thiserror::Error;

use crate::diff::{Insert, Update};
use crate::model::Component;

/// Boxed error carried as the cause of a [`StoreError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] BoxError),

    /// The store was reached but refused or failed the operation.
    #[error("store rejected operation: {0}")]
    Rejected(#[source] BoxError),
}

impl StoreError {
    pub fn unavailable(cause: impl Into<BoxError>) -> Self {
        Self::Unavailable(cause.into())
    }

    pub fn rejected(cause: impl Into<BoxError>) -> Self {
        Self::Rejected(cause.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Read access and transaction acquisition.
#[async_trait]
pub trait ComponentStore: Send + Sync {
    type Tx: ComponentTx;

    /// Load every component row of a machine, live and deactivated.
    async fn load_components(&self, machine_id: MachineId) -> Result<Vec<Component>, StoreError>;

    /// Open a transaction for one reconciliation call.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Mutations within one transaction.
#[async_trait]
pub trait ComponentTx: Send {
    /// Insert a live component and return its new id.
    async fn insert_component(
        &mut self,
        machine_id: MachineId,
        insert: &Insert,
    ) -> Result<ComponentId, StoreError>;

    /// Refresh type and description and mark the row live.
    async fn update_component(
        &mut self,
        machine_id: MachineId,
        update: &Update,
    ) -> Result<(), StoreError>;

    /// Mark a row as no longer reported.
    async fn deactivate_component(
        &mut self,
        machine_id: MachineId,
        id: ComponentId,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
