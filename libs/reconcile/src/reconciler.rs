//! Transactional application of an action set.

use std::future::Future;
use std::time::Duration;

use fleetsync_id::{MachineId, TenantId};
use serde::Serialize;
use tokio::time::{error::Elapsed, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::diff::{classify, ActionSet, DeactivationPolicy};
use crate::digest::SnapshotDigest;
use crate::error::{ReconcileError, SyncPhase};
use crate::model::ReportedComponent;
use crate::snapshot::load_snapshot;
use crate::store::{ComponentStore, ComponentTx, StoreError};

/// A validated report from one machine.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub machine_id: MachineId,
    pub tenant_id: TenantId,
    pub components: Vec<ReportedComponent>,
}

/// Outcome of a committed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub machine_id: MachineId,
    pub tenant_id: TenantId,
    pub inserted: usize,

    /// Includes reactivations.
    pub updated: usize,
    pub reactivated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
}

impl ReconciliationResult {
    fn from_actions(machine_id: MachineId, tenant_id: TenantId, actions: &ActionSet) -> Self {
        Self {
            machine_id,
            tenant_id,
            inserted: actions.inserts.len(),
            updated: actions.updates.len(),
            reactivated: actions.reactivations(),
            deactivated: actions.deactivations.len(),
            unchanged: actions.unchanged,
        }
    }
}

/// Reconciles machine reports against a [`ComponentStore`].
///
/// Holds no state between calls; each call reads its own snapshot and owns
/// its own transaction.
///
/// With a timeout set, one deadline covers the whole call. Expiry before the
/// transaction opens is [`ReconcileError::StoreUnavailable`]; expiry after
/// drops the transaction and is [`ReconcileError::Failed`] at step `timeout`.
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    store: S,
    policy: DeactivationPolicy,
    timeout: Option<Duration>,
}

impl<S: ComponentStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: DeactivationPolicy::default(),
            timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: DeactivationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot, classify, and apply one machine report.
    #[instrument(
        skip_all,
        fields(
            machine_id = %request.machine_id,
            tenant_id = %request.tenant_id,
            reported = request.components.len(),
        )
    )]
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
    ) -> Result<ReconciliationResult, ReconcileError> {
        debug!(phase = %SyncPhase::Started, "Reconciliation started");
        let deadline = self.deadline();

        let snapshot = within(deadline, load_snapshot(&self.store, request.machine_id))
            .await
            .map_err(|elapsed| unavailable_before_tx(SyncPhase::Started, elapsed))??;
        debug!(
            phase = %SyncPhase::SnapshotLoaded,
            rows = snapshot.len(),
            digest = %SnapshotDigest::of(snapshot.rows()),
            "Snapshot loaded"
        );

        let actions = classify(&snapshot, &request.components, self.policy).map_err(|e| {
            error!(error = %e, "Classification failed");
            e
        })?;
        debug!(
            phase = %SyncPhase::Classified,
            deactivate = actions.deactivations.len(),
            update = actions.updates.len(),
            insert = actions.inserts.len(),
            unchanged = actions.unchanged,
            "Report classified"
        );

        self.apply_until(deadline, request.machine_id, request.tenant_id, &actions)
            .await
    }

    /// Apply an action set as one all-or-nothing transaction.
    ///
    /// On error the transaction has already been rolled back.
    pub async fn apply(
        &self,
        machine_id: MachineId,
        tenant_id: TenantId,
        actions: &ActionSet,
    ) -> Result<ReconciliationResult, ReconcileError> {
        self.apply_until(self.deadline(), machine_id, tenant_id, actions)
            .await
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    async fn apply_until(
        &self,
        deadline: Option<Instant>,
        machine_id: MachineId,
        tenant_id: TenantId,
        actions: &ActionSet,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let result = ReconciliationResult::from_actions(machine_id, tenant_id, actions);

        if actions.is_empty() {
            info!(unchanged = result.unchanged, "Components already in sync");
            return Ok(result);
        }

        let mut tx = within(deadline, self.store.begin())
            .await
            .map_err(|elapsed| unavailable_before_tx(SyncPhase::Classified, elapsed))?
            .map_err(ReconcileError::StoreUnavailable)?;

        debug!(phase = %SyncPhase::Applying, mutations = actions.len(), "Applying actions");

        let applied = match within(deadline, apply_actions(&mut tx, machine_id, actions)).await {
            Ok(applied) => applied,
            Err(elapsed) => return Err(abandon(tx, elapsed)),
        };

        if let Err((step, source)) = applied {
            error!(step = %step, error = %source, "Mutation failed, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback reported an error");
            }
            debug!(phase = %SyncPhase::RolledBack, "Transaction rolled back");
            return Err(ReconcileError::Failed { step, source });
        }

        match within(deadline, tx.commit()).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                error!(error = %source, "Commit failed");
                debug!(phase = %SyncPhase::RolledBack, "Transaction rolled back");
                return Err(ReconcileError::Failed {
                    step: "commit".to_string(),
                    source,
                });
            }
            Err(elapsed) => return Err(timed_out(elapsed)),
        }

        debug!(phase = %SyncPhase::Committed, "Transaction committed");
        info!(
            inserted = result.inserted,
            updated = result.updated,
            reactivated = result.reactivated,
            deactivated = result.deactivated,
            unchanged = result.unchanged,
            "Components reconciled"
        );

        Ok(result)
    }
}

async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output, Elapsed> {
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await,
        None => Ok(fut.await),
    }
}

/// Deadline hit while no transaction was open: nothing was mutated.
fn unavailable_before_tx(phase: SyncPhase, elapsed: Elapsed) -> ReconcileError {
    warn!(phase = %phase, "Deadline elapsed before a transaction was opened");
    ReconcileError::StoreUnavailable(StoreError::unavailable(elapsed))
}

/// Dropping the transaction rolls it back.
fn abandon<T: ComponentTx>(tx: T, elapsed: Elapsed) -> ReconcileError {
    drop(tx);
    timed_out(elapsed)
}

fn timed_out(elapsed: Elapsed) -> ReconcileError {
    error!("Deadline elapsed inside the transaction, abandoning it");
    debug!(phase = %SyncPhase::RolledBack, "Transaction rolled back");
    ReconcileError::Failed {
        step: "timeout".to_string(),
        source: StoreError::unavailable(elapsed),
    }
}

/// Issue every mutation, deactivations first. Stops at the first failure and
/// names the step that failed.
async fn apply_actions<T: ComponentTx>(
    tx: &mut T,
    machine_id: MachineId,
    actions: &ActionSet,
) -> Result<(), (String, StoreError)> {
    for deactivate in &actions.deactivations {
        tx.deactivate_component(machine_id, deactivate.id)
            .await
            .map_err(|e| (format!("deactivate component '{}'", deactivate.name), e))?;
        debug!(component = %deactivate.name, "Deactivated");
    }

    for update in &actions.updates {
        tx.update_component(machine_id, update)
            .await
            .map_err(|e| (format!("update component '{}'", update.name), e))?;
        if update.reactivates {
            debug!(component = %update.name, "Reactivated");
        } else {
            debug!(component = %update.name, "Updated");
        }
    }

    for insert in &actions.inserts {
        let id = tx
            .insert_component(machine_id, insert)
            .await
            .map_err(|e| (format!("insert component '{}'", insert.name), e))?;
        debug!(component = %insert.name, component_id = %id, "Inserted");
    }

    Ok(())
}
