//! Test doubles for component reconciliation.
//!
//! [`MemoryComponentStore`] behaves like a transactional store: mutations are
//! staged inside a [`MemoryTx`] and only become visible on commit. A
//! transaction dropped without commit leaves the store untouched, the same way
//! a database rolls back an abandoned transaction.
//!
//! Faults can be injected at every boundary the reconciler crosses: snapshot
//! load, transaction begin, the Nth mutation, commit, and rollback.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fleetsync_id::{ComponentId, MachineId};
use fleetsync_reconcile::{Component, ComponentStore, ComponentTx, Insert, StoreError, Update};

/// Counters of transaction activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loads: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,

    /// Transactions dropped without commit or rollback.
    pub abandoned: usize,

    /// Mutations issued, including ones later rolled back.
    pub mutations: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    load_unavailable: bool,
    stall_loads: bool,
    begin_unavailable: bool,
    fail_mutation: Option<usize>,
    stall_mutation: Option<usize>,
    fail_commit: bool,
    fail_rollback: bool,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<Component>,
    faults: Faults,
    stats: StoreStats,
}

/// In-memory [`ComponentStore`] with fault injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryComponentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Component>) -> Self {
        let store = Self::new();
        store.lock().rows = rows;
        store
    }

    /// All committed rows, across machines.
    pub fn rows(&self) -> Vec<Component> {
        self.lock().rows.clone()
    }

    /// Committed rows of one machine.
    pub fn rows_for(&self, machine_id: MachineId) -> Vec<Component> {
        self.lock()
            .rows
            .iter()
            .filter(|row| row.machine_id == machine_id)
            .cloned()
            .collect()
    }

    /// Committed row of one machine by name.
    pub fn find(&self, machine_id: MachineId, name: &str) -> Option<Component> {
        self.lock()
            .rows
            .iter()
            .find(|row| row.machine_id == machine_id && row.name == name)
            .cloned()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Make snapshot loads fail as unreachable.
    pub fn fail_loads(&self) {
        self.lock().faults.load_unavailable = true;
    }

    /// Never complete snapshot loads.
    pub fn stall_loads(&self) {
        self.lock().faults.stall_loads = true;
    }

    /// Make transaction acquisition fail as unreachable.
    pub fn fail_begin(&self) {
        self.lock().faults.begin_unavailable = true;
    }

    /// Reject the `n`th mutation (1-based) of every later transaction.
    pub fn fail_on_mutation(&self, n: usize) {
        self.lock().faults.fail_mutation = Some(n);
    }

    /// Never complete the `n`th mutation (1-based) of every later transaction.
    pub fn stall_on_mutation(&self, n: usize) {
        self.lock().faults.stall_mutation = Some(n);
    }

    pub fn fail_commit(&self) {
        self.lock().faults.fail_commit = true;
    }

    /// Make explicit rollbacks report an error. Staged changes are still
    /// discarded.
    pub fn fail_rollback(&self) {
        self.lock().faults.fail_rollback = true;
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ComponentStore for MemoryComponentStore {
    type Tx = MemoryTx;

    async fn load_components(&self, machine_id: MachineId) -> Result<Vec<Component>, StoreError> {
        if self.lock().faults.stall_loads {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        if inner.faults.load_unavailable {
            return Err(StoreError::unavailable("injected: store unreachable"));
        }
        inner.stats.loads += 1;
        Ok(inner
            .rows
            .iter()
            .filter(|row| row.machine_id == machine_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let mut inner = self.lock();
        if inner.faults.begin_unavailable {
            return Err(StoreError::unavailable("injected: no connection available"));
        }
        inner.stats.begins += 1;
        Ok(MemoryTx {
            store: Arc::clone(&self.inner),
            staged: inner.rows.clone(),
            touched: HashSet::new(),
            mutations: 0,
            faults: inner.faults,
            finished: false,
        })
    }
}

/// Transaction over a [`MemoryComponentStore`].
#[derive(Debug)]
pub struct MemoryTx {
    store: Arc<Mutex<Inner>>,
    staged: Vec<Component>,
    touched: HashSet<MachineId>,
    mutations: usize,
    faults: Faults,
    finished: bool,
}

impl MemoryTx {
    async fn next_mutation(&mut self) -> Result<(), StoreError> {
        self.mutations += 1;
        lock(&self.store).stats.mutations += 1;

        if self.faults.stall_mutation == Some(self.mutations) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail_mutation == Some(self.mutations) {
            return Err(StoreError::rejected(format!(
                "injected: mutation {} failed",
                self.mutations
            )));
        }
        Ok(())
    }

    fn staged_row(
        &mut self,
        machine_id: MachineId,
        id: ComponentId,
    ) -> Result<&mut Component, StoreError> {
        self.staged
            .iter_mut()
            .find(|row| row.id == id && row.machine_id == machine_id)
            .ok_or_else(|| StoreError::rejected(format!("no component {id} on {machine_id}")))
    }
}

#[async_trait]
impl ComponentTx for MemoryTx {
    async fn insert_component(
        &mut self,
        machine_id: MachineId,
        insert: &Insert,
    ) -> Result<ComponentId, StoreError> {
        self.next_mutation().await?;

        if self
            .staged
            .iter()
            .any(|row| row.machine_id == machine_id && row.name == insert.name)
        {
            return Err(StoreError::rejected(format!(
                "duplicate component name '{}' on {machine_id}",
                insert.name
            )));
        }

        let id = ComponentId::new();
        self.staged.push(Component {
            id,
            machine_id,
            name: insert.name.clone(),
            kind: insert.kind.clone(),
            description: insert.description.clone(),
            active: true,
        });
        self.touched.insert(machine_id);
        Ok(id)
    }

    async fn update_component(
        &mut self,
        machine_id: MachineId,
        update: &Update,
    ) -> Result<(), StoreError> {
        self.next_mutation().await?;

        let row = self.staged_row(machine_id, update.id)?;
        row.kind = update.kind.clone();
        row.description = update.description.clone();
        row.active = true;
        self.touched.insert(machine_id);
        Ok(())
    }

    async fn deactivate_component(
        &mut self,
        machine_id: MachineId,
        id: ComponentId,
    ) -> Result<(), StoreError> {
        self.next_mutation().await?;

        self.staged_row(machine_id, id)?.active = false;
        self.touched.insert(machine_id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        let mut inner = lock(&self.store);

        if self.faults.fail_commit {
            inner.stats.rollbacks += 1;
            return Err(StoreError::rejected("injected: commit failed"));
        }

        // Last writer wins per machine.
        let touched = &self.touched;
        inner.rows.retain(|row| !touched.contains(&row.machine_id));
        inner.rows.extend(
            self.staged
                .iter()
                .filter(|row| touched.contains(&row.machine_id))
                .cloned(),
        );
        inner.stats.commits += 1;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        lock(&self.store).stats.rollbacks += 1;
        if self.faults.fail_rollback {
            return Err(StoreError::unavailable("injected: rollback failed"));
        }
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.store).stats.abandoned += 1;
        }
    }
}

/// Build a stored component row.
pub fn component(
    machine_id: MachineId,
    name: &str,
    kind: &str,
    description: Option<&str>,
    active: bool,
) -> Component {
    Component {
        id: ComponentId::new(),
        machine_id,
        name: name.to_string(),
        kind: kind.to_string(),
        description: description.map(str::to_string),
        active,
    }
}
