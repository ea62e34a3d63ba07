//! Snapshot of a machine's persisted components.

use std::collections::HashMap;

use fleetsync_id::MachineId;
use tracing::{debug, instrument};

use crate::error::ReconcileError;
use crate::model::Component;
use crate::store::ComponentStore;

/// All stored rows of one machine, indexed by component name.
///
/// Holds deactivated rows too, so a returning name can be told apart from a
/// new one. If storage ever holds two rows with the same name, the later one
/// wins the index.
#[derive(Debug, Clone)]
pub struct Snapshot {
    machine_id: MachineId,
    rows: Vec<Component>,
    by_name: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new(machine_id: MachineId, rows: Vec<Component>) -> Self {
        let by_name = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.name.clone(), i))
            .collect();
        Self {
            machine_id,
            rows,
            by_name,
        }
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine_id
    }

    /// Rows in the order the store returned them.
    pub fn rows(&self) -> &[Component] {
        &self.rows
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.by_name.get(name).map(|&i| &self.rows[i])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Names of rows currently marked live.
    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter(|row| row.active)
            .map(|row| row.name.as_str())
    }

    pub fn into_rows(self) -> Vec<Component> {
        self.rows
    }
}

/// Load the snapshot for a machine.
///
/// Store failures surface as [`ReconcileError::StoreUnavailable`] and are not
/// retried here.
#[instrument(skip_all, fields(machine_id = %machine_id))]
pub async fn load_snapshot<S: ComponentStore>(
    store: &S,
    machine_id: MachineId,
) -> Result<Snapshot, ReconcileError> {
    let rows = store
        .load_components(machine_id)
        .await
        .map_err(ReconcileError::StoreUnavailable)?;

    debug!(rows = rows.len(), "Loaded component snapshot");
    Ok(Snapshot::new(machine_id, rows))
}
