//! Diff engine: classify a report against a snapshot.

use std::collections::{HashMap, HashSet};

use fleetsync_id::ComponentId;

use crate::error::ReconcileError;
use crate::model::{normalize_description, ReportedComponent};
use crate::snapshot::Snapshot;

/// How to treat stored rows that are absent from the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeactivationPolicy {
    /// Only deactivate rows that are still live.
    #[default]
    SkipInactive,

    /// Deactivate every absent row, including ones already inactive.
    Always,
}

/// A component seen for the first time on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

/// Refresh of a stored row. Always leaves the row live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub id: ComponentId,
    pub name: String,
    pub kind: String,
    pub description: Option<String>,

    /// The stored row was inactive before this update.
    pub reactivates: bool,
}

/// A stored row the machine no longer reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deactivate {
    pub id: ComponentId,
    pub name: String,
}

/// Mutations needed to bring one machine's rows in line with its report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub deactivations: Vec<Deactivate>,
    pub updates: Vec<Update>,
    pub inserts: Vec<Insert>,

    /// Reported names that already match their live row.
    pub unchanged: usize,
}

impl ActionSet {
    /// Number of store mutations.
    pub fn len(&self) -> usize {
        self.deactivations.len() + self.updates.len() + self.inserts.len()
    }

    /// Returns true if the store already matches the report.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reactivations(&self) -> usize {
        self.updates.iter().filter(|u| u.reactivates).count()
    }
}

/// Classify every name in `snapshot` and `reported` into exactly one action.
///
/// Duplicate names in `reported` collapse to their last occurrence, keeping
/// the position of the first. Fails only if the snapshot holds a row of a
/// different machine.
pub fn classify(
    snapshot: &Snapshot,
    reported: &[ReportedComponent],
    policy: DeactivationPolicy,
) -> Result<ActionSet, ReconcileError> {
    if let Some(foreign) = snapshot
        .rows()
        .iter()
        .find(|row| row.machine_id != snapshot.machine_id())
    {
        return Err(ReconcileError::Internal(format!(
            "snapshot for {} contains component {} of {}",
            snapshot.machine_id(),
            foreign.id,
            foreign.machine_id
        )));
    }

    let reported = last_occurrences(reported);
    let reported_names: HashSet<&str> = reported.iter().map(|c| c.name.as_str()).collect();

    let mut actions = ActionSet::default();

    for row in snapshot.rows() {
        if reported_names.contains(row.name.as_str()) {
            continue;
        }
        if !row.active && policy == DeactivationPolicy::SkipInactive {
            continue;
        }
        actions.deactivations.push(Deactivate {
            id: row.id,
            name: row.name.clone(),
        });
    }

    for component in reported {
        let description = normalize_description(component.description.as_deref());

        let Some(stored) = snapshot.get(&component.name) else {
            actions.inserts.push(Insert {
                name: component.name.clone(),
                kind: component.kind.clone(),
                description: description.map(str::to_string),
            });
            continue;
        };

        let changed = stored.kind != component.kind
            || normalize_description(stored.description.as_deref()) != description;

        if changed || !stored.active {
            actions.updates.push(Update {
                id: stored.id,
                name: component.name.clone(),
                kind: component.kind.clone(),
                description: description.map(str::to_string),
                reactivates: !stored.active,
            });
        } else {
            actions.unchanged += 1;
        }
    }

    Ok(actions)
}

fn last_occurrences(reported: &[ReportedComponent]) -> Vec<&ReportedComponent> {
    let mut ordered: Vec<&ReportedComponent> = Vec::with_capacity(reported.len());
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(reported.len());

    for component in reported {
        match position.get(component.name.as_str()) {
            Some(&i) => ordered[i] = component,
            None => {
                position.insert(component.name.as_str(), ordered.len());
                ordered.push(component);
            }
        }
    }

    ordered
}
