//! Component records as stored and as reported.

use fleetsync_id::{ComponentId, MachineId};
use serde::Serialize;

use crate::error::ReconcileError;

/// A persisted component row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Assigned by the store on insert; stable for the life of the row.
    pub id: ComponentId,

    /// Owning machine.
    pub machine_id: MachineId,

    /// Natural key within the machine. Case-sensitive.
    pub name: String,

    /// Free-form classification such as "cpu" or "disk".
    #[serde(rename = "type")]
    pub kind: String,

    /// Normalized description, `None` when absent.
    pub description: Option<String>,

    /// Whether the machine still reports this component.
    pub active: bool,
}

/// One entry of a machine's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedComponent {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

impl ReportedComponent {
    /// Build a reported component, normalizing its description.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: Option<impl Into<String>>,
    ) -> Self {
        let description: Option<String> = description.map(Into::into);
        let description =
            description.filter(|d| normalize_description(Some(d.as_str())).is_some());
        Self {
            name: name.into(),
            kind: kind.into(),
            description,
        }
    }
}

/// Canonical form of a description for storage and comparison.
///
/// Absent and empty descriptions both collapse to `None`.
pub fn normalize_description(description: Option<&str>) -> Option<&str> {
    description.filter(|d| !d.is_empty())
}

/// Coerce a wire-level description into its string form.
///
/// Strings are kept verbatim, numbers and booleans become their JSON text,
/// and `null` or `""` become `None`. Arrays and objects are rejected.
pub fn description_from_json(
    value: Option<&serde_json::Value>,
) -> Result<Option<String>, ReconcileError> {
    let text = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => {
            let kind = if other.is_array() { "array" } else { "object" };
            return Err(ReconcileError::Validation(format!(
                "component description must be a scalar, got {kind}"
            )));
        }
    };

    Ok(normalize_description(Some(&text)).map(str::to_string))
}
