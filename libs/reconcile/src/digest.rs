//! Content digest of a snapshot.

use sha2::{Digest, Sha256};

use crate::model::Component;

/// SHA-256 over a canonical rendering of component rows.
///
/// Row order does not matter; any change to an id, name, type, description,
/// or liveness flag changes the digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotDigest(String);

impl SnapshotDigest {
    pub fn of(rows: &[Component]) -> Self {
        let mut lines: Vec<String> = rows.iter().map(canonical_row).collect();
        lines.sort();

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row as a JSON array; string escaping keeps field boundaries unambiguous.
fn canonical_row(row: &Component) -> String {
    serde_json::json!([
        row.id.to_string(),
        row.machine_id.to_string(),
        row.name,
        row.kind,
        row.description,
        row.active,
    ])
    .to_string()
}
