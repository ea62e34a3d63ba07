//! Reconciliation errors and lifecycle phases.

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// Reconciliation errors.
///
/// Every variant is raised only after the store has been left untouched or
/// rolled back; none implies a partially applied report.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed or missing request fields. Detected before any store access.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Snapshot read or transaction acquisition failed. Nothing was mutated.
    #[error("component store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A mutation or the commit failed; the transaction was rolled back.
    #[error("reconciliation failed at {step}: {source}")]
    Failed {
        step: String,
        #[source]
        source: StoreError,
    },

    /// Unexpected fault during classification (a logic defect, not bad data).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Failed { .. } => "reconciliation_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns true if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Failed { .. })
    }
}

/// Lifecycle of one reconciliation call.
///
/// `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Started,
    SnapshotLoaded,
    Classified,
    Applying,
    Committed,
    RolledBack,
}

impl SyncPhase {
    /// Returns true for phases no call can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::SnapshotLoaded => "snapshot_loaded",
            Self::Classified => "classified",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ReconcileError::Validation("x".into()).code(),
            "validation_error"
        );
        assert_eq!(
            ReconcileError::StoreUnavailable(StoreError::unavailable("down")).code(),
            "store_unavailable"
        );
        assert_eq!(ReconcileError::Internal("x".into()).code(), "internal_error");
    }

    #[test]
    fn test_failed_message_names_step() {
        let err = ReconcileError::Failed {
            step: "insert component 'ram'".to_string(),
            source: StoreError::rejected("duplicate key"),
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "reconciliation failed at insert component 'ram': store rejected operation: duplicate key"
        );
    }

    #[test]
    fn test_terminal_phases() {
        assert!(SyncPhase::Committed.is_terminal());
        assert!(SyncPhase::RolledBack.is_terminal());
        assert!(!SyncPhase::Applying.is_terminal());
        assert_eq!(SyncPhase::SnapshotLoaded.to_string(), "snapshot_loaded");
    }
}
