use thiserror::Error;

/// Why a string is not a valid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    /// A well-formed identifier of another kind, e.g. a machine id where a
    /// tenant id was expected.
    #[error("expected a '{expected}_' identifier, found prefix '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("identifier has no '_' between prefix and ulid")]
    MissingSeparator,

    #[error("identifier has a malformed ulid: {0}")]
    InvalidUlid(String),
}

impl IdError {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}
