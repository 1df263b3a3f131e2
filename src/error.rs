//! Tag Subsystem Errors
//!
//! One error type for the registry, the tag store persistence and the
//! audit queries. Validation kinds are raised locally; storage kinds are
//! passed through unmodified so callers can retry.

use thiserror::Error;

pub type TagResult<T> = Result<T, TagError>;

#[derive(Debug, Error)]
pub enum TagError {
    /// Empty definition name, or a name reserved for a control tag.
    #[error("invalid tag definition name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("tag definition '{0}' already exists")]
    AlreadyExists(String),

    #[error("tag definition '{0}' not found")]
    NotFound(String),

    /// Control tag definitions cannot be deleted.
    #[error("tag definition '{0}' is reserved for a control tag")]
    Reserved(String),

    #[error("tag definition '{name}' is still referenced by {references} tag(s)")]
    InUse { name: String, references: i64 },

    #[error("no tag definition named '{0}'")]
    DefinitionMissing(String),

    #[error("object {object_id} ({object_type}) is already tagged with '{name}'")]
    AlreadyTagged {
        object_id: String,
        object_type: String,
        name: String,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The blocking storage task was cancelled or panicked.
    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl TagError {
    /// Storage failures are transient from the caller's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TagError::Storage(_) | TagError::Worker(_))
    }

    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        TagError::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}

/// True when the error is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
