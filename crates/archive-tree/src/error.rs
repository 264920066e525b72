use archive_types::{ResourceId, ResourcePath, TypeError};
use rusqlite::ffi;
use rusqlite::ErrorCode;

/// Errors from resource tree operations.
///
/// `NotFound` and `PathNotFound` are soft outcomes: the target is absent and
/// nothing changed. Every other variant is a hard failure that aborted the
/// enclosing transaction.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// No resource has this id.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// The path does not resolve to a resource.
    #[error("path not found: {0}")]
    PathNotFound(ResourcePath),

    /// A create or move named a parent that does not exist.
    #[error("parent resource not found: {0}")]
    ParentNotFound(ResourceId),

    /// The database rejected a write for referential integrity.
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// The destination is a moved resource or lies underneath one.
    #[error("cannot move '{moved}' into its own subtree '{destination}'")]
    CyclicMove {
        moved: ResourcePath,
        destination: ResourcePath,
    },

    /// Primary-key or uniqueness collision.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Caller-supplied value failed validation (names, kinds, ids).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] TypeError),

    /// Parentage read back from the store is cyclic or dangling.
    #[error("corrupt tree at resource {id}: {reason}")]
    CorruptTree { id: ResourceId, reason: String },

    /// A stored row could not be decoded.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// The caller cancelled the operation; the transaction was rolled back.
    #[error("operation cancelled")]
    Cancelled,

    /// The backing database failed or is unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeError {
    /// `true` for "target absent" outcomes, `false` for hard failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PathNotFound(_))
    }
}

impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let detail = msg.clone().unwrap_or_else(|| e.to_string());
                match (e.code, e.extended_code) {
                    (ErrorCode::OperationInterrupted, _) => Self::Cancelled,
                    (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                        Self::ForeignKeyViolation(detail)
                    }
                    (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
                    | (ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                        Self::AlreadyExists(detail)
                    }
                    _ => Self::StoreUnavailable(err),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(column, _, cause) => {
                Self::InvalidData(format!("column {column}: {cause}"))
            }
            _ => Self::StoreUnavailable(err),
        }
    }
}

/// Convenience alias used throughout the tree crate.
pub type TreeResult<T> = Result<T, TreeError>;
