use thiserror::Error;

use crate::btree::BTreeError;
use crate::file::FileError;

/// Statement-level error kinds
///
/// Every kind is fatal to the statement that raised it and recoverable at
/// the session level.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("no database selected")]
    NoDatabase,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("file error: {0}")]
    Io(FileError),

    #[error("overflow: {0}")]
    Overflow(String),
}

impl From<FileError> for DbError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::TooManyOpenFiles => {
                DbError::Overflow("open file limit reached".to_string())
            }
            other => DbError::Io(other),
        }
    }
}

impl From<BTreeError> for DbError {
    fn from(err: BTreeError) -> Self {
        match err {
            BTreeError::File(e) => e.into(),
            BTreeError::FanoutTooSmall { key_size } => {
                DbError::Overflow(format!("b-tree fanout below 2 for key size {}", key_size))
            }
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io(FileError::Io(err))
    }
}

pub type DbResult<T> = Result<T, DbError>;
