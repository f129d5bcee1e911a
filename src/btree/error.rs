use thiserror::Error;

use crate::file::FileError;

/// Errors raised by the disk-resident B-tree
#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("file error: {0}")]
    File(#[from] FileError),

    #[error("fanout below 2 for key size {key_size}")]
    FanoutTooSmall { key_size: usize },
}

pub type BTreeResult<T> = Result<T, BTreeError>;
