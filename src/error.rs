//! Error types.

use thiserror::Error;

use crate::addr::Pos;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from arena management and tree audits.
///
/// Engine outcomes such as "duplicate key" or "not found" are not errors;
/// they are reported through `bool` and `Option` results.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arena out of space: requested {requested} bytes, capacity {capacity}")]
    OutOfSpace { requested: usize, capacity: usize },

    #[error("not an arena: bad magic")]
    BadMagic,

    #[error("arena truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("arena header corrupted: {0}")]
    CorruptHeader(String),

    #[error("node {node} is out of order")]
    OutOfOrder { node: Pos },

    #[error("node {node} stores balance {stored}, subtree heights give {actual}")]
    BalanceMismatch { node: Pos, stored: i8, actual: i64 },

    #[error("node {node} is unbalanced ({balance})")]
    Unbalanced { node: Pos, balance: i8 },

    #[error("tree deeper than {limit} levels")]
    TooDeep { limit: usize },
}
