//! Store boundary: failed store calls are logged by category and degrade to
//! an empty or zero result. An empty result from here means "unknown" as
//! often as it means "absent".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Insert,
    Delete,
    SelectAll,
    SelectChunk,
    SelectBox,
    Count,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::SelectAll => "select-all",
            Self::SelectChunk => "select-chunk",
            Self::SelectBox => "select-box",
            Self::Count => "count",
        };
        f.write_str(name)
    }
}

pub(crate) fn or_default<T: Default>(op: StoreOp, result: anyhow::Result<T>) -> T {
    result.unwrap_or_else(|e| {
        log::error!("{}: {:#}", op, e);
        T::default()
    })
}
