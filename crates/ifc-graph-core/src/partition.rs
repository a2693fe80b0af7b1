//! Order-preserving batch partitioning

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Which pipeline phase a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchDomain {
    /// Element records
    Elements,
    /// Generic relationship records
    Relationships,
}

impl BatchDomain {
    /// Domain label used in logs and progress reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elements => "elements",
            Self::Relationships => "relationships",
        }
    }
}

impl fmt::Display for BatchDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, non-overlapping slice of the input sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// Domain label
    pub domain: BatchDomain,
    /// Position of this batch in submission order
    pub index: usize,
    /// Offset of the first item in the original sequence
    pub offset: usize,
    /// Items, in input order
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the batch holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `items` into batches of at most `batch_size` items.
///
/// The concatenation of the returned batches equals the input exactly and
/// only the last batch may be shorter. An empty input yields no batches.
pub fn partition<T>(items: Vec<T>, batch_size: usize, domain: BatchDomain) -> Result<Vec<Batch<T>>> {
    if batch_size == 0 {
        return Err(Error::configuration("batch size must be greater than zero"));
    }

    let total = items.len();
    let mut batches = Vec::with_capacity(total.div_ceil(batch_size));
    let mut iter = items.into_iter();
    let mut offset = 0;

    while offset < total {
        let chunk: Vec<T> = iter.by_ref().take(batch_size).collect();
        batches.push(Batch {
            domain,
            index: batches.len(),
            offset,
            items: chunk,
        });
        offset += batch_size;
    }

    Ok(batches)
}
