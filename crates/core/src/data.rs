//! Member data — an item's opaque persistent payload
//!
//! The task layer never interprets item payloads; it only moves them
//! between the live item and the persistence layer, sizes them for quota
//! accounting, and snapshots them when concurrent mutation could race with
//! a physical write. `MemberData` is that payload: an ordered sequence of
//! opaque byte slices.
//!
//! Tasks hand `Arc<MemberData>` around so that snapshot identity (a shared
//! reference versus a defensive copy) stays observable via `Arc::ptr_eq`.

use serde::{Deserialize, Serialize};

/// An item's opaque persistent payload: an ordered sequence of byte slices
///
/// The slice boundaries are meaningful to the item implementation (header
/// versus body, for example) and are preserved through persistence, so the
/// sequence is ordered and never flattened here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberData(Vec<Vec<u8>>);

impl MemberData {
    /// Create an empty payload
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append one slice to the payload
    pub fn push(&mut self, slice: Vec<u8>) {
        self.0.push(slice);
    }

    /// Number of slices in the payload
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the payload has no slices
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total payload size in bytes, summed across all slices
    pub fn byte_size(&self) -> u64 {
        self.0.iter().map(|s| s.len() as u64).sum()
    }

    /// Iterate over the slices in order
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|s| s.as_slice())
    }

    /// Borrow the slices as a contiguous list
    pub fn slices(&self) -> &[Vec<u8>] {
        &self.0
    }
}

impl From<Vec<Vec<u8>>> for MemberData {
    fn from(slices: Vec<Vec<u8>>) -> Self {
        Self(slices)
    }
}

impl From<Vec<u8>> for MemberData {
    fn from(slice: Vec<u8>) -> Self {
        Self(vec![slice])
    }
}

impl From<&[u8]> for MemberData {
    fn from(slice: &[u8]) -> Self {
        Self(vec![slice.to_vec()])
    }
}

impl FromIterator<Vec<u8>> for MemberData {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
