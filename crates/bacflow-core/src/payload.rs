use std::{ops::Deref, sync::Arc};

/// Payload is a reference-counted, sliceable service payload.
///
/// It holds an `Arc<[u8]>` plus a (start, len) view, so a large request can be
/// cut into segments and retransmitted any number of times without copying.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Payload {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl Payload {
    /// Creates a new Payload from a Vec by taking ownership.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let data: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = data.len();
        Self { data, start: 0, len }
    }

    /// Creates an empty payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a sub-slice view into the current buffer without copying.
    /// Panics if the requested range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start <= self.len, "slice start out of bounds");
        assert!(start + len <= self.len, "slice end out of bounds");
        Self { data: self.data.clone(), start: self.start + start, len }
    }

    /// Number of segments of `segment_size` bytes needed to carry this payload.
    ///
    /// An empty payload still travels in one (empty) segment.
    pub fn segment_count(&self, segment_size: usize) -> usize {
        debug_assert!(segment_size > 0);
        self.len.div_ceil(segment_size).max(1)
    }

    /// Returns segment `index` when the payload is cut into `segment_size` pieces.
    /// The last segment may be shorter; an index past the end yields an empty view.
    pub fn segment(&self, index: usize, segment_size: usize) -> Self {
        let start = (index * segment_size).min(self.len);
        let end = (start + segment_size).min(self.len);
        self.slice(start, end - start)
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for Payload {
    fn from(v: &[u8]) -> Self {
        Self::from_vec(v.to_vec())
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count() {
        let payload = Payload::from_vec(vec![0; 3000]);
        assert_eq!(payload.segment_count(500), 6);
        assert_eq!(payload.segment_count(480), 7);
        assert_eq!(Payload::empty().segment_count(500), 1);
    }

    #[test]
    fn test_segments_cover_payload() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1234).collect();
        let payload = Payload::from_vec(data.clone());
        let count = payload.segment_count(100);

        let mut joined = Vec::new();
        for index in 0..count {
            let segment = payload.segment(index, 100);
            assert!(segment.len() <= 100);
            joined.extend_from_slice(&segment);
        }
        assert_eq!(joined, data);
        assert_eq!(payload.segment(count - 1, 100).len(), 34);
    }

    #[test]
    fn test_slice_of_slice_shares_buffer() {
        let payload = Payload::from_vec(vec![1, 2, 3, 4, 5, 6]);
        let inner = payload.slice(1, 4).slice(1, 2);
        assert_eq!(inner.as_slice(), &[3, 4]);
    }
}
