use bacflow_core::{
    constants::INVOKE_ID_SPACE,
    error::{ErrorKind, Result},
};
use bacflow_protocol::InvokeId;

/// Issues invoke ids that are unique among the open transactions of one node.
///
/// Allocation scans forward from the id issued last and wraps at 256, so a
/// released id is not handed out again until the rest of the space has been
/// tried. Ids are tracked in a 256-bit set.
#[derive(Debug, Clone)]
pub struct InvokeIdAllocator {
    in_use: [u64; 4],
    next: u8,
    outstanding: usize,
}

impl Default for InvokeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokeIdAllocator {
    /// Creates an allocator with every id free; the first id issued is 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates an allocator whose first scan starts at `first`.
    pub fn starting_at(first: InvokeId) -> Self {
        Self { in_use: [0; 4], next: first, outstanding: 0 }
    }

    /// Returns an unused id, or `NoAvailableInvokeId` when all 256 are outstanding.
    pub fn allocate(&mut self) -> Result<InvokeId> {
        if self.outstanding == INVOKE_ID_SPACE {
            return Err(ErrorKind::NoAvailableInvokeId);
        }
        let mut candidate = self.next;
        while self.is_outstanding(candidate) {
            candidate = candidate.wrapping_add(1);
        }
        self.mark(candidate, true);
        self.outstanding += 1;
        self.next = candidate.wrapping_add(1);
        Ok(candidate)
    }

    /// Returns `id` to the free set. Returns false if it was not outstanding.
    pub fn release(&mut self, id: InvokeId) -> bool {
        if !self.is_outstanding(id) {
            return false;
        }
        self.mark(id, false);
        self.outstanding -= 1;
        true
    }

    /// Returns true if `id` belongs to an open transaction.
    pub fn is_outstanding(&self, id: InvokeId) -> bool {
        let (word, bit) = Self::position(id);
        self.in_use[word] & bit != 0
    }

    /// Number of ids currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn mark(&mut self, id: InvokeId, used: bool) {
        let (word, bit) = Self::position(id);
        if used {
            self.in_use[word] |= bit;
        } else {
            self.in_use[word] &= !bit;
        }
    }

    #[inline]
    fn position(id: InvokeId) -> (usize, u64) {
        ((id / 64) as usize, 1u64 << (id % 64))
    }
}
