/// Schedule-loop detection by identifier repetition.
///
/// A master cycles through its schedule table; the first identifier seen
/// twice marks the start of the next pass. The set of identifiers seen in
/// the current pass is a 64-bit bitset, one bit per possible identifier.
use crate::frame::Identifier;

#[derive(Debug, Clone, Default)]
pub struct LoopTracker {
    members: u64,
}

impl LoopTracker {
    pub const fn new() -> Self {
        Self { members: 0 }
    }

    #[inline]
    pub fn contains(&self, id: Identifier) -> bool {
        (self.members >> id.index()) & 1 == 1
    }

    /// Number of distinct identifiers seen in the current loop
    pub fn len(&self) -> u8 {
        self.members.count_ones() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Record `id`. If it was already seen in this loop, the loop is over:
    /// returns the size of the finished loop and starts a new one at `{id}`.
    pub fn observe(&mut self, id: Identifier) -> Option<u8> {
        let bit = 1u64 << id.index();
        if self.members & bit != 0 {
            let finished = self.len();
            self.members = bit;
            Some(finished)
        } else {
            self.members |= bit;
            None
        }
    }

    pub fn clear(&mut self) {
        self.members = 0;
    }
}
