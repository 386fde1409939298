/// Last-seen frame per identifier and the new/changed/unchanged differ.
///
/// One slot per possible identifier, indexed directly by [`Identifier`], so
/// the table can never fill up and never needs eviction.
use crate::frame::{Frame, Identifier};

/// Result of comparing a frame against memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// First time this identifier was seen
    New,
    /// Same identifier, different content. Carries the value it replaced.
    Changed { previous: Frame },
    /// Byte-for-byte identical to the stored frame
    Unchanged,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Changed { .. } => "changed",
            Classification::Unchanged => "unchanged",
        }
    }
}

pub struct FrameMemory {
    slots: [Option<Frame>; Identifier::COUNT],
}

impl FrameMemory {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; Identifier::COUNT],
        }
    }

    pub fn get(&self, id: Identifier) -> Option<&Frame> {
        self.slots[id.index()].as_ref()
    }

    /// Number of identifiers that have been seen
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Stored frames in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.slots.iter().flatten()
    }

    /// Compare `frame` with the stored value for its identifier and store it.
    pub fn classify(&mut self, frame: &Frame) -> Classification {
        let slot = &mut self.slots[frame.id.index()];
        match slot.as_mut() {
            None => {
                *slot = Some(frame.clone());
                Classification::New
            }
            Some(stored) if *stored == *frame => Classification::Unchanged,
            Some(stored) => {
                let previous = core::mem::replace(stored, frame.clone());
                Classification::Changed { previous }
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for FrameMemory {
    fn default() -> Self {
        Self::new()
    }
}
