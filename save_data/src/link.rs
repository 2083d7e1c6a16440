//! External references carried by a node instead of inline content.

use std::fmt;

/// Generation-checked handle into a reference table.
///
/// Persisted as eight bytes: slot index then generation, both little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefHandle {
    pub index: u32,
    pub generation: u32,
}

impl RefHandle {
    pub const ENCODED_LEN: usize = 8;

    pub const fn new(index: u32, generation: u32) -> Self {
        RefHandle { index, generation }
    }

    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.index.to_le_bytes());
        out[4..].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    /// `None` unless `bytes` is exactly [`Self::ENCODED_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let index = u32::from_le_bytes(bytes[..4].try_into().ok()?);
        let generation = u32::from_le_bytes(bytes[4..].try_into().ok()?);
        Some(RefHandle { index, generation })
    }
}

impl fmt::Display for RefHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Owned copy of a node's external reference.
///
/// Obtained through [`SaveNode::link`](crate::SaveNode::link) so it can be
/// resolved after the borrow of the tree that held it has ended.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    Reference(RefHandle),
    Subfile(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_bytes() {
        let h = RefHandle::new(3, 0x0100);
        let bytes = h.to_bytes();
        assert_eq!(bytes, [3, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(RefHandle::from_bytes(&bytes), Some(h));
        assert_eq!(RefHandle::from_bytes(&bytes[..7]), None);
    }
}
