//! Shared nodes owned by a root container.
//!
//! A node that more than one place must observe lives in a slot of the
//! [`ReferenceTable`]; trees hold a [`RefHandle`] to it. One table serves
//! the root container and every subfile opened beneath it. Handles carry
//! the slot generation, so a handle to a released slot stays stale even
//! after the slot is reused.

use save_data::{Children, Content, RefHandle, SaveDataError, SaveNode};

use crate::error::{BigSaveError, Result};
use crate::layout::{self, ParsedSlot};

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<SaveNode>,
}

#[derive(Debug, Default)]
pub struct ReferenceTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    dirty: bool,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `node` into a free slot and returns its handle.
    pub fn insert(&mut self, node: SaveNode) -> Result<RefHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index =
                    u32::try_from(self.slots.len()).map_err(|_| SaveDataError::LimitExceeded {
                        what: "reference slots",
                        limit: u32::MAX as u64,
                    })?;
                self.slots.push(Slot::default());
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.node = Some(node);
        self.live += 1;
        self.dirty = true;
        Ok(RefHandle::new(index, slot.generation))
    }

    pub fn get(&self, handle: RefHandle) -> Result<&SaveNode> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.node.as_ref())
            .ok_or(BigSaveError::DanglingReference(handle))
    }

    pub fn get_mut(&mut self, handle: RefHandle) -> Result<&mut SaveNode> {
        let node = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or(BigSaveError::DanglingReference(handle))?;
        self.dirty = true;
        Ok(node)
    }

    pub fn contains(&self, handle: RefHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Takes the node out of its slot. Every outstanding handle to it goes stale.
    pub fn release(&mut self, handle: RefHandle) -> Result<SaveNode> {
        let dangling = || BigSaveError::DanglingReference(handle);
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .ok_or_else(dangling)?;
        let node = slot.node.take().ok_or_else(dangling)?;

        // a slot whose generation would wrap is retired for good
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(handle.index);
        }
        self.live -= 1;
        self.dirty = true;
        Ok(node)
    }

    /// Number of live shared nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (RefHandle, &SaveNode)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            let node = slot.node.as_ref()?;
            Some((RefHandle::new(i as u32, slot.generation), node))
        })
    }

    // -------------------------------------------------------------------------
    // Copying
    // -------------------------------------------------------------------------

    /// Copy of `src` with every reference replaced by a copy of its target.
    ///
    /// The result shares nothing with the table. Subfile links are copied
    /// by name; the file itself is not duplicated.
    pub fn deep_copy(&self, src: &SaveNode) -> Result<SaveNode> {
        self.detach(src, &mut Vec::new())
    }

    /// Replaces `dst` with a deep copy of `src`.
    pub fn copy(&self, dst: &mut SaveNode, src: &SaveNode) -> Result<()> {
        *dst = self.deep_copy(src)?;
        Ok(())
    }

    fn detach(&self, src: &SaveNode, path: &mut Vec<RefHandle>) -> Result<SaveNode> {
        match src.content() {
            Content::Reference(handle) => {
                if path.contains(handle) {
                    return Err(BigSaveError::ReferenceCycle(*handle));
                }
                let target = self.get(*handle)?;
                path.push(*handle);
                let copy = self.detach(target, path);
                path.pop();
                copy
            }
            Content::Children(children) => {
                let copied = match children {
                    Children::StringMap(m) => Children::StringMap(
                        m.iter()
                            .map(|(k, v)| Ok((k.clone(), self.detach(v, path)?)))
                            .collect::<Result<_>>()?,
                    ),
                    Children::AddressMap(m) => Children::AddressMap(
                        m.iter()
                            .map(|(k, v)| Ok((*k, self.detach(v, path)?)))
                            .collect::<Result<_>>()?,
                    ),
                    Children::ShortMap(m) => Children::ShortMap(
                        m.iter()
                            .map(|(k, v)| Ok((*k, self.detach(v, path)?)))
                            .collect::<Result<_>>()?,
                    ),
                    Children::List(v) => Children::List(
                        v.iter().map(|c| self.detach(c, path)).collect::<Result<_>>()?,
                    ),
                    Children::WideList(v) => Children::WideList(
                        v.iter().map(|c| self.detach(c, path)).collect::<Result<_>>()?,
                    ),
                };
                Ok(SaveNode::from_children(copied)?)
            }
            _ => Ok(src.clone()),
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn write_slots(&self, out: &mut Vec<u8>) -> Result<()> {
        for slot in &self.slots {
            layout::write_slot(out, slot.generation, slot.node.as_ref())?;
        }
        Ok(())
    }

    /// Rebuilds the slot array from a loaded body.
    pub(crate) fn restore(&mut self, parsed: Vec<ParsedSlot>) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        for (i, p) in parsed.into_iter().enumerate() {
            match &p.node {
                Some(_) => self.live += 1,
                None if p.generation != u32::MAX => self.free.push(i as u32),
                None => {}
            }
            self.slots.push(Slot {
                generation: p.generation,
                node: p.node,
            });
        }
        // pop hands out the lowest free index first
        self.free.reverse();
        self.dirty = false;
    }

    /// Forgets every slot.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handle_goes_stale_after_reuse() {
        let mut table = ReferenceTable::new();
        let first = table.insert(SaveNode::from_scalar(1u8)).unwrap();
        table.release(first).unwrap();

        let second = table.insert(SaveNode::from_scalar(2u8)).unwrap();
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(matches!(
            table.get(first),
            Err(BigSaveError::DanglingReference(h)) if h == first
        ));
        assert_eq!(table.get(second).unwrap().get::<u8>().unwrap(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn double_release_fails() {
        let mut table = ReferenceTable::new();
        let h = table.insert(SaveNode::new()).unwrap();
        table.release(h).unwrap();
        assert!(table.release(h).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn deep_copy_materializes_references() {
        let mut table = ReferenceTable::new();
        let shared = table.insert(SaveNode::from_scalar(7u32)).unwrap();

        let mut tree = SaveNode::new();
        tree.key_mut("a").unwrap().set_reference(shared);
        tree.key_mut("b").unwrap().set_reference(shared);

        let copy = table.deep_copy(&tree).unwrap();
        assert_eq!(copy["a"].get::<u32>().unwrap(), 7);
        assert_eq!(copy["b"].get::<u32>().unwrap(), 7);
        assert!(copy["a"].reference().is_none());
    }

    #[test]
    fn deep_copy_detects_cycles() {
        let mut table = ReferenceTable::new();
        let h = table.insert(SaveNode::new()).unwrap();
        let node = table.get_mut(h).unwrap();
        node.key_mut("self").unwrap().set_reference(h);

        let root = SaveNode::referenced(h);
        assert!(matches!(
            table.deep_copy(&root),
            Err(BigSaveError::ReferenceCycle(c)) if c == h
        ));
    }

    #[test]
    fn restore_reuses_lowest_free_slot() {
        let mut table = ReferenceTable::new();
        let slot = |generation, node| ParsedSlot { generation, node };
        let parsed = vec![slot(4, None), slot(0, Some(SaveNode::new())), slot(2, None)];
        table.restore(parsed);
        assert_eq!(table.len(), 1);
        assert_eq!(table.insert(SaveNode::new()).unwrap(), RefHandle::new(0, 4));
        assert_eq!(table.insert(SaveNode::new()).unwrap(), RefHandle::new(2, 2));
        assert_eq!(table.insert(SaveNode::new()).unwrap(), RefHandle::new(3, 0));
    }
}
