//! Borrowed view of a subfile that routes references to the root container.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use save_data::{Link, RefHandle, SaveNode};

use crate::error::{BigSaveError, Result};
use crate::file::{BigSave, Resolved, open_subfile};
use crate::reference::ReferenceTable;

/// A subfile together with the reference table of its root container.
///
/// Dereferences to the subfile's [`BigSave`] for tree access. The reference
/// methods here shadow the container's own, so a handle shared by the root
/// can be stored in and followed from any subfile beneath it.
///
/// ```rust
/// use big_save::{BigSave, BigSaveOptions, SaveNode};
///
/// let dir = tempfile::tempdir()?;
/// let mut save = BigSave::load(dir.path().join("slot"), BigSaveOptions::default())?;
/// let sword = save.share(SaveNode::string("sword"))?;
///
/// let mut world = save.subfile("world")?;
/// world.tree_mut("chest")?.key_mut("item")?.set_reference(sword);
/// assert_eq!(world.referenced(sword)?.as_str(), Some("sword"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Subfile<'a> {
    file: &'a mut BigSave,
    refs: &'a mut ReferenceTable,
    lineage: Vec<PathBuf>,
}

impl<'a> Subfile<'a> {
    pub(crate) fn new(
        file: &'a mut BigSave,
        refs: &'a mut ReferenceTable,
        lineage: Vec<PathBuf>,
    ) -> Self {
        Self {
            file,
            refs,
            lineage,
        }
    }

    /// Paths from the root container down to this subfile.
    pub fn lineage(&self) -> &[PathBuf] {
        &self.lineage
    }

    /// The root container's table.
    pub fn refs(&self) -> &ReferenceTable {
        &*self.refs
    }

    pub fn refs_mut(&mut self) -> &mut ReferenceTable {
        &mut *self.refs
    }

    /// Moves `node` into the root container's table.
    pub fn share(&mut self, node: SaveNode) -> Result<RefHandle> {
        self.refs.insert(node)
    }

    pub fn referenced(&self, handle: RefHandle) -> Result<&SaveNode> {
        self.refs.get(handle)
    }

    pub fn referenced_mut(&mut self, handle: RefHandle) -> Result<&mut SaveNode> {
        self.refs.get_mut(handle)
    }

    pub fn release(&mut self, handle: RefHandle) -> Result<SaveNode> {
        self.refs.release(handle)
    }

    pub fn deep_copy(&self, node: &SaveNode) -> Result<SaveNode> {
        self.refs.deep_copy(node)
    }

    /// Replaces tree `dst` of this subfile with a reference-free copy of
    /// tree `src`.
    pub fn copy_tree(&mut self, src: &str, dst: &str) -> Result<()> {
        let source = self
            .file
            .tree(src)
            .ok_or_else(|| BigSaveError::MissingTree(src.to_owned()))?;
        let copy = self.refs.deep_copy(source)?;
        self.file.insert_tree(dst, copy)?;
        Ok(())
    }

    /// Follows a link taken from a node of this subfile.
    pub fn resolve(&mut self, link: &Link) -> Result<Resolved<'_>> {
        match link {
            Link::Reference(handle) => Ok(Resolved::Node(self.refs.get_mut(*handle)?)),
            Link::Subfile(name) => Ok(Resolved::File(self.subfile(name)?)),
        }
    }

    /// Subfile `name` next to this one. It may not lead back to any
    /// container in the lineage.
    pub fn subfile(&mut self, name: &str) -> Result<Subfile<'_>> {
        let options = self.file.options();
        let lineage = self.lineage.clone();
        open_subfile(self.file.subfiles_mut(), self.refs, lineage, options, name)
    }
}

impl Deref for Subfile<'_> {
    type Target = BigSave;

    fn deref(&self) -> &BigSave {
        self.file
    }
}

impl DerefMut for Subfile<'_> {
    fn deref_mut(&mut self) -> &mut BigSave {
        self.file
    }
}
