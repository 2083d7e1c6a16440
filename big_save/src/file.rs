//! The `.sav` container: named trees plus a reference table, stored as one
//! hashed file.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use blake3::Hash;
use save_data::{Link, RefHandle, SaveDataError, SaveNode, SavedObject, codec};
use tracing::{debug, warn};

use crate::error::{BigSaveError, Result};
use crate::layout::{self, BigSaveHeader, FLAG_NESTED, HEADER_LEN};
use crate::merkle::{changed_chunks, leaf_hashes, root_from_leaves};
use crate::options::BigSaveOptions;
use crate::reference::ReferenceTable;
use crate::subfile::Subfile;

/// What a [`Link`] points at once resolved.
#[derive(Debug)]
pub enum Resolved<'a> {
    Node(&'a mut SaveNode),
    File(Subfile<'a>),
}

/// Work done by one [`BigSave::store`] call on this file. Subfiles are not
/// counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Trees serialized afresh rather than taken from the cache.
    pub trees_encoded: usize,
    /// Body chunks written to disk.
    pub chunks_written: usize,
    /// Total bytes written, header included.
    pub bytes_written: u64,
    /// The whole file was replaced instead of patched in place.
    pub full_rewrite: bool,
}

struct Tree {
    node: SaveNode,
    /// Encoding of `node` as it stands, if known.
    encoded: Option<Vec<u8>>,
    dirty: bool,
    object: Option<Arc<dyn SavedObject>>,
}

impl Tree {
    fn fresh(node: SaveNode) -> Self {
        Self {
            node,
            encoded: None,
            dirty: true,
            object: None,
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.encoded = None;
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("node", &self.node)
            .field("dirty", &self.dirty)
            .field("attached", &self.object.is_some())
            .finish_non_exhaustive()
    }
}

/// Chunk hashes of the body as it currently sits on disk.
#[derive(Debug)]
struct DiskImage {
    chunk_size: u32,
    leaves: Vec<Hash>,
    body_len: u64,
}

/// A container file holding any number of named save trees.
///
/// Mutable access through [`tree_mut`](Self::tree_mut) marks a tree dirty;
/// [`store`](Self::store) writes only when something is dirty. With
/// `save_at_destroy` set, dropping an open container stores it.
///
/// A container opened through [`subfile`](Self::subfile) is nested: its
/// trees hold handles into the root container's table, reached through the
/// [`Subfile`] view. Its own reference methods fail with
/// [`BigSaveError::ForeignReferences`].
#[derive(Debug, Default)]
pub struct BigSave {
    path: Option<PathBuf>,
    options: BigSaveOptions,
    trees: BTreeMap<String, Tree>,
    refs: ReferenceTable,
    subfiles: BTreeMap<String, BigSave>,
    nested: bool,
    /// Trees were added or removed since the last store.
    structure_dirty: bool,
    disk: Option<DiskImage>,
}

/// `name` with `.sav` appended.
pub fn save_path(name: impl AsRef<Path>) -> PathBuf {
    let mut path = name.as_ref().as_os_str().to_owned();
    path.push(".sav");
    PathBuf::from(path)
}

impl BigSave {
    /// A closed container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `<name>.sav`, starting empty if it does not exist.
    pub fn load(name: impl AsRef<Path>, options: BigSaveOptions) -> Result<Self> {
        let mut save = Self::new();
        save.open(name, options)?;
        Ok(save)
    }

    /// Opens `<name>.sav` into this container, closing whatever was open
    /// before without storing it.
    ///
    /// Unless `reduced_check` is set the body hash is verified and every
    /// tree is checked against container limits and for dangling references.
    /// A file written as a subfile opens nested and its references are not
    /// checked, since the table they point into is not loaded.
    pub fn open(&mut self, name: impl AsRef<Path>, options: BigSaveOptions) -> Result<()> {
        self.open_as(name.as_ref(), options, None)
    }

    /// `root` is the table of the container this one is a subfile of.
    fn open_as(
        &mut self,
        name: &Path,
        options: BigSaveOptions,
        root: Option<&ReferenceTable>,
    ) -> Result<()> {
        if options.chunk_size == 0 {
            return Err(BigSaveError::InvalidChunkSize);
        }
        self.close();

        let path = save_path(name);
        let mut trees = BTreeMap::new();
        let mut refs = ReferenceTable::new();

        let (disk, flagged) = match fs::read(&path) {
            Ok(file) => {
                let (disk, flagged) = read_image(&file, &options, &mut trees, &mut refs)?;
                (Some(disk), flagged)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => (None, false),
            Err(e) => return Err(e.into()),
        };

        if root.is_some() && refs.slot_count() > 0 {
            return Err(BigSaveError::SubfileOwnsReferences(path));
        }
        let nested = root.is_some() || flagged;

        if !options.reduced_check {
            let live = match root {
                Some(root) => Some(root),
                None if nested => None,
                None => Some(&refs),
            };
            validate(&trees, &refs, live)?;
        }

        match &disk {
            Some(d) => debug!(
                path = %path.display(),
                trees = trees.len(),
                shared = refs.len(),
                bytes = d.body_len,
                nested,
                "opened big save"
            ),
            None => debug!(path = %path.display(), nested, "created big save"),
        }

        self.options = options;
        self.trees = trees;
        self.refs = refs;
        self.nested = nested;
        // a standalone file adopted as a subfile gets its flag on next store
        self.structure_dirty = nested != flagged;
        self.disk = disk;
        self.path = Some(path);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.path.is_some()
    }

    /// Full path of the open file, `.sav` included.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> BigSaveOptions {
        self.options
    }

    /// Whether this container was opened or written as a subfile.
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Releases all in-memory state. Pending changes are discarded, in
    /// open subfiles too.
    pub fn close(&mut self) {
        if let Some(path) = self.path.take() {
            debug!(path = %path.display(), "closed big save");
        }
        for file in self.subfiles.values_mut() {
            file.close();
        }
        self.subfiles.clear();
        self.trees.clear();
        self.refs.clear();
        self.nested = false;
        self.structure_dirty = false;
        self.disk = None;
    }

    /// Whether the next [`store`](Self::store) would write this file.
    ///
    /// Attached objects are not consulted; their changes show up once
    /// `store` has saved them.
    pub fn is_dirty(&self) -> bool {
        self.disk.is_none()
            || self.structure_dirty
            || self.refs.is_dirty()
            || self.trees.values().any(|t| t.dirty)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BigSaveError::NotOpen)
        }
    }

    // -------------------------------------------------------------------------
    // Trees
    // -------------------------------------------------------------------------

    pub fn tree(&self, name: &str) -> Option<&SaveNode> {
        self.trees.get(name).map(|t| &t.node)
    }

    /// Mutable access to a tree, created empty if missing. Marks it dirty.
    pub fn tree_mut(&mut self, name: &str) -> Result<&mut SaveNode> {
        let tree = self.entry(name)?;
        tree.touch();
        Ok(&mut tree.node)
    }

    fn entry(&mut self, name: &str) -> Result<&mut Tree> {
        self.ensure_open()?;
        check_tree_name(name)?;
        if !self.trees.contains_key(name) {
            self.structure_dirty = true;
        }
        let tree = self
            .trees
            .entry(name.to_owned())
            .or_insert_with(|| Tree::fresh(SaveNode::new()));
        Ok(tree)
    }

    /// Puts `node` under `name`, returning the tree it replaced. An object
    /// attached to `name` stays attached.
    pub fn insert_tree(&mut self, name: &str, node: SaveNode) -> Result<Option<SaveNode>> {
        self.ensure_open()?;
        check_tree_name(name)?;
        match self.trees.get_mut(name) {
            Some(tree) => {
                tree.touch();
                Ok(Some(mem::replace(&mut tree.node, node)))
            }
            None => {
                self.trees.insert(name.to_owned(), Tree::fresh(node));
                self.structure_dirty = true;
                Ok(None)
            }
        }
    }

    pub fn remove_tree(&mut self, name: &str) -> Option<SaveNode> {
        let old = self.trees.remove(name)?;
        self.structure_dirty = true;
        Some(old.node)
    }

    pub fn contains_tree(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }

    pub fn tree_names(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    /// Forces `name` to be re-encoded on the next store.
    pub fn mark_dirty(&mut self, name: &str) {
        if let Some(tree) = self.trees.get_mut(name) {
            tree.touch();
        }
    }

    /// Empties a tree in place.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        self.tree_mut(name)?.reset();
        Ok(())
    }

    /// Keeps the first `count` entries of a tree's root container.
    pub fn truncate(&mut self, name: &str, count: usize) -> Result<()> {
        self.tree_mut(name)?.truncate(count);
        Ok(())
    }

    /// Replaces tree `dst` with a copy of tree `src` that shares no
    /// references with it.
    pub fn copy_tree(&mut self, src: &str, dst: &str) -> Result<()> {
        let source = self
            .tree(src)
            .ok_or_else(|| BigSaveError::MissingTree(src.to_owned()))?;
        let copy = self.own_refs()?.deep_copy(source)?;
        self.insert_tree(dst, copy)?;
        Ok(())
    }

    /// Lets `object` save itself into tree `name` on every
    /// [`store`](Self::store). The tree is created empty if missing; an
    /// object attached before is replaced.
    pub fn attach(&mut self, name: &str, object: Arc<dyn SavedObject>) -> Result<()> {
        self.entry(name)?.object = Some(object);
        Ok(())
    }

    /// Stops saving the object attached to `name` and hands it back.
    pub fn detach(&mut self, name: &str) -> Option<Arc<dyn SavedObject>> {
        self.trees.get_mut(name)?.object.take()
    }

    // -------------------------------------------------------------------------
    // References
    // -------------------------------------------------------------------------

    /// The table handles in this container's trees point into. Always empty
    /// for a nested container.
    pub fn refs(&self) -> &ReferenceTable {
        &self.refs
    }

    pub fn refs_mut(&mut self) -> &mut ReferenceTable {
        &mut self.refs
    }

    fn own_refs(&self) -> Result<&ReferenceTable> {
        if self.nested {
            Err(BigSaveError::ForeignReferences)
        } else {
            Ok(&self.refs)
        }
    }

    fn own_refs_mut(&mut self) -> Result<&mut ReferenceTable> {
        if self.nested {
            Err(BigSaveError::ForeignReferences)
        } else {
            Ok(&mut self.refs)
        }
    }

    /// Moves `node` into the reference table. Store the returned handle in
    /// as many places as should observe the node, in this container or in
    /// any subfile opened beneath it.
    pub fn share(&mut self, node: SaveNode) -> Result<RefHandle> {
        self.ensure_open()?;
        self.own_refs_mut()?.insert(node)
    }

    pub fn referenced(&self, handle: RefHandle) -> Result<&SaveNode> {
        self.own_refs()?.get(handle)
    }

    pub fn referenced_mut(&mut self, handle: RefHandle) -> Result<&mut SaveNode> {
        self.own_refs_mut()?.get_mut(handle)
    }

    pub fn release(&mut self, handle: RefHandle) -> Result<SaveNode> {
        self.own_refs_mut()?.release(handle)
    }

    /// Copy of `node` with every reference replaced by its target.
    pub fn deep_copy(&self, node: &SaveNode) -> Result<SaveNode> {
        self.own_refs()?.deep_copy(node)
    }

    /// Follows a link taken from a node of this container.
    pub fn resolve(&mut self, link: &Link) -> Result<Resolved<'_>> {
        match link {
            Link::Reference(handle) => Ok(Resolved::Node(self.referenced_mut(*handle)?)),
            Link::Subfile(name) => Ok(Resolved::File(self.subfile(name)?)),
        }
    }

    /// The container `<dir>/<name>.sav` next to this file, opened nested
    /// with the same options on first use and owned by this container.
    ///
    /// `name` may not lead back to this file. The view resolves references
    /// against this container's table.
    pub fn subfile(&mut self, name: &str) -> Result<Subfile<'_>> {
        if self.nested {
            return Err(BigSaveError::ForeignReferences);
        }
        let path = self.path.clone().ok_or(BigSaveError::NotOpen)?;
        let options = self.options;
        let lineage = vec![path];
        open_subfile(&mut self.subfiles, &mut self.refs, lineage, options, name)
    }

    /// Drops an open subfile. With `save_at_destroy` it is stored first.
    pub fn close_subfile(&mut self, name: &str) -> bool {
        self.subfiles.remove(name).is_some()
    }

    /// Names of the subfiles opened directly beneath this container.
    pub fn subfile_names(&self) -> impl Iterator<Item = &str> {
        self.subfiles.keys().map(String::as_str)
    }

    pub(crate) fn subfiles_mut(&mut self) -> &mut BTreeMap<String, BigSave> {
        &mut self.subfiles
    }

    // -------------------------------------------------------------------------
    // Storing
    // -------------------------------------------------------------------------

    /// Saves attached objects, writes pending changes, then stores every
    /// open subfile.
    ///
    /// A clean container is not touched. With `reduce_write` only the
    /// header and the body chunks whose hash changed are rewritten.
    pub fn store(&mut self) -> Result<StoreStats> {
        let path = self.path.clone().ok_or(BigSaveError::NotOpen)?;
        let mut stats = StoreStats::default();

        self.flush_objects(&mut stats)?;
        if self.is_dirty() {
            self.write_image(&path, &mut stats)?;
            debug!(path = %path.display(), ?stats, "stored big save");
        }

        for (name, file) in &mut self.subfiles {
            if let Err(e) = file.store() {
                warn!(subfile = %name, error = %e, "subfile store failed");
                return Err(e);
            }
        }
        Ok(stats)
    }

    /// Saves every attached object into its tree. A tree whose encoding
    /// changed becomes dirty.
    fn flush_objects(&mut self, stats: &mut StoreStats) -> Result<()> {
        for tree in self.trees.values_mut() {
            if let Some(object) = &tree.object {
                object.save(&mut tree.node)?;
                let bytes = codec::encode(&tree.node)?;
                stats.trees_encoded += 1;
                if tree.encoded.as_deref() != Some(bytes.as_slice()) {
                    tree.dirty = true;
                }
                tree.encoded = Some(bytes);
            }
        }
        Ok(())
    }

    fn write_image(&mut self, path: &Path, stats: &mut StoreStats) -> Result<()> {
        if self.nested && self.refs.slot_count() > 0 {
            return Err(BigSaveError::ForeignReferences);
        }
        let chunk = self.options.chunk_size as usize;
        let reduce = self.options.reduce_write;

        let mut body = Vec::new();
        for (name, tree) in &mut self.trees {
            let bytes = match tree.encoded.take() {
                Some(bytes) => bytes,
                None => {
                    stats.trees_encoded += 1;
                    codec::encode(&tree.node)?
                }
            };
            layout::write_tree(&mut body, name, &bytes)?;
            // attached trees keep theirs so an unchanged object stays clean
            if reduce || tree.object.is_some() {
                tree.encoded = Some(bytes);
            }
        }
        self.refs.write_slots(&mut body)?;

        let leaves = leaf_hashes(&body, chunk);
        let flags = if self.nested { FLAG_NESTED } else { 0 };
        let header = BigSaveHeader::new(
            flags,
            count_u32(self.trees.len(), "trees")?,
            count_u32(self.refs.slot_count(), "reference slots")?,
            body.len() as u64,
            self.options.chunk_size,
            *root_from_leaves(&leaves).as_bytes(),
        );

        let previous = self
            .disk
            .as_ref()
            .filter(|d| reduce && d.chunk_size == self.options.chunk_size);
        let patched = match previous {
            Some(prev) => patch_file(path, &header, &body, prev, &leaves, chunk, stats)?,
            None => false,
        };
        if !patched {
            replace_file(path, &header, &body)?;
            stats.full_rewrite = true;
            stats.chunks_written = leaves.len();
            stats.bytes_written = (HEADER_LEN + body.len()) as u64;
        }

        self.disk = Some(DiskImage {
            chunk_size: self.options.chunk_size,
            leaves,
            body_len: body.len() as u64,
        });
        self.structure_dirty = false;
        self.refs.mark_clean();
        for tree in self.trees.values_mut() {
            tree.dirty = false;
        }
        Ok(())
    }
}

impl Drop for BigSave {
    fn drop(&mut self) {
        if self.is_open() && self.options.save_at_destroy {
            if let Err(e) = self.store() {
                warn!(path = ?self.path, error = %e, "store on drop failed");
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Subfiles
// -----------------------------------------------------------------------------

/// Opens subfile `name` of the container whose path ends `lineage`, unless
/// it is open already. `refs` is the root container's table.
pub(crate) fn open_subfile<'a>(
    subfiles: &'a mut BTreeMap<String, BigSave>,
    refs: &'a mut ReferenceTable,
    mut lineage: Vec<PathBuf>,
    options: BigSaveOptions,
    name: &str,
) -> Result<Subfile<'a>> {
    let parent = lineage.last().ok_or(BigSaveError::NotOpen)?;
    let base = subfile_base(parent, name)?;
    let path = save_path(&base);
    if lineage.contains(&path) {
        return Err(BigSaveError::InvalidSubfileName(name.to_owned()));
    }

    let file = match subfiles.entry(name.to_owned()) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => {
            let mut file = BigSave::new();
            file.open_as(&base, options, Some(&*refs))?;
            e.insert(file)
        }
    };
    lineage.push(path);
    Ok(Subfile::new(file, refs, lineage))
}

/// `<dir of parent>/<name>`, for a relative `name` of normal components.
fn subfile_base(parent: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    if name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(BigSaveError::InvalidSubfileName(name.to_owned()));
    }
    let dir = parent.parent().unwrap_or(Path::new(""));
    Ok(dir.join(rel))
}

// -----------------------------------------------------------------------------
// Loading helpers
// -----------------------------------------------------------------------------

/// Fills `trees` and `refs` from a whole file. Also returns whether the
/// file was written as a subfile.
fn read_image(
    file: &[u8],
    options: &BigSaveOptions,
    trees: &mut BTreeMap<String, Tree>,
    refs: &mut ReferenceTable,
) -> Result<(DiskImage, bool)> {
    let header = BigSaveHeader::parse(file)?;
    let body = &file[HEADER_LEN..];
    let nested = header.flags & FLAG_NESTED != 0;
    if nested && header.slot_count != 0 {
        return Err(BigSaveError::corrupt(12, "nested file with slots"));
    }

    let leaves = if options.reduced_check && !options.reduce_write {
        Vec::new()
    } else {
        leaf_hashes(body, header.chunk_size as usize)
    };
    if !options.reduced_check && root_from_leaves(&leaves).as_bytes() != &header.root_hash {
        return Err(BigSaveError::HashMismatch);
    }

    let parsed = layout::parse_body(body, &header)?;
    for t in parsed.trees {
        let encoded = options.reduce_write.then(|| body[t.span.clone()].to_vec());
        let tree = Tree {
            encoded,
            dirty: false,
            ..Tree::fresh(t.node)
        };
        trees.insert(t.name, tree);
    }
    refs.restore(parsed.slots);

    let disk = DiskImage {
        chunk_size: header.chunk_size,
        leaves,
        body_len: header.body_len,
    };
    Ok((disk, nested))
}

/// Container limits and payload sizes for every node. With `live`, every
/// reference must also name a live slot of that table.
fn validate(
    trees: &BTreeMap<String, Tree>,
    refs: &ReferenceTable,
    live: Option<&ReferenceTable>,
) -> Result<()> {
    let mut check = |node: &SaveNode| -> Result<()> {
        if let Some(children) = node.children() {
            children.check_limits()?;
        }
        node.tag()?;
        match (node.reference(), live) {
            (Some(handle), Some(table)) if !table.contains(handle) => {
                Err(BigSaveError::DanglingReference(handle))
            }
            _ => Ok(()),
        }
    };
    for tree in trees.values() {
        tree.node.visit(&mut check)?;
    }
    for (_, node) in refs.iter() {
        node.visit(&mut check)?;
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Writing helpers
// -----------------------------------------------------------------------------

fn check_tree_name(name: &str) -> Result<()> {
    if name.len() > u16::MAX as usize {
        return Err(SaveDataError::LimitExceeded {
            what: "tree name length",
            limit: u16::MAX as u64,
        }
        .into());
    }
    Ok(())
}

fn count_u32(n: usize, what: &'static str) -> Result<u32> {
    u32::try_from(n).map_err(|_| {
        SaveDataError::LimitExceeded {
            what,
            limit: u32::MAX as u64,
        }
        .into()
    })
}

/// Writes the whole file next to `path` and renames it into place.
fn replace_file(path: &Path, header: &BigSaveHeader, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("sav.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Rewrites the header and changed chunks in place. Returns `false` when
/// the file vanished and has to be written whole.
fn patch_file(
    path: &Path,
    header: &BigSaveHeader,
    body: &[u8],
    prev: &DiskImage,
    leaves: &[Hash],
    chunk: usize,
    stats: &mut StoreStats,
) -> Result<bool> {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    // root hash and body length change with any edit
    file.write_all(&header.to_bytes())?;
    stats.bytes_written += HEADER_LEN as u64;

    for i in changed_chunks(&prev.leaves, leaves) {
        let start = i * chunk;
        let end = (start + chunk).min(body.len());
        file.seek(SeekFrom::Start((HEADER_LEN + start) as u64))?;
        file.write_all(&body[start..end])?;
        stats.chunks_written += 1;
        stats.bytes_written += (end - start) as u64;
    }

    if (body.len() as u64) < prev.body_len {
        file.set_len((HEADER_LEN + body.len()) as u64)?;
    }
    file.sync_data()?;
    Ok(true)
}
