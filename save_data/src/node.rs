//! The save tree cell.

use std::collections::{BTreeMap, btree_map};
use std::ops::Index;
use std::slice;

use bytemuck::Pod;

use crate::error::{Result, SaveDataError};
use crate::link::{Link, RefHandle};
use crate::scalar::Scalar;
use crate::tag::{ContainerKind, SizeClass, Special, Tag};

/// Longest string map key, in bytes (one-byte length prefix).
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Children of a container node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Children {
    StringMap(BTreeMap<String, SaveNode>),
    AddressMap(BTreeMap<u64, SaveNode>),
    ShortMap(BTreeMap<u16, SaveNode>),
    List(Vec<SaveNode>),
    WideList(Vec<SaveNode>),
}

impl Children {
    pub fn empty(kind: ContainerKind) -> Result<Self> {
        match kind {
            ContainerKind::StringMap => Ok(Children::StringMap(BTreeMap::new())),
            ContainerKind::AddressMap => Ok(Children::AddressMap(BTreeMap::new())),
            ContainerKind::ShortMap => Ok(Children::ShortMap(BTreeMap::new())),
            ContainerKind::List => Ok(Children::List(Vec::new())),
            ContainerKind::WideList => Ok(Children::WideList(Vec::new())),
            ContainerKind::Pointer => Err(SaveDataError::NotImplemented("pointer container kind")),
            ContainerKind::Undefined => Err(SaveDataError::invalid("build children", kind)),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Children::StringMap(_) => ContainerKind::StringMap,
            Children::AddressMap(_) => ContainerKind::AddressMap,
            Children::ShortMap(_) => ContainerKind::ShortMap,
            Children::List(_) => ContainerKind::List,
            Children::WideList(_) => ContainerKind::WideList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Children::StringMap(m) => m.len(),
            Children::AddressMap(m) => m.len(),
            Children::ShortMap(m) => m.len(),
            Children::List(v) | Children::WideList(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Child nodes in encoding order.
    pub fn values(&self) -> Values<'_> {
        match self {
            Children::StringMap(m) => Values::Str(m.values()),
            Children::AddressMap(m) => Values::Address(m.values()),
            Children::ShortMap(m) => Values::Short(m.values()),
            Children::List(v) | Children::WideList(v) => Values::Seq(v.iter()),
        }
    }

    fn values_mut(&mut self) -> ValuesMut<'_> {
        match self {
            Children::StringMap(m) => ValuesMut::Str(m.values_mut()),
            Children::AddressMap(m) => ValuesMut::Address(m.values_mut()),
            Children::ShortMap(m) => ValuesMut::Short(m.values_mut()),
            Children::List(v) | Children::WideList(v) => ValuesMut::Seq(v.iter_mut()),
        }
    }

    /// Checks entry count and key lengths against the hard limits.
    pub fn check_limits(&self) -> Result<()> {
        let kind = self.kind();
        if let Some(limit) = kind.limit() {
            if self.len() as u64 > limit {
                return Err(SaveDataError::LimitExceeded {
                    what: "container entries",
                    limit,
                });
            }
        }
        if let Children::StringMap(m) = self {
            if m.keys().any(|k| k.len() > MAX_KEY_LEN) {
                return Err(SaveDataError::LimitExceeded {
                    what: "string key length",
                    limit: MAX_KEY_LEN as u64,
                });
            }
        }
        Ok(())
    }

    fn truncate(&mut self, count: usize) {
        fn keep_first<K: Ord + Clone, V>(map: &mut BTreeMap<K, V>, count: usize) {
            if let Some(cut) = map.keys().nth(count).cloned() {
                map.split_off(&cut);
            }
        }
        match self {
            Children::StringMap(m) => keep_first(m, count),
            Children::AddressMap(m) => keep_first(m, count),
            Children::ShortMap(m) => keep_first(m, count),
            Children::List(v) | Children::WideList(v) => v.truncate(count),
        }
    }
}

/// Iterator over the children of a container, in encoding order.
pub enum Values<'a> {
    Str(btree_map::Values<'a, String, SaveNode>),
    Address(btree_map::Values<'a, u64, SaveNode>),
    Short(btree_map::Values<'a, u16, SaveNode>),
    Seq(slice::Iter<'a, SaveNode>),
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a SaveNode;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Values::Str(it) => it.next(),
            Values::Address(it) => it.next(),
            Values::Short(it) => it.next(),
            Values::Seq(it) => it.next(),
        }
    }
}

enum ValuesMut<'a> {
    Str(btree_map::ValuesMut<'a, String, SaveNode>),
    Address(btree_map::ValuesMut<'a, u64, SaveNode>),
    Short(btree_map::ValuesMut<'a, u16, SaveNode>),
    Seq(slice::IterMut<'a, SaveNode>),
}

impl<'a> Iterator for ValuesMut<'a> {
    type Item = &'a mut SaveNode;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ValuesMut::Str(it) => it.next(),
            ValuesMut::Address(it) => it.next(),
            ValuesMut::Short(it) => it.next(),
            ValuesMut::Seq(it) => it.next(),
        }
    }
}

/// What a node currently holds. Exactly one variant is live at a time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Content {
    #[default]
    Empty,
    Payload { bytes: Vec<u8>, extended: bool },
    Children(Children),
    Reference(RefHandle),
    Subfile(String),
}

/// A node of a save tree.
///
/// `Clone` copies reference handles as-is, so a clone of an aliased node
/// stays aliased. Use a reference table's deep copy for an independent tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveNode {
    content: Content,
}

impl SaveNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        SaveNode {
            content: Content::Payload {
                bytes: bytes.into(),
                extended: false,
            },
        }
    }

    pub fn from_scalar<T: Scalar>(value: T) -> Self {
        let mut node = SaveNode::new();
        node.set(value);
        node
    }

    pub fn string(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }

    /// An empty container of `kind`.
    pub fn container(kind: ContainerKind) -> Result<Self> {
        Ok(SaveNode {
            content: Content::Children(Children::empty(kind)?),
        })
    }

    pub fn from_children(children: Children) -> Result<Self> {
        children.check_limits()?;
        Ok(SaveNode {
            content: Content::Children(children),
        })
    }

    /// An alias node pointing into a reference table.
    pub fn referenced(handle: RefHandle) -> Self {
        SaveNode {
            content: Content::Reference(handle),
        }
    }

    /// A node whose content lives in the separately managed file `name`.
    pub fn subfile(name: &str) -> Result<Self> {
        let mut node = SaveNode::new();
        node.set_subfile(name)?;
        Ok(node)
    }

    pub(crate) fn from_content(content: Content) -> Self {
        SaveNode { content }
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn kind(&self) -> ContainerKind {
        match &self.content {
            Content::Children(c) => c.kind(),
            _ => ContainerKind::Undefined,
        }
    }

    /// Length-field class of the attached payload, `None` without payload.
    pub fn size_class(&self) -> Result<SizeClass> {
        match self.payload_bytes_len() {
            Some(len) => SizeClass::for_len(len),
            None => Ok(SizeClass::None),
        }
    }

    /// The tag this node encodes with.
    pub fn tag(&self) -> Result<Tag> {
        let size = self.size_class()?;
        Ok(match &self.content {
            Content::Empty => Tag::EMPTY,
            Content::Children(c) => Tag::container(c.kind()),
            Content::Payload { extended, .. } => Tag::payload(size, Special::None, *extended),
            Content::Reference(_) => Tag::payload(size, Special::Referenced, false),
            Content::Subfile(_) => Tag::payload(size, Special::Subfile, false),
        })
    }

    pub(crate) fn payload_bytes_len(&self) -> Option<usize> {
        match &self.content {
            Content::Payload { bytes, .. } => Some(bytes.len()),
            Content::Reference(_) => Some(RefHandle::ENCODED_LEN),
            Content::Subfile(name) => Some(name.len()),
            Content::Empty | Content::Children(_) => None,
        }
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        match &self.content {
            Content::Children(c) => c.len(),
            _ => 0,
        }
    }

    /// True for an undefined node, an empty payload or an empty container.
    pub fn is_empty(&self) -> bool {
        match &self.content {
            Content::Empty => true,
            Content::Payload { bytes, .. } => bytes.is_empty(),
            Content::Children(c) => c.is_empty(),
            Content::Reference(_) | Content::Subfile(_) => false,
        }
    }

    pub fn children(&self) -> Option<&Children> {
        match &self.content {
            Content::Children(c) => Some(c),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Payload access
    // ---------------------------------------------------------------------

    /// Raw payload bytes of a plain payload node.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Payload { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.raw().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.content, Content::Payload { extended: true, .. })
    }

    fn typed_payload(&self, width: usize) -> Result<&[u8]> {
        match &self.content {
            Content::Payload { bytes, .. } if bytes.len() == width => Ok(bytes),
            Content::Payload { bytes, .. } => Err(SaveDataError::TypeMismatch {
                expected: width,
                found: bytes.len(),
            }),
            _ => Err(SaveDataError::TypeMismatch {
                expected: width,
                found: 0,
            }),
        }
    }

    /// Reads the payload as a little-endian scalar.
    pub fn get<T: Scalar>(&self) -> Result<T> {
        self.typed_payload(T::WIDTH).map(T::read_le)
    }

    /// Reads the payload as a plain-old-data value in native layout.
    pub fn get_pod<T: Pod>(&self) -> Result<T> {
        self.typed_payload(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    pub fn set<T: Scalar>(&mut self, value: T) {
        let mut bytes = Vec::with_capacity(T::WIDTH);
        value.write_le(&mut bytes);
        self.set_bytes(bytes);
    }

    pub fn set_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        self.content = Content::Payload {
            bytes: bytes.into(),
            extended: false,
        };
    }

    pub fn set_str(&mut self, value: &str) {
        self.set_bytes(value.as_bytes());
    }

    pub fn set_pod<T: Pod>(&mut self, value: &T) {
        self.set_bytes(bytemuck::bytes_of(value));
    }

    /// Marks a plain payload as an application-typed record.
    pub fn set_extended(&mut self, extended: bool) -> Result<()> {
        match &mut self.content {
            Content::Payload { extended: flag, .. } => {
                *flag = extended;
                Ok(())
            }
            _ => Err(SaveDataError::invalid("mark extended type", self.kind())),
        }
    }

    // ---------------------------------------------------------------------
    // External references
    // ---------------------------------------------------------------------

    pub fn set_reference(&mut self, handle: RefHandle) {
        self.content = Content::Reference(handle);
    }

    pub fn set_subfile(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SaveDataError::invalid("name an empty subfile", self.kind()));
        }
        SizeClass::for_len(name.len())?;
        self.content = Content::Subfile(name.to_owned());
        Ok(())
    }

    pub fn reference(&self) -> Option<RefHandle> {
        match self.content {
            Content::Reference(h) => Some(h),
            _ => None,
        }
    }

    pub fn subfile_name(&self) -> Option<&str> {
        match &self.content {
            Content::Subfile(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_subfile(&self) -> bool {
        matches!(self.content, Content::Subfile(_))
    }

    pub fn link(&self) -> Option<Link> {
        match &self.content {
            Content::Reference(h) => Some(Link::Reference(*h)),
            Content::Subfile(name) => Some(Link::Subfile(name.clone())),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Containers
    // ---------------------------------------------------------------------

    /// Turns an undefined node into an empty container of `kind`. A payload
    /// is discarded.
    pub fn set_kind(&mut self, kind: ContainerKind) -> Result<()> {
        if kind == ContainerKind::Pointer {
            return Err(SaveDataError::NotImplemented("pointer container kind"));
        }
        match &self.content {
            Content::Empty | Content::Payload { .. } => {
                self.content = Content::Children(Children::empty(kind)?);
                Ok(())
            }
            Content::Children(c) if c.kind() == kind => Ok(()),
            _ => Err(SaveDataError::invalid("change container kind", self.kind())),
        }
    }

    fn coerce(&mut self, kind: ContainerKind, op: &'static str) -> Result<&mut Children> {
        // plain values are overwritten; links and other containers are not
        if matches!(self.content, Content::Empty | Content::Payload { .. }) {
            self.content = Content::Children(Children::empty(kind)?);
        }
        let current = self.kind();
        match &mut self.content {
            Content::Children(c) if current == kind => Ok(c),
            _ => Err(SaveDataError::invalid(op, current)),
        }
    }

    /// Child under `key`, created if absent. Coerces an empty or payload
    /// node into a string map.
    pub fn key_mut(&mut self, key: &str) -> Result<&mut SaveNode> {
        let map = match self.coerce(ContainerKind::StringMap, "index by key")? {
            Children::StringMap(map) => map,
            other => return Err(SaveDataError::invalid("index by key", other.kind())),
        };
        if !map.contains_key(key) {
            if key.len() > MAX_KEY_LEN {
                return Err(SaveDataError::LimitExceeded {
                    what: "string key length",
                    limit: MAX_KEY_LEN as u64,
                });
            }
            check_room(ContainerKind::StringMap, map.len())?;
        }
        Ok(map.entry(key.to_owned()).or_default())
    }

    /// Child under `address`, created if absent. Coerces an empty or
    /// payload node into an address map; on a list, indexes an existing
    /// element.
    pub fn address_mut(&mut self, address: u64) -> Result<&mut SaveNode> {
        let kind = self.kind();
        if matches!(kind, ContainerKind::List | ContainerKind::WideList) {
            let slot = usize::try_from(address).ok();
            return slot
                .and_then(|i| self.item_mut(i))
                .ok_or(SaveDataError::invalid("index past the end", kind));
        }
        let map = match self.coerce(ContainerKind::AddressMap, "index by address")? {
            Children::AddressMap(map) => map,
            other => return Err(SaveDataError::invalid("index by address", other.kind())),
        };
        if !map.contains_key(&address) {
            check_room(ContainerKind::AddressMap, map.len())?;
        }
        Ok(map.entry(address).or_default())
    }

    /// Child under a 16-bit key, created if absent. Coerces an empty or
    /// payload node into a short map.
    pub fn short_mut(&mut self, key: u16) -> Result<&mut SaveNode> {
        let map = match self.coerce(ContainerKind::ShortMap, "index by short key")? {
            Children::ShortMap(map) => map,
            other => return Err(SaveDataError::invalid("index by short key", other.kind())),
        };
        if !map.contains_key(&key) {
            check_room(ContainerKind::ShortMap, map.len())?;
        }
        Ok(map.entry(key).or_default())
    }

    /// Appends to a list and returns the new element's index.
    pub fn append(&mut self, child: SaveNode) -> Result<usize> {
        let kind = self.kind();
        match &mut self.content {
            Content::Children(Children::List(v) | Children::WideList(v)) => {
                check_room(kind, v.len())?;
                v.push(child);
                Ok(v.len() - 1)
            }
            _ => Err(SaveDataError::invalid("append", kind)),
        }
    }

    pub fn key(&self, key: &str) -> Option<&SaveNode> {
        match &self.content {
            Content::Children(Children::StringMap(m)) => m.get(key),
            _ => None,
        }
    }

    pub fn address(&self, address: u64) -> Option<&SaveNode> {
        match &self.content {
            Content::Children(Children::AddressMap(m)) => m.get(&address),
            Content::Children(Children::List(_) | Children::WideList(_)) => {
                self.item(usize::try_from(address).ok()?)
            }
            _ => None,
        }
    }

    pub fn short(&self, key: u16) -> Option<&SaveNode> {
        match &self.content {
            Content::Children(Children::ShortMap(m)) => m.get(&key),
            _ => None,
        }
    }

    /// List element at `index`.
    pub fn item(&self, index: usize) -> Option<&SaveNode> {
        match &self.content {
            Content::Children(Children::List(v) | Children::WideList(v)) => v.get(index),
            _ => None,
        }
    }

    pub fn item_mut(&mut self, index: usize) -> Option<&mut SaveNode> {
        match &mut self.content {
            Content::Children(Children::List(v) | Children::WideList(v)) => v.get_mut(index),
            _ => None,
        }
    }

    pub fn remove_key(&mut self, key: &str) -> Option<SaveNode> {
        match &mut self.content {
            Content::Children(Children::StringMap(m)) => m.remove(key),
            _ => None,
        }
    }

    pub fn remove_address(&mut self, address: u64) -> Option<SaveNode> {
        match &mut self.content {
            Content::Children(Children::AddressMap(m)) => m.remove(&address),
            _ => None,
        }
    }

    /// Pre-order walk over this node and every descendant.
    pub fn visit<E>(
        &self,
        f: &mut impl FnMut(&SaveNode) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        f(self)?;
        if let Content::Children(c) = &self.content {
            for child in c.values() {
                child.visit(f)?;
            }
        }
        Ok(())
    }

    /// Pre-order walk allowing in-place edits.
    pub fn visit_mut<E>(
        &mut self,
        f: &mut impl FnMut(&mut SaveNode) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        f(self)?;
        if let Content::Children(c) = &mut self.content {
            for child in c.values_mut() {
                child.visit_mut(f)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // In-place maintenance
    // ---------------------------------------------------------------------

    /// Back to an empty undefined node. The node itself stays where it is.
    pub fn reset(&mut self) {
        self.content = Content::Empty;
    }

    /// Drops entries at and after `count`, keeping the container kind.
    ///
    /// Maps keep their first `count` keys in key order; a payload keeps its
    /// first `count` bytes.
    pub fn truncate(&mut self, count: usize) {
        match &mut self.content {
            Content::Children(c) => c.truncate(count),
            Content::Payload { bytes, .. } => bytes.truncate(count),
            Content::Empty | Content::Reference(_) | Content::Subfile(_) => {}
        }
    }

    /// Recursively removes map entries whose value ended up empty.
    pub fn prune_empty(&mut self) {
        match &mut self.content {
            Content::Children(Children::StringMap(m)) => prune_map(m),
            Content::Children(Children::AddressMap(m)) => prune_map(m),
            Content::Children(Children::ShortMap(m)) => prune_map(m),
            Content::Children(Children::List(v) | Children::WideList(v)) => {
                v.iter_mut().for_each(SaveNode::prune_empty);
            }
            _ => {}
        }
    }
}

fn prune_map<K: Ord>(map: &mut BTreeMap<K, SaveNode>) {
    map.retain(|_, child| {
        child.prune_empty();
        !child.is_empty()
    });
}

fn check_room(kind: ContainerKind, len: usize) -> Result<()> {
    match kind.limit() {
        Some(limit) if len as u64 >= limit => {
            Err(SaveDataError::LimitExceeded {
                what: "container entries",
                limit,
            })
        }
        _ => Ok(()),
    }
}

impl From<&str> for SaveNode {
    fn from(value: &str) -> Self {
        SaveNode::string(value)
    }
}

impl From<Vec<u8>> for SaveNode {
    fn from(value: Vec<u8>) -> Self {
        SaveNode::from_bytes(value)
    }
}

impl Index<&str> for SaveNode {
    type Output = SaveNode;

    fn index(&self, key: &str) -> &Self::Output {
        self.key(key).expect("no entry for key")
    }
}

impl Index<usize> for SaveNode {
    type Output = SaveNode;

    fn index(&self, index: usize) -> &Self::Output {
        self.item(index).expect("index out of bounds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_access_vivifies_string_map() -> Result<()> {
        let mut root = SaveNode::new();
        root.key_mut("hp")?.set(100i32);
        assert_eq!(root.kind(), ContainerKind::StringMap);
        assert_eq!(root.len(), 1);
        assert_eq!(root["hp"].get::<i32>()?, 100);
        Ok(())
    }

    #[test]
    fn address_access_on_string_map_fails() {
        let mut root = SaveNode::new();
        root.key_mut("a").unwrap();
        assert!(matches!(
            root.address_mut(1),
            Err(SaveDataError::InvalidOperation {
                kind: ContainerKind::StringMap,
                ..
            })
        ));
    }

    #[test]
    fn set_overwrites_container() -> Result<()> {
        let mut node = SaveNode::new();
        node.key_mut("x")?.set(1u8);
        node.set_str("plain");
        assert_eq!(node.kind(), ContainerKind::Undefined);
        assert_eq!(node.len(), 0);
        assert_eq!(node.as_str(), Some("plain"));
        Ok(())
    }

    #[test]
    fn key_access_replaces_payload() -> Result<()> {
        let mut node = SaveNode::from_scalar(5u32);
        node.key_mut("a")?.set(1u8);
        assert_eq!(node.kind(), ContainerKind::StringMap);
        assert!(node.raw().is_none());

        let mut node = SaveNode::string("old");
        node.address_mut(3)?;
        assert_eq!(node.kind(), ContainerKind::AddressMap);

        let mut node = SaveNode::from_bytes(vec![1, 2]);
        node.set_kind(ContainerKind::List)?;
        assert!(node.is_empty());
        Ok(())
    }

    #[test]
    fn key_access_keeps_links() {
        let mut node = SaveNode::referenced(RefHandle::new(0, 0));
        assert!(node.key_mut("a").is_err());
        assert!(node.reference().is_some());
    }

    #[test]
    fn get_with_wrong_width_is_type_mismatch() {
        let node = SaveNode::from_scalar(7u16);
        assert!(matches!(
            node.get::<u32>(),
            Err(SaveDataError::TypeMismatch {
                expected: 4,
                found: 2,
            })
        ));
    }

    #[test]
    fn append_requires_list() -> Result<()> {
        let mut node = SaveNode::new();
        assert!(matches!(
            node.append(SaveNode::new()),
            Err(SaveDataError::InvalidOperation { .. })
        ));
        node.set_kind(ContainerKind::WideList)?;
        assert_eq!(node.append(SaveNode::from_scalar(1u8))?, 0);
        assert_eq!(node.append(SaveNode::from_scalar(2u8))?, 1);
        assert_eq!(node[1].get::<u8>()?, 2);
        Ok(())
    }

    #[test]
    fn list_address_does_not_vivify() -> Result<()> {
        let mut node = SaveNode::container(ContainerKind::List)?;
        node.append(SaveNode::from_scalar(9u32))?;
        assert_eq!(node.address_mut(0)?.get::<u32>()?, 9);
        assert!(node.address_mut(1).is_err());
        assert_eq!(node.len(), 1);
        Ok(())
    }

    #[test]
    fn pointer_kind_rejected() {
        let mut node = SaveNode::new();
        assert!(matches!(
            node.set_kind(ContainerKind::Pointer),
            Err(SaveDataError::NotImplemented(_))
        ));
        assert!(matches!(
            SaveNode::container(ContainerKind::Pointer),
            Err(SaveDataError::NotImplemented(_))
        ));
    }

    #[test]
    fn short_map_limit() -> Result<()> {
        let mut node = SaveNode::new();
        for k in 0..u16::MAX {
            node.short_mut(k)?;
        }
        assert_eq!(node.len(), 65_535);
        // existing key is still reachable at the cap
        node.short_mut(0)?.set(1u8);
        assert!(matches!(
            node.short_mut(u16::MAX),
            Err(SaveDataError::LimitExceeded { limit: 65_535, .. })
        ));
        Ok(())
    }

    #[test]
    fn long_key_rejected() {
        let mut node = SaveNode::new();
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            node.key_mut(&key),
            Err(SaveDataError::LimitExceeded {
                what: "string key length",
                ..
            })
        ));
    }

    #[test]
    fn truncate_keeps_kind_and_first_keys() -> Result<()> {
        let mut node = SaveNode::new();
        for k in [30u64, 10, 20] {
            node.address_mut(k)?.set(k);
        }
        node.truncate(2);
        assert_eq!(node.kind(), ContainerKind::AddressMap);
        assert!(node.address(10).is_some());
        assert!(node.address(20).is_some());
        assert!(node.address(30).is_none());

        node.truncate(0);
        assert_eq!(node.kind(), ContainerKind::AddressMap);
        assert!(node.is_empty());
        Ok(())
    }

    #[test]
    fn reset_clears_everything() -> Result<()> {
        let mut node = SaveNode::new();
        node.key_mut("a")?.key_mut("b")?.set(1u64);
        node.reset();
        assert_eq!(node, SaveNode::new());
        Ok(())
    }

    #[test]
    fn prune_drops_empty_entries() -> Result<()> {
        let mut node = SaveNode::new();
        node.key_mut("kept")?.set(1u8);
        node.key_mut("empty")?;
        node.key_mut("nested")?.key_mut("inner")?;
        node.prune_empty();
        assert_eq!(node.len(), 1);
        assert!(node.key("kept").is_some());
        Ok(())
    }

    #[test]
    fn extended_only_on_payload() -> Result<()> {
        let mut node = SaveNode::from_bytes(vec![1, 2, 3]);
        node.set_extended(true)?;
        assert!(node.is_extended());
        assert_eq!(node.tag()?.to_byte(), 0x84);

        let mut map = SaveNode::container(ContainerKind::StringMap)?;
        assert!(map.set_extended(true).is_err());
        Ok(())
    }

    #[test]
    fn pod_access() -> Result<()> {
        let mut node = SaveNode::new();
        node.set_pod(&[1u16, 2, 3]);
        assert_eq!(node.get_pod::<[u16; 3]>()?, [1, 2, 3]);
        assert!(node.get_pod::<u64>().is_err());
        Ok(())
    }
}
