//! On-disk layout of a `.sav` container.
//!
//! ```text
//! header  := BigSaveHeader (64 bytes, little-endian fields)
//! body    := tree* slot*
//! tree    := name_len:u16 name:utf8 node
//! slot    := generation:u32 occupied:u8 node?
//! ```
//!
//! Trees are written in name order; slots in index order, so the slot
//! index is its position. The header's root hash covers the body only.

use std::ops::Range;

use bytemuck_derive::{Pod, Zeroable};
use save_data::{SaveDataError, SaveNode, codec};

use crate::error::{BigSaveError, Result};

pub const MAGIC: u32 = u32::from_le_bytes(*b"BSAV");
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = size_of::<BigSaveHeader>();

/// Set on a container opened as a subfile; its handles live in the root's table.
pub const FLAG_NESTED: u16 = 0x0001;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BigSaveHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub tree_count: u32,
    pub slot_count: u32,
    pub body_len: u64,
    pub chunk_size: u32,
    pub reserved: u32,
    pub root_hash: [u8; 32],
}

impl BigSaveHeader {
    pub fn new(
        flags: u16,
        tree_count: u32,
        slot_count: u32,
        body_len: u64,
        chunk_size: u32,
        root_hash: [u8; 32],
    ) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            tree_count,
            slot_count,
            body_len,
            chunk_size,
            reserved: 0,
            root_hash,
        }
    }

    // Byte swapping is its own inverse, so this serves both directions.
    fn swap_le(self) -> Self {
        Self {
            magic: self.magic.to_le(),
            version: self.version.to_le(),
            flags: self.flags.to_le(),
            tree_count: self.tree_count.to_le(),
            slot_count: self.slot_count.to_le(),
            body_len: self.body_len.to_le(),
            chunk_size: self.chunk_size.to_le(),
            reserved: self.reserved.to_le(),
            root_hash: self.root_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        bytemuck::cast(self.swap_le())
    }

    /// Reads and checks the fixed header at the front of `file`.
    pub fn parse(file: &[u8]) -> Result<Self> {
        if file.len() < HEADER_LEN {
            return Err(BigSaveError::corrupt(file.len(), "truncated header"));
        }
        let raw: BigSaveHeader = bytemuck::pod_read_unaligned(&file[..HEADER_LEN]);
        let header = raw.swap_le();

        if header.magic != MAGIC {
            return Err(BigSaveError::InvalidMagic);
        }
        if header.version != VERSION {
            return Err(BigSaveError::InvalidVersion(header.version));
        }
        if header.chunk_size == 0 {
            return Err(BigSaveError::corrupt(24, "zero chunk size"));
        }
        if (file.len() - HEADER_LEN) as u64 != header.body_len {
            return Err(BigSaveError::corrupt(
                file.len(),
                "body length does not match header",
            ));
        }
        Ok(header)
    }
}

// -----------------------------------------------------------------------------
// Body writing
// -----------------------------------------------------------------------------

pub fn write_tree(out: &mut Vec<u8>, name: &str, encoded: &[u8]) -> Result<()> {
    let len = u16::try_from(name.len()).map_err(|_| SaveDataError::LimitExceeded {
        what: "tree name length",
        limit: u16::MAX as u64,
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(encoded);
    Ok(())
}

pub fn write_slot(out: &mut Vec<u8>, generation: u32, node: Option<&SaveNode>) -> Result<()> {
    out.extend_from_slice(&generation.to_le_bytes());
    match node {
        Some(node) => {
            out.push(1);
            codec::encode_into(node, out)?;
        }
        None => out.push(0),
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Body parsing
// -----------------------------------------------------------------------------

pub struct ParsedTree {
    pub name: String,
    pub node: SaveNode,
    /// Byte range of the encoded node within the body.
    pub span: Range<usize>,
}

pub struct ParsedSlot {
    pub generation: u32,
    pub node: Option<SaveNode>,
}

pub struct ParsedBody {
    pub trees: Vec<ParsedTree>,
    pub slots: Vec<ParsedSlot>,
}

/// Parses a body; reported offsets are relative to the start of the file.
pub fn parse_body(body: &[u8], header: &BigSaveHeader) -> Result<ParsedBody> {
    let mut cursor = Cursor { body, pos: 0 };

    let mut trees = Vec::new();
    let mut previous: Option<String> = None;
    for _ in 0..header.tree_count {
        let len = u16::from_le_bytes(cursor.array()?) as usize;
        let at = cursor.offset();
        let name = std::str::from_utf8(cursor.take(len)?)
            .map_err(|_| BigSaveError::corrupt(at, "tree name is not UTF-8"))?
            .to_owned();
        if previous.as_deref().is_some_and(|p| p >= name.as_str()) {
            return Err(BigSaveError::corrupt(at, "tree names out of order"));
        }
        let (node, span) = cursor.node()?;
        previous = Some(name.clone());
        trees.push(ParsedTree { name, node, span });
    }

    let mut slots = Vec::new();
    for _ in 0..header.slot_count {
        let generation = u32::from_le_bytes(cursor.array()?);
        let at = cursor.offset();
        let node = match cursor.array::<1>()?[0] {
            0 => None,
            1 => Some(cursor.node()?.0),
            _ => return Err(BigSaveError::corrupt(at, "invalid slot marker")),
        };
        slots.push(ParsedSlot { generation, node });
    }

    if cursor.pos != body.len() {
        return Err(BigSaveError::corrupt(cursor.offset(), "trailing bytes"));
    }
    Ok(ParsedBody { trees, slots })
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Position within the whole file.
    fn offset(&self) -> usize {
        HEADER_LEN + self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let body: &'a [u8] = self.body;
        match body.get(self.pos..self.pos + n) {
            Some(bytes) => {
                self.pos += n;
                Ok(bytes)
            }
            None => Err(BigSaveError::corrupt(self.offset(), "truncated body")),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn node(&mut self) -> Result<(SaveNode, Range<usize>)> {
        let start = self.pos;
        let (node, used) = codec::decode_prefix(&self.body[start..]).map_err(|e| match e {
            SaveDataError::CorruptData { offset, reason } => {
                BigSaveError::corrupt(HEADER_LEN + start + offset, reason)
            }
            other => other.into(),
        })?;
        self.pos += used;
        Ok((node, start..self.pos))
    }
}
