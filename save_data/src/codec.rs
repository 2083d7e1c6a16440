//! Binary encoding of save trees.
//!
//! ```text
//! node       := tag [len payload] | tag body
//! StringMap  := count:u16 (key_len:u8 key node)*
//! AddressMap := count:u16 (key:u64 node)*
//! ShortMap   := count:u16 (key:u16 node)*
//! List       := count:u16 node*
//! WideList   := count:u32 node*
//! ```
//!
//! All integers are little-endian. `len` is 1, 2 or 4 bytes wide as given
//! by the tag's size class.

use std::io::{Read, Write};
use std::str;

use crate::error::{Result, SaveDataError};
use crate::link::RefHandle;
use crate::node::{Children, Content, SaveNode};
use crate::tag::{ContainerKind, SizeClass, Special, Tag};

/// Deepest nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

fn length_width(len: usize) -> usize {
    SizeClass::for_len(len).map_or(4, SizeClass::width)
}

/// Exact number of bytes [`encode`] produces for `node`.
pub fn compute_size(node: &SaveNode) -> usize {
    let body = match node.content() {
        Content::Empty => 0,
        Content::Payload { bytes, .. } => length_width(bytes.len()) + bytes.len(),
        Content::Reference(_) => 1 + RefHandle::ENCODED_LEN,
        Content::Subfile(name) => length_width(name.len()) + name.len(),
        Content::Children(children) => {
            let keys: usize = match children {
                Children::StringMap(m) => m.keys().map(|k| 1 + k.len()).sum(),
                Children::AddressMap(m) => 8 * m.len(),
                Children::ShortMap(m) => 2 * m.len(),
                Children::List(_) | Children::WideList(_) => 0,
            };
            let values: usize = children.values().map(compute_size).sum();
            children.kind().count_width() + keys + values
        }
    };
    1 + body
}

/// Encodes `node` into a buffer allocated at its exact size.
pub fn encode(node: &SaveNode) -> Result<Vec<u8>> {
    let size = compute_size(node);
    let mut out = Vec::with_capacity(size);
    encode_into(node, &mut out)?;
    debug_assert_eq!(out.len(), size);
    Ok(out)
}

/// Appends the encoding of `node` to `out`.
pub fn encode_into(node: &SaveNode, out: &mut Vec<u8>) -> Result<()> {
    out.push(node.tag()?.to_byte());
    match node.content() {
        Content::Empty => {}
        Content::Payload { bytes, .. } => write_payload(bytes, out)?,
        Content::Reference(handle) => write_payload(&handle.to_bytes(), out)?,
        Content::Subfile(name) => write_payload(name.as_bytes(), out)?,
        Content::Children(children) => {
            children.check_limits()?;
            write_count(children.kind(), children.len(), out);
            match children {
                Children::StringMap(m) => {
                    for (key, child) in m {
                        out.push(key.len() as u8);
                        out.extend_from_slice(key.as_bytes());
                        encode_into(child, out)?;
                    }
                }
                Children::AddressMap(m) => {
                    for (key, child) in m {
                        out.extend_from_slice(&key.to_le_bytes());
                        encode_into(child, out)?;
                    }
                }
                Children::ShortMap(m) => {
                    for (key, child) in m {
                        out.extend_from_slice(&key.to_le_bytes());
                        encode_into(child, out)?;
                    }
                }
                Children::List(v) | Children::WideList(v) => {
                    for child in v {
                        encode_into(child, out)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn write_payload(bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
    match SizeClass::for_len(bytes.len())? {
        SizeClass::Byte => out.push(bytes.len() as u8),
        SizeClass::Short => out.extend_from_slice(&(bytes.len() as u16).to_le_bytes()),
        SizeClass::Int | SizeClass::None => {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes())
        }
    }
    out.extend_from_slice(bytes);
    Ok(())
}

// Callers have already checked `len` against the kind's limit.
fn write_count(kind: ContainerKind, len: usize, out: &mut Vec<u8>) {
    if kind.count_width() == 4 {
        out.extend_from_slice(&(len as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(len as u16).to_le_bytes());
    }
}

/// Writes the encoding of `node` to `out`.
pub fn write_to(node: &SaveNode, mut out: impl Write) -> Result<()> {
    out.write_all(&encode(node)?)?;
    Ok(())
}

/// Reads `input` to the end and decodes it as a single node.
pub fn read_from(mut input: impl Read) -> Result<SaveNode> {
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;
    decode(&buf)
}

/// Decodes a buffer holding exactly one node.
pub fn decode(buf: &[u8]) -> Result<SaveNode> {
    let (node, used) = decode_prefix(buf)?;
    if used != buf.len() {
        return Err(SaveDataError::corrupt(used, "trailing bytes after node"));
    }
    Ok(node)
}

/// Decodes one node from the front of `buf`, returning it with the number
/// of bytes consumed.
pub fn decode_prefix(buf: &[u8]) -> Result<(SaveNode, usize)> {
    let mut reader = Reader { buf, pos: 0 };
    let node = reader.node(0)?;
    Ok((node, reader.pos))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(SaveDataError::corrupt(self.pos, "length past end of data"));
        }
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn length(&mut self, size: SizeClass) -> Result<usize> {
        Ok(match size {
            SizeClass::None => 0,
            SizeClass::Byte => self.u8()? as usize,
            SizeClass::Short => self.u16()? as usize,
            SizeClass::Int => self.u32()? as usize,
        })
    }

    fn count(&mut self, kind: ContainerKind) -> Result<usize> {
        let at = self.pos;
        let count = if kind.count_width() == 4 {
            self.u32()? as usize
        } else {
            self.u16()? as usize
        };
        // every entry needs at least its tag byte
        if count > self.remaining() {
            return Err(SaveDataError::corrupt(at, "entry count past end of data"));
        }
        Ok(count)
    }

    fn node(&mut self, depth: usize) -> Result<SaveNode> {
        if depth > MAX_DEPTH {
            return Err(SaveDataError::corrupt(self.pos, "nesting too deep"));
        }
        let tag_at = self.pos;
        let tag = Tag::from_byte(self.u8()?, tag_at)?;

        if tag.size != SizeClass::None {
            let len = self.length(tag.size)?;
            let payload_at = self.pos;
            let bytes = self.take(len)?;
            let content = match tag.special {
                Special::None => Content::Payload {
                    bytes: bytes.to_vec(),
                    extended: tag.extended,
                },
                Special::Referenced => {
                    let handle = RefHandle::from_bytes(bytes)
                        .ok_or(SaveDataError::corrupt(payload_at, "bad reference width"))?;
                    Content::Reference(handle)
                }
                Special::Subfile => {
                    let name = str::from_utf8(bytes)
                        .map_err(|_| SaveDataError::corrupt(payload_at, "bad subfile name"))?;
                    if name.is_empty() {
                        return Err(SaveDataError::corrupt(payload_at, "empty subfile name"));
                    }
                    Content::Subfile(name.to_owned())
                }
            };
            return Ok(SaveNode::from_content(content));
        }

        let children = match tag.kind {
            ContainerKind::Undefined => return Ok(SaveNode::new()),
            ContainerKind::Pointer => {
                return Err(SaveDataError::NotImplemented("pointer container kind"));
            }
            ContainerKind::StringMap => {
                let count = self.count(tag.kind)?;
                let mut map = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key_len = self.u8()? as usize;
                    let key_at = self.pos;
                    let key = str::from_utf8(self.take(key_len)?)
                        .map_err(|_| SaveDataError::corrupt(key_at, "key is not UTF-8"))?;
                    let child = self.node(depth + 1)?;
                    if map.insert(key.to_owned(), child).is_some() {
                        return Err(SaveDataError::corrupt(key_at, "duplicate key"));
                    }
                }
                Children::StringMap(map)
            }
            ContainerKind::AddressMap => {
                let count = self.count(tag.kind)?;
                let mut map = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key_at = self.pos;
                    let key = self.u64()?;
                    let child = self.node(depth + 1)?;
                    if map.insert(key, child).is_some() {
                        return Err(SaveDataError::corrupt(key_at, "duplicate key"));
                    }
                }
                Children::AddressMap(map)
            }
            ContainerKind::ShortMap => {
                let count = self.count(tag.kind)?;
                let mut map = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key_at = self.pos;
                    let key = self.u16()?;
                    let child = self.node(depth + 1)?;
                    if map.insert(key, child).is_some() {
                        return Err(SaveDataError::corrupt(key_at, "duplicate key"));
                    }
                }
                Children::ShortMap(map)
            }
            ContainerKind::List | ContainerKind::WideList => {
                let count = self.count(tag.kind)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.node(depth + 1)?);
                }
                if tag.kind == ContainerKind::List {
                    Children::List(items)
                } else {
                    Children::WideList(items)
                }
            }
        };
        Ok(SaveNode::from_content(Content::Children(children)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_node_is_one_byte() -> Result<()> {
        let node = SaveNode::new();
        assert_eq!(encode(&node)?, [0x00]);
        assert_eq!(decode(&[0x00])?, node);
        Ok(())
    }

    #[test]
    fn string_map_layout() -> Result<()> {
        let mut node = SaveNode::new();
        node.key_mut("hp")?.set(100i32);
        let bytes = encode(&node)?;
        assert_eq!(
            bytes,
            [
                0x01, // string map
                1, 0, // one entry
                2, b'h', b'p', // key
                0x04, 4, 100, 0, 0, 0, // 1-byte length, i32 payload
            ]
        );
        assert_eq!(compute_size(&node), bytes.len());
        Ok(())
    }

    #[test]
    fn empty_container_keeps_kind() -> Result<()> {
        let node = SaveNode::container(ContainerKind::WideList)?;
        let bytes = encode(&node)?;
        assert_eq!(bytes, [0x43, 0, 0, 0, 0]);
        let back = decode(&bytes)?;
        assert_eq!(back.kind(), ContainerKind::WideList);
        assert!(back.is_empty());
        Ok(())
    }

    #[test]
    fn count_beyond_buffer_is_corrupt() {
        // string map declaring 0xffff entries with nothing behind it
        let err = decode(&[0x01, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, SaveDataError::CorruptData { offset: 1, .. }));
    }

    #[test]
    fn payload_length_beyond_buffer_is_corrupt() {
        let err = decode(&[0x04, 10, 1, 2]).unwrap_err();
        assert!(matches!(err, SaveDataError::CorruptData { .. }));
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert!(matches!(
            decode(&[0x00, 0x00]),
            Err(SaveDataError::CorruptData { offset: 1, .. })
        ));
        let (node, used) = decode_prefix(&[0x00, 0x00]).unwrap();
        assert_eq!(used, 1);
        assert_eq!(node, SaveNode::new());
    }

    #[test]
    fn reference_round_trip() -> Result<()> {
        let node = SaveNode::referenced(RefHandle::new(5, 2));
        let bytes = encode(&node)?;
        assert_eq!(bytes[0], 0x24);
        assert_eq!(decode(&bytes)?.reference(), Some(RefHandle::new(5, 2)));
        Ok(())
    }

    #[test]
    fn short_reference_payload_is_corrupt() {
        assert!(matches!(
            decode(&[0x24, 2, 0, 0]),
            Err(SaveDataError::CorruptData { offset: 2, .. })
        ));
    }

    #[test]
    fn pointer_tag_not_implemented() {
        assert!(matches!(
            decode(&[0x40]),
            Err(SaveDataError::NotImplemented(_))
        ));
    }

    #[test]
    fn deep_nesting_rejected() {
        let mut buf = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            buf.extend_from_slice(&[0x03, 1, 0]);
        }
        buf.push(0x00);
        assert!(matches!(
            decode(&buf),
            Err(SaveDataError::CorruptData { .. })
        ));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let buf = [0x42, 2, 0, 7, 0, 0x00, 7, 0, 0x00];
        assert!(matches!(
            decode(&buf),
            Err(SaveDataError::CorruptData { offset: 6, .. })
        ));
    }

    #[test]
    fn large_payload_uses_wide_length() -> Result<()> {
        let node = SaveNode::from_bytes(vec![7u8; 70_000]);
        let bytes = encode(&node)?;
        assert_eq!(bytes[0], 0x0c);
        assert_eq!(bytes.len(), 1 + 4 + 70_000);
        assert_eq!(decode(&bytes)?, node);
        Ok(())
    }

    #[test]
    fn reader_and_writer() -> Result<()> {
        let mut node = SaveNode::new();
        node.address_mut(42)?.set_str("answer");
        let mut out = Vec::new();
        write_to(&node, &mut out)?;
        assert_eq!(read_from(out.as_slice())?, node);
        Ok(())
    }
}
