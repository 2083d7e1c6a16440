//! Human-readable dump of a save tree, for debugging only.
//!
//! The output format is not stable and is never parsed back.

use std::fmt::{self, Write};

use crate::node::{Children, Content, SaveNode};

/// Caller-supplied payload printer. Returning `None` falls back to the
/// built-in rendering.
pub type PayloadDumper<'a> = &'a dyn Fn(&[u8], &mut dyn Write) -> Option<fmt::Result>;

impl SaveNode {
    /// Indented multi-line dump with `spacing` spaces per level.
    pub fn debug_repr(&self, spacing: usize) -> String {
        self.debug_repr_with(spacing, &|_, _| None)
    }

    /// Like [`debug_repr`](Self::debug_repr), but every payload goes
    /// through `payload` first.
    pub fn debug_repr_with(&self, spacing: usize, payload: PayloadDumper<'_>) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = dump(self, &mut out, spacing, 0, payload);
        out
    }
}

impl fmt::Display for SaveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dump(self, f, 2, 0, &|_, _| None)
    }
}

fn dump<W: Write>(
    node: &SaveNode,
    out: &mut W,
    spacing: usize,
    level: usize,
    payload: PayloadDumper<'_>,
) -> fmt::Result {
    match node.content() {
        Content::Empty => out.write_str("<empty>")?,
        Content::Payload { bytes, extended } => {
            if *extended {
                out.write_str("<extended> ")?;
            }
            match payload(bytes, &mut *out) {
                Some(done) => done?,
                None => dump_payload(bytes, out)?,
            }
        }
        Content::Reference(handle) => write!(out, "<ref {handle}>")?,
        Content::Subfile(name) => write!(out, "BigSave file {name:?}")?,
        Content::Children(children) => {
            let inner = level + spacing;
            let (open, close) = match children {
                Children::List(_) | Children::WideList(_) => ('[', ']'),
                _ => ('{', '}'),
            };
            out.write_char(open)?;
            out.write_char('\n')?;
            match children {
                Children::StringMap(m) => {
                    for (key, child) in m {
                        write!(out, "{:inner$}{key:?} = ", "")?;
                        dump(child, out, spacing, inner, payload)?;
                    }
                }
                Children::AddressMap(m) => {
                    for (key, child) in m {
                        write!(out, "{:inner$}{key:#x} = ", "")?;
                        dump(child, out, spacing, inner, payload)?;
                    }
                }
                Children::ShortMap(m) => {
                    for (key, child) in m {
                        write!(out, "{:inner$}{key} = ", "")?;
                        dump(child, out, spacing, inner, payload)?;
                    }
                }
                Children::List(v) | Children::WideList(v) => {
                    for child in v {
                        write!(out, "{:inner$}", "")?;
                        dump(child, out, spacing, inner, payload)?;
                    }
                }
            }
            write!(out, "{:level$}{close}", "")?;
        }
    }
    out.write_char('\n')
}

/// Printable text is quoted; 1, 2, 4 and 8 byte payloads show as integers.
fn dump_payload(bytes: &[u8], out: &mut impl Write) -> fmt::Result {
    if bytes.len() > 2 {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if text.chars().all(printable) {
                return write!(out, "{text:?}");
            }
        }
    }
    match bytes.len() {
        1 => write!(out, "(u8) {}", bytes[0]),
        2 => write!(out, "(i16) {}", i16::from_le_bytes([bytes[0], bytes[1]])),
        4 => {
            let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
            write!(out, "(i32) {}", i32::from_le_bytes(raw))
        }
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            write!(out, "(i64) {}", i64::from_le_bytes(raw))
        }
        n => write!(out, "block of {n} bytes"),
    }
}

fn printable(c: char) -> bool {
    !c.is_control() || matches!(c, '\t' | '\n' | '\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_nested_map() {
        let mut root = SaveNode::new();
        root.key_mut("name").unwrap().set_str("Aria");
        root.key_mut("hp").unwrap().set(100i32);
        let text = root.debug_repr(2);
        assert_eq!(text, "{\n  \"hp\" = (i32) 100\n  \"name\" = \"Aria\"\n}\n");
    }

    #[test]
    fn display_matches_two_space_repr() {
        let mut root = SaveNode::new();
        root.address_mut(16).unwrap().set_bytes(vec![0u8; 5]);
        assert_eq!(root.to_string(), root.debug_repr(2));
        assert!(root.to_string().contains("0x10 = block of 5 bytes"));
    }

    #[test]
    fn custom_payload_dumper_runs_first() {
        let mut root = SaveNode::new();
        let rgb = vec![0xff, 0x80, 0x00];
        root.key_mut("rgb").unwrap().set_bytes(rgb);
        root.key_mut("hp").unwrap().set(7u8);

        let hex = |bytes: &[u8], out: &mut dyn Write| {
            let [r, g, b] = bytes else { return None };
            Some(write!(out, "#{r:02x}{g:02x}{b:02x}"))
        };
        let text = root.debug_repr_with(2, &hex);
        assert!(text.contains("\"rgb\" = #ff8000"));
        assert!(text.contains("\"hp\" = (u8) 7"));
    }
}
