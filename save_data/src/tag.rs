//! The one-byte node tag.
//!
//! ```text
//!  bit   7        6     5          4        3..2        1..0
//!        EXTENDED KIND' REFERENCED SUBFILE  SIZE CLASS  KIND
//! ```
//!
//! Container kind uses bits 0, 1 and 6. The size class selects the width
//! of the length field in front of an attached payload. Tags are parsed
//! into [`Tag`] and checked once, so the rest of the crate never looks at
//! raw bit patterns.

use std::fmt;

use crate::error::{Result, SaveDataError};

pub const KIND_MASK: u8 = 0x43;
pub const SIZE_MASK: u8 = 0x0c;
pub const SUBFILE: u8 = 0x10;
pub const REFERENCED: u8 = 0x20;
pub const EXTENDED_TYPE: u8 = 0x80;

/// Structural type of a node's children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Undefined,
    StringMap,
    AddressMap,
    ShortMap,
    List,
    WideList,
    /// Reserved for cross-tree pointers. Never constructible.
    Pointer,
}

impl ContainerKind {
    pub const fn bits(self) -> u8 {
        match self {
            ContainerKind::Undefined => 0x00,
            ContainerKind::StringMap => 0x01,
            ContainerKind::AddressMap => 0x02,
            ContainerKind::List => 0x03,
            ContainerKind::Pointer => 0x40,
            ContainerKind::ShortMap => 0x42,
            ContainerKind::WideList => 0x43,
        }
    }

    /// Maximum number of direct children, `None` for non-containers.
    pub const fn limit(self) -> Option<u64> {
        match self {
            ContainerKind::StringMap
            | ContainerKind::AddressMap
            | ContainerKind::ShortMap
            | ContainerKind::List => Some(u16::MAX as u64),
            ContainerKind::WideList => Some(u32::MAX as u64),
            ContainerKind::Undefined | ContainerKind::Pointer => None,
        }
    }

    /// Width in bytes of the entry count written before the children.
    pub const fn count_width(self) -> usize {
        match self {
            ContainerKind::WideList => 4,
            ContainerKind::Undefined | ContainerKind::Pointer => 0,
            _ => 2,
        }
    }

    pub const fn is_container(self) -> bool {
        !matches!(self, ContainerKind::Undefined)
    }

    fn from_bits(bits: u8, offset: usize) -> Result<Self> {
        match bits {
            0x00 => Ok(ContainerKind::Undefined),
            0x01 => Ok(ContainerKind::StringMap),
            0x02 => Ok(ContainerKind::AddressMap),
            0x03 => Ok(ContainerKind::List),
            0x40 => Err(SaveDataError::NotImplemented("pointer container kind")),
            0x42 => Ok(ContainerKind::ShortMap),
            0x43 => Ok(ContainerKind::WideList),
            _ => Err(SaveDataError::corrupt(offset, "unknown container kind")),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Undefined => "undefined",
            ContainerKind::StringMap => "string map",
            ContainerKind::AddressMap => "address map",
            ContainerKind::ShortMap => "short map",
            ContainerKind::List => "list",
            ContainerKind::WideList => "wide list",
            ContainerKind::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// Width of the length field in front of a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeClass {
    None,
    Byte,
    Short,
    Int,
}

impl SizeClass {
    /// Smallest class able to describe `len` payload bytes.
    pub fn for_len(len: usize) -> Result<Self> {
        if len <= u8::MAX as usize {
            Ok(SizeClass::Byte)
        } else if len <= u16::MAX as usize {
            Ok(SizeClass::Short)
        } else if len <= u32::MAX as usize {
            Ok(SizeClass::Int)
        } else {
            Err(SaveDataError::LimitExceeded {
                what: "payload length",
                limit: u32::MAX as u64,
            })
        }
    }

    pub const fn width(self) -> usize {
        match self {
            SizeClass::None => 0,
            SizeClass::Byte => 1,
            SizeClass::Short => 2,
            SizeClass::Int => 4,
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            SizeClass::None => 0x00,
            SizeClass::Byte => 0x04,
            SizeClass::Short => 0x08,
            SizeClass::Int => 0x0c,
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits & SIZE_MASK {
            0x04 => SizeClass::Byte,
            0x08 => SizeClass::Short,
            0x0c => SizeClass::Int,
            _ => SizeClass::None,
        }
    }
}

/// How an attached payload is to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Special {
    None,
    Subfile,
    Referenced,
}

impl Special {
    const fn bits(self) -> u8 {
        match self {
            Special::None => 0,
            Special::Subfile => SUBFILE,
            Special::Referenced => REFERENCED,
        }
    }
}

/// A validated tag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub kind: ContainerKind,
    pub size: SizeClass,
    pub special: Special,
    pub extended: bool,
}

impl Tag {
    pub const EMPTY: Tag = Tag {
        kind: ContainerKind::Undefined,
        size: SizeClass::None,
        special: Special::None,
        extended: false,
    };

    pub const fn container(kind: ContainerKind) -> Self {
        Tag {
            kind,
            size: SizeClass::None,
            special: Special::None,
            extended: false,
        }
    }

    pub const fn payload(size: SizeClass, special: Special, extended: bool) -> Self {
        Tag {
            kind: ContainerKind::Undefined,
            size,
            special,
            extended,
        }
    }

    pub const fn to_byte(self) -> u8 {
        let ext = if self.extended { EXTENDED_TYPE } else { 0 };
        self.kind.bits() | self.size.bits() | self.special.bits() | ext
    }

    /// Parses and validates a tag read at `offset`.
    pub fn from_byte(byte: u8, offset: usize) -> Result<Self> {
        let kind = ContainerKind::from_bits(byte & KIND_MASK, offset)?;
        let size = SizeClass::from_bits(byte);
        let subfile = byte & SUBFILE != 0;
        let referenced = byte & REFERENCED != 0;
        let extended = byte & EXTENDED_TYPE != 0;

        if kind.is_container() {
            if size != SizeClass::None || subfile || referenced || extended {
                return Err(SaveDataError::corrupt(offset, "payload bits on container"));
            }
            return Ok(Tag::container(kind));
        }

        let special = match (subfile, referenced) {
            (false, false) => Special::None,
            (true, false) => Special::Subfile,
            (false, true) => Special::Referenced,
            (true, true) => {
                return Err(SaveDataError::corrupt(offset, "both special flags set"));
            }
        };

        if size == SizeClass::None && (special != Special::None || extended) {
            return Err(SaveDataError::corrupt(offset, "flag set without a payload"));
        }
        if extended && special != Special::None {
            return Err(SaveDataError::corrupt(offset, "extended special payload"));
        }

        Ok(Tag::payload(size, special, extended))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_legal_byte_round_trips() {
        let mut legal = 0;
        for byte in 0..=u8::MAX {
            if let Ok(tag) = Tag::from_byte(byte, 0) {
                assert_eq!(tag.to_byte(), byte, "tag {byte:#04x}");
                legal += 1;
            }
        }
        // 1 empty + 5 containers + 3 size classes * (plain, extended, subfile, referenced)
        assert_eq!(legal, 1 + 5 + 3 * 4);
    }

    #[test]
    fn pointer_kind_is_not_implemented() {
        assert!(matches!(
            Tag::from_byte(0x40, 0),
            Err(SaveDataError::NotImplemented(_))
        ));
    }

    #[test]
    fn container_with_size_bits_is_corrupt() {
        let byte = ContainerKind::StringMap.bits() | SizeClass::Byte.bits();
        assert!(matches!(
            Tag::from_byte(byte, 7),
            Err(SaveDataError::CorruptData { offset: 7, .. })
        ));
    }

    #[test]
    fn size_class_thresholds() {
        assert_eq!(SizeClass::for_len(0).unwrap(), SizeClass::Byte);
        assert_eq!(SizeClass::for_len(255).unwrap(), SizeClass::Byte);
        assert_eq!(SizeClass::for_len(256).unwrap(), SizeClass::Short);
        assert_eq!(SizeClass::for_len(65_536).unwrap(), SizeClass::Int);
    }
}
