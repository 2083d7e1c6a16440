//! # save_data
//!
//! Self-describing binary trees for nested application state.
//!
//! A [`SaveNode`] holds either a payload, a typed container of child nodes
//! or an external reference. Trees encode to a compact tagged format whose
//! exact size is known before any allocation.
//!
//! ```rust
//! use save_data::{SaveNode, codec};
//!
//! let mut player = SaveNode::new();
//! player.key_mut("hp")?.set(100i32);
//! player.key_mut("name")?.set_str("Aria");
//!
//! let bytes = codec::encode(&player)?;
//! assert_eq!(bytes.len(), codec::compute_size(&player));
//!
//! let loaded = codec::decode(&bytes)?;
//! assert_eq!(loaded["hp"].get::<i32>()?, 100);
//! assert_eq!(loaded["name"].raw(), Some(&b"Aria"[..]));
//! # Ok::<(), save_data::SaveDataError>(())
//! ```

pub mod codec;
mod dump;
pub mod error;
pub mod link;
pub mod node;
pub mod object;
pub mod scalar;
pub mod tag;

pub use codec::{compute_size, decode, encode};
pub use dump::PayloadDumper;
pub use error::{Result, SaveDataError};
pub use link::{Link, RefHandle};
pub use node::{Children, Content, SaveNode};
pub use object::SavedObject;
pub use scalar::Scalar;
pub use tag::{ContainerKind, SizeClass, Tag};

// Re-export bytemuck for users of the POD accessors
pub use bytemuck;
