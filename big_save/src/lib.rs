//! # big_save
//!
//! A single `.sav` file holding many named save trees.
//!
//! Nodes that several places must observe live in a [`ReferenceTable`]
//! and are linked by generational [`RefHandle`]s. Other containers can be
//! linked as subfiles and are opened lazily; a handle shared by the root
//! container can be stored in any subfile opened beneath it. The body is
//! hashed in chunks; loading verifies the root hash, and storing rewrites
//! only the chunks that changed.
//!
//! ```rust
//! use big_save::{BigSave, BigSaveOptions};
//!
//! let dir = tempfile::tempdir()?;
//! let name = dir.path().join("slot1");
//!
//! let mut save = BigSave::load(&name, BigSaveOptions::default())?;
//! save.tree_mut("player")?.key_mut("hp")?.set(100i32);
//! save.store()?;
//! save.close();
//!
//! let save = BigSave::load(&name, BigSaveOptions::default())?;
//! assert_eq!(save.tree("player").unwrap()["hp"].get::<i32>()?, 100);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod file;
pub mod layout;
pub mod merkle;
pub mod options;
pub mod reference;
pub mod subfile;

pub use error::{BigSaveError, Result};
pub use file::{BigSave, Resolved, StoreStats, save_path};
pub use options::BigSaveOptions;
pub use reference::ReferenceTable;
pub use subfile::Subfile;

pub use save_data::{Link, RefHandle, SaveNode, SavedObject};
