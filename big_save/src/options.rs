//! Behaviour switches for an open container.

/// Default leaf size for change tracking and integrity hashing.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Options fixed when a [`BigSave`](crate::BigSave) is opened.
///
/// ```rust
/// use big_save::BigSaveOptions;
///
/// let opts = BigSaveOptions::default().reduce_write(false).chunk_size(512);
/// assert!(opts.save_at_destroy);
/// assert!(!opts.reduce_write);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigSaveOptions {
    /// Store pending changes when the container is dropped.
    pub save_at_destroy: bool,
    /// Only rewrite chunks whose hash changed since the last store or load.
    pub reduce_write: bool,
    /// Skip hash verification and the structural walk on load.
    pub reduced_check: bool,
    /// Leaf size in bytes; must be non-zero.
    pub chunk_size: u32,
}

impl Default for BigSaveOptions {
    fn default() -> Self {
        Self {
            save_at_destroy: true,
            reduce_write: true,
            reduced_check: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl BigSaveOptions {
    pub fn save_at_destroy(mut self, on: bool) -> Self {
        self.save_at_destroy = on;
        self
    }

    pub fn reduce_write(mut self, on: bool) -> Self {
        self.reduce_write = on;
        self
    }

    pub fn reduced_check(mut self, on: bool) -> Self {
        self.reduced_check = on;
        self
    }

    pub fn chunk_size(mut self, bytes: u32) -> Self {
        self.chunk_size = bytes;
        self
    }
}
