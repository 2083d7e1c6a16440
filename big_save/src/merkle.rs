//! Chunked blake3 hashing of a container body.
//!
//! The body is split into fixed-size chunks. Each chunk gets a leaf hash,
//! and the leaves fold into a single root that the file header records.
//! Leaf hashes from the last store are kept around so the next store can
//! tell which chunks actually changed.

use blake3::{Hash, Hasher};

#[inline]
fn hash_leaf(bytes: &[u8]) -> Hash {
    let mut h = Hasher::new();
    h.update(bytes);
    h.finalize()
}

#[inline]
fn hash_parent(left: &Hash, right: &Hash) -> Hash {
    let mut h = Hasher::new();
    h.update(left.as_bytes());
    h.update(right.as_bytes());
    h.finalize()
}

/// Leaf hash of every `chunk_size` slice of `data`. The last chunk may be short.
pub fn leaf_hashes(data: &[u8], chunk_size: usize) -> Vec<Hash> {
    assert!(chunk_size > 0);
    data.chunks(chunk_size).map(hash_leaf).collect()
}

/// Fold leaf hashes into a root.
///
/// Complete subtrees are merged as soon as they form, so only one pending
/// hash per level is kept. Leftover subtrees fold from the lowest level
/// upward. No leaves hash like an empty chunk.
pub fn root_from_leaves(leaves: &[Hash]) -> Hash {
    let mut level = [Hash::from([0u8; 32]); 64];
    let mut filled = [false; 64];

    for leaf in leaves {
        let mut h = *leaf;
        let mut depth = 0;
        while filled[depth] {
            h = hash_parent(&level[depth], &h);
            filled[depth] = false;
            depth += 1;
        }
        level[depth] = h;
        filled[depth] = true;
    }

    let mut root: Option<Hash> = None;
    for depth in 0..64 {
        if filled[depth] {
            root = Some(match root {
                None => level[depth],
                Some(r) => hash_parent(&level[depth], &r),
            });
        }
    }

    root.unwrap_or_else(|| hash_leaf(&[]))
}

/// Root hash of `data` split into `chunk_size` leaves.
pub fn merkle_root(data: &[u8], chunk_size: usize) -> Hash {
    root_from_leaves(&leaf_hashes(data, chunk_size))
}

/// Indices of chunks in `new` that differ from `old` or did not exist in it.
pub fn changed_chunks<'a>(old: &'a [Hash], new: &'a [Hash]) -> impl Iterator<Item = usize> + 'a {
    new.iter()
        .enumerate()
        .filter(move |(i, h)| old.get(*i) != Some(*h))
        .map(|(i, _)| i)
}
