//! Patched stores must leave the same bytes on disk as a full rewrite.

use std::collections::BTreeMap;
use std::fs;

use big_save::{BigSave, BigSaveOptions, SaveNode, save_path};
use proptest::prelude::*;

fn edits() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    let blob = prop::collection::vec(any::<u8>(), 0..120);
    prop::collection::vec(("[a-d]{1,2}", blob), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_patched_file_matches_full_write(steps in prop::collection::vec(edits(), 1..5)) {
        let dir = tempfile::tempdir().unwrap();
        let options = BigSaveOptions::default().save_at_destroy(false).chunk_size(32);

        let mut expected: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut patched = BigSave::load(dir.path().join("patched"), options).unwrap();
        for step in &steps {
            for (name, bytes) in step {
                let tree = patched.tree_mut(name).unwrap();
                tree.key_mut("blob").unwrap().set_bytes(bytes.clone());
                expected.insert(name.clone(), bytes.clone());
            }
            patched.store().unwrap();
        }

        let whole_options = options.reduce_write(false);
        let mut whole = BigSave::load(dir.path().join("whole"), whole_options).unwrap();
        for (name, bytes) in &expected {
            let mut tree = SaveNode::new();
            tree.key_mut("blob").unwrap().set_bytes(bytes.clone());
            whole.insert_tree(name, tree).unwrap();
        }
        whole.store().unwrap();

        let a = fs::read(save_path(dir.path().join("patched"))).unwrap();
        let b = fs::read(save_path(dir.path().join("whole"))).unwrap();
        prop_assert_eq!(a, b);
    }
}
