//! Property-based tests for the save tree codec.

use std::collections::BTreeMap;

use proptest::prelude::*;
use save_data::{Children, RefHandle, SaveNode, codec};

//
// -----------------------------------------------------------------------------
// Strategies
// -----------------------------------------------------------------------------

fn extended(bytes: Vec<u8>) -> SaveNode {
    let mut node = SaveNode::from_bytes(bytes);
    node.set_extended(true).unwrap();
    node
}

fn link((index, generation): (u32, u32)) -> SaveNode {
    SaveNode::referenced(RefHandle::new(index, generation))
}

fn node(children: Children) -> SaveNode {
    SaveNode::from_children(children).unwrap()
}

fn leaf() -> impl Strategy<Value = SaveNode> {
    prop_oneof![
        Just(SaveNode::new()),
        any::<i32>().prop_map(SaveNode::from_scalar),
        any::<f64>().prop_map(SaveNode::from_scalar),
        prop::collection::vec(any::<u8>(), 0..300)
            .prop_map(SaveNode::from_bytes),
        prop::collection::vec(any::<u8>(), 1..16).prop_map(extended),
        (any::<u32>(), any::<u32>()).prop_map(link),
        "[a-z]{1,12}".prop_map(|name| SaveNode::subfile(&name).unwrap()),
    ]
}

fn tree() -> impl Strategy<Value = SaveNode> {
    leaf().prop_recursive(4, 96, 8, |inner| {
        prop_oneof![
            prop::collection::btree_map("[a-zA-Z0-9_]{0,16}", inner.clone(), 0..8)
                .prop_map(|m| node(Children::StringMap(m))),
            prop::collection::btree_map(any::<u64>(), inner.clone(), 0..8)
                .prop_map(|m| node(Children::AddressMap(m))),
            prop::collection::btree_map(any::<u16>(), inner.clone(), 0..8)
                .prop_map(|m| node(Children::ShortMap(m))),
            prop::collection::vec(inner.clone(), 0..8)
                .prop_map(|v| node(Children::List(v))),
            prop::collection::vec(inner, 0..8)
                .prop_map(|v| node(Children::WideList(v))),
        ]
    })
}

//
// -----------------------------------------------------------------------------
// Codec Properties
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_round_trip(node in tree()) {
        let bytes = codec::encode(&node).unwrap();
        let back = codec::decode(&bytes).unwrap();
        prop_assert_eq!(back, node);
    }
}

proptest! {
    #[test]
    fn prop_computed_size_is_exact(node in tree()) {
        let bytes = codec::encode(&node).unwrap();
        prop_assert_eq!(codec::compute_size(&node), bytes.len());
    }
}

proptest! {
    #[test]
    fn prop_truncated_buffer_fails(node in tree(), cut in any::<prop::sample::Index>()) {
        let bytes = codec::encode(&node).unwrap();
        let cut = cut.index(bytes.len());
        prop_assert!(codec::decode(&bytes[..cut]).is_err());
    }
}

// Arbitrary input may be rejected but must never panic or over-read.
proptest! {
    #[test]
    fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }
}

proptest! {
    #[test]
    fn prop_decoded_tree_re_encodes_identically(node in tree()) {
        let bytes = codec::encode(&node).unwrap();
        let again = codec::encode(&codec::decode(&bytes).unwrap()).unwrap();
        prop_assert_eq!(again, bytes);
    }
}

//
// -----------------------------------------------------------------------------
// Container Properties
// -----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_truncate_keeps_prefix(
        keys in prop::collection::btree_set(any::<u64>(), 0..40),
        keep in 0usize..50
    ) {
        let mut map = SaveNode::new();
        for k in &keys {
            map.address_mut(*k).unwrap().set(*k);
        }
        map.truncate(keep);

        let expected: BTreeMap<u64, u64> = keys.iter().take(keep).map(|k| (*k, *k)).collect();
        prop_assert_eq!(map.len(), expected.len());
        for (k, v) in expected {
            prop_assert_eq!(map.address(k).unwrap().get::<u64>().unwrap(), v);
        }
    }
}
