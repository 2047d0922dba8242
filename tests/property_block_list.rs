//! Property-based tests for block list invariants
//!
//! Uses proptest to check counting, round-trips, and in-place resizing
//! across random operation sequences.

use blockstack::{BlockList, BlockListBuilder, OpenMode};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Add(Vec<u8>),
    Remove(usize),
    Set(usize, Vec<u8>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 0..600).prop_map(Op::Add),
        1 => any::<usize>().prop_map(Op::Remove),
        1 => (any::<usize>(), prop::collection::vec(any::<u8>(), 0..600))
            .prop_map(|(i, v)| Op::Set(i, v)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_matches_vec_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.blst");
        let list: BlockList<Vec<u8>> = BlockListBuilder::new()
            .page_capacity(4)
            .open(&path, OpenMode::Create)
            .unwrap();
        let mut model: Vec<Vec<u8>> = Vec::new();
        let mut adds = 0usize;
        let mut removes = 0usize;

        for op in ops {
            match op {
                Op::Add(value) => {
                    list.add(value.clone()).unwrap();
                    adds += 1;
                    // new records land in the first free block, so rebuild
                    // the model from the list's own order
                    model = list.to_vec().unwrap();
                    prop_assert!(model.contains(&value));
                }
                Op::Remove(i) if !model.is_empty() => {
                    let i = i % model.len();
                    list.remove(i).unwrap();
                    model.remove(i);
                    removes += 1;
                }
                Op::Set(i, value) if !model.is_empty() => {
                    let i = i % model.len();
                    list.set(i, value.clone()).unwrap();
                    model[i] = value;
                }
                _ => {}
            }
            prop_assert_eq!(list.len().unwrap(), adds - removes);
        }

        prop_assert_eq!(list.to_vec().unwrap(), model.clone());
        drop(list);

        let reopened: BlockList<Vec<u8>> = BlockList::open(&path, OpenMode::Open).unwrap();
        prop_assert_eq!(reopened.to_vec().unwrap(), model);
    }

    #[test]
    fn prop_round_trip_any_size(value in prop::collection::vec(any::<u8>(), 0..5000)) {
        let dir = TempDir::new().unwrap();
        let list: BlockList<Vec<u8>> = BlockList::create(dir.path().join("rt.blst")).unwrap();
        list.add(b"neighbour".to_vec()).unwrap();

        let position = list.add(value.clone()).unwrap();
        prop_assert_eq!(list.get(position).unwrap(), value);
        prop_assert_eq!(list.get(0).unwrap(), b"neighbour".to_vec());
    }

    #[test]
    fn prop_set_is_idempotent(
        initial in prop::collection::vec(any::<u8>(), 0..2000),
        replacement in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let dir = TempDir::new().unwrap();
        let list: BlockList<Vec<u8>> = BlockList::create(dir.path().join("idem.blst")).unwrap();
        list.add(initial).unwrap();

        list.set(0, replacement.clone()).unwrap();
        let once = list.stats().unwrap();
        let file_once = std::fs::read(list.path()).unwrap();

        list.set(0, replacement.clone()).unwrap();
        let twice = list.stats().unwrap();
        let file_twice = std::fs::read(list.path()).unwrap();

        prop_assert_eq!(once.total_blocks, twice.total_blocks);
        prop_assert_eq!(once.empty_blocks, twice.empty_blocks);
        prop_assert_eq!(file_once, file_twice);
        prop_assert_eq!(list.get(0).unwrap(), replacement);
    }

    #[test]
    fn prop_clear_then_recount(count in 0usize..40) {
        let dir = TempDir::new().unwrap();
        let list: BlockList<String> = BlockList::create(dir.path().join("clear.blst")).unwrap();
        for i in 0..count {
            list.add(format!("record-{}", i)).unwrap();
        }
        list.clear().unwrap();
        prop_assert_eq!(list.len().unwrap(), 0);

        for i in 0..count / 2 {
            list.add(format!("again-{}", i)).unwrap();
        }
        prop_assert_eq!(list.len().unwrap(), count / 2);
        prop_assert_eq!(list.to_vec().unwrap().len(), count / 2);
    }
}
