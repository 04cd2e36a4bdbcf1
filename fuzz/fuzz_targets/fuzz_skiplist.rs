#![no_main]

use kvstone::collections::skip_list::skiplist::SkipList;
use kvstone::collections::skip_list::OrdComparator;
use libfuzzer_sys::arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeSet;

#[derive(arbitrary::Arbitrary, Debug)]
enum SkipListMethod {
    Insert { key: Vec<u8> },
    Remove { key: Vec<u8> },
    LowerBound { key: Vec<u8> },
    FindLessThan { key: Vec<u8> },
}

fuzz_target!(|methods: Vec<SkipListMethod>| {
    let mut skip_list = SkipList::<Vec<u8>, OrdComparator>::new(OrdComparator);
    let mut model = BTreeSet::new();

    use SkipListMethod::*;
    for method in methods {
        match method {
            Insert { key } => {
                assert_eq!(skip_list.insert(key.clone()), model.insert(key.clone()));
                assert_eq!(skip_list.search(&key), Some(&key));
            }
            Remove { key } => {
                assert_eq!(skip_list.remove(&key), model.remove(&key));
                assert!(!skip_list.contains(&key));
            }
            LowerBound { key } => {
                assert_eq!(skip_list.lower_bound(&key), model.range(key..).next());
            }
            FindLessThan { key } => {
                assert_eq!(skip_list.find_less_than(&key), model.range(..key).next_back());
            }
        }
        assert_eq!(skip_list.len(), model.len());
    }
    assert!(skip_list.iter().eq(model.iter()));
});
