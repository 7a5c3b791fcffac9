//! Allocation failures propagate without leaking or corrupting state.

use strata_arena::{AList, ArenaConfig, ArenaError, Heap};

fn limited(limit: usize) -> Heap {
    Heap::with_config(ArenaConfig::with_byte_limit(limit)).unwrap()
}

#[test]
fn big_allocation_over_limit_fails_cleanly() {
    let mut heap = limited(2000);
    let root = heap.create(None).unwrap();
    let small = heap.alloc_str(Some(root), "fits in storage").unwrap();
    heap.alloc(Some(root), 1, 1000).unwrap();
    let before = heap.stats();

    let err = heap.alloc(Some(root), 1, 1000).unwrap_err();
    assert_eq!(err, ArenaError::OutOfMemory { requested: 1008 });
    assert_eq!(heap.stats(), before);
    assert_eq!(heap.str_at(small).unwrap(), "fits in storage");

    heap.destroy(Some(root));
    assert_eq!(heap.stats().bytes, 0);
}

#[test]
fn child_creation_over_limit_leaves_parent_unchanged() {
    // root storage (520) + one child storage (520) fit, a second does not
    let mut heap = limited(1200);
    let root = heap.create(None).unwrap();
    heap.create(Some(root)).unwrap();
    let slots = heap.deferred_slots(root).unwrap();
    let before = heap.stats();

    assert!(matches!(
        heap.create(Some(root)),
        Err(ArenaError::OutOfMemory { .. })
    ));
    assert_eq!(heap.stats(), before);
    assert_eq!(heap.deferred_slots(root).unwrap(), slots);
    heap.destroy(Some(root));
    assert_eq!(heap.stats().blocks, 0);
}

#[test]
fn failed_defer_alloc_registers_nothing() {
    let mut heap = limited(1000);
    let root = heap.create(None).unwrap();
    let before = heap.stats();
    let err = heap
        .defer_alloc(root, 600, None, |_, _| panic!("must not run"))
        .unwrap_err();
    assert!(matches!(err, ArenaError::OutOfMemory { .. }));
    assert_eq!(heap.stats(), before);
    assert!(heap.deferred_slots(root).unwrap().is_empty());
    heap.destroy(Some(root));
}

#[test]
fn list_growth_failure_keeps_contents() {
    let mut heap = limited(4096);
    let root = heap.create(None).unwrap();
    let mut list = AList::new();
    let mut pushed = 0u32;
    let err = loop {
        match list.push(&mut heap, Some(root), pushed) {
            Ok(_) => pushed += 1,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, ArenaError::OutOfMemory { .. }));
    assert_eq!(list.len(), pushed as usize);
    assert_eq!(list.to_vec(&heap), (0..pushed).collect::<Vec<_>>());
    heap.destroy(Some(root));
}

#[test]
fn overflowing_request_is_rejected() {
    let mut heap = Heap::new();
    let root = heap.create(None).unwrap();
    let err = heap.alloc(Some(root), usize::MAX, 2).unwrap_err();
    assert_eq!(
        err,
        ArenaError::SizeOverflow {
            size: usize::MAX,
            count: 2
        }
    );
    assert!(err.to_string().contains("overflow"));
    heap.destroy(Some(root));
}
