use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use railcar::{
    BtreeError, BufKind, CompOp, DeallocList, Engine, EngineConfig, EngineError, KeyDesc,
    KeyValue, ObjectId, PageFlags, PageId, SlottedPage, NIL_PAGE,
};
use tempfile::tempdir;

fn fresh_index(dir: &tempfile::TempDir) -> (Engine, ObjectId, PageId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = Engine::create(dir.path().join("db.rc"), 0, &EngineConfig::default()).unwrap();
    let index = engine.create_index_file(1).unwrap();
    let root = engine.create_index(&index).unwrap();
    (engine, index, root)
}

fn oid_for(key: i32) -> ObjectId {
    ObjectId::new(0, key, (key % 32) as i16, key as u32)
}

fn insert_key(engine: &mut Engine, index: &ObjectId, root: PageId, kdesc: &KeyDesc, key: i32) {
    engine
        .insert_object(index, root, kdesc, &KeyValue::from_i32(key), oid_for(key))
        .unwrap();
}

fn delete_key(engine: &mut Engine, index: &ObjectId, root: PageId, kdesc: &KeyDesc, key: i32) {
    let mut dl = DeallocList::new();
    engine
        .delete_object(
            index,
            root,
            kdesc,
            &KeyValue::from_i32(key),
            &oid_for(key),
            &mut dl,
        )
        .unwrap();
    engine.apply_dealloc(&mut dl).unwrap();
}

fn scan_all(engine: &mut Engine, root: PageId, kdesc: &KeyDesc) -> Vec<i32> {
    let mut keys = Vec::new();
    let mut cursor = engine
        .fetch(root, kdesc, None, CompOp::Bof, None, CompOp::Eof)
        .unwrap();
    while !cursor.is_eos() {
        keys.push(cursor.key.as_i32().unwrap());
        cursor = engine
            .fetch_next(kdesc, None, CompOp::Eof, &cursor)
            .unwrap();
    }
    keys
}

#[test]
fn fetch_on_an_empty_tree_is_eos_for_every_operator() {
    let tmp = tempdir().unwrap();
    let (mut engine, _index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    let probe = KeyValue::from_i32(1);
    for op in [CompOp::Eq, CompOp::Lt, CompOp::Le, CompOp::Gt, CompOp::Ge] {
        let cursor = engine
            .fetch(root, &kdesc, Some(&probe), op, None, CompOp::Eof)
            .unwrap();
        assert!(cursor.is_eos(), "{op:?}");
    }
    for op in [CompOp::Bof, CompOp::Eof] {
        let cursor = engine.fetch(root, &kdesc, None, op, None, CompOp::Eof).unwrap();
        assert!(cursor.is_eos(), "{op:?}");
    }
}

#[test]
fn duplicate_keys_are_rejected() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    insert_key(&mut engine, &index, root, &kdesc, 7);
    let err = engine
        .insert_object(&index, root, &kdesc, &KeyValue::from_i32(7), oid_for(8))
        .unwrap_err();
    assert!(matches!(err, EngineError::Btree(BtreeError::DuplicateKey)));
}

#[test]
fn deleting_a_missing_key_fails_with_not_found() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    insert_key(&mut engine, &index, root, &kdesc, 1);
    let mut dl = DeallocList::new();
    let err = engine
        .delete_object(
            &index,
            root,
            &kdesc,
            &KeyValue::from_i32(2),
            &oid_for(2),
            &mut dl,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Btree(BtreeError::NotFound)));
}

#[test]
fn overflowing_the_root_leaf_builds_a_two_level_tree() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    // 20-byte leaf entries plus 8-byte slots: 144 fit, the 145th splits.
    for key in 1..=145 {
        insert_key(&mut engine, &index, root, &kdesc, key);
    }

    // The root page itself became internal with a single separator; the
    // separator entry leads with its child page number.
    let (p0, sibling) = {
        let mut pin = engine.get_train(root, BufKind::Page).unwrap();
        let view = SlottedPage::open(pin.bytes_mut()).unwrap();
        assert!(view.flags().contains(PageFlags::INTERNAL | PageFlags::ROOT));
        assert_eq!(view.n_slots(), 1);
        let p0 = view.p0();
        let (offset, _) = view.slot(0).unwrap();
        let child = i32::from_le_bytes(
            view.data(offset as usize, 4).unwrap().try_into().unwrap(),
        );
        drop(view);
        engine.free_train(pin).unwrap();
        (p0, child)
    };

    // Both children are leaves chained to each other.
    let mut pin = engine.get_train(PageId::new(0, p0), BufKind::Page).unwrap();
    let view = SlottedPage::open(pin.bytes_mut()).unwrap();
    assert!(view.flags().contains(PageFlags::LEAF));
    assert!(!view.flags().contains(PageFlags::ROOT));
    assert_eq!(view.next_page(), sibling);
    assert_eq!(view.prev_page(), NIL_PAGE);
    drop(view);
    engine.free_train(pin).unwrap();

    let mut pin = engine
        .get_train(PageId::new(0, sibling), BufKind::Page)
        .unwrap();
    let view = SlottedPage::open(pin.bytes_mut()).unwrap();
    assert!(view.flags().contains(PageFlags::LEAF));
    assert_eq!(view.prev_page(), p0);
    assert_eq!(view.next_page(), NIL_PAGE);
    drop(view);
    engine.free_train(pin).unwrap();

    assert_eq!(scan_all(&mut engine, root, &kdesc), (1..=145).collect::<Vec<_>>());
}

#[test]
fn range_scan_respects_start_and_stop_operators() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    for key in [10, 20, 30, 40, 50] {
        insert_key(&mut engine, &index, root, &kdesc, key);
    }

    let start = KeyValue::from_i32(15);
    let stop = KeyValue::from_i32(45);
    let mut cursor = engine
        .fetch(root, &kdesc, Some(&start), CompOp::Gt, Some(&stop), CompOp::Le)
        .unwrap();
    let mut seen = Vec::new();
    while !cursor.is_eos() {
        seen.push(cursor.key.as_i32().unwrap());
        cursor = engine
            .fetch_next(&kdesc, Some(&stop), CompOp::Le, &cursor)
            .unwrap();
    }
    assert_eq!(seen, vec![20, 30, 40]);

    // Backward scan: start at the last key, stop above 15.
    let stop = KeyValue::from_i32(15);
    let mut cursor = engine
        .fetch(root, &kdesc, None, CompOp::Eof, Some(&stop), CompOp::Gt)
        .unwrap();
    let mut seen = Vec::new();
    while !cursor.is_eos() {
        seen.push(cursor.key.as_i32().unwrap());
        cursor = engine
            .fetch_next(&kdesc, Some(&stop), CompOp::Gt, &cursor)
            .unwrap();
    }
    assert_eq!(seen, vec![50, 40, 30, 20]);

    // Exact fetches, hit and miss.
    let probe = KeyValue::from_i32(30);
    let cursor = engine
        .fetch(root, &kdesc, Some(&probe), CompOp::Eq, None, CompOp::Eof)
        .unwrap();
    assert_eq!(cursor.oid, oid_for(30));
    let probe = KeyValue::from_i32(31);
    let cursor = engine
        .fetch(root, &kdesc, Some(&probe), CompOp::Eq, None, CompOp::Eof)
        .unwrap();
    assert!(cursor.is_eos());
}

#[test]
fn shuffled_round_trip_comes_back_sorted() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    let mut keys: Vec<i32> = (0..2000).collect();
    let mut rng = StdRng::seed_from_u64(42);
    keys.shuffle(&mut rng);
    for key in &keys {
        insert_key(&mut engine, &index, root, &kdesc, *key);
    }

    assert_eq!(scan_all(&mut engine, root, &kdesc), (0..2000).collect::<Vec<_>>());

    // Every key is individually fetchable with its stored oid.
    for key in [0, 517, 999, 1999] {
        let probe = KeyValue::from_i32(key);
        let cursor = engine
            .fetch(root, &kdesc, Some(&probe), CompOp::Eq, None, CompOp::Eof)
            .unwrap();
        assert_eq!(cursor.oid, oid_for(key));
    }
}

#[test]
fn reverse_deleting_a_three_level_tree_collapses_to_an_empty_root_leaf() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    let n = 15_000;
    for key in 1..=n {
        insert_key(&mut engine, &index, root, &kdesc, key);
    }

    // Depth three: the root's p0 child is itself internal.
    {
        let mut pin = engine.get_train(root, BufKind::Page).unwrap();
        let p0 = SlottedPage::open(pin.bytes_mut()).unwrap().p0();
        engine.free_train(pin).unwrap();
        let mut pin = engine.get_train(PageId::new(0, p0), BufKind::Page).unwrap();
        let flags = SlottedPage::open(pin.bytes_mut()).unwrap().flags();
        engine.free_train(pin).unwrap();
        assert!(flags.contains(PageFlags::INTERNAL));
    }

    for key in (1..=n).rev() {
        delete_key(&mut engine, &index, root, &kdesc, key);
    }

    // The root page id survived every split, merge and collapse, and is
    // now an empty leaf again.
    let mut pin = engine.get_train(root, BufKind::Page).unwrap();
    let view = SlottedPage::open(pin.bytes_mut()).unwrap();
    assert!(view.flags().contains(PageFlags::LEAF));
    assert!(view.flags().contains(PageFlags::ROOT));
    assert_eq!(view.n_slots(), 0);
    drop(view);
    engine.free_train(pin).unwrap();

    assert!(scan_all(&mut engine, root, &kdesc).is_empty());
}

#[test]
fn insert_delete_cycles_do_not_leak_pages() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    for _ in 0..50 {
        insert_key(&mut engine, &index, root, &kdesc, 99);
        delete_key(&mut engine, &index, root, &kdesc, 99);
        let probe = KeyValue::from_i32(99);
        let cursor = engine
            .fetch(root, &kdesc, Some(&probe), CompOp::Eq, None, CompOp::Eof)
            .unwrap();
        assert!(cursor.is_eos());
    }
    // A single-leaf tree never allocates or frees pages while cycling.
    let pages = engine.disk().num_pages();
    insert_key(&mut engine, &index, root, &kdesc, 99);
    delete_key(&mut engine, &index, root, &kdesc, 99);
    assert_eq!(engine.disk().num_pages(), pages);
}

#[test]
fn drop_index_queues_every_tree_page_with_the_root_at_the_head() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_int();

    for key in 1..=1000 {
        insert_key(&mut engine, &index, root, &kdesc, key);
    }

    let mut dl = DeallocList::new();
    engine.drop_index(&index, &mut dl).unwrap();
    assert!(dl.len() > 3, "a split tree spans several pages");
    assert_eq!(dl.head().unwrap().pid, root);

    engine.apply_dealloc(&mut dl).unwrap();

    // A fresh index reuses the freed pages instead of growing the volume.
    let pages = engine.disk().num_pages();
    let new_root = engine.create_index(&index).unwrap();
    assert_eq!(engine.disk().num_pages(), pages);
    let cursor = engine
        .fetch(new_root, &kdesc, None, CompOp::Bof, None, CompOp::Eof)
        .unwrap();
    assert!(cursor.is_eos());
}

#[test]
fn varstring_keys_scan_in_byte_order() {
    let tmp = tempdir().unwrap();
    let (mut engine, index, root) = fresh_index(&tmp);
    let kdesc = KeyDesc::single_varstring(32);

    let words = ["pear", "apple", "fig", "banana", "cherry", "date"];
    for (i, word) in words.iter().enumerate() {
        engine
            .insert_object(
                &index,
                root,
                &kdesc,
                &KeyValue::from_text(word),
                oid_for(i as i32),
            )
            .unwrap();
    }

    let mut sorted = words.to_vec();
    sorted.sort();

    let mut seen = Vec::new();
    let mut cursor = engine
        .fetch(root, &kdesc, None, CompOp::Bof, None, CompOp::Eof)
        .unwrap();
    while !cursor.is_eos() {
        let bytes = cursor.key.as_bytes();
        let len = u16::from_le_bytes(bytes[..2].try_into().unwrap()) as usize;
        seen.push(String::from_utf8(bytes[2..2 + len].to_vec()).unwrap());
        cursor = engine
            .fetch_next(&kdesc, None, CompOp::Eof, &cursor)
            .unwrap();
    }
    assert_eq!(seen, sorted);
}

#[test]
fn index_state_survives_close_and_reopen() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("db.rc");
    let config = EngineConfig::default();
    let kdesc = KeyDesc::single_int();

    let (index, root) = {
        let mut engine = Engine::create(&path, 0, &config).unwrap();
        let index = engine.create_index_file(1).unwrap();
        let root = engine.create_index(&index).unwrap();
        for key in 1..=500 {
            insert_key(&mut engine, &index, root, &kdesc, key);
        }
        engine.close().unwrap();
        (index, root)
    };
    let _ = index;

    let mut engine = Engine::open(&path, &config).unwrap();
    assert_eq!(
        scan_all(&mut engine, root, &kdesc),
        (1..=500).collect::<Vec<_>>()
    );
}
