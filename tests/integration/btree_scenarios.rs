#![allow(missing_docs)]

mod common;

use arbor::{ArborError, Result};
use common::{
    assert_fill, assert_sound, id_of, init_tracing, key, leaf_chain, mem_tree, root_separators,
    scan_ids, wide_row, wide_schema,
};

const KEYS: [i32; 9] = [50, 10, 30, 70, 20, 90, 40, 60, 80];

fn nine_key_tree() -> Result<arbor::BTreeFile> {
    let mut tree = mem_tree(512, wide_schema())?;
    for id in KEYS {
        tree.insert(wide_row(id))?;
    }
    Ok(tree)
}

#[test]
fn nine_inserts_split_the_root_leaf() -> Result<()> {
    init_tracing();
    let tree = nine_key_tree()?;
    assert!(leaf_chain(&tree)?.len() >= 2);
    assert_eq!(root_separators(&tree)?.len(), leaf_chain(&tree)?.len() - 1);
    assert_eq!(scan_ids(&tree)?, vec![10, 20, 30, 40, 50, 60, 70, 80, 90]);
    assert_eq!(tree.stats().root_splits(), 1);
    assert_sound(&tree);
    Ok(())
}

#[test]
fn underflow_redistributes_then_coalesces() -> Result<()> {
    init_tracing();
    let mut tree = nine_key_tree()?;
    assert_eq!(leaf_chain(&tree)?.len(), 2);
    let separators = root_separators(&tree)?;

    // Two 80-byte tuples leave the first leaf under half full, and its
    // sibling is too full to absorb it.
    assert!(tree.delete_key(&key(10))?);
    assert_eq!(tree.stats().leaf_redistributions(), 1);
    assert_eq!(leaf_chain(&tree)?.len(), 2);
    assert_ne!(root_separators(&tree)?, separators);
    assert_sound(&tree);

    assert!(tree.delete_key(&key(20))?);
    assert!(tree.delete_key(&key(30))?);
    assert_eq!(tree.stats().leaf_coalesces(), 1);
    let chain = leaf_chain(&tree)?;
    assert_eq!(chain.len(), 1);
    let info = tree.info()?;
    assert_eq!(info.root, chain[0]);
    assert_eq!(info.first_leaf, chain[0]);
    assert_eq!(tree.stats().root_collapses(), 1);
    assert_eq!(scan_ids(&tree)?, vec![40, 50, 60, 70, 80, 90]);
    assert_sound(&tree);
    Ok(())
}

#[test]
fn lone_tuple_delete_empties_the_root() -> Result<()> {
    init_tracing();
    let mut tree = mem_tree(512, wide_schema())?;
    tree.insert(wide_row(1))?;
    let mut cursor = tree.get_first()?.expect("one tuple");
    tree.delete(&mut cursor)?;
    assert!(tree.get_next(&cursor)?.is_none());
    assert_eq!(tree.info()?.root, 0);
    assert!(tree.get_first()?.is_none());
    assert_sound(&tree);

    tree.insert(wide_row(2))?;
    let info = tree.info()?;
    assert_ne!(info.root, 0);
    assert_eq!(info.root, info.first_leaf);
    assert_eq!(scan_ids(&tree)?, vec![2]);
    assert_sound(&tree);
    Ok(())
}

#[test]
fn lookups_follow_inserts_and_deletes() -> Result<()> {
    init_tracing();
    let mut tree = nine_key_tree()?;
    for id in KEYS {
        let found = tree.find_first_equal(&key(id))?.expect("inserted");
        assert_eq!(found.tuple(), &wide_row(id));
    }
    for id in [30, 90, 10] {
        assert!(tree.delete_key(&key(id))?);
        assert!(tree.find_first_equal(&key(id))?.is_none());
    }
    let greater = tree.find_first_greater(&key(30))?.expect("40 remains");
    assert_eq!(id_of(greater.tuple()), 40);
    assert!(tree.find_first_greater(&key(80))?.is_none());
    Ok(())
}

#[test]
fn live_cursor_continues_after_foreign_delete() -> Result<()> {
    init_tracing();
    let ordered = scan_ids(&nine_key_tree()?)?;
    for pair in ordered.windows(2) {
        let (target, after) = (pair[0], pair[1]);
        let mut tree = nine_key_tree()?;
        let held = tree.find_first_equal(&key(target))?.expect("present");
        let mut other = tree.find_first_equal(&key(target))?.expect("present");
        tree.delete(&mut other)?;
        let next = tree.get_next(&held)?.expect("a following tuple");
        assert_eq!(id_of(next.tuple()), after, "after deleting {target}");
        assert_sound(&tree);
    }
    Ok(())
}

#[test]
fn delete_during_scan_visits_every_tuple_once() -> Result<()> {
    init_tracing();
    let mut tree = mem_tree(512, wide_schema())?;
    for id in 0..180 {
        tree.insert(wide_row((id * 37) % 180))?;
    }
    let mut visited = Vec::new();
    let mut next = tree.get_first()?;
    while let Some(mut cursor) = next {
        let id = id_of(cursor.tuple());
        visited.push(id);
        if id % 3 != 0 {
            tree.delete(&mut cursor)?;
        }
        next = tree.get_next(&cursor)?;
    }
    assert_eq!(visited, (0..180).collect::<Vec<_>>());
    assert_eq!(scan_ids(&tree)?, (0..180).step_by(3).collect::<Vec<_>>());
    assert_sound(&tree);
    assert_fill(&tree, 80)?;
    Ok(())
}

#[test]
fn failed_inserts_leave_the_tree_untouched() -> Result<()> {
    init_tracing();
    let mut tree = nine_key_tree()?;
    let pages = tree.store().num_pages();
    assert!(matches!(tree.insert(wide_row(40)), Err(ArborError::DuplicateKey)));
    assert_eq!(tree.store().num_pages(), pages);
    assert_eq!(scan_ids(&tree)?.len(), KEYS.len());
    assert_sound(&tree);
    Ok(())
}
