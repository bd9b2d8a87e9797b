#![allow(dead_code)]

use std::sync::{Arc, Once};

use arbor::primitives::pager::{MemPager, PageStore};
use arbor::storage::btree::page::{page_kind, POINTER_LEN};
use arbor::storage::btree::{InnerPage, LeafPage, TreeHeader};
use arbor::types::PageKind;
use arbor::{BTreeFile, BTreeOptions, Column, ColumnType, FileType, Result, Schema, Tuple, Value};

static TRACING: Once = Once::new();

/// Installs a test subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `id INTEGER, pad CHAR(75)`: 80-byte tuples.
pub fn wide_schema() -> Schema {
    Schema::new(
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("pad", ColumnType::Char(75)),
        ],
        1,
    )
    .expect("schema")
}

pub fn wide_row(id: i32) -> Tuple {
    Tuple::new(vec![Value::Integer(id), Value::Str(format!("pad-{id}"))])
}

pub fn key(id: i32) -> Tuple {
    Tuple::new(vec![Value::Integer(id)])
}

pub fn id_of(tuple: &Tuple) -> i32 {
    match tuple.get(0) {
        Some(Value::Integer(v)) => *v,
        other => panic!("unexpected key {other:?}"),
    }
}

pub fn mem_tree(page_size: usize, schema: Schema) -> Result<BTreeFile> {
    let store: Arc<dyn PageStore> =
        Arc::new(MemPager::create(FileType::BTreeTupleFile, page_size)?);
    BTreeFile::create(store, schema, BTreeOptions::default())
}

/// Keys of a full scan driven by `get_first` / `get_next`.
pub fn scan_ids(tree: &BTreeFile) -> Result<Vec<i32>> {
    let mut ids = Vec::new();
    let mut next = tree.get_first()?;
    while let Some(cursor) = next {
        ids.push(id_of(cursor.tuple()));
        next = tree.get_next(&cursor)?;
    }
    Ok(ids)
}

pub fn assert_sound(tree: &BTreeFile) {
    let diagnostics = tree.verify().expect("verify");
    assert!(diagnostics.is_empty(), "verifier found: {diagnostics:#?}");
}

/// Leaf page numbers in chain order.
pub fn leaf_chain(tree: &BTreeFile) -> Result<Vec<u16>> {
    let store = tree.store();
    let schema = Arc::new(tree.schema().clone());
    let mut id = TreeHeader::load(store.as_ref())?.first_leaf();
    let mut chain = Vec::new();
    while !id.is_null() {
        chain.push(id.0);
        let leaf = LeafPage::load(store.load_page(id)?, schema.clone())?;
        id = leaf.next_page();
    }
    Ok(chain)
}

/// Separator keys of the root, empty when the root is a leaf.
pub fn root_separators(tree: &BTreeFile) -> Result<Vec<i32>> {
    let store = tree.store();
    let root = TreeHeader::load(store.as_ref())?.root();
    if root.is_null() {
        return Ok(Vec::new());
    }
    let page = store.load_page(root)?;
    if page_kind(&page.read())? != PageKind::Inner {
        return Ok(Vec::new());
    }
    let inner = InnerPage::load(page, Arc::new(tree.schema().key_schema()))?;
    (0..inner.num_keys())
        .map(|idx| inner.key(idx).map(|k| id_of(&k)))
        .collect()
}

/// Every non-root node must be within one entry of half full (`leaf_slack`
/// bytes for leaves, two separators of a single numeric key column for inner
/// pages), and every inner node needs two children.
pub fn assert_fill(tree: &BTreeFile, leaf_slack: usize) -> Result<()> {
    let inner_slack = 2 * (tree.schema().key_schema().null_bitmap_len() + 8 + POINTER_LEN);
    let store = tree.store();
    let root = TreeHeader::load(store.as_ref())?.root();
    if root.is_null() {
        return Ok(());
    }
    let schema = Arc::new(tree.schema().clone());
    let key_schema = Arc::new(tree.schema().key_schema());
    let half = tree.page_size() / 2;
    let mut stack = vec![(root, true)];
    while let Some((id, is_root)) = stack.pop() {
        let page = store.load_page(id)?;
        let kind = page_kind(&page.read())?;
        match kind {
            PageKind::Inner => {
                let inner = InnerPage::load(page, key_schema.clone())?;
                assert!(inner.num_pointers() >= 2, "inner {id} has one child");
                assert!(
                    is_root || inner.used_space() + inner_slack >= half,
                    "inner {id} holds only {} bytes",
                    inner.used_space()
                );
                stack.extend(inner.pointers().into_iter().map(|p| (p, false)));
            }
            PageKind::Leaf => {
                let leaf = LeafPage::load(page, schema.clone())?;
                assert!(
                    is_root || leaf.used_space() + leaf_slack >= half,
                    "leaf {id} holds only {} bytes",
                    leaf.used_space()
                );
            }
            PageKind::Empty => panic!("tree reaches free page {id}"),
        }
    }
    Ok(())
}
