#![allow(missing_docs)]

mod common;

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use arbor::{
    ArborError, BTreeFile, BTreeOptions, FilePager, FileType, PageStore, PagerOptions, Result,
};
use common::{assert_fill, assert_sound, init_tracing, key, scan_ids, wide_row, wide_schema};
use tempfile::tempdir;

fn options(cache_pages: usize) -> PagerOptions {
    PagerOptions {
        page_size: 512,
        cache_pages,
    }
}

fn create(path: &Path, cache_pages: usize) -> Result<(Arc<FilePager>, BTreeFile)> {
    let pager = Arc::new(FilePager::create(path, FileType::BTreeTupleFile, options(cache_pages))?);
    let store: Arc<dyn PageStore> = pager.clone();
    Ok((pager, BTreeFile::create(store, wide_schema(), BTreeOptions::default())?))
}

fn reopen(path: &Path, cache_pages: usize) -> Result<BTreeFile> {
    let store: Arc<dyn PageStore> = Arc::new(FilePager::open(path, options(cache_pages))?);
    BTreeFile::open(store, BTreeOptions::default())
}

#[test]
fn tree_survives_close_and_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("rows.arbor");
    {
        let (pager, mut tree) = create(&path, 4)?;
        for id in 0..1200 {
            tree.insert(wide_row((id * 53) % 1200))?;
        }
        tree.flush()?;
        assert!(pager.stats().evictions > 0, "a 4-page pool must evict");
    }

    let mut tree = reopen(&path, 16)?;
    assert_eq!(tree.schema(), &wide_schema());
    assert_eq!(tree.page_size(), 512);
    assert_eq!(scan_ids(&tree)?, (0..1200).collect::<Vec<_>>());
    assert_sound(&tree);

    for id in (0..1200).filter(|id| id % 4 != 1) {
        assert!(tree.delete_key(&key(id))?);
    }
    let stats = tree.analyze()?;
    drop(tree);

    let tree = reopen(&path, 16)?;
    assert_eq!(scan_ids(&tree)?, (0..1200).filter(|id| id % 4 == 1).collect::<Vec<_>>());
    assert_eq!(tree.table_stats()?, Some(stats));
    assert_sound(&tree);
    assert_fill(&tree, 80)?;
    Ok(())
}

#[test]
fn free_pages_are_reused_after_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("reuse.arbor");
    let pages = {
        let (_pager, mut tree) = create(&path, 32)?;
        for id in 0..600 {
            tree.insert(wide_row(id))?;
        }
        for id in 0..600 {
            tree.delete_key(&key(id))?;
        }
        tree.store().num_pages()
    };

    let mut tree = reopen(&path, 32)?;
    assert_ne!(tree.info()?.free_list_head, 0);
    assert_sound(&tree);
    for id in 0..600 {
        tree.insert(wide_row(id))?;
    }
    assert_eq!(tree.store().num_pages(), pages);
    tree.flush()?;
    assert_eq!(std::fs::metadata(&path)?.len(), u64::from(pages) * 512);
    Ok(())
}

#[test]
fn opening_rejects_foreign_and_damaged_files() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;

    let heap = dir.path().join("heap.arbor");
    drop(FilePager::create(&heap, FileType::HeapTupleFile, options(4))?);
    assert!(matches!(reopen(&heap, 4), Err(ArborError::Invalid(_))));

    let torn = dir.path().join("torn.arbor");
    {
        let (_pager, mut tree) = create(&torn, 4)?;
        for id in 0..20 {
            tree.insert(wide_row(id))?;
        }
    }
    OpenOptions::new().append(true).open(&torn)?.write_all(&[0u8; 100])?;
    assert!(matches!(reopen(&torn, 4), Err(ArborError::Corruption(_))));

    let existing = dir.path().join("existing.arbor");
    std::fs::write(&existing, b"occupied")?;
    assert!(matches!(
        FilePager::create(&existing, FileType::BTreeTupleFile, options(4)),
        Err(ArborError::Io(_))
    ));
    Ok(())
}

#[test]
fn corruption_is_reported_by_verify() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("bad.arbor");
    {
        let (_pager, mut tree) = create(&path, 8)?;
        for id in 0..40 {
            tree.insert(wide_row(id))?;
        }
    }
    let first_leaf = reopen(&path, 8)?.info()?.first_leaf;
    {
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(u64::from(first_leaf) * 512))?;
        file.write_all(&[9])?;
    }
    let tree = reopen(&path, 8)?;
    let diagnostics = tree.verify()?;
    assert!(!diagnostics.is_empty());
    assert!(
        diagnostics.iter().any(|d| d.contains(&format!("page {first_leaf}"))),
        "{diagnostics:#?}"
    );
    Ok(())
}
