use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::primitives::pager::{FilePager, PageStore, PagerOptions, DEFAULT_PAGE_SIZE};
use crate::storage::btree::{
    BTreeFile, BTreeOptions, TableStats, TreeInfo, TupleCursor, VerifyReport,
};
use crate::storage::tuple::{Schema, Tuple};
use crate::types::FileType;

use super::config::CliConfig;
use super::values::{parse_columns, parse_key, parse_row, to_json};
use super::CliError;

/// One tuple as printed by `get` and `scan`.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    /// Where the tuple is stored, as `FP[page:offset]`.
    pub pointer: String,
    /// Column values in schema order.
    pub values: Vec<serde_json::Value>,
    #[serde(skip)]
    tuple: Tuple,
}

impl Row {
    fn from_cursor(cursor: &TupleCursor) -> Self {
        let tuple = cursor.tuple().clone();
        Self {
            pointer: cursor
                .file_pointer()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            values: tuple.values().iter().map(to_json).collect(),
            tuple,
        }
    }

    /// The decoded tuple.
    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }
}

/// Result of `insert`.
#[derive(Debug, Serialize)]
pub struct InsertReport {
    /// Rows stored.
    pub inserted: usize,
    /// Where each stored row landed.
    pub pointers: Vec<String>,
}

/// Result of `delete`.
#[derive(Debug, Serialize)]
pub struct DeleteReport {
    /// Keys that matched a tuple.
    pub deleted: usize,
    /// Keys that matched nothing.
    pub missing: Vec<String>,
}

/// Result of `info`.
#[derive(Debug, Serialize)]
pub struct InfoReport {
    /// Header fields.
    #[serde(flatten)]
    pub tree: TreeInfo,
    /// Statistics from the last `analyze`.
    pub table_stats: Option<TableStats>,
}

/// Opens files with the pager settings resolved from flags and config.
#[derive(Debug, Clone)]
pub struct Session {
    options: PagerOptions,
}

impl Session {
    /// `cache_pages` from the command line wins over the config file.
    pub fn new(config: &CliConfig, cache_pages: Option<usize>) -> Self {
        let mut options = PagerOptions::default();
        if let Some(pages) = cache_pages.or(config.cache_pages) {
            options.cache_pages = pages;
        }
        options.page_size = config.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Self { options }
    }

    /// Pager settings in effect.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    fn open(&self, path: &Path) -> Result<BTreeFile, CliError> {
        let store: Arc<dyn PageStore> = Arc::new(FilePager::open(path, self.options.clone())?);
        Ok(BTreeFile::open(store, BTreeOptions::default())?)
    }

    /// Creates an empty tree file. `key_columns` defaults to every column.
    pub fn create(
        &self,
        path: &Path,
        columns: &str,
        key_columns: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<TreeInfo, CliError> {
        if path.exists() {
            return Err(CliError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let columns = parse_columns(columns)?;
        let schema = match key_columns {
            Some(n) => Schema::new(columns, n)?,
            None => Schema::keyed_on_all(columns)?,
        };
        let mut options = self.options.clone();
        if let Some(size) = page_size {
            options.page_size = size;
        }
        let store: Arc<dyn PageStore> =
            Arc::new(FilePager::create(path, FileType::BTreeTupleFile, options)?);
        let tree = BTreeFile::create(store, schema, BTreeOptions::default())?;
        tree.flush()?;
        Ok(tree.info()?)
    }

    /// Inserts rows in order, stopping at the first failure. Rows stored
    /// before the failure stay stored.
    pub fn insert(&self, path: &Path, rows: &[String]) -> Result<InsertReport, CliError> {
        let mut tree = self.open(path)?;
        let mut report = InsertReport {
            inserted: 0,
            pointers: Vec::with_capacity(rows.len()),
        };
        let outcome = rows.iter().try_for_each(|text| -> Result<(), CliError> {
            let tuple = parse_row(tree.schema(), text)?;
            let cursor = tree.insert(tuple)?;
            report.inserted += 1;
            report
                .pointers
                .extend(cursor.file_pointer().map(|p| p.to_string()));
            Ok(())
        });
        tree.flush()?;
        tree.stats().emit_tracing();
        outcome.map(|()| report)
    }

    /// First tuple whose key starts with `key`.
    pub fn get(&self, path: &Path, key: &str) -> Result<Option<Row>, CliError> {
        let tree = self.open(path)?;
        let key = parse_key(tree.schema(), key)?;
        Ok(tree.find_first_equal(&key)?.as_ref().map(Row::from_cursor))
    }

    /// Deletes the tuples with the given full keys.
    pub fn delete(&self, path: &Path, keys: &[String]) -> Result<DeleteReport, CliError> {
        let mut tree = self.open(path)?;
        let mut report = DeleteReport {
            deleted: 0,
            missing: Vec::new(),
        };
        let outcome = keys.iter().try_for_each(|text| -> Result<(), CliError> {
            let key = parse_key(tree.schema(), text)?;
            if tree.delete_key(&key)? {
                report.deleted += 1;
            } else {
                debug!(target: "arbor::cli", key = %key, "no tuple to delete");
                report.missing.push(text.clone());
            }
            Ok(())
        });
        tree.flush()?;
        tree.stats().emit_tracing();
        outcome.map(|()| report)
    }

    /// Tuples in key order from `from` (or the start), at most `limit`.
    pub fn scan(
        &self,
        path: &Path,
        from: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, CliError> {
        let tree = self.open(path)?;
        let mut next = match from {
            Some(text) => tree.seek(&parse_key(tree.schema(), text)?)?,
            None => tree.get_first()?,
        };
        let limit = limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        while let Some(cursor) = next {
            if rows.len() >= limit {
                break;
            }
            rows.push(Row::from_cursor(&cursor));
            next = tree.get_next(&cursor)?;
        }
        Ok(rows)
    }

    /// Runs the structural verifier.
    pub fn verify(&self, path: &Path) -> Result<VerifyReport, CliError> {
        Ok(self.open(path)?.verify_report()?)
    }

    /// Header fields plus stored statistics.
    pub fn info(&self, path: &Path) -> Result<InfoReport, CliError> {
        let tree = self.open(path)?;
        Ok(InfoReport {
            tree: tree.info()?,
            table_stats: tree.table_stats()?,
        })
    }

    /// Recomputes and stores table statistics.
    pub fn analyze(&self, path: &Path) -> Result<TableStats, CliError> {
        let mut tree = self.open(path)?;
        let stats = tree.analyze()?;
        tree.flush()?;
        Ok(stats)
    }
}
