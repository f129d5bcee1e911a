//! Per-declared-index wrapper over a B-tree
//!
//! An index covers an ordered list of table columns. The table engine owns
//! the column data files and writes them; the index keeps a B-tree over the
//! concatenated raw column slots when it is `on`, and falls back to a
//! sequential scan through the column files when it is `off`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{CmpOp, DataType, Value};
use crate::btree::{BTree, KeyCodec, Pred};
use crate::error::{DbError, DbResult};
use crate::file::PageCache;
use crate::table::column::ColumnData;
use crate::table::value;

/// Index description as persisted in the table's `info` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    pub on: bool,
}

/// One secondary index of a table
pub struct Index {
    name: String,
    prefix: PathBuf,
    /// Ordinals of the covered columns, in declaration order
    cols: Vec<usize>,
    col_names: Vec<String>,
    types: Vec<DataType>,
    unique: bool,
    primary: bool,
    tree: Option<BTree>,
}

impl Index {
    fn codec(types: &[DataType], cols: &[usize], col_data: &[ColumnData]) -> KeyCodec {
        let heaps = cols.iter().map(|&c| col_data[c].heap()).collect();
        KeyCodec::new(types.to_vec(), heaps)
    }

    /// Create a new index and build its tree from the live rows
    pub fn create(
        cache: &mut PageCache,
        index_dir: &Path,
        name: &str,
        cols: Vec<usize>,
        col_names: Vec<String>,
        col_data: &[ColumnData],
        live_rids: &[u64],
        primary: bool,
        unique: bool,
    ) -> DbResult<Self> {
        let types: Vec<DataType> = cols.iter().map(|&c| col_data[c].data_type().clone()).collect();
        let mut index = Self {
            name: name.to_string(),
            prefix: index_dir.join(name),
            cols,
            col_names,
            types,
            unique,
            primary,
            tree: None,
        };
        index.turn_on(cache, col_data, live_rids)?;
        Ok(index)
    }

    /// Re-open an index recorded in the table's info
    pub fn load(
        cache: &mut PageCache,
        index_dir: &Path,
        info: &IndexInfo,
        cols: Vec<usize>,
        col_data: &[ColumnData],
    ) -> DbResult<Self> {
        let types: Vec<DataType> = cols.iter().map(|&c| col_data[c].data_type().clone()).collect();
        let tree = if info.on {
            let codec = Self::codec(&types, &cols, col_data);
            Some(BTree::load(cache, &index_dir.join(&info.name), codec)?)
        } else {
            None
        };
        Ok(Self {
            name: info.name.clone(),
            prefix: index_dir.join(&info.name),
            cols,
            col_names: info.columns.clone(),
            types,
            unique: info.unique,
            primary: info.primary,
            tree,
        })
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            name: self.name.clone(),
            columns: self.col_names.clone(),
            unique: self.unique,
            primary: self.primary,
            on: self.tree.is_some(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_on(&self) -> bool {
        self.tree.is_some()
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// Re-point the covered column ordinals (after a column drop shifts them)
    pub fn set_cols(&mut self, cols: Vec<usize>) {
        self.cols = cols;
    }

    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    /// Rank of a column name within this index, if covered
    pub fn col_rank(&self, name: &str) -> Option<usize> {
        self.col_names.iter().position(|c| c == name)
    }

    /// Build the tree from the column files
    pub fn turn_on(
        &mut self,
        cache: &mut PageCache,
        col_data: &[ColumnData],
        live_rids: &[u64],
    ) -> DbResult<()> {
        if self.tree.is_some() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(live_rids.len());
        for &rid in live_rids {
            let raw = self.raw_of(cache, col_data, rid)?;
            let full = self.full_of(cache, col_data, rid)?;
            entries.push((raw, full, rid));
        }
        let codec = Self::codec(&self.types, &self.cols, col_data);
        self.tree = Some(BTree::init(cache, &self.prefix, codec, entries)?);
        Ok(())
    }

    /// Delete the tree, leaving the index in sequential-scan mode
    pub fn turn_off(&mut self, cache: &mut PageCache) -> DbResult<()> {
        if let Some(tree) = self.tree.take() {
            tree.destroy(cache)?;
        }
        Ok(())
    }

    /// Flush and close the tree files
    pub fn close(self, cache: &mut PageCache) -> DbResult<()> {
        if let Some(tree) = self.tree {
            tree.close(cache)?;
        }
        Ok(())
    }

    /// Delete every file belonging to this index
    pub fn destroy(mut self, cache: &mut PageCache) -> DbResult<()> {
        self.turn_off(cache)
    }

    /// Concatenated raw slots of the covered columns for one rid
    pub fn raw_of(
        &self,
        cache: &mut PageCache,
        col_data: &[ColumnData],
        rid: u64,
    ) -> DbResult<Vec<u8>> {
        let mut raw = Vec::new();
        for &c in &self.cols {
            raw.extend(col_data[c].read_raw(cache, rid)?);
        }
        Ok(raw)
    }

    /// Full (materialized) per-column values for one rid
    pub fn full_of(
        &self,
        cache: &mut PageCache,
        col_data: &[ColumnData],
        rid: u64,
    ) -> DbResult<Vec<Vec<u8>>> {
        self.cols
            .iter()
            .map(|&c| col_data[c].read_full(cache, rid))
            .collect()
    }

    /// Encode a literal row's values for the covered columns
    pub fn full_of_values(&self, values: &[&Value]) -> DbResult<Vec<Vec<u8>>> {
        values
            .iter()
            .zip(&self.types)
            .map(|(v, ty)| value::encode(v, ty))
            .collect()
    }

    /// Register an entry (the column files are written by the table engine)
    pub fn insert(
        &mut self,
        cache: &mut PageCache,
        raw: &[u8],
        rid: u64,
        full: &[Vec<u8>],
    ) -> DbResult<()> {
        if let Some(tree) = &mut self.tree {
            tree.insert(cache, raw, rid, full)?;
        }
        Ok(())
    }

    /// Unregister an entry
    pub fn remove(&mut self, cache: &mut PageCache, raw: &[u8], rid: u64) -> DbResult<()> {
        if let Some(tree) = &mut self.tree {
            tree.remove(cache, raw, rid)?;
        }
        Ok(())
    }

    /// Replace the entry of one rid
    pub fn update(
        &mut self,
        cache: &mut PageCache,
        old_raw: &[u8],
        new_raw: &[u8],
        new_full: &[Vec<u8>],
        rid: u64,
    ) -> DbResult<()> {
        self.remove(cache, old_raw, rid)?;
        self.insert(cache, new_raw, rid, new_full)
    }

    /// Conjunction query: `preds[i]` constrains covered column `i`
    ///
    /// Tree descent when on, sequential scan over the live rids otherwise.
    pub fn query(
        &self,
        cache: &mut PageCache,
        preds: &[Vec<Pred>],
        limit: usize,
        col_data: &[ColumnData],
        live_rids: &[u64],
    ) -> DbResult<Vec<u64>> {
        if let Some(tree) = &self.tree {
            return tree.query(cache, preds, limit);
        }

        let mut out = Vec::new();
        'rid: for &rid in live_rids {
            for (i, col_preds) in preds.iter().enumerate() {
                let full = col_data[self.cols[i]].read_full(cache, rid)?;
                for pred in col_preds {
                    if !value::cmp_with_value(&full, &self.types[i], pred.op, &pred.value)? {
                        continue 'rid;
                    }
                }
            }
            out.push(rid);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Every rid whose composite equals `full`
    pub fn rids_matching(
        &self,
        cache: &mut PageCache,
        full: &[Vec<u8>],
        col_data: &[ColumnData],
        live_rids: &[u64],
    ) -> DbResult<Vec<u64>> {
        if let Some(tree) = &self.tree {
            return tree.rids_matching(cache, full);
        }

        let mut out = Vec::new();
        for &rid in live_rids {
            let mine = self.full_of(cache, col_data, rid)?;
            let equal = mine
                .iter()
                .zip(full)
                .zip(&self.types)
                .all(|((a, b), ty)| value::cmp_keys(a, b, ty) == std::cmp::Ordering::Equal);
            if equal {
                out.push(rid);
            }
        }
        Ok(out)
    }

    /// Set-membership test on the composite value
    pub fn contains(
        &self,
        cache: &mut PageCache,
        full: &[Vec<u8>],
        col_data: &[ColumnData],
        live_rids: &[u64],
    ) -> DbResult<bool> {
        Ok(!self
            .rids_matching(cache, full, col_data, live_rids)?
            .is_empty())
    }
}

/// Build per-column predicate lists in index column order
pub fn preds_by_rank(
    index: &Index,
    conds: &[(String, CmpOp, Value)],
) -> DbResult<Vec<Vec<Pred>>> {
    let mut preds: Vec<Vec<Pred>> = vec![Vec::new(); index.cols().len()];
    for (col, op, value) in conds {
        let rank = index
            .col_rank(col)
            .ok_or_else(|| DbError::NotFound(format!("column `{}` not in index", col)))?;
        preds[rank].push(Pred {
            op: *op,
            value: value.clone(),
        });
    }
    Ok(preds)
}
