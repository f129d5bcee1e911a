//! Table engine: column files, rid lifecycle, indexes, constraint checks
//!
//! A `Table` owns its column data files, its rid pool, and its indexes, and
//! offers every single-table primitive. Anything that reaches across tables
//! (foreign-key membership, cascade delete, set-null, joins) belongs to the
//! database layer, which owns all open tables.

pub mod column;
pub mod value;

pub use column::{Column, ColumnData};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{CmpOp, Expr, FieldDef, Value, WhereCond};
use crate::error::{DbError, DbResult};
use crate::file::PageCache;
use crate::index::{Index, IndexInfo, preds_by_rank};
use crate::storage::IdPool;

/// Reserved name of the primary-key index
pub const PRIMARY_KEY_NAME: &str = "primary";

/// Maximum number of tables per database
pub const MAX_TBL_NUM: usize = 12;

/// Maximum number of columns per table
pub const MAX_COL_NUM: usize = 20;

/// Foreign-key definition, recorded on the source table and mirrored on the
/// referenced table's reverse map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub cols: Vec<String>,
    pub ref_table: String,
    pub ref_cols: Vec<String>,
}

/// Everything the `info` file persists
#[derive(Serialize, Deserialize)]
struct TableInfo {
    columns: Vec<Column>,
    rec_cnt: u64,
    foreign_keys: Vec<ForeignKey>,
    foreign_key_rev: Vec<(String, ForeignKey)>,
    indexes: Vec<IndexInfo>,
}

pub struct Table {
    name: String,
    root: PathBuf,
    cols: Vec<Column>,
    col_data: Vec<ColumnData>,
    rid_pool: IdPool,
    rec_cnt: u64,
    /// Outgoing foreign keys by name
    pub f_key_defs: BTreeMap<String, ForeignKey>,
    /// Reverse map: fk name -> (source table, definition)
    pub f_key_rev: BTreeMap<String, (String, ForeignKey)>,
    indexes: BTreeMap<String, Index>,
}

impl Table {
    fn info_name(root: &Path) -> PathBuf {
        root.join("info")
    }

    fn pool_name(root: &Path) -> PathBuf {
        root.join("rid")
    }

    fn data_root(root: &Path) -> PathBuf {
        root.join("data")
    }

    fn index_root(root: &Path) -> PathBuf {
        root.join("index")
    }

    /// Create a fresh table directory with the given columns
    ///
    /// Primary and foreign keys of a CREATE TABLE statement are applied by
    /// the caller afterwards.
    pub fn create(
        cache: &mut PageCache,
        db_path: &Path,
        name: &str,
        defs: &[FieldDef],
    ) -> DbResult<Self> {
        if defs.len() > MAX_COL_NUM {
            return Err(DbError::Overflow(format!(
                "more than {} columns",
                MAX_COL_NUM
            )));
        }
        let mut seen = BTreeSet::new();
        for def in defs {
            if !seen.insert(def.name.as_str()) {
                return Err(DbError::AlreadyExists(format!("column `{}`", def.name)));
            }
            Column::check_type(&def.data_type)?;
        }

        let root = db_path.join(name);
        fs::create_dir(&root)?;
        fs::create_dir(Self::data_root(&root))?;
        fs::create_dir(Self::index_root(&root))?;

        let cols: Vec<Column> = defs
            .iter()
            .enumerate()
            .map(|(i, d)| {
                Column::new(
                    d.name.clone(),
                    i,
                    d.data_type.clone(),
                    !d.not_null,
                    d.default.clone().unwrap_or(Value::Null),
                )
            })
            .collect();

        let col_data = cols
            .iter()
            .map(|c| ColumnData::create(cache, &Self::data_root(&root), c))
            .collect::<DbResult<Vec<_>>>()?;
        let rid_pool = IdPool::init(cache, Self::pool_name(&root))?;

        let table = Self {
            name: name.to_string(),
            root,
            cols,
            col_data,
            rid_pool,
            rec_cnt: 0,
            f_key_defs: BTreeMap::new(),
            f_key_rev: BTreeMap::new(),
            indexes: BTreeMap::new(),
        };
        table.write_info()?;
        Ok(table)
    }

    /// Open an existing table directory
    pub fn open(cache: &mut PageCache, db_path: &Path, name: &str) -> DbResult<Self> {
        let root = db_path.join(name);
        let text = fs::read_to_string(Self::info_name(&root))
            .map_err(|_| DbError::NotFound(format!("table `{}`", name)))?;
        let info: TableInfo = serde_json::from_str(&text)
            .map_err(|e| DbError::Io(crate::file::FileError::Io(e.into())))?;

        let col_data = info
            .columns
            .iter()
            .map(|c| ColumnData::open(cache, &Self::data_root(&root), c))
            .collect::<DbResult<Vec<_>>>()?;
        let rid_pool = IdPool::load(cache, Self::pool_name(&root))?;

        let mut table = Self {
            name: name.to_string(),
            root: root.clone(),
            cols: info.columns,
            col_data,
            rid_pool,
            rec_cnt: info.rec_cnt,
            f_key_defs: info.foreign_keys.into_iter().map(|f| (f.name.clone(), f)).collect(),
            f_key_rev: info
                .foreign_key_rev
                .into_iter()
                .map(|(src, f)| (f.name.clone(), (src, f)))
                .collect(),
            indexes: BTreeMap::new(),
        };

        for idx_info in info.indexes {
            let cols = idx_info
                .columns
                .iter()
                .map(|c| table.col_id(c))
                .collect::<DbResult<Vec<_>>>()?;
            let index = Index::load(
                cache,
                &Self::index_root(&root),
                &idx_info,
                cols,
                &table.col_data,
            )?;
            table.indexes.insert(idx_info.name.clone(), index);
        }
        Ok(table)
    }

    /// Persist the metadata file
    pub fn write_info(&self) -> DbResult<()> {
        let info = TableInfo {
            columns: self.cols.clone(),
            rec_cnt: self.rec_cnt,
            foreign_keys: self.f_key_defs.values().cloned().collect(),
            foreign_key_rev: self
                .f_key_rev
                .values()
                .cloned()
                .collect(),
            indexes: self.indexes.values().map(|i| i.info()).collect(),
        };
        let text = serde_json::to_string_pretty(&info)
            .map_err(|e| DbError::Io(crate::file::FileError::Io(e.into())))?;
        fs::write(Self::info_name(&self.root), text)?;
        Ok(())
    }

    /// Flush metadata and close every backing file
    pub fn close(mut self, cache: &mut PageCache) -> DbResult<()> {
        self.write_info()?;
        for (_, index) in std::mem::take(&mut self.indexes) {
            index.close(cache)?;
        }
        for data in self.col_data.drain(..) {
            data.close(cache)?;
        }
        self.rid_pool.close(cache)?;
        Ok(())
    }

    /// Close and delete the whole table directory
    pub fn destroy(mut self, cache: &mut PageCache) -> DbResult<()> {
        for (_, index) in std::mem::take(&mut self.indexes) {
            index.destroy(cache)?;
        }
        for data in self.col_data.drain(..) {
            data.destroy(cache)?;
        }
        let root = self.root.clone();
        self.rid_pool.close(cache)?;
        fs::remove_dir_all(root)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cols(&self) -> &[Column] {
        &self.cols
    }

    pub fn col_data(&self) -> &[ColumnData] {
        &self.col_data
    }

    pub fn rec_cnt(&self) -> u64 {
        self.rec_cnt
    }

    pub fn col_id(&self, name: &str) -> DbResult<usize> {
        self.cols
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                DbError::NotFound(format!("column `{}` in table `{}`", name, self.name))
            })
    }

    pub fn col(&self, name: &str) -> DbResult<&Column> {
        Ok(&self.cols[self.col_id(name)?])
    }

    /// All live rids
    pub fn all(&self) -> Vec<u64> {
        self.rid_pool.all()
    }

    pub fn is_live(&self, rid: u64) -> bool {
        self.rid_pool.contains(rid)
    }

    /// DESC TABLE rows: Field / Null / Type / Default
    pub fn description(&self) -> (Vec<String>, Vec<Vec<Value>>) {
        let headers = vec![
            "Field".to_string(),
            "Null".to_string(),
            "Type".to_string(),
            "Default".to_string(),
        ];
        let rows = self
            .cols
            .iter()
            .map(|c| {
                vec![
                    Value::Str(c.name.clone()),
                    Value::Str((if c.nullable { "YES" } else { "NO" }).to_string()),
                    Value::Str(c.type_string()),
                    c.default.clone(),
                ]
            })
            .collect();
        (headers, rows)
    }

    // ========== Index lookups ==========

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    pub fn indexes_iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    pub fn p_key(&self) -> Option<&Index> {
        self.indexes.values().find(|i| i.is_primary())
    }

    pub fn f_key_index(&self, name: &str) -> Option<&Index> {
        self.f_key_defs.get(name).and_then(|f| self.indexes.get(&f.name))
    }

    /// An index whose column set equals `col_names` exactly, any order
    pub fn index_matching(&self, col_names: &BTreeSet<&str>) -> Option<&Index> {
        self.indexes.values().find(|index| {
            index.cols().len() == col_names.len()
                && index.col_names().iter().all(|c| col_names.contains(c.as_str()))
        })
    }

    // ========== Row primitives ==========

    /// Read the full form of one column of one row
    pub fn get_full(&self, cache: &mut PageCache, col_id: usize, rid: u64) -> DbResult<Vec<u8>> {
        self.col_data[col_id].read_full(cache, rid)
    }

    /// Decode one whole row
    pub fn get_row(&self, cache: &mut PageCache, rid: u64) -> DbResult<Vec<Value>> {
        self.col_data
            .iter()
            .map(|d| d.read_value(cache, rid))
            .collect()
    }

    /// Column constraint + unique-index checks for a candidate row
    pub fn check_row(&self, cache: &mut PageCache, values: &[Value]) -> DbResult<()> {
        if values.len() != self.cols.len() {
            return Err(DbError::TypeMismatch(format!(
                "expected {} values, got {}",
                self.cols.len(),
                values.len()
            )));
        }
        for (col, v) in self.cols.iter().zip(values) {
            col.check(v)?;
        }

        let live = self.all();
        for index in self.indexes.values() {
            if !index.is_unique() {
                continue;
            }
            let covered: Vec<&Value> = index.cols().iter().map(|&c| &values[c]).collect();
            // unique cannot constrain null
            if covered.iter().any(|v| v.is_null()) {
                continue;
            }
            let full = index.full_of_values(&covered)?;
            if index.contains(cache, &full, &self.col_data, &live)? {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key for unique index `{}`",
                    index.name()
                )));
            }
        }
        Ok(())
    }

    /// Write a checked row: allocate a rid, fill every column, index it
    pub fn insert_row(&mut self, cache: &mut PageCache, values: &[Value]) -> DbResult<u64> {
        let rid = self.rid_pool.new_id(cache)?;
        for (data, v) in self.col_data.iter().zip(values) {
            data.insert_value(cache, rid, v)?;
        }
        for index in self.indexes.values_mut() {
            let raw = index.raw_of(cache, &self.col_data, rid)?;
            let full = index.full_of(cache, &self.col_data, rid)?;
            index.insert(cache, &raw, rid, &full)?;
        }
        self.rec_cnt += 1;
        Ok(rid)
    }

    /// Remove one row: unindex, invalidate slots, free the rid
    pub fn delete_row(&mut self, cache: &mut PageCache, rid: u64) -> DbResult<()> {
        for index in self.indexes.values_mut() {
            let raw = index.raw_of(cache, &self.col_data, rid)?;
            index.remove(cache, &raw, rid)?;
        }
        for data in &self.col_data {
            data.remove(cache, rid)?;
        }
        self.rid_pool.free_id(cache, rid)?;
        self.rec_cnt -= 1;
        Ok(())
    }

    /// Rewrite the given columns of one row, keeping every index in sync
    pub fn update_row(
        &mut self,
        cache: &mut PageCache,
        rid: u64,
        new_vals: &BTreeMap<usize, Value>,
    ) -> DbResult<()> {
        let touched = |index: &Index| index.cols().iter().any(|c| new_vals.contains_key(c));

        for index in self.indexes.values_mut() {
            if touched(index) {
                let raw = index.raw_of(cache, &self.col_data, rid)?;
                index.remove(cache, &raw, rid)?;
            }
        }
        for (&col_id, v) in new_vals {
            // Free the old VARCHAR span before the new bytes land
            self.col_data[col_id].remove(cache, rid)?;
            self.col_data[col_id].insert_value(cache, rid, v)?;
        }
        for index in self.indexes.values_mut() {
            if touched(index) {
                let raw = index.raw_of(cache, &self.col_data, rid)?;
                let full = index.full_of(cache, &self.col_data, rid)?;
                index.insert(cache, &raw, rid, &full)?;
            }
        }
        Ok(())
    }

    /// Set the given columns of one row to NULL, keeping indexes in sync
    pub fn set_nulls(&mut self, cache: &mut PageCache, rid: u64, col_ids: &[usize]) -> DbResult<()> {
        let vals: BTreeMap<usize, Value> =
            col_ids.iter().map(|&c| (c, Value::Null)).collect();
        self.update_row(cache, rid, &vals)
    }

    // ========== WHERE resolution ==========

    fn cond_col_id(&self, cond: &WhereCond) -> DbResult<usize> {
        let col = match cond {
            WhereCond::Cmp { col, .. } => col,
            WhereCond::IsNull { col, .. } => col,
        };
        if let Some(t) = &col.table {
            if t != &self.name {
                return Err(DbError::NotFound(format!("table `{}` in condition", t)));
            }
        }
        self.col_id(&col.column)
    }

    /// Intersect `rids` with one condition
    fn filt_cond(
        &self,
        cache: &mut PageCache,
        rids: &[u64],
        cond: &WhereCond,
    ) -> DbResult<Vec<u64>> {
        let col_id = self.cond_col_id(cond)?;
        match cond {
            WhereCond::IsNull { not, .. } => self.col_data[col_id].filt_null(cache, rids, *not),
            WhereCond::Cmp { op, expr, .. } => match expr {
                Expr::Value(v) => self.col_data[col_id].filt_value(cache, rids, *op, v),
                Expr::Column(other) => {
                    if let Some(t) = &other.table {
                        if t != &self.name {
                            return Err(DbError::NotFound(format!("table `{}` in condition", t)));
                        }
                    }
                    let other_id = self.col_id(&other.column)?;
                    let mut out = Vec::new();
                    for &rid in rids {
                        let a = self.col_data[col_id].read_full(cache, rid)?;
                        let b = self.col_data[other_id].read_full(cache, rid)?;
                        if value::cmp_cross(
                            &a,
                            &self.cols[col_id].data_type,
                            *op,
                            &b,
                            &self.cols[other_id].data_type,
                        )? {
                            out.push(rid);
                        }
                    }
                    Ok(out)
                }
            },
        }
    }

    /// Try to answer the whole clause with one index
    ///
    /// Eligible when every term compares a column against a literal (no
    /// null-checks, no column-column terms, no Neq) and the predicate
    /// columns together equal some index's column set exactly. A null
    /// literal short-circuits to the empty result.
    fn where_index(
        &self,
        cache: &mut PageCache,
        conds: &[WhereCond],
    ) -> DbResult<Option<Vec<u64>>> {
        let mut by_col: Vec<(String, CmpOp, Value)> = Vec::new();
        for cond in conds {
            match cond {
                WhereCond::Cmp {
                    col,
                    op,
                    expr: Expr::Value(v),
                } if *op != CmpOp::Neq => {
                    self.cond_col_id(cond)?;
                    if v.is_null() {
                        return Ok(Some(Vec::new()));
                    }
                    by_col.push((col.column.clone(), *op, v.clone()));
                }
                _ => return Ok(None),
            }
        }

        let col_set: BTreeSet<&str> = by_col.iter().map(|(c, _, _)| c.as_str()).collect();
        let index = match self.index_matching(&col_set) {
            Some(index) => index,
            None => return Ok(None),
        };
        let preds = preds_by_rank(index, &by_col)?;
        let rids = index.query(cache, &preds, usize::MAX, &self.col_data, &self.all())?;
        Ok(Some(rids))
    }

    /// Resolve a WHERE clause to the matching rid set
    pub fn resolve_where(&self, cache: &mut PageCache, conds: &[WhereCond]) -> DbResult<Vec<u64>> {
        if conds.is_empty() {
            return Ok(self.all());
        }
        if let Some(rids) = self.where_index(cache, conds)? {
            return Ok(rids);
        }
        let mut rids = self.all();
        for cond in conds {
            rids = self.filt_cond(cache, &rids, cond)?;
        }
        Ok(rids)
    }

    // ========== Index DDL ==========

    pub fn create_index(
        &mut self,
        cache: &mut PageCache,
        name: &str,
        col_names: &[String],
        primary: bool,
        unique: bool,
    ) -> DbResult<()> {
        if name.is_empty() {
            return Err(DbError::Unsupported("index name cannot be empty".into()));
        }
        if !primary && name == PRIMARY_KEY_NAME {
            return Err(DbError::Unsupported(format!(
                "`{}` is reserved for the primary key",
                PRIMARY_KEY_NAME
            )));
        }
        if self.has_index(name) {
            return Err(DbError::AlreadyExists(format!("index `{}`", name)));
        }
        let cols = col_names
            .iter()
            .map(|c| self.col_id(c))
            .collect::<DbResult<Vec<_>>>()?;

        let index = Index::create(
            cache,
            &Self::index_root(&self.root),
            name,
            cols,
            col_names.to_vec(),
            &self.col_data,
            &self.all(),
            primary,
            unique,
        )?;
        self.indexes.insert(name.to_string(), index);
        self.write_info()
    }

    /// Drop a plain index; primary and foreign-key indexes are off limits
    pub fn drop_index(&mut self, cache: &mut PageCache, name: &str) -> DbResult<()> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("index `{}`", name)))?;
        if index.is_primary() || self.f_key_defs.contains_key(name) {
            return Err(DbError::Unsupported(format!(
                "index `{}` backs a key constraint",
                name
            )));
        }
        let index = self.indexes.remove(name).unwrap();
        index.destroy(cache)?;
        self.write_info()
    }

    /// Toggle an index between tree-backed and sequential-scan mode
    pub fn set_index_mode(&mut self, cache: &mut PageCache, name: &str, on: bool) -> DbResult<()> {
        let live = self.all();
        let index = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("index `{}`", name)))?;
        if on {
            index.turn_on(cache, &self.col_data, &live)?;
        } else {
            index.turn_off(cache)?;
        }
        self.write_info()
    }

    pub fn add_p_key(
        &mut self,
        cache: &mut PageCache,
        name: Option<String>,
        col_names: &[String],
    ) -> DbResult<()> {
        if self.p_key().is_some() {
            return Err(DbError::AlreadyExists("primary key".into()));
        }
        for col_name in col_names {
            if self.col(col_name)?.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "primary key column `{}` must be not null",
                    col_name
                )));
            }
        }
        let name = name.unwrap_or_else(|| PRIMARY_KEY_NAME.to_string());
        self.create_index(cache, &name, col_names, true, true)
    }

    pub fn drop_p_key(&mut self, cache: &mut PageCache, name: Option<String>) -> DbResult<()> {
        let p_key = self
            .p_key()
            .ok_or_else(|| DbError::NotFound("primary key".into()))?;
        let pk_name = p_key.name().to_string();
        if let Some(name) = name {
            if name != pk_name {
                return Err(DbError::NotFound(format!("primary key `{}`", name)));
            }
        }
        if !self.f_key_rev.is_empty() {
            return Err(DbError::ConstraintViolation(
                "primary key is referenced by a foreign key".into(),
            ));
        }
        let index = self.indexes.remove(&pk_name).unwrap();
        index.destroy(cache)?;
        self.write_info()
    }

    /// Record an already-validated foreign key and build its source index
    pub fn add_f_key_local(&mut self, cache: &mut PageCache, def: &ForeignKey) -> DbResult<()> {
        for other in self.f_key_defs.values() {
            for col in &def.cols {
                if other.cols.contains(col) {
                    return Err(DbError::ConstraintViolation(format!(
                        "column `{}` already belongs to foreign key `{}`",
                        col, other.name
                    )));
                }
            }
        }
        self.create_index(cache, &def.name, &def.cols, false, false)?;
        self.f_key_defs.insert(def.name.clone(), def.clone());
        self.write_info()
    }

    pub fn drop_f_key_local(&mut self, cache: &mut PageCache, name: &str) -> DbResult<ForeignKey> {
        let def = self
            .f_key_defs
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("foreign key `{}`", name)))?;
        if let Some(index) = self.indexes.remove(name) {
            index.destroy(cache)?;
        }
        self.write_info()?;
        Ok(def)
    }

    // ========== Column DDL ==========

    pub fn add_col(&mut self, cache: &mut PageCache, def: &FieldDef) -> DbResult<()> {
        if self.cols.len() >= MAX_COL_NUM {
            return Err(DbError::Overflow(format!(
                "more than {} columns",
                MAX_COL_NUM
            )));
        }
        if self.col_id(&def.name).is_ok() {
            return Err(DbError::AlreadyExists(format!("column `{}`", def.name)));
        }
        Column::check_type(&def.data_type)?;
        let col = Column::new(
            def.name.clone(),
            self.cols.len(),
            def.data_type.clone(),
            !def.not_null,
            def.default.clone().unwrap_or(Value::Null),
        );
        // Existing rows take the default, so the default must pass the check
        col.check(&col.default)?;

        let data = ColumnData::create(cache, &Self::data_root(&self.root), &col)?;
        for rid in self.all() {
            data.insert_value(cache, rid, &col.default)?;
        }
        self.cols.push(col);
        self.col_data.push(data);
        self.write_info()
    }

    pub fn drop_col(&mut self, cache: &mut PageCache, col_name: &str) -> DbResult<()> {
        let col_id = self.col_id(col_name)?;
        for index in self.indexes.values() {
            if index.col_names().iter().any(|c| c == col_name) {
                return Err(DbError::ConstraintViolation(format!(
                    "column `{}` is used by index `{}`",
                    col_name,
                    index.name()
                )));
            }
        }
        let data = self.col_data.remove(col_id);
        data.destroy(cache)?;
        self.cols.remove(col_id);
        for (i, col) in self.cols.iter_mut().enumerate() {
            col.ordinal = i;
        }
        self.reindex_ordinals()?;
        self.write_info()
    }

    /// Change a column's definition; only CHAR/VARCHAR conversions allowed
    pub fn change_col(
        &mut self,
        cache: &mut PageCache,
        col_name: &str,
        def: &FieldDef,
    ) -> DbResult<()> {
        let col_id = self.col_id(col_name)?;
        for index in self.indexes.values() {
            if index.col_names().iter().any(|c| c == col_name) {
                return Err(DbError::ConstraintViolation(format!(
                    "column `{}` is used by index `{}`",
                    col_name,
                    index.name()
                )));
            }
        }
        if def.name != col_name && self.col_id(&def.name).is_ok() {
            return Err(DbError::AlreadyExists(format!("column `{}`", def.name)));
        }

        let rids = self.all();
        if def.name != col_name {
            // The file layout is keyed by column name
            let data = self.col_data.remove(col_id);
            data.close(cache)?;
            let data_root = Self::data_root(&self.root);
            fs::rename(data_root.join(col_name), data_root.join(&def.name))?;
            let old_heap = data_root.join(format!("{}.v", col_name));
            if old_heap.exists() {
                fs::rename(old_heap, data_root.join(format!("{}.v", def.name)))?;
            }
            self.cols[col_id].name = def.name.clone();
            let reopened = ColumnData::open(cache, &data_root, &self.cols[col_id])?;
            self.col_data.insert(col_id, reopened);
        }

        self.col_data[col_id].change(cache, &def.data_type, &rids)?;
        self.cols[col_id].data_type = def.data_type.clone();
        self.cols[col_id].nullable = !def.not_null;
        if let Some(default) = &def.default {
            self.cols[col_id].default = default.clone();
        }
        self.write_info()
    }

    /// Re-derive every index's column ordinals from column names
    fn reindex_ordinals(&mut self) -> DbResult<()> {
        let positions: BTreeMap<String, usize> = self
            .cols
            .iter()
            .map(|c| (c.name.clone(), c.ordinal))
            .collect();
        for index in self.indexes.values_mut() {
            let cols = index
                .col_names()
                .iter()
                .map(|n| {
                    positions
                        .get(n)
                        .copied()
                        .ok_or_else(|| DbError::NotFound(format!("column `{}`", n)))
                })
                .collect::<DbResult<Vec<_>>>()?;
            index.set_cols(cols);
        }
        Ok(())
    }
}
