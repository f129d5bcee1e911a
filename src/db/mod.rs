//! Database registry and statement execution
//!
//! `DatabaseManager` owns the page cache, the set of database directories,
//! the per-user current-database selection, and every open table. All logic
//! that crosses table boundaries lives here: foreign-key membership checks,
//! cascade delete, set-null on primary-key updates, rename bookkeeping,
//! multi-table joins.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::ast::{
    AggFunc, AlterStatement, DBStatement, DataType, Expr, Field, FieldDef, IndexStatement, Query,
    Selector, SetPair, SysStatement, TableStatement, Value, WhereCond,
};
use crate::error::{DbError, DbResult};
use crate::file::{FileManager, PageCache};
use crate::table::value::{self, DATA_NORMAL, DATA_NULL};
use crate::table::{ForeignKey, MAX_TBL_NUM, Table};

pub use crate::error::DbError as Error;

/// Per-statement outcome handed to the front-end
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Empty,
    RowsAffected(usize),
    ResultSet {
        headers: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

pub struct DatabaseManager {
    data_dir: PathBuf,
    cache: Arc<Mutex<PageCache>>,
    /// Current database per numeric user id
    current: HashMap<u32, String>,
    /// Database whose tables are loaded in `tables`
    active_db: Option<String>,
    tables: HashMap<String, Table>,
}

impl DatabaseManager {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> DbResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            cache: Arc::new(Mutex::new(PageCache::new(FileManager::new()))),
            current: HashMap::new(),
            active_db: None,
            tables: HashMap::new(),
        })
    }

    /// Shared handle to the page cache (tests and the driver use this)
    pub fn cache(&self) -> Arc<Mutex<PageCache>> {
        Arc::clone(&self.cache)
    }

    fn db_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn db_exists(&self, name: &str) -> bool {
        self.db_path(name).is_dir()
    }

    // ========== Registry ==========

    pub fn create_database(&mut self, name: &str) -> DbResult<()> {
        if self.db_exists(name) {
            return Err(DbError::AlreadyExists(format!("database `{}`", name)));
        }
        fs::create_dir(self.db_path(name))?;
        Ok(())
    }

    pub fn drop_database(&mut self, name: &str) -> DbResult<()> {
        if !self.db_exists(name) {
            return Err(DbError::NotFound(format!("database `{}`", name)));
        }
        if self.active_db.as_deref() == Some(name) {
            let cache = Arc::clone(&self.cache);
            let mut cache = cache.lock().unwrap();
            self.close_all(&mut cache)?;
        }
        // Every session pointing at the dropped database loses its selection
        self.current.retain(|_, db| db != name);
        fs::remove_dir_all(self.db_path(name))?;
        Ok(())
    }

    pub fn show_databases(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn use_database(&mut self, user_id: u32, name: &str) -> DbResult<()> {
        if self.current.get(&user_id).map(String::as_str) == Some(name) {
            return Ok(());
        }
        if !self.db_exists(name) {
            return Err(DbError::NotFound(format!("database `{}`", name)));
        }
        self.current.insert(user_id, name.to_string());
        Ok(())
    }

    pub fn show_tables(&self, user_id: u32) -> DbResult<Vec<String>> {
        let db = self.current_db(user_id)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(self.db_path(&db))? {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn current_db(&self, user_id: u32) -> DbResult<String> {
        self.current
            .get(&user_id)
            .cloned()
            .ok_or(DbError::NoDatabase)
    }

    /// Make the user's current database the loaded one, closing the
    /// previously loaded database's tables if it differs
    fn activate(&mut self, cache: &mut PageCache, user_id: u32) -> DbResult<PathBuf> {
        let db = self.current_db(user_id)?;
        if self.active_db.as_deref() != Some(db.as_str()) {
            self.close_all(cache)?;
            self.active_db = Some(db.clone());
        }
        Ok(self.db_path(&db))
    }

    /// Flush and close every open table
    fn close_all(&mut self, cache: &mut PageCache) -> DbResult<()> {
        let tables: Vec<(String, Table)> = self.tables.drain().collect();
        for (_, table) in tables {
            table.close(cache)?;
        }
        cache.write_back_all()?;
        self.active_db = None;
        Ok(())
    }

    /// Flush everything without closing (durability point for callers)
    pub fn flush(&mut self) -> DbResult<()> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        for table in self.tables.values() {
            table.write_info()?;
        }
        cache.write_back_all()?;
        Ok(())
    }

    fn table_exists(db_path: &Path, name: &str) -> bool {
        db_path.join(name).is_dir()
    }

    /// Open a table into the cache of open tables if it is not there yet
    fn ensure_open(&mut self, cache: &mut PageCache, db_path: &Path, name: &str) -> DbResult<()> {
        if self.tables.contains_key(name) {
            return Ok(());
        }
        if !Self::table_exists(db_path, name) {
            return Err(DbError::NotFound(format!("table `{}`", name)));
        }
        let table = Table::open(cache, db_path, name)?;
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    fn table_ref(&mut self, cache: &mut PageCache, db_path: &Path, name: &str) -> DbResult<&Table> {
        self.ensure_open(cache, db_path, name)?;
        Ok(self.tables.get(name).unwrap())
    }

    /// Remove a table from the open map for exclusive use; callers must put
    /// it back with `tables.insert` on every path
    fn take_table(&mut self, cache: &mut PageCache, db_path: &Path, name: &str) -> DbResult<Table> {
        self.ensure_open(cache, db_path, name)?;
        Ok(self.tables.remove(name).unwrap())
    }

    // ========== Table DDL ==========

    pub fn create_table(
        &mut self,
        user_id: u32,
        name: &str,
        fields: Vec<Field>,
    ) -> DbResult<()> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        if Self::table_exists(&db_path, name) {
            return Err(DbError::AlreadyExists(format!("table `{}`", name)));
        }
        let existing = fs::read_dir(&db_path)?.filter_map(Result::ok).count();
        if existing >= MAX_TBL_NUM {
            return Err(DbError::Overflow(format!(
                "more than {} tables",
                MAX_TBL_NUM
            )));
        }

        let mut defs: Vec<FieldDef> = Vec::new();
        let mut p_key: Option<Vec<String>> = None;
        let mut f_keys: Vec<(Option<String>, Vec<String>, String, Vec<String>)> = Vec::new();
        for field in fields {
            match field {
                Field::Def(def) => defs.push(def),
                Field::PrimaryKey(cols) => {
                    if p_key.is_some() {
                        return Err(DbError::AlreadyExists("primary key".into()));
                    }
                    p_key = Some(cols);
                }
                Field::ForeignKey {
                    name,
                    cols,
                    ref_table,
                    ref_cols,
                } => f_keys.push((name, cols, ref_table, ref_cols)),
            }
        }
        // Primary-key columns are implicitly NOT NULL
        if let Some(pk_cols) = &p_key {
            for def in defs.iter_mut() {
                if pk_cols.contains(&def.name) {
                    def.not_null = true;
                }
            }
        }

        let fk_targets: Vec<String> = f_keys.iter().map(|(_, _, t, _)| t.clone()).collect();
        let table = Table::create(&mut cache, &db_path, name, &defs)?;
        self.tables.insert(name.to_string(), table);

        let finish = (|| -> DbResult<()> {
            if let Some(pk_cols) = p_key {
                let t = self.tables.get_mut(name).unwrap();
                t.add_p_key(&mut cache, None, &pk_cols)?;
            }
            for (fk_name, cols, ref_table, ref_cols) in f_keys {
                self.add_foreign_key_inner(
                    &mut cache, &db_path, name, fk_name, cols, ref_table, ref_cols,
                )?;
            }
            Ok(())
        })();

        if finish.is_err() {
            // Roll the half-made table back off disk, including any reverse
            // foreign-key edges already recorded on referenced tables
            if let Some(table) = self.tables.remove(name) {
                let _ = table.destroy(&mut cache);
            }
            for target in fk_targets {
                if let Some(t) = self.tables.get_mut(&target) {
                    t.f_key_rev.retain(|_, (src, _)| src != name);
                    let _ = t.write_info();
                }
            }
        }
        finish
    }

    pub fn drop_table(&mut self, user_id: u32, name: &str) -> DbResult<()> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        let table = self.take_table(&mut cache, &db_path, name)?;
        if !table.f_key_rev.is_empty() {
            let msg = format!("table `{}` is referenced by a foreign key", name);
            self.tables.insert(name.to_string(), table);
            return Err(DbError::ConstraintViolation(msg));
        }

        // Un-register this table's outgoing foreign keys on their targets
        let out_fks: Vec<ForeignKey> = table.f_key_defs.values().cloned().collect();
        let destroyed = table.destroy(&mut cache);
        for def in out_fks {
            if def.ref_table == name {
                continue;
            }
            if Self::table_exists(&db_path, &def.ref_table) {
                self.ensure_open(&mut cache, &db_path, &def.ref_table)?;
                let target = self.tables.get_mut(&def.ref_table).unwrap();
                target.f_key_rev.remove(&def.name);
                target.write_info()?;
            }
        }
        destroyed
    }

    pub fn desc_table(&mut self, user_id: u32, name: &str) -> DbResult<QueryResult> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;
        let table = self.table_ref(&mut cache, &db_path, name)?;
        let (headers, rows) = table.description();
        Ok(QueryResult::ResultSet { headers, rows })
    }

    pub fn rename_table(&mut self, user_id: u32, old: &str, new: &str) -> DbResult<()> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        if Self::table_exists(&db_path, new) {
            return Err(DbError::AlreadyExists(format!("table `{}`", new)));
        }
        // Flush and close before touching the directory
        let table = self.take_table(&mut cache, &db_path, old)?;
        let incoming: Vec<(String, ForeignKey)> = table.f_key_rev.values().cloned().collect();
        let outgoing: Vec<ForeignKey> = table.f_key_defs.values().cloned().collect();
        table.close(&mut cache)?;
        fs::rename(db_path.join(old), db_path.join(new))?;

        // Referencing tables point at the new name
        for (src, def) in incoming {
            let src = if src == old { new.to_string() } else { src };
            self.ensure_open(&mut cache, &db_path, &src)?;
            let src_table = self.tables.get_mut(&src).unwrap();
            if let Some(fk) = src_table.f_key_defs.get_mut(&def.name) {
                fk.ref_table = new.to_string();
            }
            src_table.write_info()?;
        }
        // Targets of outgoing keys record the new source name
        for def in outgoing {
            let target = if def.ref_table == old {
                new.to_string()
            } else {
                def.ref_table.clone()
            };
            self.ensure_open(&mut cache, &db_path, &target)?;
            let target_table = self.tables.get_mut(&target).unwrap();
            if let Some((src, _)) = target_table.f_key_rev.get(&def.name).cloned() {
                if src == old {
                    let entry = target_table.f_key_rev.get_mut(&def.name).unwrap();
                    entry.0 = new.to_string();
                }
            }
            target_table.write_info()?;
        }
        // The renamed table's own metadata may have changed both ways
        self.ensure_open(&mut cache, &db_path, new)?;
        let renamed = self.tables.get_mut(new).unwrap();
        for def in renamed.f_key_defs.values_mut() {
            if def.ref_table == old {
                def.ref_table = new.to_string();
            }
        }
        renamed.write_info()?;
        Ok(())
    }

    // ========== Foreign keys ==========

    #[allow(clippy::too_many_arguments)]
    fn add_foreign_key_inner(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        table: &str,
        name: Option<String>,
        cols: Vec<String>,
        ref_table: String,
        ref_cols: Vec<String>,
    ) -> DbResult<()> {
        let name = name.unwrap_or_else(|| format!("fk_{}_{}", table, cols.join("_")));
        let def = ForeignKey {
            name: name.clone(),
            cols,
            ref_table: ref_table.clone(),
            ref_cols,
        };

        let mut t = self.take_table(cache, db_path, table)?;
        let applied = self.add_foreign_key_checked(cache, db_path, &mut t, &def);
        self.tables.insert(table.to_string(), t);
        applied?;

        // Record the reverse edge on the referenced table
        if ref_table != table {
            self.ensure_open(cache, db_path, &ref_table)?;
            let target = self.tables.get_mut(&ref_table).unwrap();
            target
                .f_key_rev
                .insert(name, (table.to_string(), def));
            target.write_info()?;
        } else {
            let t = self.tables.get_mut(table).unwrap();
            t.f_key_rev.insert(name, (table.to_string(), def));
            t.write_info()?;
        }
        Ok(())
    }

    /// Validate an FK definition against the referenced table and apply it
    /// to the source table (reverse edge excluded)
    fn add_foreign_key_checked(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        t: &mut Table,
        def: &ForeignKey,
    ) -> DbResult<()> {
        let self_ref = def.ref_table == t.name();
        if !self_ref {
            self.ensure_open(cache, db_path, &def.ref_table)?;
        }
        {
            let ref_t: &Table = if self_ref {
                t
            } else {
                self.tables.get(&def.ref_table).unwrap()
            };
            let ref_pk = ref_t.p_key().ok_or_else(|| {
                DbError::ConstraintViolation(format!(
                    "table `{}` has no primary key",
                    def.ref_table
                ))
            })?;
            if ref_pk.col_names() != def.ref_cols.as_slice() {
                return Err(DbError::ConstraintViolation(format!(
                    "foreign key must map to the primary key of `{}`",
                    def.ref_table
                )));
            }
            // Pairwise type agreement keeps composite comparisons meaningful
            for (src_col, ref_col) in def.cols.iter().zip(&def.ref_cols) {
                let src_ty = &t.col(src_col)?.data_type;
                let ref_ty = &ref_t.col(ref_col)?.data_type;
                if src_ty != ref_ty {
                    return Err(DbError::TypeMismatch(format!(
                        "foreign key column `{}` does not match `{}.{}`",
                        src_col, def.ref_table, ref_col
                    )));
                }
            }
        }

        // Existing rows must already satisfy the constraint
        let col_ids = def
            .cols
            .iter()
            .map(|c| t.col_id(c))
            .collect::<DbResult<Vec<_>>>()?;
        for rid in t.all() {
            let fulls = col_ids
                .iter()
                .map(|&c| t.get_full(cache, c, rid))
                .collect::<DbResult<Vec<_>>>()?;
            let null_count = fulls.iter().filter(|f| f[0] == DATA_NULL).count();
            if null_count == fulls.len() {
                continue;
            }
            if null_count > 0 {
                return Err(DbError::ConstraintViolation(
                    "foreign key columns must be all null or all non-null".into(),
                ));
            }
            let present = {
                let ref_t: &Table = if self_ref {
                    t
                } else {
                    self.tables.get(&def.ref_table).unwrap()
                };
                let pk = ref_t.p_key().unwrap();
                pk.contains(cache, &fulls, ref_t.col_data(), &ref_t.all())?
            };
            if !present {
                return Err(DbError::ConstraintViolation(
                    "foreign key reference failed".into(),
                ));
            }
        }

        t.add_f_key_local(cache, def)
    }

    fn drop_foreign_key_inner(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        table: &str,
        name: &str,
    ) -> DbResult<()> {
        let mut t = self.take_table(cache, db_path, table)?;
        let dropped = t.drop_f_key_local(cache, name);
        self.tables.insert(table.to_string(), t);
        let def = dropped?;

        if def.ref_table == table {
            let t = self.tables.get_mut(table).unwrap();
            t.f_key_rev.remove(name);
            t.write_info()?;
        } else if Self::table_exists(db_path, &def.ref_table) {
            self.ensure_open(cache, db_path, &def.ref_table)?;
            let target = self.tables.get_mut(&def.ref_table).unwrap();
            target.f_key_rev.remove(name);
            target.write_info()?;
        }
        Ok(())
    }

    /// Check one row's FK membership: every composite all-null or present in
    /// the referenced primary key
    fn check_fk_membership(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        t: &Table,
        values: &[Value],
    ) -> DbResult<()> {
        for def in t.f_key_defs.values() {
            let col_ids = def
                .cols
                .iter()
                .map(|c| t.col_id(c))
                .collect::<DbResult<Vec<_>>>()?;
            let covered: Vec<&Value> = col_ids.iter().map(|&c| &values[c]).collect();
            let null_count = covered.iter().filter(|v| v.is_null()).count();
            if null_count == covered.len() {
                continue;
            }
            if null_count > 0 {
                return Err(DbError::ConstraintViolation(
                    "foreign key columns must be all null or all non-null".into(),
                ));
            }
            let fulls = covered
                .iter()
                .zip(&col_ids)
                .map(|(v, &c)| value::encode(v, &t.cols()[c].data_type))
                .collect::<DbResult<Vec<_>>>()?;

            let present = if def.ref_table == t.name() {
                let pk = t.p_key().ok_or_else(|| {
                    DbError::ConstraintViolation("referenced primary key is gone".into())
                })?;
                pk.contains(cache, &fulls, t.col_data(), &t.all())?
            } else {
                self.ensure_open(cache, db_path, &def.ref_table)?;
                let ref_t = self.tables.get(&def.ref_table).unwrap();
                let pk = ref_t.p_key().ok_or_else(|| {
                    DbError::ConstraintViolation("referenced primary key is gone".into())
                })?;
                pk.contains(cache, &fulls, ref_t.col_data(), &ref_t.all())?
            };
            if !present {
                return Err(DbError::ConstraintViolation(format!(
                    "foreign key `{}` reference failed",
                    def.name
                )));
            }
        }
        Ok(())
    }

    // ========== DML ==========

    pub fn insert(
        &mut self,
        user_id: u32,
        table: &str,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    ) -> DbResult<usize> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        let mut t = self.take_table(&mut cache, &db_path, table)?;
        let checked = self.insert_inner(&mut cache, &db_path, &t, columns, rows);
        let result = checked.and_then(|full_rows| {
            let mut inserted = 0;
            for row in &full_rows {
                t.insert_row(&mut cache, row)?;
                inserted += 1;
            }
            Ok(inserted)
        });
        self.tables.insert(table.to_string(), t);
        result
    }

    /// Reorder, default-fill, and fully check candidate rows
    fn insert_inner(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        t: &Table,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    ) -> DbResult<Vec<Vec<Value>>> {
        let full_rows: Vec<Vec<Value>> = match &columns {
            None => {
                for row in &rows {
                    if row.len() != t.cols().len() {
                        return Err(DbError::TypeMismatch(format!(
                            "expected {} values, got {}",
                            t.cols().len(),
                            row.len()
                        )));
                    }
                }
                rows
            }
            Some(col_names) => {
                let col_ids = col_names
                    .iter()
                    .map(|c| t.col_id(c))
                    .collect::<DbResult<Vec<_>>>()?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != col_ids.len() {
                        return Err(DbError::TypeMismatch(format!(
                            "expected {} values, got {}",
                            col_ids.len(),
                            row.len()
                        )));
                    }
                    let mut full: Vec<Value> =
                        t.cols().iter().map(|c| c.default.clone()).collect();
                    // A repeated column keeps the later value
                    for (&c, v) in col_ids.iter().zip(row) {
                        full[c] = v;
                    }
                    out.push(full);
                }
                out
            }
        };

        for row in &full_rows {
            t.check_row(cache, row)?;
            self.check_fk_membership(cache, db_path, t, row)?;
        }
        Ok(full_rows)
    }

    pub fn delete(&mut self, user_id: u32, table: &str, conds: &[WhereCond]) -> DbResult<usize> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        let t = self.table_ref(&mut cache, &db_path, table)?;
        let rids = t.resolve_where(&mut cache, conds)?;
        self.delete_rids_cascading(&mut cache, &db_path, table, rids)
    }

    /// Delete the given rids and ripple cascade deletes through the
    /// reverse foreign-key map
    fn delete_rids_cascading(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        table: &str,
        rids: Vec<u64>,
    ) -> DbResult<usize> {
        let mut t = self.take_table(cache, db_path, table)?;
        let mut deleted = 0;
        // (source table, fk name, vanished primary-key composite)
        let mut work: Vec<(String, String, Vec<Vec<u8>>)> = Vec::new();

        let result = (|| -> DbResult<()> {
            for rid in rids {
                // A cascade may already have taken this rid
                if !t.is_live(rid) {
                    continue;
                }
                let pk_vals = match t.p_key() {
                    Some(pk) if !t.f_key_rev.is_empty() => {
                        Some(pk.full_of(cache, t.col_data(), rid)?)
                    }
                    _ => None,
                };
                t.delete_row(cache, rid)?;
                deleted += 1;

                if let Some(vals) = pk_vals {
                    let gone = {
                        let pk = t.p_key().unwrap();
                        !pk.contains(cache, &vals, t.col_data(), &t.all())?
                    };
                    if gone {
                        for (src, def) in t.f_key_rev.values() {
                            work.push((src.clone(), def.name.clone(), vals.clone()));
                        }
                    }
                }
            }
            Ok(())
        })();
        self.tables.insert(table.to_string(), t);
        result?;

        for (src, fk_name, vals) in work {
            let matching = {
                let src_t = self.table_ref(cache, db_path, &src)?;
                let fk_index = src_t.index(&fk_name).ok_or_else(|| {
                    DbError::NotFound(format!("foreign key index `{}`", fk_name))
                })?;
                fk_index.rids_matching(cache, &vals, src_t.col_data(), &src_t.all())?
            };
            if !matching.is_empty() {
                deleted += self.delete_rids_cascading(cache, db_path, &src, matching)?;
            }
        }
        Ok(deleted)
    }

    pub fn update(
        &mut self,
        user_id: u32,
        table: &str,
        set: &[SetPair],
        conds: &[WhereCond],
    ) -> DbResult<usize> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        let mut t = self.take_table(&mut cache, &db_path, table)?;
        let result = self.update_inner(&mut cache, &db_path, &mut t, set, conds);
        self.tables.insert(table.to_string(), t);
        let (updated, vanished_pks) = result?;

        // Set-null ripple for primary-key values that disappeared
        for vals in vanished_pks {
            let still_present = {
                let t = self.tables.get(table).unwrap();
                let pk = t.p_key().unwrap();
                pk.contains(&mut cache, &vals, t.col_data(), &t.all())?
            };
            if still_present {
                continue;
            }
            let rev: Vec<(String, ForeignKey)> = self
                .tables
                .get(table)
                .unwrap()
                .f_key_rev
                .values()
                .cloned()
                .collect();
            for (src, def) in rev {
                let matching = {
                    let src_t = self.table_ref(&mut cache, &db_path, &src)?;
                    let fk_index = src_t.index(&def.name).ok_or_else(|| {
                        DbError::NotFound(format!("foreign key index `{}`", def.name))
                    })?;
                    fk_index.rids_matching(&mut cache, &vals, src_t.col_data(), &src_t.all())?
                };
                if matching.is_empty() {
                    continue;
                }
                let mut src_t = self.take_table(&mut cache, &db_path, &src)?;
                let nulled = (|| -> DbResult<()> {
                    let col_ids = def
                        .cols
                        .iter()
                        .map(|c| src_t.col_id(c))
                        .collect::<DbResult<Vec<_>>>()?;
                    for rid in matching {
                        src_t.set_nulls(&mut cache, rid, &col_ids)?;
                    }
                    Ok(())
                })();
                self.tables.insert(src.clone(), src_t);
                nulled?;
            }
        }
        Ok(updated)
    }

    /// Validate and apply an UPDATE on one table; returns the count and the
    /// primary-key composites whose values were overwritten
    fn update_inner(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        t: &mut Table,
        set: &[SetPair],
        conds: &[WhereCond],
    ) -> DbResult<(usize, Vec<Vec<Vec<u8>>>)> {
        let mut new_vals: BTreeMap<usize, Value> = BTreeMap::new();
        for pair in set {
            let col_id = t.col_id(&pair.col)?;
            t.cols()[col_id].check(&pair.value)?;
            new_vals.insert(col_id, pair.value.clone());
        }
        let rids = t.resolve_where(cache, conds)?;
        if rids.is_empty() {
            return Ok((0, Vec::new()));
        }

        let pk_cols: Vec<usize> = t.p_key().map(|pk| pk.cols().to_vec()).unwrap_or_default();
        let pk_touched = pk_cols.iter().any(|c| new_vals.contains_key(c));

        // A primary-key rewrite set-nulls referencing rows, so every
        // referencing column must tolerate null before anything is written
        if pk_touched && !t.f_key_rev.is_empty() {
            for (src, def) in t.f_key_rev.values() {
                let nullable = if src == t.name() {
                    def.cols
                        .iter()
                        .map(|c| Ok(t.col(c)?.nullable))
                        .collect::<DbResult<Vec<_>>>()?
                } else {
                    self.ensure_open(cache, db_path, src)?;
                    let src_t = self.tables.get(src).unwrap();
                    def.cols
                        .iter()
                        .map(|c| Ok(src_t.col(c)?.nullable))
                        .collect::<DbResult<Vec<_>>>()?
                };
                if nullable.iter().any(|n| !n) {
                    return Err(DbError::ConstraintViolation(format!(
                        "foreign key `{}` columns cannot be set null",
                        def.name
                    )));
                }
            }
        }

        // New values must satisfy every touched foreign key
        for def in t.f_key_defs.values() {
            let col_ids = def
                .cols
                .iter()
                .map(|c| t.col_id(c))
                .collect::<DbResult<Vec<_>>>()?;
            if !col_ids.iter().any(|c| new_vals.contains_key(c)) {
                continue;
            }
            for &rid in &rids {
                let mut fulls = Vec::with_capacity(col_ids.len());
                let mut null_count = 0;
                for &c in &col_ids {
                    let full = match new_vals.get(&c) {
                        Some(v) => value::encode(v, &t.cols()[c].data_type)?,
                        None => t.get_full(cache, c, rid)?,
                    };
                    if full[0] == DATA_NULL {
                        null_count += 1;
                    }
                    fulls.push(full);
                }
                if null_count == fulls.len() {
                    continue;
                }
                if null_count > 0 {
                    return Err(DbError::ConstraintViolation(
                        "foreign key columns must be all null or all non-null".into(),
                    ));
                }
                let present = if def.ref_table == t.name() {
                    let pk = t.p_key().ok_or_else(|| {
                        DbError::ConstraintViolation("referenced primary key is gone".into())
                    })?;
                    pk.contains(cache, &fulls, t.col_data(), &t.all())?
                } else {
                    self.ensure_open(cache, db_path, &def.ref_table)?;
                    let ref_t = self.tables.get(&def.ref_table).unwrap();
                    let pk = ref_t.p_key().ok_or_else(|| {
                        DbError::ConstraintViolation("referenced primary key is gone".into())
                    })?;
                    pk.contains(cache, &fulls, ref_t.col_data(), &ref_t.all())?
                };
                if !present {
                    return Err(DbError::ConstraintViolation(format!(
                        "foreign key `{}` reference failed",
                        def.name
                    )));
                }
            }
        }

        let mut vanished = Vec::new();
        let mut updated = 0;
        for &rid in &rids {
            // Unique indexes must stay unique; checking per row catches
            // collisions created earlier in this same statement
            self.check_update_unique(cache, t, rid, &new_vals)?;

            let old_pk = if pk_touched {
                let pk = t.p_key().unwrap();
                Some(pk.full_of(cache, t.col_data(), rid)?)
            } else {
                None
            };
            t.update_row(cache, rid, &new_vals)?;
            updated += 1;

            if let Some(old) = old_pk {
                let new = t.p_key().unwrap().full_of(cache, t.col_data(), rid)?;
                if old != new {
                    vanished.push(old);
                }
            }
        }
        Ok((updated, vanished))
    }

    fn check_update_unique(
        &self,
        cache: &mut PageCache,
        t: &Table,
        rid: u64,
        new_vals: &BTreeMap<usize, Value>,
    ) -> DbResult<()> {
        let live = t.all();
        for index in t.indexes_iter() {
            if !index.is_unique() || !index.cols().iter().any(|c| new_vals.contains_key(c)) {
                continue;
            }
            let mut fulls = Vec::with_capacity(index.cols().len());
            let mut has_null = false;
            for &c in index.cols() {
                let full = match new_vals.get(&c) {
                    Some(v) => value::encode(v, &t.cols()[c].data_type)?,
                    None => t.get_full(cache, c, rid)?,
                };
                if full[0] != DATA_NORMAL {
                    has_null = true;
                }
                fulls.push(full);
            }
            if has_null {
                continue;
            }
            let holders = index.rids_matching(cache, &fulls, t.col_data(), &live)?;
            if holders.iter().any(|&r| r != rid) {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key for unique index `{}`",
                    index.name()
                )));
            }
        }
        Ok(())
    }

    // ========== SELECT ==========

    pub fn select(
        &mut self,
        user_id: u32,
        select: &Selector,
        table_names: &[String],
        conds: &[WhereCond],
    ) -> DbResult<QueryResult> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;

        match table_names {
            [] => Err(DbError::NotFound("no table in select".into())),
            [single] => self.select_single(&mut cache, &db_path, single, select, conds),
            many => self.select_join(&mut cache, &db_path, many, select, conds),
        }
    }

    fn select_single(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        table: &str,
        select: &Selector,
        conds: &[WhereCond],
    ) -> DbResult<QueryResult> {
        let t = self.table_ref(cache, db_path, table)?;
        let rids = t.resolve_where(cache, conds)?;

        match select {
            Selector::All => {
                let headers = t.cols().iter().map(|c| c.name.clone()).collect();
                let mut rows = Vec::with_capacity(rids.len());
                for rid in rids {
                    rows.push(t.get_row(cache, rid)?);
                }
                Ok(QueryResult::ResultSet { headers, rows })
            }
            Selector::Columns(refs) => {
                let mut col_ids = Vec::with_capacity(refs.len());
                let mut headers = Vec::with_capacity(refs.len());
                for r in refs {
                    if let Some(tbl) = &r.table {
                        if tbl != table {
                            return Err(DbError::NotFound(format!(
                                "table `{}` in selector",
                                tbl
                            )));
                        }
                    }
                    col_ids.push(t.col_id(&r.column)?);
                    headers.push(r.column.clone());
                }
                let mut rows = Vec::with_capacity(rids.len());
                for rid in rids {
                    let mut row = Vec::with_capacity(col_ids.len());
                    for &c in &col_ids {
                        let full = t.get_full(cache, c, rid)?;
                        row.push(value::decode(&full, &t.cols()[c].data_type));
                    }
                    rows.push(row);
                }
                Ok(QueryResult::ResultSet { headers, rows })
            }
            Selector::Aggregate(func, col) => {
                if let Some(tbl) = &col.table {
                    if tbl != table {
                        return Err(DbError::NotFound(format!("table `{}` in selector", tbl)));
                    }
                }
                let col_id = t.col_id(&col.column)?;
                let result = Self::aggregate(cache, t, col_id, *func, &rids)?;
                let name = match func {
                    AggFunc::Count => "count",
                    AggFunc::Sum => "sum",
                    AggFunc::Avg => "avg",
                    AggFunc::Min => "min",
                    AggFunc::Max => "max",
                };
                Ok(QueryResult::ResultSet {
                    headers: vec![format!("{}({})", name, col.column)],
                    rows: vec![vec![result]],
                })
            }
        }
    }

    /// Single-column aggregate over the resolved rid set
    ///
    /// `count` ignores null and takes any type; the rest demand INT or
    /// NUMERIC. On an empty input min/max/avg yield NULL, sum a typed zero.
    fn aggregate(
        cache: &mut PageCache,
        t: &Table,
        col_id: usize,
        func: AggFunc,
        rids: &[u64],
    ) -> DbResult<Value> {
        use rust_decimal::Decimal;
        use rust_decimal::prelude::ToPrimitive;

        let ty = t.cols()[col_id].data_type.clone();
        if func == AggFunc::Count {
            let mut count = 0i64;
            for &rid in rids {
                if t.get_full(cache, col_id, rid)?[0] == DATA_NORMAL {
                    count += 1;
                }
            }
            return Ok(Value::Int(count));
        }

        enum Num {
            Int(Vec<i64>),
            Dec(Vec<Decimal>),
        }
        let nums = match ty {
            DataType::Int => {
                let mut v = Vec::new();
                for &rid in rids {
                    let full = t.get_full(cache, col_id, rid)?;
                    if let Value::Int(i) = value::decode(&full, &ty) {
                        v.push(i);
                    }
                }
                Num::Int(v)
            }
            DataType::Numeric(_, _) => {
                let mut v = Vec::new();
                for &rid in rids {
                    let full = t.get_full(cache, col_id, rid)?;
                    if full[0] == DATA_NORMAL {
                        let mut buf = [0u8; 16];
                        buf.copy_from_slice(&full[1..17]);
                        v.push(Decimal::deserialize(buf));
                    }
                }
                Num::Dec(v)
            }
            _ => {
                return Err(DbError::Unsupported(format!(
                    "aggregate over {} column",
                    value::type_string(&ty)
                )));
            }
        };

        Ok(match (func, nums) {
            (AggFunc::Sum, Num::Int(v)) => Value::Int(v.iter().sum()),
            (AggFunc::Sum, Num::Dec(v)) => {
                let sum: Decimal = v.iter().sum();
                Value::Float(sum.to_f64().unwrap_or_default())
            }
            (AggFunc::Min, Num::Int(v)) => v.into_iter().min().map(Value::Int).unwrap_or(Value::Null),
            (AggFunc::Max, Num::Int(v)) => v.into_iter().max().map(Value::Int).unwrap_or(Value::Null),
            (AggFunc::Min, Num::Dec(v)) => v
                .into_iter()
                .min()
                .map(|d| Value::Float(d.to_f64().unwrap_or_default()))
                .unwrap_or(Value::Null),
            (AggFunc::Max, Num::Dec(v)) => v
                .into_iter()
                .max()
                .map(|d| Value::Float(d.to_f64().unwrap_or_default()))
                .unwrap_or(Value::Null),
            (AggFunc::Avg, Num::Int(v)) => {
                if v.is_empty() {
                    Value::Null
                } else {
                    let sum: Decimal = v.iter().map(|&i| Decimal::from(i)).sum();
                    let avg = sum / Decimal::from(v.len() as i64);
                    Value::Float(avg.to_f64().unwrap_or_default())
                }
            }
            (AggFunc::Avg, Num::Dec(v)) => {
                if v.is_empty() {
                    Value::Null
                } else {
                    let sum: Decimal = v.iter().sum();
                    let avg = sum / Decimal::from(v.len() as i64);
                    Value::Float(avg.to_f64().unwrap_or_default())
                }
            }
            (AggFunc::Count, _) => unreachable!(),
        })
    }

    /// Depth-first cross product with early pruning
    fn select_join(
        &mut self,
        cache: &mut PageCache,
        db_path: &Path,
        table_names: &[String],
        select: &Selector,
        conds: &[WhereCond],
    ) -> DbResult<QueryResult> {
        for cond in conds {
            let col = match cond {
                WhereCond::Cmp { col, .. } => col,
                WhereCond::IsNull { col, .. } => col,
            };
            if col.table.is_none() {
                return Err(DbError::Unsupported(
                    "join conditions must qualify the table name".into(),
                ));
            }
            if let WhereCond::Cmp {
                expr: Expr::Column(other),
                ..
            } = cond
            {
                if other.table.is_none() {
                    return Err(DbError::Unsupported(
                        "join conditions must qualify the table name".into(),
                    ));
                }
            }
        }

        for name in table_names {
            self.ensure_open(cache, db_path, name)?;
        }
        let tables: Vec<&Table> = table_names
            .iter()
            .map(|n| self.tables.get(n).unwrap())
            .collect();
        let tbl_id = |name: &str| -> DbResult<usize> {
            table_names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| DbError::NotFound(format!("table `{}` in condition", name)))
        };

        // Projection list as (table idx, col idx)
        let projected: Vec<(usize, usize)> = match select {
            Selector::All => {
                let mut out = Vec::new();
                for (i, t) in tables.iter().enumerate() {
                    for c in 0..t.cols().len() {
                        out.push((i, c));
                    }
                }
                out
            }
            Selector::Columns(refs) => {
                let mut out = Vec::new();
                for r in refs {
                    let tbl = r.table.as_deref().ok_or_else(|| {
                        DbError::Unsupported("join selector must qualify the table name".into())
                    })?;
                    let ti = tbl_id(tbl)?;
                    out.push((ti, tables[ti].col_id(&r.column)?));
                }
                out
            }
            Selector::Aggregate(_, _) => {
                return Err(DbError::Unsupported(
                    "aggregates take a single table".into(),
                ));
            }
        };
        let headers: Vec<String> = projected
            .iter()
            .map(|&(ti, ci)| format!("{}.{}", table_names[ti], tables[ti].cols()[ci].name))
            .collect();

        // Assign each condition to the first depth where it is fully bound
        let mut by_level: Vec<Vec<&WhereCond>> = vec![Vec::new(); tables.len()];
        for cond in conds {
            let level = match cond {
                WhereCond::IsNull { col, .. } => tbl_id(col.table.as_deref().unwrap())?,
                WhereCond::Cmp { col, expr, .. } => {
                    let a = tbl_id(col.table.as_deref().unwrap())?;
                    match expr {
                        Expr::Value(_) => a,
                        Expr::Column(other) => a.max(tbl_id(other.table.as_deref().unwrap())?),
                    }
                }
            };
            by_level[level].push(cond);
        }

        let mut rows = Vec::new();
        let mut rid_stack = vec![0u64; tables.len()];
        Self::dfs_join(
            cache,
            &tables,
            &tbl_id,
            &projected,
            &by_level,
            0,
            &mut rid_stack,
            &mut rows,
            usize::MAX,
        )?;
        Ok(QueryResult::ResultSet { headers, rows })
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_join(
        cache: &mut PageCache,
        tables: &[&Table],
        tbl_id: &dyn Fn(&str) -> DbResult<usize>,
        projected: &[(usize, usize)],
        by_level: &[Vec<&WhereCond>],
        level: usize,
        rid_stack: &mut Vec<u64>,
        rows: &mut Vec<Vec<Value>>,
        limit: usize,
    ) -> DbResult<()> {
        if level == tables.len() {
            let mut row = Vec::with_capacity(projected.len());
            for &(ti, ci) in projected {
                let full = tables[ti].get_full(cache, ci, rid_stack[ti])?;
                row.push(value::decode(&full, &tables[ti].cols()[ci].data_type));
            }
            rows.push(row);
            return Ok(());
        }

        let t = tables[level];
        for rid in t.all() {
            rid_stack[level] = rid;
            let mut pass = true;
            for cond in &by_level[level] {
                if !Self::eval_join_cond(cache, tables, tbl_id, rid_stack, cond)? {
                    pass = false;
                    break;
                }
            }
            if pass {
                Self::dfs_join(
                    cache, tables, tbl_id, projected, by_level, level + 1, rid_stack, rows, limit,
                )?;
                if rows.len() >= limit {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn eval_join_cond(
        cache: &mut PageCache,
        tables: &[&Table],
        tbl_id: &dyn Fn(&str) -> DbResult<usize>,
        rid_stack: &[u64],
        cond: &WhereCond,
    ) -> DbResult<bool> {
        match cond {
            WhereCond::IsNull { col, not } => {
                let ti = tbl_id(col.table.as_deref().unwrap())?;
                let ci = tables[ti].col_id(&col.column)?;
                let full = tables[ti].get_full(cache, ci, rid_stack[ti])?;
                let is_null = full[0] == DATA_NULL;
                Ok(is_null != *not)
            }
            WhereCond::Cmp { col, op, expr } => {
                let ti = tbl_id(col.table.as_deref().unwrap())?;
                let ci = tables[ti].col_id(&col.column)?;
                let a = tables[ti].get_full(cache, ci, rid_stack[ti])?;
                match expr {
                    Expr::Value(v) => {
                        value::cmp_with_value(&a, &tables[ti].cols()[ci].data_type, *op, v)
                    }
                    Expr::Column(other) => {
                        let tj = tbl_id(other.table.as_deref().unwrap())?;
                        let cj = tables[tj].col_id(&other.column)?;
                        let b = tables[tj].get_full(cache, cj, rid_stack[tj])?;
                        value::cmp_cross(
                            &a,
                            &tables[ti].cols()[ci].data_type,
                            *op,
                            &b,
                            &tables[tj].cols()[cj].data_type,
                        )
                    }
                }
            }
        }
    }

    // ========== Statement dispatch ==========

    /// Execute one parsed statement on behalf of a user session
    pub fn execute(&mut self, query: Query, user_id: u32) -> DbResult<QueryResult> {
        match query {
            Query::Sys(SysStatement::ShowDatabases) => {
                let dbs = self.show_databases()?;
                Ok(QueryResult::ResultSet {
                    headers: vec!["Database".to_string()],
                    rows: dbs.into_iter().map(|d| vec![Value::Str(d)]).collect(),
                })
            }
            Query::Db(stmt) => self.execute_db(stmt, user_id),
            Query::Table(stmt) => self.execute_table(stmt, user_id),
            Query::Index(stmt) => self.execute_index(stmt, user_id),
            Query::Alter(stmt) => self.execute_alter(stmt, user_id),
        }
    }

    /// Run a statement batch, stopping at the first failure
    ///
    /// The returned vector holds one outcome per executed statement; when a
    /// statement fails, its error is the last element and the rest of the
    /// batch is not attempted.
    pub fn run_batch(
        &mut self,
        queries: Vec<Query>,
        user_id: u32,
    ) -> Vec<DbResult<QueryResult>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let result = self.execute(query, user_id);
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    fn execute_db(&mut self, stmt: DBStatement, user_id: u32) -> DbResult<QueryResult> {
        match stmt {
            DBStatement::CreateDatabase(name) => {
                self.create_database(&name)?;
                Ok(QueryResult::Empty)
            }
            DBStatement::DropDatabase(name) => {
                self.drop_database(&name)?;
                Ok(QueryResult::Empty)
            }
            DBStatement::UseDatabase(name) => {
                self.use_database(user_id, &name)?;
                Ok(QueryResult::Empty)
            }
            DBStatement::ShowTables => {
                let tables = self.show_tables(user_id)?;
                Ok(QueryResult::ResultSet {
                    headers: vec!["Table".to_string()],
                    rows: tables.into_iter().map(|t| vec![Value::Str(t)]).collect(),
                })
            }
        }
    }

    fn execute_table(&mut self, stmt: TableStatement, user_id: u32) -> DbResult<QueryResult> {
        match stmt {
            TableStatement::CreateTable { name, fields } => {
                self.create_table(user_id, &name, fields)?;
                Ok(QueryResult::Empty)
            }
            TableStatement::DropTable(name) => {
                self.drop_table(user_id, &name)?;
                Ok(QueryResult::Empty)
            }
            TableStatement::DescTable(name) => self.desc_table(user_id, &name),
            TableStatement::Insert {
                table,
                columns,
                rows,
            } => {
                let n = self.insert(user_id, &table, columns, rows)?;
                Ok(QueryResult::RowsAffected(n))
            }
            TableStatement::Delete {
                table,
                where_clause,
            } => {
                let n = self.delete(user_id, &table, &where_clause)?;
                Ok(QueryResult::RowsAffected(n))
            }
            TableStatement::Update {
                table,
                set,
                where_clause,
            } => {
                let n = self.update(user_id, &table, &set, &where_clause)?;
                Ok(QueryResult::RowsAffected(n))
            }
            TableStatement::Select {
                select,
                tables,
                where_clause,
            } => self.select(user_id, &select, &tables, &where_clause),
        }
    }

    fn execute_index(&mut self, stmt: IndexStatement, user_id: u32) -> DbResult<QueryResult> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        match stmt {
            IndexStatement::CreateIndex {
                table,
                name,
                columns,
            } => {
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.create_index(&mut cache, &name, &columns, false, false);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            IndexStatement::DropIndex { table, name } => {
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.drop_index(&mut cache, &name);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
        }
    }

    fn execute_alter(&mut self, stmt: AlterStatement, user_id: u32) -> DbResult<QueryResult> {
        match stmt {
            AlterStatement::AddField { table, field } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.add_col(&mut cache, &field);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::DropColumn { table, column } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.drop_col(&mut cache, &column);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::ChangeColumn {
                table,
                column,
                new_def,
            } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.change_col(&mut cache, &column, &new_def);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::RenameTable { table, new_name } => {
                self.rename_table(user_id, &table, &new_name)?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::AddPrimaryKey {
                table,
                name,
                columns,
            } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.add_p_key(&mut cache, name, &columns);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::DropPrimaryKey { table, name } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                let mut t = self.take_table(&mut cache, &db_path, &table)?;
                let result = t.drop_p_key(&mut cache, name);
                self.tables.insert(table, t);
                result?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::AddForeignKey {
                table,
                name,
                columns,
                ref_table,
                ref_columns,
            } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                self.add_foreign_key_inner(
                    &mut cache,
                    &db_path,
                    &table,
                    name,
                    columns,
                    ref_table,
                    ref_columns,
                )?;
                Ok(QueryResult::Empty)
            }
            AlterStatement::DropForeignKey { table, name } => {
                let cache = Arc::clone(&self.cache);
                let mut cache = cache.lock().unwrap();
                let db_path = self.activate(&mut cache, user_id)?;
                self.drop_foreign_key_inner(&mut cache, &db_path, &table, &name)?;
                Ok(QueryResult::Empty)
            }
        }
    }

    /// Toggle an index between tree and sequential-scan mode (test hook for
    /// the equivalence property)
    pub fn set_index_mode(
        &mut self,
        user_id: u32,
        table: &str,
        index: &str,
        on: bool,
    ) -> DbResult<()> {
        let cache = Arc::clone(&self.cache);
        let mut cache = cache.lock().unwrap();
        let db_path = self.activate(&mut cache, user_id)?;
        let mut t = self.take_table(&mut cache, &db_path, table)?;
        let result = t.set_index_mode(&mut cache, index, on);
        self.tables.insert(table.to_string(), t);
        result
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        let cache = Arc::clone(&self.cache);
        let lock_result = cache.lock();
        if let Ok(mut cache) = lock_result {
            let _ = self.close_all(&mut cache);
        }
    }
}
