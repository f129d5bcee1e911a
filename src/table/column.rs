//! Column metadata and the per-column fixed-slot data file

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{CmpOp, DataType, Value};
use crate::error::{DbError, DbResult};
use crate::file::{FileId, FileStream, PageCache};
use crate::storage::HeapFile;
use crate::table::value::{self, DATA_INVALID, DATA_NORMAL, DATA_NULL, MAX_CHAR_LEN, MAX_VARCHAR_LEN};

/// Column metadata: name, position, type, nullability, default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ordinal: usize,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Value,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        ordinal: usize,
        data_type: DataType,
        nullable: bool,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal,
            data_type,
            nullable,
            default,
        }
    }

    /// Fixed slot size of this column: tag byte + payload
    pub fn key_size(&self) -> usize {
        value::key_size(&self.data_type)
    }

    pub fn type_string(&self) -> String {
        value::type_string(&self.data_type)
    }

    /// Validate a declared type's own bounds
    pub fn check_type(data_type: &DataType) -> DbResult<()> {
        match data_type {
            DataType::Char(n) if *n == 0 || *n > MAX_CHAR_LEN => Err(DbError::Unsupported(
                format!("char length {} out of range", n),
            )),
            DataType::Varchar(n) if *n == 0 || *n > MAX_VARCHAR_LEN => Err(DbError::Unsupported(
                format!("varchar length {} out of range", n),
            )),
            DataType::Numeric(p, s) if !(*s <= *p && *p <= 20) => Err(DbError::Unsupported(
                format!("bad numeric({},{})", p, s),
            )),
            _ => Ok(()),
        }
    }

    /// Column integrity check: nullability, type compatibility, length/range
    pub fn check(&self, value: &Value) -> DbResult<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "null value given to not null column `{}`",
                    self.name
                )));
            }
            return Ok(());
        }
        value::encode(value, &self.data_type).map(|_| ())
    }
}

/// Per-column on-disk storage: one fixed-size slot per rid
///
/// VARCHAR slots hold an 8-byte offset into the column's `.v` heap; the raw
/// form is what the slot stores, the full form is what comparisons see.
pub struct ColumnData {
    path: PathBuf,
    file: FileId,
    data_type: DataType,
    size: usize,
    heap: Option<HeapFile>,
}

fn heap_path(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_owned();
    os.push(".v");
    PathBuf::from(os)
}

impl ColumnData {
    /// Create the column file (and heap for VARCHAR) under `data_dir`
    pub fn create(cache: &mut PageCache, data_dir: &Path, col: &Column) -> DbResult<Self> {
        let path = data_dir.join(&col.name);
        cache.file_manager_mut().create_file(&path)?;
        let file = cache.file_manager_mut().open_file(&path)?;
        let heap = match col.data_type {
            DataType::Varchar(_) => Some(HeapFile::create(cache, heap_path(&path))?),
            _ => None,
        };
        Ok(Self {
            path,
            file,
            data_type: col.data_type.clone(),
            size: col.key_size(),
            heap,
        })
    }

    /// Open an existing column file
    pub fn open(cache: &mut PageCache, data_dir: &Path, col: &Column) -> DbResult<Self> {
        let path = data_dir.join(&col.name);
        let file = cache.file_manager_mut().open_file(&path)?;
        let heap = match col.data_type {
            DataType::Varchar(_) => Some(HeapFile::open(cache, heap_path(&path))?),
            _ => None,
        };
        Ok(Self {
            path,
            file,
            data_type: col.data_type.clone(),
            size: col.key_size(),
            heap,
        })
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn slot_size(&self) -> usize {
        self.size
    }

    /// Clone of the side heap handle, if this is a VARCHAR column
    pub fn heap(&self) -> Option<HeapFile> {
        self.heap.clone()
    }

    /// Close the backing files
    pub fn close(self, cache: &mut PageCache) -> DbResult<()> {
        cache.close_file(self.file)?;
        if let Some(heap) = self.heap {
            heap.close(cache)?;
        }
        Ok(())
    }

    /// Close and delete the backing files
    pub fn destroy(self, cache: &mut PageCache) -> DbResult<()> {
        let path = self.path.clone();
        let had_heap = self.heap.is_some();
        self.close(cache)?;
        cache.remove_file(&path)?;
        if had_heap {
            cache.remove_file(heap_path(&path))?;
        }
        Ok(())
    }

    /// Turn a full value into its raw slot form
    ///
    /// For VARCHAR this allocates heap space for the text and returns a slot
    /// holding the offset; for every other type the full form already is the
    /// slot form.
    pub fn store(&self, cache: &mut PageCache, full: &[u8]) -> DbResult<Vec<u8>> {
        match &self.heap {
            Some(heap) => {
                let mut raw = vec![full[0]; 1];
                raw.resize(self.size, 0);
                if full[0] == DATA_NORMAL {
                    let offset = heap.allocate_byte_arr(cache, &full[1..])?;
                    raw[1..9].copy_from_slice(&offset.to_le_bytes());
                }
                Ok(raw)
            }
            None => Ok(full.to_vec()),
        }
    }

    /// Turn a raw slot form back into the full value
    pub fn restore(&self, cache: &mut PageCache, raw: &[u8]) -> DbResult<Vec<u8>> {
        match &self.heap {
            Some(heap) if raw[0] == DATA_NORMAL => {
                let mut offset_buf = [0u8; 8];
                offset_buf.copy_from_slice(&raw[1..9]);
                let text = heap.read_byte_arr(cache, u64::from_le_bytes(offset_buf))?;
                let mut full = Vec::with_capacity(1 + text.len());
                full.push(DATA_NORMAL);
                full.extend_from_slice(&text);
                Ok(full)
            }
            Some(_) => Ok(vec![raw[0]]),
            None => Ok(raw.to_vec()),
        }
    }

    /// Read the raw slot of a rid
    pub fn read_raw(&self, cache: &mut PageCache, rid: u64) -> DbResult<Vec<u8>> {
        let mut raw = vec![0u8; self.size];
        FileStream::new(cache, self.file)
            .seek_pos(rid * self.size as u64)
            .read_bytes(&mut raw)?;
        Ok(raw)
    }

    /// Read the full value of a rid
    pub fn read_full(&self, cache: &mut PageCache, rid: u64) -> DbResult<Vec<u8>> {
        let raw = self.read_raw(cache, rid)?;
        self.restore(cache, &raw)
    }

    /// Read the decoded value of a rid
    pub fn read_value(&self, cache: &mut PageCache, rid: u64) -> DbResult<Value> {
        Ok(value::decode(&self.read_full(cache, rid)?, &self.data_type))
    }

    fn write_raw(&self, cache: &mut PageCache, rid: u64, raw: &[u8]) -> DbResult<()> {
        FileStream::new(cache, self.file)
            .seek_pos(rid * self.size as u64)
            .write_bytes(raw)?;
        Ok(())
    }

    /// Store a full value into the slot of a rid
    pub fn insert_full(&self, cache: &mut PageCache, rid: u64, full: &[u8]) -> DbResult<()> {
        let raw = self.store(cache, full)?;
        self.write_raw(cache, rid, &raw)
    }

    /// Encode and store a literal into the slot of a rid
    pub fn insert_value(&self, cache: &mut PageCache, rid: u64, v: &Value) -> DbResult<()> {
        let full = value::encode(v, &self.data_type)?;
        self.insert_full(cache, rid, &full)
    }

    /// Release a rid's slot: free VARCHAR heap space, tag INVALID
    pub fn remove(&self, cache: &mut PageCache, rid: u64) -> DbResult<()> {
        if let Some(heap) = &self.heap {
            let raw = self.read_raw(cache, rid)?;
            if raw[0] == DATA_NORMAL {
                let mut offset_buf = [0u8; 8];
                offset_buf.copy_from_slice(&raw[1..9]);
                heap.free(cache, u64::from_le_bytes(offset_buf))?;
            }
        }
        FileStream::new(cache, self.file)
            .seek_pos(rid * self.size as u64)
            .write_u8(DATA_INVALID)?;
        Ok(())
    }

    /// Keep the rids whose slot null-state matches
    pub fn filt_null(
        &self,
        cache: &mut PageCache,
        rids: &[u64],
        not_null: bool,
    ) -> DbResult<Vec<u64>> {
        let mut out = Vec::new();
        for &rid in rids {
            let raw = self.read_raw(cache, rid)?;
            let is_null = raw[0] == DATA_NULL;
            if is_null != not_null {
                out.push(rid);
            }
        }
        Ok(out)
    }

    /// Keep the rids whose value satisfies `op literal`
    pub fn filt_value(
        &self,
        cache: &mut PageCache,
        rids: &[u64],
        op: CmpOp,
        literal: &Value,
    ) -> DbResult<Vec<u64>> {
        let mut out = Vec::new();
        if literal.is_null() {
            return Ok(out);
        }
        for &rid in rids {
            let full = self.read_full(cache, rid)?;
            if value::cmp_with_value(&full, &self.data_type, op, literal)? {
                out.push(rid);
            }
        }
        Ok(out)
    }

    /// Longest stored text among the given rids (string columns)
    pub fn max_len(&self, cache: &mut PageCache, rids: &[u64]) -> DbResult<usize> {
        let mut max = 0;
        for &rid in rids {
            let full = self.read_full(cache, rid)?;
            if full[0] != DATA_NORMAL {
                continue;
            }
            let text = &full[1..];
            let end = text
                .iter()
                .rposition(|&b| b != 0)
                .map(|i| i + 1)
                .unwrap_or(0);
            max = max.max(end);
        }
        Ok(max)
    }

    /// DDL type change, restricted to the CHAR/VARCHAR family
    ///
    /// Shrinking targets must still fit every stored value; CHAR→VARCHAR
    /// re-stores every live row through a freshly created heap.
    pub fn change(&mut self, cache: &mut PageCache, new_type: &DataType, rids: &[u64]) -> DbResult<()> {
        let old_string = matches!(self.data_type, DataType::Char(_) | DataType::Varchar(_));
        let new_string = matches!(new_type, DataType::Char(_) | DataType::Varchar(_));
        if !old_string || !new_string {
            return Err(DbError::Unsupported(
                "only char/varchar columns can change type".to_string(),
            ));
        }
        Column::check_type(new_type)?;

        let new_limit = match new_type {
            DataType::Char(n) | DataType::Varchar(n) => *n,
            _ => unreachable!(),
        };
        let shrinking = match (&self.data_type, new_type) {
            (DataType::Char(old), _) => new_limit < *old,
            (DataType::Varchar(old), _) => new_limit < *old,
            _ => unreachable!(),
        };
        if shrinking && self.max_len(cache, rids)? > new_limit {
            return Err(DbError::ConstraintViolation(format!(
                "stored value longer than {}",
                new_limit
            )));
        }

        match (self.data_type.clone(), new_type) {
            (DataType::Varchar(_), DataType::Varchar(_)) => {
                // Only the length limit changes; offsets stay valid
                self.data_type = new_type.clone();
            }
            (old, new) => {
                // Slot width changes: lift every live value out first, then
                // rewrite under the new layout
                let fulls: Vec<(u64, Vec<u8>)> = rids
                    .iter()
                    .map(|&rid| Ok((rid, self.read_full(cache, rid)?)))
                    .collect::<DbResult<_>>()?;

                if matches!(old, DataType::Varchar(_)) {
                    if let Some(heap) = self.heap.take() {
                        heap.close(cache)?;
                    }
                }
                if matches!(new, DataType::Varchar(_)) && self.heap.is_none() {
                    self.heap = Some(HeapFile::create(cache, heap_path(&self.path))?);
                }
                self.data_type = new.clone();
                self.size = value::key_size(new);

                for (rid, full) in fulls {
                    let v = match full[0] {
                        DATA_NORMAL => {
                            let end = full[1..]
                                .iter()
                                .rposition(|&b| b != 0)
                                .map(|i| i + 1)
                                .unwrap_or(0);
                            Value::Str(String::from_utf8_lossy(&full[1..1 + end]).into_owned())
                        }
                        _ => Value::Null,
                    };
                    self.insert_value(cache, rid, &v)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PageCache) {
        let temp = tempfile::tempdir().unwrap();
        (temp, PageCache::new(FileManager::new()))
    }

    fn int_col() -> Column {
        Column::new("a", 0, DataType::Int, true, Value::Null)
    }

    #[test]
    fn test_check_not_null() {
        let col = Column::new("a", 0, DataType::Int, false, Value::Null);
        assert!(matches!(
            col.check(&Value::Null),
            Err(DbError::ConstraintViolation(_))
        ));
        assert!(col.check(&Value::Int(1)).is_ok());
    }

    #[test]
    fn test_check_type_compat() {
        let col = int_col();
        assert!(col.check(&Value::Int(5)).is_ok());
        assert!(matches!(
            col.check(&Value::Str("x".into())),
            Err(DbError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_insert_read_remove() {
        let (temp, mut cache) = setup();
        let col = int_col();
        let data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();

        data.insert_value(&mut cache, 0, &Value::Int(10)).unwrap();
        data.insert_value(&mut cache, 1, &Value::Null).unwrap();
        data.insert_value(&mut cache, 2, &Value::Int(-3)).unwrap();

        assert_eq!(data.read_value(&mut cache, 0).unwrap(), Value::Int(10));
        assert_eq!(data.read_value(&mut cache, 1).unwrap(), Value::Null);

        data.remove(&mut cache, 0).unwrap();
        let raw = data.read_raw(&mut cache, 0).unwrap();
        assert_eq!(raw[0], DATA_INVALID);
    }

    #[test]
    fn test_varchar_heap_round_trip_and_free() {
        let (temp, mut cache) = setup();
        let col = Column::new("s", 0, DataType::Varchar(32), true, Value::Null);
        let data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();

        data.insert_value(&mut cache, 0, &Value::Str("hello heap".into()))
            .unwrap();
        assert_eq!(
            data.read_value(&mut cache, 0).unwrap(),
            Value::Str("hello heap".into())
        );

        // The slot itself holds only tag + offset
        assert_eq!(data.slot_size(), 9);

        // Removing frees the span: the next same-class allocation reuses it
        let raw_before = data.read_raw(&mut cache, 0).unwrap();
        data.remove(&mut cache, 0).unwrap();
        data.insert_value(&mut cache, 1, &Value::Str("hello again".into()))
            .unwrap();
        let raw_after = data.read_raw(&mut cache, 1).unwrap();
        assert_eq!(raw_before[1..9], raw_after[1..9]);
    }

    #[test]
    fn test_filters() {
        let (temp, mut cache) = setup();
        let col = int_col();
        let data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();

        data.insert_value(&mut cache, 0, &Value::Int(1)).unwrap();
        data.insert_value(&mut cache, 1, &Value::Null).unwrap();
        data.insert_value(&mut cache, 2, &Value::Int(7)).unwrap();
        let rids = vec![0, 1, 2];

        assert_eq!(data.filt_null(&mut cache, &rids, false).unwrap(), vec![1]);
        assert_eq!(
            data.filt_null(&mut cache, &rids, true).unwrap(),
            vec![0, 2]
        );
        assert_eq!(
            data.filt_value(&mut cache, &rids, CmpOp::Gt, &Value::Int(3))
                .unwrap(),
            vec![2]
        );
        // null literal matches nothing
        assert!(data
            .filt_value(&mut cache, &rids, CmpOp::Eq, &Value::Null)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_change_varchar_shrink_checks_max_len() {
        let (temp, mut cache) = setup();
        let col = Column::new("s", 0, DataType::Varchar(8), true, Value::Null);
        let mut data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();

        data.insert_value(&mut cache, 0, &Value::Str("1234567".into()))
            .unwrap();
        data.insert_value(&mut cache, 1, &Value::Str("abc".into()))
            .unwrap();

        let result = data.change(&mut cache, &DataType::Varchar(4), &[0, 1]);
        assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
        // Unchanged on refusal
        assert_eq!(
            data.read_value(&mut cache, 0).unwrap(),
            Value::Str("1234567".into())
        );

        data.change(&mut cache, &DataType::Varchar(7), &[0, 1]).unwrap();
        assert_eq!(
            data.read_value(&mut cache, 0).unwrap(),
            Value::Str("1234567".into())
        );
    }

    #[test]
    fn test_change_char_to_varchar() {
        let (temp, mut cache) = setup();
        let col = Column::new("s", 0, DataType::Char(6), true, Value::Null);
        let mut data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();

        data.insert_value(&mut cache, 0, &Value::Str("abc".into()))
            .unwrap();
        data.insert_value(&mut cache, 1, &Value::Null).unwrap();

        data.change(&mut cache, &DataType::Varchar(10), &[0, 1]).unwrap();
        assert_eq!(data.slot_size(), 9);
        assert_eq!(
            data.read_value(&mut cache, 0).unwrap(),
            Value::Str("abc".into())
        );
        assert_eq!(data.read_value(&mut cache, 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_change_rejects_non_string() {
        let (temp, mut cache) = setup();
        let col = int_col();
        let mut data = ColumnData::create(&mut cache, temp.path(), &col).unwrap();
        let result = data.change(&mut cache, &DataType::Varchar(4), &[]);
        assert!(matches!(result, Err(DbError::Unsupported(_))));
    }
}
