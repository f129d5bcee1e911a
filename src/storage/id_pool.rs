use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::file::{FileId, FileResult, FileStream, PageCache};

/// Persistent allocator of dense integer ids with reuse after free
///
/// Backed by one file holding `[next][free_len][free ids...]`, rewritten on
/// every mutation. Freed ids are handed out again before fresh ones.
pub struct IdPool {
    path: PathBuf,
    file: FileId,
    next: u64,
    free: Vec<u64>,
}

impl IdPool {
    /// Create the backing file and an empty pool
    pub fn init<P: AsRef<Path>>(cache: &mut PageCache, path: P) -> FileResult<Self> {
        let path = path.as_ref().to_path_buf();
        cache.file_manager_mut().create_file(&path)?;
        let file = cache.file_manager_mut().open_file(&path)?;
        let mut pool = Self {
            path,
            file,
            next: 0,
            free: Vec::new(),
        };
        pool.save(cache)?;
        Ok(pool)
    }

    /// Read back an existing pool's state
    pub fn load<P: AsRef<Path>>(cache: &mut PageCache, path: P) -> FileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = cache.file_manager_mut().open_file(&path)?;
        let mut stream = FileStream::new(cache, file);
        let next = stream.read_u64()?;
        let free_len = stream.read_u64()? as usize;
        let mut free = Vec::with_capacity(free_len);
        for _ in 0..free_len {
            free.push(stream.read_u64()?);
        }
        Ok(Self {
            path,
            file,
            next,
            free,
        })
    }

    fn save(&mut self, cache: &mut PageCache) -> FileResult<()> {
        let mut stream = FileStream::new(cache, self.file);
        stream.write_u64(self.next)?;
        stream.write_u64(self.free.len() as u64)?;
        for &id in &self.free {
            stream.write_u64(id)?;
        }
        Ok(())
    }

    /// Allocate an id: reuse a freed one, otherwise advance the counter
    pub fn new_id(&mut self, cache: &mut PageCache) -> FileResult<u64> {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        };
        self.save(cache)?;
        Ok(id)
    }

    /// Release an id for reuse
    pub fn free_id(&mut self, cache: &mut PageCache, id: u64) -> FileResult<()> {
        self.free.push(id);
        self.save(cache)
    }

    /// All currently allocated ids, ascending
    pub fn all(&self) -> Vec<u64> {
        let freed: HashSet<u64> = self.free.iter().copied().collect();
        (0..self.next).filter(|id| !freed.contains(id)).collect()
    }

    /// Whether the id is currently allocated
    pub fn contains(&self, id: u64) -> bool {
        id < self.next && !self.free.contains(&id)
    }

    /// Number of currently allocated ids
    pub fn live_count(&self) -> u64 {
        self.next - self.free.len() as u64
    }

    /// Close the backing file
    pub fn close(self, cache: &mut PageCache) -> FileResult<()> {
        cache.close_file(self.file)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PageCache) {
        let temp_dir = tempfile::tempdir().unwrap();
        (temp_dir, PageCache::new(FileManager::new()))
    }

    #[test]
    fn test_fresh_ids_are_dense() {
        let (temp, mut cache) = setup();
        let mut pool = IdPool::init(&mut cache, temp.path().join("pool")).unwrap();

        for expect in 0..5 {
            assert_eq!(pool.new_id(&mut cache).unwrap(), expect);
        }
        assert_eq!(pool.all(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_free_then_reuse() {
        let (temp, mut cache) = setup();
        let mut pool = IdPool::init(&mut cache, temp.path().join("pool")).unwrap();

        for _ in 0..4 {
            pool.new_id(&mut cache).unwrap();
        }
        pool.free_id(&mut cache, 1).unwrap();
        pool.free_id(&mut cache, 2).unwrap();

        assert!(!pool.contains(1));
        assert!(pool.contains(3));
        assert_eq!(pool.all(), vec![0, 3]);

        // Freed ids come back before fresh ones
        assert_eq!(pool.new_id(&mut cache).unwrap(), 2);
        assert_eq!(pool.new_id(&mut cache).unwrap(), 1);
        assert_eq!(pool.new_id(&mut cache).unwrap(), 4);
    }

    #[test]
    fn test_persists_across_load() {
        let (temp, mut cache) = setup();
        let path = temp.path().join("pool");

        let mut pool = IdPool::init(&mut cache, &path).unwrap();
        for _ in 0..6 {
            pool.new_id(&mut cache).unwrap();
        }
        pool.free_id(&mut cache, 4).unwrap();
        pool.close(&mut cache).unwrap();

        let mut pool = IdPool::load(&mut cache, &path).unwrap();
        assert_eq!(pool.all(), vec![0, 1, 2, 3, 5]);
        assert_eq!(pool.new_id(&mut cache).unwrap(), 4);
        assert_eq!(pool.new_id(&mut cache).unwrap(), 6);
    }
}
