use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;

use super::error::FileResult;
use super::file_manager::{FileId, FileManager};
use super::{CACHE_CAP, PAGE_SIZE, PageId};

/// A key identifying a page in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    file: FileId,
    page_id: PageId,
}

/// One buffer slot: the page bytes plus a dirty flag
struct Slot {
    data: Vec<u8>,
    dirty: bool,
}

/// Fixed-capacity page cache with LRU eviction
///
/// The cache is the only path to on-disk bytes: every component above reads
/// and writes pages through it. A page reference obtained from `get_page` /
/// `get_page_mut` must not be held across any other cache call; callers
/// re-resolve the slot before each access.
pub struct PageCache {
    /// Underlying file manager
    file_manager: FileManager,
    /// Combined buffer pool and LRU tracker
    slots: LruCache<PageKey, Slot>,
    /// Maximum number of resident pages
    capacity: usize,
    /// Reusable buffer for loading pages
    load_buffer: Vec<u8>,
}

impl PageCache {
    /// Create a new page cache over a file manager
    pub fn new(file_manager: FileManager) -> Self {
        Self::with_capacity(file_manager, CACHE_CAP)
    }

    /// Create a new page cache with specified capacity
    pub fn with_capacity(file_manager: FileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            slots: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            capacity,
            load_buffer: vec![0u8; PAGE_SIZE],
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut FileManager {
        &mut self.file_manager
    }

    /// Get a page, loading it from disk on miss
    pub fn get_page(&mut self, file: FileId, page_id: PageId) -> FileResult<&[u8]> {
        let key = PageKey { file, page_id };

        if self.slots.peek(&key).is_none() {
            self.load_page(file, page_id)?;
        }

        Ok(&self.slots.get(&key).unwrap().data)
    }

    /// Get a mutable reference to a page, marking it dirty
    pub fn get_page_mut(&mut self, file: FileId, page_id: PageId) -> FileResult<&mut [u8]> {
        let key = PageKey { file, page_id };

        if self.slots.peek(&key).is_none() {
            self.load_page(file, page_id)?;
        }

        let slot = self.slots.get_mut(&key).unwrap();
        slot.dirty = true;
        Ok(&mut slot.data)
    }

    /// Mark a resident page as dirty
    pub fn mark_dirty(&mut self, file: FileId, page_id: PageId) {
        let key = PageKey { file, page_id };
        if let Some(slot) = self.slots.peek_mut(&key) {
            slot.dirty = true;
        }
    }

    /// Flush every dirty page belonging to one file
    pub fn write_back_file(&mut self, file: FileId) -> FileResult<()> {
        let dirty: Vec<PageKey> = self
            .slots
            .iter()
            .filter(|(key, slot)| key.file == file && slot.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            if let Some(slot) = self.slots.peek_mut(&key) {
                self.file_manager.write_page(key.file, key.page_id, &slot.data)?;
                slot.dirty = false;
            }
        }

        Ok(())
    }

    /// Flush every dirty page in the cache and sync all files
    pub fn write_back_all(&mut self) -> FileResult<()> {
        let dirty: Vec<PageKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            if let Some(slot) = self.slots.peek_mut(&key) {
                self.file_manager.write_page(key.file, key.page_id, &slot.data)?;
                slot.dirty = false;
            }
        }

        self.file_manager.sync_all()?;

        Ok(())
    }

    /// Write back a file's dirty pages, drop its slots, and close it
    ///
    /// Slots must be dropped because file ids are reused: a page cached under
    /// this id would otherwise surface for whatever file opens under the id
    /// next.
    pub fn close_file(&mut self, file: FileId) -> FileResult<()> {
        self.write_back_file(file)?;
        self.drop_file_slots(file);
        self.file_manager.close_file(file)
    }

    /// Remove a file from disk, discarding its cached pages unwritten
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        if let Some(file) = self.file_manager.file_id_of(&path) {
            self.drop_file_slots(file);
        }
        self.file_manager.remove_file(path)
    }

    fn drop_file_slots(&mut self, file: FileId) {
        let keys: Vec<PageKey> = self
            .slots
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.slots.pop(&key);
        }
    }

    /// Load a page from disk into a slot, evicting if at capacity
    fn load_page(&mut self, file: FileId, page_id: PageId) -> FileResult<()> {
        let key = PageKey { file, page_id };

        while self.slots.len() >= self.capacity {
            self.evict_lru()?;
        }

        if self.load_buffer.len() != PAGE_SIZE {
            self.load_buffer = vec![0u8; PAGE_SIZE];
        }

        self.file_manager
            .read_page(file, page_id, &mut self.load_buffer)?;

        let data = std::mem::take(&mut self.load_buffer);
        self.slots.put(key, Slot { data, dirty: false });

        Ok(())
    }

    /// Evict the least recently used slot, writing it back if dirty
    fn evict_lru(&mut self) -> FileResult<()> {
        if let Some((key, slot)) = self.slots.pop_lru() {
            if slot.dirty {
                self.file_manager
                    .write_page(key.file, key.page_id, &slot.data)?;
            }
            // Recycle the evicted buffer for the next load
            self.load_buffer = slot.data;
        }

        Ok(())
    }

    /// Number of resident pages
    pub fn resident_count(&self) -> usize {
        self.slots.len()
    }

    /// Check if a page is resident
    pub fn is_resident(&self, file: FileId, page_id: PageId) -> bool {
        self.slots.contains(&PageKey { file, page_id })
    }

    /// Number of dirty resident pages
    pub fn dirty_count(&self) -> usize {
        self.slots.iter().filter(|(_, s)| s.dirty).count()
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        // Flush all dirty pages when the cache is dropped
        let _ = self.write_back_all();
    }
}
