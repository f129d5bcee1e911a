use std::path::{Path, PathBuf};

use crate::file::{FileId, FileResult, FileStream, PageCache};

/// Number of size classes: powers of two from 16 bytes up
const CLASS_COUNT: usize = 24;

/// Smallest span capacity
const MIN_CAP: u64 = 16;

/// Span header: `[cap: u64][len: u64]` ahead of the payload
const SPAN_HEADER: u64 = 16;

/// File header: bump pointer plus one free-list head per size class
const FILE_HEADER: u64 = 8 + 8 * CLASS_COUNT as u64;

/// Heap-style allocator inside a single file, used for VARCHAR payloads
///
/// Every piece of allocator state (bump pointer, free-list heads, span
/// headers, free-list links) lives in the file itself, so a `HeapFile` is
/// just a handle and clones of it stay coherent. Spans are size-segregated
/// by power-of-two capacity; `free` pushes a span onto its class list and
/// `allocate` pops from there before bumping.
#[derive(Clone)]
pub struct HeapFile {
    path: PathBuf,
    file: FileId,
}

impl HeapFile {
    /// Create the backing file (idempotent) and open a handle
    pub fn create<P: AsRef<Path>>(cache: &mut PageCache, path: P) -> FileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let fresh = !path.exists();
        cache.file_manager_mut().create_file(&path)?;
        let file = cache.file_manager_mut().open_file(&path)?;
        let heap = Self { path, file };
        if fresh {
            let mut stream = FileStream::new(cache, file);
            stream.write_u64(FILE_HEADER)?;
            for _ in 0..CLASS_COUNT {
                stream.write_u64(0)?;
            }
        }
        Ok(heap)
    }

    /// Open an existing heap file
    pub fn open<P: AsRef<Path>>(cache: &mut PageCache, path: P) -> FileResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = cache.file_manager_mut().open_file(&path)?;
        Ok(Self { path, file })
    }

    fn class_of(size: u64) -> usize {
        let cap = size.max(MIN_CAP).next_power_of_two();
        (cap.trailing_zeros() - MIN_CAP.trailing_zeros()) as usize
    }

    fn class_cap(class: usize) -> u64 {
        MIN_CAP << class
    }

    /// Allocate a span able to hold `size` bytes; returns its file offset
    pub fn allocate(&self, cache: &mut PageCache, size: u64) -> FileResult<u64> {
        let class = Self::class_of(size).min(CLASS_COUNT - 1);
        let cap = Self::class_cap(class);

        let head_pos = 8 + 8 * class as u64;
        let head = FileStream::new(cache, self.file)
            .seek_pos(head_pos)
            .read_u64()?;

        let offset = if head != 0 {
            // Pop the free list: the span body holds the next pointer
            let next = FileStream::new(cache, self.file)
                .seek_pos(head + SPAN_HEADER)
                .read_u64()?;
            FileStream::new(cache, self.file)
                .seek_pos(head_pos)
                .write_u64(next)?;
            head
        } else {
            let mut stream = FileStream::new(cache, self.file);
            let bump = stream.seek_pos(0).read_u64()?;
            stream.seek_pos(0).write_u64(bump + SPAN_HEADER + cap)?;
            bump
        };

        FileStream::new(cache, self.file)
            .seek_pos(offset)
            .write_u64(cap)?;
        Ok(offset)
    }

    /// Allocate a span, store `bytes` with a length header, return the offset
    pub fn allocate_byte_arr(&self, cache: &mut PageCache, bytes: &[u8]) -> FileResult<u64> {
        let offset = self.allocate(cache, bytes.len() as u64)?;
        let mut stream = FileStream::new(cache, self.file);
        stream.seek_pos(offset + 8).write_u64(bytes.len() as u64)?;
        stream.write_bytes(bytes)?;
        Ok(offset)
    }

    /// Read back the bytes stored at a span offset
    pub fn read_byte_arr(&self, cache: &mut PageCache, offset: u64) -> FileResult<Vec<u8>> {
        let mut stream = FileStream::new(cache, self.file);
        let len = stream.seek_pos(offset + 8).read_u64()? as usize;
        let mut buf = vec![0u8; len];
        stream.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Release a span for reuse
    pub fn free(&self, cache: &mut PageCache, offset: u64) -> FileResult<()> {
        let cap = FileStream::new(cache, self.file)
            .seek_pos(offset)
            .read_u64()?;
        let class = Self::class_of(cap).min(CLASS_COUNT - 1);
        let head_pos = 8 + 8 * class as u64;

        let head = FileStream::new(cache, self.file)
            .seek_pos(head_pos)
            .read_u64()?;
        FileStream::new(cache, self.file)
            .seek_pos(offset + SPAN_HEADER)
            .write_u64(head)?;
        FileStream::new(cache, self.file)
            .seek_pos(head_pos)
            .write_u64(offset)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Close the backing file
    pub fn close(self, cache: &mut PageCache) -> FileResult<()> {
        cache.close_file(self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PageCache, HeapFile) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut cache = PageCache::new(FileManager::new());
        let heap = HeapFile::create(&mut cache, temp_dir.path().join("heap.v")).unwrap();
        (temp_dir, cache, heap)
    }

    #[test]
    fn test_byte_arr_round_trip() {
        let (_t, mut cache, heap) = setup();

        let off1 = heap.allocate_byte_arr(&mut cache, b"hello").unwrap();
        let off2 = heap.allocate_byte_arr(&mut cache, b"a longer payload here").unwrap();

        assert_eq!(heap.read_byte_arr(&mut cache, off1).unwrap(), b"hello");
        assert_eq!(
            heap.read_byte_arr(&mut cache, off2).unwrap(),
            b"a longer payload here"
        );
    }

    #[test]
    fn test_offsets_are_nonzero_and_distinct() {
        let (_t, mut cache, heap) = setup();

        let off1 = heap.allocate_byte_arr(&mut cache, b"x").unwrap();
        let off2 = heap.allocate_byte_arr(&mut cache, b"y").unwrap();
        assert_ne!(off1, 0);
        assert_ne!(off1, off2);
    }

    #[test]
    fn test_free_then_reallocate_reuses_span() {
        let (_t, mut cache, heap) = setup();

        let off1 = heap.allocate_byte_arr(&mut cache, b"twelve bytes").unwrap();
        heap.free(&mut cache, off1).unwrap();

        // Same size class comes back from the free list
        let off2 = heap.allocate_byte_arr(&mut cache, b"other twelve").unwrap();
        assert_eq!(off1, off2);
        assert_eq!(heap.read_byte_arr(&mut cache, off2).unwrap(), b"other twelve");
    }

    #[test]
    fn test_size_classes_do_not_mix() {
        let (_t, mut cache, heap) = setup();

        let small = heap.allocate_byte_arr(&mut cache, b"s").unwrap();
        heap.free(&mut cache, small).unwrap();

        let big = heap
            .allocate_byte_arr(&mut cache, &vec![7u8; 200])
            .unwrap();
        assert_ne!(small, big);
    }

    #[test]
    fn test_clone_sees_same_state() {
        let (_t, mut cache, heap) = setup();

        let off = heap.allocate_byte_arr(&mut cache, b"shared").unwrap();
        let other = heap.clone();
        assert_eq!(other.read_byte_arr(&mut cache, off).unwrap(), b"shared");

        other.free(&mut cache, off).unwrap();
        let reused = heap.allocate_byte_arr(&mut cache, b"again!").unwrap();
        assert_eq!(reused, off);
    }
}
