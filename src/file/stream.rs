use super::error::FileResult;
use super::file_manager::FileId;
use super::page_cache::PageCache;
use super::{PAGE_SIZE, PAGE_SIZE_IDX};

/// Positioned byte-stream view over one file
///
/// Holds a current offset and reads/writes through the page cache, spanning
/// page boundaries transparently. Scalars are fixed-width little-endian;
/// sequences carry a u64 length prefix.
pub struct FileStream<'a> {
    cache: &'a mut PageCache,
    file: FileId,
    offset: u64,
}

impl<'a> FileStream<'a> {
    pub fn new(cache: &'a mut PageCache, file: FileId) -> Self {
        Self {
            cache,
            file,
            offset: 0,
        }
    }

    /// Absolute seek
    pub fn seek_pos(&mut self, pos: u64) -> &mut Self {
        self.offset = pos;
        self
    }

    /// Relative seek
    pub fn seek_off(&mut self, delta: u64) -> &mut Self {
        self.offset += delta;
        self
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read `dst.len()` bytes at the current offset, advancing it
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> FileResult<()> {
        let mut done = 0;
        while done < dst.len() {
            let pos = self.offset + done as u64;
            let page_id = (pos >> PAGE_SIZE_IDX) as usize;
            let in_page = (pos & (PAGE_SIZE as u64 - 1)) as usize;
            let n = (dst.len() - done).min(PAGE_SIZE - in_page);

            let page = self.cache.get_page(self.file, page_id)?;
            dst[done..done + n].copy_from_slice(&page[in_page..in_page + n]);
            done += n;
        }
        self.offset += dst.len() as u64;
        Ok(())
    }

    /// Write `src` at the current offset, advancing it
    pub fn write_bytes(&mut self, src: &[u8]) -> FileResult<()> {
        let mut done = 0;
        while done < src.len() {
            let pos = self.offset + done as u64;
            let page_id = (pos >> PAGE_SIZE_IDX) as usize;
            let in_page = (pos & (PAGE_SIZE as u64 - 1)) as usize;
            let n = (src.len() - done).min(PAGE_SIZE - in_page);

            let page = self.cache.get_page_mut(self.file, page_id)?;
            page[in_page..in_page + n].copy_from_slice(&src[done..done + n]);
            done += n;
        }
        self.offset += src.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> FileResult<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn write_u8(&mut self, v: u8) -> FileResult<()> {
        self.write_bytes(&[v])
    }

    pub fn read_u32(&mut self) -> FileResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&mut self, v: u32) -> FileResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn read_u64(&mut self) -> FileResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&mut self, v: u64) -> FileResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn read_i64(&mut self) -> FileResult<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn write_i64(&mut self, v: i64) -> FileResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Read a u64-length-prefixed byte sequence
    pub fn read_blob(&mut self) -> FileResult<Vec<u8>> {
        let len = self.read_u64()? as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Write a u64-length-prefixed byte sequence
    pub fn write_blob(&mut self, bytes: &[u8]) -> FileResult<()> {
        self.write_u64(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PageCache, FileId) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stream.db");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();
        (temp_dir, PageCache::new(fm), id)
    }

    #[test]
    fn test_scalar_round_trip() {
        let (_t, mut cache, id) = setup();

        {
            let mut s = FileStream::new(&mut cache, id);
            s.write_u8(7).unwrap();
            s.write_u32(0xDEAD_BEEF).unwrap();
            s.write_u64(1 << 40).unwrap();
            s.write_i64(-12345).unwrap();
        }

        let mut s = FileStream::new(&mut cache, id);
        assert_eq!(s.read_u8().unwrap(), 7);
        assert_eq!(s.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(s.read_u64().unwrap(), 1 << 40);
        assert_eq!(s.read_i64().unwrap(), -12345);
    }

    #[test]
    fn test_write_across_page_boundary() {
        let (_t, mut cache, id) = setup();

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let start = PAGE_SIZE as u64 - 100;

        let mut s = FileStream::new(&mut cache, id);
        s.seek_pos(start).write_bytes(&payload).unwrap();

        let mut out = vec![0u8; payload.len()];
        let mut s = FileStream::new(&mut cache, id);
        s.seek_pos(start).read_bytes(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_full_page_payload() {
        let (_t, mut cache, id) = setup();

        let payload = vec![0xABu8; PAGE_SIZE];
        let mut s = FileStream::new(&mut cache, id);
        s.seek_pos(17).write_bytes(&payload).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        let mut s = FileStream::new(&mut cache, id);
        s.seek_pos(17).read_bytes(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_blob_round_trip() {
        let (_t, mut cache, id) = setup();

        {
            let mut s = FileStream::new(&mut cache, id);
            s.write_blob(b"hello world").unwrap();
            s.write_blob(b"").unwrap();
        }

        let mut s = FileStream::new(&mut cache, id);
        assert_eq!(s.read_blob().unwrap(), b"hello world");
        assert_eq!(s.read_blob().unwrap(), b"");
    }

    #[test]
    fn test_seek_off() {
        let (_t, mut cache, id) = setup();

        let mut s = FileStream::new(&mut cache, id);
        s.seek_pos(10).seek_off(5);
        assert_eq!(s.position(), 15);
        s.write_u8(9).unwrap();
        assert_eq!(s.position(), 16);
    }
}
