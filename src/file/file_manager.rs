use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{MAX_FILE_NUM, PAGE_SIZE, PAGE_SIZE_IDX, PageId};

/// Dense integer id naming an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

impl FileId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Manages paged file operations
///
/// File ids come from a fixed pool of `MAX_FILE_NUM` entries and are reused
/// after close, so an id stays dense for the lifetime of the process.
pub struct FileManager {
    /// Map from file ids to open files
    open_files: HashMap<FileId, FileEntry>,
    /// Map from file paths to ids (for checking if already open)
    path_to_id: HashMap<PathBuf, FileId>,
    /// Pool of free file ids, popped on open and pushed back on close
    free_ids: Vec<usize>,
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

impl FileManager {
    /// Create a new file manager
    pub fn new() -> Self {
        Self::with_max_files(MAX_FILE_NUM)
    }

    /// Create a new file manager with specified max open files
    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_id: HashMap::new(),
            free_ids: (0..max_open_files).rev().collect(),
        }
    }

    /// Create a new file; succeeds silently if the file already exists
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Ok(());
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file, or return the id it is already open under
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&id) = self.path_to_id.get(&path) {
            return Ok(id);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let id = FileId(self.free_ids.pop().ok_or(FileError::TooManyOpenFiles)?);

        self.open_files.insert(
            id,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_id.insert(path, id);

        Ok(id)
    }

    /// Close a file, releasing its id back to the pool
    ///
    /// Dirty pages must already have been written back through the page
    /// cache; closing here only drops the descriptor.
    pub fn close_file(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;
        entry.file.sync_data()?;

        self.path_to_id.remove(&entry.path);
        self.free_ids.push(id.0);
        Ok(())
    }

    /// Remove (delete) a file, closing it first if open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Ok(canonical_path) = path.canonicalize() {
            if let Some(&id) = self.path_to_id.get(&canonical_path) {
                self.close_file(id)?;
            }
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Look up the id a path is currently open under
    pub fn file_id_of<P: AsRef<Path>>(&self, path: P) -> Option<FileId> {
        let path = path.as_ref().canonicalize().ok()?;
        self.path_to_id.get(&path).copied()
    }

    /// Read a page from a file
    ///
    /// Reads past the end of the file yield zero-filled bytes.
    pub fn read_page(&mut self, id: FileId, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;

        let offset = (page_id as u64) << PAGE_SIZE_IDX;
        entry.file.seek(SeekFrom::Start(offset))?;

        let mut bytes_read = 0;
        while bytes_read < PAGE_SIZE {
            let n = entry.file.read(&mut buffer[bytes_read..])?;
            if n == 0 {
                break;
            }
            bytes_read += n;
        }
        buffer[bytes_read..].fill(0);

        Ok(())
    }

    /// Write a page to a file, extending it if necessary
    pub fn write_page(&mut self, id: FileId, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;

        let offset = (page_id as u64) << PAGE_SIZE_IDX;
        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;

        Ok(())
    }

    /// Size of the file in bytes
    pub fn file_size(&mut self, id: FileId) -> FileResult<u64> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;
        Ok(entry.file.metadata()?.len())
    }

    /// Sync a file to disk
    pub fn sync_file(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;

        entry.file.sync_data()?;
        Ok(())
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a file is open
    pub fn is_file_open(&self, id: FileId) -> bool {
        self.open_files.contains_key(&id)
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}
