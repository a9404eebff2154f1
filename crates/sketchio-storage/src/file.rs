//! Random-access file with a private write-back page cache
//!
//! All reads and writes go through the file's [`PageCache`]. Writes only
//! touch the cache; the OS file is written when a page is evicted, on an
//! explicit [`CachedFile::flush`], or every `capacity` writes.

use crate::page_cache::{CacheStats, PageCache};
use bytes::Bytes;
use sketchio_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Permission bits for newly created data files
const FILE_MODE: u32 = 0o660;

/// A data file whose pages are cached in memory
#[derive(Debug)]
pub struct CachedFile {
    path: PathBuf,
    /// Shared with the cache's eviction callback
    file: Arc<File>,
    cache: PageCache,
    /// Page cache capacity; also the forced-flush write interval
    capacity: usize,
    writes: u64,
}

impl CachedFile {
    /// Open a file for random read/write, creating it if absent
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(FILE_MODE)
            .open(&path)
            .map_err(|source| Error::OpenFailure {
                path: path.clone(),
                source,
            })?;

        let file = Arc::new(file);
        let writer = Arc::clone(&file);
        // Clean pages are rewritten too; the bytes already match the medium.
        let cache = PageCache::with_evict(
            capacity,
            Box::new(move |offset, entry| writer.write_all_at(entry.bytes(), offset)),
        );

        debug!(path = %path.display(), capacity, "opened cached file");

        Ok(Self {
            path,
            file,
            cache,
            capacity,
            writes: 0,
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get page cache statistics
    pub const fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Number of cached pages not yet written to the OS file
    pub fn dirty_pages(&self) -> usize {
        self.cache.dirty_count()
    }

    /// Number of resident pages
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Fill `buf` with the bytes at `offset`
    ///
    /// A cached page at `offset` at least as long as `buf` serves the read
    /// from memory. Otherwise the OS file is read and the result cached as a
    /// clean page; a failed read caches nothing.
    pub fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        if let Some(entry) = self.cache.get(offset) {
            if entry.len() >= buf.len() {
                buf.copy_from_slice(&entry.bytes()[..buf.len()]);
                return Ok(());
            }
            // Short page: bring the medium up to date before reading through.
            if entry.is_dirty() {
                let bytes = entry.bytes().clone();
                self.file
                    .write_all_at(&bytes, offset)
                    .map_err(|source| Error::WriteBack { offset, source })?;
                self.cache.mark_clean(offset);
            }
        }

        self.file.read_exact_at(buf, offset)?;

        if !buf.is_empty() {
            self.cache.put(offset, Bytes::copy_from_slice(buf), false)?;
        }
        Ok(())
    }

    /// Buffer `data` at `offset` as a dirty page
    ///
    /// Every `capacity`-th write forces a full [`flush`](Self::flush). The
    /// returned error is a write-back failure of an evicted page or of the
    /// forced flush.
    pub fn write(&mut self, data: impl Into<Bytes>, offset: u64) -> Result<()> {
        self.writes += 1;
        let evicted = self.cache.put(offset, data.into(), true);

        if self.capacity != 0 && self.writes % self.capacity as u64 == 0 {
            debug!(path = %self.path.display(), writes = self.writes, "write interval reached, flushing");
            self.flush()?;
        }
        evicted
    }

    /// Write every dirty page to the OS file, oldest first
    ///
    /// Pages stay resident and become clean. Stops at the first failing
    /// write. Returns the number of pages written.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        for offset in self.cache.keys() {
            let Some(entry) = self.cache.peek(offset) else {
                continue;
            };
            if !entry.is_dirty() {
                continue;
            }
            self.file
                .write_all_at(entry.bytes(), offset)
                .map_err(|source| Error::WriteBack { offset, source })?;
            self.cache.mark_clean(offset);
            written += 1;
        }
        Ok(written)
    }

    /// Flush and then sync file data to the device
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Current length of the OS file
    ///
    /// Dirty pages that would extend the file are not counted.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Close the file, dropping all cached pages without writing them
    ///
    /// Only for files that are about to be deleted.
    pub fn purge(mut self) {
        let lost = self.cache.discard();
        if lost > 0 {
            debug!(path = %self.path.display(), lost, "purged dirty pages");
        }
    }

    /// Flush and close the file
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if self.cache.dirty_count() == 0 {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), "failed to flush on close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_back(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_capacity_one_overwrite_scenario() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x-force");

        let mut file = CachedFile::open(&path, 1).unwrap();
        file.write(&b"beast"[..], 4).unwrap();
        file.write(&b"storm"[..], 14).unwrap();
        file.write(&b"kiss"[..], 4).unwrap();
        file.flush().unwrap();

        let mut buf = [0u8; 4];
        file.read(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"kiss");

        let on_disk = read_back(&path);
        assert_eq!(on_disk.len(), 19);
        assert_eq!(&on_disk[4..8], b"kiss");
        assert_eq!(&on_disk[14..19], b"storm");

        drop(file);
        let mut reopened = CachedFile::open(&path, 1).unwrap();
        let mut buf = [0u8; 5];
        reopened.read(&mut buf, 14).unwrap();
        assert_eq!(&buf, b"storm");
    }

    #[test]
    fn test_read_after_write_served_from_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw");

        let mut file = CachedFile::open(&path, 100).unwrap();
        file.write(&b"hello world"[..], 0).unwrap();

        let mut buf = vec![0u8; 11];
        file.read(&mut buf, 0).unwrap();
        assert_eq!(buf, b"hello world");

        // Prefix reads are served from the same page
        let mut prefix = [0u8; 5];
        file.read(&mut prefix, 0).unwrap();
        assert_eq!(&prefix, b"hello");

        // Nothing reached the OS file yet
        assert_eq!(file.size().unwrap(), 0);
        assert_eq!(file.cache_stats().hits, 2);
    }

    #[test]
    fn test_flush_idempotent() {
        let dir = tempdir().unwrap();
        let mut file = CachedFile::open(dir.path().join("f"), 100).unwrap();
        file.write(&b"aa"[..], 0).unwrap();
        file.write(&b"bb"[..], 2).unwrap();
        file.write(&b"cc"[..], 4).unwrap();

        assert_eq!(file.flush().unwrap(), 3);
        assert_eq!(file.flush().unwrap(), 0);
        assert_eq!(file.cached_pages(), 3);
        assert_eq!(file.size().unwrap(), 6);
    }

    #[test]
    fn test_forced_flush_every_capacity_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut file = CachedFile::open(&path, 3).unwrap();

        file.write(&b"a"[..], 0).unwrap();
        file.write(&b"b"[..], 1).unwrap();
        assert_eq!(file.dirty_pages(), 2);

        file.write(&b"c"[..], 2).unwrap();
        assert_eq!(file.dirty_pages(), 0);
        assert_eq!(read_back(&path), b"abc");
    }

    #[test]
    fn test_read_miss_populates_clean_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut file = CachedFile::open(&path, 10).unwrap();
        let mut buf = [0u8; 4];
        file.read(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"3456");
        assert_eq!(file.cached_pages(), 1);
        assert_eq!(file.dirty_pages(), 0);

        file.read(&mut buf, 3).unwrap();
        assert_eq!(file.cache_stats().hits, 1);
    }

    #[test]
    fn test_failed_read_is_not_cached() {
        let dir = tempdir().unwrap();
        let mut file = CachedFile::open(dir.path().join("empty"), 10).unwrap();

        let mut buf = [0u8; 8];
        let err = file.read(&mut buf, 100).unwrap_err();
        assert!(err.is_io());
        assert_eq!(file.cached_pages(), 0);
    }

    #[test]
    fn test_short_cached_page_reads_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"xxxxxxxx").unwrap();

        let mut file = CachedFile::open(&path, 10).unwrap();
        file.write(&b"ab"[..], 0).unwrap();

        let mut buf = [0u8; 4];
        file.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abxx");
        assert_eq!(file.dirty_pages(), 0);
    }

    #[test]
    fn test_purge_discards_unflushed_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut file = CachedFile::open(&path, 10).unwrap();
        file.write(&b"lost"[..], 0).unwrap();

        file.purge();
        assert!(read_back(&path).is_empty());
    }

    #[test]
    fn test_close_and_drop_flush() {
        let dir = tempdir().unwrap();
        let closed = dir.path().join("closed");
        let dropped = dir.path().join("dropped");

        let mut file = CachedFile::open(&closed, 10).unwrap();
        file.write(&b"kept"[..], 0).unwrap();
        file.close().unwrap();
        assert_eq!(read_back(&closed), b"kept");

        let mut file = CachedFile::open(&dropped, 10).unwrap();
        file.write(&b"kept"[..], 2).unwrap();
        drop(file);
        assert_eq!(read_back(&dropped), b"\0\0kept");
    }

    #[test]
    fn test_open_failure() {
        let dir = tempdir().unwrap();
        let err = CachedFile::open(dir.path().join("missing/dir/f"), 10).unwrap_err();
        assert!(matches!(err, Error::OpenFailure { .. }));
        assert!(err.is_not_found());
    }
}
