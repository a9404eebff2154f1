//! Storage manager: sketch id -> open data file
//!
//! Data files are opened lazily and kept open in a bounded LRU table so the
//! number of file handles is capped. A handle pushed out of the table is
//! closed with a flush; only [`StorageManager::delete_data`] drops cached
//! pages without writing them.
//!
//! The table's mutex serializes every access to a given [`CachedFile`], which
//! is itself not thread-safe.

use crate::file::CachedFile;
use crate::info::InfoStore;
use bytes::Bytes;
use parking_lot::Mutex;
use sketchio_common::{Error, Result, SketchId, SketchInfo, StorageConfig};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Bounded table of open data files
struct OpenFiles {
    files: HashMap<SketchId, CachedFile>,
    /// Least recently used at the front
    recency: VecDeque<SketchId>,
    max_open: usize,
}

impl OpenFiles {
    fn new(max_open: usize) -> Self {
        Self {
            files: HashMap::new(),
            recency: VecDeque::new(),
            max_open,
        }
    }

    fn touch(&mut self, id: &SketchId) {
        if self.recency.back() != Some(id) {
            self.recency.retain(|k| k != id);
            self.recency.push_back(id.clone());
        }
    }

    /// Insert a file; returns the handle pushed out by the bound, if any
    fn insert(&mut self, id: SketchId, file: CachedFile) -> Option<(SketchId, CachedFile)> {
        self.touch(&id);
        self.files.insert(id, file);

        if self.max_open == 0 || self.files.len() <= self.max_open {
            return None;
        }
        let victim = self.recency.pop_front()?;
        self.files.remove(&victim).map(|file| (victim, file))
    }

    fn remove(&mut self, id: &SketchId) -> Option<CachedFile> {
        self.recency.retain(|k| k != id);
        self.files.remove(id)
    }
}

/// Maps sketch ids to their data files and metadata records
pub struct StorageManager {
    data_dir: PathBuf,
    file_cache_entries: usize,
    files: Mutex<OpenFiles>,
    info: InfoStore,
}

impl StorageManager {
    /// Create a manager, creating the data and info directories if needed
    pub fn new(config: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).map_err(|source| Error::OpenFailure {
            path: config.data_dir.clone(),
            source,
        })?;
        let info = InfoStore::open(&config.info_dir)?;

        info!(
            data_dir = %config.data_dir.display(),
            info_dir = %config.info_dir.display(),
            file_cache_entries = config.file_cache_entries,
            max_open_files = config.max_open_files,
            "storage manager ready"
        );

        Ok(Self {
            data_dir: config.data_dir.clone(),
            file_cache_entries: config.file_cache_entries,
            files: Mutex::new(OpenFiles::new(config.max_open_files)),
            info,
        })
    }

    /// Directory holding the data files
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the data file backing `id`
    pub fn data_path(&self, id: &SketchId) -> PathBuf {
        self.data_dir.join(id.as_str())
    }

    /// Number of data files currently open
    pub fn open_files(&self) -> usize {
        self.files.lock().files.len()
    }

    /// Check if the data file of `id` is open
    pub fn is_open(&self, id: &SketchId) -> bool {
        self.files.lock().files.contains_key(id)
    }

    /// Run `op` against the open file of `id`, opening it on demand
    fn with_file<T>(
        &self,
        id: &SketchId,
        op: impl FnOnce(&mut CachedFile) -> Result<T>,
    ) -> Result<T> {
        let mut files = self.files.lock();

        if files.files.contains_key(id) {
            files.touch(id);
        } else {
            let file = CachedFile::open(self.data_path(id), self.file_cache_entries)?;
            debug!(sketch_id = %id, "opened data file");
            if let Some((evicted_id, evicted)) = files.insert(id.clone(), file) {
                debug!(sketch_id = %evicted_id, "closing least recently used data file");
                if let Err(e) = evicted.close() {
                    error!(sketch_id = %evicted_id, "failed to flush evicted data file: {}", e);
                }
            }
        }

        let file = files
            .files
            .get_mut(id)
            .ok_or_else(|| Error::internal(format!("data file for {id} vanished")))?;
        op(file)
    }

    /// Open (or create) the data file of `id` and register it
    pub fn create(&self, id: &SketchId) -> Result<()> {
        self.with_file(id, |_| Ok(()))?;
        info!(sketch_id = %id, "created data file");
        Ok(())
    }

    /// Buffer `data` at `offset` in the data file of `id`
    pub fn save_data(&self, id: &SketchId, data: impl Into<Bytes>, offset: u64) -> Result<()> {
        let data = data.into();
        self.with_file(id, |file| file.write(data, offset))
    }

    /// Read `length` bytes at `offset`; a length of 0 reads to the end of
    /// the OS file
    pub fn load_data(&self, id: &SketchId, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.with_file(id, |file| {
            let length = if length == 0 {
                file.size()?.saturating_sub(offset)
            } else {
                length
            };
            let length = usize::try_from(length)
                .map_err(|_| Error::invalid_argument(format!("read length {length} too large")))?;

            let mut data = vec![0u8; length];
            file.read(&mut data, offset)?;
            Ok(data)
        })
    }

    /// Write all dirty pages of `id` to its data file
    pub fn flush_data(&self, id: &SketchId) -> Result<()> {
        let written = self.with_file(id, CachedFile::flush)?;
        debug!(sketch_id = %id, pages = written, "flushed data file");
        Ok(())
    }

    /// Flush `id` and sync its data file to the device
    pub fn sync_data(&self, id: &SketchId) -> Result<()> {
        self.with_file(id, CachedFile::sync)
    }

    /// Drop the data of `id`: cached pages are discarded unwritten and the
    /// backing file is removed
    pub fn delete_data(&self, id: &SketchId) -> Result<()> {
        if let Some(file) = self.files.lock().remove(id) {
            file.purge();
        }

        match fs::remove_file(self.data_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(sketch_id = %id, "deleted data file");
        Ok(())
    }

    /// Flush every open data file
    ///
    /// All files are attempted; the first failure is returned.
    pub fn flush_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        let mut first_err = None;
        for (id, file) in &mut files.files {
            if let Err(e) = file.flush() {
                error!(sketch_id = %id, "failed to flush data file: {}", e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Write (or replace) the metadata record of a sketch
    pub fn save_info(&self, info: &SketchInfo) -> Result<()> {
        self.info.save(info)
    }

    /// Read the metadata record of `id`
    pub fn load_info(&self, id: &SketchId) -> Result<SketchInfo> {
        self.info.load(id)
    }

    /// Remove the metadata record of `id`
    pub fn delete_info(&self, id: &SketchId) -> Result<()> {
        self.info.delete(id)
    }

    /// All metadata records, sorted by id
    pub fn list_infos(&self) -> Result<Vec<SketchInfo>> {
        self.info.list()
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("data_dir", &self.data_dir)
            .field("info_dir", &self.info.dir())
            .field("open_files", &self.open_files())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchio_common::SketchKind;
    use tempfile::{TempDir, tempdir};

    fn manager(max_open_files: usize, file_cache_entries: usize) -> (TempDir, StorageManager) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            max_open_files,
            file_cache_entries,
            ..StorageConfig::rooted_at(dir.path())
        };
        let manager = StorageManager::new(&config).unwrap();
        (dir, manager)
    }

    fn id(name: &str) -> SketchId {
        SketchId::new(name).unwrap()
    }

    #[test]
    fn test_create_save_load() {
        let (_dir, storage) = manager(8, 100);
        let sketch = id("x-force");

        storage.create(&sketch).unwrap();
        assert!(storage.data_path(&sketch).exists());

        storage.save_data(&sketch, b"wolverine".to_vec(), 0).unwrap();
        let data = storage.load_data(&sketch, 0, 9).unwrap();
        assert_eq!(data, b"wolverine");
    }

    #[test]
    fn test_load_zero_length_reads_flushed_file() {
        let (_dir, storage) = manager(8, 100);
        let sketch = id("s");

        storage.save_data(&sketch, b"abcdef".to_vec(), 0).unwrap();
        // Unflushed bytes are not part of the OS file size
        assert!(storage.load_data(&sketch, 0, 0).unwrap().is_empty());

        storage.flush_data(&sketch).unwrap();
        assert_eq!(storage.load_data(&sketch, 0, 0).unwrap(), b"abcdef");
        assert_eq!(storage.load_data(&sketch, 2, 0).unwrap(), b"cdef");
    }

    #[test]
    fn test_file_opened_once() {
        let (_dir, storage) = manager(8, 100);
        let sketch = id("s");
        storage.create(&sketch).unwrap();
        storage.save_data(&sketch, b"a".to_vec(), 0).unwrap();
        storage.save_data(&sketch, b"b".to_vec(), 1).unwrap();
        assert_eq!(storage.open_files(), 1);

        // The dirty pages live in the one open handle
        assert_eq!(storage.load_data(&sketch, 1, 1).unwrap(), b"b");
    }

    #[test]
    fn test_registry_eviction_flushes() {
        let (_dir, storage) = manager(2, 100);
        let (a, b, c) = (id("a"), id("b"), id("c"));

        storage.save_data(&a, b"alpha".to_vec(), 0).unwrap();
        storage.save_data(&b, b"beta".to_vec(), 0).unwrap();
        storage.save_data(&c, b"gamma".to_vec(), 0).unwrap();

        assert_eq!(storage.open_files(), 2);
        assert!(!storage.is_open(&a));
        assert_eq!(fs::read(storage.data_path(&a)).unwrap(), b"alpha");

        // Reopened on demand from the flushed file
        assert_eq!(storage.load_data(&a, 0, 0).unwrap(), b"alpha");
    }

    #[test]
    fn test_registry_lru_order() {
        let (_dir, storage) = manager(2, 100);
        let (a, b, c) = (id("a"), id("b"), id("c"));

        storage.create(&a).unwrap();
        storage.create(&b).unwrap();
        storage.flush_data(&a).unwrap();
        storage.create(&c).unwrap();

        assert!(storage.is_open(&a));
        assert!(!storage.is_open(&b));
        assert!(storage.is_open(&c));
    }

    #[test]
    fn test_delete_discards_and_removes() {
        let (_dir, storage) = manager(8, 100);
        let sketch = id("doomed");
        storage.save_data(&sketch, b"bytes".to_vec(), 0).unwrap();

        storage.delete_data(&sketch).unwrap();
        assert!(!storage.is_open(&sketch));
        assert!(!storage.data_path(&sketch).exists());

        // Deleting an unknown sketch is fine
        storage.delete_data(&id("never")).unwrap();
    }

    #[test]
    fn test_flush_all() {
        let (_dir, storage) = manager(8, 100);
        let (a, b) = (id("a"), id("b"));
        storage.save_data(&a, b"1".to_vec(), 0).unwrap();
        storage.save_data(&b, b"2".to_vec(), 0).unwrap();

        storage.flush_all().unwrap();
        assert_eq!(fs::read(storage.data_path(&a)).unwrap(), b"1");
        assert_eq!(fs::read(storage.data_path(&b)).unwrap(), b"2");
    }

    #[test]
    fn test_info_roundtrip_through_manager() {
        let (_dir, storage) = manager(8, 100);
        let info = SketchInfo::new(id("s"), SketchKind::Dict).with_property("capacity", 10.0);

        storage.save_info(&info).unwrap();
        assert_eq!(storage.load_info(&info.id).unwrap(), info);
        assert_eq!(storage.list_infos().unwrap().len(), 1);

        storage.delete_info(&info.id).unwrap();
        assert!(storage.list_infos().unwrap().is_empty());
    }
}
