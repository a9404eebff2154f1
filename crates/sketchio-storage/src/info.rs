//! Sketch metadata records
//!
//! One JSON document per sketch, kept in its own directory next to the data
//! files. Records are replaced atomically (temp file + rename) so a crash
//! never leaves a truncated record behind.

use sketchio_common::{Error, Result, SketchId, SketchInfo};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INFO_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// Directory of metadata records
#[derive(Debug, Clone)]
pub struct InfoStore {
    dir: PathBuf,
}

impl InfoStore {
    /// Open (creating if needed) the record directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| Error::OpenFailure {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &SketchId) -> PathBuf {
        self.dir.join(format!("{id}{INFO_SUFFIX}"))
    }

    /// Write (or replace) the record of `info.id`
    pub fn save(&self, info: &SketchInfo) -> Result<()> {
        let json = serde_json::to_vec_pretty(info).map_err(Error::serialization)?;
        let path = self.record_path(&info.id);
        let tmp = self.dir.join(format!(".{}{INFO_SUFFIX}{TMP_SUFFIX}", info.id));

        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &path)?;

        debug!(sketch_id = %info.id, bytes = json.len(), "saved sketch info");
        Ok(())
    }

    /// Read the record of `id`
    pub fn load(&self, id: &SketchId) -> Result<SketchInfo> {
        let raw = match fs::read(self.record_path(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(Error::deserialization)
    }

    /// Remove the record of `id`; a missing record is not an error
    pub fn delete(&self, id: &SketchId) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every record, sorted by id
    ///
    /// Unreadable or corrupt records are skipped with a warning so one bad
    /// file does not keep the rest offline.
    pub fn list(&self) -> Result<Vec<SketchInfo>> {
        let mut infos = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Ids may start with a dot, so only in-flight temp records are skipped
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let Some(stem) = name.strip_suffix(INFO_SUFFIX) else {
                continue;
            };
            let Ok(id) = SketchId::new(stem) else {
                warn!(file = name, "skipping record with invalid sketch id");
                continue;
            };
            match self.load(&id) {
                Ok(info) => infos.push(info),
                Err(e) => warn!(sketch_id = %id, "skipping unreadable sketch info: {}", e),
            }
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }
}
