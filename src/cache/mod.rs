//! Artifact cache
//!
//! One file per fingerprint, `<cache_dir>/<fingerprint>.js`. The file's
//! modification time is the authoritative "compiled at" timestamp; there is
//! no index or manifest. Writers replace the whole file through a uniquely
//! named temporary file and a rename, so concurrent builds of the same
//! fingerprint never expose a partial artifact.

mod fingerprint;

pub use fingerprint::fingerprint;

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::request::BuildRequest;

/// Extension of cached artifacts
pub const CACHE_FILE_EXTENSION: &str = "js";

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory {} is not writable: {source}", dir.display())]
    Unwritable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read cache file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Location of the cached artifact for one fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    fingerprint: String,
    path: PathBuf,
}

impl CacheEntry {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Validators for a cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Modification time of the cache file
    pub modified: SystemTime,
    /// SHA-256 hex of the cached bytes
    pub etag: String,
}

/// Filesystem-backed artifact cache
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) a cache directory and check it is writable.
    pub fn open(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        let unwritable = |source| CacheError::Unwritable {
            dir: dir.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(unwritable)?;

        let probe = dir.join(format!(".probe-{}.tmp", Uuid::new_v4()));
        fs::write(&probe, b"").map_err(unwritable)?;
        if let Err(e) = fs::remove_file(&probe) {
            warn!("failed to remove cache probe {}: {}", probe.display(), e);
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache entry for a request
    pub fn entry_for(&self, req: &BuildRequest) -> CacheEntry {
        let fingerprint = fingerprint(req);
        let path = self
            .dir
            .join(format!("{}.{}", fingerprint, CACHE_FILE_EXTENSION));
        CacheEntry { fingerprint, path }
    }

    /// Decide from modification times whether `entry` must be rebuilt.
    ///
    /// True when the cache file is missing, or when any source (or the
    /// calling script) is strictly newer than it. A source whose metadata
    /// cannot be read counts as newer.
    pub fn needs_recompile(
        &self,
        entry: &CacheEntry,
        req: &BuildRequest,
        caller_script: Option<&Path>,
    ) -> bool {
        let Some(cache_mtime) = modified(&entry.path) else {
            debug!("no cache file at {}", entry.path.display());
            return true;
        };

        let inputs = req.sources().iter().map(PathBuf::as_path).chain(caller_script);
        for input in inputs {
            match modified(input) {
                Some(mtime) if mtime <= cache_mtime => {}
                Some(_) => {
                    debug!("{} is newer than {}", input.display(), entry.path.display());
                    return true;
                }
                None => {
                    warn!("cannot stat {}; forcing recompile", input.display());
                    return true;
                }
            }
        }

        false
    }

    /// Replace the cached artifact (write-then-rename)
    pub fn write(&self, entry: &CacheEntry, bytes: &[u8]) -> CacheResult<()> {
        let temp_path = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let write_err = |source| CacheError::Write {
            path: entry.path.clone(),
            source,
        };

        fs::write(&temp_path, bytes).map_err(write_err)?;
        if let Err(e) = fs::rename(&temp_path, &entry.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_err(e));
        }

        debug!("cached {} bytes at {}", bytes.len(), entry.path.display());
        Ok(())
    }

    /// Artifact bytes with their modification time and content hash.
    ///
    /// Everything comes from one open handle; a concurrent rename over the
    /// entry cannot pair the body with another version's ETag.
    pub fn read_with_metadata(&self, entry: &CacheEntry) -> CacheResult<(Vec<u8>, CacheMetadata)> {
        let read_err = |source| CacheError::Read {
            path: entry.path.clone(),
            source,
        };
        let mut file = File::open(&entry.path).map_err(read_err)?;
        let modified = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(read_err)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(read_err)?;

        let meta = CacheMetadata {
            modified,
            etag: content_hash(&bytes),
        };
        Ok((bytes, meta))
    }
}

/// A collision-resistant scratch path inside `dir`
pub fn scratch_path_in(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}-{}.{}", prefix, Uuid::new_v4().simple(), extension))
}

/// SHA-256 hex digest used as ETag
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    struct Fixture {
        _temp: TempDir,
        store: CacheStore,
        req: BuildRequest,
        sources: Vec<PathBuf>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("js");
        fs::create_dir(&src_dir).unwrap();
        let sources = vec![src_dir.join("a.js"), src_dir.join("b.js")];
        for (i, src) in sources.iter().enumerate() {
            fs::write(src, format!("{};", i + 1)).unwrap();
            set_mtime(src, at(1_700_000_000));
        }

        let store = CacheStore::open(temp.path().join("cache")).unwrap();
        let req = BuildRequest::builder()
            .add(&sources[0])
            .add(&sources[1])
            .cache_dir(store.dir())
            .build()
            .unwrap();

        Fixture {
            _temp: temp,
            store,
            req,
            sources,
        }
    }

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("cache");
        let store = CacheStore::open(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir);
        // Probe file is cleaned up
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_open_rejects_file_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        let result = CacheStore::open(&file);
        assert!(matches!(result, Err(CacheError::Unwritable { .. })));
    }

    #[test]
    fn test_entry_path_layout() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        assert_eq!(entry.fingerprint(), fingerprint(&f.req));
        assert_eq!(
            entry.path(),
            f.store.dir().join(format!("{}.js", entry.fingerprint()))
        );
    }

    #[test]
    fn test_needs_recompile_when_missing() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        assert!(!entry.exists());
        assert!(f.store.needs_recompile(&entry, &f.req, None));
    }

    #[test]
    fn test_fresh_when_sources_not_newer() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"1;2;").unwrap();
        set_mtime(entry.path(), at(1_700_000_000));

        assert!(!f.store.needs_recompile(&entry, &f.req, None));
    }

    #[test]
    fn test_stale_when_source_newer_by_one_second() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"1;2;").unwrap();
        set_mtime(entry.path(), at(1_700_000_000));
        set_mtime(&f.sources[1], at(1_700_000_001));

        assert!(f.store.needs_recompile(&entry, &f.req, None));
    }

    #[test]
    fn test_stale_when_caller_script_newer() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"1;2;").unwrap();
        set_mtime(entry.path(), at(1_700_000_100));

        let script = f.store.dir().join("../build.toml");
        fs::write(&script, "").unwrap();
        set_mtime(&script, at(1_700_000_050));
        assert!(!f.store.needs_recompile(&entry, &f.req, Some(&script)));

        set_mtime(&script, at(1_700_000_101));
        assert!(f.store.needs_recompile(&entry, &f.req, Some(&script)));
    }

    #[test]
    fn test_stale_when_source_missing() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"1;2;").unwrap();
        fs::remove_file(&f.sources[0]).unwrap();

        assert!(f.store.needs_recompile(&entry, &f.req, None));
    }

    #[test]
    fn test_write_read_replaces_whole_file() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"first version, longer").unwrap();
        f.store.write(&entry, b"second").unwrap();

        assert_eq!(f.store.read_with_metadata(&entry).unwrap().0, b"second");
        // Only the artifact remains; no temp files linger
        assert_eq!(fs::read_dir(f.store.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_missing_entry_errors() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        assert!(matches!(
            f.store.read_with_metadata(&entry),
            Err(CacheError::Read { .. })
        ));
    }

    #[test]
    fn test_read_with_metadata_etag_tracks_content() {
        let f = fixture();
        let entry = f.store.entry_for(&f.req);
        f.store.write(&entry, b"1;2;").unwrap();
        set_mtime(entry.path(), at(1_700_000_000));

        let (body, meta) = f.store.read_with_metadata(&entry).unwrap();
        assert_eq!(body, b"1;2;");
        assert_eq!(meta.modified, at(1_700_000_000));
        assert_eq!(meta.etag, content_hash(&body));

        f.store.write(&entry, b"3;").unwrap();
        let (body, newer) = f.store.read_with_metadata(&entry).unwrap();
        assert_eq!(body, b"3;");
        assert_eq!(newer.etag, content_hash(b"3;"));
        assert_ne!(newer.etag, meta.etag);
    }

    #[test]
    fn test_scratch_paths_unique() {
        let f = fixture();
        let a = scratch_path_in(f.store.dir(), "soy", "js");
        let b = scratch_path_in(f.store.dir(), "soy", "js");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(f.store.dir()));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("soy-") && name.ends_with(".js"));
    }
}
