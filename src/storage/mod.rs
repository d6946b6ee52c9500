// src/storage/mod.rs
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::utils::error::StorageError;

/// Opaque blob storage addressed by `/`-separated keys.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key`. Readers never observe a partially written blob.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn exists(&self, key: &str) -> Result<bool, StorageError>;
    /// All keys below `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Storage keys, partitioned by ticker.
pub mod keys {
    pub fn document(ticker: &str, doc_type: &str, content_hash: &str, ext: &str) -> String {
        format!("{}/documents/{}/{}.{}", ticker, doc_type, content_hash, ext)
    }

    pub fn documents_prefix(ticker: &str) -> String {
        format!("{}/documents", ticker)
    }

    pub fn record(ticker: &str, content_hash: &str) -> String {
        format!("{}/records/{}.json", ticker, content_hash)
    }

    pub fn extracted(ticker: &str, content_hash: &str) -> String {
        format!("{}/records/{}.extracted.json", ticker, content_hash)
    }

    pub fn url_index(ticker: &str, url_key: &str) -> String {
        format!("{}/index/{}.json", ticker, url_key)
    }

    pub fn ir_discovery(ticker: &str) -> String {
        format!("{}/ir_discovery.json", ticker)
    }

    pub fn extracted_reports(ticker: &str) -> String {
        format!("{}/extracted_reports.json", ticker)
    }

    pub fn selections(ticker: &str) -> String {
        format!("{}/selections.json", ticker)
    }

    pub fn run_report(stamp: &str) -> String {
        format!("run_reports/run_{}.json", stamp)
    }
}

pub fn write_json<T: Serialize + ?Sized>(store: &dyn BlobStore, key: &str, value: &T) -> Result<(), StorageError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| StorageError::SerializationError(e.to_string()))?;
    store.write(key, &body)
}

pub fn read_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<Option<T>, StorageError> {
    match store.read(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::SerializationError(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad_segment = key
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == ".." || seg.starts_with('.'));
    if key.is_empty() || key.contains('\\') || key.contains('\0') || bad_segment {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed store rooted at the output directory.
pub struct FsBlobStore {
    base_dir: PathBuf,
}

impl FsBlobStore {
    /// Creates the store, creating the base directory if it doesn't exist.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }
        Ok(Self { base_dir: base_path })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.base_dir.clone(), |path, seg| path.join(seg)))
    }

    fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-flight temp files are hidden
            if name.starts_with('.') {
                continue;
            }
            let key = format!("{}/{}", prefix, name);
            if entry.file_type()?.is_dir() {
                Self::collect_keys(&entry.path(), &key, out)?;
            } else {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.path_for(key)?;
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(
            ".{}.tmp-{}-{}",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(StorageError::IoError(e));
        }

        tracing::debug!("Stored {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        let mut keys = Vec::new();
        if dir.is_dir() {
            Self::collect_keys(&dir, prefix.trim_end_matches('/'), &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory store; writes under any of `failing_prefixes` fail with an I/O error.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        pub blobs: Mutex<BTreeMap<String, Vec<u8>>>,
        pub failing_prefixes: Vec<String>,
        pub writes: Mutex<Vec<String>>,
    }

    impl MemoryBlobStore {
        pub fn failing_under(prefix: &str) -> Self {
            Self {
                failing_prefixes: vec![prefix.to_string()],
                ..Default::default()
            }
        }

        pub fn writes_to(&self, key: &str) -> usize {
            self.writes.lock().unwrap().iter().filter(|k| k.as_str() == key).count()
        }
    }

    impl BlobStore for MemoryBlobStore {
        fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            validate_key(key)?;
            if self.failing_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
                return Err(StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.writes.lock().unwrap().push(key.to_string());
            self.blobs.lock().unwrap().insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.blobs.lock().unwrap().get(key).cloned())
        }

        fn exists(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.blobs.lock().unwrap().contains_key(key))
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            let dir = format!("{}/", prefix.trim_end_matches('/'));
            Ok(self.blobs.lock().unwrap().keys().filter(|k| k.starts_with(&dir)).cloned().collect())
        }
    }
}
