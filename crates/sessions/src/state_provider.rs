//! Concrete `StateProvider` implementations. `sa_domain::session` owns the
//! trait; this crate owns the storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;

use sa_domain::error::{Error, Result};
use sa_domain::session::{sanitize_key, StateProvider};

/// One JSON file per key under `base_dir`, named `<sanitized key>.json`.
/// Writes are whole-file rewrites via a temp file + rename so a crash
/// mid-write never leaves a half-written file behind; there is no
/// cross-process locking, consistent with the single-writer contract on
/// `StateProvider`.
pub struct FileStateProvider {
    base_dir: PathBuf,
}

impl FileStateProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(key)))
    }

    async fn ensure_base_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(Error::Io)
    }
}

#[async_trait::async_trait]
impl StateProvider for FileStateProvider {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_base_dir().await?;
        let path = self.path_for(key);
        let pretty = serde_json::to_vec_pretty(&value).map_err(Error::Json)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &pretty).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(Error::Json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_base_dir().await?;
        // Stored filenames are themselves sanitized, so the prefix must be
        // sanitized the same way before comparison (a raw "session:" prefix
        // would otherwise never match a "session_abc.json" file on disk).
        let sanitized_prefix = sanitize_key(prefix);
        let mut entries = tokio::fs::read_dir(&self.base_dir).await.map_err(Error::Io)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if stem.starts_with(&sanitized_prefix) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }
}

/// In-process, non-durable provider. Used for tests and for `state_provider`
/// setups that deliberately don't persist across restarts.
#[derive(Default)]
pub struct InMemoryStateProvider {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryStateProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateProvider for InMemoryStateProvider {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Helper for tests that want a scratch provider backed by a real
/// temp directory rather than the in-memory map.
#[cfg(test)]
pub(crate) fn temp_provider(dir: &Path) -> FileStateProvider {
    FileStateProvider::new(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_provider_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provider = temp_provider(dir.path());
        provider.save("session_state_abc", json!({"x": 1})).await.unwrap();
        let loaded = provider.load("session_state_abc").await.unwrap();
        assert_eq!(loaded, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn file_provider_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let provider = temp_provider(dir.path());
        assert_eq!(provider.load("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_provider_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = temp_provider(dir.path());
        provider.save("k", json!(1)).await.unwrap();
        provider.delete("k").await.unwrap();
        provider.delete("k").await.unwrap();
        assert!(!provider.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn file_provider_sanitizes_traversal_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = temp_provider(dir.path());
        provider.save("../../etc/passwd", json!("x")).await.unwrap();
        let mut read = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = read.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().all(|n| !n.contains("..")));
    }

    #[tokio::test]
    async fn file_provider_list_keys_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let provider = temp_provider(dir.path());
        provider.save("session_state_a", json!(1)).await.unwrap();
        provider.save("session_state_b", json!(2)).await.unwrap();
        provider.save("session:a", json!(3)).await.unwrap();
        let mut keys = provider.list_keys("session_state_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session_state_a", "session_state_b"]);
    }

    #[tokio::test]
    async fn in_memory_provider_round_trips() {
        let provider = InMemoryStateProvider::new();
        provider.save("k", json!({"a": true})).await.unwrap();
        assert_eq!(provider.load("k").await.unwrap(), Some(json!({"a": true})));
        assert!(provider.exists("k").await.unwrap());
        provider.delete("k").await.unwrap();
        assert!(!provider.exists("k").await.unwrap());
    }
}
