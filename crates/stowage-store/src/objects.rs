use crate::layout::RepoLayout;
use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Content-addressable object store for file contents.
///
/// Objects are stored as files named by their blake3 hash, which is what
/// deduplicates identical files across layers, services, platforms, and
/// releases. Writes are atomic via `NamedTempFile`; reads verify integrity
/// by recomputing the hash.
pub struct ObjectStore {
    layout: RepoLayout,
}

impl ObjectStore {
    pub fn new(layout: RepoLayout) -> Self {
        Self { layout }
    }

    /// Store data and return its blake3 hash. Idempotent — existing objects
    /// are left untouched.
    pub fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        let hash = blake3::hash(data).to_hex().to_string();
        let dest = self.layout.objects_dir().join(&hash);

        if dest.exists() {
            return Ok(hash);
        }

        let dir = self.layout.objects_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        Ok(hash)
    }

    /// Retrieve data by hash, verifying integrity on read.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.objects_dir().join(hash);
        if !path.exists() {
            return Err(StoreError::ObjectNotFound(hash.to_owned()));
        }
        let data = fs::read(&path)?;

        let actual = blake3::hash(&data).to_hex();
        if actual.as_str() != hash {
            return Err(StoreError::IntegrityFailure {
                hash: hash.to_owned(),
                expected: hash.to_owned(),
                actual: actual.to_string(),
            });
        }

        Ok(data)
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.layout.objects_dir().join(hash).exists()
    }

    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.objects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut hashes = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    hashes.push(name.to_owned());
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ObjectStore::new(layout))
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = test_store();
        let data = b"layer file content";
        let hash = store.put(data).unwrap();
        assert_eq!(store.get(&hash).unwrap(), data);
    }

    #[test]
    fn put_is_idempotent_and_deterministic() {
        let (_dir, store) = test_store();
        let h1 = store.put(b"same bytes").unwrap();
        let h2 = store.put(b"same bytes").unwrap();
        assert_eq!(h1, h2);
        let h3 = store.put(b"other bytes").unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.get("nonexistent"),
            Err(StoreError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn corruption_detected_on_read() {
        let (dir, store) = test_store();
        let hash = store.put(b"pristine").unwrap();
        let path = RepoLayout::new(dir.path()).objects_dir().join(&hash);
        fs::write(&path, b"tampered").unwrap();
        assert!(matches!(
            store.get(&hash),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, store) = test_store();
        store.put(b"one").unwrap();
        store.put(b"two").unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        let mut sorted = list.clone();
        sorted.sort();
        assert_eq!(list, sorted);
    }

    #[test]
    fn put_empty_data() {
        let (_dir, store) = test_store();
        let hash = store.put(b"").unwrap();
        assert!(store.get(&hash).unwrap().is_empty());
    }
}
