//! Persistent store abstraction.
//!
//! The update engine needs a flat namespace of byte entries with five
//! operations: create-for-write, append, stat, delete-if-exists and atomic
//! rename (plus buffered reads for validation). `FsStore` maps entries to
//! files in one directory; `MemoryStore` keeps them in memory for tests and
//! hosts without a filesystem.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Flat-namespace byte store holding the temp artifact and the live program.
pub trait ProgramStore: Send + Sync {
    /// Create `name` (truncating any existing entry) and return an append writer.
    fn create(&self, name: &str) -> io::Result<Box<dyn StoreWriter>>;

    /// Size of `name` in bytes, or `None` if it does not exist.
    fn size(&self, name: &str) -> io::Result<Option<u64>>;

    /// Delete `name` if present. Returns whether an entry was removed.
    fn remove(&self, name: &str) -> io::Result<bool>;

    /// Atomically rename `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Open `name` for buffered reading.
    fn open(&self, name: &str) -> io::Result<Box<dyn BufRead + Send>>;
}

/// Append-only writer returned by [`ProgramStore::create`].
///
/// Dropping the writer releases the underlying handle.
pub trait StoreWriter: Send {
    fn append(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flush everything written so far to persistent media.
    fn finish(&mut self) -> io::Result<()>;
}

fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid store entry name: {:?}", name),
        ));
    }
    Ok(())
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Store backed by a single directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

struct FsWriter {
    file: File,
}

impl StoreWriter for FsWriter {
    fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl ProgramStore for FsStore {
    fn create(&self, name: &str) -> io::Result<Box<dyn StoreWriter>> {
        let path = self.path(name)?;
        let file = File::create(&path)?;
        debug!(path = %path.display(), "Opened store entry for writing");
        Ok(Box::new(FsWriter { file }))
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        match fs::metadata(self.path(name)?) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path(name)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from)?, self.path(to)?)
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.path(name)?)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn put(&self, name: &str, data: impl Into<Vec<u8>>) -> io::Result<()> {
        check_name(name)?;
        lock(&self.entries)?.insert(name.to_string(), data.into());
        Ok(())
    }

    /// Copy of an entry's bytes.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.entries).ok()?.get(name).cloned()
    }

    /// Names of all entries, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.entries)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn lock(entries: &Mutex<HashMap<String, Vec<u8>>>) -> io::Result<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
    entries
        .lock()
        .map_err(|_| io::Error::other("memory store lock poisoned"))
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such entry: {}", name))
}

struct MemoryWriter {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    name: String,
}

impl StoreWriter for MemoryWriter {
    fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        let mut entries = lock(&self.entries)?;
        let entry = entries
            .get_mut(&self.name)
            .ok_or_else(|| not_found(&self.name))?;
        entry.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ProgramStore for MemoryStore {
    fn create(&self, name: &str) -> io::Result<Box<dyn StoreWriter>> {
        check_name(name)?;
        lock(&self.entries)?.insert(name.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            entries: Arc::clone(&self.entries),
            name: name.to_string(),
        }))
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        check_name(name)?;
        Ok(lock(&self.entries)?.get(name).map(|data| data.len() as u64))
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        check_name(name)?;
        Ok(lock(&self.entries)?.remove(name).is_some())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        check_name(from)?;
        check_name(to)?;
        let mut entries = lock(&self.entries)?;
        let data = entries.remove(from).ok_or_else(|| not_found(from))?;
        entries.insert(to.to_string(), data);
        Ok(())
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn BufRead + Send>> {
        check_name(name)?;
        let data = lock(&self.entries)?
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_all(store: &dyn ProgramStore, name: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        store.open(name).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    fn exercise(store: &dyn ProgramStore) {
        assert_eq!(store.size("a.py").unwrap(), None);
        assert!(!store.remove("a.py").unwrap());

        let mut writer = store.create("a.py").unwrap();
        writer.append(b"hello ").unwrap();
        writer.append(b"world").unwrap();
        writer.finish().unwrap();
        drop(writer);

        assert_eq!(store.size("a.py").unwrap(), Some(11));
        assert_eq!(read_all(store, "a.py"), b"hello world");

        // create truncates
        let mut writer = store.create("a.py").unwrap();
        writer.append(b"x").unwrap();
        drop(writer);
        assert_eq!(store.size("a.py").unwrap(), Some(1));

        store.rename("a.py", "b.py").unwrap();
        assert_eq!(store.size("a.py").unwrap(), None);
        assert_eq!(read_all(store, "b.py"), b"x");

        assert!(store.rename("missing.py", "c.py").is_err());
        assert!(store.open("missing.py").is_err());

        assert!(store.remove("b.py").unwrap());
        assert_eq!(store.size("b.py").unwrap(), None);
    }

    #[test]
    fn test_fs_store_operations() {
        let dir = TempDir::new().unwrap();
        exercise(&FsStore::new(dir.path()));
    }

    #[test]
    fn test_memory_store_operations() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_rename_replaces_target() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        std::fs::write(dir.path().join("old.py"), b"old").unwrap();
        std::fs::write(dir.path().join("new.py"), b"new").unwrap();
        store.rename("new.py", "old.py").unwrap();
        assert_eq!(std::fs::read(dir.path().join("old.py")).unwrap(), b"new");

        let mem = MemoryStore::new();
        mem.put("old.py", "old").unwrap();
        mem.put("new.py", "new").unwrap();
        mem.rename("new.py", "old.py").unwrap();
        assert_eq!(mem.get("old.py").unwrap(), b"new");
        assert_eq!(mem.names(), vec!["old.py".to_string()]);
    }

    #[test]
    fn test_rejects_nested_names() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.create("../escape.py").is_err());
        assert!(store.size("sub/main.py").is_err());
        assert!(MemoryStore::new().put("", "x").is_err());
    }
}
