//! Metadata stores for function and aggregate definitions
//!
//! The engine persists every define and drop before publishing it, and
//! replays [`MetadataStore::load_all`] when it opens.
//!
//! [`FileMetadataStore`] keeps an append-only `schema.log` of framed
//! [`SchemaRecord`]s in a directory. Opening replays the log; the first
//! record that is torn or fails its checksum ends replay and the log is
//! truncated there, so a crash mid-append loses at most that record.

use crate::record::SchemaRecord;
use ferrule_core::{Error, Result, SchemaEntry, SchemaKey};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the log file inside the store directory
pub const SCHEMA_LOG_FILE: &str = "schema.log";

const COMPACT_TMP_FILE: &str = "schema.log.tmp";

/// Durable storage for schema entries
pub trait MetadataStore: Send + Sync {
    /// Store `entry`, replacing any entry with the same key
    fn persist(&self, entry: &SchemaEntry) -> Result<()>;

    /// Forget the entry with `key`; unknown keys are ignored
    fn remove(&self, key: &SchemaKey) -> Result<()>;

    /// Every live entry, in the order it was first defined
    fn load_all(&self) -> Result<Vec<SchemaEntry>>;
}

/// Live entries tagged with the sequence number of their first definition
#[derive(Debug, Default)]
struct LiveEntries {
    entries: HashMap<SchemaKey, (u64, SchemaEntry)>,
    next_seq: u64,
}

impl LiveEntries {
    fn apply(&mut self, record: SchemaRecord) {
        match record {
            SchemaRecord::Put(entry) => {
                let key = entry.schema_key();
                let seq = match self.entries.get(&key) {
                    Some((seq, _)) => *seq,
                    None => {
                        self.next_seq += 1;
                        self.next_seq
                    }
                };
                self.entries.insert(key, (seq, entry));
            }
            SchemaRecord::Remove(key) => {
                self.entries.remove(&key);
            }
        }
    }

    fn contains(&self, key: &SchemaKey) -> bool {
        self.entries.contains_key(key)
    }

    fn ordered(&self) -> Vec<SchemaEntry> {
        let mut all: Vec<&(u64, SchemaEntry)> = self.entries.values().collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, e)| e.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Volatile store, for tests and embedded use
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    live: RwLock<LiveEntries>,
}

impl InMemoryMetadataStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    /// True when no entries are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn persist(&self, entry: &SchemaEntry) -> Result<()> {
        self.live.write().apply(SchemaRecord::Put(entry.clone()));
        Ok(())
    }

    fn remove(&self, key: &SchemaKey) -> Result<()> {
        self.live.write().apply(SchemaRecord::Remove(key.clone()));
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SchemaEntry>> {
        Ok(self.live.read().ordered())
    }
}

struct LogState {
    file: File,
    live: LiveEntries,
    /// Records in the log, live or not
    records: usize,
}

/// Append-only file store
pub struct FileMetadataStore {
    dir: PathBuf,
    state: Mutex<LogState>,
}

impl std::fmt::Debug for FileMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMetadataStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileMetadataStore {
    /// Open or create the store in `dir`
    ///
    /// # Errors
    ///
    /// `Io` if the directory or log cannot be opened or truncated.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(SCHEMA_LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut live = LiveEntries::default();
        let mut offset = 0usize;
        let mut records = 0usize;
        while offset < bytes.len() {
            match SchemaRecord::from_bytes(&bytes[offset..]) {
                Ok((record, consumed)) => {
                    live.apply(record);
                    offset += consumed;
                    records += 1;
                }
                Err(e) => {
                    warn!(
                        target: "ferrule::durability",
                        path = %path.display(),
                        offset,
                        discarded = bytes.len() - offset,
                        torn = e.is_torn(),
                        error = %e,
                        "Truncating schema log at unreadable record"
                    );
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        file.seek(SeekFrom::End(0))?;

        info!(
            target: "ferrule::durability",
            path = %path.display(),
            records,
            live = live.len(),
            "Opened schema log"
        );
        Ok(Self {
            dir,
            state: Mutex::new(LogState {
                file,
                live,
                records,
            }),
        })
    }

    /// Directory holding the log
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(SCHEMA_LOG_FILE)
    }

    /// Records currently in the log, including superseded ones
    pub fn record_count(&self) -> usize {
        self.state.lock().records
    }

    fn append(&self, record: SchemaRecord) -> Result<()> {
        let bytes = record
            .to_bytes()
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let mut state = self.state.lock();
        state.file.write_all(&bytes)?;
        state.file.sync_data()?;
        state.records += 1;
        debug!(
            target: "ferrule::durability",
            key = ?record.key(),
            bytes = bytes.len(),
            "Appended schema record"
        );
        state.live.apply(record);
        Ok(())
    }

    /// Rewrite the log with only the live entries
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    ///
    /// # Errors
    ///
    /// `Io` or `Serialization`; the current log stays in use on failure.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        let entries = state.live.ordered();

        let tmp_path = self.dir.join(COMPACT_TMP_FILE);
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        for entry in &entries {
            let bytes = SchemaRecord::Put(entry.clone())
                .to_bytes()
                .map_err(|e| Error::Serialization(e.to_string()))?;
            tmp.write_all(&bytes)?;
        }
        tmp.sync_all()?;
        drop(tmp);

        let path = self.log_path();
        fs::rename(&tmp_path, &path)?;
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.seek(SeekFrom::End(0))?;

        info!(
            target: "ferrule::durability",
            before = state.records,
            after = entries.len(),
            "Compacted schema log"
        );
        state.file = file;
        state.records = entries.len();
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn persist(&self, entry: &SchemaEntry) -> Result<()> {
        self.append(SchemaRecord::Put(entry.clone()))
    }

    fn remove(&self, key: &SchemaKey) -> Result<()> {
        if !self.state.lock().live.contains(key) {
            return Ok(());
        }
        self.append(SchemaRecord::Remove(key.clone()))
    }

    fn load_all(&self) -> Result<Vec<SchemaEntry>> {
        Ok(self.state.lock().live.ordered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::{
        AggregateDefinition, CqlType, FunctionDefinition, FunctionName, Language, NullPolicy, Value,
    };
    use tempfile::tempdir;

    fn function(name: &str, body: &str) -> SchemaEntry {
        SchemaEntry::Function(FunctionDefinition {
            name: FunctionName::new("ks", name),
            arg_names: vec!["a".to_string()],
            arg_types: vec![CqlType::int()],
            return_type: CqlType::int(),
            null_policy: NullPolicy::CalledOnNull,
            language: Language::Lua,
            body: body.to_string(),
        })
    }

    fn aggregate() -> SchemaEntry {
        SchemaEntry::Aggregate(AggregateDefinition {
            name: FunctionName::new("ks", "agg"),
            arg_types: vec![CqlType::int()],
            state_func: "f".to_string(),
            state_type: CqlType::int(),
            final_func: None,
            initcond: Value::Int(0),
        })
    }

    #[test]
    fn test_in_memory_replace_keeps_order() {
        let store = InMemoryMetadataStore::new();
        store.persist(&function("a", "return 1")).unwrap();
        store.persist(&function("b", "return 2")).unwrap();
        store.persist(&function("a", "return 3")).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all, vec![function("a", "return 3"), function("b", "return 2")]);
        store.remove(&function("a", "").schema_key()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reopen_replays() {
        let dir = tempdir().unwrap();
        {
            let store = FileMetadataStore::open(dir.path()).unwrap();
            store.persist(&function("f", "return a")).unwrap();
            store.persist(&aggregate()).unwrap();
            store.persist(&function("g", "return 1")).unwrap();
            store.remove(&function("g", "").schema_key()).unwrap();
        }
        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert_eq!(
            store.load_all().unwrap(),
            vec![function("f", "return a"), aggregate()]
        );
        assert_eq!(store.record_count(), 4);
    }

    #[test]
    fn test_remove_unknown_key_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path()).unwrap();
        store.remove(&function("nope", "").schema_key()).unwrap();
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let valid_len;
        {
            let store = FileMetadataStore::open(dir.path()).unwrap();
            store.persist(&function("f", "return a")).unwrap();
            valid_len = fs::metadata(store.log_path()).unwrap().len();
            store.persist(&function("g", "return a")).unwrap();
        }
        let path = dir.path().join(SCHEMA_LOG_FILE);
        let full = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full - 3)
            .unwrap();

        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![function("f", "return a")]);
        assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);

        // appends continue after the truncation point
        store.persist(&function("h", "return a")).unwrap();
        drop(store);
        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_record_ends_replay() {
        let dir = tempdir().unwrap();
        let first_len;
        {
            let store = FileMetadataStore::open(dir.path()).unwrap();
            store.persist(&function("f", "return a")).unwrap();
            first_len = fs::metadata(store.log_path()).unwrap().len() as usize;
            store.persist(&function("g", "return a")).unwrap();
            store.persist(&function("h", "return a")).unwrap();
        }
        let path = dir.path().join(SCHEMA_LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes[first_len + 8] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![function("f", "return a")]);
    }

    #[test]
    fn test_compact() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path()).unwrap();
        for i in 0..10 {
            store
                .persist(&function("f", &format!("return {}", i)))
                .unwrap();
        }
        store.persist(&aggregate()).unwrap();
        let before = fs::metadata(store.log_path()).unwrap().len();
        store.compact().unwrap();
        let after = fs::metadata(store.log_path()).unwrap().len();
        assert!(after < before);
        assert_eq!(store.record_count(), 2);

        store.persist(&function("g", "return 0")).unwrap();
        drop(store);
        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert_eq!(
            store.load_all().unwrap(),
            vec![function("f", "return 9"), aggregate(), function("g", "return 0")]
        );
        assert!(!dir.path().join(COMPACT_TMP_FILE).exists());
    }
}
