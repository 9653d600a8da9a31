//! Append-only archive.
//!
//! Every insert, replace and remove appends one entry to `archive.log`. An
//! in-memory index maps each live key to the offset of its newest entry and
//! is persisted to `archive.idx` on sync. If the side index is missing or
//! does not match the log length it is rebuilt by scanning the log.
//!
//! Entry layout (little endian):
//!
//! ```text
//! magic "ARC\0" | version u8 | flags u8 | key_len u16 | key
//!   | data_len u64 | data | crc32(key ++ data) u32
//! ```
//!
//! Replaced and removed entries stay in the log until [`ArchiveRecordStore::vacuum`]
//! rewrites it.

use crate::control::Control;
use crate::error::{Result, StoreError};
use crate::properties::sync_dir;
use crate::store::{ArchiveOptions, RecordStore};
use crate::types::{validate_key, Cursor, Kind, Mode, Record};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "archive.log";
const INDEX_FILE: &str = "archive.idx";

/// Magic bytes opening every log entry.
const ENTRY_MAGIC: &[u8; 4] = b"ARC\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Current side index format version.
const INDEX_VERSION: u8 = 1;

const FLAG_LIVE: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

/// Fixed bytes before the key: magic + version + flags + key length.
const HEADER_SIZE: u64 = 4 + 1 + 1 + 2;

/// Total on-disk size of an entry.
fn entry_size(key_len: usize, data_len: u64) -> u64 {
    HEADER_SIZE + key_len as u64 + 8 + data_len + 4
}

/// Location of a key's newest entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Slot {
    offset: u64,
    /// Length of the record data.
    length: u64,
}

/// Persisted form of the index.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u8,
    /// Log length the index describes.
    log_size: u64,
    dead_bytes: u64,
    slots: Vec<(String, Slot)>,
}

/// One decoded log entry.
struct Entry {
    flags: u8,
    key: String,
    data: Vec<u8>,
}

/// Result of a vacuum pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VacuumStats {
    /// Live records copied into the new log.
    pub records: u64,
    /// Log size before the pass.
    pub bytes_before: u64,
    /// Log size after the pass.
    pub bytes_after: u64,
}

impl VacuumStats {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// In-memory index state, either loaded or rebuilt from the log.
#[derive(Default)]
struct Index {
    slots: HashMap<String, Slot>,
    /// Offset -> key, giving log order.
    order: BTreeMap<u64, String>,
    dead_bytes: u64,
}

impl Index {
    fn from_slots(slots: Vec<(String, Slot)>, dead_bytes: u64) -> Self {
        let order = slots.iter().map(|(k, s)| (s.offset, k.clone())).collect();
        Self {
            slots: slots.into_iter().collect(),
            order,
            dead_bytes,
        }
    }

    /// Apply one entry found at `offset`, as a scan or an append would.
    fn apply(&mut self, offset: u64, flags: u8, key: &str, length: u64) {
        if let Some(old) = self.slots.remove(key) {
            self.order.remove(&old.offset);
            self.dead_bytes += entry_size(key.len(), old.length);
        }
        if flags == FLAG_TOMBSTONE {
            self.dead_bytes += entry_size(key.len(), length);
        } else {
            self.slots.insert(key.to_string(), Slot { offset, length });
            self.order.insert(offset, key.to_string());
        }
    }
}

/// Log-structured store.
pub struct ArchiveRecordStore {
    control: Control,

    /// Log file handle.
    file: Mutex<File>,

    /// Logical end of the log.
    log_size: u64,

    index: Index,

    /// Set when the side index no longer matches the log.
    index_dirty: bool,

    /// Number of appends since last sync.
    writes_since_sync: u64,

    /// Sync every N appends.
    sync_interval: u64,

    /// LRU cache for recently read records.
    cache: Mutex<LruCache<String, Vec<u8>>>,

    /// Lower bound of the next log offset to sequence.
    cursor: Bound<u64>,
}

impl ArchiveRecordStore {
    pub fn create(path: &Path, description: &str, options: &ArchiveOptions) -> Result<Self> {
        let control = Control::create(path, Kind::Archive, description)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.join(LOG_FILE))?;
        sync_dir(path)?;

        let mut store = Self::assemble(control, file, 0, Index::default(), options);
        store.write_index(true)?;
        Ok(store)
    }

    pub fn open(path: &Path, mode: Mode, options: &ArchiveOptions) -> Result<Self> {
        let mut control = Control::open(path, mode, Kind::Archive)?;

        let log_path = path.join(LOG_FILE);
        let file = match OpenOptions::new()
            .read(true)
            .write(mode == Mode::ReadWrite)
            .open(&log_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Strategy(format!(
                    "{} is missing its log",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        let (index, log_size, index_dirty) = match load_index(path, file_size) {
            Some(index) => (index, file_size, false),
            None => {
                debug!(path = %path.display(), "rebuilding archive index from log");
                let (index, valid_end) = scan_log(&file, file_size)?;
                if valid_end < file_size {
                    warn!(
                        path = %path.display(),
                        discarded = file_size - valid_end,
                        "ignoring torn entry at end of archive log"
                    );
                    if mode == Mode::ReadWrite {
                        file.set_len(valid_end)?;
                    }
                }
                (index, valid_end, true)
            }
        };

        let found = index.slots.len() as u64;
        if found != control.count() {
            warn!(
                path = %path.display(),
                recorded = control.count(),
                found,
                "record count disagrees with archive log"
            );
            if mode == Mode::ReadWrite {
                control.set_count(found)?;
            }
        }

        let mut store = Self::assemble(control, file, log_size, index, options);
        store.index_dirty = index_dirty;
        Ok(store)
    }

    fn assemble(
        control: Control,
        file: File,
        log_size: u64,
        index: Index,
        options: &ArchiveOptions,
    ) -> Self {
        let cache_size = NonZeroUsize::new(options.cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            control,
            file: Mutex::new(file),
            log_size,
            index,
            index_dirty: false,
            writes_since_sync: 0,
            sync_interval: options.sync_interval.max(1),
            cache: Mutex::new(LruCache::new(cache_size)),
            cursor: Bound::Unbounded,
        }
    }

    /// Bytes of the log held by replaced or removed entries.
    pub fn dead_bytes(&self) -> u64 {
        self.index.dead_bytes
    }

    /// Whether at least half of the log is reclaimable.
    pub fn needs_vacuum(&self) -> bool {
        self.index.dead_bytes > 0 && self.index.dead_bytes * 2 >= self.log_size
    }

    /// Rewrite the log keeping only live entries, in their current order.
    ///
    /// Blocks until done. The sequence cursor is rewound.
    pub fn vacuum(&mut self) -> Result<VacuumStats> {
        self.control.check_writable()?;
        let dir = self.control.path().to_path_buf();
        let bytes_before = self.log_size;

        let mut staged = NamedTempFile::new_in(&dir)?;
        let mut rebuilt = Index::default();
        let mut offset = 0u64;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            for (old_offset, key) in &self.index.order {
                let entry = self.read_entry_at(*old_offset)?;
                let bytes = encode_entry(FLAG_LIVE, key, &entry.data);
                writer.write_all(&bytes)?;
                rebuilt.apply(offset, FLAG_LIVE, key, entry.data.len() as u64);
                offset += bytes.len() as u64;
            }
            writer.flush()?;
        }
        staged.as_file().sync_all()?;
        let file = staged.persist(dir.join(LOG_FILE))?;
        sync_dir(&dir)?;

        *self.file.get_mut() = file;
        self.index = rebuilt;
        self.log_size = offset;
        self.writes_since_sync = 0;
        self.cursor = Bound::Unbounded;
        self.write_index(true)?;

        let stats = VacuumStats {
            records: self.index.slots.len() as u64,
            bytes_before,
            bytes_after: offset,
        };
        info!(
            path = %dir.display(),
            records = stats.records,
            reclaimed = stats.bytes_reclaimed(),
            "vacuumed archive"
        );
        Ok(stats)
    }

    fn slot(&self, key: &str) -> Result<Slot> {
        self.index
            .slots
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::missing_key(key))
    }

    /// Append an entry, returning its offset.
    fn append(&mut self, flags: u8, key: &str, data: &[u8]) -> Result<u64> {
        let bytes = encode_entry(flags, key, data);
        let offset = self.log_size;

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;

        self.log_size += bytes.len() as u64;
        self.index.apply(offset, flags, key, data.len() as u64);
        self.index_dirty = true;

        // Sync periodically based on sync_interval
        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            file.sync_data()?;
            self.writes_since_sync = 0;
        }
        Ok(offset)
    }

    fn read_entry_at(&self, offset: u64) -> Result<Entry> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        Ok(read_entry(&mut *file, self.log_size - offset)?)
    }

    fn read_slot(&self, key: &str, slot: Slot) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.lock().get(key) {
            return Ok(data.clone());
        }

        let entry = self.read_entry_at(slot.offset)?;
        if entry.key != key || entry.flags != FLAG_LIVE {
            return Err(StoreError::Strategy(format!(
                "archive index points at the wrong entry for key \"{}\"",
                key
            )));
        }

        self.cache.lock().put(key.to_string(), entry.data.clone());
        Ok(entry.data)
    }

    /// Persist the side index through a temporary file.
    fn write_index(&mut self, durable: bool) -> Result<()> {
        let index = IndexFile {
            version: INDEX_VERSION,
            log_size: self.log_size,
            dead_bytes: self.index.dead_bytes,
            slots: self
                .index
                .order
                .values()
                .filter_map(|k| self.index.slots.get(k).map(|s| (k.clone(), *s)))
                .collect(),
        };
        let bytes = rmp_serde::to_vec(&index)?;

        let dir = self.control.path();
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&bytes)?;
        if durable {
            staged.as_file().sync_all()?;
        }
        staged.persist(dir.join(INDEX_FILE))?;

        self.index_dirty = false;
        Ok(())
    }
}

impl RecordStore for ArchiveRecordStore {
    fn kind(&self) -> Kind {
        Kind::Archive
    }

    fn pathname(&self) -> &Path {
        self.control.path()
    }

    fn mode(&self) -> Mode {
        self.control.mode()
    }

    fn description(&self) -> &str {
        self.control.description()
    }

    fn change_description(&mut self, description: &str) -> Result<()> {
        self.control.set_description(description)
    }

    fn count(&self) -> u64 {
        self.control.count()
    }

    fn space_used(&self) -> Result<u64> {
        let index_len = match fs::metadata(self.control.path().join(INDEX_FILE)) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(self.log_size + index_len)
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        validate_key(key)?;
        if key.len() > u16::MAX as usize {
            return Err(StoreError::Parameter(format!(
                "key of {} bytes is too long for an archive",
                key.len()
            )));
        }
        if self.index.slots.contains_key(key) {
            return Err(StoreError::duplicate_key(key));
        }

        self.append(FLAG_LIVE, key, data)?;
        self.control.increment()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        self.slot(key)?;

        self.cache.get_mut().pop(key);
        self.append(FLAG_LIVE, key, data)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.control.check_writable()?;
        self.slot(key)?;

        self.cache.get_mut().pop(key);
        self.append(FLAG_TOMBSTONE, key, &[])?;
        self.control.decrement()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let slot = self.slot(key)?;
        self.read_slot(key, slot)
    }

    fn length(&self, key: &str) -> Result<u64> {
        Ok(self.slot(key)?.length)
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.index.slots.contains_key(key))
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        self.slot(key)?;
        if self.control.mode() == Mode::ReadWrite {
            self.file.get_mut().sync_data()?;
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.control.mode() == Mode::ReadWrite {
            self.file.get_mut().sync_all()?;
            self.writes_since_sync = 0;
            self.write_index(true)?;
        }
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        match self.sequence_key(cursor)? {
            Some(key) => {
                let slot = self.slot(&key)?;
                let data = self.read_slot(&key, slot)?;
                Ok(Some(Record { key, data }))
            }
            None => Ok(None),
        }
    }

    fn sequence_key(&mut self, cursor: Cursor) -> Result<Option<String>> {
        if cursor == Cursor::Start {
            self.cursor = Bound::Unbounded;
        }
        let next = self
            .index
            .order
            .range((self.cursor, Bound::Unbounded))
            .next()
            .map(|(offset, key)| (*offset, key.clone()));

        Ok(next.map(|(offset, key)| {
            self.cursor = Bound::Excluded(offset);
            key
        }))
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        self.cursor = Bound::Included(self.slot(key)?.offset);
        Ok(())
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.relocate(new_path)
    }
}

impl Drop for ArchiveRecordStore {
    fn drop(&mut self) {
        // Best-effort index write on drop
        if self.index_dirty && self.control.mode() == Mode::ReadWrite {
            let _ = self.write_index(false);
        }
    }
}

fn encode_entry(flags: u8, key: &str, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entry_size(key.len(), data.len() as u64) as usize);
    buf.extend_from_slice(ENTRY_MAGIC);
    buf.push(LOG_VERSION);
    buf.push(flags);
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&checksum(key.as_bytes(), data).to_le_bytes());
    buf
}

fn checksum(key: &[u8], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(data);
    hasher.finalize()
}

/// Why an entry could not be decoded.
enum EntryError {
    /// The log ends partway through the entry.
    Truncated,
    /// The entry is complete but its bytes are wrong.
    Corrupt(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for EntryError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::UnexpectedEof {
            EntryError::Truncated
        } else {
            EntryError::Io(e)
        }
    }
}

impl From<EntryError> for StoreError {
    fn from(e: EntryError) -> Self {
        match e {
            EntryError::Truncated => StoreError::Strategy("archive entry overruns the log".into()),
            EntryError::Corrupt(reason) => StoreError::Strategy(reason),
            EntryError::Io(e) => StoreError::Io(e),
        }
    }
}

/// Decode the entry at the reader's position. `remaining` bounds the entry
/// size so a corrupt length cannot trigger a huge allocation.
fn read_entry<R: Read>(reader: &mut R, remaining: u64) -> std::result::Result<Entry, EntryError> {
    let mut header = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;
    if &header[..4] != ENTRY_MAGIC {
        return Err(EntryError::Corrupt("invalid archive entry magic".into()));
    }
    if header[4] != LOG_VERSION {
        return Err(EntryError::Corrupt(format!(
            "unsupported archive log version: {}",
            header[4]
        )));
    }
    let flags = header[5];
    let key_len = u16::from_le_bytes([header[6], header[7]]) as usize;

    let mut key = vec![0u8; key_len];
    reader.read_exact(&mut key)?;

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let data_len = u64::from_le_bytes(len_bytes);
    if entry_size(key_len, data_len) > remaining {
        return Err(EntryError::Truncated);
    }
    let mut data = vec![0u8; data_len as usize];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    if u32::from_le_bytes(crc_bytes) != checksum(&key, &data) {
        return Err(EntryError::Corrupt(format!(
            "checksum mismatch in archive entry for key \"{}\"",
            String::from_utf8_lossy(&key)
        )));
    }

    let key = String::from_utf8(key)
        .map_err(|_| EntryError::Corrupt("archive key is not valid UTF-8".into()))?;
    Ok(Entry { flags, key, data })
}

/// Rebuild the index from the log. Returns the index and the end of the
/// last intact entry.
///
/// Only a damaged final entry counts as a torn append. Damage with intact
/// bytes after it fails the scan so nothing past it is lost.
fn scan_log(file: &File, file_size: u64) -> Result<(Index, u64)> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut index = Index::default();
    let mut offset = 0u64;
    while offset < file_size {
        let entry = match read_entry(&mut reader, file_size - offset) {
            Ok(entry) => entry,
            Err(EntryError::Truncated) => break,
            Err(EntryError::Corrupt(reason)) => {
                if reader.stream_position()? >= file_size {
                    break;
                }
                return Err(StoreError::Strategy(format!(
                    "{} at archive log offset {}",
                    reason, offset
                )));
            }
            Err(EntryError::Io(e)) => return Err(e.into()),
        };
        index.apply(offset, entry.flags, &entry.key, entry.data.len() as u64);
        offset += entry_size(entry.key.len(), entry.data.len() as u64);
    }
    Ok((index, offset))
}

/// Load the side index if it describes a log of exactly `log_size` bytes.
fn load_index(path: &Path, log_size: u64) -> Option<Index> {
    let bytes = fs::read(path.join(INDEX_FILE)).ok()?;
    let file: IndexFile = match rmp_serde::from_slice(&bytes) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable archive index");
            return None;
        }
    };
    if file.version != INDEX_VERSION || file.log_size != log_size {
        return None;
    }
    Some(Index::from_slots(file.slots, file.dead_bytes))
}
