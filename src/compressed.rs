//! Compression decorator.
//!
//! A compressed store owns two inner stores of the same data-holding kind:
//! `data/` holds compressed payloads and `lengths/` holds each record's
//! uncompressed length as 8 little-endian bytes. Compressor and inner kind
//! are chosen at creation and recorded in the control file.

use crate::control::{store_name, Control};
use crate::error::{Result, StoreError};
use crate::store::{create_record_store, open_record_store, RecordStore, StoreConfig};
use crate::types::{validate_key, CompressorKind, Cursor, Kind, Mode, Record};
use std::fs;
use std::path::Path;
use tracing::warn;

const DATA_DIR: &str = "data";
const LENGTHS_DIR: &str = "lengths";

const COMPRESSOR_PROPERTY: &str = "Compressor";
const INNER_TYPE_PROPERTY: &str = "InnerType";

/// zstd level used for new records.
const ZSTD_LEVEL: i32 = 3;

/// Store compressing every record on its way to an inner store.
pub struct CompressedRecordStore {
    control: Control,
    compressor: CompressorKind,
    data: Box<dyn RecordStore>,
    lengths: Box<dyn RecordStore>,
}

impl CompressedRecordStore {
    /// Create a compressed store at `config.path` whose inner stores are of
    /// kind `inner`.
    pub fn create(config: &StoreConfig, inner: Kind, compressor: CompressorKind) -> Result<Self> {
        if !inner.holds_data() {
            return Err(StoreError::Strategy(format!(
                "cannot compress a {} record store",
                inner
            )));
        }
        let path = config.path.as_path();
        let mut control = Control::create(path, Kind::Compressed, &config.description)?;
        control.set_property(COMPRESSOR_PROPERTY, compressor)?;
        control.set_property(INNER_TYPE_PROPERTY, inner)?;

        let name = store_name(path);
        let inner_config = |dir: &str, what: &str| StoreConfig {
            path: path.join(dir),
            description: format!("{} of {}", what, name),
            kind: inner,
            compression: None,
            source: None,
            archive: config.archive.clone(),
        };
        let data = create_record_store(&inner_config(DATA_DIR, "Compressed data"))?;
        let lengths = create_record_store(&inner_config(LENGTHS_DIR, "Uncompressed lengths"))?;
        control.sync()?;

        Ok(Self {
            control,
            compressor,
            data,
            lengths,
        })
    }

    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let control = Control::open(path, mode, Kind::Compressed)?;
        let compressor = control.require(COMPRESSOR_PROPERTY)?.parse()?;
        let data = open_record_store(path.join(DATA_DIR), mode)?;
        let lengths = open_record_store(path.join(LENGTHS_DIR), mode)?;

        Ok(Self {
            control,
            compressor,
            data,
            lengths,
        })
    }

    pub fn compressor(&self) -> CompressorKind {
        self.compressor
    }

    /// Kind of the inner stores.
    pub fn inner_kind(&self) -> Kind {
        self.data.kind()
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.compressor {
            CompressorKind::Lz4 => Ok(lz4_flex::block::compress(data)),
            CompressorKind::Zstd => Ok(zstd::bulk::compress(data, ZSTD_LEVEL)?),
        }
    }

    fn decompress(&self, key: &str, compressed: &[u8], length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let data = match self.compressor {
            CompressorKind::Lz4 => lz4_flex::block::decompress(compressed, length as usize)
                .map_err(|e| corrupt(key, &e.to_string()))?,
            CompressorKind::Zstd => zstd::bulk::decompress(compressed, length as usize)
                .map_err(|e| corrupt(key, &e.to_string()))?,
        };
        if data.len() as u64 != length {
            return Err(corrupt(key, "length mismatch"));
        }
        Ok(data)
    }

    fn expand(&self, record: Record) -> Result<Record> {
        let length = self.length(&record.key)?;
        let data = self.decompress(&record.key, &record.data, length)?;
        Ok(Record {
            key: record.key,
            data,
        })
    }
}

fn corrupt(key: &str, detail: &str) -> StoreError {
    StoreError::Strategy(format!(
        "cannot decompress record \"{}\": {}",
        key, detail
    ))
}

fn encode_length(data: &[u8]) -> [u8; 8] {
    (data.len() as u64).to_le_bytes()
}

impl RecordStore for CompressedRecordStore {
    fn kind(&self) -> Kind {
        Kind::Compressed
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
        Ok(self.data.space_used()? + self.lengths.space_used()?)
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        validate_key(key)?;

        let compressed = self.compress(data)?;
        self.data.insert(key, &compressed)?;
        if let Err(e) = self.lengths.insert(key, &encode_length(data)) {
            let undo = self.data.remove(key);
            rollback_failed(key, undo);
            return Err(e);
        }
        self.control.increment()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;

        let compressed = self.compress(data)?;
        let previous = self.data.read(key)?;
        self.data.replace(key, &compressed)?;
        if let Err(e) = self.lengths.replace(key, &encode_length(data)) {
            let undo = self.data.replace(key, &previous);
            rollback_failed(key, undo);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.control.check_writable()?;

        let previous = self.data.read(key)?;
        self.data.remove(key)?;
        if let Err(e) = self.lengths.remove(key) {
            let undo = self.data.insert(key, &previous);
            rollback_failed(key, undo);
            return Err(e);
        }
        self.control.decrement()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let compressed = self.data.read(key)?;
        let length = self.length(key)?;
        self.decompress(key, &compressed, length)
    }

    fn length(&self, key: &str) -> Result<u64> {
        let bytes = self.lengths.read(key)?;
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(key, "bad length record"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        self.data.contains_key(key)
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        self.data.flush(key)?;
        self.lengths.flush(key)
    }

    fn sync(&mut self) -> Result<()> {
        self.data.sync()?;
        self.lengths.sync()?;
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        match self.data.sequence(cursor)? {
            Some(record) => Ok(Some(self.expand(record)?)),
            None => Ok(None),
        }
    }

    fn sequence_key(&mut self, cursor: Cursor) -> Result<Option<String>> {
        self.data.sequence_key(cursor)
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        self.data.set_cursor_at_key(key)
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.check_destination(new_path)?;
        fs::create_dir(new_path)?;
        self.data.move_to(&new_path.join(DATA_DIR))?;
        self.lengths.move_to(&new_path.join(LENGTHS_DIR))?;
        self.control.relocate_control(new_path)
    }
}

/// Log a rollback that failed, leaving the inner stores out of step for `key`.
fn rollback_failed(key: &str, undo: Result<()>) {
    if let Err(e) = undo {
        warn!(key, error = %e, "could not roll back compressed data after a failed update");
    }
}
