//! State every store handle shares: control file, cached count, mode
//! checks and the single-writer lock.

use crate::error::{Result, StoreError};
use crate::properties::{sync_dir, Properties};
use crate::types::{Kind, Mode};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the control file inside a store directory.
pub const CONTROL_FILE: &str = ".rscontrol.prop";

/// Name of the advisory lock file inside a store directory.
pub const LOCK_FILE: &str = ".rslock";

pub(crate) const NAME_PROPERTY: &str = "Name";
pub(crate) const DESCRIPTION_PROPERTY: &str = "Description";
pub(crate) const TYPE_PROPERTY: &str = "Type";
pub(crate) const COUNT_PROPERTY: &str = "Count";

/// Read the `Type` property of the store at `path` without opening it.
pub fn read_kind(path: &Path) -> Result<Kind> {
    let props = load_control(path)?;
    props.require(TYPE_PROPERTY)?.parse()
}

fn load_control(path: &Path) -> Result<Properties> {
    if !path.is_dir() {
        return Err(StoreError::ObjectDoesNotExist(format!(
            "record store {}",
            path.display()
        )));
    }
    Properties::load(path.join(CONTROL_FILE)).map_err(|e| match e {
        StoreError::ObjectDoesNotExist(_) => StoreError::ObjectDoesNotExist(format!(
            "record store {} (no control file)",
            path.display()
        )),
        other => other,
    })
}

/// Control-file backed handle state.
pub(crate) struct Control {
    /// Store directory.
    path: PathBuf,

    /// Parsed control file.
    props: Properties,

    kind: Kind,
    mode: Mode,

    /// Cached `Count` property.
    count: u64,

    /// Held for the lifetime of a read-write handle.
    _lock: Option<File>,
}

impl Control {
    /// Create the store directory and its control file.
    pub fn create(path: &Path, kind: Kind, description: &str) -> Result<Self> {
        if path.exists() {
            return Err(StoreError::ObjectExists(path.display().to_string()));
        }
        let (lock, props) = create_or_discard(path, || {
            fs::create_dir_all(path)?;
            let lock = acquire_lock(path)?;
            let mut props = Properties::new(path.join(CONTROL_FILE));
            props.set(NAME_PROPERTY, store_name(path));
            props.set(DESCRIPTION_PROPERTY, description);
            props.set(TYPE_PROPERTY, kind);
            props.set(COUNT_PROPERTY, 0);
            props.sync()?;
            Ok((lock, props))
        })?;

        debug!(path = %path.display(), %kind, "created record store");
        Ok(Self {
            path: path.to_path_buf(),
            props,
            kind,
            mode: Mode::ReadWrite,
            count: 0,
            _lock: Some(lock),
        })
    }

    /// Open the control file of an existing store.
    ///
    /// Fails with a strategy error if the control file names a different kind.
    pub fn open(path: &Path, mode: Mode, expected: Kind) -> Result<Self> {
        let props = load_control(path)?;
        let kind: Kind = props.require(TYPE_PROPERTY)?.parse()?;
        if kind != expected {
            return Err(StoreError::Strategy(format!(
                "{} is a {} store, not {}",
                path.display(),
                kind,
                expected
            )));
        }
        let count = props.parse(COUNT_PROPERTY)?;

        let lock = match mode {
            Mode::ReadWrite => Some(acquire_lock(path)?),
            Mode::ReadOnly => None,
        };

        debug!(path = %path.display(), %kind, ?mode, "opened record store");
        Ok(Self {
            path: path.to_path_buf(),
            props,
            kind,
            mode,
            count,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn description(&self) -> &str {
        self.props.get(DESCRIPTION_PROPERTY).unwrap_or("")
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.props.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.props.require(name)
    }

    /// Set a backend-specific property and persist it.
    pub fn set_property(&mut self, name: &str, value: impl ToString) -> Result<()> {
        self.check_writable()?;
        self.props.set(name, value);
        self.props.save()
    }

    /// Reject mutation through a read-only handle.
    pub fn check_writable(&self) -> Result<()> {
        match self.mode {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(StoreError::ReadOnly(self.path.clone())),
        }
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.check_writable()?;
        self.props.set(DESCRIPTION_PROPERTY, description);
        self.props.save()
    }

    /// Record a new count and rewrite the control file.
    pub fn set_count(&mut self, count: u64) -> Result<()> {
        self.count = count;
        self.props.set(COUNT_PROPERTY, count);
        self.props.save()
    }

    pub fn increment(&mut self) -> Result<()> {
        self.set_count(self.count + 1)
    }

    pub fn decrement(&mut self) -> Result<()> {
        self.set_count(self.count.saturating_sub(1))
    }

    /// Force the control file to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        if self.mode == Mode::ReadOnly {
            return Ok(());
        }
        self.props.sync()
    }

    /// Fail unless `new_path` is free.
    pub fn check_destination(&self, new_path: &Path) -> Result<()> {
        self.check_writable()?;
        if new_path.exists() {
            return Err(StoreError::ObjectExists(new_path.display().to_string()));
        }
        Ok(())
    }

    /// Rename the whole store directory to `new_path`.
    pub fn relocate(&mut self, new_path: &Path) -> Result<()> {
        self.check_destination(new_path)?;
        fs::rename(&self.path, new_path)?;
        self.adopt(new_path)
    }

    /// Move only the control and lock files into the existing directory
    /// `new_path`, then remove the old store directory, which must be empty
    /// apart from those files.
    pub fn relocate_control(&mut self, new_path: &Path) -> Result<()> {
        self.check_writable()?;
        for name in [CONTROL_FILE, LOCK_FILE] {
            let from = self.path.join(name);
            if from.exists() {
                fs::rename(&from, new_path.join(name))?;
            }
        }
        fs::remove_dir(&self.path)?;
        self.adopt(new_path)
    }

    fn adopt(&mut self, new_path: &Path) -> Result<()> {
        debug!(from = %self.path.display(), to = %new_path.display(), "moved record store");
        self.path = new_path.to_path_buf();
        self.props.set_path(new_path.join(CONTROL_FILE));
        self.props.set(NAME_PROPERTY, store_name(new_path));
        self.props.sync()?;
        if let Some(parent) = new_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            sync_dir(parent)?;
        }
        Ok(())
    }
}

/// Last path component, used as the `Name` property.
pub(crate) fn store_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `create` for a store at `path`, deleting whatever it left at `path`
/// if it fails. Nothing is deleted when `path` already existed.
pub(crate) fn create_or_discard<T>(path: &Path, create: impl FnOnce() -> Result<T>) -> Result<T> {
    let existed = path.exists();
    create().map_err(|e| {
        if !existed && path.exists() {
            match fs::remove_dir_all(path) {
                Ok(()) => debug!(path = %path.display(), error = %e, "discarded partly created store"),
                Err(cleanup) => warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "could not remove partly created store"
                ),
            }
        }
        e
    })
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path.join(LOCK_FILE))?;

    lock_file
        .try_lock_exclusive()
        .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

    Ok(lock_file)
}
