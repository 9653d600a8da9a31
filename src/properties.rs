//! Text properties files.
//!
//! A properties file holds `Name = Value` lines. Every store keeps one as
//! its control file. Values are escaped so free text survives a round trip:
//! `\\`, `\n`, `\r` and `\t` stand for themselves, and `\u{..}` encodes other
//! control characters and whitespace at either end of a value.
//!
//! Writers always rewrite the whole file through a temporary file in the
//! same directory followed by a rename, so a reader sees either the old or
//! the new contents, never a mixture.

use crate::error::{Result, StoreError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

/// An ordered set of name/value properties backed by a file.
#[derive(Clone, Debug)]
pub struct Properties {
    /// Path to the backing file.
    path: PathBuf,

    /// Properties in file order. Unknown names are carried through rewrites.
    entries: Vec<(String, String)>,

    /// Set whenever an entry changes after the last sync.
    dirty: bool,
}

impl Properties {
    /// Start an empty properties set that will be written to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Vec::new(),
            dirty: true,
        }
    }

    /// Load properties from an existing file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ObjectDoesNotExist(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<(String, String)> = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                StoreError::Strategy(format!(
                    "{}:{}: expected \"Name = Value\"",
                    path.display(),
                    number + 1
                ))
            })?;
            let name = name.trim().to_string();
            let value = unescape_value(value.trim());
            match entries.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value,
                None => entries.push((name, value)),
            }
        }

        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the properties at a new file, e.g. after the store moved.
    pub fn set_path(&mut self, path: impl AsRef<Path>) {
        self.path = path.as_ref().to_path_buf();
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a property that must be present.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            StoreError::Strategy(format!(
                "{} is missing the {} property",
                self.path.display(),
                name
            ))
        })
    }

    /// Get a required property parsed as `T`.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.require(name)?;
        raw.parse().map_err(|_| {
            StoreError::Strategy(format!(
                "{}: invalid value \"{}\" for {}",
                self.path.display(),
                raw,
                name
            ))
        })
    }

    pub fn set(&mut self, name: &str, value: impl ToString) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) if entry.1 == value => return,
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        self.dirty = true;
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let position = self.entries.iter().position(|(n, _)| n == name)?;
        self.dirty = true;
        Some(self.entries.remove(position).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rewrite the backing file if anything changed.
    pub fn save(&mut self) -> Result<()> {
        if self.dirty {
            self.write(false)?;
        }
        Ok(())
    }

    /// Rewrite the backing file and force it to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.write(true)
    }

    fn write(&mut self, durable: bool) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let staged = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file());
            for (name, value) in &self.entries {
                writeln!(writer, "{} = {}", name, escape_value(value))?;
            }
            writer.flush()?;
        }
        if durable {
            staged.as_file().sync_all()?;
        }
        staged.persist(&self.path)?;
        if durable {
            sync_dir(dir)?;
        }

        self.dirty = false;
        Ok(())
    }
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() || (c.is_whitespace() && (i == 0 || i == last)) => {
                escaped.push_str(&format!("\\u{{{:x}}}", c as u32));
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Undo [`escape_value`]. Unknown escapes are kept as written.
fn unescape_value(raw: &str) -> String {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => value.push('\\'),
            Some('n') => value.push('\n'),
            Some('r') => value.push('\r'),
            Some('t') => value.push('\t'),
            Some('u') => {
                let rest = chars.as_str();
                match unicode_escape(rest) {
                    Some((c, used)) => {
                        value.push(c);
                        chars = rest[used..].chars();
                    }
                    None => value.push_str("\\u"),
                }
            }
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    value
}

/// Parse `{hex}` at the start of `rest`, returning the char and bytes used.
fn unicode_escape(rest: &str) -> Option<(char, usize)> {
    let body = rest.strip_prefix('{')?;
    let end = body.find('}')?;
    let code = u32::from_str_radix(&body[..end], 16).ok()?;
    Some((char::from_u32(code)?, end + 2))
}

/// Force directory metadata (renames, creations) to stable storage.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_sync_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");

        let mut props = Properties::new(&path);
        props.set("Name", "store");
        props.set("Count", 3);
        props.sync().unwrap();

        let loaded = Properties::load(&path).unwrap();
        assert_eq!(loaded.get("Name"), Some("store"));
        assert_eq!(loaded.parse::<u64>("Count").unwrap(), 3);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_whitespace_comments_and_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        fs::write(
            &path,
            "# written by hand\n  Name=a  \n\nDescription =  two words \nCustom = kept\n",
        )
        .unwrap();

        let mut props = Properties::load(&path).unwrap();
        assert_eq!(props.get("Name"), Some("a"));
        assert_eq!(props.get("Description"), Some("two words"));

        props.set("Name", "b");
        props.save().unwrap();

        let reloaded = Properties::load(&path).unwrap();
        assert_eq!(reloaded.get("Name"), Some("b"));
        assert_eq!(reloaded.get("Custom"), Some("kept"));
    }

    #[test]
    fn test_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        fs::write(&path, "Name = a\nno separator here\n").unwrap();

        assert!(matches!(
            Properties::load(&path),
            Err(StoreError::Strategy(_))
        ));
    }

    #[test]
    fn test_free_text_values_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let values = [
            "line one\nline two",
            "  padded  ",
            "C:\\records\\new",
            "tab\there\r\u{7}",
            "\\u{41} stays literal",
        ];

        let mut props = Properties::new(&path);
        for (i, value) in values.iter().enumerate() {
            props.set(&format!("P{}", i), value);
        }
        props.sync().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), values.len());
        let loaded = Properties::load(&path).unwrap();
        for (i, value) in values.iter().enumerate() {
            assert_eq!(loaded.get(&format!("P{}", i)), Some(*value));
        }
    }

    #[test]
    fn test_hand_written_backslashes_are_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        fs::write(&path, "Source = D:\\data\\q\\u\n").unwrap();

        let props = Properties::load(&path).unwrap();
        assert_eq!(props.get("Source"), Some("D:\\data\\q\\u"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Properties::load(dir.path().join("absent")),
            Err(StoreError::ObjectDoesNotExist(_))
        ));
    }

    #[test]
    fn test_unchanged_set_stays_clean() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("props");
        let mut props = Properties::new(&path);
        props.set("Count", 1);
        props.sync().unwrap();

        props.set("Count", 1);
        assert!(!props.is_dirty());
        props.set("Count", 2);
        assert!(props.is_dirty());
        assert_eq!(props.remove("Count").as_deref(), Some("2"));
        assert_eq!(props.get("Count"), None);
    }
}
