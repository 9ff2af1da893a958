//! Dataset container: a directory of named items.
//!
//! A dataset is a directory. Every item is a named variable-length byte
//! stream. Large items live as plain files inside the directory; small items
//! (at most [`SMALL_ITEM_MAX`] payload bytes) are packed together into a
//! single `header` file so that a dataset holding dozens of scalar header
//! values does not degenerate into a directory of 4-byte files.
//!
//! `header` file layout, repeated until end of file:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ name: 15 bytes, NUL-padded                   │
//! │ len:  1 byte (payload length, 0..=64)        │
//! │ payload: len bytes                           │
//! │ padding to the next 16-byte boundary         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The packed table is loaded when the dataset is opened and rewritten
//! wholesale on flush. It sits behind a mutex because several item handles
//! borrowed from one dataset may retire small items back into it.

use crate::error::{MiriadError, Result};
use crate::item::{Item, ItemMode};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Largest payload, in bytes, that is packed into the `header` file.
pub const SMALL_ITEM_MAX: usize = 64;

/// Longest permitted item name. Fixed by the packed record layout.
pub const ITEM_NAME_MAX: usize = 15;

const TABLE_RECORD_ALIGN: usize = 16;
const TABLE_ITEM_NAME: &str = "header";

/// Dataset open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Open an existing dataset read/write.
    Old,
    /// Create a new dataset; fails if the directory already exists.
    New,
    /// Open an existing dataset, creating it first if absent.
    Append,
}

impl FromStr for AccessMode {
    type Err = MiriadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "old" => Ok(AccessMode::Old),
            "new" => Ok(AccessMode::New),
            "append" => Ok(AccessMode::Append),
            other => Err(MiriadError::validation(format!(
                "unrecognized open mode {other:?}"
            ))),
        }
    }
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Old => "old",
            AccessMode::New => "new",
            AccessMode::Append => "append",
        }
    }
}

/// Packed small-item table, shared between a dataset and its item handles.
pub(crate) struct ItemTable {
    entries: AHashMap<String, Vec<u8>>,
    dirty: bool,
}

impl ItemTable {
    fn empty() -> Self {
        ItemTable {
            entries: AHashMap::new(),
            dirty: false,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Vec<u8>> {
        self.entries.get(name)
    }

    pub(crate) fn insert(&mut self, name: String, payload: Vec<u8>) {
        self.entries.insert(name, payload);
        self.dirty = true;
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut entries = AHashMap::new();
        let mut pos = 0;
        while pos + ITEM_NAME_MAX + 1 <= bytes.len() {
            let name_raw = &bytes[pos..pos + ITEM_NAME_MAX];
            let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(ITEM_NAME_MAX);
            let name = std::str::from_utf8(&name_raw[..name_end])
                .map_err(|_| MiriadError::fault("non-UTF-8 item name in packed table"))?
                .to_owned();
            let len = bytes[pos + ITEM_NAME_MAX] as usize;
            let payload_start = pos + ITEM_NAME_MAX + 1;
            if payload_start + len > bytes.len() {
                return Err(MiriadError::fault(format!(
                    "packed table entry {name:?} is truncated"
                )));
            }
            if name.is_empty() {
                return Err(MiriadError::fault("packed table entry has empty name"));
            }
            entries.insert(name, bytes[payload_start..payload_start + len].to_vec());
            pos = crate::types::round_up(payload_start + len, TABLE_RECORD_ALIGN);
        }
        Ok(ItemTable {
            entries,
            dirty: false,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        let mut out = Vec::new();
        for name in names {
            let payload = &self.entries[name];
            let mut name_field = [0u8; ITEM_NAME_MAX];
            name_field[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&name_field);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
            let target = crate::types::round_up(out.len(), TABLE_RECORD_ALIGN);
            out.resize(target, 0);
        }
        out
    }
}

/// A directory-like container owning zero or more named items.
pub struct Dataset {
    path: PathBuf,
    mode: AccessMode,
    table: Arc<Mutex<ItemTable>>,
}

impl Dataset {
    /// Open or create a dataset directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match mode {
            AccessMode::New => {
                if path.exists() {
                    return Err(MiriadError::fault(format!(
                        "dataset {} already exists",
                        path.display()
                    )));
                }
                fs::create_dir_all(&path)?;
            }
            AccessMode::Old => {
                if !path.is_dir() {
                    return Err(MiriadError::fault(format!(
                        "dataset {} does not exist",
                        path.display()
                    )));
                }
            }
            AccessMode::Append => {
                if !path.exists() {
                    fs::create_dir_all(&path)?;
                }
            }
        }

        let table_path = path.join(TABLE_ITEM_NAME);
        let table = if table_path.is_file() {
            let mut bytes = Vec::new();
            fs::File::open(&table_path)?.read_to_end(&mut bytes)?;
            ItemTable::decode(&bytes)?
        } else {
            ItemTable::empty()
        };

        tracing::debug!(path = %path.display(), mode = mode.as_str(), "opened dataset");

        Ok(Dataset {
            path,
            mode,
            table: Arc::new(Mutex::new(table)),
        })
    }

    /// Convenience form taking the textual open mode.
    pub fn open_with_status<P: AsRef<Path>>(path: P, status: &str) -> Result<Self> {
        Self::open(path, status.parse()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The mode the dataset was opened with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Write the packed small-item table back to disk if it changed.
    pub fn flush(&self) -> Result<()> {
        let mut table = self.table.lock();
        if !table.dirty {
            return Ok(());
        }
        let encoded = table.encode();
        let mut file = fs::File::create(self.path.join(TABLE_ITEM_NAME))?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        table.dirty = false;
        Ok(())
    }

    /// Close the dataset, flushing pending small-item writes.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    /// Delete the entire dataset from disk. Consumes the handle; nothing is
    /// flushed first.
    pub fn delete_all(self) -> Result<()> {
        tracing::info!(path = %self.path.display(), "deleting dataset");
        self.table.lock().dirty = false;
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }

    /// Delete one item by name.
    pub fn delete_item(&self, keyword: &str) -> Result<()> {
        validate_item_name(keyword)?;
        if self.table.lock().remove(keyword).is_some() {
            return Ok(());
        }
        let file_path = self.path.join(keyword);
        if file_path.is_file() {
            fs::remove_file(file_path)?;
            return Ok(());
        }
        Err(MiriadError::fault(format!("item {keyword:?} does not exist")))
    }

    /// Whether an item with this name exists.
    pub fn has_item(&self, keyword: &str) -> bool {
        if validate_item_name(keyword).is_err() {
            return false;
        }
        self.table.lock().contains(keyword) || self.path.join(keyword).is_file()
    }

    /// Names of all items in the dataset, sorted.
    pub fn item_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.table.lock().entries.keys().cloned().collect();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != TABLE_ITEM_NAME {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Open an item for typed I/O. The returned handle is a borrowed view:
    /// pending small-item writes reach the dataset only when the handle is
    /// closed or dropped.
    pub fn access(&self, keyword: &str, mode: ItemMode) -> Result<Item> {
        validate_item_name(keyword)?;
        Item::open(
            self.path.clone(),
            Arc::clone(&self.table),
            keyword,
            mode,
        )
    }

    /// `access` taking the textual mode used by the calling conventions.
    pub fn access_with_status(&self, keyword: &str, status: &str) -> Result<Item> {
        self.access(keyword, status.parse()?)
    }

    /// Byte length of an item without opening a full handle.
    pub fn item_size(&self, keyword: &str) -> Result<u64> {
        validate_item_name(keyword)?;
        if let Some(payload) = self.table.lock().get(keyword) {
            return Ok(payload.len() as u64);
        }
        let file_path = self.path.join(keyword);
        if file_path.is_file() {
            return Ok(fs::metadata(file_path)?.len());
        }
        Err(MiriadError::fault(format!("item {keyword:?} does not exist")))
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        let dirty = self.table.lock().dirty;
        if dirty {
            let encoded = self.table.lock().encode();
            let result = fs::File::create(self.path.join(TABLE_ITEM_NAME))
                .and_then(|mut f| f.write_all(&encoded));
            if let Err(err) = result {
                tracing::warn!(path = %self.path.display(), %err,
                    "failed to flush packed item table on drop");
            } else {
                self.table.lock().dirty = false;
            }
        }
    }
}

pub(crate) fn validate_item_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > ITEM_NAME_MAX {
        return Err(MiriadError::validation(format!(
            "item name {name:?} must be 1..={ITEM_NAME_MAX} bytes"
        )));
    }
    if name == TABLE_ITEM_NAME {
        return Err(MiriadError::validation(
            "the name \"header\" is reserved for the packed item table",
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(MiriadError::validation(format!(
            "item name {name:?} contains unsupported characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.mir");
        (dir, path)
    }

    #[test]
    fn test_new_then_old() {
        let (_dir, path) = scratch();

        let ds = Dataset::open(&path, AccessMode::New).unwrap();
        ds.close().unwrap();

        let ds = Dataset::open(&path, AccessMode::Old).unwrap();
        assert_eq!(ds.mode(), AccessMode::Old);
    }

    #[test]
    fn test_new_refuses_existing() {
        let (_dir, path) = scratch();
        Dataset::open(&path, AccessMode::New).unwrap();
        assert!(Dataset::open(&path, AccessMode::New).is_err());
    }

    #[test]
    fn test_old_requires_existing() {
        let (_dir, path) = scratch();
        assert!(matches!(
            Dataset::open(&path, AccessMode::Old),
            Err(MiriadError::IoFault { .. })
        ));
    }

    #[test]
    fn test_item_name_validation() {
        assert!(validate_item_name("image").is_ok());
        assert!(validate_item_name("naxis1").is_ok());
        assert!(validate_item_name("").is_err());
        assert!(validate_item_name("header").is_err());
        assert!(validate_item_name("a/b").is_err());
        assert!(validate_item_name("averylongitemname").is_err());
    }

    #[test]
    fn test_packed_table_round_trip() {
        let mut table = ItemTable::empty();
        table.insert("niters".to_owned(), vec![0, 0, 0, 2, 0, 0, 0, 5]);
        table.insert("object".to_owned(), b"\x00\x00\x00\x063c286".to_vec());

        let encoded = table.encode();
        assert_eq!(encoded.len() % TABLE_RECORD_ALIGN, 0);

        let decoded = ItemTable::decode(&encoded).unwrap();
        assert_eq!(decoded.get("niters"), table.get("niters"));
        assert_eq!(decoded.get("object"), table.get("object"));
        assert!(!decoded.dirty);
    }

    #[test]
    fn test_packed_table_truncation_detected() {
        let mut table = ItemTable::empty();
        table.insert("niters".to_owned(), vec![1; 20]);
        let encoded = table.encode();
        assert!(ItemTable::decode(&encoded[..encoded.len() - 20]).is_err());
    }

    #[test]
    fn test_delete_item_missing() {
        let (_dir, path) = scratch();
        let ds = Dataset::open(&path, AccessMode::New).unwrap();
        assert!(ds.delete_item("nosuch").is_err());
    }

    #[test]
    fn test_delete_all() {
        let (_dir, path) = scratch();
        let ds = Dataset::open(&path, AccessMode::New).unwrap();
        ds.delete_all().unwrap();
        assert!(!path.exists());
    }
}
