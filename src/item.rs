//! Item handles: typed positional I/O on one named byte stream.
//!
//! An [`Item`] is a borrowed view into a dataset. Writes begin in an
//! in-memory buffer; the moment the item outgrows the small-item threshold
//! it spills into its own file and stays there. Items that remain small are
//! retired into the dataset's packed table when the handle is closed (or
//! dropped), which is what keeps scalar headers out of the filesystem.
//!
//! All positional reads and writes are element-typed: `offset` is counted in
//! elements of the requested type, never raw bytes. Reading past the item's
//! high-water mark is an I/O fault, not zero fill.

use crate::dataset::{ItemTable, SMALL_ITEM_MAX};
use crate::error::{MiriadError, Result};
use crate::types::Element;
use parking_lot::Mutex;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Longest line honored by the sequential text operations, including the
/// terminating newline.
pub const MAX_LINE: usize = 512;

/// Item open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMode {
    /// Existing item, read-only.
    Read,
    /// Fresh item; any previous content is discarded.
    Write,
    /// Existing-or-new item, positioned at the end.
    Append,
}

impl FromStr for ItemMode {
    type Err = MiriadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(ItemMode::Read),
            "write" => Ok(ItemMode::Write),
            "append" => Ok(ItemMode::Append),
            other => Err(MiriadError::validation(format!(
                "unrecognized item mode {other:?}"
            ))),
        }
    }
}

enum Storage {
    Buffer(Vec<u8>),
    File(fs::File),
}

/// Open session on one item.
pub struct Item {
    name: String,
    mode: ItemMode,
    storage: Storage,
    /// Sequential cursor for the text-line operations, in bytes.
    pos: u64,
    /// High-water mark in bytes.
    size: u64,
    dataset_path: PathBuf,
    table: Arc<Mutex<ItemTable>>,
    retired: bool,
}

impl Item {
    pub(crate) fn open(
        dataset_path: PathBuf,
        table: Arc<Mutex<ItemTable>>,
        name: &str,
        mode: ItemMode,
    ) -> Result<Self> {
        let file_path = dataset_path.join(name);
        let (storage, size, pos) = match mode {
            ItemMode::Read => {
                if let Some(payload) = table.lock().get(name) {
                    let len = payload.len() as u64;
                    (Storage::Buffer(payload.clone()), len, 0)
                } else if file_path.is_file() {
                    let file = fs::File::open(&file_path)?;
                    let len = file.metadata()?.len();
                    (Storage::File(file), len, 0)
                } else {
                    return Err(MiriadError::fault(format!(
                        "item {name:?} does not exist"
                    )));
                }
            }
            ItemMode::Write => (Storage::Buffer(Vec::new()), 0, 0),
            ItemMode::Append => {
                if let Some(payload) = table.lock().get(name) {
                    let len = payload.len() as u64;
                    (Storage::Buffer(payload.clone()), len, len)
                } else if file_path.is_file() {
                    let file = fs::OpenOptions::new()
                        .read(true)
                        .write(true)
                        .open(&file_path)?;
                    let len = file.metadata()?.len();
                    (Storage::File(file), len, len)
                } else {
                    (Storage::Buffer(Vec::new()), 0, 0)
                }
            }
        };

        Ok(Item {
            name: name.to_owned(),
            mode,
            storage,
            pos,
            size,
            dataset_path,
            table,
            retired: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ItemMode {
        self.mode
    }

    /// Exact byte length of the item.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reposition the sequential text cursor, in bytes.
    pub fn seek(&mut self, offset: u64) {
        self.pos = offset;
    }

    /// Current sequential cursor, in bytes.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move the buffered content into a standalone file. Past this point the
    /// item can grow without bound.
    fn spill(&mut self) -> Result<()> {
        let Storage::Buffer(buffer) = &self.storage else {
            return Ok(());
        };
        tracing::debug!(item = %self.name, bytes = buffer.len(), "spilling item to file");
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.dataset_path.join(&self.name))?;
        file.write_all(buffer)?;
        // A packed copy from a previous write session must not shadow the file.
        self.table.lock().remove(&self.name);
        self.storage = Storage::File(file);
        Ok(())
    }

    pub(crate) fn write_bytes_at(&mut self, bytes: &[u8], byte_offset: u64) -> Result<()> {
        if self.mode == ItemMode::Read {
            return Err(MiriadError::validation(format!(
                "item {:?} is open read-only",
                self.name
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let end = byte_offset + bytes.len() as u64;
        if matches!(self.storage, Storage::Buffer(_)) && end > SMALL_ITEM_MAX as u64 {
            self.spill()?;
        }
        match &mut self.storage {
            Storage::Buffer(buffer) => {
                if end as usize > buffer.len() {
                    buffer.resize(end as usize, 0);
                }
                buffer[byte_offset as usize..end as usize].copy_from_slice(bytes);
            }
            Storage::File(file) => {
                file.seek(SeekFrom::Start(byte_offset))?;
                file.write_all(bytes)?;
            }
        }
        self.size = self.size.max(end);
        Ok(())
    }

    pub(crate) fn read_bytes_at(&mut self, buf: &mut [u8], byte_offset: u64) -> Result<()> {
        let end = byte_offset + buf.len() as u64;
        if end > self.size {
            return Err(MiriadError::fault(format!(
                "read past end of item {:?} ({} > {} bytes)",
                self.name, end, self.size
            )));
        }
        match &mut self.storage {
            Storage::Buffer(buffer) => {
                buf.copy_from_slice(&buffer[byte_offset as usize..end as usize]);
            }
            Storage::File(file) => {
                file.seek(SeekFrom::Start(byte_offset))?;
                file.read_exact(buf)?;
            }
        }
        Ok(())
    }

    /// Read `buf.len()` elements starting at element `offset`.
    pub fn read<T: Element>(&mut self, buf: &mut [T], offset: u64) -> Result<()> {
        let mut raw = vec![0u8; buf.len() * T::WIDTH];
        self.read_bytes_at(&mut raw, offset * T::WIDTH as u64)?;
        for (value, chunk) in buf.iter_mut().zip(raw.chunks_exact(T::WIDTH)) {
            *value = T::get(chunk);
        }
        Ok(())
    }

    /// Write `values.len()` elements starting at element `offset`.
    pub fn write<T: Element>(&mut self, values: &[T], offset: u64) -> Result<()> {
        let raw = crate::types::encode_slice(values);
        self.write_bytes_at(&raw, offset * T::WIDTH as u64)
    }

    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size as usize];
        self.read_bytes_at(&mut buf, 0)?;
        Ok(buf)
    }

    /// Read one newline-delimited line at the sequential cursor. `None`
    /// signals end of the item. A line longer than [`MAX_LINE`] is a
    /// [`MiriadError::BufferTooSmall`] fault.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        if self.pos >= self.size {
            return Ok(None);
        }
        let avail = (self.size - self.pos).min(MAX_LINE as u64) as usize;
        let mut chunk = vec![0u8; avail];
        self.read_bytes_at(&mut chunk, self.pos)?;
        match chunk.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                self.pos += idx as u64 + 1;
                let line = String::from_utf8_lossy(&chunk[..idx]).into_owned();
                Ok(Some(line))
            }
            None if (self.pos + avail as u64) == self.size => {
                // Final line without a terminator.
                self.pos = self.size;
                Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
            }
            None => Err(MiriadError::BufferTooSmall {
                needed: avail + 1,
                capacity: MAX_LINE,
            }),
        }
    }

    /// Append one newline-terminated line at the sequential cursor.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if line.len() + 1 > MAX_LINE {
            return Err(MiriadError::BufferTooSmall {
                needed: line.len() + 1,
                capacity: MAX_LINE,
            });
        }
        if line.contains('\n') {
            return Err(MiriadError::validation(
                "text lines may not contain embedded newlines",
            ));
        }
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_bytes_at(&bytes, self.pos)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// Push pending file-backed writes to the OS. Buffered small items reach
    /// disk when the owning dataset flushes its packed table.
    pub fn flush(&mut self) -> Result<()> {
        if let Storage::File(file) = &mut self.storage {
            file.sync_all()?;
        }
        Ok(())
    }

    fn retire(&mut self) -> Result<()> {
        if self.retired {
            return Ok(());
        }
        self.retired = true;
        if self.mode == ItemMode::Read {
            return Ok(());
        }
        match &mut self.storage {
            Storage::Buffer(buffer) => {
                let payload = std::mem::take(buffer);
                self.table.lock().insert(self.name.clone(), payload);
                // A file from an earlier, larger incarnation must not shadow
                // the packed copy.
                let stale = self.dataset_path.join(&self.name);
                if stale.is_file() {
                    fs::remove_file(stale)?;
                }
            }
            Storage::File(file) => {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Release the handle. For written items this retires small content into
    /// the dataset's packed table and makes file-backed content durable.
    pub fn close(mut self) -> Result<()> {
        self.retire()
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        if let Err(err) = self.retire() {
            tracing::warn!(item = %self.name, %err, "failed to retire item on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AccessMode, Dataset};
    use num_complex::Complex32;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Dataset) {
        let dir = TempDir::new().unwrap();
        let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
        (dir, ds)
    }

    #[test]
    fn test_small_item_lives_in_packed_table() {
        let (_dir, ds) = scratch();

        let mut item = ds.access("niters", ItemMode::Write).unwrap();
        item.write(&[5i32], 0).unwrap();
        item.close().unwrap();

        // Small items must not become standalone files.
        assert!(!ds.path().join("niters").exists());
        assert!(ds.has_item("niters"));
        assert_eq!(ds.item_size("niters").unwrap(), 4);

        let mut item = ds.access("niters", ItemMode::Read).unwrap();
        let mut back = [0i32];
        item.read(&mut back, 0).unwrap();
        assert_eq!(back, [5]);
    }

    #[test]
    fn test_large_item_spills_to_file() {
        let (_dir, ds) = scratch();

        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut item = ds.access("visdata", ItemMode::Write).unwrap();
        item.write(&data, 0).unwrap();
        item.close().unwrap();

        assert!(ds.path().join("visdata").exists());
        assert_eq!(ds.item_size("visdata").unwrap(), 400);

        let mut item = ds.access("visdata", ItemMode::Read).unwrap();
        let mut back = vec![0f32; 100];
        item.read(&mut back, 0).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_element_strided_offsets() {
        let (_dir, ds) = scratch();

        let mut item = ds.access("scr", ItemMode::Write).unwrap();
        item.write(&(0..32i32).collect::<Vec<_>>(), 0).unwrap();
        item.close().unwrap();

        let mut item = ds.access("scr", ItemMode::Read).unwrap();
        let mut back = [0i32; 4];
        // Element offset 10, not byte offset 10.
        item.read(&mut back, 10).unwrap();
        assert_eq!(back, [10, 11, 12, 13]);
    }

    #[test]
    fn test_read_past_high_water_faults() {
        let (_dir, ds) = scratch();

        let mut item = ds.access("scr", ItemMode::Write).unwrap();
        item.write(&[1.0f64, 2.0], 0).unwrap();

        let mut back = [0f64; 3];
        assert!(matches!(
            item.read(&mut back, 0),
            Err(MiriadError::IoFault { .. })
        ));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (_dir, ds) = scratch();
        ds.access("x", ItemMode::Write)
            .unwrap()
            .write(&[1u8], 0)
            .unwrap();

        let mut item = ds.access("x", ItemMode::Read).unwrap();
        assert!(matches!(
            item.write(&[2u8], 0),
            Err(MiriadError::Validation(_))
        ));
    }

    #[test]
    fn test_complex_round_trip() {
        let (_dir, ds) = scratch();

        let values = vec![Complex32::new(1.5, -2.5); 12];
        let mut item = ds.access("corr", ItemMode::Write).unwrap();
        item.write(&values, 0).unwrap();
        item.close().unwrap();

        let mut back = vec![Complex32::default(); 12];
        ds.access("corr", ItemMode::Read)
            .unwrap()
            .read(&mut back, 0)
            .unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_text_lines() {
        let (_dir, ds) = scratch();

        let mut item = ds.access("log", ItemMode::Write).unwrap();
        item.write_line("first line").unwrap();
        item.write_line("second line").unwrap();
        item.close().unwrap();

        let mut item = ds.access("log", ItemMode::Read).unwrap();
        assert_eq!(item.read_line().unwrap().as_deref(), Some("first line"));
        assert_eq!(item.read_line().unwrap().as_deref(), Some("second line"));
        assert_eq!(item.read_line().unwrap(), None);
    }

    #[test]
    fn test_overlong_line_rejected() {
        let (_dir, ds) = scratch();
        let mut item = ds.access("log", ItemMode::Write).unwrap();
        let long = "x".repeat(MAX_LINE);
        assert!(matches!(
            item.write_line(&long),
            Err(MiriadError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_append_mode_continues_at_end() {
        let (_dir, ds) = scratch();

        ds.access("log", ItemMode::Write)
            .unwrap()
            .write_line("one")
            .unwrap();

        let mut item = ds.access("log", ItemMode::Append).unwrap();
        item.write_line("two").unwrap();
        item.close().unwrap();

        let mut item = ds.access("log", ItemMode::Read).unwrap();
        assert_eq!(item.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(item.read_line().unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_rewrite_replaces_spilled_file() {
        let (_dir, ds) = scratch();

        // First incarnation is large and spills to a file.
        ds.access("tab", ItemMode::Write)
            .unwrap()
            .write(&vec![7u8; 200], 0)
            .unwrap();
        assert!(ds.path().join("tab").exists());

        // Second incarnation stays small; the file must go away.
        ds.access("tab", ItemMode::Write)
            .unwrap()
            .write(&[1u8, 2, 3], 0)
            .unwrap();
        assert!(!ds.path().join("tab").exists());
        assert_eq!(ds.item_size("tab").unwrap(), 3);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.mir");

        {
            let ds = Dataset::open(&path, AccessMode::New).unwrap();
            ds.access("niters", ItemMode::Write)
                .unwrap()
                .write(&[5i32], 0)
                .unwrap();
            ds.close().unwrap();
        }

        let ds = Dataset::open(&path, AccessMode::Old).unwrap();
        let mut back = [0i32];
        ds.access("niters", ItemMode::Read)
            .unwrap()
            .read(&mut back, 0)
            .unwrap();
        assert_eq!(back, [5]);
    }
}
