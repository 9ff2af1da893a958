//! Mask codec: a bit-per-sample flag stream with two buffer encodings.
//!
//! The stored form is always packed bits: the 4-byte integer item tag, then
//! 32-bit big-endian words filled LSB-first. What varies is the shape of the
//! caller's buffer:
//!
//! - [`MaskEncoding::Expanded`]: one 0/1 value per bit.
//! - [`MaskEncoding::RunLength`]: alternating run lengths, **first run
//!   counting good (1) bits**. The leading run may be zero when the stream
//!   opens with bad samples. The convention is enforced symmetrically by
//!   encode and decode.
//!
//! Reads and writes are addressed by bit offset and bit count, and every
//! call transcodes against the packed stored form; encodings never mix
//! within one call. A bit that was never written reads good, whether or
//! not storage has reached its word yet.

use crate::dataset::Dataset;
use crate::error::{MiriadError, Result};
use crate::item::{Item, ItemMode};
use crate::types::TypeTag;

const WORD_BITS: u64 = 32;
const DATA_START: u64 = 4;

/// Buffer encoding for mask reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskEncoding {
    /// One buffer element per flag bit.
    Expanded,
    /// Alternating run lengths, good bits first.
    RunLength,
}

/// Open session on one flag item.
pub struct MaskItem {
    item: Item,
}

impl MaskItem {
    /// Open a flag item. A fresh item is stamped with the integer type tag;
    /// an existing one must carry it. Failure to create or open the backing
    /// item is an I/O fault here, never a silent sentinel.
    pub fn open(dataset: &Dataset, name: &str, mode: ItemMode) -> Result<Self> {
        let mut item = dataset.access(name, mode)?;
        if item.size() == 0 {
            if mode == ItemMode::Read {
                return Err(MiriadError::fault(format!(
                    "mask item {name:?} is empty"
                )));
            }
            item.write(&[TypeTag::Int32.code()], 0)?;
        } else {
            let mut tag = [0i32];
            item.read(&mut tag, 0)?;
            if tag[0] != TypeTag::Int32.code() {
                return Err(MiriadError::fault(format!(
                    "mask item {name:?} carries type code {}, not integer",
                    tag[0]
                )));
            }
        }
        Ok(MaskItem { item })
    }

    /// Number of bits the stored words can hold. Word-granular; the owning
    /// engine tracks the exact logical bit count.
    pub fn capacity_bits(&self) -> u64 {
        let data_bytes = self.item.size().saturating_sub(DATA_START);
        (data_bytes / 4) * WORD_BITS
    }

    fn stored_words(&self) -> u64 {
        self.item.size().saturating_sub(DATA_START) / 4
    }

    /// Words not yet in storage read as all-ones: a bit that was never
    /// written is good.
    fn read_words(&mut self, first_word: u64, n_words: usize) -> Result<Vec<u32>> {
        let mut words = vec![u32::MAX; n_words];
        let stored_words = self.stored_words();
        for (i, word) in words.iter_mut().enumerate() {
            let w = first_word + i as u64;
            if w >= stored_words {
                break;
            }
            let mut raw = [0i32];
            self.item.read(&mut raw, 1 + w)?;
            *word = raw[0] as u32;
        }
        Ok(words)
    }

    fn read_bits(&mut self, offset: u64, n: usize) -> Result<Vec<bool>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let first_word = offset / WORD_BITS;
        let last_word = (offset + n as u64 - 1) / WORD_BITS;
        let words = self.read_words(first_word, (last_word - first_word + 1) as usize)?;
        let mut bits = Vec::with_capacity(n);
        for i in 0..n as u64 {
            let bit = offset + i;
            let word = words[(bit / WORD_BITS - first_word) as usize];
            bits.push(word >> (bit % WORD_BITS) & 1 == 1);
        }
        Ok(bits)
    }

    fn write_bits(&mut self, offset: u64, bits: &[bool]) -> Result<()> {
        if bits.is_empty() {
            return Ok(());
        }
        let first_word = offset / WORD_BITS;
        let last_word = (offset + bits.len() as u64 - 1) / WORD_BITS;
        // A write past the end must not leave a zero-filled gap: words the
        // item would otherwise allocate as zeros get stamped all-ones first,
        // keeping never-written bits good.
        let stored = self.stored_words();
        if first_word > stored {
            let fill = vec![-1i32; (first_word - stored) as usize];
            self.item.write(&fill, 1 + stored)?;
        }
        // Read-modify-write whole words so neighboring bits survive.
        let mut words = self.read_words(first_word, (last_word - first_word + 1) as usize)?;
        for (i, &bit) in bits.iter().enumerate() {
            let pos = offset + i as u64;
            let word = &mut words[(pos / WORD_BITS - first_word) as usize];
            let mask = 1u32 << (pos % WORD_BITS);
            if bit {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
        let raw: Vec<i32> = words.iter().map(|&w| w as i32).collect();
        self.item.write(&raw, 1 + first_word)
    }

    /// Read `n_bits` flags starting at `offset_bits` into `buf` under the
    /// requested encoding. Returns the number of buffer elements filled:
    /// flag values for `Expanded`, run lengths for `RunLength`. Fewer bits
    /// than requested means the stored stream ended.
    pub fn read(
        &mut self,
        encoding: MaskEncoding,
        offset_bits: u64,
        n_bits: usize,
        buf: &mut [i32],
    ) -> Result<usize> {
        let capacity = self.capacity_bits();
        let available = capacity.saturating_sub(offset_bits).min(n_bits as u64) as usize;
        match encoding {
            MaskEncoding::Expanded => {
                let n = available.min(buf.len());
                let bits = self.read_bits(offset_bits, n)?;
                for (slot, bit) in buf.iter_mut().zip(&bits) {
                    *slot = *bit as i32;
                }
                Ok(n)
            }
            MaskEncoding::RunLength => {
                let bits = self.read_bits(offset_bits, available)?;
                let runs = bits_to_runs(&bits);
                if runs.len() > buf.len() {
                    return Err(MiriadError::BufferTooSmall {
                        needed: runs.len(),
                        capacity: buf.len(),
                    });
                }
                buf[..runs.len()].copy_from_slice(&runs);
                Ok(runs.len())
            }
        }
    }

    /// Write `n_bits` flags starting at `offset_bits` from `buf` under the
    /// requested encoding. For `RunLength` the buffer must decode to at
    /// least `n_bits` flags; excess runs beyond the requested count are
    /// ignored.
    pub fn write(
        &mut self,
        encoding: MaskEncoding,
        offset_bits: u64,
        n_bits: usize,
        buf: &[i32],
    ) -> Result<()> {
        let bits = match encoding {
            MaskEncoding::Expanded => {
                if buf.len() < n_bits {
                    return Err(MiriadError::BufferTooSmall {
                        needed: n_bits,
                        capacity: buf.len(),
                    });
                }
                buf[..n_bits].iter().map(|&v| v != 0).collect::<Vec<_>>()
            }
            MaskEncoding::RunLength => runs_to_bits(buf, n_bits)?,
        };
        self.write_bits(offset_bits, &bits)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.item.flush()
    }

    pub fn close(self) -> Result<()> {
        self.item.close()
    }
}

/// Encode a bit sequence as alternating run lengths, good bits first. The
/// leading run is zero when the sequence starts with a bad bit.
pub(crate) fn bits_to_runs(bits: &[bool]) -> Vec<i32> {
    let mut runs = Vec::new();
    let mut current = true;
    let mut count = 0i32;
    for &bit in bits {
        if bit == current {
            count += 1;
        } else {
            runs.push(count);
            current = bit;
            count = 1;
        }
    }
    if count > 0 || !bits.is_empty() {
        runs.push(count);
    }
    runs
}

/// Decode alternating run lengths (good bits first) into exactly `n_bits`
/// flags. Decoding stops once `n_bits` values are produced; runs that sum
/// short of `n_bits` are a validation fault.
pub(crate) fn runs_to_bits(runs: &[i32], n_bits: usize) -> Result<Vec<bool>> {
    let mut bits = Vec::with_capacity(n_bits);
    let mut value = true;
    for &run in runs {
        if run < 0 {
            return Err(MiriadError::validation(format!(
                "negative run length {run}"
            )));
        }
        for _ in 0..run {
            if bits.len() == n_bits {
                return Ok(bits);
            }
            bits.push(value);
        }
        value = !value;
        if bits.len() == n_bits {
            return Ok(bits);
        }
    }
    if bits.len() < n_bits {
        return Err(MiriadError::validation(format!(
            "run buffer decodes to {} bits, {} requested",
            bits.len(),
            n_bits
        )));
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AccessMode, Dataset};
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Dataset) {
        let dir = TempDir::new().unwrap();
        let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
        (dir, ds)
    }

    #[test]
    fn test_documented_run_convention() {
        let bits: Vec<bool> = [1, 1, 1, 0, 0, 1, 1, 1, 1, 1]
            .iter()
            .map(|&v| v == 1)
            .collect();
        assert_eq!(bits_to_runs(&bits), vec![3, 2, 5]);
        assert_eq!(runs_to_bits(&[3, 2, 5], 10).unwrap(), bits);
    }

    #[test]
    fn test_bad_first_stream_gets_zero_leading_run() {
        let bits = [false, false, true];
        assert_eq!(bits_to_runs(&bits), vec![0, 2, 1]);
        assert_eq!(runs_to_bits(&[0, 2, 1], 3).unwrap(), bits);
    }

    #[test]
    fn test_runs_short_of_requested_bits_fault() {
        assert!(matches!(
            runs_to_bits(&[2, 1], 10),
            Err(MiriadError::Validation(_))
        ));
    }

    #[test]
    fn test_expanded_round_trip() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        let flags: Vec<i32> = (0..100).map(|i| (i % 3 != 0) as i32).collect();
        mask.write(MaskEncoding::Expanded, 0, 100, &flags).unwrap();

        let mut back = vec![0i32; 100];
        let n = mask.read(MaskEncoding::Expanded, 0, 100, &mut back).unwrap();
        assert_eq!(n, 100);
        assert_eq!(back, flags);
    }

    #[test]
    fn test_encodings_agree() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        // Write through runs, read back expanded.
        mask.write(MaskEncoding::RunLength, 0, 10, &[3, 2, 5]).unwrap();
        let mut expanded = vec![0i32; 10];
        mask.read(MaskEncoding::Expanded, 0, 10, &mut expanded).unwrap();
        assert_eq!(expanded, vec![1, 1, 1, 0, 0, 1, 1, 1, 1, 1]);

        // And the reverse direction.
        let mut runs = vec![0i32; 8];
        let n = mask.read(MaskEncoding::RunLength, 0, 10, &mut runs).unwrap();
        assert_eq!(&runs[..n], &[3, 2, 5]);
    }

    #[test]
    fn test_offset_addressing_preserves_neighbors() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        mask.write(MaskEncoding::Expanded, 0, 64, &vec![1i32; 64]).unwrap();
        // Clear a span straddling the word boundary.
        mask.write(MaskEncoding::Expanded, 30, 4, &[0, 0, 0, 0]).unwrap();

        let mut back = vec![0i32; 64];
        mask.read(MaskEncoding::Expanded, 0, 64, &mut back).unwrap();
        for (i, &flag) in back.iter().enumerate() {
            let expect = !(30..34).contains(&i) as i32;
            assert_eq!(flag, expect, "bit {i}");
        }
    }

    #[test]
    fn test_unwritten_bits_read_good() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        // Flag the first four samples bad and touch nothing else.
        mask.write(MaskEncoding::Expanded, 0, 4, &[0, 0, 0, 0]).unwrap();

        // The rest of the word was never written and stays good.
        let mut back = vec![0i32; 28];
        let n = mask.read(MaskEncoding::Expanded, 4, 28, &mut back).unwrap();
        assert_eq!(n, 28);
        assert!(back.iter().all(|&f| f == 1));

        // A write that skips ahead leaves the gap words good too.
        mask.write(MaskEncoding::Expanded, 96, 2, &[0, 0]).unwrap();
        let mut back = vec![0i32; 64];
        let n = mask.read(MaskEncoding::Expanded, 32, 64, &mut back).unwrap();
        assert_eq!(n, 64);
        assert!(back.iter().all(|&f| f == 1));
    }

    #[test]
    fn test_short_read_at_end_of_stream() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();
        mask.write(MaskEncoding::Expanded, 0, 32, &vec![1i32; 32]).unwrap();

        let mut back = vec![0i32; 64];
        let n = mask.read(MaskEncoding::Expanded, 0, 64, &mut back).unwrap();
        assert_eq!(n, 32);
    }

    #[test]
    fn test_run_buffer_too_small_on_read() {
        let (_dir, ds) = scratch();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        let flags: Vec<i32> = (0..32).map(|i| (i % 2) as i32).collect();
        mask.write(MaskEncoding::Expanded, 0, 32, &flags).unwrap();

        let mut runs = vec![0i32; 4];
        assert!(matches!(
            mask.read(MaskEncoding::RunLength, 0, 32, &mut runs),
            Err(MiriadError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_read_mode_requires_existing() {
        let (_dir, ds) = scratch();
        assert!(MaskItem::open(&ds, "flags", ItemMode::Read).is_err());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.mir");
        {
            let ds = Dataset::open(&path, AccessMode::New).unwrap();
            let mut mask = MaskItem::open(&ds, "mask", ItemMode::Write).unwrap();
            mask.write(MaskEncoding::RunLength, 0, 10, &[3, 2, 5]).unwrap();
            mask.close().unwrap();
            ds.close().unwrap();
        }

        let ds = Dataset::open(&path, AccessMode::Old).unwrap();
        let mut mask = MaskItem::open(&ds, "mask", ItemMode::Append).unwrap();
        let mut back = vec![0i32; 10];
        let n = mask.read(MaskEncoding::Expanded, 0, 10, &mut back).unwrap();
        assert_eq!(n, 10);
        assert_eq!(back, vec![1, 1, 1, 0, 0, 1, 1, 1, 1, 1]);
    }
}
