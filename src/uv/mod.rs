//! Visibility stream engine.
//!
//! A UV dataset carries three items:
//!
//! ```text
//! vartable   one text line per variable: "<type-char> <name>"
//! visdata    the record stream, a sequence of control entries:
//!
//!            +----------------+---------+-----+----------------------+
//!            | var index (u16)| kind u8 | pad | payload              |
//!            +----------------+---------+-----+----------------------+
//!            kind SIZE  payload = u32 byte length of the variable
//!            kind DATA  payload = value bytes, padded to 4 bytes
//!            kind EOR   no payload, closes one record
//!
//! flags      one bit per correlation in record order (mask codec)
//! ```
//!
//! Values ride in the variables: a record is "the set of variables that
//! changed", terminated by EOR. The conventional variables `coord` (u,v and
//! optionally w, in f64), `time` (f64), `baseline` (f64) and `corr`
//! (complex) make up the preamble and sample array that [`UvStream::read`]
//! and [`UvStream::write`] assemble. End of the item at an entry boundary
//! is end of stream, surfaced as a zero count, never as an error.

mod tracker;
mod vartable;

pub use tracker::TrackerId;
pub use vartable::VarProbe;

use num_complex::Complex32;

use crate::dataset::{AccessMode, Dataset};
use crate::error::{MiriadError, Result};
use crate::item::{Item, ItemMode};
use crate::mask::{MaskEncoding, MaskItem};
use crate::types::{decode_slice, encode_slice, round_up, Element, TypeTag};

use tracker::Tracker;
use vartable::VarTable;

const VARTABLE_ITEM: &str = "vartable";
const VISDATA_ITEM: &str = "visdata";
const FLAGS_ITEM: &str = "flags";

const KIND_SIZE: u8 = 1;
const KIND_DATA: u8 = 2;
const KIND_EOR: u8 = 3;

const ENTRY_ALIGN: usize = 4;

/// Outcome of [`UvStream::scan`]: end of the stream is a distinguished
/// non-fault result, never an `IoFault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The requested variable was refreshed by a record.
    Updated,
    /// The stream ended before the variable changed again.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Opened or rewound; no record under the cursor.
    Open,
    /// A record has been consumed and its variables are current.
    Positioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectObject {
    Time,
    Antennae,
    Polarization,
    Window,
}

impl SelectObject {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "time" => Ok(SelectObject::Time),
            "antennae" => Ok(SelectObject::Antennae),
            "polarization" => Ok(SelectObject::Polarization),
            "window" => Ok(SelectObject::Window),
            other => Err(MiriadError::validation(format!(
                "unrecognized selection object {other:?}"
            ))),
        }
    }
}

struct SelectClause {
    object: SelectObject,
    p1: f64,
    p2: f64,
    include: bool,
}

/// Sequential cursor over one visibility dataset.
pub struct UvStream {
    dataset: Dataset,
    /// Kept open on writable streams for appending declarations.
    vartable: Option<Item>,
    visdata: Item,
    flags: Option<MaskItem>,
    vars: VarTable,
    state: StreamState,
    readable: bool,
    writable: bool,
    /// Byte cursor into `visdata` for the next entry to read.
    pos: u64,
    /// Byte position where the next written entry lands.
    write_pos: u64,
    /// Bit cursor for sequential flag reads, advanced per record.
    flag_cursor: u64,
    flag_write_cursor: u64,
    /// Flag span of the most recently consumed record.
    last_flags: Option<(u64, usize)>,
    /// 4 for a u,v preamble, 5 for u,v,w.
    preamble_len: usize,
    selections: Vec<SelectClause>,
    trackers: Vec<Tracker>,
}

impl UvStream {
    /// Open a visibility stream. `New` creates the dataset for writing,
    /// `Old` opens an existing one for reading, `Append` extends an
    /// existing one with further records.
    pub fn open<P: AsRef<std::path::Path>>(path: P, mode: AccessMode) -> Result<Self> {
        let stream = match mode {
            AccessMode::New => {
                let dataset = Dataset::open(path, AccessMode::New)?;
                let vartable = dataset.access(VARTABLE_ITEM, ItemMode::Write)?;
                let visdata = dataset.access(VISDATA_ITEM, ItemMode::Write)?;
                UvStream {
                    dataset,
                    vartable: Some(vartable),
                    visdata,
                    flags: None,
                    vars: VarTable::new(),
                    state: StreamState::Open,
                    readable: false,
                    writable: true,
                    pos: 0,
                    write_pos: 0,
                    flag_cursor: 0,
                    flag_write_cursor: 0,
                    last_flags: None,
                    preamble_len: 4,
                    selections: Vec::new(),
                    trackers: Vec::new(),
                }
            }
            AccessMode::Old => {
                let dataset = Dataset::open(path, AccessMode::Old)?;
                let mut table_item = dataset.access(VARTABLE_ITEM, ItemMode::Read)?;
                let vars = VarTable::load(&mut table_item)?;
                table_item.close()?;
                let visdata = dataset.access(VISDATA_ITEM, ItemMode::Read)?;
                let flags = if dataset.has_item(FLAGS_ITEM) {
                    Some(MaskItem::open(&dataset, FLAGS_ITEM, ItemMode::Append)?)
                } else {
                    None
                };
                UvStream {
                    dataset,
                    vartable: None,
                    visdata,
                    flags,
                    vars,
                    state: StreamState::Open,
                    readable: true,
                    writable: false,
                    pos: 0,
                    write_pos: 0,
                    flag_cursor: 0,
                    flag_write_cursor: 0,
                    last_flags: None,
                    preamble_len: 4,
                    selections: Vec::new(),
                    trackers: Vec::new(),
                }
            }
            AccessMode::Append => {
                let dataset = Dataset::open(path, AccessMode::Append)?;
                let mut table_item = dataset.access(VARTABLE_ITEM, ItemMode::Read)?;
                let vars = VarTable::load(&mut table_item)?;
                table_item.close()?;
                let vartable = dataset.access(VARTABLE_ITEM, ItemMode::Append)?;
                let visdata = dataset.access(VISDATA_ITEM, ItemMode::Append)?;
                let flags = if dataset.has_item(FLAGS_ITEM) {
                    Some(MaskItem::open(&dataset, FLAGS_ITEM, ItemMode::Append)?)
                } else {
                    None
                };
                let mut stream = UvStream {
                    write_pos: visdata.size(),
                    dataset,
                    vartable: Some(vartable),
                    visdata,
                    flags,
                    vars,
                    state: StreamState::Open,
                    readable: false,
                    writable: true,
                    pos: 0,
                    flag_cursor: 0,
                    flag_write_cursor: 0,
                    last_flags: None,
                    preamble_len: 4,
                    selections: Vec::new(),
                    trackers: Vec::new(),
                };
                // Replay the existing records so lengths, current values
                // and the flag cursor line up with what is on disk.
                while stream.advance_record()? {}
                stream.flag_write_cursor = stream.flag_cursor;
                stream.vars.clear_updated();
                stream.state = StreamState::Open;
                stream.last_flags = None;
                stream
            }
        };
        tracing::debug!(path = %stream.dataset.path().display(), ?mode, "opened uv stream");
        Ok(stream)
    }

    /// The dataset backing this stream, for header and history access.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Whether a record is currently under the cursor.
    pub fn positioned(&self) -> bool {
        self.state == StreamState::Positioned
    }

    // Record cursor

    fn require_readable(&self) -> Result<()> {
        if self.readable {
            Ok(())
        } else {
            Err(MiriadError::validation(
                "stream was opened for writing, not reading",
            ))
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(MiriadError::validation(
                "stream was opened for reading, not writing",
            ))
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], pos: u64) -> Result<()> {
        self.visdata.read(buf, pos)
    }

    /// Consume one record from `visdata`, refreshing variable values and
    /// the flag cursor. `Ok(false)` means a clean end of stream.
    fn advance_record(&mut self) -> Result<bool> {
        let size = self.visdata.size();
        if self.pos == size {
            return Ok(false);
        }
        loop {
            if self.pos + 4 > size {
                return Err(MiriadError::fault(format!(
                    "visdata truncated mid-entry at byte {}",
                    self.pos
                )));
            }
            let mut word = [0u8; 4];
            self.read_exact(&mut word, self.pos)?;
            let var_index = u16::from_be_bytes([word[0], word[1]]) as usize;
            let kind = word[2];
            self.pos += 4;
            match kind {
                KIND_SIZE => {
                    let mut len = [0u8; 4];
                    self.read_exact(&mut len, self.pos)?;
                    self.pos += 4;
                    let nbytes = u32::from_be_bytes(len) as usize;
                    let var = self.vars.get_mut(var_index)?;
                    if nbytes % var.tag.width() != 0 {
                        return Err(MiriadError::fault(format!(
                            "variable {:?} declared {nbytes} bytes, not a multiple of {}",
                            var.name,
                            var.tag.width()
                        )));
                    }
                    var.declared = Some(nbytes);
                }
                KIND_DATA => {
                    let nbytes = {
                        let var = self.vars.get(var_index)?;
                        var.declared.ok_or_else(|| {
                            MiriadError::fault(format!(
                                "data for {:?} before any size declaration",
                                var.name
                            ))
                        })?
                    };
                    let mut payload = vec![0u8; nbytes];
                    self.read_exact(&mut payload, self.pos)?;
                    self.pos += round_up(nbytes, ENTRY_ALIGN) as u64;
                    let var = self.vars.get_mut(var_index)?;
                    var.data = payload;
                    var.updated = true;
                }
                KIND_EOR => {
                    let ncorr = self
                        .vars
                        .lookup("corr")
                        .map(|idx| self.vars.get(idx).map(|v| v.declared.unwrap_or(0) / 8))
                        .transpose()?
                        .unwrap_or(0);
                    self.last_flags = Some((self.flag_cursor, ncorr));
                    self.flag_cursor += ncorr as u64;
                    return Ok(true);
                }
                other => {
                    return Err(MiriadError::fault(format!(
                        "unrecognized visdata entry kind {other}"
                    )));
                }
            }
        }
    }

    fn scalar_f64(&self, name: &str) -> Option<f64> {
        let var = self.vars.get(self.vars.lookup(name)?).ok()?;
        if var.tag == TypeTag::Real64 && var.data.len() >= 8 {
            Some(f64::get(&var.data[..8]))
        } else {
            None
        }
    }

    fn scalar_i32(&self, name: &str) -> Option<i32> {
        let var = self.vars.get(self.vars.lookup(name)?).ok()?;
        if var.tag == TypeTag::Int32 && var.data.len() >= 4 {
            Some(i32::get(&var.data[..4]))
        } else {
            None
        }
    }

    fn clause_matches(&self, clause: &SelectClause) -> bool {
        match clause.object {
            SelectObject::Time => match self.scalar_f64("time") {
                Some(t) => t >= clause.p1 && t < clause.p2,
                None => false,
            },
            SelectObject::Antennae => match self.scalar_f64("baseline") {
                Some(bl) => {
                    let ant1 = (bl / 256.0).floor();
                    let ant2 = bl - ant1 * 256.0;
                    if clause.p2 > 0.0 {
                        (ant1 == clause.p1 && ant2 == clause.p2)
                            || (ant1 == clause.p2 && ant2 == clause.p1)
                    } else {
                        ant1 == clause.p1 || ant2 == clause.p1
                    }
                }
                None => false,
            },
            SelectObject::Polarization => match self.scalar_i32("pol") {
                Some(p) => p == clause.p1 as i32,
                None => false,
            },
            SelectObject::Window => match self.scalar_i32("win") {
                Some(w) => (w as f64) >= clause.p1 && (w as f64) <= clause.p2,
                None => false,
            },
        }
    }

    fn record_selected(&self) -> bool {
        for object in [
            SelectObject::Time,
            SelectObject::Antennae,
            SelectObject::Polarization,
            SelectObject::Window,
        ] {
            let mut any_include = false;
            let mut include_hit = false;
            for clause in self.selections.iter().filter(|c| c.object == object) {
                if clause.include {
                    any_include = true;
                    include_hit |= self.clause_matches(clause);
                } else if self.clause_matches(clause) {
                    return false;
                }
            }
            if any_include && !include_hit {
                return false;
            }
        }
        true
    }

    /// Advance to the next record that passes the selection clauses,
    /// refreshing the per-variable updated flags. `Ok(false)` is end of
    /// stream.
    pub fn next(&mut self) -> Result<bool> {
        self.require_readable()?;
        self.vars.clear_updated();
        loop {
            if !self.advance_record()? {
                return Ok(false);
            }
            if self.record_selected() {
                self.state = StreamState::Positioned;
                return Ok(true);
            }
        }
    }

    /// Reset the cursor to the first record.
    pub fn rewind(&mut self) -> Result<()> {
        self.require_readable()?;
        self.pos = 0;
        self.flag_cursor = 0;
        self.last_flags = None;
        self.vars.clear_updated();
        self.state = StreamState::Open;
        Ok(())
    }

    /// Read the next selected record. Fills `preamble` (4 or 5 doubles per
    /// the configured layout), up to `n` correlations into `data`, and the
    /// matching flag values. The returned count is zero exactly when the
    /// stream is exhausted; that zero is the only end signal.
    pub fn read(
        &mut self,
        preamble: &mut [f64],
        data: &mut [Complex32],
        flags: &mut [i32],
        n: usize,
    ) -> Result<usize> {
        if preamble.len() < self.preamble_len {
            return Err(MiriadError::BufferTooSmall {
                needed: self.preamble_len,
                capacity: preamble.len(),
            });
        }
        if !self.next()? {
            return Ok(0);
        }
        let (flag_offset, ncorr) = self.last_flags.unwrap_or((0, 0));
        if n < ncorr || data.len() < ncorr || flags.len() < ncorr {
            return Err(MiriadError::BufferTooSmall {
                needed: ncorr,
                capacity: n.min(data.len()).min(flags.len()),
            });
        }

        let ncoord = self.preamble_len - 2;
        preamble[..self.preamble_len].fill(0.0);
        if let Some(idx) = self.vars.lookup("coord") {
            let var = self.vars.get(idx)?;
            let coords: Vec<f64> = decode_slice(&var.data)?;
            for (slot, value) in preamble[..ncoord].iter_mut().zip(&coords) {
                *slot = *value;
            }
        }
        preamble[ncoord] = self.scalar_f64("time").unwrap_or(0.0);
        preamble[ncoord + 1] = self.scalar_f64("baseline").unwrap_or(0.0);

        if ncorr > 0 {
            let idx = self.vars.lookup("corr").ok_or_else(|| {
                MiriadError::fault("record accounts correlations but has no corr variable")
            })?;
            let var = self.vars.get(idx)?;
            let samples: Vec<Complex32> = decode_slice(&var.data)?;
            data[..ncorr].copy_from_slice(&samples[..ncorr]);

            match &mut self.flags {
                Some(mask) => {
                    let got =
                        mask.read(MaskEncoding::Expanded, flag_offset, ncorr, &mut flags[..ncorr])?;
                    flags[got..ncorr].fill(1);
                }
                None => flags[..ncorr].fill(1),
            }
        }
        Ok(ncorr)
    }

    // Writing

    fn flags_for_write(&mut self) -> Result<&mut MaskItem> {
        if self.flags.is_none() {
            self.flags = Some(MaskItem::open(&self.dataset, FLAGS_ITEM, ItemMode::Write)?);
        }
        Ok(self.flags.as_mut().unwrap())
    }

    fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.visdata.write(bytes, self.write_pos)?;
        self.write_pos += bytes.len() as u64;
        Ok(())
    }

    fn emit_var(&mut self, idx: usize) -> Result<()> {
        let (need_size, nbytes, payload) = {
            let var = self.vars.get(idx)?;
            let need_size = var.declared != Some(var.data.len());
            (need_size, var.data.len(), var.data.clone())
        };
        let index = (idx as u16).to_be_bytes();
        if need_size {
            let mut entry = Vec::with_capacity(8);
            entry.extend_from_slice(&index);
            entry.push(KIND_SIZE);
            entry.push(0);
            entry.extend_from_slice(&(nbytes as u32).to_be_bytes());
            self.emit_bytes(&entry)?;
        }
        let padded = round_up(nbytes, ENTRY_ALIGN);
        let mut entry = Vec::with_capacity(4 + padded);
        entry.extend_from_slice(&index);
        entry.push(KIND_DATA);
        entry.push(0);
        entry.extend_from_slice(&payload);
        entry.resize(4 + padded, 0);
        self.emit_bytes(&entry)?;

        let var = self.vars.get_mut(idx)?;
        var.declared = Some(nbytes);
        var.dirty = false;
        Ok(())
    }

    fn emit_pending(&mut self) -> Result<()> {
        for idx in 0..self.vars.len() {
            if self.vars.get(idx)?.dirty {
                self.emit_var(idx)?;
            }
        }
        Ok(())
    }

    fn put_raw(&mut self, name: &str, tag: TypeTag, bytes: Vec<u8>) -> Result<()> {
        self.require_writable()?;
        let idx = self.vars.define_in(name, tag, self.vartable.as_mut())?;
        let var = self.vars.get_mut(idx)?;
        // An unchanged value is not re-emitted; records carry only what
        // changed since the previous record.
        if var.declared.is_some() && !var.dirty && var.data == bytes {
            return Ok(());
        }
        var.data = bytes;
        var.dirty = true;
        Ok(())
    }

    /// Write one record: preamble variables, `n` correlations, `n` flag
    /// bits, then an end-of-record mark. Always consumes exactly `n`
    /// elements.
    pub fn write(
        &mut self,
        preamble: &[f64],
        data: &[Complex32],
        flags: &[i32],
        n: usize,
    ) -> Result<()> {
        self.require_writable()?;
        if preamble.len() < self.preamble_len {
            return Err(MiriadError::BufferTooSmall {
                needed: self.preamble_len,
                capacity: preamble.len(),
            });
        }
        if data.len() < n || flags.len() < n {
            return Err(MiriadError::BufferTooSmall {
                needed: n,
                capacity: data.len().min(flags.len()),
            });
        }

        let ncoord = self.preamble_len - 2;
        self.put_array("coord", &preamble[..ncoord])?;
        self.put_scalar("time", preamble[ncoord])?;
        self.put_scalar("baseline", preamble[ncoord + 1])?;
        self.put_array("corr", &data[..n])?;

        self.emit_pending()?;
        let mut eor = [0u8; 4];
        eor[2] = KIND_EOR;
        self.emit_bytes(&eor)?;

        let cursor = self.flag_write_cursor;
        let mask = self.flags_for_write()?;
        mask.write(MaskEncoding::Expanded, cursor, n, &flags[..n])?;
        self.flag_write_cursor += n as u64;
        Ok(())
    }

    /// Replace the flag bits of the most recently read record.
    pub fn rewrite_flags(&mut self, flags: &[i32]) -> Result<()> {
        let (offset, count) = self.last_flags.ok_or_else(|| {
            MiriadError::validation("no record has been read on this stream")
        })?;
        if flags.len() < count {
            return Err(MiriadError::BufferTooSmall {
                needed: count,
                capacity: flags.len(),
            });
        }
        let mask = self.flags_for_write()?;
        mask.write(MaskEncoding::Expanded, offset, count, &flags[..count])
    }

    // Variable access

    /// Probe a variable without decoding it.
    pub fn probe(&self, name: &str) -> Option<VarProbe> {
        self.vars.probe(name)
    }

    /// Current value of an array variable. Returns the element count.
    pub fn get_array<T: Element>(&self, name: &str, buf: &mut [T]) -> Result<usize> {
        let idx = self
            .vars
            .lookup(name)
            .ok_or_else(|| MiriadError::validation(format!("unknown variable {name:?}")))?;
        let var = self.vars.get(idx)?;
        if var.tag != T::TAG {
            return Err(MiriadError::validation(format!(
                "variable {name:?} is {}, not {}",
                var.tag.name(),
                T::TAG.name()
            )));
        }
        let values: Vec<T> = decode_slice(&var.data)?;
        if buf.len() < values.len() {
            return Err(MiriadError::BufferTooSmall {
                needed: values.len(),
                capacity: buf.len(),
            });
        }
        buf[..values.len()].copy_from_slice(&values);
        Ok(values.len())
    }

    /// Current value of a scalar variable; a fault if it is absent.
    pub fn get_scalar<T: Element>(&self, name: &str) -> Result<T> {
        let mut buf = [T::default()];
        let n = self.get_array(name, &mut buf)?;
        if n == 0 {
            return Err(MiriadError::validation(format!(
                "variable {name:?} has no value yet"
            )));
        }
        Ok(buf[0])
    }

    /// Current value of a scalar variable, or `default` when the stream
    /// does not carry it.
    pub fn read_scalar<T: Element>(&self, name: &str, default: T) -> Result<T> {
        match self.vars.lookup(name) {
            None => Ok(default),
            Some(idx) if self.vars.get(idx)?.data.is_empty() => Ok(default),
            Some(_) => self.get_scalar(name),
        }
    }

    /// Current value of a text variable.
    pub fn get_text(&self, name: &str) -> Result<String> {
        let idx = self
            .vars
            .lookup(name)
            .ok_or_else(|| MiriadError::validation(format!("unknown variable {name:?}")))?;
        let var = self.vars.get(idx)?;
        if var.tag != TypeTag::Text {
            return Err(MiriadError::validation(format!(
                "variable {name:?} is {}, not text",
                var.tag.name()
            )));
        }
        String::from_utf8(var.data.clone())
            .map_err(|_| MiriadError::fault(format!("variable {name:?} is not valid UTF-8")))
    }

    /// Stage a new value for an array variable, declaring it on first use.
    pub fn put_array<T: Element>(&mut self, name: &str, values: &[T]) -> Result<()> {
        self.put_raw(name, T::TAG, encode_slice(values))
    }

    pub fn put_scalar<T: Element>(&mut self, name: &str, value: T) -> Result<()> {
        self.put_array(name, &[value])
    }

    pub fn put_text(&mut self, name: &str, value: &str) -> Result<()> {
        self.put_raw(name, TypeTag::Text, value.as_bytes().to_vec())
    }

    /// Advance until `name` is refreshed by a record.
    pub fn scan(&mut self, name: &str) -> Result<ScanOutcome> {
        let idx = self
            .vars
            .lookup(name)
            .ok_or_else(|| MiriadError::validation(format!("unknown variable {name:?}")))?;
        loop {
            if !self.next()? {
                return Ok(ScanOutcome::EndOfStream);
            }
            if self.vars.get(idx)?.updated {
                return Ok(ScanOutcome::Updated);
            }
        }
    }

    // Trackers

    /// Create an empty tracker on this stream.
    pub fn tracker(&mut self) -> TrackerId {
        self.trackers.push(Tracker::default());
        TrackerId(self.trackers.len() - 1)
    }

    /// Register `name` with a tracker. `switches` selects behaviors:
    /// `u` to report updates through [`changed`](Self::changed), `c` to
    /// replicate through [`copy_tracked`](Self::copy_tracked).
    pub fn track(&mut self, id: TrackerId, name: &str, switches: &str) -> Result<()> {
        let var = self
            .vars
            .lookup(name)
            .ok_or_else(|| MiriadError::validation(format!("unknown variable {name:?}")))?;
        let tracker = self
            .trackers
            .get_mut(id.0)
            .ok_or_else(|| MiriadError::validation("unknown tracker"))?;
        tracker.track(var, switches)
    }

    /// Whether any update-tracked variable was refreshed by the last
    /// [`next`](Self::next).
    pub fn changed(&self, id: TrackerId) -> Result<bool> {
        let tracker = self
            .trackers
            .get(id.0)
            .ok_or_else(|| MiriadError::validation("unknown tracker"))?;
        for entry in &tracker.entries {
            if entry.report_updates && self.vars.get(entry.var)?.updated {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Replicate the current values of copy-tracked variables into another
    /// stream's pending writes.
    pub fn copy_tracked(&self, id: TrackerId, out: &mut UvStream) -> Result<()> {
        let tracker = self
            .trackers
            .get(id.0)
            .ok_or_else(|| MiriadError::validation("unknown tracker"))?;
        for entry in &tracker.entries {
            if !entry.copy {
                continue;
            }
            let var = self.vars.get(entry.var)?;
            if var.data.is_empty() {
                continue;
            }
            out.put_raw(&var.name, var.tag, var.data.clone())?;
        }
        Ok(())
    }

    // Selection and configuration

    /// Add a selection clause consulted by [`next`](Self::next). Objects:
    /// `time` (p1 ≤ t < p2), `antennae` (p1/p2 antenna numbers, p2 = 0 for
    /// either end), `polarization` (p1 the code), `window` (p1 ≤ win ≤ p2).
    /// `include = false` turns the clause into a restriction.
    pub fn select(&mut self, object: &str, p1: f64, p2: f64, include: bool) -> Result<()> {
        let object = SelectObject::parse(object)?;
        self.selections.push(SelectClause {
            object,
            p1,
            p2,
            include,
        });
        Ok(())
    }

    /// Configure stream behavior. The `preamble` object with type `uv` or
    /// `uvw` chooses the 4- or 5-double preamble layout.
    pub fn configure(
        &mut self,
        object: &str,
        type_: &str,
        _n: i32,
        _p1: f64,
        _p2: f64,
        _p3: f64,
    ) -> Result<()> {
        match object {
            "preamble" => match type_ {
                "uv" => {
                    self.preamble_len = 4;
                    Ok(())
                }
                "uvw" => {
                    self.preamble_len = 5;
                    Ok(())
                }
                other => Err(MiriadError::validation(format!(
                    "unrecognized preamble type {other:?}"
                ))),
            },
            other => Err(MiriadError::validation(format!(
                "unrecognized configuration object {other:?}"
            ))),
        }
    }

    /// Whether [`check_shadowing`](Self::check_shadowing) is available in
    /// this build.
    pub fn supports_shadow_check(&self) -> bool {
        false
    }

    /// Test the current record for antenna shadowing by dishes of the
    /// given diameter. Unavailable here; probe with
    /// [`supports_shadow_check`](Self::supports_shadow_check) first.
    pub fn check_shadowing(&mut self, _diameter_m: f64) -> Result<bool> {
        Err(MiriadError::NotSupported("shadow-calculation check"))
    }

    // Lifecycle

    /// Make all pending writes durable.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(vartable) = &mut self.vartable {
            vartable.flush()?;
        }
        self.visdata.flush()?;
        if let Some(flags) = &mut self.flags {
            flags.flush()?;
        }
        self.dataset.flush()
    }

    /// Close the stream, flushing everything.
    pub fn close(self) -> Result<()> {
        let UvStream {
            vartable,
            visdata,
            flags,
            dataset,
            ..
        } = self;
        if let Some(vartable) = vartable {
            vartable.close()?;
        }
        visdata.close()?;
        if let Some(flags) = flags {
            flags.close()?;
        }
        dataset.close()
    }
}
