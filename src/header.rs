//! Header codec: typed scalar values stored as small items.
//!
//! A header item is the 4-byte big-endian type tag, padding out to the
//! element's natural alignment, then the value bytes. Reading a keyword that
//! does not exist returns the caller's default; for every type, absence is
//! never an error. Numeric reads accept the stored value under the usual
//! widenings (int32 into int64, real into double), so a dataset written with
//! single precision stays readable by double-precision callers.

use crate::dataset::Dataset;
use crate::error::{MiriadError, Result};
use crate::item::ItemMode;
use crate::types::{round_up, Element, TypeTag};
use num_complex::Complex32;

/// Result of probing a header keyword without fully decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderProbe {
    /// Human-readable rendering of the value (or a summary for arrays).
    pub description: String,
    /// Type name, e.g. `"integer"` or `"double"`.
    pub type_name: &'static str,
    /// Number of elements stored under the keyword.
    pub count: usize,
}

fn data_offset(tag: TypeTag) -> usize {
    round_up(4, tag.alignment())
}

fn encode_header(tag: TypeTag, payload: &[u8]) -> Vec<u8> {
    let offset = data_offset(tag);
    let mut out = vec![0u8; offset + payload.len()];
    out[..4].copy_from_slice(&tag.code().to_be_bytes());
    out[offset..].copy_from_slice(payload);
    out
}

/// Raw decoded header item: its tag and value bytes.
struct RawHeader {
    tag: TypeTag,
    payload: Vec<u8>,
}

impl RawHeader {
    fn count(&self) -> usize {
        self.payload.len() / self.tag.width()
    }

    fn first<T: Element>(&self) -> T {
        T::get(&self.payload[..T::WIDTH])
    }
}

impl Dataset {
    fn read_raw_header(&self, keyword: &str) -> Result<Option<RawHeader>> {
        if !self.has_item(keyword) {
            return Ok(None);
        }
        let mut item = self.access(keyword, ItemMode::Read)?;
        let bytes = item.read_all()?;
        if bytes.len() < 4 {
            return Err(MiriadError::fault(format!(
                "header item {keyword:?} is too short to carry a type tag"
            )));
        }
        let code = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let tag = TypeTag::from_code(code)?;
        let offset = data_offset(tag);
        if bytes.len() < offset || (bytes.len() - offset) % tag.width() != 0 {
            return Err(MiriadError::fault(format!(
                "header item {keyword:?} has a ragged {} payload",
                tag.name()
            )));
        }
        Ok(Some(RawHeader {
            tag,
            payload: bytes[offset..].to_vec(),
        }))
    }

    fn write_raw_header(&self, keyword: &str, tag: TypeTag, payload: &[u8]) -> Result<()> {
        let bytes = encode_header(tag, payload);
        let mut item = self.access(keyword, ItemMode::Write)?;
        item.write_bytes_at(&bytes, 0)?;
        item.close()
    }

    fn type_mismatch(keyword: &str, want: &str, got: TypeTag) -> MiriadError {
        MiriadError::validation(format!(
            "header {keyword:?} holds {} data, not {want}",
            got.name()
        ))
    }

    pub fn write_header_int(&self, keyword: &str, value: i32) -> Result<()> {
        self.write_raw_header(keyword, TypeTag::Int32, &value.to_be_bytes())
    }

    pub fn write_header_long(&self, keyword: &str, value: i64) -> Result<()> {
        self.write_raw_header(keyword, TypeTag::Int64, &value.to_be_bytes())
    }

    pub fn write_header_float(&self, keyword: &str, value: f32) -> Result<()> {
        self.write_raw_header(keyword, TypeTag::Real32, &value.to_be_bytes())
    }

    pub fn write_header_double(&self, keyword: &str, value: f64) -> Result<()> {
        self.write_raw_header(keyword, TypeTag::Real64, &value.to_be_bytes())
    }

    pub fn write_header_complex(&self, keyword: &str, value: Complex32) -> Result<()> {
        let mut payload = [0u8; 8];
        value.put(&mut payload);
        self.write_raw_header(keyword, TypeTag::Complex64, &payload)
    }

    pub fn write_header_string(&self, keyword: &str, value: &str) -> Result<()> {
        self.write_raw_header(keyword, TypeTag::Text, value.as_bytes())
    }

    /// Booleans ride on int32 headers: zero is false, anything else true.
    pub fn write_header_bool(&self, keyword: &str, value: bool) -> Result<()> {
        self.write_header_int(keyword, value as i32)
    }

    pub fn read_header_int(&self, keyword: &str, default: i32) -> Result<i32> {
        match self.read_raw_header(keyword)? {
            None => Ok(default),
            Some(raw) if raw.count() == 0 => Ok(default),
            Some(raw) => match raw.tag {
                TypeTag::Int32 => Ok(raw.first::<i32>()),
                TypeTag::Int16 => Ok(raw.first::<i16>() as i32),
                TypeTag::Byte => Ok(raw.first::<u8>() as i32),
                other => Err(Self::type_mismatch(keyword, "integer", other)),
            },
        }
    }

    pub fn read_header_long(&self, keyword: &str, default: i64) -> Result<i64> {
        match self.read_raw_header(keyword)? {
            None => Ok(default),
            Some(raw) if raw.count() == 0 => Ok(default),
            Some(raw) => match raw.tag {
                TypeTag::Int64 => Ok(raw.first::<i64>()),
                TypeTag::Int32 => Ok(raw.first::<i32>() as i64),
                TypeTag::Int16 => Ok(raw.first::<i16>() as i64),
                TypeTag::Byte => Ok(raw.first::<u8>() as i64),
                other => Err(Self::type_mismatch(keyword, "integer*8", other)),
            },
        }
    }

    pub fn read_header_float(&self, keyword: &str, default: f32) -> Result<f32> {
        match self.read_raw_header(keyword)? {
            None => Ok(default),
            Some(raw) if raw.count() == 0 => Ok(default),
            Some(raw) => match raw.tag {
                TypeTag::Real32 => Ok(raw.first::<f32>()),
                TypeTag::Real64 => Ok(raw.first::<f64>() as f32),
                TypeTag::Int32 => Ok(raw.first::<i32>() as f32),
                TypeTag::Int16 => Ok(raw.first::<i16>() as f32),
                other => Err(Self::type_mismatch(keyword, "real", other)),
            },
        }
    }

    pub fn read_header_double(&self, keyword: &str, default: f64) -> Result<f64> {
        match self.read_raw_header(keyword)? {
            None => Ok(default),
            Some(raw) if raw.count() == 0 => Ok(default),
            Some(raw) => match raw.tag {
                TypeTag::Real64 => Ok(raw.first::<f64>()),
                TypeTag::Real32 => Ok(raw.first::<f32>() as f64),
                TypeTag::Int32 => Ok(raw.first::<i32>() as f64),
                TypeTag::Int16 => Ok(raw.first::<i16>() as f64),
                other => Err(Self::type_mismatch(keyword, "double", other)),
            },
        }
    }

    pub fn read_header_complex(&self, keyword: &str, default: Complex32) -> Result<Complex32> {
        match self.read_raw_header(keyword)? {
            None => Ok(default),
            Some(raw) if raw.count() == 0 => Ok(default),
            Some(raw) => match raw.tag {
                TypeTag::Complex64 => Ok(raw.first::<Complex32>()),
                TypeTag::Real32 => Ok(Complex32::new(raw.first::<f32>(), 0.0)),
                other => Err(Self::type_mismatch(keyword, "complex", other)),
            },
        }
    }

    pub fn read_header_string(&self, keyword: &str, default: &str) -> Result<String> {
        match self.read_raw_header(keyword)? {
            None => Ok(default.to_owned()),
            Some(raw) => match raw.tag {
                TypeTag::Text => Ok(String::from_utf8_lossy(&raw.payload).into_owned()),
                other => Err(Self::type_mismatch(keyword, "text", other)),
            },
        }
    }

    pub fn read_header_bool(&self, keyword: &str, default: bool) -> Result<bool> {
        Ok(self.read_header_int(keyword, default as i32)? != 0)
    }

    /// Duplicate a header item into another dataset, raw bytes, no type
    /// inspection. A missing source keyword is a silent no-op.
    pub fn copy_header(&self, dest: &Dataset, keyword: &str) -> Result<()> {
        if !self.has_item(keyword) {
            return Ok(());
        }
        let bytes = self.access(keyword, ItemMode::Read)?.read_all()?;
        let mut item = dest.access(keyword, ItemMode::Write)?;
        item.write_bytes_at(&bytes, 0)?;
        item.close()
    }

    /// Inspect a header keyword without fully decoding it. `None` when the
    /// keyword is absent.
    pub fn probe_header(&self, keyword: &str) -> Result<Option<HeaderProbe>> {
        let Some(raw) = self.read_raw_header(keyword)? else {
            return Ok(None);
        };
        let count = raw.count();
        let description = match raw.tag {
            _ if count == 0 => "empty".to_owned(),
            TypeTag::Text => String::from_utf8_lossy(&raw.payload).into_owned(),
            _ if count > 1 => format!("array of {count} {} elements", raw.tag.name()),
            TypeTag::Byte => format!("{}", raw.first::<u8>()),
            TypeTag::Int16 => format!("{}", raw.first::<i16>()),
            TypeTag::Int32 => format!("{}", raw.first::<i32>()),
            TypeTag::Int64 => format!("{}", raw.first::<i64>()),
            TypeTag::Real32 => format!("{}", raw.first::<f32>()),
            TypeTag::Real64 => format!("{}", raw.first::<f64>()),
            TypeTag::Complex64 => {
                let v = raw.first::<Complex32>();
                format!("({}, {})", v.re, v.im)
            }
        };
        Ok(Some(HeaderProbe {
            description,
            type_name: raw.tag.name(),
            count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AccessMode;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Dataset) {
        let dir = TempDir::new().unwrap();
        let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
        (dir, ds)
    }

    #[test]
    fn test_round_trip_every_type() {
        let (_dir, ds) = scratch();

        ds.write_header_int("i", -42).unwrap();
        ds.write_header_long("l", 1 << 40).unwrap();
        ds.write_header_float("r", 1.5).unwrap();
        ds.write_header_double("d", -2.25e10).unwrap();
        ds.write_header_complex("c", Complex32::new(3.0, -4.0)).unwrap();
        ds.write_header_string("a", "3c286").unwrap();
        ds.write_header_bool("b", true).unwrap();

        assert_eq!(ds.read_header_int("i", 0).unwrap(), -42);
        assert_eq!(ds.read_header_long("l", 0).unwrap(), 1 << 40);
        assert_eq!(ds.read_header_float("r", 0.0).unwrap(), 1.5);
        assert_eq!(ds.read_header_double("d", 0.0).unwrap(), -2.25e10);
        assert_eq!(
            ds.read_header_complex("c", Complex32::default()).unwrap(),
            Complex32::new(3.0, -4.0)
        );
        assert_eq!(ds.read_header_string("a", "").unwrap(), "3c286");
        assert!(ds.read_header_bool("b", false).unwrap());
    }

    #[test]
    fn test_absent_yields_default_for_every_type() {
        let (_dir, ds) = scratch();

        assert_eq!(ds.read_header_int("nope", 7).unwrap(), 7);
        assert_eq!(ds.read_header_long("nope", -3).unwrap(), -3);
        assert_eq!(ds.read_header_float("nope", 0.5).unwrap(), 0.5);
        assert_eq!(ds.read_header_double("nope", 9.0).unwrap(), 9.0);
        assert_eq!(
            ds.read_header_complex("nope", Complex32::new(1.0, 1.0)).unwrap(),
            Complex32::new(1.0, 1.0)
        );
        assert_eq!(ds.read_header_string("nope", "dflt").unwrap(), "dflt");
        assert!(ds.read_header_bool("nope", true).unwrap());
    }

    #[test]
    fn test_overwrite_is_wholesale() {
        let (_dir, ds) = scratch();

        ds.write_header_string("object", "a long source name").unwrap();
        ds.write_header_string("object", "m31").unwrap();
        assert_eq!(ds.read_header_string("object", "").unwrap(), "m31");

        let probe = ds.probe_header("object").unwrap().unwrap();
        assert_eq!(probe.count, 3);
    }

    #[test]
    fn test_numeric_widening() {
        let (_dir, ds) = scratch();

        ds.write_header_int("n", 12).unwrap();
        assert_eq!(ds.read_header_long("n", 0).unwrap(), 12);
        assert_eq!(ds.read_header_double("n", 0.0).unwrap(), 12.0);

        ds.write_header_float("x", 0.25).unwrap();
        assert_eq!(ds.read_header_double("x", 0.0).unwrap(), 0.25);
    }

    #[test]
    fn test_type_mismatch_is_validation_fault() {
        let (_dir, ds) = scratch();
        ds.write_header_string("s", "text").unwrap();
        assert!(matches!(
            ds.read_header_int("s", 0),
            Err(MiriadError::Validation(_))
        ));
    }

    #[test]
    fn test_probe() {
        let (_dir, ds) = scratch();

        ds.write_header_int("niters", 5).unwrap();
        let probe = ds.probe_header("niters").unwrap().unwrap();
        assert_eq!(probe.type_name, "integer");
        assert_eq!(probe.count, 1);
        assert_eq!(probe.description, "5");

        ds.write_header_string("telescop", "ATA").unwrap();
        let probe = ds.probe_header("telescop").unwrap().unwrap();
        assert_eq!(probe.type_name, "text");
        assert_eq!(probe.description, "ATA");

        assert!(ds.probe_header("nothing").unwrap().is_none());
    }

    #[test]
    fn test_copy_header_raw() {
        let dir = TempDir::new().unwrap();
        let src = Dataset::open(dir.path().join("src.mir"), AccessMode::New).unwrap();
        let dst = Dataset::open(dir.path().join("dst.mir"), AccessMode::New).unwrap();

        src.write_header_double("restfreq", 1.420405752).unwrap();
        src.copy_header(&dst, "restfreq").unwrap();
        assert_eq!(dst.read_header_double("restfreq", 0.0).unwrap(), 1.420405752);

        // Missing keyword copies nothing and does not fault.
        src.copy_header(&dst, "absent").unwrap();
        assert!(!dst.has_item("absent"));
    }

    #[test]
    fn test_reopen_scenario() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scen.mir");

        {
            let ds = Dataset::open(&path, AccessMode::New).unwrap();
            ds.write_header_int("niters", 5).unwrap();
            ds.close().unwrap();
        }

        let ds = Dataset::open(&path, AccessMode::Old).unwrap();
        assert_eq!(ds.read_header_int("niters", 0).unwrap(), 5);
    }
}
