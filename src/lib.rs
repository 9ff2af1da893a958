//! MIRIAD-style dataset I/O
//!
//! A typed storage engine for radio-interferometry data in the classic
//! MIRIAD layout: a dataset is a directory of named, variable-length
//! **items**, and everything else rides on top of that byte store.
//!
//! ## Components
//!
//! - [`dataset`] - The item store: dataset directories, the packed table
//!   for small items, item lifecycle
//! - [`item`] - Byte- and element-addressed I/O on one item, plus
//!   newline-delimited text lines
//! - [`header`] - Typed header keywords (tag + big-endian value items)
//! - [`history`] - The append-only `history` log
//! - [`uv`] - Visibility streams: self-describing variable records,
//!   trackers, selection, sequential read/write
//! - [`cube`] - Image cubes: planar, row and sub-cube access to f32 data
//! - [`mask`] - Packed per-sample flag bits with expanded and run-length
//!   buffer encodings
//! - [`types`] - The element type set and its big-endian wire forms
//! - [`error`] - Fault taxonomy shared by every component
//!
//! ## Example
//!
//! ```rust,no_run
//! use miriad_io::dataset::{AccessMode, Dataset};
//! use miriad_io::item::ItemMode;
//!
//! # fn main() -> miriad_io::error::Result<()> {
//! // Create a dataset, stamp a header and a history line.
//! let ds = Dataset::open("map.mir", AccessMode::New)?;
//! ds.write_header_int("niters", 5)?;
//! let mut hist = ds.open_history(ItemMode::Append)?;
//! hist.write_line("CLEAN: finished")?;
//! hist.close()?;
//! ds.close()?;
//!
//! // Reopen and read the header back; absent keywords yield the default.
//! let ds = Dataset::open("map.mir", AccessMode::Old)?;
//! assert_eq!(ds.read_header_int("niters", 0)?, 5);
//! assert_eq!(ds.read_header_int("missing", -1)?, -1);
//! # Ok(())
//! # }
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! map.mir/                      one directory per dataset
//! ├── header                    packed table of small items:
//! │     ┌──────────────┬─────┬─────────┬─────┐
//! │     │ name (15+NUL)│ len │ payload │ pad │  records aligned to 16
//! │     └──────────────┴─────┴─────────┴─────┘
//! ├── image                     large item: 4-byte type tag + payload
//! ├── history                   newline-delimited text item
//! └── visdata / vartable / ...  one file per large item
//! ```
//!
//! Items at or under 64 bytes live in the packed `header` file; larger
//! ones get their own file. All multi-byte values are big-endian.
//!
//! ## Concurrency
//!
//! Handles are single-owner: a [`dataset::Dataset`] and the [`item::Item`]
//! handles opened from it share one mutex around the packed table, but no
//! handle is itself safe for concurrent use. Dropping any handle flushes
//! it best-effort; call the explicit `close()` when flush errors matter.

pub mod cube;
pub mod dataset;
pub mod error;
pub mod header;
pub mod history;
pub mod item;
pub mod mask;
pub mod types;
pub mod uv;

pub use cube::ImageCube;
pub use dataset::{AccessMode, Dataset};
pub use error::{MiriadError, Result};
pub use header::HeaderProbe;
pub use history::History;
pub use item::{Item, ItemMode};
pub use mask::{MaskEncoding, MaskItem};
pub use types::TypeTag;
pub use uv::{ScanOutcome, TrackerId, UvStream, VarProbe};
