//! Property-based tests for the codec layers
//!
//! Uses proptest to verify the mask encoding equivalence, the sub-cube
//! coordinate transform inverse, and header round-trips across many
//! random inputs.

use miriad_io::cube::ImageCube;
use miriad_io::dataset::{AccessMode, Dataset};
use miriad_io::item::ItemMode;
use miriad_io::mask::{MaskEncoding, MaskItem};
use proptest::prelude::*;
use tempfile::TempDir;

proptest! {
    #[test]
    fn prop_mask_encodings_agree(bits in proptest::collection::vec(0i32..2, 1..200)) {
        let dir = TempDir::new().unwrap();
        let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
        let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

        mask.write(MaskEncoding::Expanded, 0, bits.len(), &bits).unwrap();

        // Expanded read reproduces the input.
        let mut expanded = vec![0i32; bits.len()];
        let n = mask.read(MaskEncoding::Expanded, 0, bits.len(), &mut expanded).unwrap();
        prop_assert_eq!(n, bits.len());
        prop_assert_eq!(&expanded, &bits);

        // Run-length read decodes back to the same flags.
        let mut runs = vec![0i32; bits.len() + 1];
        let nruns = mask.read(MaskEncoding::RunLength, 0, bits.len(), &mut runs).unwrap();
        let mut decoded = Vec::new();
        let mut good = true;
        for &run in &runs[..nruns] {
            for _ in 0..run {
                decoded.push(good as i32);
            }
            good = !good;
        }
        decoded.truncate(bits.len());
        prop_assert_eq!(&decoded, &bits);

        // Writing the runs back through the run-length path is lossless.
        let mut mask2 = MaskItem::open(&ds, "flags2", ItemMode::Write).unwrap();
        mask2.write(MaskEncoding::RunLength, 0, bits.len(), &runs[..nruns]).unwrap();
        let mut back = vec![0i32; bits.len()];
        mask2.read(MaskEncoding::Expanded, 0, bits.len(), &mut back).unwrap();
        prop_assert_eq!(&back, &bits);
    }

    #[test]
    fn prop_subcube_transform_is_inverse(
        nx in 1usize..6,
        ny in 1usize..6,
        nz in 1usize..4,
        pick in 0usize..3,
    ) {
        let dir = TempDir::new().unwrap();
        let (mut cube, _) = ImageCube::open(
            dir.path().join("t.mir"),
            AccessMode::New,
            &[nx, ny, nz],
        ).unwrap();

        let spec = ["x", "y", "xy"][pick];
        let blc = [0, 0, 0];
        let trc = [nx - 1, ny - 1, nz - 1];
        let (viraxlen, _) = cube.setup(spec, &blc, &trc).unwrap();

        let fixed: usize = viraxlen[spec.len()..].iter().product();
        let mut coords = vec![0usize; 3];
        for i in 0..fixed {
            cube.coords_to_subcube(i, &mut coords).unwrap();
            prop_assert_eq!(cube.subcube_from_coords(&coords).unwrap(), i);
        }
    }

    #[test]
    fn prop_int_headers_round_trip(value in any::<i32>()) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.mir");
        let ds = Dataset::open(&path, AccessMode::New).unwrap();
        ds.write_header_int("val", value).unwrap();
        ds.close().unwrap();

        let ds = Dataset::open(&path, AccessMode::Old).unwrap();
        prop_assert_eq!(ds.read_header_int("val", 0).unwrap(), value);
        prop_assert_eq!(ds.read_header_int("other", 7).unwrap(), 7);
    }

    #[test]
    fn prop_double_headers_round_trip(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let dir = TempDir::new().unwrap();
        let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
        ds.write_header_double("val", value).unwrap();
        prop_assert_eq!(ds.read_header_double("val", 0.0).unwrap(), value);
    }
}

#[test]
fn test_documented_run_length_example() {
    // Ten flags [1,1,1,0,0,1,1,1,1,1] encode as runs [3,2,5]: run lengths
    // alternate starting with good bits.
    let dir = TempDir::new().unwrap();
    let ds = Dataset::open(dir.path().join("t.mir"), AccessMode::New).unwrap();
    let mut mask = MaskItem::open(&ds, "flags", ItemMode::Write).unwrap();

    let bits = [1, 1, 1, 0, 0, 1, 1, 1, 1, 1];
    mask.write(MaskEncoding::Expanded, 0, 10, &bits).unwrap();

    let mut runs = vec![0i32; 8];
    let n = mask.read(MaskEncoding::RunLength, 0, 10, &mut runs).unwrap();
    assert_eq!(&runs[..n], &[3, 2, 5]);
}
