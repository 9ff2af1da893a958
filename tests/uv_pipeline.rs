//! Visibility filtering pipeline test
//!
//! Exercises the classic copy pipeline: read an input stream, drop some
//! records, and replicate the untouched metadata into the output via a
//! copy tracker. Verifies the zero-count end marker on both streams.

use miriad_io::dataset::AccessMode;
use miriad_io::item::ItemMode;
use miriad_io::uv::UvStream;
use num_complex::Complex32;
use tempfile::TempDir;

fn baseline(ant1: u32, ant2: u32) -> f64 {
    (ant1 * 256 + ant2) as f64
}

#[test]
fn test_filtering_copy_pipeline() {
    let dir = TempDir::new().unwrap();
    let src_path = dir.path().join("raw.uv");
    let dst_path = dir.path().join("cal.uv");

    // Build a 6-record input; source name changes once mid-stream.
    let mut out = UvStream::open(&src_path, AccessMode::New).unwrap();
    out.put_text("source", "1934-638").unwrap();
    out.put_scalar("nchan", 2i32).unwrap();
    for rec in 0..6u32 {
        if rec == 3 {
            out.put_text("source", "0823-500").unwrap();
        }
        let preamble = [
            rec as f64,
            -(rec as f64),
            2450000.0 + rec as f64,
            baseline(1, 2),
        ];
        let data = [
            Complex32::new(rec as f32, 1.0),
            Complex32::new(-1.0, rec as f32),
        ];
        out.write(&preamble, &data, &[1, 1], 2).unwrap();
    }
    out.close().unwrap();

    // Filter: keep times in [2450002, 2450005), carrying source and nchan.
    let mut src = UvStream::open(&src_path, AccessMode::Old).unwrap();
    src.select("time", 2450002.0, 2450005.0, true).unwrap();
    let id = src.tracker();
    src.track(id, "source", "uc").unwrap();
    src.track(id, "nchan", "c").unwrap();

    let mut dst = UvStream::open(&dst_path, AccessMode::New).unwrap();
    let mut preamble = [0f64; 4];
    let mut data = [Complex32::default(); 4];
    let mut flags = [0i32; 4];
    let mut copied = 0;
    let mut source_changes = 0;
    loop {
        let n = src.read(&mut preamble, &mut data, &mut flags, 4).unwrap();
        if n == 0 {
            break;
        }
        if src.changed(id).unwrap() {
            source_changes += 1;
        }
        src.copy_tracked(id, &mut dst).unwrap();
        dst.write(&preamble, &data[..n], &flags[..n], n).unwrap();
        copied += 1;
    }
    assert_eq!(copied, 3);
    // The first selected record carries the initial values; the source
    // rename lands inside the window at record 3.
    assert_eq!(source_changes, 2);
    src.close().unwrap();
    dst.close().unwrap();

    // Verify the output stream.
    let mut check = UvStream::open(&dst_path, AccessMode::Old).unwrap();
    let mut times = Vec::new();
    let mut sources = Vec::new();
    loop {
        let n = check.read(&mut preamble, &mut data, &mut flags, 4).unwrap();
        if n == 0 {
            break;
        }
        assert_eq!(n, 2);
        times.push(preamble[2]);
        sources.push(check.get_text("source").unwrap());
    }
    assert_eq!(times, vec![2450002.0, 2450003.0, 2450004.0]);
    assert_eq!(
        sources,
        vec!["1934-638", "0823-500", "0823-500"]
    );
    assert_eq!(check.get_scalar::<i32>("nchan").unwrap(), 2);
}

#[test]
fn test_history_alongside_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vis.uv");

    let mut out = UvStream::open(&path, AccessMode::New).unwrap();
    out.write(
        &[0.0, 0.0, 2450000.0, baseline(1, 2)],
        &[Complex32::new(1.0, 0.0)],
        &[1],
        1,
    )
    .unwrap();
    let mut hist = out.dataset().open_history(ItemMode::Append).unwrap();
    hist.log_invocation("uvcat", &["vis=raw.uv".to_owned()]).unwrap();
    hist.close().unwrap();
    out.close().unwrap();

    let uv = UvStream::open(&path, AccessMode::Old).unwrap();
    let mut item = uv
        .dataset()
        .access("history", ItemMode::Read)
        .unwrap();
    let first = item.read_line().unwrap().unwrap();
    assert!(first.starts_with("UVCAT: Executed on:"));
}
