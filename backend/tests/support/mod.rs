#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

// =============================================================================
// Synthetic x1dints files
// =============================================================================

const BLOCK: usize = 2880;
pub const MJD0: f64 = 60000.0;
pub const GRID_POINTS: usize = 20;

fn card(key: &str, value: &str) -> Vec<u8> {
    format!("{:<80}", format!("{:<8}= {:>20}", key, value)).into_bytes()
}

fn pad(mut bytes: Vec<u8>, fill: u8) -> Vec<u8> {
    bytes.resize(bytes.len().div_ceil(BLOCK) * BLOCK, fill);
    bytes
}

fn header(cards: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out: Vec<u8> = cards.concat();
    out.extend(format!("{:<80}", "END").into_bytes());
    pad(out, b' ')
}

/// Scalar (`repeat == 1`) or fixed-length array `f64` columns.
fn table(extname: &str, extra: &[(&str, &str)], columns: &[(&str, Vec<Vec<f64>>)]) -> Vec<u8> {
    let n_rows = columns.first().map_or(0, |(_, rows)| rows.len());
    let repeats: Vec<usize> = columns
        .iter()
        .map(|(_, rows)| rows.iter().map(Vec::len).max().unwrap_or(1))
        .collect();
    let mut data = Vec::new();
    for r in 0..n_rows {
        for ((_, rows), repeat) in columns.iter().zip(&repeats) {
            for i in 0..*repeat {
                data.extend(rows[r].get(i).copied().unwrap_or(f64::NAN).to_be_bytes());
            }
        }
    }

    let mut cards = vec![
        card("XTENSION", "'BINTABLE'"),
        card("BITPIX", "8"),
        card("NAXIS", "2"),
        card("NAXIS1", &(8 * repeats.iter().sum::<usize>()).to_string()),
        card("NAXIS2", &n_rows.to_string()),
        card("PCOUNT", "0"),
        card("GCOUNT", "1"),
        card("TFIELDS", &columns.len().to_string()),
    ];
    for (i, ((name, _), repeat)) in columns.iter().zip(&repeats).enumerate() {
        cards.push(card(&format!("TTYPE{}", i + 1), &format!("'{}'", name)));
        cards.push(card(&format!("TFORM{}", i + 1), &format!("'{}D'", repeat)));
    }
    cards.push(card("EXTNAME", &format!("'{}'", extname)));
    for (k, v) in extra {
        cards.push(card(k, v));
    }
    let mut out = header(cards);
    out.extend(pad(data, 0));
    out
}

/// Hours after [`MJD0`] to MJD.
pub fn hours_to_mjd(hours: &[f64]) -> Vec<f64> {
    hours.iter().map(|h| MJD0 + h / 24.0).collect()
}

/// A single-table x1dints file with flat flux `level` on a 20-point grid
/// starting at 1.0 um with 0.01 um spacing.
pub fn x1dints_file(hours: &[f64], level: f64) -> Vec<u8> {
    let times = hours_to_mjd(hours);
    let wave: Vec<f64> = (0..GRID_POINTS).map(|i| 1.0 + 0.01 * i as f64).collect();
    let per_row = |v: &Vec<f64>| hours.iter().map(|_| v.clone()).collect::<Vec<_>>();
    let scalars = times.iter().map(|t| vec![*t]).collect::<Vec<_>>();
    [
        header(vec![
            card("SIMPLE", "T"),
            card("BITPIX", "8"),
            card("NAXIS", "0"),
            card("EXTEND", "T"),
            card("TARGNAME", "'WASP-39'"),
            card("INSTRUME", "'NIRSPEC'"),
        ]),
        table("INT_TIMES", &[], &[("int_mid_MJD_UTC", scalars.clone())]),
        table(
            "EXTRACT1D",
            &[("TUNIT2", "'Jy'")],
            &[
                ("WAVELENGTH", per_row(&wave)),
                ("FLUX", per_row(&vec![level; GRID_POINTS])),
                ("FLUX_ERROR", per_row(&vec![0.01; GRID_POINTS])),
                ("MJD-AVG", scalars),
            ],
        ),
    ]
    .concat()
}

/// Write the standard two-visit observation into `dir`: hours 0-1 at flux
/// 100 (`b.fits`) and hours 3-4 at flux 102 (`a.fits`).
pub fn write_two_visits(dir: &Path) {
    std::fs::write(dir.join("b.fits"), x1dints_file(&[0.0, 0.25, 0.5, 0.75, 1.0], 100.0)).unwrap();
    std::fs::write(dir.join("a.fits"), x1dints_file(&[3.0, 3.25, 3.5, 3.75, 4.0], 102.0)).unwrap();
}

/// The two-visit observation as a `.tar.gz`.
pub fn two_visit_tar_gz() -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    write_two_visits(dir.path());
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("obs", dir.path()).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// The two-visit observation as a `.zip`.
pub fn two_visit_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, hours, level) in [
        ("obs/b.fits", [0.0, 0.25, 0.5, 0.75, 1.0], 100.0),
        ("obs/a.fits", [3.0, 3.25, 3.5, 3.75, 4.0], 102.0),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(&x1dints_file(&hours, level)).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
