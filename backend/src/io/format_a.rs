//! Format A reader: FITS `x1dints` products.
//!
//! A file needs an `INT_TIMES` table and at least one `EXTRACT1D` table. Three
//! layouts occur in the wild and are detected in this order:
//!
//! 1. one `EXTRACT1D` table, a row per integration, times in the table;
//! 2. one `EXTRACT1D` extension per integration, times from `INT_TIMES`;
//! 3. one `EXTRACT1D` table, a row per integration, times from `INT_TIMES`.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use super::fits::{BinTable, FitsError, FitsFile, Header};
use super::keys::{self, Candidate};
use super::{ProgressCallback, ReadOptions};
use crate::error::{ErrorContext, PipelineError, PipelineResult};
use crate::models::{meta_keys, FormatFamily, Integration, ModifiedJulianDate, SourceFile, UNKNOWN};

const OPERATION: &str = "read_format_a";
const DEFAULT_FLUX_UNIT: &str = "MJy";

/// Which of the known `EXTRACT1D` arrangements a file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    TableWithTimes,
    PerIntegrationExtensions,
    TableWithIntTimes,
}

pub fn read(
    path: &Path,
    options: &ReadOptions,
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    let bytes = std::fs::read(path)
        .map_err(|e| PipelineError::io(e, ErrorContext::new(OPERATION).with_file(path)))?;
    parse(path, bytes, options, on_integration)
}

/// Parse an in-memory file; `path` is used for naming only.
pub fn parse(
    path: &Path,
    bytes: Vec<u8>,
    options: &ReadOptions,
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    let ctx = || ErrorContext::new(OPERATION).with_file(path);
    let corrupt = |e: FitsError| fits_error(e, ctx());

    let fits = FitsFile::from_bytes(bytes).map_err(corrupt)?;

    let int_times_hdu = *fits
        .extensions_named("INT_TIMES")
        .first()
        .ok_or_else(|| PipelineError::unsupported("no INT_TIMES extension", ctx()))?;
    let int_times_table = fits.table(int_times_hdu).map_err(corrupt)?;
    let mid = keys::format_a::INT_MID_TIME.require(|k| int_times_table.has_column(k), ctx())?;
    let int_times = int_times_table.scalar_f64(mid.key).map_err(corrupt)?;
    debug!(file = %path.display(), entries = int_times.len(), "found INT_TIMES");

    let mut extract = fits.extensions_named("EXTRACT1D");
    if extract.is_empty() {
        return Err(PipelineError::unsupported("no EXTRACT1D extension", ctx()));
    }
    extract.sort_by_key(|&i| fits.hdus()[i].version());

    let first_table = fits.table(extract[0]).map_err(corrupt)?;
    let table_time = keys::format_a::TABLE_TIME.resolve(|k| first_table.has_column(k));
    let layout = if first_table.n_rows() > 0 && table_time.is_some() {
        Layout::TableWithTimes
    } else if extract.len() > 1 {
        Layout::PerIntegrationExtensions
    } else {
        Layout::TableWithIntTimes
    };
    info!(file = %path.display(), ?layout, "reading EXTRACT1D");

    let mut reader = Reader {
        path,
        options,
        on_integration,
        integrations: Vec::new(),
    };

    match layout {
        Layout::TableWithTimes => {
            let times = match table_time {
                Some(c) => first_table.scalar_f64(c.key).map_err(corrupt)?,
                None => Vec::new(),
            };
            reader.read_rows(&first_table, &times)?;
        }
        Layout::TableWithIntTimes => {
            if first_table.n_rows() < int_times.len() {
                warn!(
                    file = %path.display(),
                    rows = first_table.n_rows(),
                    int_times = int_times.len(),
                    "EXTRACT1D has fewer rows than INT_TIMES; extra entries skipped"
                );
            }
            reader.read_rows(&first_table, &int_times)?;
        }
        Layout::PerIntegrationExtensions => {
            if extract.len() > int_times.len() {
                warn!(
                    file = %path.display(),
                    extensions = extract.len(),
                    int_times = int_times.len(),
                    "more EXTRACT1D extensions than INT_TIMES entries; extras ignored"
                );
            }
            let total = extract.len().min(int_times.len());
            for (k, (&hdu, &mjd)) in extract.iter().zip(&int_times).enumerate() {
                let table = fits.table(hdu).map_err(corrupt)?;
                let columns = Columns::resolve(&table, ctx)?;
                let flat = |rows: Vec<Vec<f64>>| rows.into_iter().flatten().collect::<Vec<f64>>();
                let wave = flat(table.column_f64(columns.wavelength.key).map_err(corrupt)?);
                let flux = flat(table.column_f64(columns.flux.key).map_err(corrupt)?);
                let error = match columns.error {
                    Some(c) => {
                        let mut e = flat(table.column_f64(c.key).map_err(corrupt)?);
                        c.normalize(&mut e);
                        Some(e)
                    }
                    None => None,
                };
                reader.push(k, total, &wave, &flux, error.as_deref(), mjd)?;
            }
        }
    }

    if reader.integrations.is_empty() {
        return Err(PipelineError::unsupported(
            format!("no usable integrations from {} INT_TIMES entries", int_times.len()),
            ctx(),
        ));
    }

    let metadata = header_metadata(fits.primary_header(), &first_table);
    info!(
        file = %path.display(),
        integrations = reader.integrations.len(),
        "loaded integrations"
    );

    Ok(SourceFile {
        path: path.to_path_buf(),
        format: FormatFamily::FormatA,
        integrations: reader.integrations,
        metadata,
    })
}

/// Table layouts we do not decode are unsupported; everything else is damage.
fn fits_error(e: FitsError, ctx: ErrorContext) -> PipelineError {
    match e {
        FitsError::Unsupported(msg) => PipelineError::unsupported(msg, ctx),
        other => PipelineError::corrupt(other.to_string(), ctx),
    }
}

struct Columns {
    wavelength: &'static Candidate,
    flux: &'static Candidate,
    error: Option<&'static Candidate>,
}

impl Columns {
    fn resolve(table: &BinTable, ctx: impl Fn() -> ErrorContext) -> PipelineResult<Self> {
        Ok(Self {
            wavelength: keys::format_a::WAVELENGTH.require(|k| table.has_column(k), ctx())?,
            flux: keys::format_a::FLUX.require(|k| table.has_column(k), ctx())?,
            error: keys::format_a::ERROR.resolve(|k| table.has_column(k)),
        })
    }
}

struct Reader<'a, 'cb> {
    path: &'a Path,
    options: &'a ReadOptions,
    on_integration: &'a mut ProgressCallback<'cb>,
    integrations: Vec<Integration>,
}

impl Reader<'_, '_> {
    /// Row-per-integration tables; row `i` pairs with `times[i]`.
    fn read_rows(&mut self, table: &BinTable, times: &[f64]) -> PipelineResult<()> {
        let ctx = || ErrorContext::new(OPERATION).with_file(self.path);
        let corrupt = |e: FitsError| fits_error(e, ctx());
        let columns = Columns::resolve(table, ctx)?;
        let wave = table.column_f64(columns.wavelength.key).map_err(corrupt)?;
        let flux = table.column_f64(columns.flux.key).map_err(corrupt)?;
        let error = match columns.error {
            Some(c) => {
                let mut rows = table.column_f64(c.key).map_err(corrupt)?;
                rows.iter_mut().for_each(|r| c.normalize(r));
                Some(rows)
            }
            None => None,
        };

        let total = table.n_rows().min(times.len());
        for i in 0..total {
            let err = error.as_ref().map(|rows| rows[i].as_slice());
            self.push(i, total, &wave[i], &flux[i], err, times[i])?;
        }
        Ok(())
    }

    fn push(
        &mut self,
        index: usize,
        total: usize,
        wave: &[f64],
        flux: &[f64],
        error: Option<&[f64]>,
        mjd: f64,
    ) -> PipelineResult<()> {
        if !mjd.is_finite() {
            warn!(file = %self.path.display(), integration = index + 1, "skipping integration with non-finite time");
        } else {
            match Integration::from_raw(
                wave,
                flux,
                error,
                ModifiedJulianDate::new(mjd),
                self.options.min_valid_points,
            ) {
                Some(integration) => self.integrations.push(integration),
                None => warn!(
                    file = %self.path.display(),
                    integration = index + 1,
                    min_valid = self.options.min_valid_points,
                    "skipping integration with too few valid points"
                ),
            }
        }
        (self.on_integration)(index + 1, total)
    }
}

fn header_metadata(primary: &Header, extract: &BinTable) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for (meta, card) in [
        (meta_keys::TARGET, "TARGNAME"),
        (meta_keys::INSTRUMENT, "INSTRUME"),
        (meta_keys::FILTER, "FILTER"),
        (meta_keys::GRATING, "GRATING"),
        (meta_keys::OBS_DATE, "DATE-OBS"),
        (meta_keys::EXPOSURE_TIME, "EXPTIME"),
    ] {
        let value = primary
            .get_string(card)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        metadata.insert(meta.to_string(), value);
    }

    let flux_unit = primary
        .get_string("BUNIT")
        .or_else(|| extract.header().get_string("BUNIT"))
        .or_else(|| {
            extract
                .columns()
                .iter()
                .find(|c| c.unit.is_some() && c.name.to_ascii_lowercase().contains("flux"))
                .and_then(|c| c.unit.clone())
        })
        .unwrap_or_else(|| DEFAULT_FLUX_UNIT.to_string());
    metadata.insert(meta_keys::FLUX_UNIT.to_string(), flux_unit);
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::test_fixtures::{bintable_hdu, grid, primary_hdu, x1dints_single_table, TestColumn};
    use std::path::PathBuf;

    fn run(bytes: Vec<u8>) -> PipelineResult<SourceFile> {
        let mut calls = Vec::new();
        let result = parse(
            &PathBuf::from("jw_test_x1dints.fits"),
            bytes,
            &ReadOptions::default(),
            &mut |done, total| {
                calls.push((done, total));
                Ok(())
            },
        );
        if let Ok(file) = &result {
            assert!(calls.len() >= file.integrations.len());
        }
        result
    }

    fn fluxes(n: usize, w: usize) -> Vec<Vec<f64>> {
        (0..n).map(|i| vec![100.0 + i as f64; w]).collect()
    }

    #[test]
    fn test_table_with_time_column() {
        let wave = grid(1.0, 0.1, 20);
        let bytes = x1dints_single_table(&[60000.0, 60000.01], &wave, &fluxes(2, 20), true);
        let file = run(bytes).unwrap();
        assert_eq!(file.integrations.len(), 2);
        assert_eq!(file.integrations[1].time.value(), 60000.01);
        assert_eq!(file.integrations[1].flux[0], 101.0);
        assert!(file.integrations[0].error.is_some());
        assert_eq!(file.meta(meta_keys::INSTRUMENT), Some("NIRSPEC"));
        assert_eq!(file.meta(meta_keys::FLUX_UNIT), Some("Jy"));
    }

    #[test]
    fn test_table_with_int_times_ignores_extra_entries() {
        let wave = grid(1.0, 0.1, 20);
        let mut bytes = x1dints_single_table(&[60000.0, 60000.01], &wave, &fluxes(2, 20), false);
        // Rewrite INT_TIMES with three entries; only two rows exist.
        bytes = [
            primary_hdu(&[]),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("int_mid_MJD_UTC", &[1.0, 2.0, 3.0])]),
            bytes[2880 * 3..].to_vec(),
        ]
        .concat();
        let file = run(bytes).unwrap();
        assert_eq!(file.integrations.len(), 2);
        assert_eq!(file.integrations[0].time.value(), 1.0);
        assert_eq!(file.meta(meta_keys::INSTRUMENT), None);
    }

    #[test]
    fn test_per_integration_extensions() {
        let wave = grid(2.0, 0.05, 15);
        let ext = |ver: i64, level: f64| {
            bintable_hdu(
                "EXTRACT1D",
                Some(ver),
                &[],
                &[
                    TestColumn::scalars("WAVELENGTH", &wave),
                    TestColumn::scalars("FLUX", &vec![level; wave.len()]),
                ],
            )
        };
        let bytes = [
            primary_hdu(&[("BUNIT", "'MJy/sr'")]),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("int_mid_MJD_UTC", &[5.0, 6.0])]),
            ext(2, 20.0),
            ext(1, 10.0),
        ]
        .concat();
        let file = run(bytes).unwrap();
        assert_eq!(file.integrations.len(), 2);
        assert_eq!(file.integrations[0].flux[0], 10.0);
        assert_eq!(file.integrations[0].time.value(), 5.0);
        assert_eq!(file.integrations[1].flux[0], 20.0);
        assert!(file.integrations[0].error.is_none());
        assert_eq!(file.meta(meta_keys::FLUX_UNIT), Some("MJy/sr"));
    }

    #[test]
    fn test_short_integrations_skipped() {
        let wave = grid(1.0, 0.1, 20);
        let mut f = fluxes(2, 20);
        for v in f[0].iter_mut().skip(5) {
            *v = f64::NAN;
        }
        let file = run(x1dints_single_table(&[1.0, 2.0], &wave, &f, true)).unwrap();
        assert_eq!(file.integrations.len(), 1);
        assert_eq!(file.integrations[0].time.value(), 2.0);
    }

    #[test]
    fn test_missing_int_times_is_unsupported() {
        let bytes = [
            primary_hdu(&[]),
            bintable_hdu("EXTRACT1D", None, &[], &[TestColumn::scalars("FLUX", &[1.0])]),
        ]
        .concat();
        let err = run(bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedStructure);
        assert!(err.to_string().contains("INT_TIMES"));
        assert!(err.to_string().contains("jw_test_x1dints.fits"));
    }

    #[test]
    fn test_missing_time_column_is_field_resolution() {
        let bytes = [
            primary_hdu(&[]),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("other", &[1.0])]),
        ]
        .concat();
        assert_eq!(run(bytes).unwrap_err().kind(), ErrorKind::FieldResolution);
    }

    #[test]
    fn test_all_integrations_unusable_is_unsupported() {
        let wave = grid(1.0, 0.1, 5);
        let err = run(x1dints_single_table(&[1.0], &wave, &fluxes(1, 5), true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedStructure);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = run(b"SIMPLE  = garbage".to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptFile);
    }

    #[test]
    fn test_variable_length_flux_is_unsupported_not_a_panic() {
        let wave = grid(1.0, 0.1, 20);
        let bytes = [
            primary_hdu(&[]),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("int_mid_MJD_UTC", &[1.0])]),
            bintable_hdu(
                "EXTRACT1D",
                None,
                &[],
                &[
                    TestColumn::arrays("WAVELENGTH", &[wave.clone()]),
                    TestColumn::var_arrays("FLUX", &[vec![1.0; 20]]),
                ],
            ),
        ]
        .concat();
        let mut zero_repeat = bytes.clone();
        let at = zero_repeat.windows(5).position(|w| w == b"'1PD'").unwrap();
        zero_repeat[at..at + 5].copy_from_slice(b"'0QD'");

        let err = run(bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedStructure);
        assert!(err.to_string().contains("FLUX"));

        let err = run(zero_repeat).unwrap_err();
        assert!(err.is_per_file());
        assert!(matches!(
            err.kind(),
            ErrorKind::UnsupportedStructure | ErrorKind::CorruptFile
        ));
    }

    #[test]
    fn test_callback_error_aborts() {
        let wave = grid(1.0, 0.1, 20);
        let bytes = x1dints_single_table(&[1.0, 2.0], &wave, &fluxes(2, 20), true);
        let err = parse(
            &PathBuf::from("x.fits"),
            bytes,
            &ReadOptions::default(),
            &mut |_, _| Err(PipelineError::cancelled("stop")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
