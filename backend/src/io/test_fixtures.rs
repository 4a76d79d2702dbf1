//! Synthetic FITS builders shared by the reader unit tests.

const BLOCK_SIZE: usize = 2880;

pub enum ColumnData {
    Scalars(Vec<f64>),
    Arrays(Vec<Vec<f64>>),
    VarArrays(Vec<Vec<f64>>),
}

pub struct TestColumn {
    pub name: String,
    pub data: ColumnData,
}

impl TestColumn {
    pub fn scalars(name: &str, values: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Scalars(values.to_vec()),
        }
    }

    pub fn arrays(name: &str, rows: &[Vec<f64>]) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Arrays(rows.to_vec()),
        }
    }

    pub fn var_arrays(name: &str, rows: &[Vec<f64>]) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::VarArrays(rows.to_vec()),
        }
    }

    fn rows(&self) -> usize {
        match &self.data {
            ColumnData::Scalars(v) => v.len(),
            ColumnData::Arrays(v) | ColumnData::VarArrays(v) => v.len(),
        }
    }

    fn repeat(&self) -> usize {
        match &self.data {
            ColumnData::Arrays(v) => v.iter().map(Vec::len).max().unwrap_or(0),
            _ => 1,
        }
    }

    fn tform(&self) -> String {
        match &self.data {
            ColumnData::Scalars(_) => "1D".to_string(),
            ColumnData::Arrays(_) => format!("{}D", self.repeat()),
            ColumnData::VarArrays(_) => "1PD".to_string(),
        }
    }
}

fn card(key: &str, value: &str) -> Vec<u8> {
    let mut s = format!("{:<8}= {:>20}", key, value);
    s.truncate(80);
    format!("{:<80}", s).into_bytes()
}

fn finish_header(mut cards: Vec<u8>) -> Vec<u8> {
    cards.extend(format!("{:<80}", "END").into_bytes());
    let padded = cards.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    cards.resize(padded, b' ');
    cards
}

fn pad_data(mut data: Vec<u8>) -> Vec<u8> {
    let padded = data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    data.resize(padded, 0);
    data
}

/// Data-less primary HDU. Card values are given pre-formatted
/// (`"'NIRSPEC'"`, `"T"`, `"1.5"`).
pub fn primary_hdu(extra: &[(&str, &str)]) -> Vec<u8> {
    let mut cards = Vec::new();
    cards.extend(card("SIMPLE", "T"));
    cards.extend(card("BITPIX", "8"));
    cards.extend(card("NAXIS", "0"));
    cards.extend(card("EXTEND", "T"));
    for (k, v) in extra {
        cards.extend(card(k, v));
    }
    finish_header(cards)
}

/// BINTABLE HDU holding `f64` columns.
pub fn bintable_hdu(
    extname: &str,
    extver: Option<i64>,
    extra: &[(&str, &str)],
    columns: &[TestColumn],
) -> Vec<u8> {
    let n_rows = columns.iter().map(TestColumn::rows).max().unwrap_or(0);
    let mut rows = Vec::new();
    let mut heap: Vec<u8> = Vec::new();
    for r in 0..n_rows {
        for col in columns {
            match &col.data {
                ColumnData::Scalars(v) => {
                    rows.extend(v.get(r).copied().unwrap_or(f64::NAN).to_be_bytes())
                }
                ColumnData::Arrays(v) => {
                    let row = v.get(r).cloned().unwrap_or_default();
                    for i in 0..col.repeat() {
                        rows.extend(row.get(i).copied().unwrap_or(f64::NAN).to_be_bytes());
                    }
                }
                ColumnData::VarArrays(v) => {
                    let row = v.get(r).cloned().unwrap_or_default();
                    rows.extend((row.len() as i32).to_be_bytes());
                    rows.extend((heap.len() as i32).to_be_bytes());
                    for x in row {
                        heap.extend(x.to_be_bytes());
                    }
                }
            }
        }
    }
    let row_len: usize = columns
        .iter()
        .map(|c| match c.data {
            ColumnData::VarArrays(_) => 8,
            _ => 8 * c.repeat(),
        })
        .sum();

    let mut cards = Vec::new();
    cards.extend(card("XTENSION", "'BINTABLE'"));
    cards.extend(card("BITPIX", "8"));
    cards.extend(card("NAXIS", "2"));
    cards.extend(card("NAXIS1", &row_len.to_string()));
    cards.extend(card("NAXIS2", &n_rows.to_string()));
    cards.extend(card("PCOUNT", &heap.len().to_string()));
    cards.extend(card("GCOUNT", "1"));
    cards.extend(card("TFIELDS", &columns.len().to_string()));
    for (i, col) in columns.iter().enumerate() {
        cards.extend(card(&format!("TTYPE{}", i + 1), &format!("'{}'", col.name)));
        cards.extend(card(&format!("TFORM{}", i + 1), &format!("'{}'", col.tform())));
    }
    cards.extend(card("EXTNAME", &format!("'{}'", extname)));
    if let Some(v) = extver {
        cards.extend(card("EXTVER", &v.to_string()));
    }
    for (k, v) in extra {
        cards.extend(card(k, v));
    }

    let mut out = finish_header(cards);
    rows.extend(heap);
    out.extend(pad_data(rows));
    out
}

/// Linear wavelength grid `start, start+step, ...` of length `n`.
pub fn grid(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + step * i as f64).collect()
}

/// A single-table `x1dints` file: one EXTRACT1D row per integration.
///
/// With `time_column`, times are written as `MJD-AVG` inside the table.
pub fn x1dints_single_table(times: &[f64], wave: &[f64], fluxes: &[Vec<f64>], time_column: bool) -> Vec<u8> {
    let waves: Vec<Vec<f64>> = fluxes.iter().map(|_| wave.to_vec()).collect();
    let errors: Vec<Vec<f64>> = fluxes.iter().map(|f| f.iter().map(|_| 0.01).collect()).collect();
    let mut columns = vec![
        TestColumn::arrays("WAVELENGTH", &waves),
        TestColumn::arrays("FLUX", fluxes),
        TestColumn::arrays("FLUX_ERROR", &errors),
    ];
    if time_column {
        columns.push(TestColumn::scalars("MJD-AVG", times));
    }
    [
        primary_hdu(&[
            ("TARGNAME", "'WASP-39'"),
            ("INSTRUME", "'NIRSPEC'"),
            ("FILTER", "'CLEAR'"),
            ("GRATING", "'PRISM'"),
        ]),
        bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("int_mid_MJD_UTC", times)]),
        bintable_hdu("EXTRACT1D", None, &[("TUNIT2", "'Jy'")], &columns),
    ]
    .concat()
}
