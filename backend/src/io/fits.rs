//! FITS access for the Format A reader, on top of `fitsrs`.
//!
//! `fitsrs` walks the HDU chain and decodes BINTABLE rows. This module keeps
//! the cards the readers look at and regroups each table's row values into
//! named columns. Variable-length array columns (`P`/`Q`) are reported as
//! unsupported rather than decoded.

use std::io::Cursor;

use fitsrs::card::Value;
use fitsrs::hdu::data::bintable::DataValue;
use fitsrs::hdu::HDU;
use fitsrs::Fits;

const BLOCK_SIZE: usize = 2880;

/// Cards kept from every header.
const KEPT_CARDS: &[&str] = &[
    "EXTNAME", "EXTVER", "NAXIS2", "TFIELDS", "BUNIT", "TARGNAME", "INSTRUME", "FILTER", "GRATING",
    "DATE-OBS", "EXPTIME",
];

/// Per-column cards, suffixed with the column number.
const COLUMN_CARDS: &[&str] = &["TTYPE", "TFORM", "TUNIT", "TSCAL", "TZERO", "TNULL"];

/// Errors raised while decoding FITS bytes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitsError {
    #[error("not a FITS file: {0}")]
    NotFits(String),

    #[error("truncated file: {0}")]
    Truncated(String),

    #[error("malformed header: {0}")]
    Header(String),

    #[error("bad TFORM '{tform}' for column {column}")]
    BadFormat { column: usize, tform: String },

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("column '{column}' of type {kind} cannot be read as numbers")]
    NotNumeric { column: String, kind: char },

    #[error("HDU {0} is not a binary table")]
    NotTable(usize),

    #[error("unsupported table layout: {0}")]
    Unsupported(String),
}

/// Parsed value of a header card.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Empty,
}

impl From<&Value> for HeaderValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Logical { value, .. } => Self::Logical(*value),
            Value::Integer { value, .. } => Self::Integer(*value as i64),
            Value::Float { value, .. } => Self::Float(*value as f64),
            Value::String { value, .. } => Self::Text(value.trim_end().to_string()),
            _ => Self::Empty,
        }
    }
}

/// Keyword/value pairs kept from one header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    /// Copy the kept cards out of a `fitsrs` header through its lookup.
    fn snapshot<'v>(lookup: impl Fn(&str) -> Option<&'v Value>) -> Self {
        let mut header = Self::default();
        let mut keep = |key: String| {
            if let Some(value) = lookup(key.as_str()) {
                header.cards.push((key, HeaderValue::from(value)));
            }
        };
        for key in KEPT_CARDS {
            keep(key.to_string());
        }
        let n_fields = match lookup("TFIELDS") {
            Some(Value::Integer { value, .. }) => (*value).max(0) as usize,
            _ => 0,
        };
        for n in 1..=n_fields {
            for prefix in COLUMN_CARDS {
                keep(format!("{}{}", prefix, n));
            }
        }
        header
    }

    /// First card with `key` (keywords are stored upper-case).
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_ascii_uppercase();
        self.cards.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            HeaderValue::Integer(v) => Some(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            HeaderValue::Integer(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Value rendered as a string, whatever its type.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            HeaderValue::Text(s) => Some(s.clone()),
            HeaderValue::Integer(v) => Some(v.to_string()),
            HeaderValue::Float(v) => Some(v.to_string()),
            HeaderValue::Logical(b) => Some(if *b { "T" } else { "F" }.to_string()),
            HeaderValue::Empty => None,
        }
    }

    fn require_int(&self, key: &str) -> Result<i64, FitsError> {
        self.get_int(key)
            .ok_or_else(|| FitsError::Header(format!("missing or non-integer {}", key)))
    }
}

/// One header-data unit. Binary tables carry their decoded columns, or the
/// reason they could not be decoded.
#[derive(Debug, Clone)]
pub struct Hdu {
    pub header: Header,
    table: Option<Result<BinTable, FitsError>>,
}

impl Hdu {
    /// `EXTNAME`, upper-cased.
    pub fn name(&self) -> Option<String> {
        self.header
            .get_string("EXTNAME")
            .map(|s| s.trim().to_ascii_uppercase())
    }

    /// `EXTVER`, defaulting to 1 as FITS readers conventionally do.
    pub fn version(&self) -> i64 {
        self.header.get_int("EXTVER").unwrap_or(1)
    }

    pub fn is_bintable(&self) -> bool {
        self.table.is_some()
    }
}

/// An in-memory FITS file.
#[derive(Debug, Clone)]
pub struct FitsFile {
    hdus: Vec<Hdu>,
}

impl FitsFile {
    /// Walk the HDU chain. The primary header must start with `SIMPLE`.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FitsError> {
        if !bytes.starts_with(b"SIMPLE  =") {
            return Err(FitsError::NotFits("missing SIMPLE keyword".into()));
        }
        if bytes.len() < BLOCK_SIZE {
            return Err(FitsError::Truncated(format!(
                "{} bytes is shorter than one header block",
                bytes.len()
            )));
        }

        let mut hdu_list = Fits::from_reader(Cursor::new(bytes));
        let mut hdus = Vec::new();
        while let Some(next) = hdu_list.next() {
            let hdu = next.map_err(|e| FitsError::Header(format!("HDU {}: {}", hdus.len(), e)))?;
            let parsed = match hdu {
                HDU::Primary(hdu) | HDU::XImage(hdu) => Hdu {
                    header: Header::snapshot(|k| hdu.get_header().get(k)),
                    table: None,
                },
                HDU::XBinaryTable(hdu) => {
                    let header = Header::snapshot(|k| hdu.get_header().get(k));
                    let table = BinTable::layout(header.clone()).and_then(|mut table| {
                        table.fill(hdu_list.get_data(&hdu).row_iter())?;
                        Ok(table)
                    });
                    Hdu {
                        header,
                        table: Some(table),
                    }
                }
                _ => Hdu {
                    header: Header::default(),
                    table: None,
                },
            };
            hdus.push(parsed);
        }

        if hdus.is_empty() {
            return Err(FitsError::Truncated("no complete header block".into()));
        }
        Ok(Self { hdus })
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn primary_header(&self) -> &Header {
        &self.hdus[0].header
    }

    /// Indices of all extensions named `name` (case-insensitive), in file order.
    pub fn extensions_named(&self, name: &str) -> Vec<usize> {
        let name = name.to_ascii_uppercase();
        self.hdus
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, hdu)| hdu.name().as_deref() == Some(name.as_str()))
            .map(|(i, _)| i)
            .collect()
    }

    /// The binary table in HDU `index`.
    pub fn table(&self, index: usize) -> Result<&BinTable, FitsError> {
        match self.hdus.get(index).and_then(|hdu| hdu.table.as_ref()) {
            Some(Ok(table)) => Ok(table),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FitsError::NotTable(index)),
        }
    }
}

/// A row element as delivered by `fitsrs`, before scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    Int(i64),
    Real(f64),
    Other,
}

impl From<&DataValue> for Cell {
    fn from(value: &DataValue) -> Self {
        match value {
            DataValue::Logical { value, .. } => Cell::Int(*value as i64),
            DataValue::UnsignedByte { value, .. } => Cell::Int(*value as i64),
            DataValue::Short { value, .. } => Cell::Int(*value as i64),
            DataValue::Integer { value, .. } => Cell::Int(*value as i64),
            DataValue::Long { value, .. } => Cell::Int(*value as i64),
            DataValue::Float { value, .. } => Cell::Real(*value as f64),
            DataValue::Double { value, .. } => Cell::Real(*value),
            _ => Cell::Other,
        }
    }
}

/// Repeat count and type code of a `TFORMn` value.
fn parse_tform(tform: &str, column: usize) -> Result<(usize, char), FitsError> {
    let bad = || FitsError::BadFormat {
        column,
        tform: tform.to_string(),
    };
    let t = tform.trim();
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    let repeat = if digits == 0 {
        1
    } else {
        t[..digits].parse().map_err(|_| bad())?
    };
    let code = t[digits..].chars().next().ok_or_else(bad)?.to_ascii_uppercase();
    if !"LXBIJKEDACMPQ".contains(code) {
        return Err(bad());
    }
    Ok((repeat, code))
}

/// One BINTABLE column description.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub unit: Option<String>,
    pub code: char,
    pub repeat: usize,
    scale: f64,
    zero: f64,
    null: Option<i64>,
}

impl Column {
    fn is_numeric(&self) -> bool {
        "LBIJKED".contains(self.code)
    }

    fn scaled(&self, cell: Cell) -> f64 {
        match cell {
            Cell::Int(v) if Some(v) == self.null => f64::NAN,
            Cell::Int(v) => self.zero + self.scale * v as f64,
            Cell::Real(v) => self.zero + self.scale * v,
            Cell::Other => f64::NAN,
        }
    }
}

/// A binary table regrouped by column: `cells[column][row]` holds that
/// row's `repeat` elements.
#[derive(Debug, Clone)]
pub struct BinTable {
    header: Header,
    columns: Vec<Column>,
    n_rows: usize,
    cells: Vec<Vec<Vec<Cell>>>,
}

impl BinTable {
    fn layout(header: Header) -> Result<Self, FitsError> {
        let n_rows = usize::try_from(header.require_int("NAXIS2")?)
            .map_err(|_| FitsError::Header("negative NAXIS2".into()))?;
        let n_fields = usize::try_from(header.require_int("TFIELDS")?)
            .map_err(|_| FitsError::Header("negative TFIELDS".into()))?;

        let mut columns = Vec::with_capacity(n_fields);
        for i in 1..=n_fields {
            let tform = header
                .get_string(&format!("TFORM{}", i))
                .ok_or_else(|| FitsError::Header(format!("missing TFORM{}", i)))?;
            let (repeat, code) = parse_tform(&tform, i)?;
            let name = header
                .get_string(&format!("TTYPE{}", i))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| format!("COL{}", i));
            if code == 'P' || code == 'Q' {
                return Err(FitsError::Unsupported(format!(
                    "column '{}' is a variable-length array ({})",
                    name,
                    tform.trim()
                )));
            }
            columns.push(Column {
                name,
                unit: header
                    .get_string(&format!("TUNIT{}", i))
                    .filter(|u| !u.trim().is_empty()),
                code,
                repeat,
                scale: header.get_float(&format!("TSCAL{}", i)).unwrap_or(1.0),
                zero: header.get_float(&format!("TZERO{}", i)).unwrap_or(0.0),
                null: header.get_int(&format!("TNULL{}", i)),
            });
        }

        Ok(Self {
            header,
            cells: vec![Vec::with_capacity(n_rows); columns.len()],
            columns,
            n_rows,
        })
    }

    /// Split each row's flat value list into the columns, by repeat count.
    fn fill<R: AsRef<[DataValue]>>(&mut self, rows: impl Iterator<Item = R>) -> Result<(), FitsError> {
        let width = self
            .columns
            .iter()
            .try_fold(0usize, |acc, c| acc.checked_add(c.repeat))
            .ok_or_else(|| FitsError::Header("column repeat counts overflow".into()))?;

        let mut seen = 0;
        for row in rows.take(self.n_rows) {
            let values = row.as_ref();
            if values.len() != width {
                return Err(FitsError::Header(format!(
                    "row {} holds {} values but TFORMs declare {}",
                    seen + 1,
                    values.len(),
                    width
                )));
            }
            let mut offset = 0;
            for (column, cells) in self.columns.iter().zip(self.cells.iter_mut()) {
                let end = offset + column.repeat;
                cells.push(values[offset..end].iter().map(Cell::from).collect());
                offset = end;
            }
            seen += 1;
        }

        if seen < self.n_rows {
            return Err(FitsError::Truncated(format!(
                "table declares {} rows but only {} could be read",
                self.n_rows, seen
            )));
        }
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column lookup, case-insensitive on `TTYPEn`.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Every cell of a numeric column, one vector per row, with
    /// `TSCALn`/`TZEROn` applied and `TNULLn` mapped to NaN.
    pub fn column_f64(&self, name: &str) -> Result<Vec<Vec<f64>>, FitsError> {
        let index = self
            .position(name)
            .ok_or_else(|| FitsError::MissingColumn(name.to_string()))?;
        let column = &self.columns[index];
        if !column.is_numeric() {
            return Err(FitsError::NotNumeric {
                column: column.name.clone(),
                kind: column.code,
            });
        }
        Ok(self.cells[index]
            .iter()
            .map(|row| row.iter().map(|cell| column.scaled(*cell)).collect())
            .collect())
    }

    /// First element of each row, for scalar columns.
    pub fn scalar_f64(&self, name: &str) -> Result<Vec<f64>, FitsError> {
        Ok(self
            .column_f64(name)?
            .into_iter()
            .map(|cell| cell.first().copied().unwrap_or(f64::NAN))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_fixtures::{bintable_hdu, primary_hdu, TestColumn};

    fn file(parts: Vec<Vec<u8>>) -> FitsFile {
        FitsFile::from_bytes(parts.concat()).unwrap()
    }

    #[test]
    fn test_rejects_non_fits_bytes() {
        let err = FitsFile::from_bytes(b"\x89HDF\r\n\x1a\n".to_vec()).unwrap_err();
        assert!(matches!(err, FitsError::NotFits(_)));
        let err = FitsFile::from_bytes(b"SIMPLE  = garbage".to_vec()).unwrap_err();
        assert!(matches!(err, FitsError::Truncated(_)));
    }

    #[test]
    fn test_hdu_walk_and_lookup() {
        let f = file(vec![
            primary_hdu(&[("TARGNAME", "'WASP-39'")]),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("int_mid_MJD_UTC", &[1.0, 2.0])]),
            bintable_hdu("EXTRACT1D", Some(1), &[], &[TestColumn::scalars("FLUX", &[3.0])]),
            bintable_hdu("EXTRACT1D", Some(2), &[], &[TestColumn::scalars("FLUX", &[4.0])]),
        ]);
        assert_eq!(f.hdus().len(), 4);
        assert_eq!(f.primary_header().get_string("TARGNAME").as_deref(), Some("WASP-39"));
        assert_eq!(f.extensions_named("extract1d"), vec![2, 3]);
        assert_eq!(f.hdus()[3].version(), 2);
        assert!(matches!(f.table(0), Err(FitsError::NotTable(0))));
        assert!(matches!(f.table(9), Err(FitsError::NotTable(9))));
    }

    #[test]
    fn test_fixed_array_column() {
        let f = file(vec![
            primary_hdu(&[]),
            bintable_hdu(
                "EXTRACT1D",
                None,
                &[("TUNIT1", "'um'")],
                &[TestColumn::arrays("WAVELENGTH", &[vec![1.0, 2.0], vec![3.0, 4.0]])],
            ),
        ]);
        let table = f.table(1).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column("wavelength").and_then(|c| c.unit.clone()).as_deref(), Some("um"));
        assert_eq!(
            table.column_f64("wavelength").unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
        assert!(matches!(table.column_f64("FLUX"), Err(FitsError::MissingColumn(_))));
    }

    #[test]
    fn test_variable_length_column_is_unsupported() {
        let f = file(vec![
            primary_hdu(&[]),
            bintable_hdu(
                "EXTRACT1D",
                None,
                &[],
                &[TestColumn::var_arrays("FLUX", &[vec![1.5, 2.5, 3.5], vec![4.5]])],
            ),
            bintable_hdu("INT_TIMES", None, &[], &[TestColumn::scalars("T", &[1.0])]),
        ]);
        assert!(matches!(f.table(1), Err(FitsError::Unsupported(_))));
        // The rest of the file stays readable.
        assert_eq!(f.table(2).unwrap().scalar_f64("T").unwrap(), vec![1.0]);
    }

    #[test]
    fn test_zero_repeat_descriptor_does_not_panic() {
        let mut bytes = [
            primary_hdu(&[]),
            bintable_hdu("EXTRACT1D", None, &[], &[TestColumn::var_arrays("FLUX", &[vec![1.0]])]),
        ]
        .concat();
        let at = bytes.windows(5).position(|w| w == b"'1PD'").unwrap();
        bytes[at..at + 5].copy_from_slice(b"'0QD'");
        // Rejected either while walking headers or when the table is requested.
        let result = FitsFile::from_bytes(bytes).and_then(|f| f.table(1).map(|_| ()));
        assert!(result.is_err());
    }

    #[test]
    fn test_scale_and_zero_applied() {
        let f = file(vec![
            primary_hdu(&[]),
            bintable_hdu(
                "T",
                None,
                &[("TSCAL1", "2.0"), ("TZERO1", "10.0")],
                &[TestColumn::scalars("X", &[1.0, 3.0])],
            ),
        ]);
        assert_eq!(f.table(1).unwrap().scalar_f64("X").unwrap(), vec![12.0, 16.0]);
    }

    #[test]
    fn test_truncated_table_is_error() {
        let mut bytes = [
            primary_hdu(&[]),
            bintable_hdu("T", None, &[], &[TestColumn::scalars("X", &[1.0; 400])]),
        ]
        .concat();
        bytes.truncate(BLOCK_SIZE * 2 + 100);
        let truncated = FitsFile::from_bytes(bytes).and_then(|f| f.table(1).map(|_| ()));
        assert!(truncated.is_err());
    }

    #[test]
    fn test_parse_tform() {
        assert_eq!(parse_tform("1D", 1).unwrap(), (1, 'D'));
        assert_eq!(parse_tform("E", 1).unwrap(), (1, 'E'));
        assert_eq!(parse_tform("340e", 1).unwrap(), (340, 'E'));
        assert_eq!(parse_tform("0QD", 1).unwrap(), (0, 'Q'));
        assert!(parse_tform("1Z", 3).is_err());
        assert!(parse_tform("99999999999999999999999D", 3).is_err());
    }
}
