//! # Record-table reader seam
//!
//! Decoding the binary layout of an OIFITS file is the job of an external collaborator. This
//! module defines the **in-memory shape** such a collaborator must produce and the
//! [`OiFileReader`] trait through which the ingestor asks for it.
//!
//! ## Data model
//! -----------------
//! A file is an ordered `Vec<Extension>`:
//!
//! ```text
//! Extension
//! ├── header (key → HeaderValue)   EXTNAME, INSNAME, ARRNAME, ESO ... keys
//! └── table  (RecordTable)         named columns, n_rows rows
//!     ├── scalar columns           one value per row (MJD, UCOORD, TARGET_ID, ...)
//!     └── array columns            fixed `width` values per row (VIS2DATA, FLAG, STA_INDEX, ...)
//! ```
//!
//! Extension `0` is the **primary header**; its table is empty.
//!
//! ## Resource contract
//! -----------------
//! [`OiFileReader::read_extensions`] opens the file, reads every extension and releases the
//! handle before returning. Implementations keep the handle in a local owned value, so it is
//! dropped on every exit path, `?` early returns included.
//!
//! ## See also
//! ------------
//! * [`memory::MemoryReader`] – In-memory implementation used by tests and by callers that
//!   already decoded their files.
//! * [`crate::ingest::load_file`] – Consumer of the extensions.
pub mod memory;

use std::collections::BTreeMap;

use camino::Utf8Path;
use nalgebra::DMatrix;
use smallvec::SmallVec;

use crate::oifits_errors::OifitsError;

/// Station indices of one record (`STA_INDEX`): 1 for flux, 2 for baselines, 3 for triangles.
pub type StationIndices = SmallVec<[i64; 3]>;

/// A single header card value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

/// Header of an extension: key → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: BTreeMap<String, HeaderValue>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.cards.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cards.contains_key(key)
    }

    /// String value with FITS padding removed.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.cards.get(key)? {
            HeaderValue::Str(s) => Some(s.trim()),
            _ => None,
        }
    }

    /// Numeric value; integer cards are widened to `f64`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.cards.get(key)? {
            HeaderValue::Float(x) => Some(*x),
            HeaderValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.cards.iter()
    }
}

/// Extension kinds the ingestor knows about, from the `EXTNAME` card.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Primary,
    Wavelength,
    Target,
    Array,
    Vis,
    Vis2,
    T3,
    Flux,
    Tellurics,
    Other(String),
}

impl ExtensionKind {
    pub fn from_extname(extname: &str) -> Self {
        match extname.trim() {
            "OI_WAVELENGTH" => ExtensionKind::Wavelength,
            "OI_TARGET" => ExtensionKind::Target,
            "OI_ARRAY" => ExtensionKind::Array,
            "OI_VIS" => ExtensionKind::Vis,
            "OI_VIS2" => ExtensionKind::Vis2,
            "OI_T3" => ExtensionKind::T3,
            "OI_FLUX" => ExtensionKind::Flux,
            "TELLURICS" => ExtensionKind::Tellurics,
            other => ExtensionKind::Other(other.to_string()),
        }
    }

    pub fn extname(&self) -> &str {
        match self {
            ExtensionKind::Primary => "PRIMARY",
            ExtensionKind::Wavelength => "OI_WAVELENGTH",
            ExtensionKind::Target => "OI_TARGET",
            ExtensionKind::Array => "OI_ARRAY",
            ExtensionKind::Vis => "OI_VIS",
            ExtensionKind::Vis2 => "OI_VIS2",
            ExtensionKind::T3 => "OI_T3",
            ExtensionKind::Flux => "OI_FLUX",
            ExtensionKind::Tellurics => "TELLURICS",
            ExtensionKind::Other(name) => name,
        }
    }
}

/// One column of a record table.
///
/// Array columns store their values row-major: row `i` occupies `values[i*width..(i+1)*width]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
    FloatArray { width: usize, values: Vec<f64> },
    IntArray { width: usize, values: Vec<i64> },
    BoolArray { width: usize, values: Vec<bool> },
}

impl Column {
    /// Number of rows this column holds.
    pub fn n_rows(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::FloatArray { width, values } => values.len().checked_div(*width).unwrap_or(0),
            Column::IntArray { width, values } => values.len().checked_div(*width).unwrap_or(0),
            Column::BoolArray { width, values } => values.len().checked_div(*width).unwrap_or(0),
        }
    }

    /// Build a float array column from per-row vectors.
    pub fn float_rows(rows: &[Vec<f64>]) -> Self {
        Column::FloatArray {
            width: rows.first().map_or(0, Vec::len),
            values: rows.iter().flatten().copied().collect(),
        }
    }

    /// Build a boolean array column from per-row vectors.
    pub fn bool_rows(rows: &[Vec<bool>]) -> Self {
        Column::BoolArray {
            width: rows.first().map_or(0, Vec::len),
            values: rows.iter().flatten().copied().collect(),
        }
    }

    /// Build an integer array column from per-row vectors.
    pub fn int_rows(rows: &[Vec<i64>]) -> Self {
        Column::IntArray {
            width: rows.first().map_or(0, Vec::len),
            values: rows.iter().flatten().copied().collect(),
        }
    }
}

/// Column-oriented record table of one extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    n_rows: usize,
    columns: BTreeMap<String, Column>,
}

impl RecordTable {
    pub fn new(n_rows: usize) -> Self {
        RecordTable {
            n_rows,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column insertion.
    pub fn with_column(mut self, name: &str, column: Column) -> Self {
        self.columns.insert(name.to_string(), column);
        self
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn column(&self, name: &str) -> Result<&Column, OifitsError> {
        let column = self
            .columns
            .get(name)
            .ok_or_else(|| OifitsError::Format(format!("column '{name}' not found")))?;
        if column.n_rows() != self.n_rows {
            return Err(OifitsError::Format(format!(
                "column '{name}' has {} rows, table has {}",
                column.n_rows(),
                self.n_rows
            )));
        }
        Ok(column)
    }

    /// One float per row. Integer columns are widened.
    pub fn scalars(&self, name: &str) -> Result<Vec<f64>, OifitsError> {
        match self.column(name)? {
            Column::Float(v) => Ok(v.clone()),
            Column::Int(v) => Ok(v.iter().map(|&i| i as f64).collect()),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' is not a numeric scalar column"
            ))),
        }
    }

    /// One integer per row.
    pub fn integers(&self, name: &str) -> Result<Vec<i64>, OifitsError> {
        match self.column(name)? {
            Column::Int(v) => Ok(v.clone()),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' is not an integer column"
            ))),
        }
    }

    /// One string per row, FITS padding removed.
    pub fn strings(&self, name: &str) -> Result<Vec<String>, OifitsError> {
        match self.column(name)? {
            Column::Str(v) => Ok(v.iter().map(|s| s.trim().to_string()).collect()),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' is not a string column"
            ))),
        }
    }

    /// Per-row station indices (`STA_INDEX`), `expected` indices per row.
    pub fn station_indices(
        &self,
        name: &str,
        expected: usize,
    ) -> Result<Vec<StationIndices>, OifitsError> {
        match self.column(name)? {
            Column::Int(v) if expected == 1 => Ok(v.iter().map(|&i| SmallVec::from_elem(i, 1)).collect()),
            Column::IntArray { width, values } if *width == expected => Ok(values
                .chunks(*width)
                .map(SmallVec::from_slice)
                .collect()),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' does not hold {expected} station index(es) per row"
            ))),
        }
    }

    /// Select `rows` of a float array column into a `(rows.len(), width)` matrix.
    pub fn float_matrix(&self, name: &str, rows: &[usize]) -> Result<DMatrix<f64>, OifitsError> {
        match self.column(name)? {
            Column::FloatArray { width, values } => {
                let width = *width;
                Ok(DMatrix::from_fn(rows.len(), width, |i, j| {
                    values[rows[i] * width + j]
                }))
            }
            Column::Float(values) => Ok(DMatrix::from_fn(rows.len(), 1, |i, _| values[rows[i]])),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' is not a float array column"
            ))),
        }
    }

    /// Select `rows` of a boolean array column into a `(rows.len(), width)` matrix.
    pub fn bool_matrix(&self, name: &str, rows: &[usize]) -> Result<DMatrix<bool>, OifitsError> {
        match self.column(name)? {
            Column::BoolArray { width, values } => {
                let width = *width;
                Ok(DMatrix::from_fn(rows.len(), width, |i, j| {
                    values[rows[i] * width + j]
                }))
            }
            Column::Bool(values) => Ok(DMatrix::from_fn(rows.len(), 1, |i, _| values[rows[i]])),
            _ => Err(OifitsError::Format(format!(
                "column '{name}' is not a boolean array column"
            ))),
        }
    }

    /// Width of an array column (1 for scalar columns).
    pub fn width(&self, name: &str) -> Result<usize, OifitsError> {
        Ok(match self.column(name)? {
            Column::FloatArray { width, .. }
            | Column::IntArray { width, .. }
            | Column::BoolArray { width, .. } => *width,
            _ => 1,
        })
    }
}

/// One extension (HDU) of a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extension {
    pub header: Header,
    pub table: RecordTable,
}

impl Extension {
    pub fn new(header: Header, table: RecordTable) -> Self {
        Extension { header, table }
    }

    /// Header-only extension, as the primary HDU.
    pub fn primary(header: Header) -> Self {
        Extension {
            header,
            table: RecordTable::new(0),
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        match self.header.get_str("EXTNAME") {
            Some(name) => ExtensionKind::from_extname(name),
            None => ExtensionKind::Primary,
        }
    }

    pub fn insname(&self) -> Option<&str> {
        self.header.get_str("INSNAME")
    }

    pub fn arrname(&self) -> Option<&str> {
        self.header.get_str("ARRNAME")
    }
}

/// The file-reading collaborator.
///
/// Implementations return every extension of the file at `path`, primary header first, and
/// must not keep the file open after returning.
///
/// Errors
/// ----------
/// * `OifitsError::FileNotFound` when `path` does not exist.
/// * `OifitsError::IoError` for any other failure of a file-backed reader, converted from
///   `std::io::Error` with `?`.
/// * `OifitsError::Format` when the content is not a valid FITS file.
pub trait OiFileReader {
    fn read_extensions(&self, path: &Utf8Path) -> Result<Vec<Extension>, OifitsError>;
}
