#![allow(dead_code)]

use approx::assert_relative_eq;
use oidata::reader::memory::MemoryReader;
use oidata::reader::{Column, Extension, Header, HeaderValue, RecordTable};
use oidata::tables::ObservableTable;
use oidata::Dataset;

/// Channel centres (µm) shared by most fixtures.
pub const WL: [f64; 3] = [2.0, 2.1, 2.2];

/// Station indices of the test array.
pub const A: i64 = 1;
pub const B: i64 = 2;
pub const C: i64 = 3;
pub const D: i64 = 4;

/// One raw record of a data extension, constant across channels.
#[derive(Debug, Clone)]
pub struct Row {
    pub target_id: i64,
    pub stations: Vec<i64>,
    pub mjd: f64,
    pub uv: Vec<(f64, f64)>,
    pub value: f64,
    pub error: f64,
    pub flag: Vec<bool>,
}

/// Unflagged record of target 1 with made-up coordinates.
pub fn row(stations: &[i64], mjd: f64, value: f64) -> Row {
    let legs = match stations.len() {
        2 => 1,
        3 => 2,
        _ => 0,
    };
    Row {
        target_id: 1,
        stations: stations.to_vec(),
        mjd,
        uv: (0..legs)
            .map(|k| (10.0 + 10.0 * k as f64, 5.0 * stations[0] as f64))
            .collect(),
        value,
        error: 0.01,
        flag: Vec::new(),
    }
}

impl Row {
    pub fn target(mut self, id: i64) -> Self {
        self.target_id = id;
        self
    }

    pub fn error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }

    pub fn flags(mut self, flag: &[bool]) -> Self {
        self.flag = flag.to_vec();
        self
    }

    fn flag_row(&self, n: usize) -> Vec<bool> {
        if self.flag.is_empty() {
            vec![false; n]
        } else {
            self.flag.clone()
        }
    }
}

/// In-memory OIFITS file: primary header, OI_TARGET, OI_ARRAY, OI_WAVELENGTH and data tables.
#[derive(Debug, Clone)]
pub struct OiFile {
    primary: Header,
    targets: Vec<(i64, String)>,
    wavelengths: Vec<(String, Vec<f64>)>,
    instrument: String,
    data: Vec<Extension>,
}

impl OiFile {
    pub fn new(instrument: &str, wl: &[f64]) -> Self {
        OiFile {
            primary: Header::new(),
            targets: vec![(1, "HD1".to_string())],
            wavelengths: vec![(instrument.to_string(), wl.to_vec())],
            instrument: instrument.to_string(),
            data: Vec::new(),
        }
    }

    /// Add a wavelength table; following data tables belong to `instrument`.
    pub fn instrument(mut self, instrument: &str, wl: &[f64]) -> Self {
        self.wavelengths.push((instrument.to_string(), wl.to_vec()));
        self.instrument = instrument.to_string();
        self
    }

    pub fn target(mut self, id: i64, name: &str) -> Self {
        self.targets.push((id, name.to_string()));
        self
    }

    pub fn card(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.primary.insert(key, value);
        self
    }

    fn n_channels(&self) -> usize {
        self.wavelengths
            .iter()
            .find(|(name, _)| *name == self.instrument)
            .map_or(0, |(_, wl)| wl.len())
    }

    fn data_header(&self, extname: &str) -> Header {
        Header::new()
            .with("EXTNAME", extname)
            .with("INSNAME", self.instrument.as_str())
            .with("ARRNAME", "TEST")
    }

    fn common(rows: &[Row]) -> RecordTable {
        RecordTable::new(rows.len())
            .with_column(
                "TARGET_ID",
                Column::Int(rows.iter().map(|r| r.target_id).collect()),
            )
            .with_column("MJD", Column::Float(rows.iter().map(|r| r.mjd).collect()))
    }

    fn channels(rows: &[Row], n: usize, f: impl Fn(&Row) -> f64) -> Column {
        Column::float_rows(&rows.iter().map(|r| vec![f(r); n]).collect::<Vec<_>>())
    }

    fn flags(rows: &[Row], n: usize) -> Column {
        Column::bool_rows(&rows.iter().map(|r| r.flag_row(n)).collect::<Vec<_>>())
    }

    fn stations(rows: &[Row]) -> Column {
        Column::int_rows(&rows.iter().map(|r| r.stations.clone()).collect::<Vec<_>>())
    }

    fn coordinate(rows: &[Row], leg: usize, v: bool) -> Column {
        Column::Float(
            rows.iter()
                .map(|r| if v { r.uv[leg].1 } else { r.uv[leg].0 })
                .collect(),
        )
    }

    pub fn vis2(mut self, rows: &[Row]) -> Self {
        let n = self.n_channels();
        let table = Self::common(rows)
            .with_column("STA_INDEX", Self::stations(rows))
            .with_column("UCOORD", Self::coordinate(rows, 0, false))
            .with_column("VCOORD", Self::coordinate(rows, 0, true))
            .with_column("VIS2DATA", Self::channels(rows, n, |r| r.value))
            .with_column("VIS2ERR", Self::channels(rows, n, |r| r.error))
            .with_column("FLAG", Self::flags(rows, n));
        self.data.push(Extension::new(self.data_header("OI_VIS2"), table));
        self
    }

    /// `VISAMP = value`, `VISPHI = 10·value` degrees.
    pub fn vis(mut self, rows: &[Row]) -> Self {
        let n = self.n_channels();
        let table = Self::common(rows)
            .with_column("STA_INDEX", Self::stations(rows))
            .with_column("UCOORD", Self::coordinate(rows, 0, false))
            .with_column("VCOORD", Self::coordinate(rows, 0, true))
            .with_column("VISAMP", Self::channels(rows, n, |r| r.value))
            .with_column("VISAMPERR", Self::channels(rows, n, |r| r.error))
            .with_column("VISPHI", Self::channels(rows, n, |r| 10.0 * r.value))
            .with_column("VISPHIERR", Self::channels(rows, n, |_| 1.0))
            .with_column("FLAG", Self::flags(rows, n));
        self.data.push(Extension::new(self.data_header("OI_VIS"), table));
        self
    }

    /// `T3AMP = value`, `T3PHI = 10·value` degrees.
    pub fn t3(mut self, rows: &[Row]) -> Self {
        let n = self.n_channels();
        let table = Self::common(rows)
            .with_column("STA_INDEX", Self::stations(rows))
            .with_column("U1COORD", Self::coordinate(rows, 0, false))
            .with_column("V1COORD", Self::coordinate(rows, 0, true))
            .with_column("U2COORD", Self::coordinate(rows, 1, false))
            .with_column("V2COORD", Self::coordinate(rows, 1, true))
            .with_column("T3AMP", Self::channels(rows, n, |r| r.value))
            .with_column("T3AMPERR", Self::channels(rows, n, |r| r.error))
            .with_column("T3PHI", Self::channels(rows, n, |r| 10.0 * r.value))
            .with_column("T3PHIERR", Self::channels(rows, n, |_| 1.0))
            .with_column("FLAG", Self::flags(rows, n));
        self.data.push(Extension::new(self.data_header("OI_T3"), table));
        self
    }

    /// Flux table with the data in column `column` (`FLUXDATA`, or `FLUX` as GRAVITY writes it).
    pub fn flux_in(mut self, column: &str, rows: &[Row]) -> Self {
        let n = self.n_channels();
        let table = Self::common(rows)
            .with_column(
                "STA_INDEX",
                Column::Int(rows.iter().map(|r| r.stations[0]).collect()),
            )
            .with_column(column, Self::channels(rows, n, |r| r.value))
            .with_column("FLUXERR", Self::channels(rows, n, |r| r.error))
            .with_column("FLAG", Self::flags(rows, n));
        self.data.push(Extension::new(self.data_header("OI_FLUX"), table));
        self
    }

    pub fn flux(self, rows: &[Row]) -> Self {
        self.flux_in("FLUXDATA", rows)
    }

    pub fn tellurics(mut self, transmission: &[f64]) -> Self {
        let table = RecordTable::new(transmission.len())
            .with_column("TELL_TRANS", Column::Float(transmission.to_vec()));
        self.data.push(Extension::new(
            Header::new().with("EXTNAME", "TELLURICS"),
            table,
        ));
        self
    }

    pub fn build(self) -> Vec<Extension> {
        let mut extensions = vec![Extension::primary(self.primary)];
        extensions.push(Extension::new(
            Header::new().with("EXTNAME", "OI_TARGET"),
            RecordTable::new(self.targets.len())
                .with_column(
                    "TARGET_ID",
                    Column::Int(self.targets.iter().map(|t| t.0).collect()),
                )
                .with_column(
                    "TARGET",
                    Column::Str(self.targets.iter().map(|t| t.1.clone()).collect()),
                ),
        ));
        extensions.push(Extension::new(
            Header::new().with("EXTNAME", "OI_ARRAY").with("ARRNAME", "TEST"),
            RecordTable::new(4)
                .with_column("STA_INDEX", Column::Int(vec![A, B, C, D]))
                .with_column(
                    "STA_NAME",
                    Column::Str(["A", "B", "C", "D"].map(String::from).to_vec()),
                ),
        ));
        for (instrument, wl) in &self.wavelengths {
            extensions.push(Extension::new(
                Header::new()
                    .with("EXTNAME", "OI_WAVELENGTH")
                    .with("INSNAME", instrument.as_str()),
                RecordTable::new(wl.len())
                    .with_column(
                        "EFF_WAVE",
                        Column::Float(wl.iter().map(|w| w * 1e-6).collect()),
                    )
                    .with_column("EFF_BAND", Column::Float(vec![0.05e-6; wl.len()])),
            ));
        }
        extensions.extend(self.data);
        extensions
    }
}

/// Reader serving `files`.
pub fn reader(files: Vec<(&str, OiFile)>) -> MemoryReader {
    let mut reader = MemoryReader::new();
    for (path, file) in files {
        reader.insert(path, file.build());
    }
    reader
}

/// Check the shape invariant of every table and of the closure formulas.
pub fn assert_shapes(dataset: &Dataset) {
    assert!(
        dataset.check_shapes().is_ok(),
        "{:?}",
        dataset.check_shapes()
    );
}

/// Number of flagged samples in every table, in a stable order.
pub fn flag_counts(dataset: &Dataset) -> Vec<usize> {
    let count = |flag: &nalgebra::DMatrix<bool>| flag.iter().filter(|&&f| f).count();
    dataset
        .flux
        .values()
        .map(|t| count(t.flag()))
        .chain(dataset.vis.values().map(|t| count(t.flag())))
        .chain(dataset.vis2.values().map(|t| count(t.flag())))
        .chain(dataset.t3.values().map(|t| count(t.flag())))
        .collect()
}

pub fn assert_grid(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert_relative_eq!(*a, *e, epsilon = 1e-9);
    }
}
