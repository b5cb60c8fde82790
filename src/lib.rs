//! # oidata
//!
//! Ingestion, closure reconciliation, merging and spectral rebinning of optical
//! interferometry (OIFITS) data.
//!
//! ## Workflow
//!
//! ```text
//! OiFileReader ──► ingest::load_file ──► Dataset ──► merge::merge ──► Dataset per setup
//!                      │                                 │
//!                      ├─ rebin                          ├─ error_filter
//!                      └─ closure                        ├─ closure
//!                                                        └─ collapse (optional)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use camino::Utf8Path;
//! use oidata::ingest::{load_files, LoadOptions};
//! use oidata::merge::merge;
//! use oidata::reader::memory::MemoryReader;
//!
//! let reader = MemoryReader::new();
//! let options = LoadOptions::builder().binning(3).build().unwrap();
//! let batch = load_files(&reader, &[Utf8Path::new("a.fits"), Utf8Path::new("b.fits")], &options);
//! let merged = merge(&batch.datasets, false);
//! for dataset in &merged {
//!     println!("{dataset}");
//! }
//! ```
pub mod closure;
pub mod collapse;
pub mod constants;
pub mod dataset;
mod display;
pub mod environment;
pub mod epoch;
pub mod error_filter;
pub mod ingest;
pub mod merge;
pub mod oifits_errors;
pub mod reader;
pub mod rebin;
pub mod station;
pub mod tables;

pub use dataset::Dataset;
pub use oifits_errors::{OifitsError, OifitsWarning};
