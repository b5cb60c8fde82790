//! # Load options
//!
//! [`LoadOptions`] gathers the caller's choices for [`load_file`](super::load_file) and
//! [`load_files`](super::load_files), built and validated through [`LoadOptionsBuilder`].
//!
//! | Option | Default | Meaning |
//! |---|---|---|
//! | `instrument` | `None` | `INSNAME` to load; `None` loads every instrument of the file |
//! | `target` | `None` | target name; `None` requires a single target in `OI_TARGET` |
//! | `binning` | `None` | spectral binning factor (`> 0`) |
//! | `median_filter` | `None` | median-filter half-width (`> 0`) |
//! | `telluric` | `None` | transmission overriding the `TELLURICS` extension |
//! | `include_header` | `false` | keep the primary header on the dataset |
//! | `error_filter` | `None` | error/flag rules attached to every loaded dataset |
//!
//! ## Example
//!
//! ```rust
//! use oidata::ingest::LoadOptions;
//!
//! let options = LoadOptions::builder()
//!     .instrument("GRAVITY_SC_P1")
//!     .binning(5)
//!     .build()
//!     .unwrap();
//! assert_eq!(options.binning, Some(5));
//! ```
use std::fmt;

use crate::error_filter::ErrorFilterConfig;
use crate::oifits_errors::OifitsError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub instrument: Option<String>,
    pub target: Option<String>,
    pub binning: Option<usize>,
    pub median_filter: Option<usize>,
    pub telluric: Option<Vec<f64>>,
    pub include_header: bool,
    pub error_filter: Option<ErrorFilterConfig>,
}

impl LoadOptions {
    pub fn builder() -> LoadOptionsBuilder {
        LoadOptionsBuilder::new()
    }

    /// Same options, restricted to `instrument`.
    pub(crate) fn for_instrument(&self, instrument: &str) -> LoadOptions {
        LoadOptions {
            instrument: Some(instrument.to_string()),
            ..self.clone()
        }
    }
}

/// Builder for [`LoadOptions`], with validation.
#[derive(Debug, Clone, Default)]
pub struct LoadOptionsBuilder {
    options: LoadOptions,
}

impl LoadOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument(mut self, v: impl Into<String>) -> Self {
        self.options.instrument = Some(v.into());
        self
    }
    pub fn target(mut self, v: impl Into<String>) -> Self {
        self.options.target = Some(v.into());
        self
    }
    pub fn binning(mut self, v: usize) -> Self {
        self.options.binning = Some(v);
        self
    }
    pub fn median_filter(mut self, v: usize) -> Self {
        self.options.median_filter = Some(v);
        self
    }
    pub fn telluric(mut self, v: Vec<f64>) -> Self {
        self.options.telluric = Some(v);
        self
    }
    pub fn include_header(mut self, v: bool) -> Self {
        self.options.include_header = v;
        self
    }
    pub fn error_filter(mut self, v: ErrorFilterConfig) -> Self {
        self.options.error_filter = Some(v);
        self
    }

    /// Finalize the builder.
    ///
    /// Return
    /// ----------
    /// * `Err(OifitsError::InvalidLoadParameter)` for a zero binning factor or median width,
    ///   or an empty or non-finite telluric override.
    /// * `Err(OifitsError::InvalidErrorFilter)` for an invalid error filter.
    pub fn build(self) -> Result<LoadOptions, OifitsError> {
        let o = &self.options;
        if o.binning == Some(0) {
            return Err(OifitsError::InvalidLoadParameter(
                "binning must be > 0".into(),
            ));
        }
        if o.median_filter == Some(0) {
            return Err(OifitsError::InvalidLoadParameter(
                "median_filter must be > 0".into(),
            ));
        }
        if let Some(t) = &o.telluric {
            if t.is_empty() {
                return Err(OifitsError::InvalidLoadParameter(
                    "telluric override is empty".into(),
                ));
            }
            if t.iter().any(|x| !x.is_finite()) {
                return Err(OifitsError::InvalidLoadParameter(
                    "telluric override must be finite".into(),
                ));
            }
        }
        if let Some(filter) = &o.error_filter {
            filter.validate()?;
        }
        Ok(self.options)
    }
}

impl fmt::Display for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "<any>".into());
        let num = |v: Option<usize>| v.map_or_else(|| "none".to_string(), |x| x.to_string());
        if f.alternate() {
            const PARAM_COL: usize = 40;
            writeln!(f, "Load options")?;
            writeln!(f, "------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Selection]")?;
            line!("instrument     = {}", opt(&self.instrument), "INSNAME to load")?;
            line!("target         = {}", opt(&self.target), "Target name")?;

            writeln!(f, "\n[Spectral processing]")?;
            line!("binning        = {}", num(self.binning), "Channels per bin")?;
            line!("median_filter  = {}", num(self.median_filter), "Median half-width")?;
            line!(
                "telluric       = {}",
                self.telluric
                    .as_ref()
                    .map_or_else(|| "file".to_string(), |t| format!("{} channels", t.len())),
                "Transmission source"
            )?;

            writeln!(f, "\n[Output]")?;
            line!("include_header = {}", self.include_header, "Keep primary header")?;
            line!(
                "error_filter   = {}",
                self.error_filter.is_some(),
                "Rules applied at merge"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "LoadOptions(instrument={}, target={}, binning={}, median_filter={}, telluric={}, include_header={}, error_filter={})",
                opt(&self.instrument),
                opt(&self.target),
                num(self.binning),
                num(self.median_filter),
                self.telluric.is_some(),
                self.include_header,
                self.error_filter.is_some(),
            )
        }
    }
}
