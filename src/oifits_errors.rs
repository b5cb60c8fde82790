use std::fmt;

use thiserror::Error;

use crate::constants::MJD;

/// Fatal errors. A fatal error aborts the file (or the call) it was raised for, never a batch.
#[derive(Error, Debug)]
pub enum OifitsError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid load parameter: {0}")]
    InvalidLoadParameter(String),

    #[error("Invalid error filter: {0}")]
    InvalidErrorFilter(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),
}

impl PartialEq for OifitsError {
    fn eq(&self, other: &Self) -> bool {
        use OifitsError::*;
        match (self, other) {
            (Configuration(a), Configuration(b)) => a == b,
            (Format(a), Format(b)) => a == b,
            (InvalidLoadParameter(a), InvalidLoadParameter(b)) => a == b,
            (InvalidErrorFilter(a), InvalidErrorFilter(b)) => a == b,
            (FileNotFound(a), FileNotFound(b)) => a == b,

            // io errors carry no comparable payload
            (IoError(_), IoError(_)) => true,

            _ => false,
        }
    }
}

/// Non-fatal conditions. They are logged with `log::warn!` when raised and kept on the
/// [`Dataset`](crate::dataset::Dataset) they concern.
#[derive(Debug, Clone, PartialEq)]
pub enum OifitsWarning {
    /// An extension exists but holds no row for the resolved target.
    DataAbsent {
        extension: String,
        hdu: usize,
        target: String,
    },
    /// A closure triangle references a baseline absent from the raw file; a placeholder
    /// baseline table was fabricated.
    MissingBaseline { triangle: String, baseline: String },
    /// Triangle epochs without a matching row in a baseline table; placeholder rows appended.
    MissingEpochs {
        triangle: String,
        baseline: String,
        epochs: Vec<MJD>,
    },
    /// Two merged datasets disagree on a differential error-filter value; the first one wins.
    MergeConflict {
        rule: String,
        key: String,
        kept: f64,
        ignored: f64,
    },
}

impl OifitsWarning {
    /// Log this warning through the `log` facade and hand it back.
    pub(crate) fn logged(self) -> Self {
        log::warn!("{self}");
        self
    }
}

impl fmt::Display for OifitsWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OifitsWarning::DataAbsent {
                extension,
                hdu,
                target,
            } => write!(f, "no data in {extension} [HDU #{hdu}] for target \"{target}\""),
            OifitsWarning::MissingBaseline { triangle, baseline } => write!(
                f,
                "baseline {baseline} missing to define triangle {triangle}: adding placeholder"
            ),
            OifitsWarning::MissingEpochs {
                triangle,
                baseline,
                epochs,
            } => write!(
                f,
                "{} epoch(s) of triangle {triangle} missing from baseline {baseline}: adding placeholder rows",
                epochs.len()
            ),
            OifitsWarning::MergeConflict {
                rule,
                key,
                kept,
                ignored,
            } => write!(
                f,
                "cannot merge \"{rule}\" for \"{key}\": keeping {kept}, ignoring {ignored}"
            ),
        }
    }
}

#[cfg(test)]
mod test_errors {
    use super::*;

    #[test]
    fn test_error_equality_by_variant() {
        assert_eq!(
            OifitsError::Format("no OI_ARRAY".into()),
            OifitsError::Format("no OI_ARRAY".into())
        );
        assert_ne!(
            OifitsError::Format("x".into()),
            OifitsError::Configuration("x".into())
        );
        let io = || OifitsError::from(std::io::Error::other("boom"));
        assert_eq!(io(), io());
    }

    #[test]
    fn test_warning_display() {
        let w = OifitsWarning::MissingBaseline {
            triangle: "ABC".into(),
            baseline: "BC".into(),
        };
        assert_eq!(
            w.to_string(),
            "baseline BC missing to define triangle ABC: adding placeholder"
        );
    }
}
