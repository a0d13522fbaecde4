use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum NeurographError {
        /// A pipeline parameter has an invalid value. Raised before any processing starts.
        InvalidConfig { param: String, reason: String } {
            display("Invalid value for parameter '{}': {}", param, reason)
        }

        /// A required input (atlas, condition, subject, record) could not be found.
        MissingData { what: String, path: PathBuf } {
            display("Missing {} at '{}'", what, path.display())
        }

        /// Array shapes do not agree, e.g. time point counts of merged atlases.
        DimensionMismatch { context: String, expected: usize, got: usize } {
            display("Dimension mismatch in {}: expected {}, got {}", context, expected, got)
        }

        /// Records that are combined do not describe the same subject and condition.
        IdentityMismatch { context: String } {
            display("Identity mismatch: {}", context)
        }

        DuplicateRoi { atlas: String, name: String } {
            display("Duplicate ROI name '{}' in atlas '{}'", name, atlas)
        }

        DuplicateSubject { subject: String } {
            display("Subject '{}' appears more than once", subject)
        }

        /// Not enough observations for the requested statistic.
        InsufficientData { context: String } {
            display("Insufficient data: {}", context)
        }

        SingularMatrix { context: String } {
            display("Singular matrix in {}", context)
        }

        /// Invalid time series file: wrong magic bytes or inconsistent header.
        InvalidTsFormat { reason: String } {
            display("Invalid time series file: {}", reason)
        }

        UnsupportedTsVersion { version: i32 } {
            display("Unsupported time series file version {}", version)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }

        Json(err: serde_json::Error) {
            from()
            source(err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
        }

        Stats(err: statrs::StatsError) {
            from()
            source(err)
        }
    }
}

impl NeurographError {
    pub(crate) fn config<P: Into<String>, R: Into<String>>(param: P, reason: R) -> Self {
        NeurographError::InvalidConfig { param: param.into(), reason: reason.into() }
    }

    /// Whether this error means an input was absent rather than malformed.
    pub fn is_missing_data(&self) -> bool {
        match self {
            NeurographError::MissingData { .. } => true,
            NeurographError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, NeurographError>;
