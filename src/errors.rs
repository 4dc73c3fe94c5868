use thiserror::Error;

/// Errors raised while turning an on-disk alignment index into per-tile data volumes
///
/// Index errors are fatal for the sample they describe; the orchestrator decides whether
/// that aborts the whole run.
///
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid index '{path}': {reason}")]
    InvalidIndex { path: String, reason: String },

    /// The sample parsed cleanly but carries no tile data at all
    #[error("no usable chromosomes in index: '{path}'")]
    EmptyIndex { path: String },

    #[error("chromosome '{chrom}' not found")]
    MissingReference { chrom: String },

    /// A sample reports tile data that cannot belong to the cohort reference list
    #[error("index '{path}' is incompatible with the cohort reference list: {reason}")]
    IncompatibleCohort { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub fn invalid(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIndex {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
