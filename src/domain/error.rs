//! Domain error types.

/// Top-level error type for factorbench.
///
/// "No data" is never an error: lookups return `Ok(None)`. These variants
/// cover malformed data, backend failures and configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum FactorbenchError {
    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown factor: {name}")]
    UnknownFactor { name: String },

    #[error("signal cache error: {reason}")]
    Cache { reason: String },

    #[error("no data: {reason}")]
    NoData { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FactorbenchError {
    pub fn storage(reason: impl Into<String>) -> Self {
        FactorbenchError::Storage {
            reason: reason.into(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        FactorbenchError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that must abort a run rather than be recovered per symbol.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FactorbenchError::ConfigParse { .. }
                | FactorbenchError::ConfigMissing { .. }
                | FactorbenchError::ConfigInvalid { .. }
                | FactorbenchError::UnknownFactor { .. }
        )
    }
}

impl From<&FactorbenchError> for std::process::ExitCode {
    fn from(err: &FactorbenchError) -> Self {
        let code: u8 = match err {
            FactorbenchError::Io(_) => 1,
            FactorbenchError::ConfigParse { .. }
            | FactorbenchError::ConfigMissing { .. }
            | FactorbenchError::ConfigInvalid { .. }
            | FactorbenchError::UnknownFactor { .. } => 2,
            FactorbenchError::Storage { .. } => 3,
            FactorbenchError::Cache { .. } => 4,
            FactorbenchError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
