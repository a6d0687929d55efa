use std::path::PathBuf;

/// Errors surfaced by the comparison core and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("Sample not found: {sample_id}")]
    SampleNotFound { sample_id: String },

    #[error("Trial not found: {tag}")]
    TrialNotFound { tag: String },

    #[error("Asset not found for {tag} frame {frame_number}: {path}")]
    AssetNotFound {
        tag: String,
        frame_number: usize,
        path: PathBuf,
    },

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    #[error("Archive input does not exist: {path}")]
    ArchiveInputMissing { path: PathBuf },

    #[error("Empty input: {what}")]
    EmptyInput { what: String },

    #[error("Mismatched frame lists: {trial} trial frames vs {reference} reference frames")]
    MismatchedLength { trial: usize, reference: usize },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type MotionResult<T> = Result<T, MotionError>;

impl MotionError {
    pub fn sample_not_found(sample_id: impl Into<String>) -> Self {
        Self::SampleNotFound {
            sample_id: sample_id.into(),
        }
    }

    pub fn empty_input(what: impl Into<String>) -> Self {
        Self::EmptyInput { what: what.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True for the lookup failures a caller can fix by extracting the missing recording.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SampleNotFound { .. }
                | Self::TrialNotFound { .. }
                | Self::AssetNotFound { .. }
                | Self::ArchiveInputMissing { .. }
        )
    }
}
