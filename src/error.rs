use std::path::PathBuf;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Failure while decoding or analysing the source audio.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to open audio file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("{path} contains no decodable audio samples")]
    Empty { path: PathBuf },
    #[error("resampling {path} failed: {reason}")]
    Resample { path: PathBuf, reason: String },
}

/// Every fatal outcome of a render job.
///
/// Each variant names the stage it came from so callers can tell a bad input
/// apart from a missing tool or an internal failure.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("encoder unavailable: {reason}\n{hint}")]
    EncoderUnavailable { reason: String, hint: &'static str },

    #[error("invalid audio input {path}: {reason}")]
    AudioValidation { path: PathBuf, reason: String },

    #[error("audio analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("unknown frame generator '{name}'. Available: {}", available.join(", "))]
    UnknownGenerator { name: String, available: Vec<String> },

    #[error("frame generator '{name}' failed: {reason}")]
    Generator { name: String, reason: String },

    #[error("invalid render configuration: {0}")]
    InvalidConfig(String),

    #[error("frame scheduler chunk starting at frame {chunk_start} failed: {reason}")]
    Scheduler { chunk_start: usize, reason: String },

    #[error("video encoding failed ({status}): {stderr}")]
    Encoding { status: String, stderr: String },

    #[error("audio muxing failed ({status}): {stderr}")]
    Mux { status: String, stderr: String },

    #[error("i/o error during {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub fn io(stage: &'static str, source: std::io::Error) -> Self {
        Self::Io { stage, source }
    }

    pub fn generator(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Generator {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::EncoderUnavailable { .. } => "environment",
            Self::AudioValidation { .. } => "validation",
            Self::Analysis(_) => "analysis",
            Self::UnknownGenerator { .. } | Self::Generator { .. } => "generator",
            Self::InvalidConfig(_) => "config",
            Self::Scheduler { .. } => "scheduler",
            Self::Encoding { .. } => "encoding",
            Self::Mux { .. } => "muxing",
            Self::Io { stage, .. } => *stage,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::EncoderUnavailable { .. } => FailureKind::MissingTool,
            e if e.is_input_error() => FailureKind::BadInput,
            _ => FailureKind::Internal,
        }
    }

    /// `true` when the caller supplied something unusable (file, config,
    /// generator name) rather than the environment or the renderer failing.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::AudioValidation { .. }
                | Self::Analysis(_)
                | Self::UnknownGenerator { .. }
                | Self::InvalidConfig(_)
        )
    }
}

/// Who has to act on a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    BadInput,
    MissingTool,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BadInput => "bad input",
            Self::MissingTool => "missing tool",
            Self::Internal => "internal failure",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels_distinguish_input_tool_and_internal_failures() {
        let missing = RenderError::EncoderUnavailable {
            reason: "not on PATH".into(),
            hint: "install ffmpeg",
        };
        assert_eq!(missing.stage(), "environment");
        assert!(!missing.is_input_error());

        let bad_input = RenderError::AudioValidation {
            path: PathBuf::from("a.txt"),
            reason: "unsupported extension".into(),
        };
        assert_eq!(bad_input.stage(), "validation");
        assert!(bad_input.is_input_error());

        let encode = RenderError::Encoding {
            status: "exit status: 1".into(),
            stderr: "boom".into(),
        };
        assert_eq!(encode.stage(), "encoding");
        assert!(encode.to_string().contains("boom"));

        assert_eq!(missing.failure_kind(), FailureKind::MissingTool);
        assert_eq!(missing.failure_kind().to_string(), "missing tool");
        assert_eq!(bad_input.failure_kind(), FailureKind::BadInput);
        assert_eq!(encode.failure_kind(), FailureKind::Internal);
    }

    #[test]
    fn unknown_generator_lists_alternatives() {
        let err = RenderError::UnknownGenerator {
            name: "nope".into(),
            available: vec!["solid".into(), "pulsing_core".into()],
        };
        assert!(err.to_string().contains("solid, pulsing_core"));
    }
}
