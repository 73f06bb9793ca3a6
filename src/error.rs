use thiserror::Error;

/// Errors raised while chaining clips into one video.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation failed [{code}]: {message}")]
    Generation { code: String, message: String },

    #[error("Probe failed for {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("Continuity padding skipped for {path}: {reason}")]
    Pad { path: String, reason: String },

    #[error("Frame extraction failed for {path}: {reason}")]
    FrameExtraction { path: String, reason: String },

    #[error("Composition failed: {reason}")]
    Composition { reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        Self::Generation {
            code: "transport".to_string(),
            message: err.to_string(),
        }
    }
}

impl ChainError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    pub fn generation<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::Generation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A failed pad leaves the segment usable; everything else halts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Pad { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_is_the_only_non_fatal_kind() {
        let pad = ChainError::Pad {
            path: "segment_2.mp4".to_string(),
            reason: "seed frame missing".to_string(),
        };
        assert!(!pad.is_fatal());
        assert!(ChainError::configuration("bad").is_fatal());
        assert!(ChainError::generation("content_policy_violation", "nope").is_fatal());
        assert!(ChainError::Cancelled.is_fatal());
    }

    #[test]
    fn test_generation_message_carries_code() {
        let err = ChainError::generation("content_policy_violation", "Prompt rejected");
        let text = err.to_string();
        assert!(text.contains("content_policy_violation"));
        assert!(text.contains("Prompt rejected"));
    }
}
