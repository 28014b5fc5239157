//! Error taxonomy for the tokenization path.
//!
//! Every failure that can reach a caller is a [`TokenizerError`]. Lower level
//! parse errors ([`VocabError`], [`PatternError`]) describe *why* an artifact
//! is unusable and are folded into [`TokenizerError::CorruptArtifact`] at the
//! store boundary.

use std::path::PathBuf;
use thiserror::Error;

use super::pattern::PatternError;
use super::vocab::VocabError;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),
    #[error("Failed to fetch artifact {key}: {message}")]
    ArtifactFetch { key: String, message: String },
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),
    #[error("Invalid input kind: {0}")]
    InvalidInputKind(String),
    #[error("Unknown token id: {0}")]
    UnknownToken(u32),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
}

impl TokenizerError {
    /// Stable, machine readable reason shown next to "tokenization unavailable".
    pub fn reason_code(&self) -> &'static str {
        match self {
            TokenizerError::UnknownModel(_) => "unknown_model",
            TokenizerError::ArtifactNotFound(_) => "artifact_not_found",
            TokenizerError::ArtifactFetch { .. } => "artifact_fetch",
            TokenizerError::CorruptArtifact(_) => "corrupt_artifact",
            TokenizerError::InvalidInputKind(_) => "invalid_input_kind",
            TokenizerError::UnknownToken(_) => "unknown_token",
            TokenizerError::IoError(_) => "io",
            TokenizerError::Utf8Error => "invalid_utf8",
        }
    }

    /// Only collaborator-originated fetch failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenizerError::ArtifactFetch { .. })
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        TokenizerError::CorruptArtifact(message.into())
    }
}

impl From<VocabError> for TokenizerError {
    fn from(err: VocabError) -> Self {
        match err {
            VocabError::IoError(io) => TokenizerError::IoError(io),
            other => TokenizerError::CorruptArtifact(other.to_string()),
        }
    }
}

impl From<PatternError> for TokenizerError {
    fn from(err: PatternError) -> Self {
        TokenizerError::CorruptArtifact(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_errors_are_retryable() {
        let fetch = TokenizerError::ArtifactFetch {
            key: "hf:org/model".to_string(),
            message: "timeout".to_string(),
        };
        assert!(fetch.is_retryable());
        assert!(!TokenizerError::UnknownModel("x".to_string()).is_retryable());
        assert!(!TokenizerError::corrupt("bad").is_retryable());
    }

    #[test]
    fn test_vocab_errors_become_corrupt_artifacts() {
        let err: TokenizerError = VocabError::ParseError("Missing space separator".into()).into();
        assert_eq!(err.reason_code(), "corrupt_artifact");
    }

    #[test]
    fn test_pattern_errors_become_corrupt_artifacts() {
        let err: TokenizerError = PatternError::Pcre2NotEnabled.into();
        assert_eq!(err.reason_code(), "corrupt_artifact");
        assert!(!err.is_retryable());
    }
}
