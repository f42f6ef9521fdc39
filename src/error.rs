//! Error types for beamfuse

use thiserror::Error;

/// Result type alias for decoding operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur during decoding operations
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid configuration rejected before decoding starts
    #[error("config error: {0}")]
    Config(String),

    /// A decoder or LM score source failed or broke its batch contract
    #[error("score source error: {0}")]
    Score(String),

    /// Emission lattice shape or content error
    #[error("lattice error: {0}")]
    Lattice(String),

    /// Special-symbol table error
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// Encoder output shape error
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Monotonic/chunkwise alignment input error
    #[error("alignment error: {0}")]
    Alignment(String),
}

impl DecodeError {
    /// Shorthand for a score-source batch contract violation
    /// (row count or state count not matching the hypothesis batch).
    pub(crate) fn batch_mismatch(what: &str, got: usize, want: usize) -> Self {
        Self::Score(format!("{what}: got {got} rows for a batch of {want}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::Config("nbest 8 exceeds beam width 4".into());
        assert_eq!(err.to_string(), "config error: nbest 8 exceeds beam width 4");
    }

    #[test]
    fn test_error_variants() {
        let config_err = DecodeError::Config("test".into());
        let score_err = DecodeError::Score("test".into());
        let lattice_err = DecodeError::Lattice("test".into());
        let vocab_err = DecodeError::Vocabulary("test".into());
        let encoder_err = DecodeError::Encoder("test".into());
        let align_err = DecodeError::Alignment("test".into());

        assert!(matches!(config_err, DecodeError::Config(_)));
        assert!(matches!(score_err, DecodeError::Score(_)));
        assert!(matches!(lattice_err, DecodeError::Lattice(_)));
        assert!(matches!(vocab_err, DecodeError::Vocabulary(_)));
        assert!(matches!(encoder_err, DecodeError::Encoder(_)));
        assert!(matches!(align_err, DecodeError::Alignment(_)));
    }

    #[test]
    fn test_batch_mismatch_display() {
        let err = DecodeError::batch_mismatch("decoder logits", 3, 5);
        assert_eq!(
            err.to_string(),
            "score source error: decoder logits: got 3 rows for a batch of 5"
        );
    }
}
