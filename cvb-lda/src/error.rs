use thiserror::Error;

/// Conditions the trainer reports by kind. Everything else travels as
/// plain `anyhow::Error` context.
#[derive(Debug, Error)]
pub enum CvbError {
    #[error("malformed composite key: expected {expected} bytes, found {found}")]
    MalformedKey { expected: usize, found: usize },

    #[error("no term-count vectors found in {source_name}")]
    EmptyCorpus { source_name: String },

    #[error("invalid configuration {name}: {message}")]
    InvalidConfiguration { name: String, message: String },

    #[error("iteration {iteration} failed: {message}")]
    IterationFailure { iteration: usize, message: String },

    #[error("iteration {iteration} failed {attempts} times; last good checkpoint is {last_good}")]
    RetryBudgetExhausted {
        iteration: usize,
        attempts: usize,
        last_good: usize,
    },

    #[error("term {term_id} document {doc_id}: contribution arrived before the model broadcast")]
    MissingModelBroadcast { term_id: i32, doc_id: i32 },

    #[error("dimension mismatch for {name}: expected {expected}, found {found}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl CvbError {
    pub fn invalid_config(name: impl Into<String>, message: impl Into<String>) -> Self {
        CvbError::InvalidConfiguration {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn dimension(name: impl Into<String>, expected: usize, found: usize) -> Self {
        CvbError::DimensionMismatch {
            name: name.into(),
            expected,
            found,
        }
    }
}
