//! # Translation Errors

use thiserror::Error;

pub type TranslationResult<T> = Result<T, TranslationError>;

/// A valid filter that a store cannot express
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("Operator ~ cannot be used on field {0}")]
    MembershipOnScalar(String),

    #[error("Field {field} only supports ~, got {operator}")]
    ScalarOnMembership { field: String, operator: String },

    #[error("Field {field} expects element symbols, got {value}")]
    BadSymbol { field: String, value: String },

    #[error("Query expands to {count} sub-queries, more than the limit of {limit}")]
    TooManySubQueries { count: usize, limit: usize },
}

impl TranslationError {
    pub fn kind(&self) -> &'static str {
        "TranslationError"
    }
}
