//! # Query Errors

use thiserror::Error;

/// Result type for query compilation
pub type QueryResult<T> = Result<T, QueryError>;

/// A filter token that could not be compiled.
///
/// Every variant names the offending token so the user can find it in
/// the command line. Compilation stops at the first error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    NoOperator(String),

    #[error("Missing key in query: {0}")]
    EmptyKey(String),

    #[error("Empty value in query: {0}")]
    EmptyOperand(String),

    #[error("Operator {operator} takes exactly one value: {token}")]
    TooManyOperands { operator: String, token: String },

    #[error("Operator ~ is only valid on multi-valued fields: {0}")]
    MembershipOnScalar(String),

    #[error("Operator linked with the wrong logical operator: {0}")]
    WrongLink(String),

    #[error("Unbalanced quotes in query: {0}")]
    UnbalancedQuotes(String),
}

impl QueryError {
    /// Stable kind name used in one-line error reports
    pub fn kind(&self) -> &'static str {
        "QueryError"
    }
}
