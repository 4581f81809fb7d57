//! Errors raised when persisted records are turned into typed rows

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid day '{0}', expected YYYY-MM-DD")]
    InvalidDay(String),

    #[error("timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),

    #[error("invalid number in {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
