//! Query-boundary error types.
//!
//! Only genuinely invalid input is an error. "Not found" conditions
//! (absent values, empty stores, out-of-range start indices) are reported
//! as empty results by the query functions themselves.

use thiserror::Error;

/// Errors reported at the query boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The caller named a register the trace model does not recognize.
    #[error("unknown register name: {0}")]
    UnknownRegister(String),
    /// An address literal could not be parsed as hexadecimal or decimal.
    #[error("invalid address literal: {0}")]
    InvalidAddress(String),
}

/// Result alias used across the query surface.
pub type QueryResult<T> = Result<T, QueryError>;

/// Parse an address literal.
///
/// Hexadecimal is attempted first when an explicit `0x`/`0X` marker is
/// present; otherwise the literal is read as decimal. Surrounding
/// whitespace is ignored.
pub fn parse_address(text: &str) -> QueryResult<u64> {
    let trimmed = text.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        trimmed.parse::<u64>()
    };
    parsed.map_err(|_| QueryError::InvalidAddress(text.to_string()))
}
