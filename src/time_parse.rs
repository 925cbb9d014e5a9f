//! Parsing of `seek` time arguments.
//!
//! A time string is a decimal integer with an optional unit suffix; without
//! a unit the value is taken as microseconds.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("bad time: {0}")]
    BadTime(String),
    #[error("bad time unit: {0}")]
    BadUnit(String),
    #[error("time out of range: {0}")]
    OutOfRange(String),
}

/// Parses a time string into microseconds.
pub fn parse(s: &str) -> Result<u64, TimeParseError> {
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(digits_end);

    let value: u64 = digits
        .parse()
        .map_err(|_| TimeParseError::BadTime(s.to_string()))?;

    let multiplier: u64 = match unit {
        "" | "us" => 1,
        "ms" => 1_000,
        "s" => 1_000_000,
        "m" => 60_000_000,
        "h" => 3_600_000_000,
        _ => return Err(TimeParseError::BadUnit(unit.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| TimeParseError::OutOfRange(s.to_string()))
}
