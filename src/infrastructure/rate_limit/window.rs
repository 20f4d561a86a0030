//! `<integer><unit>` window parsing.

use crate::error::ValidationError;

/// Parse a window specification into seconds.
///
/// Accepts `<integer><unit>` with unit `s`, `m`, `h` or `d`.
///
/// # Errors
///
/// - [`ValidationError::InvalidWindow`] when the input does not match
///   `<integer><letter>`, or the value is zero or overflows
/// - [`ValidationError::UnsupportedWindowUnit`] for any other single-letter unit
///
/// # Example
///
/// ```
/// use quotegate::infrastructure::rate_limit::parse_window;
///
/// assert_eq!(parse_window("1h").unwrap(), 3600);
/// assert!(parse_window("invalid").is_err());
/// ```
pub fn parse_window(spec: &str) -> Result<u64, ValidationError> {
    let invalid = || ValidationError::InvalidWindow {
        input: spec.to_string(),
    };

    let digits_end = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    let (number, unit) = spec.split_at(digits_end);

    let unit_is_letter = unit.len() == 1 && unit.chars().all(|c| c.is_ascii_alphabetic());
    if number.is_empty() || !unit_is_letter {
        return Err(invalid());
    }

    let value: u64 = number.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        other => {
            return Err(ValidationError::UnsupportedWindowUnit {
                input: spec.to_string(),
                unit: other.to_string(),
            })
        }
    };

    value.checked_mul(multiplier).ok_or_else(invalid)
}
