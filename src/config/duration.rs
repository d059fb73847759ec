// src/config/duration.rs

//! Duration strings used throughout the config (`"500ms"`, `"3s"`, `"30m"`).

use std::time::Duration;

/// Longest duration the config accepts (roughly 100 years). Durations are
/// added to `Instant`s and `SystemTime`s, which must never overflow.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Parse a duration string of the form `<digits><unit>` where unit is one of
/// `ms`, `s`, `m`, `h`. Values above [`MAX_DURATION`] are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let parsed = match unit.as_str() {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    match parsed {
        Some(d) if d <= MAX_DURATION => Ok(d),
        _ => Err(format!("duration '{s}' is too large")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_duration("20ms"), Ok(Duration::from_millis(20)));
        assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("30m"), Ok(Duration::from_secs(1800)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    }

    #[test]
    fn rejects_missing_or_unknown_units() {
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("4d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn oversized_values_are_errors_not_overflows() {
        assert!(parse_duration("6000000000000000h").is_err());
        assert!(parse_duration("18446744073709551615m").is_err());
        assert!(parse_duration("18000000000000000000s").is_err());
        assert!(parse_duration("876001h").is_err());
        assert_eq!(parse_duration("876000h"), Ok(MAX_DURATION));
    }
}
