use regex::Regex;
use std::str::FromStr;
use tokio::time::Duration;

lazy_static::lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(concat!(
        r"(?i)^(?:http|https)://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}|",
        r"\[?[A-F0-9]*:[A-F0-9:]+\]?)",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .expect("URL pattern is a valid regex");
}

/// Parses a duration string in the format "30s", "10m", "5h", "3d".
///
/// A bare integer is taken as seconds.
///
/// Supported units:
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    if let Ok(secs) = u64::from_str(s) {
        return Ok(Duration::from_secs(secs));
    }

    let unit_char = match s.chars().last() {
        Some(c) => c,
        None => return Err("Duration string cannot be empty".to_string()),
    };
    let value_str = &s[0..s.len() - unit_char.len_utf8()];

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    let multiplier: u64 = match unit_char {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 's', 'm', 'h', or 'd'.",
                unit_char
            ))
        }
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Returns true if `url` is an absolute http(s) URL with a domain,
/// `localhost`, IPv4 or IPv6 host.
pub fn validate_url(url: &str) -> bool {
    URL_PATTERN.is_match(url)
}

/// Formats a number of seconds as `HH:MM:SS`.
pub fn format_duration(seconds: u64) -> String {
    let hours = (seconds / 3600) % 24;
    let minutes = (seconds / 60) % 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
