use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Component separators accepted in sexagesimal notation.
static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\s:hHmMsSdD°'"′″]+"#).unwrap());

/// Parse a right ascension into decimal degrees.
///
/// A bare decimal number is taken as degrees. Sexagesimal input is in hours
/// and is multiplied by 15.
pub fn parse_ra(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(degrees) = parse_decimal(text) {
        return Some(degrees);
    }

    let (negative, body) = split_sign(text);
    if negative {
        return None;
    }
    let hours = parse_sexagesimal(body)?;
    if hours > 24.0 {
        return None;
    }
    Some(hours * 15.0)
}

/// Parse a declination into decimal degrees.
///
/// The sign comes from an explicit leading `+` or `-` so that values such as
/// `-00:30:00` keep their sign.
pub fn parse_dec(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(degrees) = parse_decimal(text) {
        return Some(degrees);
    }

    let (negative, body) = split_sign(text);
    let degrees = parse_sexagesimal(body)?;
    if degrees > 90.0 {
        return None;
    }
    Some(if negative { -degrees } else { degrees })
}

/// Format a right ascension in degrees as `HH:MM:SS.ss`.
pub fn format_ra(degrees: f64) -> String {
    let hundredths_per_day = 24 * 3600 * 100;
    let total = ((degrees.rem_euclid(360.0) / 15.0) * 3600.0 * 100.0).round() as i64;
    let total = total.rem_euclid(hundredths_per_day);

    let hours = total / 360_000;
    let minutes = (total / 6_000) % 60;
    let seconds = (total % 6_000) as f64 / 100.0;
    format!("{hours:02}:{minutes:02}:{seconds:05.2}")
}

/// Format a declination in degrees as `+DD:MM:SS.s`.
pub fn format_dec(degrees: f64) -> String {
    let sign = if degrees < 0.0 { '-' } else { '+' };
    let total = (degrees.abs() * 3600.0 * 10.0).round() as i64;

    let whole = total / 36_000;
    let minutes = (total / 600) % 60;
    let seconds = (total % 600) as f64 / 10.0;
    format!("{sign}{whole:02}:{minutes:02}:{seconds:04.1}")
}

fn parse_decimal(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn split_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest.trim_start())
    } else if let Some(rest) = text.strip_prefix('+') {
        (false, rest.trim_start())
    } else {
        (false, text)
    }
}

/// Parse one to three unsigned components into a single value in the unit of
/// the leading component.
fn parse_sexagesimal(body: &str) -> Option<f64> {
    let parts: Vec<&str> = SEPARATORS
        .split(body)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        if !part.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return None;
        }
        // Only the last component may carry a fraction.
        if index + 1 < parts.len() && part.contains('.') {
            return None;
        }
        values.push(part.parse::<f64>().ok()?);
    }

    let mut total = values[0];
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value >= 60.0 {
            return None;
        }
        total += value / 60f64.powi(index as i32);
    }
    Some(total)
}
