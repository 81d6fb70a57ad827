//! Celestial coordinate parsing and formatting.
//!
//! Right ascension and declination arrive from image headers in many shapes:
//! bare decimal degrees, colon separated sexagesimal, or unit-lettered forms
//! such as `12h30m45s` and `+41°16'09"`. Everything is normalized to decimal
//! degrees. Unparsable input yields `None`, which callers treat as
//! "no coordinate available".

mod parser;

pub use parser::{format_dec, format_ra, parse_dec, parse_ra};

/// An equatorial position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Parse a position from its textual RA/Dec components.
    pub fn parse(ra: &str, dec: &str) -> Option<Self> {
        Some(Self::new(parse_ra(ra)?, parse_dec(dec)?))
    }
}

impl std::fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", format_ra(self.ra), format_dec(self.dec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let pos = SkyPosition::parse("00:42:44.3", "+41:16:09").unwrap();
        assert!((pos.ra - 10.684583).abs() < 1e-5);
        assert_eq!(pos.to_string(), "00:42:44.30 +41:16:09.0");
    }

    #[test]
    fn test_parse_requires_both_axes() {
        assert!(SkyPosition::parse("10.68", "garbage").is_none());
    }
}
