//! Extracted image metadata.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinates::{self, SkyPosition};

/// Acquisition metadata read from an image header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Free-text target name. May be absent or wrong.
    pub target_name: Option<String>,

    /// Right ascension in degrees, when the header stores it numerically.
    pub ra: Option<f64>,
    /// Declination in degrees, when the header stores it numerically.
    pub dec: Option<f64>,
    /// Right ascension as written in the header, when stored as text.
    pub ra_text: Option<String>,
    /// Declination as written in the header, when stored as text.
    pub dec_text: Option<String>,

    /// Raw capture date string.
    pub capture_date: Option<String>,
    /// Capture date parsed as UTC.
    pub capture_time: Option<DateTime<Utc>>,

    /// Single sub-exposure length in seconds.
    pub exposure_time: Option<f64>,
    pub exposure_count: Option<i64>,
    /// Total integration time in seconds.
    pub total_integration_time: Option<f64>,

    pub gain: Option<f64>,
    pub iso: Option<i64>,
    pub offset: Option<f64>,
    /// Sensor temperature in degrees Celsius.
    pub temperature: Option<f64>,
    pub filter: Option<String>,

    pub telescope: Option<String>,
    pub camera: Option<String>,
    /// Focal length in millimetres.
    pub focal_length: Option<f64>,
    /// Aperture diameter in millimetres.
    pub aperture: Option<f64>,
    pub focal_ratio: Option<f64>,

    /// Pixel size in micrometres.
    pub pixel_size_x: Option<f64>,
    pub pixel_size_y: Option<f64>,
    pub pixel_size: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub binning_x: Option<i64>,
    pub binning_y: Option<i64>,
    pub bayer_pattern: Option<String>,

    pub software: Option<String>,
    pub observer: Option<String>,
    pub site_latitude: Option<f64>,
    pub site_longitude: Option<f64>,
    pub site_elevation: Option<f64>,

    /// Format of the uploaded file before conversion.
    pub original_format: Option<String>,
    pub original_file: Option<String>,
}

impl ImageMetadata {
    /// Usable coordinates. Numeric values take precedence over text forms,
    /// and both axes must resolve.
    pub fn position(&self) -> Option<SkyPosition> {
        let ra = self
            .ra
            .or_else(|| self.ra_text.as_deref().and_then(coordinates::parse_ra))?;
        let dec = self
            .dec
            .or_else(|| self.dec_text.as_deref().and_then(coordinates::parse_dec))?;
        Some(SkyPosition::new(ra, dec))
    }

    /// Trimmed target name, ignoring blanks.
    pub fn name_hint(&self) -> Option<&str> {
        self.target_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Effective pixel size along the image width.
    pub fn effective_pixel_size(&self) -> Option<f64> {
        let base = self.pixel_size_x.or(self.pixel_size)?;
        Some(base * self.binning_x.unwrap_or(1).max(1) as f64)
    }

    /// Field-of-view width in degrees, when optics and sensor are known.
    pub fn field_of_view_deg(&self) -> Option<f64> {
        let focal_length = self.focal_length.filter(|f| *f > 0.0)?;
        let pixel_size = self.effective_pixel_size().filter(|p| *p > 0.0)?;
        let width = self.width.filter(|w| *w > 0)?;

        let arcsec_per_pixel = pixel_size / focal_length * 206.265;
        Some(width as f64 * arcsec_per_pixel / 3600.0)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Parse header date strings: ISO-8601 with or without time and fraction, or
/// EXIF `YYYY:MM:DD HH:MM:SS`. Values without zone are taken as UTC.
pub(crate) fn parse_capture_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    let text = text.trim_end_matches('Z');
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y:%m:%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_position_prefers_numeric() {
        let meta = ImageMetadata {
            ra: Some(10.68),
            dec: Some(41.27),
            ra_text: Some("05:35:17".into()),
            dec_text: Some("-05:23:28".into()),
            ..Default::default()
        };
        let pos = meta.position().unwrap();
        assert_eq!(pos.ra, 10.68);
        assert_eq!(pos.dec, 41.27);
    }

    #[test]
    fn test_position_from_text() {
        let meta = ImageMetadata {
            ra_text: Some("12:30:45.5".into()),
            dec_text: Some("-05:15:30".into()),
            ..Default::default()
        };
        let pos = meta.position().unwrap();
        assert!((pos.ra - 187.6895833).abs() < 1e-6);
        assert!((pos.dec + 5.2583333).abs() < 1e-6);
    }

    #[test]
    fn test_position_requires_both_axes() {
        let meta = ImageMetadata {
            ra: Some(10.68),
            dec_text: Some("garbage".into()),
            ..Default::default()
        };
        assert!(meta.position().is_none());
    }

    #[test]
    fn test_name_hint_ignores_blank() {
        let meta = ImageMetadata {
            target_name: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(meta.name_hint(), None);
    }

    #[test]
    fn test_field_of_view() {
        let meta = ImageMetadata {
            focal_length: Some(530.0),
            pixel_size_x: Some(3.76),
            width: Some(6248),
            ..Default::default()
        };
        let fov = meta.field_of_view_deg().unwrap();
        assert!((fov - 2.5397).abs() < 0.001, "fov = {fov}");
    }

    #[test]
    fn test_parse_capture_dates() {
        let dt = parse_capture_date("2024-01-15T22:30:00.123").unwrap();
        assert_eq!((dt.year(), dt.hour(), dt.minute()), (2024, 22, 30));

        let dt = parse_capture_date("2024:01:15 22:30:00").unwrap();
        assert_eq!(dt.day(), 15);

        let dt = parse_capture_date("2024-01-15").unwrap();
        assert_eq!(dt.hour(), 0);

        assert!(parse_capture_date("2024-01-15T22:30:00Z").is_some());
        assert!(parse_capture_date("last tuesday").is_none());
    }
}
