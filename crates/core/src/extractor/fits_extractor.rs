//! FITS header based metadata extractor.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::types::{parse_capture_date, ImageMetadata};
use super::{ExtractorError, MetadataExtractor};
use crate::fits::{FitsError, PrimaryHeader};

/// Extracts [`ImageMetadata`] from FITS primary header keywords.
#[derive(Debug, Default, Clone)]
pub struct FitsMetadataExtractor;

impl FitsMetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Map header keywords onto metadata fields. Never fails: absent or
    /// malformed keywords leave their field empty.
    pub fn from_header(header: &mut PrimaryHeader) -> ImageMetadata {
        let dimensions = header.dimensions();

        let mut meta = ImageMetadata {
            target_name: header.first_text(&["OBJECT"]),
            exposure_time: header.first_float(&["EXPTIME", "EXPOSURE"]),
            exposure_count: header.first_int(&["NCOMBINE", "STACKCNT"]),
            total_integration_time: header.first_float(&["TOTALEXP", "LIVETIME"]),
            gain: header.first_float(&["GAIN"]),
            iso: header.first_int(&["ISO", "ISOSPEED"]),
            offset: header.first_float(&["OFFSET"]),
            temperature: header.first_float(&["CCD-TEMP", "SET-TEMP"]),
            filter: header.first_text(&["FILTER"]),
            telescope: header.first_text(&["TELESCOP"]),
            camera: header.first_text(&["INSTRUME", "CAMERA"]),
            focal_length: header.first_float(&["FOCALLEN"]),
            aperture: header.first_float(&["APTDIA"]),
            focal_ratio: header.first_float(&["FOCRATIO"]),
            pixel_size_x: header.first_float(&["XPIXSZ"]),
            pixel_size_y: header.first_float(&["YPIXSZ"]),
            pixel_size: header.first_float(&["PIXSIZE"]),
            width: dimensions.first().map(|&w| w as i64),
            height: dimensions.get(1).map(|&h| h as i64),
            binning_x: header.first_int(&["XBINNING"]),
            binning_y: header.first_int(&["YBINNING"]),
            bayer_pattern: header.first_text(&["BAYERPAT"]),
            software: header.first_text(&["SWCREATE", "PROGRAM"]),
            observer: header.first_text(&["OBSERVER"]),
            site_latitude: header.first_float(&["SITELAT"]),
            site_longitude: header.first_float(&["SITELONG"]),
            site_elevation: header.first_float(&["SITEELEV"]),
            original_format: header.first_text(&["ORIGFMT"]),
            original_file: header.first_text(&["ORIGFILE"]),
            ..Default::default()
        };

        read_axis(header, &["RA", "OBJCTRA"], &mut meta.ra, &mut meta.ra_text);
        read_axis(header, &["DEC", "OBJCTDEC"], &mut meta.dec, &mut meta.dec_text);

        if let Some(date) = header.first_text(&["DATE-OBS", "DATE"]) {
            meta.capture_time = parse_capture_date(&date);
            meta.capture_date = Some(date);
        }

        if meta.total_integration_time.is_none() {
            if let (Some(exposure), Some(count)) = (meta.exposure_time, meta.exposure_count) {
                meta.total_integration_time = Some(exposure * count as f64);
            }
        }

        meta
    }
}

/// Numeric keywords go to degrees, sexagesimal text to the string form. The
/// first keyword providing each form wins.
fn read_axis(
    header: &mut PrimaryHeader,
    keys: &[&str],
    degrees: &mut Option<f64>,
    text: &mut Option<String>,
) {
    for key in keys {
        match header.float(key) {
            Some(value) => {
                if degrees.is_none() {
                    *degrees = Some(value);
                }
            }
            None => {
                if text.is_none() {
                    *text = header.text(key);
                }
            }
        }
    }
}

#[async_trait]
impl MetadataExtractor for FitsMetadataExtractor {
    fn name(&self) -> &str {
        "fits"
    }

    async fn extract(&self, path: &Path) -> Result<ImageMetadata, ExtractorError> {
        let owned = path.to_path_buf();
        let meta = tokio::task::spawn_blocking(move || {
            PrimaryHeader::open(&owned).map(|mut header| Self::from_header(&mut header))
        })
        .await
        .map_err(|e| ExtractorError::Task(e.to_string()))?
        .map_err(|e| match e {
            FitsError::NotFound { path } => ExtractorError::NotFound { path },
            other => ExtractorError::Unreadable {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })?;

        debug!(
            path = %path.display(),
            has_name = meta.name_hint().is_some(),
            has_position = meta.position().is_some(),
            "Extracted image metadata"
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::NewImage;
    use tempfile::TempDir;

    fn metadata_of(image: NewImage) -> ImageMetadata {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("light.fits");
        image.write(&path).unwrap();
        let mut header = PrimaryHeader::open(&path).unwrap();
        FitsMetadataExtractor::from_header(&mut header)
    }

    #[test]
    fn test_numeric_coordinates() {
        let meta = metadata_of(
            NewImage::new(16, 8)
                .with_float("RA", 10.68)
                .with_float("DEC", 41.27),
        );
        assert_eq!(meta.ra, Some(10.68));
        assert_eq!(meta.dec, Some(41.27));
        assert!(meta.ra_text.is_none());
    }

    #[test]
    fn test_text_coordinates_from_objctra() {
        let meta = metadata_of(
            NewImage::new(16, 8)
                .with_text("OBJCTRA", "20 58 47")
                .with_text("OBJCTDEC", "+44 19 48"),
        );
        assert!(meta.ra.is_none());
        assert_eq!(meta.ra_text.as_deref(), Some("20 58 47"));
        let pos = meta.position().unwrap();
        assert!((pos.ra - 314.695833).abs() < 1e-5);
    }

    #[test]
    fn test_fallback_keywords() {
        let meta = metadata_of(
            NewImage::new(16, 8)
                .with_float("EXPOSURE", 60.0)
                .with_int("STACKCNT", 40)
                .with_float("SET-TEMP", -10.0)
                .with_text("CAMERA", "ZWO ASI2600MM")
                .with_text("PROGRAM", "N.I.N.A.")
                .with_text("DATE", "2024-03-02T21:05:11"),
        );
        assert_eq!(meta.exposure_time, Some(60.0));
        assert_eq!(meta.exposure_count, Some(40));
        assert_eq!(meta.total_integration_time, Some(2400.0));
        assert_eq!(meta.temperature, Some(-10.0));
        assert_eq!(meta.camera.as_deref(), Some("ZWO ASI2600MM"));
        assert_eq!(meta.software.as_deref(), Some("N.I.N.A."));
        assert!(meta.capture_time.is_some());
    }

    #[test]
    fn test_direct_total_integration_wins() {
        let meta = metadata_of(
            NewImage::new(16, 8)
                .with_float("EXPTIME", 300.0)
                .with_int("NCOMBINE", 10)
                .with_float("TOTALEXP", 2700.0),
        );
        assert_eq!(meta.total_integration_time, Some(2700.0));
    }

    #[test]
    fn test_fields_are_independent() {
        let meta = metadata_of(NewImage::new(16, 8).with_text("EXPTIME", "n/a"));
        assert_eq!(meta.exposure_time, None);
        assert_eq!(meta.total_integration_time, None);
        assert_eq!(meta.width, Some(16));
        assert_eq!(meta.height, Some(8));
        assert!(meta.target_name.is_none());
    }

    #[tokio::test]
    async fn test_extract_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("light.fits");
        NewImage::new(16, 8)
            .with_text("FILTER", "Ha")
            .with_text("OBJECT", "NGC 7000")
            .write(&path)
            .unwrap();

        let meta = FitsMetadataExtractor::new().extract(&path).await.unwrap();
        assert_eq!(meta.name_hint(), Some("NGC 7000"));
        assert_eq!(meta.filter.as_deref(), Some("Ha"));
    }

    #[tokio::test]
    async fn test_extract_errors() {
        let dir = TempDir::new().unwrap();
        let extractor = FitsMetadataExtractor::new();

        let err = extractor
            .extract(&dir.path().join("missing.fits"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::NotFound { .. }));

        let corrupt = dir.path().join("corrupt.fits");
        std::fs::write(&corrupt, b"garbage").unwrap();
        let err = extractor.extract(&corrupt).await.unwrap_err();
        assert!(matches!(err, ExtractorError::Unreadable { .. }));
    }
}
