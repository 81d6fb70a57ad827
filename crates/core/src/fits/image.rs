use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use std::path::Path;

use super::FitsError;

/// Value written to a header keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Text(String),
    Float(f64),
    Integer(i64),
}

/// An 8-bit image with a zeroed data unit and the given header keywords.
///
/// Used for provenance stamping and for test fixtures.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub width: usize,
    pub height: usize,
    pub keys: Vec<(String, KeyValue)>,
}

impl NewImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            keys: Vec::new(),
        }
    }

    pub fn with_text(mut self, key: &str, value: &str) -> Self {
        self.keys.push((key.to_string(), KeyValue::Text(value.to_string())));
        self
    }

    pub fn with_float(mut self, key: &str, value: f64) -> Self {
        self.keys.push((key.to_string(), KeyValue::Float(value)));
        self
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.keys.push((key.to_string(), KeyValue::Integer(value)));
        self
    }

    /// Create the file at `path`. Fails if it already exists.
    pub fn write(&self, path: &Path) -> Result<(), FitsError> {
        let description = ImageDescription {
            data_type: ImageType::UnsignedByte,
            dimensions: &[self.height, self.width],
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()?;
        write_keys(&mut fptr, &self.keys)
    }
}

/// Add or overwrite keywords in the primary header of an existing file.
pub fn update_keys(path: &Path, keys: &[(String, KeyValue)]) -> Result<(), FitsError> {
    let mut fptr = FitsFile::edit(path)?;
    write_keys(&mut fptr, keys)
}

fn write_keys(fptr: &mut FitsFile, keys: &[(String, KeyValue)]) -> Result<(), FitsError> {
    let hdu = fptr.primary_hdu()?;
    for (key, value) in keys {
        match value {
            KeyValue::Text(text) => hdu.write_key(fptr, key, text.as_str())?,
            KeyValue::Float(number) => hdu.write_key(fptr, key, *number)?,
            KeyValue::Integer(number) => hdu.write_key(fptr, key, *number)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::PrimaryHeader;
    use tempfile::TempDir;

    #[test]
    fn test_update_keys_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stamped.fits");
        NewImage::new(8, 8)
            .with_text("ORIGFMT", "FITS")
            .write(&path)
            .unwrap();

        update_keys(
            &path,
            &[
                ("ORIGFMT".to_string(), KeyValue::Text("JPEG".to_string())),
                ("ORIGFILE".to_string(), KeyValue::Text("m31.jpg".to_string())),
            ],
        )
        .unwrap();

        let mut header = PrimaryHeader::open(&path).unwrap();
        assert_eq!(header.text("ORIGFMT").as_deref(), Some("JPEG"));
        assert_eq!(header.text("ORIGFILE").as_deref(), Some("m31.jpg"));
    }

    #[test]
    fn test_write_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("twice.fits");
        NewImage::new(2, 2).write(&path).unwrap();
        assert!(NewImage::new(2, 2).write(&path).is_err());
    }
}
