use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::FitsFile;
use std::path::Path;

use super::FitsError;

/// Open primary header of a FITS image.
pub struct PrimaryHeader {
    fptr: FitsFile,
    hdu: FitsHdu,
}

impl PrimaryHeader {
    /// Open `path` and position on its primary HDU, which must be an image.
    pub fn open(path: &Path) -> Result<Self, FitsError> {
        if !path.exists() {
            return Err(FitsError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut fptr = FitsFile::open(path)?;
        let hdu = fptr.primary_hdu()?;
        if !matches!(hdu.info, HduInfo::ImageInfo { .. }) {
            return Err(FitsError::NotImage {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { fptr, hdu })
    }

    /// Image axes in NAXIS order (width first). Empty when NAXIS is 0.
    pub fn dimensions(&self) -> Vec<usize> {
        match &self.hdu.info {
            HduInfo::ImageInfo { shape, .. } => shape.iter().rev().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Non-empty string value of `key`, trimmed.
    pub fn text(&mut self, key: &str) -> Option<String> {
        self.hdu
            .read_key::<String>(&mut self.fptr, key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Finite numeric value of `key`. Text that does not parse is ignored.
    pub fn float(&mut self, key: &str) -> Option<f64> {
        self.hdu
            .read_key::<f64>(&mut self.fptr, key)
            .ok()
            .filter(|v| v.is_finite())
    }

    pub fn int(&mut self, key: &str) -> Option<i64> {
        self.hdu.read_key::<i64>(&mut self.fptr, key).ok()
    }

    /// First keyword of `keys` with a string value.
    pub fn first_text(&mut self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// First keyword of `keys` with a numeric value.
    pub fn first_float(&mut self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| self.float(key))
    }

    pub fn first_int(&mut self, keys: &[&str]) -> Option<i64> {
        keys.iter().find_map(|key| self.int(key))
    }
}

/// Check that `path` is a FITS file whose primary HDU is an image.
pub fn validate(path: &Path) -> Result<(), FitsError> {
    PrimaryHeader::open(path).map(|_| ())
}
