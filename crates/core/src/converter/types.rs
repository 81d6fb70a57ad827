//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Method reported when a canonical input was copied rather than converted.
pub const COPY_METHOD: &str = "copy";

const FITS_EXTENSIONS: &[&str] = &["fits", "fit", "fts"];
const XISF_EXTENSIONS: &[&str] = &["xisf"];
const TIFF_EXTENSIONS: &[&str] = &["tif", "tiff"];
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "arw", "dng", "raf", "orf", "rw2", "pef", "srw",
];
const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];
const PNG_EXTENSIONS: &[&str] = &["png"];

/// Source image formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Flexible Image Transport System, the canonical form.
    Fits,
    /// PixInsight's Extensible Image Serialization Format.
    Xisf,
    Tiff,
    /// Proprietary camera sensor dumps.
    Raw,
    Jpeg,
    Png,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 6] = [
        ImageFormat::Fits,
        ImageFormat::Xisf,
        ImageFormat::Tiff,
        ImageFormat::Raw,
        ImageFormat::Jpeg,
        ImageFormat::Png,
    ];

    /// File extensions (lowercase, without dot) belonging to this format.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Fits => FITS_EXTENSIONS,
            Self::Xisf => XISF_EXTENSIONS,
            Self::Tiff => TIFF_EXTENSIONS,
            Self::Raw => RAW_EXTENSIONS,
            Self::Jpeg => JPEG_EXTENSIONS,
            Self::Png => PNG_EXTENSIONS,
        }
    }

    /// Classify an extension, with or without leading dot, case-insensitively.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&extension.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        Self::from_path(Path::new(filename))
    }

    /// Whether the format is already canonical and only needs copying.
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Fits)
    }

    /// Label recorded in the `ORIGFMT` card and in job metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fits => "FITS",
            Self::Xisf => "XISF",
            Self::Tiff => "TIFF",
            Self::Raw => "RAW",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
        }
    }

    /// Preferred extension for temporary copies of this format.
    pub fn primary_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    /// Every supported extension.
    pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().flat_map(|format| format.extensions().iter().copied())
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A conversion job specification.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Identifier for logging.
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl ConversionJob {
    pub fn new(
        job_id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub output_path: PathBuf,
    pub original_format: ImageFormat,
    /// How the output was produced (`copy` or the tool's reported method).
    pub method: String,
    /// Camera model reported by the tool for RAW inputs.
    pub camera: Option<String>,
    /// Whether the output still carries a colour filter array.
    pub is_bayer: Option<bool>,
    pub output_size_bytes: u64,
    pub duration_ms: u64,
}

impl ConversionResult {
    pub fn was_copied(&self) -> bool {
        self.method == COPY_METHOD
    }
}

/// JSON report printed by the conversion tool on stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolReport {
    pub success: bool,
    #[serde(default)]
    pub original_format: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub is_bayer: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolReport {
    /// Parse the last report object in the tool's stdout. The report may be
    /// pretty-printed across several lines and preceded by warnings.
    pub fn from_stdout(stdout: &str) -> Option<Self> {
        let mut last = None;
        let mut rest = stdout;
        while let Some(start) = rest.find('{') {
            let mut stream = serde_json::Deserializer::from_str(&rest[start..]).into_iter::<Self>();
            match stream.next() {
                Some(Ok(report)) => {
                    last = Some(report);
                    rest = &rest[start + stream.byte_offset()..];
                }
                _ => rest = &rest[start + 1..],
            }
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_extensions() {
        assert_eq!(ImageFormat::from_filename("m31.JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_filename("light.fts"), Some(ImageFormat::Fits));
        assert_eq!(ImageFormat::from_filename("IMG_0001.CR3"), Some(ImageFormat::Raw));
        assert_eq!(ImageFormat::from_filename("stack.xisf"), Some(ImageFormat::Xisf));
        assert_eq!(ImageFormat::from_extension(".TIFF"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_filename("notes.txt"), None);
        assert_eq!(ImageFormat::from_filename("no_extension"), None);
    }

    #[test]
    fn test_only_fits_is_canonical() {
        for format in ImageFormat::ALL {
            assert_eq!(format.is_canonical(), format == ImageFormat::Fits);
        }
    }

    #[test]
    fn test_supported_extensions_cover_all_formats() {
        let all: Vec<_> = ImageFormat::supported_extensions().collect();
        assert_eq!(all.len(), 19);
        assert!(all.contains(&"rw2"));
    }

    #[test]
    fn test_tool_report_skips_warnings() {
        let stdout = "warning: exif missing\n{\"success\": true, \"output_path\": \"/tmp/o.fits\", \"original_format\": \"RAW\", \"method\": \"rawpy\", \"camera\": \"Canon EOS R\", \"is_bayer\": true}\n";
        let report = ToolReport::from_stdout(stdout).unwrap();
        assert!(report.success);
        assert_eq!(report.method.as_deref(), Some("rawpy"));
        assert_eq!(report.is_bayer, Some(true));
    }

    #[test]
    fn test_tool_report_failure() {
        let report = ToolReport::from_stdout(r#"{"success": false, "error": "corrupt file"}"#).unwrap();
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("corrupt file"));
        assert!(ToolReport::from_stdout("no json here").is_none());
    }

    #[test]
    fn test_tool_report_pretty_printed() {
        let stdout = "Warning: {camera} profile missing\n{\n  \"success\": true,\n  \"original_format\": \"CR2\",\n  \"method\": \"rawpy\",\n  \"is_bayer\": true\n}\n";
        let report = ToolReport::from_stdout(stdout).unwrap();
        assert!(report.success);
        assert_eq!(report.original_format.as_deref(), Some("CR2"));
        assert_eq!(report.method.as_deref(), Some("rawpy"));
    }

    #[test]
    fn test_tool_report_last_object_wins() {
        let stdout = "{\"success\": false, \"error\": \"retrying\"}\n{\n  \"success\": true\n}";
        let report = ToolReport::from_stdout(stdout).unwrap();
        assert!(report.success);
        assert!(report.error.is_none());
    }
}
