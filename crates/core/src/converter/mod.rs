//! Format conversion into the canonical FITS form.
//!
//! This module provides the `FormatConverter` trait and an implementation that
//! delegates to an external conversion tool. Inputs that are already FITS are
//! validated and copied instead of converted.
//!
//! # Supported formats
//!
//! - FITS (`.fits`, `.fit`, `.fts`), canonical
//! - XISF (`.xisf`)
//! - TIFF (`.tif`, `.tiff`)
//! - Camera RAW (`.cr2`, `.cr3`, `.nef`, `.arw`, `.dng`, `.raf`, `.orf`, `.rw2`, `.pef`, `.srw`)
//! - JPEG and PNG
//!
//! # Example
//!
//! ```ignore
//! use skyingest_core::converter::{ConversionJob, ExternalToolConverter, FormatConverter};
//!
//! let converter = ExternalToolConverter::with_defaults();
//! converter.validate().await?;
//!
//! let job = ConversionJob::new("job-1", "/tmp/job-1-source.cr2", "/tmp/job-1-canonical.fits");
//! let result = converter.convert(job).await?;
//! println!("{} converted via {}", result.original_format, result.method);
//! ```

mod config;
mod error;
mod external;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use external::ExternalToolConverter;
pub use traits::FormatConverter;
pub use types::{ConversionJob, ConversionResult, ImageFormat, ToolReport, COPY_METHOD};
