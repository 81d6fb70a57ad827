//! Types shared by the plate-solving strategies.

use serde::{Deserialize, Serialize};

/// Astrometric solution of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Field centre right ascension in degrees.
    pub ra: f64,
    /// Field centre declination in degrees.
    pub dec: f64,
    /// Position angle in degrees east of north.
    pub orientation: f64,
    /// Arcseconds per pixel.
    pub pixel_scale: f64,
    /// Field width in degrees.
    pub field_width: f64,
    /// Field height in degrees.
    pub field_height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<f64>,
    /// Radius of the field in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

/// Approximate field centre and search radius, all in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterHint {
    pub ra: f64,
    pub dec: f64,
    pub radius: f64,
}

/// Hints that speed up solving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Field-of-view width hint in degrees.
    pub fov_deg: Option<f64>,
    pub center: Option<CenterHint>,
    /// Downsample factor for very large images.
    pub downsample: Option<u32>,
    /// Image size in pixels, used to derive the field size when the service
    /// only reports a radius.
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

impl SolveOptions {
    pub fn with_fov(mut self, fov_deg: f64) -> Self {
        self.fov_deg = Some(fov_deg);
        self
    }

    pub fn with_center(mut self, ra: f64, dec: f64, radius: f64) -> Self {
        self.center = Some(CenterHint { ra, dec, radius });
        self
    }

    pub fn with_downsample(mut self, factor: u32) -> Self {
        self.downsample = Some(factor);
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.image_width = Some(width);
        self.image_height = Some(height);
        self
    }
}

/// Image handed to a solver.
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub image: Vec<u8>,
    pub filename: String,
    pub options: SolveOptions,
    /// Publicly reachable URL of the same image, for URL submission.
    pub source_url: Option<String>,
}

impl SolveRequest {
    pub fn new(image: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            image,
            filename: filename.into(),
            options: SolveOptions::default(),
            source_url: None,
        }
    }

    pub fn with_options(mut self, options: SolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn size_mb(&self) -> u64 {
        (self.image.len() as u64).div_ceil(1024 * 1024)
    }
}

/// A successful solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub calibration: Calibration,
    /// Catalog designations the service found inside the field.
    #[serde(default)]
    pub objects_in_field: Vec<String>,
    /// Name of the strategy that produced the solution.
    pub solver: String,
    /// Identifier of the job on the remote service.
    pub remote_job_id: Option<String>,
}

/// Liveness and capacity of a solving service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverHealth {
    pub healthy: bool,
    pub queued: Option<u32>,
    pub processing: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub message: Option<String>,
}
