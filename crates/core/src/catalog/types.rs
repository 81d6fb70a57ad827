//! Catalog types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::MatchMethod;

/// A catalog object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Primary name, e.g. "Andromeda Galaxy".
    pub name: String,
    /// Catalog designations, e.g. `["M31", "NGC 224"]`.
    pub catalog_ids: Vec<String>,
    pub alternate_names: Vec<String>,
    /// Right ascension in degrees. Absent for dynamic objects.
    pub ra: Option<f64>,
    /// Declination in degrees. Absent for dynamic objects.
    pub dec: Option<f64>,
    /// Visual magnitude; lower is brighter.
    pub magnitude: Option<f64>,
    /// Solar-system and other moving objects.
    pub is_dynamic: bool,
}

impl Target {
    /// Display label: first catalog id if any, else the name.
    pub fn label(&self) -> &str {
        self.catalog_ids
            .first()
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

/// Request to add a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTarget {
    /// Explicit id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub catalog_ids: Vec<String>,
    #[serde(default)]
    pub alternate_names: Vec<String>,
    #[serde(default)]
    pub ra: Option<f64>,
    #[serde(default)]
    pub dec: Option<f64>,
    #[serde(default)]
    pub magnitude: Option<f64>,
    #[serde(default)]
    pub is_dynamic: bool,
}

impl NewTarget {
    /// A fixed target at the given position.
    pub fn fixed(name: impl Into<String>, ra: f64, dec: f64) -> Self {
        Self {
            name: name.into(),
            ra: Some(ra),
            dec: Some(dec),
            ..Default::default()
        }
    }

    /// A moving target without fixed coordinates.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dynamic: true,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_catalog_ids(mut self, ids: &[&str]) -> Self {
        self.catalog_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_alternate_names(mut self, names: &[&str]) -> Self {
        self.alternate_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }
}

/// An RA/Dec rectangle in degrees, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateBox {
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl CoordinateBox {
    /// Rectangle of `tolerance` degrees around a point on both axes.
    ///
    /// This is not an angular-distance circle: near the poles it covers far
    /// less sky in RA than its width suggests, and it does not wrap at 0/360.
    pub fn around(ra: f64, dec: f64, tolerance: f64) -> Self {
        Self {
            ra_min: ra - tolerance,
            ra_max: ra + tolerance,
            dec_min: dec - tolerance,
            dec_max: dec + tolerance,
        }
    }

    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        (self.ra_min..=self.ra_max).contains(&ra) && (self.dec_min..=self.dec_max).contains(&dec)
    }
}

/// Wishlist state of a target for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WishlistStatus {
    Wanted,
    Captured,
}

impl WishlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wanted => "wanted",
            Self::Captured => "captured",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wanted" => Some(Self::Wanted),
            "captured" => Some(Self::Captured),
            _ => None,
        }
    }
}

/// Request to create an image record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImageRecord {
    pub user_id: String,
    pub target_id: String,
    /// Processing job that produced the record.
    pub job_id: Option<String>,
    pub storage_key: String,
    pub original_filename: String,
    pub match_method: MatchMethod,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub exposure_time: Option<f64>,
    pub total_integration_time: Option<f64>,
    pub filter_name: Option<String>,
    pub capture_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// A catalog-linked image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub user_id: String,
    pub target_id: String,
    pub job_id: Option<String>,
    pub storage_key: String,
    pub original_filename: String,
    pub match_method: MatchMethod,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub exposure_time: Option<f64>,
    pub total_integration_time: Option<f64>,
    pub filter_name: Option<String>,
    pub capture_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur in catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}
