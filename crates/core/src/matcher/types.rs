//! Matcher types.

use serde::{Deserialize, Serialize};

use crate::catalog::Target;
use crate::coordinates::SkyPosition;

/// How a job was linked to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    /// Name hint from the image header.
    Metadata,
    /// Coordinates embedded in the image header.
    Coordinates,
    /// Coordinates returned by the plate solver.
    PlateSolve,
    /// Operator assignment.
    Manual,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "METADATA",
            Self::Coordinates => "COORDINATES",
            Self::PlateSolve => "PLATE_SOLVE",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "METADATA" => Some(Self::Metadata),
            "COORDINATES" => Some(Self::Coordinates),
            "PLATE_SOLVE" => Some(Self::PlateSolve),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the query coordinates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    Metadata,
    PlateSolve,
}

impl CoordinateSource {
    /// Match method reported for a coordinate match from this source.
    pub fn match_method(&self) -> MatchMethod {
        match self {
            Self::Metadata => MatchMethod::Coordinates,
            Self::PlateSolve => MatchMethod::PlateSolve,
        }
    }
}

/// Input to a match attempt.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub name_hint: Option<String>,
    pub position: Option<(SkyPosition, CoordinateSource)>,
}

impl MatchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name_hint(mut self, hint: Option<impl Into<String>>) -> Self {
        self.name_hint = hint.map(Into::into);
        self
    }

    pub fn with_position(mut self, position: SkyPosition, source: CoordinateSource) -> Self {
        self.position = Some((position, source));
        self
    }
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetMatch {
    pub target: Target,
    pub method: MatchMethod,
}

impl TargetMatch {
    pub fn target_id(&self) -> &str {
        &self.target.id
    }
}

/// Matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Half-width of the RA/Dec acceptance window in degrees.
    #[serde(default = "default_tolerance_deg")]
    pub tolerance_deg: f64,
}

fn default_tolerance_deg() -> f64 {
    0.5
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: default_tolerance_deg(),
        }
    }
}
