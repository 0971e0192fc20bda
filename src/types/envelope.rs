//! Envelopes, CRS identifiers and the reprojection seam

use crate::{Result, StoreError};
use geo_types::{coord, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate reference system identifier, e.g. `EPSG:4326`.
///
/// CRS math lives outside this crate; stores only carry and compare identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Crs {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Axis-aligned bounding box tagged with an optional CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    #[serde(default)]
    pub crs: Option<Crs>,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
            crs: None,
        }
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Smallest envelope covering both; keeps this envelope's CRS
    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            crs: self.crs.clone(),
        }
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }

    /// Closed, counter-clockwise polygon ring of the box
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }
}

/// Reprojection collaborator
///
/// Implementations own the datum/projection math; stores only call through here
/// to bring query hints into their native CRS.
pub trait CoordinateTransformer: Send + Sync {
    fn transform_envelope(&self, envelope: &Envelope, target: &Crs) -> Result<Envelope>;
}

/// Accepts envelopes already in the target CRS (or untagged ones) and rejects
/// anything that would need real reprojection.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransformer;

impl CoordinateTransformer for IdentityTransformer {
    fn transform_envelope(&self, envelope: &Envelope, target: &Crs) -> Result<Envelope> {
        match &envelope.crs {
            Some(source) if source != target => Err(StoreError::Transform(format!(
                "no transformation available from {} to {}",
                source, target
            ))),
            _ => Ok(envelope.clone().with_crs(target.clone())),
        }
    }
}
