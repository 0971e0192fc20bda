//! Value types shared by tile and feature stores

mod envelope;
mod feature;
pub mod geometry;

pub use envelope::{CoordinateTransformer, Crs, Envelope, IdentityTransformer};
pub use feature::{Feature, FeatureType, Property, PropertyKind, PropertyType};
pub use geometry::{Geometry, MultiKind};

/// Property value of a feature
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Geometry(Geometry),
    String(String),
    Integer(i64),
    Boolean(bool),
    Decimal(f64),
    Null,
}

impl Value {
    /// Kind this value satisfies; `None` for null, which fits any kind
    pub fn kind(&self) -> Option<PropertyKind> {
        match self {
            Value::Geometry(_) => Some(PropertyKind::Geometry),
            Value::String(_) => Some(PropertyKind::String),
            Value::Integer(_) => Some(PropertyKind::Integer),
            Value::Boolean(_) => Some(PropertyKind::Boolean),
            Value::Decimal(_) => Some(PropertyKind::Decimal),
            Value::Null => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Decimal(f)
    }
}

impl From<Geometry> for Value {
    fn from(g: Geometry) -> Self {
        Value::Geometry(g)
    }
}
