//! Features, properties and the derived feature type

use crate::types::{Envelope, Value};

/// Closed set of property kinds a column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Geometry,
    String,
    Integer,
    Boolean,
    Decimal,
}

/// Property declaration
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyType {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Feature type schema
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureType {
    pub name: String,
    pub properties: Vec<PropertyType>,
}

impl FeatureType {
    pub fn new(name: impl Into<String>, properties: Vec<PropertyType>) -> Self {
        Self { name: name.into(), properties }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyType> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// First geometry property, used for bbox pre-filtering
    pub fn default_geometry(&self) -> Option<&PropertyType> {
        self.properties.iter().find(|p| p.kind == PropertyKind::Geometry)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Value,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// A feature with an ordered property list
///
/// A multi-valued property is the run of properties sharing one name; their order in
/// `properties` is the order of the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub type_name: String,
    pub properties: Vec<Property>,
}

impl Feature {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>, properties: Vec<Property>) -> Self {
        Self { id: id.into(), type_name: type_name.into(), properties }
    }

    /// All values of the named property, in order
    pub fn values(&self, name: &str) -> Vec<&Value> {
        self.properties
            .iter()
            .filter(|p| p.name == name)
            .map(|p| &p.value)
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.properties.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Union of the envelopes of all geometry values
    pub fn envelope(&self) -> Option<Envelope> {
        self.properties
            .iter()
            .filter_map(|p| p.value.as_geometry())
            .filter_map(|g| g.envelope())
            .reduce(|acc, env| acc.union(&env))
    }
}
