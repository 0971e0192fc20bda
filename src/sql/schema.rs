//! Column metadata to feature type mapping

use crate::types::{FeatureType, PropertyKind, PropertyType};
use crate::{Result, StoreError};
use tracing::error;

/// Maps a declared SQL column type to a property kind
///
/// Size and precision suffixes are ignored: `VARCHAR(255)` maps like `VARCHAR`.
pub fn map_column_type(declared: &str) -> Option<PropertyKind> {
    let base = declared.split('(').next().unwrap_or_default().trim().to_ascii_uppercase();
    let kind = match base.as_str() {
        "GEOMETRY" | "POINT" | "LINESTRING" | "POLYGON" | "MULTIPOINT" | "MULTILINESTRING" | "MULTIPOLYGON"
        | "GEOMETRYCOLLECTION" | "BLOB" => PropertyKind::Geometry,
        "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "NVARCHAR" | "NCHAR" | "CLOB" | "STRING" => PropertyKind::String,
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => PropertyKind::Integer,
        "BOOLEAN" | "BOOL" | "BIT" => PropertyKind::Boolean,
        "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "NUMERIC" | "DECIMAL" => PropertyKind::Decimal,
        _ => return None,
    };
    Some(kind)
}

/// Result column feeding a property
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    /// Position in the result row
    pub index: usize,
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub feature_type: FeatureType,
    pub columns: Vec<ColumnMapping>,
    /// Result column holding feature ids
    pub id_column: Option<usize>,
}

/// Builds the feature type from `(name, declared type)` pairs of the base statement
///
/// The id column, when configured, is not a property. Unmapped columns are skipped
/// with an error log, or rejected outright when `strict` is set.
pub fn derive_schema(
    type_name: &str,
    columns: &[(String, Option<String>)],
    id_column: Option<&str>,
    strict: bool,
) -> Result<Schema> {
    let mut mappings = Vec::new();
    let mut id_index = None;

    for (index, (name, declared)) in columns.iter().enumerate() {
        if Some(name.as_str()) == id_column {
            id_index = Some(index);
            continue;
        }
        match declared.as_deref().and_then(map_column_type) {
            Some(kind) => mappings.push(ColumnMapping {
                index,
                name: name.clone(),
                kind,
            }),
            None if strict => {
                return Err(StoreError::Config(format!(
                    "'{}': column '{}' has unsupported type {:?}",
                    type_name, name, declared
                )))
            }
            None => error!(type_name, column = %name, declared = ?declared, "skipping column of unmapped type"),
        }
    }

    if let Some(id) = id_column {
        if id_index.is_none() {
            return Err(StoreError::Config(format!("'{}': id column '{}' not in result", type_name, id)));
        }
    }
    if mappings.is_empty() {
        return Err(StoreError::Config(format!("'{}': no column maps to a property", type_name)));
    }

    let properties = mappings.iter().map(|m| PropertyType::new(m.name.clone(), m.kind)).collect();
    Ok(Schema {
        feature_type: FeatureType::new(type_name, properties),
        columns: mappings,
        id_column: id_index,
    })
}
