//! Level-of-detail statement routing

use crate::{Result, StoreError};
use std::collections::BTreeMap;

/// Statement used when no other level applies
pub const BASE_LOD: i64 = -1;

/// SQL statements keyed by the scale denominator they apply from
#[derive(Debug, Clone, PartialEq)]
pub struct LodTable {
    statements: BTreeMap<i64, String>,
}

impl LodTable {
    /// `base` becomes the `-1` level; `lods` may not redefine it
    pub fn new(base: impl Into<String>, lods: &BTreeMap<i64, String>) -> Result<Self> {
        if lods.contains_key(&BASE_LOD) {
            return Err(StoreError::Config(format!(
                "level of detail {} is reserved for the base statement",
                BASE_LOD
            )));
        }
        let mut statements = lods.clone();
        statements.insert(BASE_LOD, base.into());
        Ok(Self { statements })
    }

    /// Statement of the greatest level not above `scale`, the base statement otherwise
    pub fn select(&self, scale: Option<f64>) -> &str {
        let chosen = scale
            .filter(|s| !s.is_nan())
            .and_then(|s| self.statements.range(..=s.floor() as i64).next_back());
        match chosen {
            Some((_, sql)) => sql,
            None => &self.statements[&BASE_LOD],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.statements.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
