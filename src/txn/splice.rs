//! Ordered insertion into multi-valued properties
//!
//! A feature's multi-valued property is the run of properties sharing one name,
//! possibly interleaved with other properties. Splicing inserts one value relative
//! to a position in that run and leaves every other property where it was.

use crate::types::{FeatureType, Property, Value};
use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Insert so the new value lands at `index`
    InsertBefore,
    /// Insert directly after the value at `index`
    InsertAfter,
}

/// One insertion parsed from an update request
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPropertyReplacement {
    pub value: Value,
    pub action: UpdateAction,
    /// Property name
    pub property: String,
    /// Position within the property's run of values
    pub index: usize,
}

impl ParsedPropertyReplacement {
    pub fn new(property: impl Into<String>, action: UpdateAction, index: usize, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            action,
            property: property.into(),
            index,
        }
    }

    /// The value must fit the property's declared kind; nulls fit any kind
    pub fn check_against(&self, schema: &FeatureType) -> Result<()> {
        let declared = schema.property(&self.property).ok_or_else(|| {
            StoreError::ContractViolation(format!("'{}' has no property '{}'", schema.name, self.property))
        })?;
        match self.value.kind() {
            Some(kind) if kind != declared.kind => Err(StoreError::ContractViolation(format!(
                "property '{}' holds {:?} values, got {:?}",
                self.property, declared.kind, kind
            ))),
            _ => Ok(()),
        }
    }
}

/// Inserts the replacement's value into `properties`
///
/// `InsertBefore` accepts indexes `0..=len`, `InsertAfter` accepts `0..len`, where
/// `len` is the current run length. The run grows by exactly one.
pub fn apply(properties: &mut Vec<Property>, replacement: &ParsedPropertyReplacement) -> Result<()> {
    let run: Vec<usize> = properties
        .iter()
        .enumerate()
        .filter(|(_, p)| p.name == replacement.property)
        .map(|(i, _)| i)
        .collect();
    let len = run.len();

    let target = match replacement.action {
        UpdateAction::InsertBefore if replacement.index <= len => replacement.index,
        UpdateAction::InsertAfter if replacement.index < len => replacement.index + 1,
        action => {
            return Err(StoreError::ContractViolation(format!(
                "{:?} at index {} of '{}', which has {} values",
                action, replacement.index, replacement.property, len
            )))
        }
    };

    let at = match (run.get(target), run.last()) {
        (Some(&pos), _) => pos,
        (None, Some(&last)) => last + 1,
        (None, None) => properties.len(),
    };
    properties.insert(at, Property::new(replacement.property.clone(), replacement.value.clone()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PropertyKind, PropertyType};

    fn run(values: &[i64]) -> Vec<Property> {
        values.iter().map(|v| Property::new("v", *v)).collect()
    }

    fn ints(props: &[Property], name: &str) -> Vec<i64> {
        props.iter().filter(|p| p.name == name).filter_map(|p| p.value.as_i64()).collect()
    }

    #[test]
    fn test_insert_before_keeps_order() {
        let mut props = run(&[10, 11, 12, 13, 14]);
        apply(&mut props, &ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 1, 99i64)).unwrap();

        let values = ints(&props, "v");
        assert_eq!(values.len(), 6);
        assert_eq!(values[1], 99);
        let originals: Vec<i64> = [0, 2, 3, 4, 5].iter().map(|&i| values[i]).collect();
        assert_eq!(originals, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_insert_after_and_bounds() {
        let mut props = run(&[1, 2, 3]);
        apply(&mut props, &ParsedPropertyReplacement::new("v", UpdateAction::InsertAfter, 2, 4i64)).unwrap();
        assert_eq!(ints(&props, "v"), vec![1, 2, 3, 4]);

        apply(&mut props, &ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 4, 5i64)).unwrap();
        assert_eq!(ints(&props, "v"), vec![1, 2, 3, 4, 5]);

        let too_far = ParsedPropertyReplacement::new("v", UpdateAction::InsertAfter, 5, 0i64);
        assert!(matches!(apply(&mut props, &too_far), Err(StoreError::ContractViolation(_))));
        let way_too_far = ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 6, 0i64);
        assert!(matches!(apply(&mut props, &way_too_far), Err(StoreError::ContractViolation(_))));
        assert_eq!(props.len(), 5);
    }

    #[test]
    fn test_interleaved_run() {
        let mut props = vec![
            Property::new("name", "a"),
            Property::new("v", 1i64),
            Property::new("name", "b"),
            Property::new("v", 2i64),
            Property::new("other", true),
        ];
        apply(&mut props, &ParsedPropertyReplacement::new("v", UpdateAction::InsertAfter, 1, 3i64)).unwrap();
        apply(&mut props, &ParsedPropertyReplacement::new("name", UpdateAction::InsertBefore, 1, "between")).unwrap();

        let names: Vec<&str> = props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "v", "name", "name", "v", "v", "other"]);
        assert_eq!(ints(&props, "v"), vec![1, 2, 3]);
        assert_eq!(props[2].value.as_str(), Some("between"));
    }

    #[test]
    fn test_empty_run() {
        let mut props = vec![Property::new("x", 1i64)];
        let after = ParsedPropertyReplacement::new("v", UpdateAction::InsertAfter, 0, 1i64);
        assert!(apply(&mut props, &after).is_err());
        apply(&mut props, &ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 0, 1i64)).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props[1].name, "v");
    }

    #[test]
    fn test_kind_check() {
        let schema = FeatureType::new("t", vec![PropertyType::new("v", PropertyKind::Integer)]);
        assert!(ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 0, 1i64).check_against(&schema).is_ok());
        assert!(ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 0, Value::Null).check_against(&schema).is_ok());
        assert!(ParsedPropertyReplacement::new("v", UpdateAction::InsertBefore, 0, "x").check_against(&schema).is_err());
        assert!(ParsedPropertyReplacement::new("w", UpdateAction::InsertBefore, 0, 1i64).check_against(&schema).is_err());
    }
}
