//! Lazy feature sequences
//!
//! A query produces one [`IteratorResultSet`] per sub-query, optionally wrapped in a
//! [`FilteredResultSet`], and a [`CombinedResultSet`] chains them in sub-query order.

use super::Filter;
use crate::types::Feature;
use crate::{Result, StoreError};
use std::sync::Arc;

/// Type-erased feature sequence handed to callers
pub struct FeatureResultSet {
    inner: Box<dyn Iterator<Item = Result<Feature>> + Send>,
}

impl FeatureResultSet {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Feature>> + Send + 'static,
    {
        Self { inner: Box::new(iter) }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Keeps only features matching `filter`
    pub fn filtered(self, filter: Arc<dyn Filter>) -> Self {
        Self::new(FilteredResultSet::new(self, filter))
    }

    /// Chains `sets` in order
    pub fn combine(sets: Vec<FeatureResultSet>) -> Self {
        Self::new(CombinedResultSet::new(sets))
    }

    /// Drains the sequence, stopping at the first error
    pub fn into_features(self) -> Result<Vec<Feature>> {
        self.collect()
    }
}

impl Iterator for FeatureResultSet {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Turns raw rows into features one at a time
pub struct IteratorResultSet<I, F> {
    rows: I,
    decode: F,
}

impl<I, F> IteratorResultSet<I, F>
where
    I: Iterator,
    F: FnMut(I::Item) -> Result<Feature>,
{
    pub fn new(rows: I, decode: F) -> Self {
        Self { rows, decode }
    }
}

impl<I, F> Iterator for IteratorResultSet<I, F>
where
    I: Iterator,
    F: FnMut(I::Item) -> Result<Feature>,
{
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(&mut self.decode)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// Skips features the filter rejects; errors pass through
pub struct FilteredResultSet<I> {
    inner: I,
    filter: Arc<dyn Filter>,
}

impl<I> FilteredResultSet<I> {
    pub fn new(inner: I, filter: Arc<dyn Filter>) -> Self {
        Self { inner, filter }
    }
}

impl<I> Iterator for FilteredResultSet<I>
where
    I: Iterator<Item = Result<Feature>>,
{
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.inner.by_ref() {
            let feature = match item {
                Ok(f) => f,
                Err(e) => return Some(Err(e)),
            };
            match self.filter.evaluate(&feature) {
                Ok(true) => return Some(Ok(feature)),
                Ok(false) => continue,
                Err(e) => {
                    return Some(Err(match e {
                        StoreError::Filter(_) => e,
                        other => StoreError::Filter(format!("feature '{}': {}", feature.id, other)),
                    }))
                }
            }
        }
        None
    }
}

/// Yields every set to exhaustion before moving to the next
pub struct CombinedResultSet {
    sets: std::vec::IntoIter<FeatureResultSet>,
    current: Option<FeatureResultSet>,
}

impl CombinedResultSet {
    pub fn new(sets: Vec<FeatureResultSet>) -> Self {
        let mut sets = sets.into_iter();
        let current = sets.next();
        Self { sets, current }
    }
}

impl Iterator for CombinedResultSet {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.current.as_mut()?;
            if let Some(item) = current.next() {
                return Some(item);
            }
            self.current = self.sets.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Property;

    fn features(prefix: &str, n: usize) -> FeatureResultSet {
        let items: Vec<Result<Feature>> = (0..n)
            .map(|i| Ok(Feature::new(format!("{}{}", prefix, i), "t", vec![Property::new("n", i as i64)])))
            .collect();
        FeatureResultSet::new(items.into_iter())
    }

    fn ids(set: FeatureResultSet) -> Vec<String> {
        set.map(|f| f.unwrap().id).collect()
    }

    #[test]
    fn test_combined_preserves_query_and_row_order() {
        let combined = FeatureResultSet::combine(vec![features("q1-", 3), FeatureResultSet::empty(), features("q2-", 2)]);
        assert_eq!(ids(combined), vec!["q1-0", "q1-1", "q1-2", "q2-0", "q2-1"]);
    }

    #[test]
    fn test_filter_decorator() {
        let even: Arc<dyn Filter> = Arc::new(|f: &Feature| -> Result<bool> { Ok(f.value("n").and_then(|v| v.as_i64()).unwrap_or(1) % 2 == 0) });
        assert_eq!(ids(features("r", 5).filtered(even)), vec!["r0", "r2", "r4"]);
    }

    #[test]
    fn test_filter_errors_surface() {
        let broken: Arc<dyn Filter> = Arc::new(|_: &Feature| -> Result<bool> { Err(StoreError::Unsupported("operator".into())) });
        let mut set = features("r", 2).filtered(broken);
        assert!(matches!(set.next(), Some(Err(StoreError::Filter(_)))));
    }

    #[test]
    fn test_iterator_result_set_decodes_lazily() {
        let mut decoded = 0;
        let mut set = IteratorResultSet::new(vec![1i64, 2, 3].into_iter(), |n| {
            decoded += 1;
            Ok(Feature::new(n.to_string(), "t", vec![]))
        });
        assert_eq!(set.next().unwrap().unwrap().id, "1");
        drop(set);
        assert_eq!(decoded, 1);
    }

    #[test]
    fn test_empty_combination() {
        assert!(FeatureResultSet::combine(vec![]).into_features().unwrap().is_empty());
    }
}
