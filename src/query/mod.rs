//! Feature queries and the result pipeline

mod result;

pub use result::{CombinedResultSet, FeatureResultSet, FilteredResultSet, IteratorResultSet};

use crate::types::{Envelope, Feature};
use crate::Result;
use ahash::AHashSet;
use std::fmt;
use std::sync::Arc;

/// Predicate over features
///
/// Evaluation is left to the caller's filter engine; any closure
/// `Fn(&Feature) -> Result<bool>` works.
pub trait Filter: Send + Sync {
    fn evaluate(&self, feature: &Feature) -> Result<bool>;
}

impl<F> Filter for F
where
    F: Fn(&Feature) -> Result<bool> + Send + Sync,
{
    fn evaluate(&self, feature: &Feature) -> Result<bool> {
        self(feature)
    }
}

/// Matches features by id
#[derive(Debug, Clone, Default)]
pub struct IdFilter {
    ids: AHashSet<String>,
}

impl IdFilter {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for IdFilter {
    fn evaluate(&self, feature: &Feature) -> Result<bool> {
        Ok(self.ids.contains(&feature.id))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryHints {
    /// Coarse area of interest, used to prefilter rows in SQL
    pub loose_bbox: Option<Envelope>,
    /// Map scale denominator, selects the level of detail
    pub scale: Option<f64>,
}

#[derive(Clone, Default)]
pub struct Query {
    pub filter: Option<Arc<dyn Filter>>,
    pub max_features: Option<usize>,
    pub hints: QueryHints,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_max_features(mut self, max: usize) -> Self {
        self.max_features = Some(max);
        self
    }

    pub fn with_bbox(mut self, envelope: Envelope) -> Self {
        self.hints.loose_bbox = Some(envelope);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.hints.scale = Some(scale);
        self
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter.as_ref().map(|_| "<filter>"))
            .field("max_features", &self.max_features)
            .field("hints", &self.hints)
            .finish()
    }
}
