use super::FeatureStore;
use crate::query::{Filter, FeatureResultSet, Query};
use crate::txn::{apply_replacement, FeatureLockManager, FeatureStoreTransaction, LockToken, ParsedPropertyReplacement};
use crate::types::{CoordinateTransformer, Crs, Envelope, Feature, FeatureType, IdentityTransformer};
use crate::{Result, StoreError};
use ahash::AHashSet;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Transactional in-memory store for one feature type
///
/// Transactions edit a private copy of the features and record which feature ids
/// they touched. Commit replays only those features onto the current contents, so
/// disjoint transactions both survive and the last commit wins per feature.
pub struct MemoryFeatureStore {
    feature_type: FeatureType,
    crs: Crs,
    features: Arc<RwLock<Vec<Feature>>>,
    locks: Arc<FeatureLockManager>,
    next_id: Arc<AtomicU64>,
    transformer: Arc<dyn CoordinateTransformer>,
    available: AtomicBool,
}

impl MemoryFeatureStore {
    pub fn new(feature_type: FeatureType, crs: Crs) -> Self {
        Self {
            feature_type,
            crs,
            features: Arc::new(RwLock::new(Vec::new())),
            locks: Arc::new(FeatureLockManager::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            transformer: Arc::new(IdentityTransformer),
            available: AtomicBool::new(false),
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn CoordinateTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    fn run_query(&self, snapshot: &[Feature], query: &Query) -> Result<FeatureResultSet> {
        let bbox = match &query.hints.loose_bbox {
            Some(env) => Some(self.to_store_crs(env)?),
            None => None,
        };
        let candidates: Vec<Result<Feature>> = snapshot
            .iter()
            .filter(|f| match (&bbox, f.envelope()) {
                (Some(bbox), Some(env)) => bbox.intersects(&env),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .map(Ok)
            .collect();

        let mut set = FeatureResultSet::new(candidates.into_iter());
        if let Some(filter) = &query.filter {
            set = set.filtered(Arc::clone(filter));
        }
        Ok(match query.max_features {
            Some(n) => FeatureResultSet::new(set.take(n)),
            None => set,
        })
    }

    fn to_store_crs(&self, env: &Envelope) -> Result<Envelope> {
        match &env.crs {
            Some(crs) if *crs != self.crs => self.transformer.transform_envelope(env, &self.crs),
            _ => Ok(env.clone().with_crs(self.crs.clone())),
        }
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn init(&self) -> Result<()> {
        if self.feature_type.properties.is_empty() {
            return Err(StoreError::Config(format!(
                "feature type '{}' declares no properties",
                self.feature_type.name
            )));
        }
        self.available.store(true, Ordering::Release);
        Ok(())
    }

    fn destroy(&self) {
        self.available.store(false, Ordering::Release);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn schema(&self) -> Option<FeatureType> {
        Some(self.feature_type.clone())
    }

    fn query(&self, queries: &[Query]) -> Result<FeatureResultSet> {
        if !self.is_available() {
            return Err(StoreError::Unavailable(format!("store '{}'", self.feature_type.name)));
        }
        let snapshot = self.features.read().clone();
        let sets = queries
            .iter()
            .map(|q| self.run_query(&snapshot, q))
            .collect::<Result<Vec<_>>>()?;
        Ok(FeatureResultSet::combine(sets))
    }

    fn envelope(&self, type_name: &str) -> Option<Envelope> {
        if type_name != self.feature_type.name || !self.is_available() {
            return None;
        }
        self.features
            .read()
            .iter()
            .filter_map(Feature::envelope)
            .reduce(|a, b| a.union(&b))
            .map(|env| env.with_crs(self.crs.clone()))
    }

    fn acquire_transaction(&self) -> Result<Box<dyn FeatureStoreTransaction>> {
        if !self.is_available() {
            return Err(StoreError::Unavailable(format!("store '{}'", self.feature_type.name)));
        }
        Ok(Box::new(MemoryTransaction {
            feature_type: self.feature_type.clone(),
            crs: self.crs.clone(),
            working: self.features.read().clone(),
            target: Arc::clone(&self.features),
            locks: Arc::clone(&self.locks),
            next_id: Arc::clone(&self.next_id),
            touched: Vec::new(),
            touched_set: AHashSet::new(),
        }))
    }

    fn lock_manager(&self) -> Option<&FeatureLockManager> {
        Some(&self.locks)
    }
}

struct MemoryTransaction {
    feature_type: FeatureType,
    crs: Crs,
    working: Vec<Feature>,
    target: Arc<RwLock<Vec<Feature>>>,
    locks: Arc<FeatureLockManager>,
    next_id: Arc<AtomicU64>,
    /// Ids written by this transaction, in first-touch order
    touched: Vec<String>,
    touched_set: AHashSet<String>,
}

impl MemoryTransaction {
    fn touch(&mut self, id: &str) {
        if self.touched_set.insert(id.to_string()) {
            self.touched.push(id.to_string());
        }
    }

    fn check_type(&self, type_name: &str) -> Result<()> {
        if type_name == self.feature_type.name {
            Ok(())
        } else {
            Err(StoreError::ContractViolation(format!(
                "store serves '{}', not '{}'",
                self.feature_type.name, type_name
            )))
        }
    }

    fn check_properties(&self, feature: &Feature) -> Result<()> {
        for prop in &feature.properties {
            let declared = self.feature_type.property(&prop.name).ok_or_else(|| {
                StoreError::ContractViolation(format!("'{}' has no property '{}'", self.feature_type.name, prop.name))
            })?;
            if let Some(kind) = prop.value.kind() {
                if kind != declared.kind {
                    return Err(StoreError::ContractViolation(format!(
                        "property '{}' holds {:?} values, got {:?}",
                        prop.name, declared.kind, kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Indexes of features matching `filter`, lock-checked against `lock`
    fn matching(&self, filter: &dyn Filter, lock: Option<&LockToken>) -> Result<Vec<usize>> {
        let mut hits = Vec::new();
        for (i, feature) in self.working.iter().enumerate() {
            if filter.evaluate(feature)? {
                self.locks.check(&feature.id, lock)?;
                hits.push(i);
            }
        }
        Ok(hits)
    }
}

impl FeatureStoreTransaction for MemoryTransaction {
    fn perform_insert(&mut self, features: Vec<Feature>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(features.len());
        for mut feature in features {
            self.check_type(&feature.type_name)?;
            self.check_properties(&feature)?;
            if feature.id.is_empty() {
                feature.id = format!("{}.{}", self.feature_type.name, self.next_id.fetch_add(1, Ordering::Relaxed));
            } else if self.working.iter().any(|f| f.id == feature.id) {
                return Err(StoreError::ContractViolation(format!("feature '{}' already exists", feature.id)));
            }
            for prop in &mut feature.properties {
                if let crate::types::Value::Geometry(g) = &mut prop.value {
                    if g.crs().is_none() {
                        g.set_crs(&self.crs);
                    }
                }
            }
            ids.push(feature.id.clone());
            self.touch(&feature.id);
            self.working.push(feature);
        }
        Ok(ids)
    }

    fn perform_update(
        &mut self,
        type_name: &str,
        replacements: &[ParsedPropertyReplacement],
        filter: &dyn Filter,
        lock: Option<&LockToken>,
    ) -> Result<usize> {
        self.check_type(type_name)?;
        for r in replacements {
            r.check_against(&self.feature_type)?;
        }

        let hits = self.matching(filter, lock)?;
        for &i in &hits {
            let feature = &mut self.working[i];
            let mut properties = feature.properties.clone();
            for r in replacements {
                apply_replacement(&mut properties, r)
                    .map_err(|e| StoreError::ContractViolation(format!("feature '{}': {}", feature.id, e)))?;
            }
            feature.properties = properties;
            let id = feature.id.clone();
            self.touch(&id);
        }
        debug!(type_name, updated = hits.len(), "update performed");
        Ok(hits.len())
    }

    fn perform_delete(&mut self, type_name: &str, filter: &dyn Filter, lock: Option<&LockToken>) -> Result<usize> {
        self.check_type(type_name)?;
        let hits = self.matching(filter, lock)?;
        for &i in hits.iter().rev() {
            let removed = self.working.remove(i);
            self.touch(&removed.id);
        }
        Ok(hits.len())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut deleted = 0;
        {
            let mut target = this.target.write();
            for id in &this.touched {
                let current = target.iter().position(|f| &f.id == id);
                match (this.working.iter().find(|f| &f.id == id), current) {
                    (Some(feature), Some(i)) => target[i] = feature.clone(),
                    (Some(feature), None) => target.push(feature.clone()),
                    (None, Some(i)) => {
                        target.remove(i);
                        this.locks.forget(id);
                        deleted += 1;
                    }
                    (None, None) => this.locks.forget(id),
                }
            }
        }
        debug!(touched = this.touched.len(), deleted, "transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::IdFilter;
    use crate::txn::UpdateAction;
    use crate::types::{Geometry, Property, PropertyKind, PropertyType, Value};
    use geo_types::point;

    fn store() -> MemoryFeatureStore {
        let ft = FeatureType::new(
            "poi",
            vec![
                PropertyType::new("geom", PropertyKind::Geometry),
                PropertyType::new("tag", PropertyKind::String),
            ],
        );
        let store = MemoryFeatureStore::new(ft, Crs::new("EPSG:4326"));
        store.init().unwrap();
        store
    }

    fn poi(id: &str, x: f64, y: f64, tags: &[&str]) -> Feature {
        let mut props = vec![Property::new("geom", Geometry::from_geo(point!(x: x, y: y).into()))];
        props.extend(tags.iter().map(|t| Property::new("tag", *t)));
        Feature::new(id, "poi", props)
    }

    fn seed(store: &MemoryFeatureStore) {
        let mut txn = store.acquire_transaction().unwrap();
        txn.perform_insert(vec![poi("a", 1.0, 1.0, &["x", "y"]), poi("b", 5.0, 5.0, &[]), poi("", 9.0, 9.0, &["z"])])
            .unwrap();
        txn.commit().unwrap();
    }

    fn all(store: &MemoryFeatureStore) -> Vec<Feature> {
        store.query(&[Query::new()]).unwrap().into_features().unwrap()
    }

    #[test]
    fn test_insert_generates_ids_and_commits() {
        let store = store();
        seed(&store);
        let ids: Vec<String> = all(&store).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["a", "b", "poi.1"]);
        assert_eq!(all(&store)[0].value("geom").unwrap().as_geometry().unwrap().crs(), Some(&Crs::new("EPSG:4326")));
        assert_eq!(store.query_hits(&[Query::new(), Query::new().with_max_features(1)]).unwrap(), 4);
    }

    #[test]
    fn test_rollback_discards() {
        let store = store();
        let mut txn = store.acquire_transaction().unwrap();
        txn.perform_insert(vec![poi("a", 0.0, 0.0, &[])]).unwrap();
        txn.rollback().unwrap();
        assert!(all(&store).is_empty());
    }

    #[test]
    fn test_update_splices_values() {
        let store = store();
        seed(&store);
        let mut txn = store.acquire_transaction().unwrap();
        let replacements = [ParsedPropertyReplacement::new("tag", UpdateAction::InsertBefore, 1, "new")];
        let n = txn.perform_update("poi", &replacements, &IdFilter::new(["a"]), None).unwrap();
        assert_eq!(n, 1);
        txn.commit().unwrap();

        let a = all(&store).into_iter().find(|f| f.id == "a").unwrap();
        let tags: Vec<&str> = a.values("tag").into_iter().filter_map(Value::as_str).collect();
        assert_eq!(tags, vec!["x", "new", "y"]);
    }

    #[test]
    fn test_update_rejects_bad_index_and_kind() {
        let store = store();
        seed(&store);
        let mut txn = store.acquire_transaction().unwrap();
        let out_of_range = [ParsedPropertyReplacement::new("tag", UpdateAction::InsertAfter, 0, "t")];
        // "b" has no tags
        let err = txn.perform_update("poi", &out_of_range, &IdFilter::new(["b"]), None).unwrap_err();
        assert!(matches!(err, StoreError::ContractViolation(_)));

        let wrong_kind = [ParsedPropertyReplacement::new("tag", UpdateAction::InsertBefore, 0, 5i64)];
        assert!(txn.perform_update("poi", &wrong_kind, &IdFilter::new(["a"]), None).is_err());
        assert!(txn.perform_update("road", &[], &IdFilter::new(["a"]), None).is_err());
    }

    #[test]
    fn test_locks_guard_mutation() {
        let store = store();
        seed(&store);
        let token = store.lock_manager().unwrap().lock(["a"]).unwrap();

        let mut txn = store.acquire_transaction().unwrap();
        let err = txn.perform_delete("poi", &IdFilter::new(["a"]), None).unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));

        assert_eq!(txn.perform_delete("poi", &IdFilter::new(["a", "b"]), Some(&token)).unwrap(), 2);
        txn.commit().unwrap();
        assert!(!store.lock_manager().unwrap().is_locked("a"));
        assert_eq!(all(&store).len(), 1);
    }

    #[test]
    fn test_disjoint_commits_both_survive() {
        let store = store();
        let mut first = store.acquire_transaction().unwrap();
        let mut second = store.acquire_transaction().unwrap();
        first.perform_insert(vec![poi("one", 0.0, 0.0, &[])]).unwrap();
        second.perform_insert(vec![poi("two", 0.0, 0.0, &[])]).unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        let ids: Vec<String> = all(&store).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn test_concurrent_delete_and_insert_keep_counts() {
        let store = store();
        seed(&store);
        let mut deleter = store.acquire_transaction().unwrap();
        let mut inserter = store.acquire_transaction().unwrap();
        assert_eq!(deleter.perform_delete("poi", &IdFilter::new(["a"]), None).unwrap(), 1);
        inserter.perform_insert(vec![poi("c", 2.0, 2.0, &[])]).unwrap();
        inserter.commit().unwrap();
        deleter.commit().unwrap();

        let ids: Vec<String> = all(&store).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["b", "poi.1", "c"]);
    }

    #[test]
    fn test_last_commit_wins_per_feature() {
        let store = store();
        seed(&store);
        let mut first = store.acquire_transaction().unwrap();
        let mut second = store.acquire_transaction().unwrap();
        let tag = |v: &str| [ParsedPropertyReplacement::new("tag", UpdateAction::InsertBefore, 0, v)];
        first.perform_update("poi", &tag("first"), &IdFilter::new(["a"]), None).unwrap();
        second.perform_update("poi", &tag("second"), &IdFilter::new(["a"]), None).unwrap();
        second.perform_delete("poi", &IdFilter::new(["b"]), None).unwrap();
        second.commit().unwrap();
        first.commit().unwrap();

        let features = all(&store);
        let a = features.iter().find(|f| f.id == "a").unwrap();
        let tags: Vec<&str> = a.values("tag").into_iter().filter_map(Value::as_str).collect();
        assert_eq!(tags, vec!["first", "x", "y"]);
        // first never touched b, so the delete from second stands
        assert!(features.iter().all(|f| f.id != "b"));
    }

    #[test]
    fn test_bbox_hint_and_envelope() {
        let store = store();
        seed(&store);
        let q = Query::new().with_bbox(Envelope::new(4.0, 4.0, 10.0, 10.0).with_crs(Crs::new("EPSG:4326")));
        let ids: Vec<String> = store.query(&[q]).unwrap().map(|f| f.unwrap().id).collect();
        assert_eq!(ids, vec!["b", "poi.1"]);

        let env = store.envelope("poi").unwrap();
        assert_eq!((env.min_x, env.max_x), (1.0, 9.0));
        assert!(store.envelope("road").is_none());

        let foreign = Query::new().with_bbox(Envelope::new(0.0, 0.0, 1.0, 1.0).with_crs(Crs::new("EPSG:3857")));
        assert!(matches!(store.query(&[foreign]), Err(StoreError::Transform(_))));
    }
}
