//! Read-only feature store over SQL statements
//!
//! The store serves one feature type. Its schema is derived from the base
//! statement's column metadata at `init`. Each query picks a statement by scale
//! (see [`LodTable`]), binds the area of interest as a WKB polygon, and streams
//! rows into features on demand.
//!
//! Statements are validated when the query is issued. Each sub-query then opens
//! its cursor when the combined result reaches it: a reader thread owns the pooled
//! connection and steps the cursor into a bounded channel. The connection goes back
//! to the pool once the cursor is drained or the result set is dropped.

use super::connection::{apply_limit, ConnectionProvider, PooledConnection};
use super::lod::LodTable;
use super::schema::{derive_schema, Schema};
use crate::cache::{CacheStats, EnvelopeCache};
use crate::config::SqlFeatureStoreConfig;
use crate::feature::FeatureStore;
use crate::query::{FeatureResultSet, IteratorResultSet, Query};
use crate::types::geometry::{decode_wkb, encode_wkb, parse_wkt};
use crate::types::{CoordinateTransformer, Crs, Envelope, Feature, FeatureType, Geometry, Property, PropertyKind, Value};
use crate::{Result, StoreError};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rows a reader may step ahead of the consumer, per sub-query
const ROW_BUFFER: usize = 64;

/// Values of one result row, aligned with the schema's columns
struct RawRow {
    id: Option<SqlValue>,
    values: Vec<Option<SqlValue>>,
}

/// Everything a reader thread needs to run one sub-query
struct CursorSpec {
    provider: Arc<dyn ConnectionProvider>,
    connection_id: String,
    type_name: String,
    sql: String,
    bbox: Vec<u8>,
    columns: Vec<String>,
    id_column: Option<String>,
}

impl CursorSpec {
    /// Borrows a connection and starts stepping the cursor on a reader thread
    fn open(self: Box<Self>) -> Result<Receiver<Result<RawRow>>> {
        let conn = self.provider.acquire(&self.connection_id)?;
        let (tx, rx) = bounded(ROW_BUFFER);
        thread::Builder::new()
            .name(format!("rows-{}", self.type_name))
            .spawn(move || {
                let outcome = self.read(&conn, &tx);
                drop(conn);
                if let Err(e) = outcome {
                    // the consumer may already be gone
                    let _ = tx.send(Err(e));
                }
            })?;
        Ok(rx)
    }

    fn read(&self, conn: &PooledConnection, tx: &Sender<Result<RawRow>>) -> Result<()> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        expect_single_bind(stmt.parameter_count(), &self.sql)?;

        let positions: Vec<Option<usize>> = self.columns.iter().map(|c| stmt.column_index(c).ok()).collect();
        let id_position = match &self.id_column {
            Some(name) => stmt.column_index(name).ok(),
            None => None,
        };

        let mut rows = stmt.query(params![self.bbox])?;
        let mut read = 0usize;
        while let Some(row) = rows.next()? {
            let id = id_position.map(|i| row.get::<_, SqlValue>(i)).transpose()?;
            let values = positions
                .iter()
                .map(|p| p.map(|i| row.get::<_, SqlValue>(i)).transpose())
                .collect::<rusqlite::Result<Vec<_>>>()?;
            read += 1;
            if tx.send(Ok(RawRow { id, values })).is_err() {
                debug!(type_name = %self.type_name, rows = read, "result set dropped, cursor closed early");
                return Ok(());
            }
        }
        debug!(type_name = %self.type_name, rows = read, sql = %self.sql, "sub-query drained");
        Ok(())
    }
}

enum CursorState {
    Pending(Box<CursorSpec>),
    Open(Receiver<Result<RawRow>>),
    Closed,
}

/// Rows of one sub-query, fetched as they are pulled
struct RowCursor {
    state: CursorState,
}

impl RowCursor {
    fn new(spec: CursorSpec) -> Self {
        Self {
            state: CursorState::Pending(Box::new(spec)),
        }
    }
}

impl Iterator for RowCursor {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, CursorState::Closed) {
                CursorState::Pending(spec) => match spec.open() {
                    Ok(rx) => self.state = CursorState::Open(rx),
                    Err(e) => return Some(Err(e)),
                },
                CursorState::Open(rx) => {
                    // a disconnected channel means the reader is done
                    let item = rx.recv().ok()?;
                    if item.is_ok() {
                        self.state = CursorState::Open(rx);
                    }
                    return Some(item);
                }
                CursorState::Closed => return None,
            }
        }
    }
}

pub struct SqlFeatureStore {
    config: SqlFeatureStoreConfig,
    provider: Arc<dyn ConnectionProvider>,
    transformer: Arc<dyn CoordinateTransformer>,
    lods: LodTable,
    schema: RwLock<Option<Arc<Schema>>>,
    available: AtomicBool,
    envelope_cache: EnvelopeCache,
}

impl SqlFeatureStore {
    pub fn new(
        config: SqlFeatureStoreConfig,
        provider: Arc<dyn ConnectionProvider>,
        transformer: Arc<dyn CoordinateTransformer>,
    ) -> Result<Self> {
        let lods = LodTable::new(config.sql.clone(), &config.lods)?;
        let envelope_cache = EnvelopeCache::new(Duration::from_millis(config.envelope_ttl_ms));
        Ok(Self {
            config,
            provider,
            transformer,
            lods,
            schema: RwLock::new(None),
            available: AtomicBool::new(false),
            envelope_cache,
        })
    }

    /// Statement serving queries at `scale`
    pub fn select_statement(&self, scale: Option<f64>) -> &str {
        self.lods.select(scale)
    }

    pub fn envelope_cache_stats(&self) -> CacheStats {
        self.envelope_cache.stats()
    }

    fn type_name(&self) -> &str {
        &self.config.feature_type
    }

    fn current_schema(&self) -> Result<Arc<Schema>> {
        self.schema
            .read()
            .clone()
            .ok_or_else(|| StoreError::Unavailable(format!("feature store '{}' is not initialized", self.type_name())))
    }

    fn read_schema(&self) -> Result<Schema> {
        let conn = self.provider.acquire(&self.config.connection_id)?;
        for (level, sql) in self.lods.iter() {
            let stmt = conn.prepare(sql)?;
            expect_single_bind(stmt.parameter_count(), sql).map_err(|_| {
                StoreError::Config(format!(
                    "'{}': statement for level {} must take exactly one parameter, found {}",
                    self.type_name(),
                    level,
                    stmt.parameter_count()
                ))
            })?;
        }

        let stmt = conn.prepare(self.lods.select(None))?;
        let columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
            .collect();
        derive_schema(
            self.type_name(),
            &columns,
            self.config.id_column.as_deref(),
            self.config.strict_schema,
        )
    }

    fn to_store_crs(&self, env: &Envelope) -> Result<Envelope> {
        match &env.crs {
            Some(crs) if *crs != self.config.crs => self.transformer.transform_envelope(env, &self.config.crs),
            _ => Ok(env.clone().with_crs(self.config.crs.clone())),
        }
    }

    /// WKB polygon for the query's area of interest, the store extent without a hint
    fn bbox_param(&self, query: &Query) -> Result<Vec<u8>> {
        let env = match &query.hints.loose_bbox {
            Some(env) => self.to_store_crs(env)?,
            None => self.cached_envelope()?,
        };
        encode_wkb(&Geometry::from_geo(env.to_polygon().into()))
    }

    /// Statement text and bbox parameter for one sub-query
    fn plan(&self, query: &Query) -> Result<(String, Vec<u8>)> {
        let sql = apply_limit(
            self.lods.select(query.hints.scale),
            self.provider.dialect(),
            query.max_features,
        );
        Ok((sql, self.bbox_param(query)?))
    }

    fn fetch_envelope(&self) -> Result<Envelope> {
        let conn = self.provider.acquire(&self.config.connection_id)?;
        let wkt: Option<String> = conn.query_row(&self.config.bbox_sql, [], |row| row.get(0))?;
        let wkt = wkt.ok_or_else(|| StoreError::Unavailable(format!("'{}': empty extent", self.type_name())))?;
        let env = parse_wkt(&wkt)?
            .envelope()
            .ok_or_else(|| StoreError::Codec(format!("'{}': extent has no coordinates", self.type_name())))?;
        Ok(env.with_crs(self.config.crs.clone()))
    }

    /// Envelope through the cache, updating availability either way
    fn cached_envelope(&self) -> Result<Envelope> {
        match self.envelope_cache.get_or_refresh(|| self.fetch_envelope()) {
            Ok(env) => {
                if self.schema.read().is_some() && !self.available.swap(true, Ordering::AcqRel) {
                    info!(type_name = self.type_name(), "feature store available again");
                }
                Ok(env)
            }
            Err(e) => {
                self.available.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

/// Bbox-bound statements take exactly one parameter
fn expect_single_bind(count: usize, sql: &str) -> Result<()> {
    if count == 1 {
        Ok(())
    } else {
        Err(StoreError::ContractViolation(format!(
            "statement binds {} parameters, expected one bbox parameter: {}",
            count, sql
        )))
    }
}

fn decode_row(schema: &Schema, crs: &Crs, ordinal: usize, row: RawRow) -> Result<Feature> {
    let type_name = &schema.feature_type.name;
    let id = match row.id {
        Some(SqlValue::Text(s)) => s,
        Some(SqlValue::Integer(i)) => i.to_string(),
        Some(SqlValue::Null) | None => format!("{}.{}", type_name, ordinal),
        Some(other) => format!("{}.{:?}", type_name, other),
    };

    let mut properties = Vec::with_capacity(row.values.len());
    for (column, value) in schema.columns.iter().zip(row.values) {
        let Some(value) = value else {
            continue;
        };
        match convert_value(column.kind, value, crs) {
            Ok(v) => properties.push(Property::new(column.name.clone(), v)),
            Err(e) => error!(feature = %id, column = %column.name, error = %e, "skipping malformed value"),
        }
    }
    Ok(Feature::new(id, type_name.clone(), properties))
}

fn convert_value(kind: PropertyKind, value: SqlValue, crs: &Crs) -> Result<Value> {
    let mismatch = |v: &SqlValue| StoreError::Codec(format!("{:?} column holds {}", kind, v.data_type()));
    let value = match (kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (PropertyKind::Geometry, SqlValue::Blob(bytes)) => Value::Geometry(decode_wkb(&bytes)?.with_crs(crs)),
        (PropertyKind::String, SqlValue::Text(s)) => Value::String(s),
        (PropertyKind::String, SqlValue::Integer(i)) => Value::String(i.to_string()),
        (PropertyKind::String, SqlValue::Real(f)) => Value::String(f.to_string()),
        (PropertyKind::Integer, SqlValue::Integer(i)) => Value::Integer(i),
        (PropertyKind::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => Value::Integer(f as i64),
        (PropertyKind::Boolean, SqlValue::Integer(i)) => Value::Boolean(i != 0),
        (PropertyKind::Boolean, SqlValue::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Value::Boolean(true),
            "false" | "f" | "0" => Value::Boolean(false),
            _ => return Err(StoreError::Codec(format!("'{}' is not a boolean", s))),
        },
        (PropertyKind::Decimal, SqlValue::Real(f)) => Value::Decimal(f),
        (PropertyKind::Decimal, SqlValue::Integer(i)) => Value::Decimal(i as f64),
        (PropertyKind::Integer | PropertyKind::Decimal, SqlValue::Text(s)) => {
            let parsed = match kind {
                PropertyKind::Integer => s.trim().parse::<i64>().map(Value::Integer).ok(),
                _ => s.trim().parse::<f64>().map(Value::Decimal).ok(),
            };
            parsed.ok_or_else(|| StoreError::Codec(format!("'{}' is not a {:?}", s, kind)))?
        }
        (_, other) => return Err(mismatch(&other)),
    };
    Ok(value)
}

impl FeatureStore for SqlFeatureStore {
    fn init(&self) -> Result<()> {
        match self.read_schema() {
            Ok(schema) => {
                info!(
                    type_name = self.type_name(),
                    properties = schema.columns.len(),
                    levels = self.lods.iter().count(),
                    "sql feature store initialized"
                );
                *self.schema.write() = Some(Arc::new(schema));
                self.available.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.available.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn destroy(&self) {
        self.available.store(false, Ordering::Release);
        *self.schema.write() = None;
        self.envelope_cache.invalidate();
        debug!(type_name = self.type_name(), "sql feature store destroyed");
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn schema(&self) -> Option<FeatureType> {
        self.schema.read().as_ref().map(|s| s.feature_type.clone())
    }

    fn query(&self, queries: &[Query]) -> Result<FeatureResultSet> {
        let schema = self.current_schema()?;
        let plans = queries.iter().map(|q| self.plan(q)).collect::<Result<Vec<_>>>()?;

        // statement errors surface here rather than mid-iteration
        {
            let conn = self.provider.acquire(&self.config.connection_id)?;
            for (sql, _) in &plans {
                let stmt = conn.prepare_cached(sql)?;
                expect_single_bind(stmt.parameter_count(), sql)?;
            }
        }

        let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        let mut sets = Vec::with_capacity(queries.len());
        for (query, (sql, bbox)) in queries.iter().zip(plans) {
            let cursor = RowCursor::new(CursorSpec {
                provider: Arc::clone(&self.provider),
                connection_id: self.config.connection_id.clone(),
                type_name: self.type_name().to_string(),
                sql,
                bbox,
                columns: columns.clone(),
                id_column: self.config.id_column.clone(),
            });
            let schema = Arc::clone(&schema);
            let crs = self.config.crs.clone();
            let decoded = IteratorResultSet::new(cursor.enumerate(), move |(ordinal, row): (usize, Result<RawRow>)| {
                decode_row(&schema, &crs, ordinal, row?)
            });
            let mut set = FeatureResultSet::new(decoded);
            if let Some(filter) = &query.filter {
                set = set.filtered(Arc::clone(filter));
            }
            sets.push(set);
        }
        Ok(FeatureResultSet::combine(sets))
    }

    fn envelope(&self, type_name: &str) -> Option<Envelope> {
        if type_name != self.type_name() {
            return None;
        }
        match self.cached_envelope() {
            Ok(env) => Some(env),
            Err(e) => {
                warn!(type_name, error = %e, "feature store envelope unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, PoolConfig};
    use crate::query::IdFilter;
    use crate::sql::SqliteConnectionProvider;
    use crate::types::{IdentityTransformer, MultiKind};
    use geo_types::{line_string, point, Geometry as GeoGeometry, MultiPoint};
    use rusqlite::functions::FunctionFlags;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    const BASE_SQL: &str = "SELECT fid, name, lanes, opened, geom FROM roads WHERE ST_EnvelopeIntersects(geom, ?1) ORDER BY fid";
    const LOD_SQL: &str = "SELECT fid, name FROM roads WHERE ST_EnvelopeIntersects(geom, ?) AND lanes > 1 ORDER BY fid";

    fn wkb(g: GeoGeometry<f64>) -> Vec<u8> {
        encode_wkb(&Geometry::from_geo(g)).unwrap()
    }

    fn seed(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE roads (fid INTEGER PRIMARY KEY, name TEXT, lanes INTEGER, opened DATE, geom BLOB);
             CREATE TABLE extent (wkt TEXT);
             INSERT INTO extent VALUES ('POLYGON((0 0, 100 0, 100 100, 0 100, 0 0))');",
        )
        .unwrap();
        let mut insert = conn
            .prepare("INSERT INTO roads (fid, name, lanes, opened, geom) VALUES (?1, ?2, ?3, '2020-01-01', ?4)")
            .unwrap();
        insert
            .execute(params![1, "A1", 2, wkb(line_string![(x: 1.0, y: 1.0), (x: 5.0, y: 5.0)].into())])
            .unwrap();
        insert
            .execute(params![2, "B2", 1, wkb(line_string![(x: 50.0, y: 50.0), (x: 60.0, y: 60.0)].into())])
            .unwrap();
        let multi = MultiPoint(vec![point!(x: 80.0, y: 80.0), point!(x: 90.0, y: 90.0)]);
        insert.execute(params![3, "C3", 4, wkb(multi.into())]).unwrap();
        insert.execute(params![4, "D4", 3, vec![0xde_u8, 0xad, 0xbe, 0xef]]).unwrap();
    }

    fn config(lods: BTreeMap<i64, String>) -> SqlFeatureStoreConfig {
        SqlFeatureStoreConfig {
            connection_id: "db".into(),
            crs: Crs::new("EPSG:25832"),
            feature_type: "road".into(),
            sql: BASE_SQL.into(),
            lods,
            bbox_sql: "SELECT wkt FROM extent".into(),
            id_column: Some("fid".into()),
            strict_schema: false,
            envelope_ttl_ms: 60_000,
        }
    }

    fn provider(path: &Path) -> Arc<dyn ConnectionProvider> {
        let mut conns = BTreeMap::new();
        conns.insert(
            "db".to_string(),
            ConnectionConfig {
                path: path.to_path_buf(),
                pool: PoolConfig::default(),
            },
        );
        Arc::new(SqliteConnectionProvider::new(&conns))
    }

    fn open_store(dir: &Path, config: SqlFeatureStoreConfig) -> SqlFeatureStore {
        let path = dir.join("roads.sqlite");
        if !path.exists() {
            seed(&path);
        }
        SqlFeatureStore::new(config, provider(&path), Arc::new(IdentityTransformer)).unwrap()
    }

    fn lod_map() -> BTreeMap<i64, String> {
        let mut lods = BTreeMap::new();
        lods.insert(10_000, LOD_SQL.to_string());
        lods
    }

    fn ids(set: FeatureResultSet) -> Vec<String> {
        set.map(|f| f.unwrap().id).collect()
    }

    #[test]
    fn test_init_derives_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        assert!(!store.is_available());
        store.init().unwrap();
        assert!(store.is_available());

        let schema = store.schema().unwrap();
        let names: Vec<&str> = schema.properties.iter().map(|p| p.name.as_str()).collect();
        // fid is the id column, opened has no mapping
        assert_eq!(names, vec!["name", "lanes", "geom"]);
        assert_eq!(schema.property("geom").unwrap().kind, PropertyKind::Geometry);
    }

    #[test]
    fn test_bbox_query_decodes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        store.init().unwrap();

        let q = Query::new().with_bbox(Envelope::new(0.0, 0.0, 55.0, 55.0));
        let features = store.query(&[q]).unwrap().into_features().unwrap();
        let found: Vec<&str> = features.iter().map(|f| f.id.as_str()).collect();
        // row 4 has undecodable geometry and passes the prefilter
        assert_eq!(found, vec!["1", "2", "4"]);

        assert_eq!(features[0].value("lanes"), Some(&Value::Integer(2)));
        let geom = features[0].value("geom").unwrap().as_geometry().unwrap();
        assert_eq!(geom.crs(), Some(&Crs::new("EPSG:25832")));
        assert!(features[2].value("geom").is_none());
        assert_eq!(features[2].value("name").and_then(Value::as_str), Some("D4"));
    }

    #[test]
    fn test_multi_geometry_parts_carry_crs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        store.init().unwrap();

        let q = Query::new()
            .with_bbox(Envelope::new(75.0, 75.0, 100.0, 100.0))
            .with_filter(IdFilter::new(["3"]));
        let feature = store.query(&[q]).unwrap().next().unwrap().unwrap();
        let geom = feature.value("geom").unwrap().as_geometry().unwrap();
        assert_eq!(geom.multi_kind(), Some(MultiKind::MultiPoint));
        assert_eq!(geom.parts().len(), 2);
        assert!(geom.parts().iter().all(|p| p.crs() == Some(&Crs::new("EPSG:25832"))));
    }

    #[test]
    fn test_lod_routing_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(lod_map()));
        store.init().unwrap();
        assert_eq!(store.select_statement(Some(25_000.0)), LOD_SQL);
        assert_eq!(store.select_statement(Some(500.0)), BASE_SQL);

        let coarse = Query::new().with_scale(25_000.0);
        let features = store.query(&[coarse]).unwrap().into_features().unwrap();
        assert_eq!(features.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(), vec!["1", "3", "4"]);
        assert!(features[0].value("lanes").is_none());

        let capped = Query::new().with_max_features(2);
        assert_eq!(ids(store.query(&[capped]).unwrap()), vec!["1", "2"]);
    }

    #[test]
    fn test_combined_queries_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        store.init().unwrap();

        let east = Query::new().with_bbox(Envelope::new(45.0, 45.0, 100.0, 100.0)).with_filter(IdFilter::new(["2", "3"]));
        let west = Query::new().with_bbox(Envelope::new(0.0, 0.0, 10.0, 10.0)).with_filter(IdFilter::new(["1"]));
        assert_eq!(ids(store.query(&[east.clone(), west.clone()]).unwrap()), vec!["2", "3", "1"]);
        assert_eq!(ids(store.query(&[west, east]).unwrap()), vec!["1", "2", "3"]);
        assert_eq!(store.query_hits(&[Query::new()]).unwrap(), 4);
    }

    #[test]
    fn test_foreign_crs_bbox_needs_transformer() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        store.init().unwrap();
        let q = Query::new().with_bbox(Envelope::new(0.0, 0.0, 1.0, 1.0).with_crs(Crs::new("EPSG:4326")));
        assert!(matches!(store.query(&[q]), Err(StoreError::Transform(_))));
    }

    #[test]
    fn test_bind_count_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut lods = BTreeMap::new();
        lods.insert(5, "SELECT fid, name FROM roads WHERE fid > ?1 AND fid < ?2".to_string());
        let store = open_store(dir.path(), config(lods));
        assert!(matches!(store.init(), Err(StoreError::Config(_))));
        assert!(!store.is_available());
        assert!(matches!(store.query(&[Query::new()]), Err(StoreError::Unavailable(_))));

        assert!(matches!(expect_single_bind(0, "SELECT 1"), Err(StoreError::ContractViolation(_))));
        assert!(expect_single_bind(1, "SELECT ?").is_ok());
    }

    #[test]
    fn test_strict_schema_rejects_unmapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(BTreeMap::new());
        cfg.strict_schema = true;
        let store = open_store(dir.path(), cfg);
        assert!(matches!(store.init(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_envelope_cached_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(BTreeMap::new());
        cfg.envelope_ttl_ms = 50;
        let store = open_store(dir.path(), cfg);
        store.init().unwrap();

        let first = store.envelope("road").unwrap();
        assert_eq!((first.max_x, first.max_y), (100.0, 100.0));
        assert_eq!(first.crs, Some(Crs::new("EPSG:25832")));

        let conn = Connection::open(dir.path().join("roads.sqlite")).unwrap();
        conn.execute("UPDATE extent SET wkt = 'POLYGON((0 0, 200 0, 200 200, 0 200, 0 0))'", [])
            .unwrap();

        assert_eq!(store.envelope("road").unwrap().max_x, 100.0);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(store.envelope("road").unwrap().max_x, 200.0);
        assert_eq!(store.envelope_cache_stats().hits, 1);
        assert!(store.envelope("rail").is_none());
    }

    #[test]
    fn test_envelope_failure_marks_unavailable_until_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(BTreeMap::new());
        cfg.bbox_sql = "SELECT wkt FROM extent_view".into();
        let store = open_store(dir.path(), cfg);
        store.init().unwrap();

        assert!(store.envelope("road").is_none());
        assert!(!store.is_available());
        // queries without a bbox hint need the extent
        assert!(store.query(&[Query::new()]).is_err());

        let conn = Connection::open(dir.path().join("roads.sqlite")).unwrap();
        conn.execute_batch("CREATE VIEW extent_view AS SELECT wkt FROM extent").unwrap();

        assert!(store.envelope("road").is_some());
        assert!(store.is_available());
    }

    #[test]
    fn test_value_conversion() {
        let crs = Crs::new("EPSG:4326");
        assert_eq!(convert_value(PropertyKind::Boolean, SqlValue::Text("T".into()), &crs).unwrap(), Value::Boolean(true));
        assert_eq!(convert_value(PropertyKind::Decimal, SqlValue::Integer(3), &crs).unwrap(), Value::Decimal(3.0));
        assert_eq!(convert_value(PropertyKind::Integer, SqlValue::Text(" 42 ".into()), &crs).unwrap(), Value::Integer(42));
        assert_eq!(convert_value(PropertyKind::String, SqlValue::Null, &crs).unwrap(), Value::Null);
        assert!(convert_value(PropertyKind::Integer, SqlValue::Blob(vec![1]), &crs).is_err());
        assert!(convert_value(PropertyKind::Geometry, SqlValue::Blob(vec![1, 2]), &crs).is_err());
    }

    #[test]
    fn test_rows_are_read_as_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE points (fid INTEGER PRIMARY KEY, name TEXT, geom BLOB)")
                .unwrap();
            let blob = wkb(point!(x: 5.0, y: 5.0).into());
            let mut insert = conn.prepare("INSERT INTO points (fid, name, geom) VALUES (?1, 'p', ?2)").unwrap();
            for fid in 1..=1000 {
                insert.execute(params![fid, blob]).unwrap();
            }
        }

        // a single connection, so the reader has to hand it back before anyone else gets it
        let mut conns = BTreeMap::new();
        conns.insert(
            "db".to_string(),
            ConnectionConfig {
                path: path.clone(),
                pool: PoolConfig {
                    capacity: 1,
                    wait_timeout_ms: 5_000,
                },
            },
        );
        let provider: Arc<dyn ConnectionProvider> = Arc::new(SqliteConnectionProvider::new(&conns));
        let stepped = Arc::new(AtomicUsize::new(0));
        {
            let conn = provider.acquire("db").unwrap();
            let counter = Arc::clone(&stepped);
            conn.create_scalar_function("stepped", 0, FunctionFlags::SQLITE_UTF8, move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(1i64)
            })
            .unwrap();
        }

        let mut cfg = config(BTreeMap::new());
        cfg.sql = "SELECT fid, name, geom FROM points WHERE stepped() AND ST_EnvelopeIntersects(geom, ?1)".into();
        let store = SqlFeatureStore::new(cfg, Arc::clone(&provider), Arc::new(IdentityTransformer)).unwrap();
        store.init().unwrap();

        let mut set = store
            .query(&[Query::new().with_bbox(Envelope::new(0.0, 0.0, 10.0, 10.0))])
            .unwrap();
        assert_eq!(stepped.load(Ordering::Relaxed), 0);

        let first: Vec<String> = set.by_ref().take(2).map(|f| f.unwrap().id).collect();
        assert_eq!(first, vec!["1", "2"]);
        drop(set);

        // blocks until the reader notices the dropped result set
        drop(provider.acquire("db").unwrap());
        let read = stepped.load(Ordering::Relaxed);
        assert!((2..=2 + ROW_BUFFER + 1).contains(&read), "stepped {} rows", read);
    }

    #[test]
    fn test_null_id_falls_back_to_ordinal() {
        let columns = vec![
            ("fid".to_string(), Some("INTEGER".to_string())),
            ("name".to_string(), Some("TEXT".to_string())),
        ];
        let schema = derive_schema("road", &columns, Some("fid"), false).unwrap();
        let crs = Crs::new("EPSG:25832");
        let row = |id| RawRow {
            id,
            values: vec![Some(SqlValue::Text("n".into()))],
        };

        assert_eq!(decode_row(&schema, &crs, 3, row(Some(SqlValue::Null))).unwrap().id, "road.3");
        assert_eq!(decode_row(&schema, &crs, 4, row(None)).unwrap().id, "road.4");
        assert_eq!(decode_row(&schema, &crs, 5, row(Some(SqlValue::Integer(17)))).unwrap().id, "17");
    }

    #[test]
    fn test_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), config(BTreeMap::new()));
        store.init().unwrap();
        store.destroy();
        assert!(!store.is_available());
        assert!(store.schema().is_none());
        assert!(matches!(store.acquire_transaction(), Err(StoreError::Unsupported(_))));
    }
}
