//! Named, pooled SQL connections

use crate::config::ConnectionConfig;
use crate::storage::{PooledResource, ResourcePool};
use crate::types::geometry::decode_wkb;
use crate::types::Envelope;
use crate::{Result, StoreError};
use ahash::AHashMap;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// SQL flavour of a connection, as far as statement rewriting cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Sqlite,
    PostgreSql,
    Oracle,
    Other,
}

impl Dialect {
    /// Oracle has no `LIMIT` clause
    pub fn supports_limit(self) -> bool {
        !matches!(self, Dialect::Oracle)
    }
}

/// Appends `LIMIT n` when a cap is set and the dialect understands it
pub fn apply_limit(sql: &str, dialect: Dialect, max_features: Option<usize>) -> String {
    match max_features {
        Some(n) if dialect.supports_limit() => format!("{} LIMIT {}", sql.trim_end().trim_end_matches(';'), n),
        _ => sql.to_string(),
    }
}

pub type PooledConnection = PooledResource<String, Connection>;

/// Hands out exclusive connections by connection id
pub trait ConnectionProvider: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn acquire(&self, connection_id: &str) -> Result<PooledConnection>;

    /// Closes idle connections and refuses new borrows
    fn close(&self) {}
}

/// SQLite files, one bounded pool per connection id
pub struct SqliteConnectionProvider {
    pools: AHashMap<String, ResourcePool<String, Connection>>,
}

impl SqliteConnectionProvider {
    pub fn new(connections: &BTreeMap<String, ConnectionConfig>) -> Self {
        let pools = connections
            .iter()
            .map(|(id, config)| {
                let path = config.path.clone();
                let busy = Duration::from_millis(config.pool.wait_timeout_ms);
                let pool = ResourcePool::new(format!("sql:{}", id), config.pool, move |_: &String| {
                    open_connection(&path, busy)
                });
                (id.clone(), pool)
            })
            .collect();
        Self { pools }
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    register_spatial_functions(&conn)?;
    debug!(path = %path.display(), "opened sqlite connection");
    Ok(conn)
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn acquire(&self, connection_id: &str) -> Result<PooledConnection> {
        let pool = self
            .pools
            .get(connection_id)
            .ok_or_else(|| StoreError::Config(format!("unknown connection '{}'", connection_id)))?;
        pool.acquire(&connection_id.to_string())
    }

    fn close(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
    }
}

/// Registers `ST_EnvelopeIntersects(geometry_wkb, bbox_wkb)`
///
/// True when the bounding boxes of both WKB blobs intersect. NULL geometries never
/// match. Geometries that fail to decode pass, so the row decoder reports them.
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_EnvelopeIntersects",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let bbox = match blob_envelope(ctx, 1) {
                Some(Ok(env)) => env,
                Some(Err(e)) => return Err(rusqlite::Error::UserFunctionError(Box::new(e))),
                None => return Ok(false),
            };
            Ok(match blob_envelope(ctx, 0) {
                Some(Ok(env)) => env.intersects(&bbox),
                Some(Err(_)) => true,
                None => false,
            })
        },
    )?;
    Ok(())
}

/// `None` for NULL/empty or non-blob arguments
fn blob_envelope(ctx: &Context<'_>, index: usize) -> Option<Result<Envelope>> {
    match ctx.get_raw(index) {
        ValueRef::Blob(bytes) => match decode_wkb(bytes) {
            Ok(geometry) => geometry.envelope().map(Ok),
            Err(e) => Some(Err(e)),
        },
        _ => None,
    }
}
