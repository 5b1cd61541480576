//! DuckDB analytical store service
//!
//! Owns the single process-wide connection behind a mutex. Queries run on
//! the blocking pool under a statement timeout; dataset tables are created
//! by ingest and dropped by the registry's GC sweep.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use duckdb::types::{TimeUnit, Value as DuckValue};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value as Json;

use super::error::DataError;
use crate::core::constants::{DEFAULT_QUERY_TIMEOUT_SECS, DUCKDB_DB_FILENAME};
use crate::utils::time::{days_to_iso_date, micros_to_iso};

/// DuckDB store service
///
/// Uses a single shared connection protected by a mutex; DuckDB serializes
/// statement execution internally anyway, and dataset workloads are
/// read-mostly after ingest.
pub struct DuckdbService {
    conn: Mutex<Option<Connection>>,
    query_timeout: Duration,
}

impl Drop for DuckdbService {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("DuckDB connection close failed during drop: {}", e);
            }
        }
    }
}

impl DuckdbService {
    /// Open (or create) the store file under the given directory
    pub async fn init(duckdb_dir: &Path, query_timeout_secs: u64) -> Result<Self, DataError> {
        let db_path = duckdb_dir.join(DUCKDB_DB_FILENAME);
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "SET autoinstall_known_extensions = false;
                 SET autoload_known_extensions = false;
                 PRAGMA enable_checkpoint_on_shutdown;",
            )?;
            Ok::<_, duckdb::Error>(conn)
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))??;

        tracing::debug!(path = %duckdb_dir.join(DUCKDB_DB_FILENAME).display(), "DuckdbService initialized");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            query_timeout: Duration::from_secs(query_timeout_secs),
        })
    }

    /// In-memory store (tests and ephemeral runs)
    pub fn open_in_memory() -> Result<Self, DataError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        })
    }

    /// Get exclusive access to the connection.
    ///
    /// # Panics
    /// Panics if the connection has been closed via `close()`.
    pub fn conn(&self) -> parking_lot::MappedMutexGuard<'_, Connection> {
        MutexGuard::map(self.conn.lock(), |opt| {
            opt.as_mut()
                .expect("DuckDB connection already closed - do not call conn() after close()")
        })
    }

    /// Run a blocking closure against the connection with the statement timeout.
    ///
    /// The timeout is best-effort: the blocking task is abandoned, not
    /// interrupted, when it fires.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DataError> + Send + 'static,
    {
        let db = Arc::clone(self);
        let timeout = self.query_timeout;
        tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || f(&db.conn())))
            .await
            .map_err(|_| {
                tracing::warn!(timeout_secs = timeout.as_secs(), "DuckDB query timed out");
                DataError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }
            })?
            .map_err(|e| DataError::Io(std::io::Error::other(format!("query task failed: {e}"))))?
    }

    /// Flush WAL to the main database file; no-op when already closed.
    pub async fn checkpoint(self: &Arc<Self>) -> Result<(), DataError> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn_guard = db.conn.lock();
            if let Some(ref conn) = *conn_guard {
                conn.execute("CHECKPOINT", [])?;
                tracing::debug!("DuckDB checkpoint completed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))?
    }

    /// Close the connection gracefully with a final checkpoint
    pub async fn close(self: Arc<Self>) -> Result<(), DataError> {
        tokio::task::spawn_blocking(move || {
            let mut conn_guard = self.conn.lock();
            if let Some(conn) = conn_guard.take() {
                if let Err(e) = conn.execute("CHECKPOINT", []) {
                    tracing::warn!("CHECKPOINT failed during close: {}", e);
                }
                conn.close().map_err(|(_, e)| DataError::Database(e))?;
                tracing::debug!("DuckDB connection closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))?
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }
}

/// Fetch all rows of a prepared query, decoding each cell to JSON.
///
/// The caller supplies the projection width because DuckDB only learns a
/// statement's schema after execution; compiled queries already know their
/// column lists.
pub fn fetch_rows(
    conn: &Connection,
    sql: &str,
    params: &[&dyn duckdb::ToSql],
    column_count: usize,
) -> Result<Vec<Vec<Json>>, DataError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value: DuckValue = row.get(i)?;
            record.push(value_to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

/// Decode a DuckDB value into JSON for wire transport.
///
/// Timestamps become RFC 3339 strings, dates become ISO dates; numbers that
/// do not fit JSON (NaN, infinities, oversized HUGEINT) become null or
/// strings rather than panicking.
pub fn value_to_json(value: DuckValue) -> Json {
    match value {
        DuckValue::Null => Json::Null,
        DuckValue::Boolean(b) => Json::Bool(b),
        DuckValue::TinyInt(v) => Json::from(v),
        DuckValue::SmallInt(v) => Json::from(v),
        DuckValue::Int(v) => Json::from(v),
        DuckValue::BigInt(v) => Json::from(v),
        DuckValue::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => Json::from(v),
            Err(_) => Json::String(v.to_string()),
        },
        DuckValue::UTinyInt(v) => Json::from(v),
        DuckValue::USmallInt(v) => Json::from(v),
        DuckValue::UInt(v) => Json::from(v),
        DuckValue::UBigInt(v) => Json::from(v),
        DuckValue::Float(v) => serde_json::Number::from_f64(v as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        DuckValue::Double(v) => serde_json::Number::from_f64(v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String(d.to_string())),
        DuckValue::Timestamp(unit, v) => Json::String(micros_to_iso(to_micros(unit, v))),
        DuckValue::Date32(days) => Json::String(days_to_iso_date(days)),
        DuckValue::Time64(unit, v) => Json::String(micros_to_iso(to_micros(unit, v))),
        DuckValue::Text(s) => Json::String(s),
        DuckValue::Blob(b) => Json::String(crate::utils::crypto::encode_hex(&b)),
        DuckValue::Enum(s) => Json::String(s),
        DuckValue::List(items) => Json::Array(items.into_iter().map(value_to_json).collect()),
        other => {
            tracing::debug!(value = ?other, "Unmapped DuckDB value type, returning null");
            Json::Null
        }
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_executes_against_connection() {
        let db = Arc::new(DuckdbService::open_in_memory().unwrap());
        let n: i64 = db
            .run(|conn| Ok(conn.query_row("SELECT 40 + 2", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 42);
    }

    #[tokio::test]
    async fn close_is_graceful_and_checkpoint_noop_after() {
        let db = Arc::new(DuckdbService::open_in_memory().unwrap());
        assert!(db.is_open());
        let for_checkpoint = Arc::clone(&db);
        db.close().await.unwrap();
        assert!(for_checkpoint.checkpoint().await.is_ok());
    }

    #[test]
    fn decodes_scalar_values() {
        assert_eq!(value_to_json(DuckValue::BigInt(7)), Json::from(7));
        assert_eq!(value_to_json(DuckValue::Boolean(true)), Json::Bool(true));
        assert_eq!(value_to_json(DuckValue::Null), Json::Null);
        assert_eq!(
            value_to_json(DuckValue::Text("hi".into())),
            Json::String("hi".into())
        );
    }

    #[test]
    fn decodes_nan_as_null() {
        assert_eq!(value_to_json(DuckValue::Double(f64::NAN)), Json::Null);
    }

    #[test]
    fn decodes_timestamp_to_rfc3339() {
        let v = value_to_json(DuckValue::Timestamp(TimeUnit::Microsecond, 0));
        assert_eq!(v, Json::String("1970-01-01T00:00:00.000000Z".into()));
    }

    #[tokio::test]
    async fn fetch_rows_decodes_projection() {
        let db = Arc::new(DuckdbService::open_in_memory().unwrap());
        let rows = db
            .run(|conn| fetch_rows(conn, "SELECT 1, 'a' UNION ALL SELECT 2, 'b' ORDER BY 1", &[], 2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Json::from(1), Json::String("a".into())]);
    }
}
