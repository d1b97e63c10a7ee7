//! MySQL/TiDB endpoint built on sqlx. Provides the shared connection pool,
//! per-request sessions with role switching, and row decoding into the
//! engine's internal [`Value`] representation.

use crate::engine::database::{ExecOutcome, QueryFacility, Row};
use crate::engine::value::Value;
use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use lazy_static::lazy_static;
use log::{trace, warn};
use regex::Regex;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use std::convert::TryFrom;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    // SET ROLE cannot take bound parameters, so role names are restricted to
    // plain identifiers before interpolation.
    static ref ROLE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]{1,64}$").unwrap();
}

/// Connection settings resolved by the configuration layer.
#[derive(Clone, Debug)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls_mode: String,
    pub max_open: u32,
    pub connection_timeout: Duration,
}

/// Session establishment options for one request.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    role: Option<String>,
    database: Option<String>,
    transactional: bool,
}

impl SessionOptions {
    pub fn new() -> SessionOptions {
        SessionOptions::default()
    }

    pub fn with_role(mut self, role: String, database: String) -> SessionOptions {
        self.role = Some(role);
        self.database = Some(database);
        self
    }

    pub fn with_transaction(mut self) -> SessionOptions {
        self.transactional = true;
        self
    }

    pub fn role(&self) -> Option<&String> {
        self.role.as_ref()
    }

    fn needs_connection(&self) -> bool {
        self.role.is_some() || self.transactional
    }
}

/// The MySQL endpoint: owns the shared pool and hands out per-request
/// sessions.
#[derive(Clone, Debug)]
pub struct MySqlEndpoint {
    pool: MySqlPool,
    database: String,
}

impl MySqlEndpoint {
    /// Builds the pool and verifies connectivity within the configured
    /// timeout.
    pub async fn connect(settings: &ConnectSettings) -> Result<MySqlEndpoint, Error> {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)
            .ssl_mode(ssl_mode(&settings.tls_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_open)
            .acquire_timeout(settings.connection_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::PoolNotBuilt { source: e })?;

        Ok(MySqlEndpoint {
            pool,
            database: settings.database.clone(),
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Bounded connectivity check used by the health endpoint.
    pub async fn ping(&self, timeout: Duration) -> Result<(), Error> {
        tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| Error::PoolNotBuilt {
                source: sqlx::Error::PoolTimedOut,
            })?
            .map_err(Error::from)?;
        Ok(())
    }

    /// Establishes the session for one request. Plain queries multiplex on
    /// the pool; role-aware or transactional requests check out a single
    /// connection for the whole request.
    pub async fn session(&self, opts: SessionOptions) -> Result<MySqlSession, Error> {
        if !opts.needs_connection() {
            return Ok(MySqlSession::pool(self.pool.clone()));
        }

        let mut conn = self.pool.acquire().await?;
        let role_aware = opts.role.is_some();
        if let Some(role) = &opts.role {
            if !ROLE_NAME.is_match(role) {
                return Err(Error::RoleNameInvalid { role: role.clone() });
            }
            sqlx::query("SET ROLE NONE").execute(&mut *conn).await?;
            sqlx::query(&format!("SET ROLE {}", quote_ident(role)))
                .execute(&mut *conn)
                .await?;
            let database = opts.database.as_deref().unwrap_or(&self.database);
            sqlx::query(&format!("USE {}", quote_ident(database)))
                .execute(&mut *conn)
                .await?;
        }
        Ok(MySqlSession::connection(conn, role_aware))
    }
}

fn ssl_mode(mode: &str) -> MySqlSslMode {
    match mode {
        "off" => MySqlSslMode::Disabled,
        "preferred" => MySqlSslMode::Preferred,
        "skip-verify" => MySqlSslMode::Required,
        "verify-ca" => MySqlSslMode::VerifyCa,
        "verify-full" => MySqlSslMode::VerifyIdentity,
        other => {
            // validation rejects unknown modes before this point
            warn!("unknown tls mode {}, using preferred", other);
            MySqlSslMode::Preferred
        }
    }
}

/// Quotes an identifier with backticks for interpolation into statements that
/// cannot take bound parameters.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

struct ConnState {
    conn: Option<PoolConnection<MySql>>,
    role_aware: bool,
    tx_open: bool,
    finished: bool,
}

enum SessionInner {
    Pool(MySqlPool),
    Conn(Mutex<ConnState>),
}

/// One request's SQL session. Pool-backed for plain queries; bound to a
/// single connection when the request switches roles or mutates.
pub struct MySqlSession {
    inner: SessionInner,
}

impl MySqlSession {
    fn pool(pool: MySqlPool) -> MySqlSession {
        MySqlSession {
            inner: SessionInner::Pool(pool),
        }
    }

    fn connection(conn: PoolConnection<MySql>, role_aware: bool) -> MySqlSession {
        MySqlSession {
            inner: SessionInner::Conn(Mutex::new(ConnState {
                conn: Some(conn),
                role_aware,
                tx_open: false,
                finished: false,
            })),
        }
    }
}

#[async_trait]
impl QueryFacility for MySqlSession {
    async fn fetch_rows(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>, Error> {
        trace!("MySqlSession::fetch_rows -- sql: {}", sql);
        let rows = match &self.inner {
            SessionInner::Pool(pool) => bind_args(sqlx::query(sql), args)?.fetch_all(pool).await?,
            SessionInner::Conn(state) => {
                let mut guard = state.lock().await;
                if guard.finished {
                    return Err(Error::TransactionFinished);
                }
                let conn = guard.conn.as_mut().ok_or(Error::TransactionFinished)?;
                bind_args(sqlx::query(sql), args)?
                    .fetch_all(&mut **conn)
                    .await?
            }
        };
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<ExecOutcome, Error> {
        trace!("MySqlSession::execute -- sql: {}", sql);
        let done = match &self.inner {
            SessionInner::Pool(pool) => bind_args(sqlx::query(sql), args)?.execute(pool).await?,
            SessionInner::Conn(state) => {
                let mut guard = state.lock().await;
                if guard.finished {
                    return Err(Error::TransactionFinished);
                }
                let conn = guard.conn.as_mut().ok_or(Error::TransactionFinished)?;
                bind_args(sqlx::query(sql), args)?
                    .execute(&mut **conn)
                    .await?
            }
        };
        let last = done.last_insert_id();
        Ok(ExecOutcome::new(
            done.rows_affected(),
            if last == 0 { None } else { Some(last) },
        ))
    }

    async fn begin(&self) -> Result<(), Error> {
        if let SessionInner::Conn(state) = &self.inner {
            let mut guard = state.lock().await;
            if guard.finished {
                return Err(Error::TransactionFinished);
            }
            if !guard.tx_open {
                let conn = guard.conn.as_mut().ok_or(Error::TransactionFinished)?;
                sqlx::query("BEGIN").execute(&mut **conn).await?;
                guard.tx_open = true;
            }
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        if let SessionInner::Conn(state) = &self.inner {
            let mut guard = state.lock().await;
            if guard.finished {
                return Err(Error::TransactionFinished);
            }
            if guard.tx_open {
                let conn = guard.conn.as_mut().ok_or(Error::TransactionFinished)?;
                sqlx::query("COMMIT").execute(&mut **conn).await?;
                guard.tx_open = false;
            }
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        if let SessionInner::Conn(state) = &self.inner {
            let mut guard = state.lock().await;
            if guard.finished {
                return Err(Error::TransactionFinished);
            }
            if guard.tx_open {
                let conn = guard.conn.as_mut().ok_or(Error::TransactionFinished)?;
                sqlx::query("ROLLBACK").execute(&mut **conn).await?;
                guard.tx_open = false;
            }
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), Error> {
        if let SessionInner::Conn(state) = &self.inner {
            let mut guard = state.lock().await;
            if guard.finished {
                return Ok(());
            }
            guard.finished = true;
            if let Some(mut conn) = guard.conn.take() {
                if guard.tx_open {
                    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!("rollback on release failed: {}", e);
                    }
                }
                if guard.role_aware {
                    if let Err(e) = sqlx::query("SET ROLE DEFAULT").execute(&mut *conn).await {
                        warn!("role reset on release failed: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

fn bind_args(
    query: sqlx::query::Query<'_, MySql, MySqlArguments>,
    args: Vec<Value>,
) -> Result<sqlx::query::Query<'_, MySql, MySqlArguments>, Error> {
    let mut q = query;
    for arg in args {
        q = match arg {
            Value::Null => q.bind(None::<String>),
            Value::Bool(b) => q.bind(b),
            Value::Int64(i) => q.bind(i),
            Value::UInt64(u) => q.bind(u),
            Value::Float64(f) => q.bind(f),
            Value::String(s) => q.bind(s),
            Value::Bytes(b) => q.bind(b),
            composite @ (Value::Array(_) | Value::Map(_)) => {
                q.bind(serde_json::Value::try_from(composite)?)
            }
        };
    }
    Ok(q)
}

/// Formats a naive timestamp the way the gateway serves it: RFC3339 in UTC,
/// with fractional seconds only when present.
fn format_datetime(ndt: NaiveDateTime) -> String {
    if ndt.and_utc().timestamp_subsec_micros() == 0 {
        ndt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        ndt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }
}

fn format_time(t: NaiveTime) -> String {
    if t.nanosecond() == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        t.format("%H:%M:%S%.6f").to_string()
    }
}

/// Decodes one driver row into the internal representation, preserving the
/// full 64-bit integer range and never routing values through f64.
pub(crate) fn decode_row(row: &MySqlRow) -> Result<Row, Error> {
    let mut out = Row::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let type_name = col.type_info().name().to_uppercase();
        let value = match type_name.as_str() {
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(i)
                .map_err(Error::from)?
                .map(Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(i)
                .map_err(Error::from)?
                .map(Value::Int64),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(i)
                .map_err(Error::from)?
                .map(Value::UInt64),
            "FLOAT" | "DOUBLE" => row
                .try_get::<Option<f64>, _>(i)
                .map_err(Error::from)?
                .map(Value::Float64),
            "DECIMAL" => row
                .try_get::<Option<rust_decimal::Decimal>, _>(i)
                .map_err(Error::from)?
                .map(|d| Value::String(d.to_string())),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(i)
                .map_err(Error::from)?
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            "DATETIME" => row
                .try_get::<Option<NaiveDateTime>, _>(i)
                .map_err(Error::from)?
                .map(|dt| Value::String(format_datetime(dt))),
            "TIMESTAMP" => row
                .try_get::<Option<DateTime<Utc>>, _>(i)
                .map_err(Error::from)?
                .map(|dt| Value::String(format_datetime(dt.naive_utc()))),
            "TIME" => row
                .try_get::<Option<NaiveTime>, _>(i)
                .map_err(Error::from)?
                .map(|t| Value::String(format_time(t))),
            "YEAR" => row
                .try_get::<Option<u16>, _>(i)
                .map_err(Error::from)?
                .map(|y| Value::String(format!("{:04}", y))),
            "JSON" => match row
                .try_get::<Option<serde_json::Value>, _>(i)
                .map_err(Error::from)?
            {
                Some(j) => Some(Value::try_from(j)?),
                None => None,
            },
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .map_err(Error::from)?
                .map(Value::Bytes),
            _ => row
                .try_get::<Option<String>, _>(i)
                .or_else(|_| {
                    row.try_get::<Option<Vec<u8>>, _>(i)
                        .map(|o| o.map(|b| String::from_utf8_lossy(&b).into_owned()))
                })
                .map_err(Error::from)?
                .map(Value::String),
        };
        out.insert(col.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{format_datetime, quote_ident, ssl_mode, ROLE_NAME};
    use chrono::NaiveDate;
    use sqlx::mysql::MySqlSslMode;

    /// Passes if identifier quoting escapes embedded backticks
    #[test]
    fn quoting() {
        assert_eq!("`app`", quote_ident("app"));
        assert_eq!("`we``ird`", quote_ident("we`ird"));
    }

    /// Passes if role names are restricted to plain identifiers
    #[test]
    fn role_name_check() {
        assert!(ROLE_NAME.is_match("reporting_ro"));
        assert!(!ROLE_NAME.is_match("evil`; DROP"));
        assert!(!ROLE_NAME.is_match(""));
    }

    /// Passes if tls mode strings map onto driver ssl modes
    #[test]
    fn tls_modes() {
        assert!(matches!(ssl_mode("off"), MySqlSslMode::Disabled));
        assert!(matches!(ssl_mode("skip-verify"), MySqlSslMode::Required));
        assert!(matches!(ssl_mode("verify-ca"), MySqlSslMode::VerifyCa));
        assert!(matches!(
            ssl_mode("verify-full"),
            MySqlSslMode::VerifyIdentity
        ));
    }

    /// Passes if timestamps serialize as RFC3339 with optional fractions
    #[test]
    fn datetime_format() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!("2024-01-15T10:30:00Z", format_datetime(d));

        let with_micros = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_micro_opt(10, 30, 0, 250)
            .unwrap();

        assert_eq!("2024-01-15T10:30:00.000250Z", format_datetime(with_micros));
    }
}
