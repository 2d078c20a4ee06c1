// src/fetch/relational.rs

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as _, Row, TypeInfo};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

use super::Retrieve;
use crate::cache::{TtlCache, ONE_HOUR};
use crate::dataset::{Column, ColumnKind, Dataset, Value};
use crate::error::LoadError;

pub const DEFAULT_TABLE: &str = "gestiones_interg";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table name pattern should compile")
});

/// Connection settings as they arrive from configuration; any of them may be
/// missing until [`ConnectionSettings::resolve`] checks them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub table: Option<String>,
}

impl ConnectionSettings {
    /// Override settings from `PGUSER`, `PGPASSWORD`, `PGHOST`, `PGPORT`,
    /// `PGDATABASE` and `CEDULA_TABLE`.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    pub fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PGUSER") {
            self.user = Some(v);
        }
        if let Some(v) = var("PGPASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = var("PGHOST") {
            self.host = Some(v);
        }
        if let Some(v) = var("PGPORT") {
            match v.parse() {
                Ok(port) => self.port = Some(port),
                Err(_) => warn!(value = %v, "ignoring unparseable PGPORT"),
            }
        }
        if let Some(v) = var("PGDATABASE") {
            self.database = Some(v);
        }
        if let Some(v) = var("CEDULA_TABLE") {
            self.table = Some(v);
        }
    }

    pub fn resolve(&self) -> Result<ResolvedSettings, LoadError> {
        fn required(v: &Option<String>, name: &'static str) -> Result<String, LoadError> {
            v.clone()
                .filter(|s| !s.is_empty())
                .ok_or(LoadError::MissingSetting(name))
        }

        let table = self
            .table
            .clone()
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        if !TABLE_NAME.is_match(&table) {
            return Err(LoadError::InvalidTableName(table));
        }

        Ok(ResolvedSettings {
            user: required(&self.user, "user")?,
            password: required(&self.password, "password")?,
            host: self
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            database: required(&self.database, "database")?,
            table,
        })
    }
}

/// Fully specified settings with defaults applied.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub table: String,
}

impl ResolvedSettings {
    /// Memo key for the connection; the password is deliberately left out.
    pub fn connection_key(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl std::fmt::Debug for ResolvedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSettings")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

/// Opens connections and reads whole tables from a relational database.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Send + Sync + 'static;

    async fn connect(&self, settings: &ResolvedSettings) -> Result<Self::Conn, LoadError>;

    async fn fetch_table(&self, conn: &Self::Conn, table: &str) -> Result<Dataset, LoadError>;
}

/// `SELECT * FROM <table>` with a memoized, separately expiring connection.
pub struct RelationalSource<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    connections: Arc<TtlCache<String, C::Conn>>,
}

impl<C: Connector> RelationalSource<C> {
    pub fn new(
        connector: C,
        settings: ConnectionSettings,
        connections: Arc<TtlCache<String, C::Conn>>,
    ) -> Self {
        Self {
            connector,
            settings,
            connections,
        }
    }

    /// A connection memo with the standard one-hour window.
    pub fn connection_cache() -> Arc<TtlCache<String, C::Conn>> {
        Arc::new(TtlCache::new("connections", ONE_HOUR))
    }
}

#[async_trait]
impl<C: Connector> Retrieve for RelationalSource<C> {
    fn cache_key(&self) -> String {
        let s = &self.settings;
        format!(
            "postgres:{}@{}:{}/{}/{}",
            s.user.as_deref().unwrap_or(""),
            s.host.as_deref().unwrap_or(DEFAULT_HOST),
            s.port.unwrap_or(DEFAULT_PORT),
            s.database.as_deref().unwrap_or(""),
            s.table.as_deref().unwrap_or(DEFAULT_TABLE),
        )
    }

    fn default_ttl(&self) -> Option<Duration> {
        Some(ONE_HOUR)
    }

    #[instrument(level = "info", skip(self))]
    async fn retrieve(&self) -> Result<Dataset, LoadError> {
        let settings = self.settings.resolve()?;
        let key = settings.connection_key();
        let conn = self
            .connections
            .get_or_try_insert_with(key.clone(), || self.connector.connect(&settings))
            .await?;

        match self.connector.fetch_table(&conn, &settings.table).await {
            Ok(dataset) => Ok(dataset),
            Err(e @ LoadError::Database(_)) => {
                // a broken connection should not survive until its TTL
                self.connections.invalidate(&key).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Postgres through an sqlx pool.
pub struct PgConnector;

/// Quote each dot-separated part as an identifier.
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn kind_for_type(type_name: &str) -> ColumnKind {
    match type_name.to_ascii_uppercase().as_str() {
        "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "BIGINT" => ColumnKind::Integer,
        "FLOAT4" | "FLOAT8" | "NUMERIC" | "REAL" | "DOUBLE PRECISION" => ColumnKind::Float,
        _ => ColumnKind::Text,
    }
}

fn decode(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(|v| Value::Int(v.into())),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(idx)?
            .and_then(|v| v.to_f64())
            .map(Value::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx)?.map(Value::Text)
        }
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)?
            .map(|v| Value::Text(v.to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|v| Value::Text(v.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|v| Value::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|v| Value::Text(v.to_rfc3339())),
        other => {
            debug!(column = idx, pg_type = other, "unsupported column type, reading as null");
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

impl PgConnector {
    async fn describe_columns(pool: &PgPool, table: &str) -> Result<Vec<Column>, LoadError> {
        let (schema, name) = match table.split_once('.') {
            Some((s, n)) => (Some(s), n),
            None => (None, table),
        };
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(name)
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, ty)| Column::new(name, kind_for_type(&ty)))
            .collect())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgPool;

    async fn connect(&self, s: &ResolvedSettings) -> Result<PgPool, LoadError> {
        let options = PgConnectOptions::new()
            .host(&s.host)
            .port(s.port)
            .username(&s.user)
            .password(&s.password)
            .database(&s.database);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        info!(host = %s.host, port = s.port, database = %s.database, "connected");
        Ok(pool)
    }

    async fn fetch_table(&self, pool: &PgPool, table: &str) -> Result<Dataset, LoadError> {
        let quoted = quote_table(table);
        let (exists,): (Option<String>,) = sqlx::query_as("SELECT to_regclass($1)::text")
            .bind(&quoted)
            .fetch_one(pool)
            .await?;
        if exists.is_none() {
            return Err(LoadError::TableNotFound(table.to_string()));
        }

        let rows = sqlx::query(&format!("SELECT * FROM {}", quoted))
            .fetch_all(pool)
            .await?;

        let Some(first) = rows.first() else {
            let columns = Self::describe_columns(pool, table).await?;
            info!(table, columns = columns.len(), "table is empty");
            return Dataset::new(columns, Vec::new());
        };

        let type_names: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.type_info().name().to_string())
            .collect();
        let columns: Vec<Column> = first
            .columns()
            .iter()
            .zip(&type_names)
            .map(|(c, ty)| Column::new(c.name(), kind_for_type(ty)))
            .collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = type_names
                .iter()
                .enumerate()
                .map(|(i, ty)| decode(row, i, ty))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(values);
        }
        info!(table, rows = out.len(), "queried");

        Dataset::new(columns, out)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts connects and table reads; serves a fixed two-row table.
    #[derive(Default, Clone)]
    pub struct FakeConnector {
        pub connects: Arc<AtomicUsize>,
        pub fetches: Arc<AtomicUsize>,
        pub fail_fetch: bool,
    }

    impl FakeConnector {
        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Conn = usize;

        async fn connect(&self, _settings: &ResolvedSettings) -> Result<usize, LoadError> {
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }

        async fn fetch_table(&self, _conn: &usize, table: &str) -> Result<Dataset, LoadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(LoadError::Database(sqlx::Error::PoolClosed));
            }
            if table != DEFAULT_TABLE {
                return Err(LoadError::TableNotFound(table.to_string()));
            }
            Ok(Dataset::new(
                vec![
                    Column::new("CEDULA", ColumnKind::Integer),
                    Column::new("NAME", ColumnKind::Text),
                ],
                vec![
                    vec![Value::Int(100), Value::Text("Ana".into())],
                    vec![Value::Int(200), Value::Text("Leo".into())],
                ],
            )
            .unwrap())
        }
    }

    pub fn settings() -> ConnectionSettings {
        ConnectionSettings {
            user: Some("app".into()),
            password: Some("secret".into()),
            database: Some("intergestion".into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{settings, FakeConnector};
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_resolve_applies_defaults() {
        let resolved = settings().resolve().unwrap();
        assert_eq!(resolved.host, DEFAULT_HOST);
        assert_eq!(resolved.port, DEFAULT_PORT);
        assert_eq!(resolved.table, DEFAULT_TABLE);
        assert_eq!(resolved.connection_key(), "app@localhost:5432/intergestion");
        assert!(!format!("{:?}", resolved).contains("secret"));
    }

    #[test]
    fn test_resolve_reports_missing_credentials() {
        let mut s = settings();
        s.password = None;
        assert!(matches!(
            s.resolve(),
            Err(LoadError::MissingSetting("password"))
        ));

        let mut s = settings();
        s.database = Some(String::new());
        assert!(matches!(
            s.resolve(),
            Err(LoadError::MissingSetting("database"))
        ));
    }

    #[test]
    fn test_resolve_rejects_odd_table_names() {
        let mut s = settings();
        s.table = Some("gestiones; DROP TABLE x".into());
        assert!(matches!(s.resolve(), Err(LoadError::InvalidTableName(_))));

        s.table = Some("public.gestiones_interg".into());
        assert_eq!(s.resolve().unwrap().table, "public.gestiones_interg");
    }

    #[test]
    fn test_env_vars_override() {
        let vars: HashMap<&str, &str> = [
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("CEDULA_TABLE", "otra_tabla"),
        ]
        .into_iter()
        .collect();
        let mut s = settings();
        s.apply_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(s.host.as_deref(), Some("db.internal"));
        assert_eq!(s.port, Some(6543));
        assert_eq!(s.table.as_deref(), Some("otra_tabla"));
        assert_eq!(s.user.as_deref(), Some("app"));
    }

    #[test]
    fn test_quote_and_kinds() {
        assert_eq!(quote_table("public.gestiones"), "\"public\".\"gestiones\"");
        assert_eq!(kind_for_type("INT8"), ColumnKind::Integer);
        assert_eq!(kind_for_type("double precision"), ColumnKind::Float);
        assert_eq!(kind_for_type("character varying"), ColumnKind::Text);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_memo_expires_after_an_hour() {
        let fake = FakeConnector::default();
        let source = RelationalSource::new(
            fake.clone(),
            settings(),
            RelationalSource::<FakeConnector>::connection_cache(),
        );

        source.retrieve().await.unwrap();
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        source.retrieve().await.unwrap();
        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.fetches(), 2);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let ds = source.retrieve().await.unwrap();
        assert_eq!(fake.connects(), 2);
        assert_eq!(fake.fetches(), 3);
        assert_eq!(ds.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_failed_query_drops_connection() {
        let fake = FakeConnector {
            fail_fetch: true,
            ..Default::default()
        };
        let source = RelationalSource::new(
            fake.clone(),
            settings(),
            RelationalSource::<FakeConnector>::connection_cache(),
        );

        assert!(source.retrieve().await.is_err());
        assert!(source.retrieve().await.is_err());
        assert_eq!(fake.connects(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_and_credentials() {
        let fake = FakeConnector::default();
        let mut s = settings();
        s.table = Some("no_such_table".into());
        let source = RelationalSource::new(
            fake.clone(),
            s,
            RelationalSource::<FakeConnector>::connection_cache(),
        );
        assert!(matches!(
            source.retrieve().await,
            Err(LoadError::TableNotFound(_))
        ));

        let mut s = settings();
        s.user = None;
        let source = RelationalSource::new(
            fake.clone(),
            s,
            RelationalSource::<FakeConnector>::connection_cache(),
        );
        assert!(matches!(
            source.retrieve().await,
            Err(LoadError::MissingSetting("user"))
        ));
        assert_eq!(fake.connects(), 1);
    }

    /// Needs a scratch database: `DATABASE_URL=postgres://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_pg_connector_against_live_database() {
        dotenv::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        let table = "cedula_lookup_live_test";

        for stmt in [
            format!("DROP TABLE IF EXISTS {}", table),
            format!(
                "CREATE TABLE {} (cedula BIGINT, nombre TEXT, saldo NUMERIC, alta DATE)",
                table
            ),
            format!(
                "INSERT INTO {} VALUES (100, 'Ana', 1520.75, '2024-03-01'), (200, NULL, NULL, NULL)",
                table
            ),
        ] {
            sqlx::query(&stmt).execute(&pool).await.unwrap();
        }

        let ds = PgConnector.fetch_table(&pool, table).await.unwrap();
        assert_eq!(ds.column_names(), vec!["cedula", "nombre", "saldo", "alta"]);
        let kinds: Vec<_> = ds.columns().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Integer,
                ColumnKind::Text,
                ColumnKind::Float,
                ColumnKind::Text
            ]
        );
        assert_eq!(
            ds.row(0).unwrap(),
            &[
                Value::Int(100),
                Value::Text("Ana".into()),
                Value::Float(1520.75),
                Value::Text("2024-03-01".into()),
            ][..]
        );
        assert_eq!(ds.row(1).unwrap()[1], Value::Null);

        // an empty table still reports its columns
        sqlx::query(&format!("TRUNCATE {}", table))
            .execute(&pool)
            .await
            .unwrap();
        let ds = PgConnector.fetch_table(&pool, table).await.unwrap();
        assert_eq!(ds.num_rows(), 0);
        assert_eq!(ds.column_names(), vec!["cedula", "nombre", "saldo", "alta"]);

        assert!(matches!(
            PgConnector.fetch_table(&pool, "no_such_table_here").await,
            Err(LoadError::TableNotFound(_))
        ));

        sqlx::query(&format!("DROP TABLE {}", table))
            .execute(&pool)
            .await
            .unwrap();
    }
}
