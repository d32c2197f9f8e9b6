//! MySQL adapter backed by a single-connection sqlx pool.
//!
//! Each session owns its own pool capped at one connection, so statements
//! issued through one session always land on the same server connection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, info, warn};

use backplane_mcp_protocol::{
    ConfigSchema, JsonSchema, OptionSpec, ProviderSettings, ProviderType, ToolSchema,
};
use backplane_mcp_session::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};

use crate::common::{opt_bool, opt_str, opt_u64, req_str, security, security_option, str_list};
use crate::guard;

pub const MAX_ROWS: &str = "max_rows";
const DEFAULT_MAX_ROWS: i64 = 1000;

/// Where a MySQL session connects
#[derive(Debug, Clone, PartialEq)]
pub struct MySqlTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl MySqlTarget {
    pub fn from_params(params: &ConnectionParams) -> Result<Self, ProviderError> {
        Ok(Self {
            host: params.str_or("host", "localhost"),
            port: params.port_or("port", 3306)?,
            user: params.str_or("user", "root"),
            password: params.str("password").map(str::to_string),
            database: params.str("database").map(str::to_string),
        })
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        options
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlProvider;

impl MySqlProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for MySqlProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Mysql
    }

    fn backend_name(&self) -> &'static str {
        "mysql-sqlx"
    }

    fn describe_config(&self) -> ConfigSchema {
        security::ALL.iter().fold(
            ConfigSchema::common().with_option(OptionSpec::integer(
                MAX_ROWS,
                "Maximum rows returned by one query",
                1,
                10_000,
                DEFAULT_MAX_ROWS,
            )),
            |schema, name| schema.with_option(security_option(name)),
        )
    }

    fn connect_schema(&self) -> ToolSchema {
        ToolSchema::object()
            .with_property(
                "host",
                JsonSchema::string().with_description("Server host (default localhost)"),
            )
            .with_property(
                "port",
                JsonSchema::integer()
                    .with_range(1, 65535)
                    .with_description("Server port (default 3306)"),
            )
            .with_property(
                "user",
                JsonSchema::string().with_description("User name (default root)"),
            )
            .with_property("password", JsonSchema::string())
            .with_property(
                "database",
                JsonSchema::string().with_description("Default schema for the session"),
            )
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::new(
                "exec",
                "Execute SQL. Queries return rows, other statements return the affected row count",
            )
            .required_param("sql", JsonSchema::string())
            .param(
                "limit",
                JsonSchema::integer()
                    .with_range(1, 10_000)
                    .with_description("Row cap, further bounded by max_rows"),
            )
            .mutating(),
            OperationSpec::new("show_tables", "List tables in a database")
                .param(
                    "database",
                    JsonSchema::string().with_description("Defaults to the session database"),
                ),
            OperationSpec::new("describe_table", "Show the columns of one table")
                .required_param("table", JsonSchema::string()),
            OperationSpec::new("describe_tables", "Show columns (and indexes) of several tables")
                .required_param(
                    "tables",
                    JsonSchema::string().with_description("Comma separated table names"),
                )
                .param("include_indexes", JsonSchema::boolean()),
            OperationSpec::new("list_databases", "List databases visible to the user"),
        ]
    }

    fn default_session_name(&self, params: &ConnectionParams) -> Option<String> {
        MySqlTarget::from_params(params)
            .ok()
            .map(|t| format!("{}_{}", t.host, t.port))
    }

    async fn connect(
        &self,
        params: &ConnectionParams,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn Connection>, ProviderError> {
        let target = MySqlTarget::from_params(params)?;
        debug!("Connecting to MySQL at {}:{}", target.host, target.port);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(settings.connect_timeout())
            .test_before_acquire(true)
            .connect_with(target.connect_options())
            .await
            .map_err(|e| ProviderError::Connect(format!("MySQL connect failed: {}", e)))?;

        info!(
            "Connected to MySQL at {}:{} as {}",
            target.host, target.port, target.user
        );
        Ok(Box::new(MySqlConnection {
            pool,
            settings: settings.clone(),
        }))
    }
}

struct MySqlConnection {
    pool: MySqlPool,
    settings: ProviderSettings,
}

impl MySqlConnection {
    fn max_rows(&self) -> usize {
        self.settings
            .integer(MAX_ROWS)
            .unwrap_or(DEFAULT_MAX_ROWS)
            .max(1) as usize
    }

    async fn exec(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let sql = req_str(args, "sql")?;
        guard::check_sql(sql, &self.settings)?;

        let statements = guard::split_statements(sql);
        if statements.is_empty() {
            return Err(ProviderError::invalid_argument("sql", "no statement to execute"));
        }

        if statements.iter().all(|s| guard::classify(s).is_query()) {
            let limit = row_limit(opt_u64(args, "limit"), self.max_rows());
            let mut stream = sqlx::raw_sql(sql).fetch(&self.pool);
            let mut rows = Vec::new();
            let mut columns = Vec::new();
            let mut truncated = false;
            while let Some(row) = stream.try_next().await.map_err(map_sqlx_error)? {
                if rows.len() == limit {
                    truncated = true;
                    break;
                }
                if columns.is_empty() {
                    columns = column_names(&row);
                }
                rows.push(row_to_json(&row));
            }
            Ok(json!({
                "columns": columns,
                "row_count": rows.len(),
                "rows": rows,
                "truncated": truncated,
            }))
        } else {
            let result = sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(json!({
                "rows_affected": result.rows_affected(),
                "last_insert_id": result.last_insert_id(),
            }))
        }
    }

    async fn show_tables(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME AS name, TABLE_TYPE AS type, TABLE_ROWS AS approx_rows \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) ORDER BY TABLE_NAME",
        )
        .bind(opt_str(args, "database"))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let tables: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(json!({
            "database": opt_str(args, "database"),
            "count": tables.len(),
            "tables": tables,
        }))
    }

    async fn describe(&self, table: &str, include_indexes: bool) -> Result<Value, ProviderError> {
        let (schema, name) = split_qualified(table);
        let columns = sqlx::query(
            "SELECT COLUMN_NAME AS name, COLUMN_TYPE AS type, IS_NULLABLE AS nullable, \
             COLUMN_KEY AS `key`, COLUMN_DEFAULT AS `default`, EXTRA AS extra \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if columns.is_empty() {
            return Err(ProviderError::Exec(format!("table '{}' not found", table)));
        }

        let mut description = json!({
            "table": table,
            "columns": columns.iter().map(row_to_json).collect::<Vec<_>>(),
        });

        if include_indexes {
            let indexes = sqlx::query(
                "SELECT INDEX_NAME AS name, COLUMN_NAME AS `column`, NON_UNIQUE AS non_unique, \
                 SEQ_IN_INDEX AS seq \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            )
            .bind(schema)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            description["indexes"] = Value::Array(indexes.iter().map(row_to_json).collect());
        }

        Ok(description)
    }

    async fn describe_tables(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let tables = str_list(args, "tables");
        if tables.is_empty() {
            return Err(ProviderError::invalid_argument(
                "tables",
                "must name at least one table",
            ));
        }
        let include_indexes = opt_bool(args, "include_indexes", false);

        let mut described = Vec::with_capacity(tables.len());
        for table in &tables {
            match self.describe(table, include_indexes).await {
                Ok(d) => described.push(d),
                Err(ProviderError::Exec(message)) => {
                    described.push(json!({"table": table, "error": message}))
                }
                Err(other) => return Err(other),
            }
        }
        Ok(json!({ "tables": described }))
    }

    async fn list_databases(&self) -> Result<Value, ProviderError> {
        let rows = sqlx::query("SELECT SCHEMA_NAME AS name FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let databases: Vec<Value> = rows
            .iter()
            .map(|row| row_to_json(row).get("name").cloned().unwrap_or(Value::Null))
            .collect();
        Ok(json!({ "databases": databases }))
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn execute(
        &mut self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ProviderError> {
        match command {
            "exec" => self.exec(args).await,
            "show_tables" => self.show_tables(args).await,
            "describe_table" => {
                let table = req_str(args, "table")?;
                self.describe(table, true).await
            }
            "describe_tables" => self.describe_tables(args).await,
            "list_databases" => self.list_databases().await,
            other => Err(ProviderError::UnsupportedCommand(other.to_string())),
        }
    }

    async fn is_healthy(&mut self) -> bool {
        use sqlx::Connection as _;

        if self.pool.is_closed() {
            return false;
        }
        match self.pool.acquire().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(e) => {
                debug!("MySQL health check failed: {}", e);
                false
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
        Ok(())
    }
}

/// Rows to return for a query: the caller's limit bounded by `max_rows`.
fn row_limit(requested: Option<u64>, max_rows: usize) -> usize {
    requested
        .map(|n| (n.max(1) as usize).min(max_rows))
        .unwrap_or(max_rows)
}

/// `schema.table` or a bare table name.
fn split_qualified(table: &str) -> (Option<&str>, &str) {
    let table = table.trim().trim_matches('`');
    match table.split_once('.') {
        Some((schema, name)) => (
            Some(schema.trim_matches('`')),
            name.trim_matches('`'),
        ),
        None => (None, table),
    }
}

fn map_sqlx_error(err: sqlx::Error) -> ProviderError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            warn!("MySQL connection lost: {}", err);
            ProviderError::ConnectionLost(err.to_string())
        }
        sqlx::Error::Database(db) => ProviderError::Exec(db.message().to_string()),
        other => ProviderError::Exec(other.to_string()),
    }
}

fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// How a MySQL column type is rendered as JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Json,
    Date,
    Time,
    DateTime,
    Timestamp,
    Bytes,
    Text,
}

fn column_kind(type_name: &str) -> ColumnKind {
    let upper = type_name.to_ascii_uppercase();
    match upper.as_str() {
        "BOOLEAN" => ColumnKind::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => ColumnKind::Signed,
        "FLOAT" | "DOUBLE" => ColumnKind::Float,
        "JSON" => ColumnKind::Json,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "DATETIME" => ColumnKind::DateTime,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => ColumnKind::Bytes,
        u if u.ends_with("UNSIGNED") => ColumnKind::Unsigned,
        _ => ColumnKind::Text,
    }
}

fn row_to_json(row: &MySqlRow) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let kind = column_kind(column.type_info().name());
        object.insert(column.name().to_string(), cell_to_json(row, idx, kind));
    }
    Value::Object(object)
}

fn cell_to_json(row: &MySqlRow, idx: usize, kind: ColumnKind) -> Value {
    let typed = match kind {
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::from)),
        ColumnKind::Signed => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
        ColumnKind::Unsigned => row.try_get::<Option<u64>, _>(idx).map(|v| v.map(Value::from)),
        ColumnKind::Float => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from)),
        ColumnKind::Json => row.try_get::<Option<Value>, _>(idx),
        ColumnKind::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.to_string()))),
        ColumnKind::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_string()))),
        ColumnKind::DateTime => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()))),
        ColumnKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| v.map(|t| Value::String(t.to_rfc3339()))),
        ColumnKind::Bytes => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))),
        ColumnKind::Text => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::String)),
    };

    match typed {
        Ok(value) => value.unwrap_or(Value::Null),
        // DECIMAL, zero dates, negative TIME and friends arrive here
        Err(_) => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .or_else(|| {
                row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
            })
            .unwrap_or(Value::Null),
    }
}
