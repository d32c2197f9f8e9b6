//! Redis adapter.
//!
//! Commands are written the way they would be typed at `redis-cli`. Several
//! commands separated by newlines or `;` run as one pipeline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use backplane_mcp_protocol::{
    ConfigSchema, JsonSchema, OptionSpec, ProviderSettings, ProviderType, ToolSchema,
};
use backplane_mcp_session::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};

use crate::common::{opt_str, opt_u64, req_str, security, security_option};
use crate::guard;

pub const MAX_PIPELINE_COMMANDS: &str = "max_pipeline_commands";
const DEFAULT_MAX_PIPELINE: i64 = 100;
const SCAN_BATCH: u64 = 100;
const MAX_SCAN_KEYS: u64 = 10_000;

/// Where a Redis session connects
#[derive(Debug, Clone, PartialEq)]
pub struct RedisTarget {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u8,
}

impl RedisTarget {
    pub fn from_params(params: &ConnectionParams) -> Result<Self, ProviderError> {
        let database = match params.integer("database") {
            None => 0,
            Some(n @ 0..=15) => n as u8,
            Some(n) => {
                return Err(ProviderError::invalid_argument(
                    "database",
                    format!("{} is outside 0..=15", n),
                ));
            }
        };
        Ok(Self {
            host: params.str_or("host", "localhost"),
            port: params.port_or("port", 6379)?,
            username: params.str("username").map(str::to_string),
            password: params.str("password").map(str::to_string),
            database,
        })
    }

    /// `redis://[user][:password@]host:port/db` with credentials percent-encoded.
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (None, None) => String::new(),
            (Some(user), None) => format!("{}@", urlencoding::encode(user)),
            (user, Some(password)) => format!(
                "{}:{}@",
                user.as_deref().map(urlencoding::encode).unwrap_or_default(),
                urlencoding::encode(password)
            ),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.database)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisProvider;

impl RedisProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for RedisProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Redis
    }

    fn backend_name(&self) -> &'static str {
        "redis-rs"
    }

    fn describe_config(&self) -> ConfigSchema {
        ConfigSchema::common()
            .with_option(OptionSpec::integer(
                MAX_PIPELINE_COMMANDS,
                "Maximum commands in one exec call",
                1,
                1000,
                DEFAULT_MAX_PIPELINE,
            ))
            .with_option(security_option(security::DISABLE_UPDATE))
            .with_option(security_option(security::DISABLE_DELETE))
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
                    .with_description("Server port (default 6379)"),
            )
            .with_property("username", JsonSchema::string())
            .with_property("password", JsonSchema::string())
            .with_property("database", JsonSchema::integer().with_range(0, 15))
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::new(
                "exec",
                "Run Redis commands; separate several with newlines or ';' to pipeline them",
            )
            .required_param("command", JsonSchema::string())
            .mutating(),
            OperationSpec::new("info", "Server INFO, parsed into sections")
                .param("section", JsonSchema::string()),
            OperationSpec::new("dbsize", "Number of keys in the selected database"),
            OperationSpec::new("scan", "Iterate keys matching a pattern")
                .param(
                    "pattern",
                    JsonSchema::string().with_description("Glob pattern (default *)"),
                )
                .param(
                    "count",
                    JsonSchema::integer()
                        .with_range(1, MAX_SCAN_KEYS as i64)
                        .with_description("Maximum keys to return (default 100)"),
                ),
        ]
    }

    fn default_session_name(&self, params: &ConnectionParams) -> Option<String> {
        RedisTarget::from_params(params)
            .ok()
            .map(|t| format!("{}_{}", t.host, t.port))
    }

    async fn connect(
        &self,
        params: &ConnectionParams,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn Connection>, ProviderError> {
        let target = RedisTarget::from_params(params)?;
        debug!("Connecting to Redis at {}:{}", target.host, target.port);

        let client = redis::Client::open(target.url())
            .map_err(|e| ProviderError::Connect(format!("invalid Redis target: {}", e)))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| ProviderError::Connect(format!("Redis connect failed: {}", e)))?;

        redis::cmd("PING")
            .query_async::<String>(&mut manager)
            .await
            .map_err(|e| ProviderError::Connect(format!("Redis PING failed: {}", e)))?;

        info!(
            "Connected to Redis at {}:{} db {}",
            target.host, target.port, target.database
        );
        Ok(Box::new(RedisConnection {
            manager: Some(manager),
            settings: settings.clone(),
        }))
    }
}

struct RedisConnection {
    manager: Option<ConnectionManager>,
    settings: ProviderSettings,
}

impl RedisConnection {
    fn manager(&mut self) -> Result<&mut ConnectionManager, ProviderError> {
        self.manager
            .as_mut()
            .ok_or_else(|| ProviderError::ConnectionLost("connection closed".to_string()))
    }

    fn max_pipeline(&self) -> usize {
        self.settings
            .integer(MAX_PIPELINE_COMMANDS)
            .unwrap_or(DEFAULT_MAX_PIPELINE)
            .max(1) as usize
    }

    async fn exec(&mut self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let text = req_str(args, "command")?;
        let commands = parse_commands(text)?;
        if commands.is_empty() {
            return Err(ProviderError::invalid_argument("command", "no command given"));
        }
        let max = self.max_pipeline();
        if commands.len() > max {
            return Err(ProviderError::invalid_argument(
                "command",
                format!("{} commands exceed max_pipeline_commands ({})", commands.len(), max),
            ));
        }
        for tokens in &commands {
            guard::check_redis_command(&tokens[0], &self.settings)?;
        }

        if let [single] = commands.as_slice() {
            let result: redis::Value = build_cmd(single)
                .query_async(self.manager()?)
                .await
                .map_err(map_redis_error)?;
            return Ok(json!({
                "command": single[0].to_ascii_uppercase(),
                "result": redis_to_json(result),
            }));
        }

        let mut pipe = redis::pipe();
        for tokens in &commands {
            pipe.add_command(build_cmd(tokens));
        }
        let results: Vec<redis::Value> = pipe
            .query_async(self.manager()?)
            .await
            .map_err(map_redis_error)?;

        let results: Vec<Value> = commands
            .iter()
            .zip(results)
            .map(|(tokens, value)| {
                json!({
                    "command": tokens[0].to_ascii_uppercase(),
                    "result": redis_to_json(value),
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }

    async fn info(&mut self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let mut cmd = redis::cmd("INFO");
        if let Some(section) = opt_str(args, "section") {
            cmd.arg(section);
        }
        let text: String = cmd
            .query_async(self.manager()?)
            .await
            .map_err(map_redis_error)?;
        Ok(parse_info(&text))
    }

    async fn dbsize(&mut self) -> Result<Value, ProviderError> {
        let size: i64 = redis::cmd("DBSIZE")
            .query_async(self.manager()?)
            .await
            .map_err(map_redis_error)?;
        Ok(json!({ "keys": size }))
    }

    async fn scan(&mut self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let pattern = opt_str(args, "pattern").unwrap_or("*").to_string();
        let wanted = opt_u64(args, "count").unwrap_or(SCAN_BATCH).clamp(1, MAX_SCAN_KEYS) as usize;

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(self.manager()?)
                .await
                .map_err(map_redis_error)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 || keys.len() >= wanted {
                break;
            }
        }

        let truncated = keys.len() > wanted || cursor != 0;
        keys.truncate(wanted);
        Ok(json!({
            "pattern": pattern,
            "count": keys.len(),
            "keys": keys,
            "truncated": truncated,
        }))
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn execute(
        &mut self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ProviderError> {
        match command {
            "exec" => self.exec(args).await,
            "info" => self.info(args).await,
            "dbsize" => self.dbsize().await,
            "scan" => self.scan(args).await,
            other => Err(ProviderError::UnsupportedCommand(other.to_string())),
        }
    }

    async fn is_healthy(&mut self) -> bool {
        let Some(manager) = self.manager.as_mut() else {
            return false;
        };
        match redis::cmd("PING").query_async::<String>(manager).await {
            Ok(response) => response == "PONG",
            Err(e) => {
                debug!("Redis health check failed: {}", e);
                false
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        // The manager closes its socket once the last clone is dropped
        self.manager.take();
        Ok(())
    }
}

fn build_cmd(tokens: &[String]) -> redis::Cmd {
    let mut cmd = redis::cmd(&tokens[0]);
    for arg in &tokens[1..] {
        cmd.arg(arg.as_str());
    }
    cmd
}

fn map_redis_error(err: redis::RedisError) -> ProviderError {
    if err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal() {
        warn!("Redis connection lost: {}", err);
        ProviderError::ConnectionLost(err.to_string())
    } else {
        ProviderError::Exec(err.to_string())
    }
}

/// Split command text into commands and each command into tokens.
///
/// Commands are separated by newlines or `;` outside quotes. Single and
/// double quotes group a token; inside double quotes `\"`, `\\`, `\n` and
/// `\t` are escapes.
pub fn parse_commands(text: &str) -> Result<Vec<Vec<String>>, ProviderError> {
    let mut commands = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = text.chars();

    fn end_command(commands: &mut Vec<Vec<String>>, tokens: &mut Vec<String>) {
        if !tokens.is_empty() {
            commands.push(std::mem::take(tokens));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                in_token = true;
                let quote = c;
                let mut closed = false;
                while let Some(q) = chars.next() {
                    if q == quote {
                        closed = true;
                        break;
                    }
                    if q == '\\' && quote == '"' {
                        match chars.next() {
                            Some('n') => current.push('\n'),
                            Some('t') => current.push('\t'),
                            Some(other) => current.push(other),
                            None => break,
                        }
                    } else {
                        current.push(q);
                    }
                }
                if !closed {
                    return Err(ProviderError::invalid_argument("command", "unterminated quote"));
                }
            }
            ';' | '\n' | '\r' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
                end_command(&mut commands, &mut tokens);
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    end_command(&mut commands, &mut tokens);
    Ok(commands)
}

pub fn redis_to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(n) => json!(n),
        redis::Value::Double(f) => json!(f),
        redis::Value::Boolean(b) => json!(b),
        redis::Value::Okay => json!("OK"),
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::BulkString(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(redis_to_json).collect())
        }
        redis::Value::Map(pairs) => {
            let mut object = Map::new();
            for (k, v) in pairs {
                let key = match redis_to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                object.insert(key, redis_to_json(v));
            }
            Value::Object(object)
        }
        redis::Value::VerbatimString { text, .. } => Value::String(text),
        other => Value::String(format!("{:?}", other)),
    }
}

/// `INFO` text into `{section: {key: value}}`. Numeric values become numbers.
pub fn parse_info(text: &str) -> Value {
    let mut sections = Map::new();
    let mut section = String::from("default");
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('#') {
            section = name.trim().to_ascii_lowercase();
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| value.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(value.to_string()));
        if let Value::Object(entries) = sections
            .entry(section.clone())
            .or_insert_with(|| Value::Object(Map::new()))
        {
            entries.insert(key.to_string(), value);
        }
    }
    Value::Object(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> ConnectionParams {
        ConnectionParams::new(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_target_url() {
        let target = RedisTarget::from_params(&params(json!({}))).unwrap();
        assert_eq!(target.url(), "redis://localhost:6379/0");

        let target = RedisTarget::from_params(&params(json!({
            "host": "cache", "port": 6380, "password": "p@ss:word", "database": 2
        })))
        .unwrap();
        assert_eq!(target.url(), "redis://:p%40ss%3Aword@cache:6380/2");

        let target =
            RedisTarget::from_params(&params(json!({"username": "app", "password": "x"}))).unwrap();
        assert_eq!(target.url(), "redis://app:x@localhost:6379/0");
    }

    #[test]
    fn test_target_rejects_database_out_of_range() {
        let err = RedisTarget::from_params(&params(json!({"database": 16}))).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument { ref field, .. } if field == "database"));
    }

    #[test]
    fn test_parse_single_command() {
        let commands = parse_commands("SET greeting \"hello world\"").unwrap();
        assert_eq!(commands, vec![vec!["SET", "greeting", "hello world"]]);
    }

    #[test]
    fn test_parse_pipeline_separators() {
        let commands = parse_commands("SET a 1; GET a\nINCR 'counter;x'\n\n").unwrap();
        assert_eq!(
            commands,
            vec![
                vec!["SET", "a", "1"],
                vec!["GET", "a"],
                vec!["INCR", "counter;x"],
            ]
        );
    }

    #[test]
    fn test_parse_escapes_and_empty_tokens() {
        let commands = parse_commands(r#"SET k "a\"b\n" ''"#).unwrap();
        assert_eq!(commands, vec![vec!["SET", "k", "a\"b\n", ""]]);
    }

    #[test]
    fn test_parse_unterminated_quote() {
        assert!(parse_commands("SET k \"open").is_err());
    }

    #[test]
    fn test_redis_value_conversion() {
        let value = redis::Value::Array(vec![
            redis::Value::Int(3),
            redis::Value::Nil,
            redis::Value::BulkString(b"abc".to_vec()),
            redis::Value::Okay,
        ]);
        assert_eq!(redis_to_json(value), json!([3, null, "abc", "OK"]));

        let map = redis::Value::Map(vec![(
            redis::Value::SimpleString("field".into()),
            redis::Value::Int(1),
        )]);
        assert_eq!(redis_to_json(map), json!({"field": 1}));
    }

    #[test]
    fn test_parse_info() {
        let text = "# Server\r\nredis_version:7.2.4\r\nuptime_in_seconds:42\r\n\r\n# Memory\r\nused_memory_human:1.02M\r\nmem_fragmentation_ratio:1.5\r\n";
        let info = parse_info(text);
        assert_eq!(info["server"]["redis_version"], "7.2.4");
        assert_eq!(info["server"]["uptime_in_seconds"], 42);
        assert_eq!(info["memory"]["used_memory_human"], "1.02M");
        assert_eq!(info["memory"]["mem_fragmentation_ratio"], 1.5);
    }

    #[test]
    fn test_config_schema() {
        let schema = RedisProvider::new().describe_config();
        assert!(schema.contains(MAX_PIPELINE_COMMANDS));
        assert!(schema.contains(security::DISABLE_DELETE));
        assert!(schema.contains(security::DISABLE_UPDATE));
        assert!(!schema.contains(security::DISABLE_DROP));
    }

    #[test]
    fn test_default_session_name() {
        let name = RedisProvider::new().default_session_name(&params(json!({"host": "cache"})));
        assert_eq!(name.as_deref(), Some("cache_6379"));
    }
}
