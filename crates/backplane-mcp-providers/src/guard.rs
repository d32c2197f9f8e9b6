//! Security guard applied before a command reaches its backend.
//!
//! Driven by the `disable_*` settings a session captured at connect time.

use backplane_mcp_protocol::ProviderSettings;
use backplane_mcp_session::ProviderError;

use crate::common::security;

/// Leading-keyword classification of one SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows: SELECT, SHOW, DESCRIBE, DESC, EXPLAIN, and WITH ... SELECT
    Query,
    Create,
    Drop,
    Alter,
    Truncate,
    Update,
    Delete,
    Insert,
    Other,
}

impl StatementKind {
    pub fn is_query(&self) -> bool {
        matches!(self, StatementKind::Query)
    }

    fn guard_option(&self) -> Option<&'static str> {
        match self {
            StatementKind::Create => Some(security::DISABLE_CREATE),
            StatementKind::Drop => Some(security::DISABLE_DROP),
            StatementKind::Alter => Some(security::DISABLE_ALTER),
            StatementKind::Truncate => Some(security::DISABLE_TRUNCATE),
            StatementKind::Update | StatementKind::Insert => Some(security::DISABLE_UPDATE),
            StatementKind::Delete => Some(security::DISABLE_DELETE),
            StatementKind::Query | StatementKind::Other => None,
        }
    }
}

/// Skip whitespace, comments and opening parentheses.
fn strip_leading_noise(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(rest) = trimmed.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(rest) = trimmed.strip_prefix('#') {
            sql = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Remainder of `s` after the closing `quote`.
fn skip_quoted(s: &str, quote: char) -> &str {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' && quote != '`' {
            escaped = true;
        } else if c == quote {
            return &s[i + c.len_utf8()..];
        }
    }
    ""
}

/// Statement keywords that can follow a `WITH` clause.
const CTE_BODY_KEYWORDS: &[&str] = &[
    "SELECT", "TABLE", "VALUES", "UPDATE", "DELETE", "INSERT", "REPLACE",
];

/// The first top-level statement keyword after the common table expressions
/// of a `WITH` clause. Parenthesized CTE bodies, quoted names and comments
/// are skipped.
fn keyword_after_ctes(mut rest: &str) -> Option<String> {
    let mut depth = 0usize;
    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("--").or_else(|| rest.strip_prefix('#')) {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else if matches!(c, '\'' | '"' | '`') {
            rest = skip_quoted(&rest[1..], c);
        } else if c == '(' {
            depth += 1;
            rest = &rest[1..];
        } else if c == ')' {
            depth = depth.saturating_sub(1);
            rest = &rest[1..];
        } else if is_word_char(c) {
            let end = rest.find(|c: char| !is_word_char(c)).unwrap_or(rest.len());
            let word = rest[..end].to_ascii_uppercase();
            if depth == 0 && CTE_BODY_KEYWORDS.contains(&word.as_str()) {
                return Some(word);
            }
            rest = &rest[end..];
        } else {
            rest = &rest[c.len_utf8()..];
        }
    }
    None
}

pub fn classify(sql: &str) -> StatementKind {
    let statement = strip_leading_noise(sql);
    let keyword: String = statement
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if keyword == "WITH" {
        return match keyword_after_ctes(&statement[keyword.len()..]) {
            Some(body) => classify_keyword(&body),
            None => StatementKind::Other,
        };
    }
    classify_keyword(&keyword)
}

fn classify_keyword(keyword: &str) -> StatementKind {
    match keyword {
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "TABLE" | "VALUES" => {
            StatementKind::Query
        }
        "CREATE" => StatementKind::Create,
        "DROP" => StatementKind::Drop,
        "ALTER" | "RENAME" => StatementKind::Alter,
        "TRUNCATE" => StatementKind::Truncate,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "INSERT" | "REPLACE" => StatementKind::Insert,
        _ => StatementKind::Other,
    }
}

/// Split on `;` outside quotes and backticks. Empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                ';' => {
                    statements.push(&sql[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    statements.push(&sql[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !strip_leading_noise(s).is_empty())
        .collect()
}

/// Reject any statement in `sql` that a `disable_*` setting forbids.
pub fn check_sql(sql: &str, settings: &ProviderSettings) -> Result<(), ProviderError> {
    for statement in split_statements(sql) {
        let kind = classify(statement);
        if let Some(option) = kind.guard_option()
            && settings.flag(option)
        {
            return Err(ProviderError::Denied(format!(
                "{:?} statements are disabled ({})",
                kind, option
            )));
        }
    }
    Ok(())
}

/// Redis commands that are never forwarded: they stop the server, expose
/// other clients, or take the connection over.
const REDIS_ALWAYS_BLOCKED: &[&str] = &[
    "SHUTDOWN",
    "DEBUG",
    "MONITOR",
    "CLIENT",
    "SUBSCRIBE",
    "PSUBSCRIBE",
    "SSUBSCRIBE",
];
const REDIS_DELETE: &[&str] = &["DEL", "UNLINK", "FLUSHDB", "FLUSHALL"];
const REDIS_UPDATE: &[&str] = &["CONFIG", "EVAL", "EVALSHA", "SCRIPT"];

pub fn check_redis_command(name: &str, settings: &ProviderSettings) -> Result<(), ProviderError> {
    let name = name.to_ascii_uppercase();
    if REDIS_ALWAYS_BLOCKED.contains(&name.as_str()) {
        return Err(ProviderError::Denied(format!("{} is not allowed", name)));
    }
    if REDIS_DELETE.contains(&name.as_str()) && settings.flag(security::DISABLE_DELETE) {
        return Err(ProviderError::Denied(format!(
            "{} is disabled ({})",
            name,
            security::DISABLE_DELETE
        )));
    }
    if REDIS_UPDATE.contains(&name.as_str()) && settings.flag(security::DISABLE_UPDATE) {
        return Err(ProviderError::Denied(format!(
            "{} is disabled ({})",
            name,
            security::DISABLE_UPDATE
        )));
    }
    Ok(())
}

/// Guard for messaging admin operations, keyed by operation name prefix.
pub fn check_admin_operation(
    operation: &str,
    settings: &ProviderSettings,
) -> Result<(), ProviderError> {
    let option = if operation.starts_with("create_") {
        security::DISABLE_CREATE
    } else if operation.starts_with("delete_") {
        security::DISABLE_DELETE
    } else {
        return Ok(());
    };
    if settings.flag(option) {
        return Err(ProviderError::Denied(format!(
            "{} is disabled ({})",
            operation, option
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn settings(flags: Value) -> ProviderSettings {
        let mut settings = ProviderSettings::default();
        settings.apply(flags.as_object().unwrap());
        settings
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify("select * from t"), StatementKind::Query);
        assert_eq!(classify("  SHOW TABLES"), StatementKind::Query);
        assert_eq!(classify("desc users"), StatementKind::Query);
        assert_eq!(classify("(SELECT 1) UNION (SELECT 2)"), StatementKind::Query);
        assert_eq!(classify("with x as (select 1) select * from x"), StatementKind::Query);
        assert_eq!(classify("DROP TABLE t"), StatementKind::Drop);
        assert_eq!(classify("replace into t values (1)"), StatementKind::Insert);
        assert_eq!(classify("SET @a = 1"), StatementKind::Other);
    }

    #[test]
    fn test_classify_skips_comments() {
        assert_eq!(classify("-- note\nDELETE FROM t"), StatementKind::Delete);
        assert_eq!(classify("/* hint */ UPDATE t SET a = 1"), StatementKind::Update);
        assert_eq!(classify("# mysql comment\nselect 1"), StatementKind::Query);
    }

    #[test]
    fn test_classify_with_uses_statement_after_ctes() {
        assert_eq!(
            classify("WITH x AS (SELECT 1) DELETE FROM users"),
            StatementKind::Delete
        );
        assert_eq!(
            classify("with recursive t (n) as (select 1 union all select n + 1 from t where n < 3) update x join t set x.a = t.n"),
            StatementKind::Update
        );
        assert_eq!(
            classify("WITH a AS (SELECT ')' AS p), `b` AS (SELECT 2) /* select */ INSERT INTO t SELECT * FROM a"),
            StatementKind::Insert
        );
        assert_eq!(
            classify("WITH delete_log AS (SELECT 1) SELECT * FROM delete_log"),
            StatementKind::Query
        );
        assert_eq!(classify("WITH x AS (SELECT 1)"), StatementKind::Other);
    }

    #[test]
    fn test_check_sql_guards_writes_behind_ctes() {
        let s = settings(json!({"disable_delete": true, "disable_update": true}));
        let err = check_sql("WITH x AS (SELECT 1) DELETE FROM users", &s).unwrap_err();
        assert!(matches!(err, ProviderError::Denied(ref m) if m.contains("disable_delete")));
        let err = check_sql(
            "WITH ids AS (SELECT id FROM users WHERE stale) UPDATE users SET active = 0 WHERE id IN (SELECT id FROM ids)",
            &s,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Denied(ref m) if m.contains("disable_update")));
        assert!(check_sql("WITH x AS (SELECT 1) SELECT * FROM x", &s).is_ok());
    }

    #[test]
    fn test_split_respects_quotes() {
        let parts = split_statements("insert into t values ('a;b'); select `x;y` from t;  ;");
        assert_eq!(parts, vec!["insert into t values ('a;b')", "select `x;y` from t"]);
        let parts = split_statements(r"select 'it\'s; fine'");
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_check_sql_blocks_hidden_statement() {
        let s = settings(json!({"disable_drop": true}));
        assert!(check_sql("select 1", &s).is_ok());
        let err = check_sql("select 1; drop table users", &s).unwrap_err();
        assert!(matches!(err, ProviderError::Denied(ref m) if m.contains("disable_drop")));
    }

    #[test]
    fn test_check_sql_flags_are_independent() {
        let s = settings(json!({"disable_delete": true}));
        assert!(check_sql("update t set a = 1", &s).is_ok());
        assert!(check_sql("delete from t", &s).is_err());
        let s = settings(json!({"disable_update": true}));
        assert!(check_sql("insert into t values (1)", &s).is_err());
    }

    #[test]
    fn test_redis_guard() {
        let open = settings(json!({}));
        assert!(check_redis_command("get", &open).is_ok());
        assert!(check_redis_command("del", &open).is_ok());
        assert!(check_redis_command("shutdown", &open).is_err());
        assert!(check_redis_command("Client", &open).is_err());

        let locked = settings(json!({"disable_delete": true, "disable_update": true}));
        assert!(check_redis_command("FLUSHALL", &locked).is_err());
        assert!(check_redis_command("eval", &locked).is_err());
        assert!(check_redis_command("set", &locked).is_ok());
    }

    #[test]
    fn test_admin_guard() {
        let s = settings(json!({"disable_create": true}));
        assert!(check_admin_operation("create_topic", &s).is_err());
        assert!(check_admin_operation("delete_topic", &s).is_ok());
        assert!(check_admin_operation("list_topics", &s).is_ok());
    }
}
