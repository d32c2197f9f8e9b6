//! Argument helpers and option specs shared by the adapters.

use serde_json::{Map, Value};

use backplane_mcp_protocol::OptionSpec;
use backplane_mcp_session::ProviderError;

/// Security switch names. Each maps to a `--disable-*` server flag.
pub mod security {
    pub const DISABLE_CREATE: &str = "disable_create";
    pub const DISABLE_DROP: &str = "disable_drop";
    pub const DISABLE_ALTER: &str = "disable_alter";
    pub const DISABLE_TRUNCATE: &str = "disable_truncate";
    pub const DISABLE_UPDATE: &str = "disable_update";
    pub const DISABLE_DELETE: &str = "disable_delete";

    pub const ALL: [&str; 6] = [
        DISABLE_CREATE,
        DISABLE_DROP,
        DISABLE_ALTER,
        DISABLE_TRUNCATE,
        DISABLE_UPDATE,
        DISABLE_DELETE,
    ];
}

/// Boolean option spec for one security switch.
pub fn security_option(name: &str) -> OptionSpec {
    let description = match name {
        security::DISABLE_CREATE => "Reject create operations",
        security::DISABLE_DROP => "Reject drop operations",
        security::DISABLE_ALTER => "Reject alter operations",
        security::DISABLE_TRUNCATE => "Reject truncate operations",
        security::DISABLE_UPDATE => "Reject update and write operations",
        security::DISABLE_DELETE => "Reject delete operations",
        _ => "Reject matching operations",
    };
    OptionSpec::boolean(name, description, false)
}

pub fn opt_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn req_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ProviderError> {
    opt_str(args, key).ok_or_else(|| ProviderError::invalid_argument(key, "must be a non-empty string"))
}

pub fn opt_bool(args: &Map<String, Value>, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn opt_u64(args: &Map<String, Value>, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

/// A list given as a JSON array of strings or as one comma-separated string.
pub fn str_list(args: &Map<String, Value>, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Reject names that would escape a URL path segment or SQL identifier.
pub fn plain_name<'a>(key: &str, value: &'a str) -> Result<&'a str, ProviderError> {
    if value.is_empty()
        || value.contains('/')
        || value.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(ProviderError::invalid_argument(
            key,
            format!("'{}' is not a valid name", value),
        ));
    }
    Ok(value)
}
