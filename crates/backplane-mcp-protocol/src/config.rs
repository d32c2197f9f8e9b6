//! Runtime option schemas and the settings they validate.
//!
//! Every provider publishes a [`ConfigSchema`] (name, type, default, valid
//! range or enum per option). [`ProviderSettings`] is a snapshot of values
//! that conforms to one schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::BackplaneError;
use crate::schema::{JsonSchema, ToolSchema};

/// Option names shared by every provider schema.
pub mod options {
    pub const CONNECT_TIMEOUT_MS: &str = "connect_timeout_ms";
    pub const REQUEST_TIMEOUT_MS: &str = "request_timeout_ms";
    pub const HISTORY_LIMIT: &str = "history_limit";
    pub const RETRY_POLICY: &str = "retry_policy";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const RETRY_DELAY_MS: &str = "retry_delay_ms";
}

/// Cap on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Type and constraints of one option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Integer { minimum: i64, maximum: i64 },
    Boolean,
    Enum { values: Vec<String> },
}

/// One configurable option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub kind: OptionKind,
    pub default: Value,
}

impl OptionSpec {
    pub fn integer(
        name: impl Into<String>,
        description: impl Into<String>,
        minimum: i64,
        maximum: i64,
        default: i64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Integer { minimum, maximum },
            default: json!(default),
        }
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Boolean,
            default: json!(default),
        }
    }

    pub fn enumeration(
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        default: &str,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OptionKind::Enum {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
            default: json!(default),
        }
    }

    /// Check a candidate value against this option's type and range.
    pub fn check(&self, value: &Value) -> Result<(), BackplaneError> {
        let invalid = |reason: String| BackplaneError::Validation {
            field: self.name.clone(),
            reason,
        };
        match &self.kind {
            OptionKind::Integer { minimum, maximum } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| invalid(format!("expected integer, got {}", value)))?;
                if n < *minimum || n > *maximum {
                    return Err(invalid(format!(
                        "must be between {} and {}, got {}",
                        minimum, maximum, n
                    )));
                }
                Ok(())
            }
            OptionKind::Boolean => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| invalid(format!("expected boolean, got {}", value))),
            OptionKind::Enum { values } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("expected string, got {}", value)))?;
                if values.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(invalid(format!(
                        "must be one of [{}], got '{}'",
                        values.join(", "),
                        s
                    )))
                }
            }
        }
    }

    fn argument_schema(&self) -> JsonSchema {
        let schema = match &self.kind {
            OptionKind::Integer { minimum, maximum } => {
                JsonSchema::integer().with_range(*minimum, *maximum)
            }
            OptionKind::Boolean => JsonSchema::boolean(),
            OptionKind::Enum { values } => JsonSchema::string_enum(values.clone()),
        };
        schema.with_description(self.description.clone())
    }
}

/// Full option schema for one provider type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub options: Vec<OptionSpec>,
}

impl ConfigSchema {
    /// The options every provider understands.
    pub fn common() -> Self {
        Self::default()
            .with_option(OptionSpec::integer(
                options::CONNECT_TIMEOUT_MS,
                "Upper bound for a single connect attempt, in milliseconds",
                100,
                300_000,
                5_000,
            ))
            .with_option(OptionSpec::integer(
                options::REQUEST_TIMEOUT_MS,
                "Upper bound for a single command, in milliseconds",
                100,
                300_000,
                30_000,
            ))
            .with_option(OptionSpec::integer(
                options::HISTORY_LIMIT,
                "Number of history entries kept per session",
                1,
                1_000,
                100,
            ))
            .with_option(OptionSpec::enumeration(
                options::RETRY_POLICY,
                "How failed connect attempts are retried",
                &["none", "fixed", "exponential"],
                "none",
            ))
            .with_option(OptionSpec::integer(
                options::MAX_RETRIES,
                "Connect retries after the first attempt (ignored when retry_policy is none)",
                0,
                10,
                3,
            ))
            .with_option(OptionSpec::integer(
                options::RETRY_DELAY_MS,
                "Base delay between connect attempts, in milliseconds",
                0,
                60_000,
                200,
            ))
    }

    /// Add or replace an option.
    pub fn with_option(mut self, option: OptionSpec) -> Self {
        match self.options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
        self
    }

    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    /// Settings with every option at its default.
    pub fn defaults(&self) -> ProviderSettings {
        ProviderSettings {
            values: self
                .options
                .iter()
                .map(|o| (o.name.clone(), o.default.clone()))
                .collect(),
        }
    }

    /// Validate every field of `patch`. Nothing is applied here.
    pub fn validate_patch(&self, patch: &Map<String, Value>) -> Result<(), BackplaneError> {
        if patch.is_empty() {
            return Err(BackplaneError::Validation {
                field: "settings".to_string(),
                reason: "no settings to update".to_string(),
            });
        }
        for (name, value) in patch {
            let option = self.option(name).ok_or_else(|| BackplaneError::Validation {
                field: name.clone(),
                reason: "unknown option".to_string(),
            })?;
            option.check(value)?;
        }
        Ok(())
    }

    /// Argument schema for an update command: every option optional.
    pub fn to_tool_schema(&self) -> ToolSchema {
        self.options
            .iter()
            .fold(ToolSchema::object(), |schema, option| {
                schema.with_property(option.name.clone(), option.argument_schema())
            })
    }
}

/// Connect retry behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    None,
    Fixed,
    Exponential,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). Zero for attempt 0.
    pub fn delay_for_attempt(&self, base: Duration, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self {
            RetryPolicy::None | RetryPolicy::Fixed => base,
            RetryPolicy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor)
            }
        };
        delay.min(MAX_RETRY_DELAY)
    }
}

/// A validated snapshot of one provider's settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderSettings {
    values: BTreeMap<String, Value>,
}

impl ProviderSettings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// Boolean option, `false` when unset.
    pub fn flag(&self, name: &str) -> bool {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Millisecond option as a `Duration`; `fallback_ms` when unset or negative.
    pub fn duration_ms(&self, name: &str, fallback_ms: u64) -> Duration {
        let ms = self
            .integer(name)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(fallback_ms);
        Duration::from_millis(ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.duration_ms(options::CONNECT_TIMEOUT_MS, 5_000)
    }

    pub fn request_timeout(&self) -> Duration {
        self.duration_ms(options::REQUEST_TIMEOUT_MS, 30_000)
    }

    pub fn history_limit(&self) -> usize {
        self.integer(options::HISTORY_LIMIT)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(100)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.string(options::RETRY_POLICY) {
            Some("fixed") => RetryPolicy::Fixed,
            Some("exponential") => RetryPolicy::Exponential,
            _ => RetryPolicy::None,
        }
    }

    /// Total connect attempts allowed by the retry settings.
    pub fn connect_attempts(&self) -> u32 {
        match self.retry_policy() {
            RetryPolicy::None => 1,
            _ => {
                let retries = self
                    .integer(options::MAX_RETRIES)
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0);
                retries + 1
            }
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.duration_ms(options::RETRY_DELAY_MS, 200)
    }

    /// Overwrite fields. Callers validate first.
    pub fn apply(&mut self, patch: &Map<String, Value>) {
        for (name, value) in patch {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_common_defaults() {
        let settings = ConfigSchema::common().defaults();
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.history_limit(), 100);
        assert_eq!(settings.retry_policy(), RetryPolicy::None);
        assert_eq!(settings.connect_attempts(), 1);
    }

    #[test]
    fn test_validate_patch_rejects_out_of_range() {
        let schema = ConfigSchema::common();
        let err = schema
            .validate_patch(&patch(json!({"history_limit": 0})))
            .unwrap_err();
        match err {
            BackplaneError::Validation { field, .. } => assert_eq!(field, "history_limit"),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_validate_patch_rejects_unknown_and_bad_enum() {
        let schema = ConfigSchema::common();
        assert!(schema.validate_patch(&patch(json!({"pool": 3}))).is_err());
        assert!(
            schema
                .validate_patch(&patch(json!({"retry_policy": "sometimes"})))
                .is_err()
        );
        assert!(schema.validate_patch(&Map::new()).is_err());
    }

    #[test]
    fn test_apply_patch() {
        let schema = ConfigSchema::common();
        let mut settings = schema.defaults();
        let update = patch(json!({"retry_policy": "exponential", "max_retries": 2}));
        schema.validate_patch(&update).unwrap();
        settings.apply(&update);
        assert_eq!(settings.retry_policy(), RetryPolicy::Exponential);
        assert_eq!(settings.connect_attempts(), 3);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let base = Duration::from_millis(200);
        assert_eq!(RetryPolicy::Exponential.delay_for_attempt(base, 0), Duration::ZERO);
        assert_eq!(RetryPolicy::Exponential.delay_for_attempt(base, 1), base);
        assert_eq!(
            RetryPolicy::Exponential.delay_for_attempt(base, 3),
            Duration::from_millis(800)
        );
        assert_eq!(
            RetryPolicy::Exponential.delay_for_attempt(base, 40),
            MAX_RETRY_DELAY
        );
        assert_eq!(RetryPolicy::Fixed.delay_for_attempt(base, 5), base);
    }

    #[test]
    fn test_with_option_replaces() {
        let schema = ConfigSchema::common().with_option(OptionSpec::integer(
            options::HISTORY_LIMIT,
            "smaller",
            1,
            10,
            5,
        ));
        assert_eq!(schema.defaults().history_limit(), 5);
        assert_eq!(
            schema
                .options
                .iter()
                .filter(|o| o.name == options::HISTORY_LIMIT)
                .count(),
            1
        );
    }

    #[test]
    fn test_tool_schema_mirrors_options() {
        let tool_schema = ConfigSchema::common().to_tool_schema();
        assert!(tool_schema.required.is_empty());
        assert!(tool_schema.properties.contains_key(options::RETRY_POLICY));
        assert!(!tool_schema.allows_additional());
    }

    #[test]
    fn test_option_spec_serialization() {
        let spec = OptionSpec::integer("max_rows", "rows", 1, 10, 5);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "integer");
        assert_eq!(json["minimum"], 1);
        assert_eq!(json["default"], 5);
    }
}
