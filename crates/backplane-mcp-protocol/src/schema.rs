//! JSON Schema Support
//!
//! The subset of JSON Schema used to declare command arguments, plus the
//! validation the dispatcher runs before any command has side effects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single argument schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    /// String type
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
        enum_values: Option<Vec<String>>,
    },
    /// Number type
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    /// Integer type
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    /// Boolean type
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Array type
    Array {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        items: Option<Box<JsonSchema>>,
    },
    /// Object type, free-form unless `properties` is set
    Object {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        properties: Option<BTreeMap<String, JsonSchema>>,
    },
}

impl JsonSchema {
    pub fn string() -> Self {
        Self::String {
            description: None,
            enum_values: None,
        }
    }

    pub fn string_enum(values: Vec<String>) -> Self {
        Self::String {
            description: None,
            enum_values: Some(values),
        }
    }

    pub fn number() -> Self {
        Self::Number {
            description: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn integer() -> Self {
        Self::Integer {
            description: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn boolean() -> Self {
        Self::Boolean { description: None }
    }

    pub fn array(items: JsonSchema) -> Self {
        Self::Array {
            description: None,
            items: Some(Box::new(items)),
        }
    }

    pub fn object() -> Self {
        Self::Object {
            description: None,
            properties: None,
        }
    }

    /// Add a description to any schema variant
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match &mut self {
            Self::String { description, .. }
            | Self::Number { description, .. }
            | Self::Integer { description, .. }
            | Self::Boolean { description }
            | Self::Array { description, .. }
            | Self::Object { description, .. } => *description = text,
        }
        self
    }

    /// Constrain an integer schema to an inclusive range. No-op for other variants.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        if let Self::Integer {
            minimum, maximum, ..
        } = &mut self
        {
            *minimum = Some(min);
            *maximum = Some(max);
        }
        self
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Integer { .. } => "integer",
            Self::Boolean { .. } => "boolean",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
        }
    }

    /// Validate `value` against this schema. `field` names the argument in any violation.
    pub fn validate(&self, field: &str, value: &Value) -> Result<(), SchemaViolation> {
        let mismatch = || {
            SchemaViolation::new(
                field,
                format!("expected {}, got {}", self.type_name(), value_type_name(value)),
            )
        };

        match self {
            Self::String { enum_values, .. } => {
                let s = value.as_str().ok_or_else(mismatch)?;
                if let Some(allowed) = enum_values
                    && !allowed.iter().any(|v| v == s)
                {
                    return Err(SchemaViolation::new(
                        field,
                        format!("must be one of [{}], got '{}'", allowed.join(", "), s),
                    ));
                }
                Ok(())
            }
            Self::Number {
                minimum, maximum, ..
            } => {
                let n = value.as_f64().ok_or_else(mismatch)?;
                check_bounds(field, n, *minimum, *maximum)
            }
            Self::Integer {
                minimum, maximum, ..
            } => {
                let n = value.as_i64().ok_or_else(mismatch)?;
                check_bounds(field, n, *minimum, *maximum)
            }
            Self::Boolean { .. } => value.as_bool().map(|_| ()).ok_or_else(mismatch),
            Self::Array { items, .. } => {
                let elements = value.as_array().ok_or_else(mismatch)?;
                if let Some(item_schema) = items {
                    for (index, element) in elements.iter().enumerate() {
                        item_schema.validate(&format!("{}[{}]", field, index), element)?;
                    }
                }
                Ok(())
            }
            Self::Object { properties, .. } => {
                let map = value.as_object().ok_or_else(mismatch)?;
                if let Some(properties) = properties {
                    for (key, schema) in properties {
                        if let Some(v) = map.get(key).filter(|v| !v.is_null()) {
                            schema.validate(&format!("{}.{}", field, key), v)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_bounds<T: PartialOrd + fmt::Display + Copy>(
    field: &str,
    n: T,
    minimum: Option<T>,
    maximum: Option<T>,
) -> Result<(), SchemaViolation> {
    if let Some(min) = minimum
        && n < min
    {
        return Err(SchemaViolation::new(field, format!("must be >= {}, got {}", min, n)));
    }
    if let Some(max) = maximum
        && n > max
    {
        return Err(SchemaViolation::new(field, format!("must be <= {}, got {}", max, n)));
    }
    Ok(())
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Input schema of a command: always a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

impl ToolSchema {
    /// An empty object schema that rejects unknown arguments.
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required_property(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Merge another schema's properties into this one. Existing properties win.
    pub fn merge(mut self, other: &ToolSchema) -> Self {
        for (name, schema) in &other.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| schema.clone());
        }
        for name in &other.required {
            if !self.required.contains(name) {
                self.required.push(name.clone());
            }
        }
        self
    }

    pub fn allows_additional(&self) -> bool {
        self.additional_properties.unwrap_or(true)
    }

    /// Validate a full argument object.
    ///
    /// Required fields are checked first (in declaration order), then every
    /// supplied field in key order. A `null` value counts as absent.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), SchemaViolation> {
        for name in &self.required {
            match args.get(name) {
                None | Some(Value::Null) => {
                    return Err(SchemaViolation::new(name, "required argument is missing"));
                }
                Some(_) => {}
            }
        }

        for (name, value) in args {
            match self.properties.get(name) {
                Some(_) if value.is_null() => {}
                Some(schema) => schema.validate(name, value)?,
                None if self.allows_additional() => {}
                None => return Err(SchemaViolation::new(name, "unknown argument")),
            }
        }
        Ok(())
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::object()
    }
}

/// A schema check failure naming the offending field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec_schema() -> ToolSchema {
        ToolSchema::object()
            .with_required_property("sql", JsonSchema::string().with_description("SQL text"))
            .with_property("limit", JsonSchema::integer().with_range(1, 10_000))
            .with_property(
                "mode",
                JsonSchema::string_enum(vec!["fast".to_string(), "safe".to_string()]),
            )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let schema = exec_schema();
        assert!(schema.validate(&args(json!({"sql": "select 1"}))).is_ok());
        assert!(
            schema
                .validate(&args(json!({"sql": "select 1", "limit": 5, "mode": "safe"})))
                .is_ok()
        );
        // null counts as absent for optional fields
        assert!(schema.validate(&args(json!({"sql": "x", "limit": null}))).is_ok());
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let err = exec_schema().validate(&args(json!({"limit": 5}))).unwrap_err();
        assert_eq!(err.field, "sql");
    }

    #[test]
    fn test_type_mismatch_is_named() {
        let err = exec_schema()
            .validate(&args(json!({"sql": "x", "limit": "5"})))
            .unwrap_err();
        assert_eq!(err.field, "limit");
        assert!(err.reason.contains("expected integer"));
    }

    #[test]
    fn test_range_and_enum() {
        let schema = exec_schema();
        let err = schema
            .validate(&args(json!({"sql": "x", "limit": 0})))
            .unwrap_err();
        assert_eq!(err.field, "limit");

        let err = schema
            .validate(&args(json!({"sql": "x", "mode": "reckless"})))
            .unwrap_err();
        assert_eq!(err.field, "mode");
        assert!(err.reason.contains("fast, safe"));
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let err = exec_schema()
            .validate(&args(json!({"sql": "x", "sqll": "y"})))
            .unwrap_err();
        assert_eq!(err.field, "sqll");
        assert_eq!(err.reason, "unknown argument");
    }

    #[test]
    fn test_open_schema_accepts_extra_fields() {
        let mut schema = exec_schema();
        schema.additional_properties = None;
        assert!(schema.validate(&args(json!({"sql": "x", "extra": 1}))).is_ok());
    }

    #[test]
    fn test_nested_array_items() {
        let schema = ToolSchema::object()
            .with_property("roles", JsonSchema::array(JsonSchema::string()));
        let err = schema
            .validate(&args(json!({"roles": ["admin", 3]})))
            .unwrap_err();
        assert_eq!(err.field, "roles[1]");
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(exec_schema()).unwrap();
        assert_eq!(json["type"], "object");
        assert_eq!(json["required"], json!(["sql"]));
        assert_eq!(json["additionalProperties"], false);
        assert_eq!(json["properties"]["limit"]["type"], "integer");
        assert_eq!(json["properties"]["limit"]["maximum"], 10_000);
        assert_eq!(json["properties"]["mode"]["enum"], json!(["fast", "safe"]));
    }

    #[test]
    fn test_merge_keeps_existing() {
        let base = ToolSchema::object().with_property("name", JsonSchema::string());
        let other = ToolSchema::object()
            .with_required_property("host", JsonSchema::string())
            .with_property("name", JsonSchema::integer());
        let merged = base.merge(&other);
        assert_eq!(merged.properties["name"], JsonSchema::string());
        assert_eq!(merged.required, vec!["host".to_string()]);
    }
}
