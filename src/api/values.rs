//! Value strategies: produce concrete values for a schema.

use serde_json::{Value, json};

use crate::api::operation::{Schema, SchemaKind};

/// Recursion bound for self-referential schemas; beyond it a leaf default is
/// substituted so generation terminates.
pub const MAX_SCHEMA_DEPTH: usize = 3;

/// One generated value with a label for the variation it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedValue {
    pub value: Value,
    pub description: String,
}

impl GeneratedValue {
    fn new(value: Value, description: impl Into<String>) -> Self {
        Self {
            value,
            description: description.into(),
        }
    }
}

/// Strategy for generating values from a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueStrategy {
    /// One realistic value honoring example, then default, then type default.
    Default,
    /// The default baseline plus type-targeted boundary values.
    Interesting,
}

impl ValueStrategy {
    pub fn values(&self, schema: &Schema) -> Vec<GeneratedValue> {
        match self {
            ValueStrategy::Default => {
                vec![GeneratedValue::new(default_value(schema, 0), "default")]
            }
            ValueStrategy::Interesting => interesting_values(schema),
        }
    }
}

/// Default value for a schema: `example`, then `default`, then a type
/// default.
pub fn default_value(schema: &Schema, depth: usize) -> Value {
    if let Some(example) = &schema.example {
        return example.clone();
    }
    if let Some(default) = &schema.default {
        return default.clone();
    }
    if let Some(first) = schema.enum_values.first() {
        return first.clone();
    }
    if depth >= MAX_SCHEMA_DEPTH {
        return leaf_default(&schema.kind);
    }
    match &schema.kind {
        SchemaKind::String => json!("string_value"),
        SchemaKind::Integer => json!(1),
        SchemaKind::Number => json!(1.1),
        SchemaKind::Boolean => json!(true),
        SchemaKind::Array(inner) => json!([default_value(inner, depth + 1)]),
        SchemaKind::Object(properties) => {
            let mut map = serde_json::Map::new();
            for (name, prop) in properties {
                map.insert(name.clone(), default_value(prop, depth + 1));
            }
            Value::Object(map)
        }
        SchemaKind::Unknown => Value::Null,
    }
}

fn leaf_default(kind: &SchemaKind) -> Value {
    match kind {
        SchemaKind::String => json!("string_value"),
        SchemaKind::Integer => json!(1),
        SchemaKind::Number => json!(1.1),
        SchemaKind::Boolean => json!(true),
        SchemaKind::Array(_) => json!([]),
        SchemaKind::Object(_) => json!({}),
        SchemaKind::Unknown => Value::Null,
    }
}

fn interesting_values(schema: &Schema) -> Vec<GeneratedValue> {
    // The default is always the baseline.
    let mut values = vec![GeneratedValue::new(default_value(schema, 0), "default")];

    match &schema.kind {
        SchemaKind::Integer => {
            values.push(GeneratedValue::new(json!(0), "zero"));
            values.push(GeneratedValue::new(json!(-1), "negative one"));
            values.push(GeneratedValue::new(json!(1), "one"));
            values.push(GeneratedValue::new(json!(i32::MAX), "max int32"));
            values.push(GeneratedValue::new(json!(i32::MIN), "min int32"));
            if schema.format.as_deref() == Some("int64") {
                values.push(GeneratedValue::new(json!(i64::MAX), "max int64"));
                values.push(GeneratedValue::new(json!(i64::MIN), "min int64"));
            }
        }
        SchemaKind::Number => {
            values.push(GeneratedValue::new(json!(0.0), "zero"));
            values.push(GeneratedValue::new(json!(-1.5), "negative"));
            values.push(GeneratedValue::new(json!(3.14), "pi-ish"));
            values.push(GeneratedValue::new(json!(f64::MAX), "max f64"));
            values.push(GeneratedValue::new(
                json!(f64::MIN_POSITIVE),
                "smallest positive f64",
            ));
        }
        SchemaKind::String => {
            values.push(GeneratedValue::new(json!(""), "empty string"));
            values.push(GeneratedValue::new(json!("test"), "short string"));
            values.push(GeneratedValue::new(json!("A".repeat(1000)), "long string"));
            values.push(GeneratedValue::new(json!("null"), "literal null"));
            values.push(GeneratedValue::new(json!("undefined"), "literal undefined"));
        }
        SchemaKind::Boolean => {
            values.push(GeneratedValue::new(json!(true), "true"));
            values.push(GeneratedValue::new(json!(false), "false"));
        }
        SchemaKind::Array(_) | SchemaKind::Object(_) | SchemaKind::Unknown => {}
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_example_wins_over_default() {
        let mut schema = Schema::string();
        schema.example = Some(json!("from-example"));
        schema.default = Some(json!("from-default"));
        assert_eq!(default_value(&schema, 0), json!("from-example"));
    }

    #[test]
    fn test_type_defaults() {
        assert_eq!(default_value(&Schema::string(), 0), json!("string_value"));
        assert_eq!(default_value(&Schema::integer(), 0), json!(1));
        assert_eq!(
            default_value(&Schema::of(SchemaKind::Number), 0),
            json!(1.1)
        );
        assert_eq!(
            default_value(&Schema::of(SchemaKind::Boolean), 0),
            json!(true)
        );
        assert_eq!(default_value(&Schema::unknown(), 0), Value::Null);
    }

    #[test]
    fn test_object_recurses() {
        let schema = Schema::of(SchemaKind::Object(vec![
            ("name".to_string(), Schema::string()),
            (
                "tags".to_string(),
                Schema::of(SchemaKind::Array(Box::new(Schema::string()))),
            ),
        ]));
        assert_eq!(
            default_value(&schema, 0),
            json!({"name": "string_value", "tags": ["string_value"]})
        );
    }

    #[test]
    fn test_recursion_bounded_at_depth() {
        // A chain of nested arrays deeper than the bound still terminates.
        let mut schema = Schema::string();
        for _ in 0..10 {
            schema = Schema::of(SchemaKind::Array(Box::new(schema)));
        }
        let value = default_value(&schema, 0);
        // Depth 3 of arrays, then a leaf default.
        assert_eq!(value, json!([[[[]]]]));
    }

    #[test]
    fn test_interesting_includes_baseline_first() {
        let values = ValueStrategy::Interesting.values(&Schema::integer());
        assert_eq!(values[0].description, "default");
        assert_eq!(values[0].value, json!(1));
    }

    #[test]
    fn test_int64_boundaries_gated_on_format() {
        let plain = ValueStrategy::Interesting.values(&Schema::integer());
        assert!(!plain.iter().any(|v| v.value == json!(i64::MAX)));

        let wide = ValueStrategy::Interesting.values(&Schema::integer().with_format("int64"));
        assert!(wide.iter().any(|v| v.value == json!(i64::MAX)));
        assert!(wide.iter().any(|v| v.value == json!(i64::MIN)));
    }

    #[test]
    fn test_string_boundaries() {
        let values = ValueStrategy::Interesting.values(&Schema::string());
        let strings: Vec<&str> = values.iter().filter_map(|v| v.value.as_str()).collect();
        assert!(strings.contains(&""));
        assert!(strings.contains(&"test"));
        assert!(strings.contains(&"null"));
        assert!(strings.contains(&"undefined"));
        assert!(strings.iter().any(|s| s.len() == 1000));
    }
}
