//! OpenAPI 3 / Swagger 2 parsing into normalized operations.
//!
//! Documents are accepted as JSON or YAML. `$ref` chains are followed at
//! most [`MAX_SCHEMA_DEPTH`] deep so self-referential schemas terminate.

use serde_json::Value;

use crate::api::operation::{
    Operation, ParamLocation, Parameter, RequestBody, Schema, SchemaKind, SecurityRequirement,
};
use crate::api::values::MAX_SCHEMA_DEPTH;
use crate::error::ParseError;

const METHODS: [&str; 7] = ["get", "put", "post", "delete", "patch", "head", "options"];

/// Parse a raw OpenAPI 3 or Swagger 2 document.
pub fn parse(raw: &[u8]) -> Result<Vec<Operation>, ParseError> {
    let doc: Value = match serde_json::from_slice(raw) {
        Ok(doc) => doc,
        Err(_) => serde_yaml::from_slice(raw)?,
    };
    parse_document(&doc)
}

fn parse_document(doc: &Value) -> Result<Vec<Operation>, ParseError> {
    let is_v3 = doc.get("openapi").is_some();
    let is_v2 = doc
        .get("swagger")
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with('2'));
    if !is_v3 && !is_v2 {
        return Err(ParseError::InvalidDocument {
            kind: "openapi",
            reason: "missing openapi/swagger version field".to_string(),
        });
    }

    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::InvalidDocument {
            kind: "openapi",
            reason: "missing paths object".to_string(),
        })?;

    let global_security = security_requirements(doc.get("security"));
    let base_path = doc.get("basePath").and_then(Value::as_str).unwrap_or("");

    let mut operations = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        let shared_params = item.get("parameters");

        for method in METHODS {
            let Some(op) = item.get(method) else {
                continue;
            };
            let mut operation = Operation::new(
                method.to_uppercase(),
                format!("{base_path}{path}"),
            );
            operation.id = op
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string);
            operation.summary = op
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string);

            let mut params: Vec<&Value> = Vec::new();
            if let Some(shared) = shared_params.and_then(Value::as_array) {
                params.extend(shared);
            }
            if let Some(own) = op.get("parameters").and_then(Value::as_array) {
                params.extend(own);
            }

            let mut form_fields = Vec::new();
            for param in params {
                let param = deref(doc, param);
                let Some(name) = param.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let location = param.get("in").and_then(Value::as_str).unwrap_or("query");
                let required = param
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let schema = param
                    .get("schema")
                    .map(|s| convert_schema(doc, s, 0))
                    .unwrap_or_else(|| inline_schema(doc, param));

                match location {
                    // Swagger 2 body parameter becomes the request body.
                    "body" => {
                        operation.request_body = Some(RequestBody {
                            content_type: v2_consumes(doc, op)
                                .unwrap_or_else(|| "application/json".to_string()),
                            schema,
                        });
                    }
                    "formData" => form_fields.push((name.to_string(), schema)),
                    _ => operation.parameters.push(Parameter {
                        name: name.to_string(),
                        location: match location {
                            "path" => ParamLocation::Path,
                            "header" => ParamLocation::Header,
                            "cookie" => ParamLocation::Cookie,
                            _ => ParamLocation::Query,
                        },
                        required,
                        schema,
                    }),
                }
            }

            if !form_fields.is_empty() {
                operation.request_body = Some(RequestBody {
                    content_type: "application/x-www-form-urlencoded".to_string(),
                    schema: Schema::of(SchemaKind::Object(form_fields)),
                });
            }

            // OpenAPI 3 request body.
            if let Some(body) = op.get("requestBody") {
                let body = deref(doc, body);
                if let Some(content) = body.get("content").and_then(Value::as_object) {
                    if let Some((content_type, media)) = pick_content(content) {
                        let schema = media
                            .get("schema")
                            .map(|s| convert_schema(doc, s, 0))
                            .unwrap_or_else(Schema::unknown);
                        operation.request_body = Some(RequestBody {
                            content_type,
                            schema,
                        });
                    }
                }
            }

            operation.security = match op.get("security") {
                Some(own) => security_requirements(Some(own)),
                None => global_security.clone(),
            };

            operations.push(operation);
        }
    }

    Ok(operations)
}

/// Prefer JSON content when the operation advertises several types.
fn pick_content(content: &serde_json::Map<String, Value>) -> Option<(String, &Value)> {
    if let Some(media) = content.get("application/json") {
        return Some(("application/json".to_string(), media));
    }
    content
        .iter()
        .next()
        .map(|(ct, media)| (ct.clone(), media))
}

fn v2_consumes(doc: &Value, op: &Value) -> Option<String> {
    let consumes = op.get("consumes").or_else(|| doc.get("consumes"))?;
    consumes
        .as_array()?
        .first()
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Flatten `security` entries into scheme names in declaration order.
fn security_requirements(node: Option<&Value>) -> Vec<SecurityRequirement> {
    let mut requirements = Vec::new();
    let Some(entries) = node.and_then(Value::as_array) else {
        return requirements;
    };
    for entry in entries {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        for (scheme, scopes) in entry {
            requirements.push(SecurityRequirement {
                scheme: scheme.clone(),
                scopes: scopes
                    .as_array()
                    .map(|s| {
                        s.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
    }
    requirements
}

fn deref<'a>(root: &'a Value, node: &'a Value) -> &'a Value {
    match node.get("$ref").and_then(Value::as_str) {
        Some(r) => resolve_ref(root, r).unwrap_or(node),
        None => node,
    }
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

/// Swagger 2 inline parameter schema (type/format/items on the parameter).
fn inline_schema(root: &Value, param: &Value) -> Schema {
    convert_schema(root, param, 0)
}

/// Convert a schema node, following `$ref` at most [`MAX_SCHEMA_DEPTH`] deep.
pub fn convert_schema(root: &Value, node: &Value, ref_depth: usize) -> Schema {
    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        if ref_depth >= MAX_SCHEMA_DEPTH {
            return Schema::unknown();
        }
        return match resolve_ref(root, reference) {
            Some(target) => convert_schema(root, target, ref_depth + 1),
            None => Schema::unknown(),
        };
    }

    let declared_type = node.get("type").and_then(Value::as_str);
    let kind = match declared_type {
        Some("string") => SchemaKind::String,
        Some("integer") => SchemaKind::Integer,
        Some("number") => SchemaKind::Number,
        Some("boolean") => SchemaKind::Boolean,
        Some("array") => {
            let items = node.get("items").unwrap_or(&Value::Null);
            SchemaKind::Array(Box::new(convert_schema(root, items, ref_depth)))
        }
        _ => {
            if let Some(properties) = node.get("properties").and_then(Value::as_object) {
                SchemaKind::Object(
                    properties
                        .iter()
                        .map(|(name, prop)| {
                            (name.clone(), convert_schema(root, prop, ref_depth))
                        })
                        .collect(),
                )
            } else if declared_type == Some("object") {
                SchemaKind::Object(Vec::new())
            } else {
                SchemaKind::Unknown
            }
        }
    };

    let mut schema = Schema::of(kind);
    schema.format = node
        .get("format")
        .and_then(Value::as_str)
        .map(str::to_string);
    schema.example = node.get("example").cloned();
    schema.default = node.get("default").cloned();
    schema.enum_values = node
        .get("enum")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    schema
}
