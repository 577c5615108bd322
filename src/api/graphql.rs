//! GraphQL schema parsing from an introspection response.
//!
//! Discovery stores the introspection JSON; each query and mutation field
//! becomes one normalized operation with its arguments as body parameters.

use serde_json::Value;

use crate::api::operation::{
    GraphqlOperationType, Operation, ParamLocation, Parameter, RequestBody, Schema, SchemaKind,
};
use crate::api::values::MAX_SCHEMA_DEPTH;
use crate::error::ParseError;

/// Parse a raw introspection response.
pub fn parse(raw: &[u8]) -> Result<Vec<Operation>, ParseError> {
    let doc: Value = serde_json::from_slice(raw)?;
    let schema = doc
        .pointer("/data/__schema")
        .or_else(|| doc.get("__schema"))
        .ok_or_else(|| ParseError::InvalidDocument {
            kind: "graphql",
            reason: "missing __schema in introspection response".to_string(),
        })?;

    let types = schema.get("types").and_then(Value::as_array);
    let mut operations = Vec::new();

    for (root_field, op_type) in [
        ("queryType", GraphqlOperationType::Query),
        ("mutationType", GraphqlOperationType::Mutation),
    ] {
        let Some(root_name) = schema.pointer(&format!("/{root_field}/name")).and_then(Value::as_str)
        else {
            continue;
        };
        let Some(root) = find_type(types, root_name) else {
            continue;
        };
        let Some(fields) = root.get("fields").and_then(Value::as_array) else {
            continue;
        };

        for field in fields {
            let Some(name) = field.get("name").and_then(Value::as_str) else {
                continue;
            };
            let mut operation = Operation::new("POST", "/graphql");
            operation.id = Some(name.to_string());
            operation.summary = field
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            operation.graphql_operation = Some(op_type);
            operation.request_body = Some(RequestBody {
                content_type: "application/json".to_string(),
                schema: Schema::unknown(),
            });

            if let Some(args) = field.get("args").and_then(Value::as_array) {
                for arg in args {
                    let Some(arg_name) = arg.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let (schema, required) =
                        type_to_schema(types, arg.get("type").unwrap_or(&Value::Null), 0);
                    operation.parameters.push(Parameter {
                        name: arg_name.to_string(),
                        location: ParamLocation::Body,
                        required,
                        schema,
                    });
                }
            }

            operations.push(operation);
        }
    }

    if operations.is_empty() {
        return Err(ParseError::InvalidDocument {
            kind: "graphql",
            reason: "schema declares no query or mutation fields".to_string(),
        });
    }
    Ok(operations)
}

fn find_type<'a>(types: Option<&'a Vec<Value>>, name: &str) -> Option<&'a Value> {
    types?
        .iter()
        .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
}

/// Map a GraphQL type reference onto the shared schema model; returns the
/// schema and whether the outermost type was NON_NULL.
fn type_to_schema(types: Option<&Vec<Value>>, node: &Value, depth: usize) -> (Schema, bool) {
    let kind = node.get("kind").and_then(Value::as_str).unwrap_or("");
    match kind {
        "NON_NULL" => {
            let (schema, _) =
                type_to_schema(types, node.get("ofType").unwrap_or(&Value::Null), depth);
            (schema, true)
        }
        "LIST" => {
            let (inner, _) =
                type_to_schema(types, node.get("ofType").unwrap_or(&Value::Null), depth);
            (Schema::of(SchemaKind::Array(Box::new(inner))), false)
        }
        "SCALAR" => {
            let name = node.get("name").and_then(Value::as_str).unwrap_or("");
            let schema = match name {
                "Int" => Schema::integer(),
                "Float" => Schema::of(SchemaKind::Number),
                "Boolean" => Schema::of(SchemaKind::Boolean),
                "String" | "ID" => Schema::string(),
                _ => Schema::string(),
            };
            (schema, false)
        }
        "ENUM" => {
            let name = node.get("name").and_then(Value::as_str).unwrap_or("");
            let mut schema = Schema::string();
            if let Some(def) = find_type(types, name) {
                schema.enum_values = def
                    .get("enumValues")
                    .and_then(Value::as_array)
                    .map(|vs| {
                        vs.iter()
                            .filter_map(|v| v.get("name").cloned())
                            .collect()
                    })
                    .unwrap_or_default();
            }
            (schema, false)
        }
        "INPUT_OBJECT" => {
            if depth >= MAX_SCHEMA_DEPTH {
                return (Schema::unknown(), false);
            }
            let name = node.get("name").and_then(Value::as_str).unwrap_or("");
            let fields = find_type(types, name)
                .and_then(|def| def.get("inputFields"))
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(|f| {
                            let field_name = f.get("name")?.as_str()?.to_string();
                            let (schema, _) = type_to_schema(
                                types,
                                f.get("type").unwrap_or(&Value::Null),
                                depth + 1,
                            );
                            Some((field_name, schema))
                        })
                        .collect()
                })
                .unwrap_or_default();
            (Schema::of(SchemaKind::Object(fields)), false)
        }
        _ => (Schema::unknown(), false),
    }
}

/// Render a GraphQL document invoking the operation with the given argument
/// values.
pub fn build_query(operation: &Operation, values: &[(String, Value)]) -> String {
    let name = operation.id.as_deref().unwrap_or("__typename");
    let root = match operation.graphql_operation {
        Some(GraphqlOperationType::Mutation) => "mutation",
        _ => "query",
    };

    if values.is_empty() {
        return format!("{root} {{ {name} }}");
    }

    let args: Vec<String> = values
        .iter()
        .map(|(arg, value)| format!("{arg}: {}", gql_literal(value)))
        .collect();
    format!("{root} {{ {name}({}) }}", args.join(", "))
}

/// GraphQL input literal for a JSON value. Object keys are unquoted.
fn gql_literal(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}: {}", gql_literal(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(gql_literal).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn introspection() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "data": {
                "__schema": {
                    "queryType": {"name": "Query"},
                    "mutationType": {"name": "Mutation"},
                    "types": [
                        {
                            "name": "Query",
                            "kind": "OBJECT",
                            "fields": [
                                {
                                    "name": "user",
                                    "args": [
                                        {"name": "id", "type": {
                                            "kind": "NON_NULL",
                                            "ofType": {"kind": "SCALAR", "name": "ID"}
                                        }}
                                    ]
                                },
                                {"name": "users", "args": []}
                            ]
                        },
                        {
                            "name": "Mutation",
                            "kind": "OBJECT",
                            "fields": [
                                {
                                    "name": "createUser",
                                    "args": [
                                        {"name": "input", "type": {
                                            "kind": "INPUT_OBJECT", "name": "UserInput"
                                        }}
                                    ]
                                }
                            ]
                        },
                        {
                            "name": "UserInput",
                            "kind": "INPUT_OBJECT",
                            "inputFields": [
                                {"name": "name", "type": {"kind": "SCALAR", "name": "String"}},
                                {"name": "age", "type": {"kind": "SCALAR", "name": "Int"}}
                            ]
                        }
                    ]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_queries_and_mutations() {
        let ops = parse(&introspection()).unwrap();
        assert_eq!(ops.len(), 3);

        let user = ops.iter().find(|o| o.id.as_deref() == Some("user")).unwrap();
        assert_eq!(user.graphql_operation, Some(GraphqlOperationType::Query));
        assert_eq!(user.parameters.len(), 1);
        assert!(user.parameters[0].required);
        assert_eq!(user.parameters[0].location, ParamLocation::Body);

        let create = ops
            .iter()
            .find(|o| o.id.as_deref() == Some("createUser"))
            .unwrap();
        assert_eq!(
            create.graphql_operation,
            Some(GraphqlOperationType::Mutation)
        );
        assert!(matches!(
            &create.parameters[0].schema.kind,
            SchemaKind::Object(fields) if fields.len() == 2
        ));
    }

    #[test]
    fn test_build_query_without_args() {
        let ops = parse(&introspection()).unwrap();
        let users = ops.iter().find(|o| o.id.as_deref() == Some("users")).unwrap();
        assert_eq!(build_query(users, &[]), "query { users }");
    }

    #[test]
    fn test_build_mutation_with_object_arg() {
        let ops = parse(&introspection()).unwrap();
        let create = ops
            .iter()
            .find(|o| o.id.as_deref() == Some("createUser"))
            .unwrap();
        let query = build_query(
            create,
            &[(
                "input".to_string(),
                json!({"name": "string_value", "age": 1}),
            )],
        );
        assert!(query.starts_with("mutation { createUser("));
        assert!(query.contains("name: \"string_value\""));
        assert!(query.contains("age: 1"));
    }

    #[test]
    fn test_rejects_non_introspection_document() {
        let err = parse(b"{\"data\": {}}").unwrap_err();
        assert!(matches!(err, ParseError::InvalidDocument { .. }));
    }
}
