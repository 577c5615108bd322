//! Normalized view of one API action, identical in shape across OpenAPI,
//! GraphQL, and WSDL after parsing.

use serde::{Deserialize, Serialize};

/// Simplified schema used for value generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaKind {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<Schema>),
    Object(Vec<(String, Schema)>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub kind: SchemaKind,
    pub format: Option<String>,
    pub example: Option<serde_json::Value>,
    pub default: Option<serde_json::Value>,
    pub enum_values: Vec<serde_json::Value>,
}

impl Schema {
    pub fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            format: None,
            example: None,
            default: None,
            enum_values: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaKind::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaKind::Integer)
    }

    pub fn unknown() -> Self {
        Self::of(SchemaKind::Unknown)
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Where a parameter is carried on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Schema,
}

/// Request body description advertised by the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub content_type: String,
    pub schema: Schema,
}

/// One security scheme the operation accepts, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRequirement {
    pub scheme: String,
    pub scopes: Vec<String>,
}

/// Root type a GraphQL field hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphqlOperationType {
    Query,
    Mutation,
}

/// Normalized API operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Option<String>,
    pub method: String,
    pub path: String,
    pub summary: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub security: Vec<SecurityRequirement>,
    /// Quoted SOAPAction for WSDL operations.
    pub soap_action: Option<String>,
    /// Root type for GraphQL operations.
    pub graphql_operation: Option<GraphqlOperationType>,
}

impl Operation {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            path: path.into(),
            summary: None,
            parameters: Vec::new(),
            request_body: None,
            security: Vec::new(),
            soap_action: None,
            graphql_operation: None,
        }
    }
}

/// Choose an operation by id first, falling back to (path, method)
/// case-insensitively.
pub fn resolve<'a>(
    operations: &'a [Operation],
    operation_id: Option<&str>,
    path: &str,
    method: &str,
) -> Option<&'a Operation> {
    if let Some(id) = operation_id {
        if let Some(op) = operations
            .iter()
            .find(|op| op.id.as_deref() == Some(id))
        {
            return Some(op);
        }
    }
    operations.iter().find(|op| {
        op.path.eq_ignore_ascii_case(path) && op.method.eq_ignore_ascii_case(method)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_operation_id() {
        let mut by_id = Operation::new("GET", "/pets");
        by_id.id = Some("listPets".to_string());
        let by_path = Operation::new("GET", "/pets");
        let ops = vec![by_path, by_id];

        let resolved = resolve(&ops, Some("listPets"), "/other", "POST").unwrap();
        assert_eq!(resolved.id.as_deref(), Some("listPets"));
    }

    #[test]
    fn test_resolve_falls_back_case_insensitively() {
        let ops = vec![Operation::new("POST", "/Pets/{id}")];
        let resolved = resolve(&ops, Some("missing"), "/pets/{ID}", "post");
        assert!(resolved.is_some());
    }

    #[test]
    fn test_resolve_none_when_no_match() {
        let ops = vec![Operation::new("GET", "/pets")];
        assert!(resolve(&ops, None, "/cats", "GET").is_none());
    }
}
