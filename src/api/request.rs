//! Request synthesis: turn a normalized operation into a concrete HTTP
//! request with realistic values, in the content type the operation
//! advertises.

use serde_json::Value;

use crate::api::graphql;
use crate::api::operation::{Operation, ParamLocation, Parameter};
use crate::api::values::{GeneratedValue, ValueStrategy, default_value};
use crate::api::wsdl;
use crate::db::models::{ApiDefinition, ApiDefinitionKind, RequestVariation};
use crate::error::ParseError;

/// A fully materialized request, ready to execute or store as a variation.
#[derive(Debug, Clone)]
pub struct SynthesizedRequest {
    pub label: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl SynthesizedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: "base".to_string(),
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            content_type: None,
        }
    }

    /// Load a stored variation directly, skipping synthesis.
    pub fn from_variation(variation: &RequestVariation) -> Self {
        Self {
            label: variation.label.clone(),
            method: variation.method.clone(),
            url: variation.url.clone(),
            headers: variation.headers.clone(),
            body: variation.body.as_ref().map(|b| b.as_bytes().to_vec()),
            content_type: variation.content_type.clone(),
        }
    }

    /// Replace a header, or append it when absent. Names compare
    /// case-insensitively.
    pub fn set_header(&mut self, name: &str, value: String) {
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append a query pair to the URL.
    pub fn append_query(&mut self, name: &str, value: &str) {
        if let Ok(mut url) = url::Url::parse(&self.url) {
            url.query_pairs_mut().append_pair(name, value);
            self.url = url.to_string();
        }
    }

    /// Merge a cookie into the Cookie header.
    pub fn append_cookie(&mut self, name: &str, value: &str) {
        let pair = format!("{name}={value}");
        match self.header("Cookie") {
            Some(existing) => {
                let merged = format!("{existing}; {pair}");
                self.set_header("Cookie", merged);
            }
            None => self.set_header("Cookie", pair),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.set_header("Content-Type", content_type.clone());
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }

    /// Key used for variation dedup: URL, sorted headers, body.
    pub fn dedup_key(&self) -> (String, String, Option<Vec<u8>>) {
        let mut headers: Vec<String> = self
            .headers
            .iter()
            .map(|(n, v)| format!("{}:{v}", n.to_ascii_lowercase()))
            .collect();
        headers.sort();
        (self.url.clone(), headers.join("\n"), self.body.clone())
    }

    /// Build the reqwest request.
    pub fn to_reqwest(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let method = reqwest::Method::from_bytes(self.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = client.request(method, self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    /// Textual HTTP/1.1 form of the request, stored on the history record.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let (host, path_and_query) = match url::Url::parse(&self.url) {
            Ok(url) => {
                let mut target = url.path().to_string();
                if let Some(query) = url.query() {
                    target.push('?');
                    target.push_str(query);
                }
                (url.host_str().unwrap_or_default().to_string(), target)
            }
            Err(_) => (String::new(), self.url.clone()),
        };

        let mut raw = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, path_and_query, host);
        for (name, value) in &self.headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        let mut bytes = raw.into_bytes();
        if let Some(body) = &self.body {
            bytes.extend_from_slice(body);
        }
        bytes
    }
}

/// Drop variations whose (URL, sorted headers, body) already appeared.
pub fn dedup_variations(variations: Vec<SynthesizedRequest>) -> Vec<SynthesizedRequest> {
    let mut seen = std::collections::HashSet::new();
    variations
        .into_iter()
        .filter(|v| seen.insert(v.dedup_key()))
        .collect()
}

/// Synthesize the base request for an operation with default values.
pub fn synthesize(
    operation: &Operation,
    definition: &ApiDefinition,
) -> Result<SynthesizedRequest, ParseError> {
    let defaults: Vec<(String, Value)> = operation
        .parameters
        .iter()
        .map(|p| (p.name.clone(), default_value(&p.schema, 0)))
        .collect();
    build_with_values(operation, definition, &defaults, "base")
}

/// Schema-based variations: one parameter swapped to an interesting value at
/// a time, deduplicated against the base.
pub fn schema_variations(
    operation: &Operation,
    definition: &ApiDefinition,
) -> Result<Vec<SynthesizedRequest>, ParseError> {
    let defaults: Vec<(String, Value)> = operation
        .parameters
        .iter()
        .map(|p| (p.name.clone(), default_value(&p.schema, 0)))
        .collect();

    let mut variations = vec![build_with_values(operation, definition, &defaults, "base")?];
    for (idx, parameter) in operation.parameters.iter().enumerate() {
        for GeneratedValue { value, description } in
            ValueStrategy::Interesting.values(&parameter.schema)
        {
            let mut values = defaults.clone();
            values[idx].1 = value;
            let label = format!("{}: {}", parameter.name, description);
            variations.push(build_with_values(operation, definition, &values, &label)?);
        }
    }
    Ok(dedup_variations(variations))
}

fn build_with_values(
    operation: &Operation,
    definition: &ApiDefinition,
    values: &[(String, Value)],
    label: &str,
) -> Result<SynthesizedRequest, ParseError> {
    let value_of = |name: &str| -> Value {
        values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    };

    // Path substitution.
    let mut path = operation.path.clone();
    for parameter in params_in(operation, ParamLocation::Path) {
        let value = plain_string(&value_of(&parameter.name));
        path = path.replace(&format!("{{{}}}", parameter.name), &value);
    }

    let base = definition.base_url.trim_end_matches('/');
    let url = if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    };

    let mut request = SynthesizedRequest::new(operation.method.clone(), url);
    request.label = label.to_string();

    for parameter in params_in(operation, ParamLocation::Query) {
        request.append_query(&parameter.name, &plain_string(&value_of(&parameter.name)));
    }
    for parameter in params_in(operation, ParamLocation::Header) {
        request.set_header(&parameter.name, plain_string(&value_of(&parameter.name)));
    }
    for parameter in params_in(operation, ParamLocation::Cookie) {
        request.append_cookie(&parameter.name, &plain_string(&value_of(&parameter.name)));
    }

    let body_values: Vec<(String, Value)> = params_in(operation, ParamLocation::Body)
        .map(|p| (p.name.clone(), value_of(&p.name)))
        .collect();

    match definition.kind {
        ApiDefinitionKind::GraphQl => {
            let query = graphql::build_query(operation, &body_values);
            let envelope = serde_json::to_vec(&serde_json::json!({ "query": query }))?;
            request = request.with_body(envelope, "application/json");
        }
        ApiDefinitionKind::Wsdl => {
            let namespace = definition
                .target_namespace
                .clone()
                .unwrap_or_else(|| "http://tempuri.org/".to_string());
            let name = operation.id.clone().unwrap_or_default();
            let envelope = wsdl::soap_envelope(&name, &namespace, &body_values);
            let content_type = operation
                .request_body
                .as_ref()
                .map(|b| b.content_type.clone())
                .unwrap_or_else(|| "text/xml; charset=utf-8".to_string());
            request = request.with_body(envelope.into_bytes(), content_type);
            if let Some(action) = &operation.soap_action {
                request.set_header("SOAPAction", format!("\"{action}\""));
            }
        }
        ApiDefinitionKind::OpenApi => {
            if let Some(body) = &operation.request_body {
                let value = default_value(&body.schema, 0);
                if body.content_type.starts_with("application/x-www-form-urlencoded") {
                    request = request.with_body(
                        form_encode(&value).into_bytes(),
                        body.content_type.clone(),
                    );
                } else {
                    request = request
                        .with_body(serde_json::to_vec(&value)?, body.content_type.clone());
                }
            }
        }
    }

    Ok(request)
}

fn params_in(operation: &Operation, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
    operation
        .parameters
        .iter()
        .filter(move |p| p.location == location)
}

/// Value rendered without JSON quoting, for paths/queries/headers.
fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn form_encode(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    urlencoding::encode(k),
                    urlencoding::encode(&plain_string(v))
                )
            })
            .collect::<Vec<_>>()
            .join("&"),
        other => urlencoding::encode(&plain_string(other)).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operation::{RequestBody, Schema, SchemaKind};
    use serde_json::json;
    use uuid::Uuid;

    fn definition(kind: ApiDefinitionKind) -> ApiDefinition {
        ApiDefinition {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            kind,
            base_url: "http://api.example.com".to_string(),
            source_url: "http://api.example.com/spec".to_string(),
            raw: Vec::new(),
            target_namespace: Some("http://tempuri.org/".to_string()),
        }
    }

    fn pet_operation() -> Operation {
        let mut op = Operation::new("GET", "/pets/{petId}");
        op.parameters.push(Parameter {
            name: "petId".to_string(),
            location: ParamLocation::Path,
            required: true,
            schema: Schema::integer(),
        });
        op.parameters.push(Parameter {
            name: "verbose".to_string(),
            location: ParamLocation::Query,
            required: false,
            schema: Schema::of(SchemaKind::Boolean),
        });
        op
    }

    #[test]
    fn test_path_substitution_and_query() {
        let req = synthesize(&pet_operation(), &definition(ApiDefinitionKind::OpenApi)).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.url.starts_with("http://api.example.com/pets/1"));
        assert!(req.url.contains("verbose=true"));
    }

    #[test]
    fn test_json_body_from_schema() {
        let mut op = Operation::new("POST", "/pets");
        op.request_body = Some(RequestBody {
            content_type: "application/json".to_string(),
            schema: Schema::of(SchemaKind::Object(vec![(
                "name".to_string(),
                Schema::string(),
            )])),
        });
        let req = synthesize(&op, &definition(ApiDefinitionKind::OpenApi)).unwrap();
        assert_eq!(req.content_type.as_deref(), Some("application/json"));
        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "string_value"}));
    }

    #[test]
    fn test_form_body_encoding() {
        let mut op = Operation::new("POST", "/login");
        op.request_body = Some(RequestBody {
            content_type: "application/x-www-form-urlencoded".to_string(),
            schema: Schema::of(SchemaKind::Object(vec![
                ("user".to_string(), Schema::string()),
                ("age".to_string(), Schema::integer()),
            ])),
        });
        let req = synthesize(&op, &definition(ApiDefinitionKind::OpenApi)).unwrap();
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(body.contains("user=string_value"));
        assert!(body.contains("age=1"));
    }

    #[test]
    fn test_graphql_envelope() {
        let mut op = Operation::new("POST", "/graphql");
        op.id = Some("users".to_string());
        op.graphql_operation = Some(crate::api::operation::GraphqlOperationType::Query);
        let req = synthesize(&op, &definition(ApiDefinitionKind::GraphQl)).unwrap();
        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"query": "query { users }"}));
    }

    #[test]
    fn test_soap_envelope_and_action_header() {
        let mut op = Operation::new("POST", "/");
        op.id = Some("GetUser".to_string());
        op.soap_action = Some("http://tempuri.org/GetUser".to_string());
        op.parameters.push(Parameter {
            name: "userId".to_string(),
            location: ParamLocation::Body,
            required: true,
            schema: Schema::integer(),
        });
        let req = synthesize(&op, &definition(ApiDefinitionKind::Wsdl)).unwrap();
        assert_eq!(
            req.header("SOAPAction"),
            Some("\"http://tempuri.org/GetUser\"")
        );
        assert_eq!(req.content_type.as_deref(), Some("text/xml; charset=utf-8"));
        let body = String::from_utf8(req.body.unwrap()).unwrap();
        assert!(body.contains("<userId>1</userId>"));
    }

    #[test]
    fn test_schema_variations_dedup() {
        let mut op = Operation::new("GET", "/items");
        op.parameters.push(Parameter {
            name: "flag".to_string(),
            location: ParamLocation::Query,
            required: false,
            schema: Schema::of(SchemaKind::Boolean),
        });
        let variations =
            schema_variations(&op, &definition(ApiDefinitionKind::OpenApi)).unwrap();
        // Boolean interesting values: default(true), true, false. The
        // duplicate trues collapse with the base.
        let urls: Vec<&str> = variations.iter().map(|v| v.url.as_str()).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().any(|u| u.contains("flag=true")));
        assert!(urls.iter().any(|u| u.contains("flag=false")));
    }

    #[test]
    fn test_int64_boundaries_reach_variations() {
        let mut op = Operation::new("GET", "/items");
        op.parameters.push(Parameter {
            name: "id".to_string(),
            location: ParamLocation::Query,
            required: true,
            schema: Schema::integer().with_format("int64"),
        });
        let variations =
            schema_variations(&op, &definition(ApiDefinitionKind::OpenApi)).unwrap();
        assert!(
            variations
                .iter()
                .any(|v| v.url.contains(&i64::MAX.to_string()))
        );
    }

    #[test]
    fn test_raw_bytes_shape() {
        let mut req = SynthesizedRequest::new("POST", "http://api.example.com/pets?x=1");
        req = req.with_body(b"{}".to_vec(), "application/json");
        let raw = String::from_utf8(req.raw_bytes()).unwrap();
        assert!(raw.starts_with("POST /pets?x=1 HTTP/1.1\r\nHost: api.example.com\r\n"));
        assert!(raw.contains("Content-Type: application/json\r\n"));
        assert!(raw.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn test_variation_round_trip() {
        let variation = RequestVariation {
            label: "stored".to_string(),
            method: "PUT".to_string(),
            url: "http://api.example.com/x".to_string(),
            headers: vec![("X-Test".to_string(), "1".to_string())],
            body: Some("{}".to_string()),
            content_type: Some("application/json".to_string()),
        };
        let req = SynthesizedRequest::from_variation(&variation);
        assert_eq!(req.label, "stored");
        assert_eq!(req.header("X-Test"), Some("1"));
        assert_eq!(req.body.as_deref(), Some(b"{}".as_ref()));
    }
}
