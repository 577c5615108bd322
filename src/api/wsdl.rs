//! WSDL parsing and SOAP envelope construction.
//!
//! A pull parse collects the target namespace, message parts, portType
//! operations, and binding SOAPActions, then flattens them into normalized
//! operations whose parameters are the input message parts.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use serde_json::Value;

use crate::api::operation::{Operation, ParamLocation, Parameter, RequestBody, Schema, SchemaKind};
use crate::error::ParseError;

/// Parsed WSDL document.
#[derive(Debug, Clone)]
pub struct WsdlDocument {
    pub target_namespace: Option<String>,
    pub operations: Vec<Operation>,
}

/// Parse a raw WSDL document.
pub fn parse(raw: &[u8]) -> Result<WsdlDocument, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|e| ParseError::InvalidDocument {
        kind: "wsdl",
        reason: format!("document is not UTF-8: {e}"),
    })?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut target_namespace = None;
    // message name -> [(part name, declared type)]
    let mut messages: HashMap<String, Vec<(String, String)>> = HashMap::new();
    // portType operation name -> input message name
    let mut port_operations: Vec<(String, Option<String>)> = Vec::new();
    // binding operation name -> soapAction
    let mut soap_actions: HashMap<String, String> = HashMap::new();

    let mut stack: Vec<String> = Vec::new();
    let mut current_message: Option<String> = None;
    let mut current_binding_op: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = local_name(e.name().as_ref());
                let attrs = collect_attributes(&e)?;
                handle_element(
                    &local,
                    &attrs,
                    &stack,
                    &mut target_namespace,
                    &mut messages,
                    &mut port_operations,
                    &mut soap_actions,
                    &mut current_message,
                    &mut current_binding_op,
                );
                stack.push(local);
            }
            Event::Empty(e) => {
                let local = local_name(e.name().as_ref());
                let attrs = collect_attributes(&e)?;
                handle_element(
                    &local,
                    &attrs,
                    &stack,
                    &mut target_namespace,
                    &mut messages,
                    &mut port_operations,
                    &mut soap_actions,
                    &mut current_message,
                    &mut current_binding_op,
                );
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if port_operations.is_empty() {
        return Err(ParseError::InvalidDocument {
            kind: "wsdl",
            reason: "no portType operations found".to_string(),
        });
    }

    let operations = port_operations
        .into_iter()
        .map(|(name, input)| {
            let mut operation = Operation::new("POST", "/");
            operation.id = Some(name.clone());
            operation.soap_action = soap_actions.get(&name).cloned();

            let parts = input
                .as_deref()
                .and_then(|m| messages.get(m))
                .cloned()
                .unwrap_or_default();
            for (part_name, declared) in &parts {
                operation.parameters.push(Parameter {
                    name: part_name.clone(),
                    location: ParamLocation::Body,
                    required: true,
                    schema: xsd_schema(declared),
                });
            }
            operation.request_body = Some(RequestBody {
                content_type: "text/xml; charset=utf-8".to_string(),
                schema: Schema::of(SchemaKind::Object(
                    parts
                        .iter()
                        .map(|(n, d)| (n.clone(), xsd_schema(d)))
                        .collect(),
                )),
            });
            operation
        })
        .collect();

    Ok(WsdlDocument {
        target_namespace,
        operations,
    })
}

#[allow(clippy::too_many_arguments)]
fn handle_element(
    local: &str,
    attrs: &HashMap<String, String>,
    stack: &[String],
    target_namespace: &mut Option<String>,
    messages: &mut HashMap<String, Vec<(String, String)>>,
    port_operations: &mut Vec<(String, Option<String>)>,
    soap_actions: &mut HashMap<String, String>,
    current_message: &mut Option<String>,
    current_binding_op: &mut Option<String>,
) {
    match local {
        "definitions" => {
            if let Some(tns) = attrs.get("targetNamespace") {
                *target_namespace = Some(tns.clone());
            }
        }
        "message" if !in_context(stack, "portType") => {
            if let Some(name) = attrs.get("name") {
                *current_message = Some(name.clone());
                messages.entry(name.clone()).or_default();
            }
        }
        "part" => {
            if let Some(message) = current_message.as_ref() {
                let name = attrs.get("name").cloned().unwrap_or_default();
                let declared = attrs
                    .get("type")
                    .or_else(|| attrs.get("element"))
                    .cloned()
                    .unwrap_or_default();
                messages
                    .entry(message.clone())
                    .or_default()
                    .push((name, declared));
            }
        }
        "operation" if in_context(stack, "portType") => {
            if let Some(name) = attrs.get("name") {
                port_operations.push((name.clone(), None));
            }
        }
        "input" if in_context(stack, "portType") => {
            if let Some((_, input)) = port_operations.last_mut() {
                if let Some(message) = attrs.get("message") {
                    *input = Some(strip_prefix(message));
                }
            }
        }
        "operation" if in_context(stack, "binding") => {
            // wsdl:operation carries the name; the nested soap:operation
            // carries soapAction.
            if let Some(name) = attrs.get("name") {
                *current_binding_op = Some(name.clone());
            } else if let Some(action) = attrs.get("soapAction") {
                if let Some(op) = current_binding_op.as_ref() {
                    soap_actions.insert(op.clone(), action.clone());
                }
            }
        }
        _ => {}
    }
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    strip_prefix(&name)
}

fn strip_prefix(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_string()
}

fn in_context(stack: &[String], element: &str) -> bool {
    stack.iter().any(|e| e == element)
}

fn collect_attributes(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<HashMap<String, String>, ParseError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::InvalidDocument {
            kind: "wsdl",
            reason: format!("bad attribute: {err}"),
        })?;
        let key = local_name(attr.key.as_ref());
        let value = String::from_utf8_lossy(&attr.value).to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Map an XSD type name onto the shared schema model.
fn xsd_schema(declared: &str) -> Schema {
    match strip_prefix(declared).as_str() {
        "int" | "integer" | "short" | "byte" => Schema::integer(),
        "long" => Schema::integer().with_format("int64"),
        "float" | "double" | "decimal" => Schema::of(SchemaKind::Number),
        "boolean" => Schema::of(SchemaKind::Boolean),
        _ => Schema::string(),
    }
}

/// Render a SOAP 1.1 envelope invoking the operation with the given parts.
pub fn soap_envelope(operation: &str, namespace: &str, parts: &[(String, Value)]) -> String {
    let mut body = String::new();
    for (name, value) in parts {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        body.push_str(&format!("<{name}>{}</{name}>", escape(&text)));
    }
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
            "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">",
            "<soap:Body><{op} xmlns=\"{ns}\">{body}</{op}></soap:Body>",
            "</soap:Envelope>"
        ),
        op = operation,
        ns = escape(namespace),
        body = body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
             xmlns:tns="http://tempuri.org/"
             targetNamespace="http://tempuri.org/">
  <message name="GetUserRequest">
    <part name="userId" type="xsd:int"/>
    <part name="verbose" type="xsd:boolean"/>
  </message>
  <message name="DeleteUserRequest">
    <part name="userId" type="xsd:long"/>
  </message>
  <portType name="UserPort">
    <operation name="GetUser">
      <input message="tns:GetUserRequest"/>
    </operation>
    <operation name="DeleteUser">
      <input message="tns:DeleteUserRequest"/>
    </operation>
  </portType>
  <binding name="UserBinding" type="tns:UserPort">
    <operation name="GetUser">
      <soap:operation soapAction="http://tempuri.org/GetUser"/>
    </operation>
    <operation name="DeleteUser">
      <soap:operation soapAction="http://tempuri.org/DeleteUser"/>
    </operation>
  </binding>
</definitions>"#;

    #[test]
    fn test_parse_operations_and_namespace() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            doc.target_namespace.as_deref(),
            Some("http://tempuri.org/")
        );
        assert_eq!(doc.operations.len(), 2);

        let get = doc
            .operations
            .iter()
            .find(|o| o.id.as_deref() == Some("GetUser"))
            .unwrap();
        assert_eq!(
            get.soap_action.as_deref(),
            Some("http://tempuri.org/GetUser")
        );
        assert_eq!(get.parameters.len(), 2);
        assert_eq!(get.parameters[0].name, "userId");
        assert_eq!(get.parameters[0].schema.kind, SchemaKind::Integer);
    }

    #[test]
    fn test_long_maps_to_int64() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        let delete = doc
            .operations
            .iter()
            .find(|o| o.id.as_deref() == Some("DeleteUser"))
            .unwrap();
        assert_eq!(delete.parameters[0].schema.format.as_deref(), Some("int64"));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = soap_envelope(
            "GetUser",
            "http://tempuri.org/",
            &[("userId".to_string(), serde_json::json!(7))],
        );
        assert!(envelope.starts_with("<?xml version=\"1.0\""));
        assert!(envelope.contains("<GetUser xmlns=\"http://tempuri.org/\">"));
        assert!(envelope.contains("<userId>7</userId>"));
        assert!(envelope.ends_with("</soap:Envelope>"));
    }

    #[test]
    fn test_envelope_escapes_values() {
        let envelope = soap_envelope(
            "Echo",
            "ns",
            &[("msg".to_string(), serde_json::json!("<script>"))],
        );
        assert!(envelope.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_rejects_document_without_operations() {
        let err = parse(b"<definitions targetNamespace=\"ns\"></definitions>").unwrap_err();
        assert!(matches!(err, ParseError::InvalidDocument { .. }));
    }
}
