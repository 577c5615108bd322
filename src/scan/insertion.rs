//! Insertion points: the fields of a recorded request where attack payloads
//! may be substituted.

use serde_json::Value;

use crate::db::models::History;

/// Where an insertion point lives on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPointKind {
    QueryParam,
    BodyJson,
    BodyForm,
    Header,
    Cookie,
    PathSegment,
    WsMessageField,
}

/// One substitutable field and its original value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InsertionPoint {
    pub name: String,
    pub kind: InsertionPointKind,
    pub original_value: String,
}

/// Extract insertion points from a stored request: query parameters, body
/// fields by content type, headers, and cookies.
pub fn extract_from_history(history: &History) -> Vec<InsertionPoint> {
    let mut points = Vec::new();

    if let Ok(url) = url::Url::parse(&history.url) {
        for (name, value) in url.query_pairs() {
            points.push(InsertionPoint {
                name: name.to_string(),
                kind: InsertionPointKind::QueryParam,
                original_value: value.to_string(),
            });
        }
    }

    let request = String::from_utf8_lossy(&history.request_raw);
    let (head, body) = match request.split_once("\r\n\r\n") {
        Some((head, body)) => (head, body),
        None => (request.as_ref(), ""),
    };

    let mut content_type = String::new();
    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-type") {
            content_type = value.to_ascii_lowercase();
        }
        if name.eq_ignore_ascii_case("cookie") {
            for pair in value.split(';') {
                if let Some((cookie, cookie_value)) = pair.split_once('=') {
                    points.push(InsertionPoint {
                        name: cookie.trim().to_string(),
                        kind: InsertionPointKind::Cookie,
                        original_value: cookie_value.trim().to_string(),
                    });
                }
            }
            continue;
        }
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        points.push(InsertionPoint {
            name: name.to_string(),
            kind: InsertionPointKind::Header,
            original_value: value.to_string(),
        });
    }

    if !body.is_empty() {
        if content_type.contains("json") {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                collect_json_points(&value, "", &mut points);
            }
        } else if content_type.contains("x-www-form-urlencoded") {
            for pair in body.split('&') {
                if let Some((name, value)) = pair.split_once('=') {
                    points.push(InsertionPoint {
                        name: urlencoding::decode(name)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| name.to_string()),
                        kind: InsertionPointKind::BodyForm,
                        original_value: urlencoding::decode(value)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| value.to_string()),
                    });
                }
            }
        }
    }

    points
}

/// Extract insertion points from one WebSocket message payload: JSON fields
/// when the payload parses, the whole payload otherwise.
pub fn extract_from_ws_payload(payload: &str) -> Vec<InsertionPoint> {
    let mut points = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        collect_json_points(&value, "", &mut points);
        for point in &mut points {
            point.kind = InsertionPointKind::WsMessageField;
        }
    }
    if points.is_empty() {
        points.push(InsertionPoint {
            name: "message".to_string(),
            kind: InsertionPointKind::WsMessageField,
            original_value: payload.to_string(),
        });
    }
    points
}

fn collect_json_points(value: &Value, prefix: &str, points: &mut Vec<InsertionPoint>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match inner {
                    Value::Object(_) | Value::Array(_) => {
                        collect_json_points(inner, &name, points)
                    }
                    leaf => points.push(InsertionPoint {
                        name,
                        kind: InsertionPointKind::BodyJson,
                        original_value: match leaf {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    }),
                }
            }
        }
        Value::Array(items) => {
            for (idx, inner) in items.iter().enumerate() {
                collect_json_points(inner, &format!("{prefix}[{idx}]"), points);
            }
        }
        _ => {}
    }
}
