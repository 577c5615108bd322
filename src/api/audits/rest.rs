//! REST/OpenAPI audits: method override and the mass-assignment heuristic.

use serde_json::Value;

use crate::api::audits::AuditContext;
use crate::api::operation::Operation;
use crate::api::request::SynthesizedRequest;
use crate::db::models::IssueKind;
use crate::error::ExecutorError;
use crate::scan::http::execute_and_record;

/// Field names whose acceptance hints at mass assignment.
const SENSITIVE_FIELDS: [&str; 4] = ["role", "is_admin", "admin", "verified"];

/// Run REST-specific audits for one operation. Returns issues created.
pub async fn run(
    ctx: &AuditContext<'_>,
    operation: &Operation,
    base: &SynthesizedRequest,
) -> Result<u32, ExecutorError> {
    let mut issues = 0;
    issues += method_override(ctx, base).await?;
    issues += mass_assignment(ctx, operation, base).await?;
    Ok(issues)
}

/// A DELETE that is rejected directly but accepted through an override
/// header or `_method` query means the front-end trusts the override.
async fn method_override(
    ctx: &AuditContext<'_>,
    base: &SynthesizedRequest,
) -> Result<u32, ExecutorError> {
    let mut direct = base.clone();
    direct.method = "DELETE".to_string();
    direct.body = None;
    let Ok(direct_response) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &direct,
    )
    .await
    else {
        return Ok(0);
    };

    if !matches!(direct_response.status, 401 | 403 | 405) {
        // DELETE is either open or handled; an override adds nothing.
        return Ok(0);
    }

    // Header variant.
    let mut via_header = base.clone();
    via_header.set_header("X-HTTP-Method-Override", "DELETE".to_string());
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &via_header,
    )
    .await
    {
        if (200..300).contains(&(executed.status as i32)) {
            let details = format!(
                "DELETE was rejected with {} directly but accepted via \
                 X-HTTP-Method-Override",
                direct_response.status
            );
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::HttpMethodOverrideEnabled,
                    details,
                    70,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                return Ok(1);
            }
        }
    }

    // Query variant.
    let mut via_query = base.clone();
    via_query.append_query("_method", "DELETE");
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &via_query,
    )
    .await
    {
        if (200..300).contains(&(executed.status as i32)) {
            let details = format!(
                "DELETE was rejected with {} directly but accepted via the \
                 _method query parameter",
                direct_response.status
            );
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::HttpMethodOverrideEnabled,
                    details,
                    70,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                return Ok(1);
            }
        }
    }

    Ok(0)
}

/// Echoed sensitive field names after injecting them into a JSON body.
/// Deliberately a low-confidence heuristic.
async fn mass_assignment(
    ctx: &AuditContext<'_>,
    operation: &Operation,
    base: &SynthesizedRequest,
) -> Result<u32, ExecutorError> {
    // Only JSON-bodied write operations are candidates.
    let has_json_body = operation
        .request_body
        .as_ref()
        .is_some_and(|b| b.content_type.contains("json"));
    if !has_json_body || base.body.is_none() {
        return Ok(0);
    }

    let Some(mut body) = base
        .body
        .as_ref()
        .and_then(|b| serde_json::from_slice::<Value>(b).ok())
    else {
        return Ok(0);
    };

    let injected: Vec<&str> = match body.as_object_mut() {
        Some(map) => {
            let names: Vec<&str> = SENSITIVE_FIELDS
                .iter()
                .filter(|name| !map.contains_key(**name))
                .copied()
                .collect();
            for name in &names {
                map.insert(name.to_string(), serde_json::json!(true));
            }
            names
        }
        None => return Ok(0),
    };
    if injected.is_empty() {
        return Ok(0);
    }

    let mut request = base.clone();
    request = request.with_body(serde_json::to_vec(&body)?, "application/json");

    let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &request,
    )
    .await
    else {
        return Ok(0);
    };

    if !(200..300).contains(&(executed.status as i32)) {
        return Ok(0);
    }
    let response = String::from_utf8_lossy(&executed.body);
    let echoed: Vec<&str> = injected
        .iter()
        .filter(|name| response.contains(*name))
        .copied()
        .collect();
    if echoed.is_empty() {
        return Ok(0);
    }

    let details = format!(
        "Injected fields {:?} were accepted and echoed back. This is an \
         echo heuristic, not proof of persistence.",
        echoed
    );
    if ctx
        .reporter
        .report(
            &executed.history,
            IssueKind::MassAssignment,
            details,
            55,
            Some(ctx.baselines),
        )
        .await?
        .is_some()
    {
        Ok(1)
    } else {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operation::{RequestBody, Schema, SchemaKind};
    use crate::db::Database;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{JobType, Scan, ScanJob, ScanMode};
    use crate::scan::IssueReporter;
    use crate::scan::http::build_client;
    use axum::Json;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::any;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Rejects DELETE but honors X-HTTP-Method-Override, and echoes any JSON
    /// body back.
    async fn override_server() -> std::net::SocketAddr {
        let app = axum::Router::new().route(
            "/items",
            any(|method: Method, headers: HeaderMap, body: Bytes| async move {
                if method == Method::DELETE {
                    return StatusCode::METHOD_NOT_ALLOWED.into_response();
                }
                if headers.contains_key("x-http-method-override") {
                    return (StatusCode::OK, "deleted").into_response();
                }
                let echoed: serde_json::Value =
                    serde_json::from_slice(&body).unwrap_or(serde_json::json!({}));
                Json(echoed).into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_method_override_and_mass_assignment() {
        let addr = override_server().await;
        let db = Arc::new(MemoryStore::new());
        let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart);
        let job = ScanJob::new(scan.id, JobType::ApiScan, serde_json::json!({}));
        let client = build_client(&scan.options);
        let reporter = IssueReporter::new(db.clone());
        let ctx = AuditContext {
            db: db.as_ref(),
            client: &client,
            scan: &scan,
            job: &job,
            endpoint_id: None,
            reporter: &reporter,
            baselines: &[],
        };

        let mut operation = Operation::new("POST", "/items");
        operation.request_body = Some(RequestBody {
            content_type: "application/json".to_string(),
            schema: Schema::of(SchemaKind::Object(vec![(
                "name".to_string(),
                Schema::string(),
            )])),
        });
        let base = SynthesizedRequest::new("POST", format!("http://{addr}/items"))
            .with_body(b"{\"name\":\"x\"}".to_vec(), "application/json");

        let issues = run(&ctx, &operation, &base).await.unwrap();
        assert_eq!(issues, 2);

        let stored = db.issues().await;
        assert!(
            stored
                .iter()
                .any(|i| i.code == "http_method_override_enabled")
        );
        let mass = stored
            .iter()
            .find(|i| i.code == "mass_assignment")
            .expect("mass assignment issue");
        // The heuristic never reports with high confidence.
        assert!(mass.confidence <= 60);
    }
}
