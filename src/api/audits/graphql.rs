//! GraphQL audits: introspection, batching, field suggestions, depth limit.

use crate::api::audits::AuditContext;
use crate::api::request::SynthesizedRequest;
use crate::db::models::IssueKind;
use crate::error::ExecutorError;
use crate::scan::http::execute_and_record;

const INTROSPECTION_QUERY: &str = r#"{"query":"{__schema{types{name}}}"}"#;
const BATCH_QUERY: &str = r#"[{"query":"{__typename}"},{"query":"{__typename}"}]"#;
const TYPO_QUERY: &str = r#"{"query":"{__typenam}"}"#;

/// A query nested far past any sane depth limit.
fn deep_query() -> String {
    let mut inner = "name".to_string();
    for _ in 0..12 {
        inner = format!("ofType{{{inner}}}");
    }
    let mut query = String::from("{__schema{types{fields{type{");
    query.push_str(&inner);
    query.push_str("}}}}}");
    serde_json::json!({ "query": query }).to_string()
}

/// Run all GraphQL audits against the endpoint URL. Returns the number of
/// issues created.
pub async fn run(ctx: &AuditContext<'_>, endpoint_url: &str) -> Result<u32, ExecutorError> {
    let mut issues = 0;

    // Introspection: full schema disclosure.
    let request = graphql_post(endpoint_url, INTROSPECTION_QUERY);
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &request,
    )
    .await
    {
        let body = String::from_utf8_lossy(&executed.body);
        if executed.status == 200 && body.contains("__schema") && body.contains("types") {
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::GraphqlIntrospectionEnabled,
                    "The introspection query returned the full schema".to_string(),
                    95,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                issues += 1;
            }
        }
    }

    // Batching: arrays of operations accepted in one request.
    let request = graphql_post(endpoint_url, BATCH_QUERY);
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &request,
    )
    .await
    {
        let body = String::from_utf8_lossy(&executed.body);
        if executed.status == 200 && body.trim_start().starts_with('[') {
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::GraphqlBatchingEnabled,
                    "A batched query array was answered element-wise".to_string(),
                    70,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                issues += 1;
            }
        }
    }

    // Field suggestions: typo'd field names leak schema details.
    let request = graphql_post(endpoint_url, TYPO_QUERY);
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &request,
    )
    .await
    {
        let body = String::from_utf8_lossy(&executed.body);
        if body.contains("Did you mean") {
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::GraphqlFieldSuggestionsEnabled,
                    "Error responses suggest valid field names".to_string(),
                    80,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                issues += 1;
            }
        }
    }

    // Depth limit: a deeply nested query that should be rejected.
    let request = graphql_post(endpoint_url, &deep_query());
    if let Ok(executed) = execute_and_record(
        ctx.db,
        ctx.client,
        ctx.scan,
        Some(ctx.job.id),
        ctx.endpoint_id,
        &request,
    )
    .await
    {
        let body = String::from_utf8_lossy(&executed.body);
        if executed.status == 200 && !body.contains("error") {
            if ctx
                .reporter
                .report(
                    &executed.history,
                    IssueKind::GraphqlDepthLimitMissing,
                    "A 12-level nested query executed without a depth error".to_string(),
                    65,
                    Some(ctx.baselines),
                )
                .await?
                .is_some()
            {
                issues += 1;
            }
        }
    }

    Ok(issues)
}

fn graphql_post(url: &str, body: &str) -> SynthesizedRequest {
    SynthesizedRequest::new("POST", url)
        .with_body(body.as_bytes().to_vec(), "application/json")
}
