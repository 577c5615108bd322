//! Shared HTTP plumbing: per-scan tuned clients and the
//! execute-and-record discipline that writes one history per round-trip.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::api::request::SynthesizedRequest;
use crate::db::Database;
use crate::db::models::{History, Scan, ScanOptions};
use crate::error::ExecutorError;

/// One tuned `reqwest::Client` per scan, shared by all of its workers.
#[derive(Default)]
pub struct ClientPool {
    clients: RwLock<HashMap<Uuid, reqwest::Client>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_scan(&self, scan: &Scan) -> reqwest::Client {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&scan.id) {
                return client.clone();
            }
        }
        let mut clients = self.clients.write().await;
        clients
            .entry(scan.id)
            .or_insert_with(|| build_client(&scan.options))
            .clone()
    }

    pub async fn remove(&self, scan_id: Uuid) {
        self.clients.write().await.remove(&scan_id);
    }
}

/// Scanner client: invalid certs accepted, redirects not followed (the raw
/// response is the evidence).
pub fn build_client(options: &ScanOptions) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(options.request_timeout_secs))
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(options.pool_idle_timeout_secs));
    builder = if options.keep_alives {
        builder.pool_max_idle_per_host(options.pool_max_idle_per_host)
    } else {
        builder.pool_max_idle_per_host(0)
    };
    builder.build().expect("Failed to create scan HTTP client")
}

/// Result of one recorded round-trip.
pub struct ExecutedRequest {
    pub history: History,
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
}

/// Execute a synthesized request and write exactly one history record.
pub async fn execute_and_record(
    db: &dyn Database,
    client: &reqwest::Client,
    scan: &Scan,
    scan_job_id: Option<Uuid>,
    endpoint_id: Option<Uuid>,
    request: &SynthesizedRequest,
) -> Result<ExecutedRequest, ExecutorError> {
    let response = request.to_reqwest(client).send().await?;
    let status = response.status().as_u16();

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut response_head = format!("HTTP/1.1 {}\r\n", response.status());
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or_default().to_string();
        response_head.push_str(&format!("{name}: {value}\r\n"));
        headers.push((name.to_string(), value));
    }
    response_head.push_str("\r\n");

    let content_type = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let body = response.bytes().await?.to_vec();
    let mut response_raw = response_head.into_bytes();
    response_raw.extend_from_slice(&body);

    let mut history = History::record(
        scan.workspace_id,
        Some(scan.id),
        scan_job_id,
        request.method.clone(),
        request.url.clone(),
        status,
        request.raw_bytes(),
        response_raw,
        &body,
        content_type.clone(),
    );
    if let Some(endpoint_id) = endpoint_id {
        history = history.with_endpoint(endpoint_id);
    }
    db.create_history(&history).await?;

    Ok(ExecutedRequest {
        history,
        status,
        body,
        content_type,
        headers,
    })
}

/// Whether a response content type is renderable in a browser, for
/// client-side audit gating.
pub fn is_renderable(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("html") || ct.contains("xhtml") || ct.contains("svg") || ct.contains("xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::ScanMode;
    use axum::routing::get;

    #[test]
    fn test_renderable_content_types() {
        assert!(is_renderable("text/html; charset=utf-8"));
        assert!(is_renderable("image/svg+xml"));
        assert!(!is_renderable("application/json"));
        assert!(!is_renderable("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_execute_and_record_writes_one_history() {
        let app = axum::Router::new().route(
            "/hello",
            get(|| async { ([("content-type", "text/plain")], "hi") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let db = MemoryStore::new();
        let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart);
        let client = build_client(&scan.options);
        let request = SynthesizedRequest::new("GET", format!("http://{addr}/hello"));

        let executed = execute_and_record(&db, &client, &scan, None, None, &request)
            .await
            .unwrap();
        assert_eq!(executed.status, 200);
        assert_eq!(executed.body, b"hi");

        let histories = db.histories().await;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].status_code, 200);
        assert_eq!(histories[0].response_body(), b"hi");
        assert!(histories[0].content_type.starts_with("text/plain"));
    }
}
