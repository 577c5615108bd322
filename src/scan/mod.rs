//! Active scanning core: audit categories, the issue reporter, and the
//! per-history active scan entrypoint.
//!
//! Payload generation is injected; the scanner owns substitution, execution,
//! observation, and reporting.

pub mod http;
pub mod insertion;
pub mod passive;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api::request::SynthesizedRequest;
use crate::control::ScanControl;
use crate::db::Database;
use crate::db::models::{
    Fingerprint, History, Issue, IssueKind, Scan, ScanJob, ScanMode,
};
use crate::error::{DatabaseError, ExecutorError};
use crate::scan::http::{ClientPool, execute_and_record, is_renderable};
use crate::scan::insertion::{InsertionPoint, InsertionPointKind, extract_from_history};
use crate::scan::passive::PassivePipeline;
use crate::smuggling::detect::SmugglingScanner;

/// Which check families run in an active scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuditCategories {
    pub passive: bool,
    pub server_side: bool,
    pub client_side: bool,
}

impl Default for AuditCategories {
    fn default() -> Self {
        Self {
            passive: true,
            server_side: true,
            client_side: true,
        }
    }
}

/// Category an injected generator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    Passive,
    ServerSide,
    ClientSide,
}

/// One injectable attack payload.
#[derive(Debug, Clone)]
pub struct AttackPayload {
    pub value: String,
    pub description: String,
    pub issue: IssueKind,
    /// Regex matched against the response body; a hit is the finding signal.
    pub evidence_pattern: Option<String>,
    pub confidence: u8,
}

/// Payload generators are injected collaborators; the engine never invents
/// payloads.
pub trait PayloadGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> AuditCategory;
    fn payloads(&self, mode: ScanMode) -> Vec<AttackPayload>;
}

/// An out-of-band interaction observed by the oracle collaborator.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub probe_id: String,
    pub protocol: String,
    pub source: String,
}

/// Oracle for out-of-band detections (DNS/HTTP callbacks).
#[async_trait]
pub trait InteractionOracle: Send + Sync {
    async fn poll_interactions(&self, probe_id: &str) -> Vec<Interaction>;
}

/// Writes issues, enforcing report thresholds, per-job dedup, and baseline
/// fingerprint suppression.
#[derive(Clone)]
pub struct IssueReporter {
    db: Arc<dyn Database>,
}

impl IssueReporter {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create the issue unless suppressed. Returns the written issue.
    pub async fn report(
        &self,
        history: &History,
        kind: IssueKind,
        details: String,
        confidence: u8,
        baselines: Option<&[Fingerprint]>,
    ) -> Result<Option<Issue>, DatabaseError> {
        if confidence < kind.report_threshold() {
            tracing::debug!(
                code = kind.code(),
                confidence,
                threshold = kind.report_threshold(),
                "Finding below report threshold"
            );
            return Ok(None);
        }

        // A response that merely looks like a recorded baseline is not
        // evidence.
        if let Some(baselines) = baselines {
            let fp = fingerprint_of(history);
            if baselines.contains(&fp) {
                tracing::debug!(code = kind.code(), url = %history.url, "Suppressed by behavior fingerprint");
                return Ok(None);
            }
        }

        if let Some(job_id) = history.scan_job_id {
            if self.db.issue_exists(job_id, kind.code(), &history.url).await? {
                return Ok(None);
            }
        }

        let issue = Issue::from_history_and_template(history, kind, details, confidence);
        self.db.create_issue(&issue).await?;
        tracing::info!(code = kind.code(), url = %history.url, confidence, "Issue created");
        Ok(Some(issue))
    }
}

/// Fingerprint of a stored response, for baseline comparison.
pub fn fingerprint_of(history: &History) -> Fingerprint {
    Fingerprint {
        status: history.status_code,
        body_hash: history.response_hash.clone(),
        content_type: history.content_type.clone(),
        body_size: history.response_body().len() as u64,
    }
}

/// Options decoded from the active-scan job payload.
#[derive(Debug, Clone)]
pub struct ActiveScanOptions {
    pub mode: ScanMode,
    pub categories: AuditCategories,
    pub insertion_points: Vec<InsertionPoint>,
    pub max_retries: u32,
}

/// The active scan entrypoint: runs audits for one history record.
pub struct ActiveScanner {
    db: Arc<dyn Database>,
    clients: Arc<ClientPool>,
    passive: Arc<PassivePipeline>,
    reporter: IssueReporter,
    generators: Vec<Arc<dyn PayloadGenerator>>,
    oracle: Option<Arc<dyn InteractionOracle>>,
    smuggling: Arc<SmugglingScanner>,
}

impl ActiveScanner {
    pub fn new(
        db: Arc<dyn Database>,
        clients: Arc<ClientPool>,
        passive: Arc<PassivePipeline>,
        smuggling: Arc<SmugglingScanner>,
    ) -> Self {
        Self {
            reporter: IssueReporter::new(db.clone()),
            db,
            clients,
            passive,
            generators: Vec::new(),
            oracle: None,
            smuggling,
        }
    }

    pub fn with_generators(mut self, generators: Vec<Arc<dyn PayloadGenerator>>) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn InteractionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Dispatch per-category audits for one history record. Returns the
    /// number of issues created.
    pub async fn scan_history(
        &self,
        scan: &Scan,
        job: &ScanJob,
        history: &History,
        options: &ActiveScanOptions,
        ctrl: &ScanControl,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<u32, ExecutorError> {
        let mut issues = 0u32;

        let insertion_points = if options.insertion_points.is_empty() {
            extract_from_history(history)
        } else {
            options.insertion_points.clone()
        };

        // Client-side checks only make sense against renderable content,
        // unless fuzz mode asks for everything.
        let client_side = options.categories.client_side
            && (is_renderable(&history.content_type) || options.mode == ScanMode::Fuzz);

        if options.categories.server_side {
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            issues += self
                .run_generator_audits(
                    scan,
                    job,
                    history,
                    &insertion_points,
                    options,
                    AuditCategory::ServerSide,
                    ctrl,
                    shutdown,
                )
                .await?;

            // Request smuggling is part of the server-side audit; it runs on
            // its own raw socket client.
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            issues += self
                .smuggling
                .scan_url(scan, job, &history.url, options.mode, ctrl, shutdown)
                .await? as u32;
        }

        if client_side {
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            issues += self
                .run_generator_audits(
                    scan,
                    job,
                    history,
                    &insertion_points,
                    options,
                    AuditCategory::ClientSide,
                    ctrl,
                    shutdown,
                )
                .await?;
        }

        Ok(issues)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_generator_audits(
        &self,
        scan: &Scan,
        job: &ScanJob,
        history: &History,
        insertion_points: &[InsertionPoint],
        options: &ActiveScanOptions,
        category: AuditCategory,
        ctrl: &ScanControl,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<u32, ExecutorError> {
        let client = self.clients.for_scan(scan).await;
        let mut issues = 0u32;

        for generator in self.generators.iter().filter(|g| g.category() == category) {
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }

            for payload in generator.payloads(options.mode) {
                for point in insertion_points {
                    let Some(request) = mutate_request(history, point, &payload.value) else {
                        continue;
                    };

                    let executed = match self
                        .send_with_retries(&client, scan, job, &request, options.max_retries)
                        .await
                    {
                        Some(executed) => executed,
                        None => continue,
                    };

                    let body = String::from_utf8_lossy(&executed.body);
                    let hit = match &payload.evidence_pattern {
                        Some(pattern) => regex::Regex::new(pattern)
                            .map(|re| re.is_match(&body))
                            .unwrap_or(false),
                        // Without an evidence pattern the signal is the
                        // payload reflecting back verbatim.
                        None => body.contains(&payload.value),
                    };

                    if hit {
                        let details = format!(
                            "Payload {:?} ({}) at insertion point {} produced a matching response",
                            payload.value, payload.description, point.name
                        );
                        if self
                            .reporter
                            .report(
                                &executed.history,
                                payload.issue,
                                details,
                                payload.confidence,
                                None,
                            )
                            .await?
                            .is_some()
                        {
                            issues += 1;
                        }
                    }
                }
            }

            // Out-of-band confirmations for this job, when an oracle is wired.
            if let Some(oracle) = &self.oracle {
                for interaction in oracle.poll_interactions(&job.id.to_string()).await {
                    tracing::info!(
                        generator = generator.name(),
                        protocol = %interaction.protocol,
                        source = %interaction.source,
                        "Out-of-band interaction observed"
                    );
                }
            }
        }

        Ok(issues)
    }

    /// Transient network errors are retried; they neither fail nor cancel
    /// the job. Probe failures are logged at debug and skipped.
    async fn send_with_retries(
        &self,
        client: &reqwest::Client,
        scan: &Scan,
        job: &ScanJob,
        request: &SynthesizedRequest,
        max_retries: u32,
    ) -> Option<http::ExecutedRequest> {
        for attempt in 0..=max_retries {
            match execute_and_record(
                self.db.as_ref(),
                client,
                scan,
                Some(job.id),
                None,
                request,
            )
            .await
            {
                Ok(executed) => return Some(executed),
                Err(ExecutorError::Http(e)) if e.is_timeout() || e.is_connect() => {
                    tracing::debug!(url = %request.url, attempt, "Transient probe failure: {e}");
                }
                Err(e) => {
                    tracing::debug!(url = %request.url, "Probe failed: {e}");
                    return None;
                }
            }
        }
        None
    }
}

/// Rebuild the recorded request with one insertion point swapped for the
/// payload value.
pub fn mutate_request(
    history: &History,
    point: &InsertionPoint,
    payload: &str,
) -> Option<SynthesizedRequest> {
    let mut request = SynthesizedRequest::new(history.method.clone(), history.url.clone());

    let raw = String::from_utf8_lossy(&history.request_raw);
    let (head, body) = raw
        .split_once("\r\n\r\n")
        .map(|(h, b)| (h.to_string(), b.to_string()))
        .unwrap_or((raw.into_owned(), String::new()));

    let mut content_type = None;
    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
        request.set_header(name, value.to_string());
    }

    match point.kind {
        InsertionPointKind::QueryParam => {
            let mut url = url::Url::parse(&history.url).ok()?;
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| {
                    if k == point.name {
                        (k.into_owned(), payload.to_string())
                    } else {
                        (k.into_owned(), v.into_owned())
                    }
                })
                .collect();
            url.query_pairs_mut().clear().extend_pairs(pairs);
            request.url = url.to_string();
        }
        InsertionPointKind::Header => {
            request.set_header(&point.name, payload.to_string());
        }
        InsertionPointKind::Cookie => {
            let rebuilt = request
                .header("Cookie")
                .map(|cookies| {
                    cookies
                        .split(';')
                        .map(|pair| {
                            let trimmed = pair.trim();
                            match trimmed.split_once('=') {
                                Some((name, _)) if name.trim() == point.name => {
                                    format!("{}={payload}", name.trim())
                                }
                                _ => trimmed.to_string(),
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_else(|| format!("{}={payload}", point.name));
            request.set_header("Cookie", rebuilt);
        }
        InsertionPointKind::BodyJson => {
            let mut value: serde_json::Value = serde_json::from_str(&body).ok()?;
            set_json_path(&mut value, &point.name, payload);
            let encoded = serde_json::to_vec(&value).ok()?;
            let ct = content_type.unwrap_or_else(|| "application/json".to_string());
            request = request.with_body(encoded, ct);
        }
        InsertionPointKind::BodyForm => {
            let rebuilt: Vec<String> = body
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some((name, _))
                        if urlencoding::decode(name)
                            .map(|n| n == point.name)
                            .unwrap_or(false) =>
                    {
                        format!("{name}={}", urlencoding::encode(payload))
                    }
                    _ => pair.to_string(),
                })
                .collect();
            let ct = content_type
                .unwrap_or_else(|| "application/x-www-form-urlencoded".to_string());
            request = request.with_body(rebuilt.join("&").into_bytes(), ct);
        }
        InsertionPointKind::PathSegment | InsertionPointKind::WsMessageField => return None,
    }

    Some(request)
}

pub(crate) fn set_json_path(value: &mut serde_json::Value, path: &str, payload: &str) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (idx, segment) in segments.iter().enumerate() {
        let last = idx == segments.len() - 1;
        match current {
            serde_json::Value::Object(map) => {
                if last {
                    map.insert(
                        segment.to_string(),
                        serde_json::Value::String(payload.to_string()),
                    );
                    return;
                }
                match map.get_mut(*segment) {
                    Some(next) => current = next,
                    None => return,
                }
            }
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use uuid::Uuid;

    fn history_with(request: &[u8], url: &str) -> History {
        History::record(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            "POST",
            url,
            200,
            request.to_vec(),
            b"HTTP/1.1 200 OK\r\n\r\nok".to_vec(),
            b"ok",
            "text/html",
        )
    }

    #[test]
    fn test_mutate_query_param() {
        let h = history_with(
            b"GET /s?q=hello HTTP/1.1\r\nHost: x\r\n\r\n",
            "http://example.com/s?q=hello",
        );
        let point = InsertionPoint {
            name: "q".to_string(),
            kind: InsertionPointKind::QueryParam,
            original_value: "hello".to_string(),
        };
        let mutated = mutate_request(&h, &point, "'\"<x>").unwrap();
        assert!(mutated.url.contains("q=%27%22%3Cx%3E"));
    }

    #[test]
    fn test_mutate_json_body_nested() {
        let h = history_with(
            b"POST /api HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\n\r\n{\"user\":{\"name\":\"bob\"}}",
            "http://example.com/api",
        );
        let point = InsertionPoint {
            name: "user.name".to_string(),
            kind: InsertionPointKind::BodyJson,
            original_value: "bob".to_string(),
        };
        let mutated = mutate_request(&h, &point, "PAYLOAD").unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(mutated.body.as_ref().unwrap()).unwrap();
        assert_eq!(body.pointer("/user/name").unwrap(), "PAYLOAD");
    }

    #[test]
    fn test_mutate_cookie_preserves_others() {
        let h = history_with(
            b"GET / HTTP/1.1\r\nHost: x\r\nCookie: a=1; b=2\r\n\r\n",
            "http://example.com/",
        );
        let point = InsertionPoint {
            name: "b".to_string(),
            kind: InsertionPointKind::Cookie,
            original_value: "2".to_string(),
        };
        let mutated = mutate_request(&h, &point, "evil").unwrap();
        assert_eq!(mutated.header("Cookie"), Some("a=1; b=evil"));
    }

    #[tokio::test]
    async fn test_reporter_enforces_threshold() {
        let db = Arc::new(MemoryStore::new());
        let reporter = IssueReporter::new(db.clone());
        let h = history_with(b"GET / HTTP/1.1\r\n\r\n", "http://example.com/");

        let below = reporter
            .report(&h, IssueKind::DatabaseErrorLeak, "weak".to_string(), 30, None)
            .await
            .unwrap();
        assert!(below.is_none());

        let above = reporter
            .report(&h, IssueKind::DatabaseErrorLeak, "solid".to_string(), 75, None)
            .await
            .unwrap();
        assert!(above.is_some());
    }

    #[tokio::test]
    async fn test_reporter_suppresses_baseline_fingerprint() {
        let db = Arc::new(MemoryStore::new());
        let reporter = IssueReporter::new(db.clone());
        let h = history_with(b"GET / HTTP/1.1\r\n\r\n", "http://example.com/any");

        let baseline = fingerprint_of(&h);
        let suppressed = reporter
            .report(
                &h,
                IssueKind::DatabaseErrorLeak,
                "looks like the 404 baseline".to_string(),
                90,
                Some(&[baseline]),
            )
            .await
            .unwrap();
        assert!(suppressed.is_none());
        assert!(db.issues().await.is_empty());
    }
}
