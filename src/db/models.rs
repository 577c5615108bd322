//! Entity records shared by the store implementations and the engine.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Scan mode controlling how exhaustive attack variants are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Exhaustive, expensive variants.
    Fuzz,
    /// The default balance.
    #[default]
    Smart,
    /// Curated subsets only.
    Fast,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Fuzz => "fuzz",
            ScanMode::Smart => "smart",
            ScanMode::Fast => "fast",
        }
    }
}

/// Lifecycle state of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Queued,
    Running,
    Paused,
    Cancelled,
    Done,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Queued => "queued",
            ScanState::Running => "running",
            ScanState::Paused => "paused",
            ScanState::Cancelled => "cancelled",
            ScanState::Done => "done",
        }
    }
}

/// HTTP client tuning carried by a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Seconds an idle connection stays pooled.
    pub pool_idle_timeout_secs: u64,
    /// Whether to reuse connections at all.
    pub keep_alives: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            pool_max_idle_per_host: 10,
            pool_idle_timeout_secs: 90,
            keep_alives: true,
        }
    }
}

/// A scan: identity plus configuration for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Base URL of the target host.
    pub target: String,
    pub mode: ScanMode,
    pub options: ScanOptions,
    /// Pause the whole scan when auth failures trip the circuit breaker.
    pub pause_on_auth_failure: bool,
    pub capture_browser_events: bool,
    pub state: ScanState,
    pub created_at: DateTime<Utc>,
}

impl Scan {
    pub fn new(workspace_id: Uuid, target: impl Into<String>, mode: ScanMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            target: target.into(),
            mode,
            options: ScanOptions::default(),
            pause_on_auth_failure: false,
            capture_browser_events: false,
            state: ScanState::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pause_on_auth_failure(mut self, pause: bool) -> Self {
        self.pause_on_auth_failure = pause;
        self
    }
}

/// The kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Crawl,
    Discovery,
    SiteBehavior,
    ApiBehavior,
    ActiveScan,
    WebsocketScan,
    ApiScan,
    Nuclei,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Crawl => "crawl",
            JobType::Discovery => "discovery",
            JobType::SiteBehavior => "site-behavior",
            JobType::ApiBehavior => "api-behavior",
            JobType::ActiveScan => "active-scan",
            JobType::WebsocketScan => "websocket-scan",
            JobType::ApiScan => "api-scan",
            JobType::Nuclei => "nuclei",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crawl" => Some(JobType::Crawl),
            "discovery" => Some(JobType::Discovery),
            "site-behavior" => Some(JobType::SiteBehavior),
            "api-behavior" => Some(JobType::ApiBehavior),
            "active-scan" => Some(JobType::ActiveScan),
            "websocket-scan" => Some(JobType::WebsocketScan),
            "api-scan" => Some(JobType::ApiScan),
            "nuclei" => Some(JobType::Nuclei),
            _ => None,
        }
    }
}

/// Job state machine: queued -> running -> done | failed | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "done" => Some(JobState::Done),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub job_type: JobType,
    /// Opaque structured payload; schema fixed per job type.
    pub payload: serde_json::Value,
    pub state: JobState,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(scan_id: Uuid, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            scan_id,
            job_type,
            payload,
            state: JobState::Queued,
            claimed_by: None,
            claimed_at: None,
            finished_at: None,
            error_type: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Immutable record of one HTTP round-trip, written exactly once per request
/// the engine performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub scan_id: Option<Uuid>,
    pub scan_job_id: Option<Uuid>,
    pub api_endpoint_id: Option<Uuid>,
    pub method: String,
    pub url: String,
    /// 0 when no response was read.
    pub status_code: u16,
    pub request_raw: Vec<u8>,
    pub response_raw: Vec<u8>,
    /// Hex sha-256 of the response body.
    pub response_hash: String,
    pub content_type: String,
    pub request_size: u64,
    pub response_size: u64,
    pub created_at: DateTime<Utc>,
}

impl History {
    /// Build a record from captured raw bytes, stamping hash and sizes.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        workspace_id: Uuid,
        scan_id: Option<Uuid>,
        scan_job_id: Option<Uuid>,
        method: impl Into<String>,
        url: impl Into<String>,
        status_code: u16,
        request_raw: Vec<u8>,
        response_raw: Vec<u8>,
        body: &[u8],
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            scan_id,
            scan_job_id,
            api_endpoint_id: None,
            method: method.into(),
            url: url.into(),
            status_code,
            request_size: request_raw.len() as u64,
            response_size: response_raw.len() as u64,
            request_raw,
            response_raw,
            response_hash: response_hash(body),
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint_id: Uuid) -> Self {
        self.api_endpoint_id = Some(endpoint_id);
        self
    }

    /// Body portion of the stored response, for pattern checks.
    pub fn response_body(&self) -> &[u8] {
        match find_header_end(&self.response_raw) {
            Some(at) => &self.response_raw[at..],
            None => &self.response_raw,
        }
    }
}

/// Hex sha-256 digest used for response fingerprints.
pub fn response_hash(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Issue templates: every reportable finding with its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    HttpRequestSmugglingClTe,
    HttpRequestSmugglingTeCl,
    HttpRequestSmugglingTeTe,
    HttpRequestSmugglingCl0,
    GraphqlIntrospectionEnabled,
    GraphqlBatchingEnabled,
    GraphqlFieldSuggestionsEnabled,
    GraphqlDepthLimitMissing,
    HttpMethodOverrideEnabled,
    MassAssignment,
    SoapActionSpoofing,
    DatabaseErrorLeak,
    ExposedApiKey,
    PrivateIpDisclosure,
    JwtDetected,
    StorageBucketDisclosure,
    PrivateKeyLeak,
    ConnectionStringLeak,
    SessionTokenInUrl,
    MissingSecurityHeaders,
    StackTraceLeak,
    ReflectedPayload,
    SchemaTypeConfusion,
}

impl IssueKind {
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::HttpRequestSmugglingClTe => "http_request_smuggling_cl_te",
            IssueKind::HttpRequestSmugglingTeCl => "http_request_smuggling_te_cl",
            IssueKind::HttpRequestSmugglingTeTe => "http_request_smuggling_te_te",
            IssueKind::HttpRequestSmugglingCl0 => "http_request_smuggling_cl_0",
            IssueKind::GraphqlIntrospectionEnabled => "graphql_introspection_enabled",
            IssueKind::GraphqlBatchingEnabled => "graphql_batching_enabled",
            IssueKind::GraphqlFieldSuggestionsEnabled => "graphql_field_suggestions_enabled",
            IssueKind::GraphqlDepthLimitMissing => "graphql_depth_limit_missing",
            IssueKind::HttpMethodOverrideEnabled => "http_method_override_enabled",
            IssueKind::MassAssignment => "mass_assignment",
            IssueKind::SoapActionSpoofing => "soap_action_spoofing",
            IssueKind::DatabaseErrorLeak => "database_error_leak",
            IssueKind::ExposedApiKey => "exposed_api_key",
            IssueKind::PrivateIpDisclosure => "private_ip_disclosure",
            IssueKind::JwtDetected => "jwt_detected",
            IssueKind::StorageBucketDisclosure => "storage_bucket_disclosure",
            IssueKind::PrivateKeyLeak => "private_key_leak",
            IssueKind::ConnectionStringLeak => "connection_string_leak",
            IssueKind::SessionTokenInUrl => "session_token_in_url",
            IssueKind::MissingSecurityHeaders => "missing_security_headers",
            IssueKind::StackTraceLeak => "stack_trace_leak",
            IssueKind::ReflectedPayload => "reflected_payload",
            IssueKind::SchemaTypeConfusion => "schema_type_confusion",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            IssueKind::HttpRequestSmugglingClTe => "HTTP Request Smuggling (CL.TE)",
            IssueKind::HttpRequestSmugglingTeCl => "HTTP Request Smuggling (TE.CL)",
            IssueKind::HttpRequestSmugglingTeTe => "HTTP Request Smuggling (TE.TE)",
            IssueKind::HttpRequestSmugglingCl0 => "HTTP Request Smuggling (CL.0)",
            IssueKind::GraphqlIntrospectionEnabled => "GraphQL Introspection Enabled",
            IssueKind::GraphqlBatchingEnabled => "GraphQL Query Batching Enabled",
            IssueKind::GraphqlFieldSuggestionsEnabled => "GraphQL Field Suggestions Enabled",
            IssueKind::GraphqlDepthLimitMissing => "GraphQL Depth Limit Missing",
            IssueKind::HttpMethodOverrideEnabled => "HTTP Method Override Enabled",
            IssueKind::MassAssignment => "Possible Mass Assignment",
            IssueKind::SoapActionSpoofing => "SOAP Action Spoofing",
            IssueKind::DatabaseErrorLeak => "Database Error Disclosure",
            IssueKind::ExposedApiKey => "Exposed API Key",
            IssueKind::PrivateIpDisclosure => "Private IP Disclosure",
            IssueKind::JwtDetected => "JSON Web Token Detected",
            IssueKind::StorageBucketDisclosure => "Storage Bucket Disclosure",
            IssueKind::PrivateKeyLeak => "Private Key Disclosure",
            IssueKind::ConnectionStringLeak => "Connection String Disclosure",
            IssueKind::SessionTokenInUrl => "Session Token in URL",
            IssueKind::MissingSecurityHeaders => "Missing Security Headers",
            IssueKind::StackTraceLeak => "Stack Trace Disclosure",
            IssueKind::ReflectedPayload => "Reflected Payload",
            IssueKind::SchemaTypeConfusion => "Unhandled Parameter Type Variant",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::HttpRequestSmugglingClTe
            | IssueKind::HttpRequestSmugglingTeCl
            | IssueKind::HttpRequestSmugglingTeTe
            | IssueKind::HttpRequestSmugglingCl0 => Severity::Critical,
            IssueKind::PrivateKeyLeak | IssueKind::ConnectionStringLeak => Severity::Critical,
            IssueKind::ExposedApiKey | IssueKind::SoapActionSpoofing => Severity::High,
            IssueKind::GraphqlIntrospectionEnabled
            | IssueKind::MassAssignment
            | IssueKind::SessionTokenInUrl
            | IssueKind::DatabaseErrorLeak => Severity::Medium,
            IssueKind::GraphqlBatchingEnabled
            | IssueKind::GraphqlFieldSuggestionsEnabled
            | IssueKind::GraphqlDepthLimitMissing
            | IssueKind::HttpMethodOverrideEnabled
            | IssueKind::PrivateIpDisclosure
            | IssueKind::StackTraceLeak
            | IssueKind::ReflectedPayload
            | IssueKind::SchemaTypeConfusion => Severity::Low,
            IssueKind::JwtDetected
            | IssueKind::StorageBucketDisclosure
            | IssueKind::MissingSecurityHeaders => Severity::Info,
        }
    }

    /// Minimum confidence required before an issue of this kind is written.
    pub fn report_threshold(&self) -> u8 {
        match self {
            IssueKind::HttpRequestSmugglingClTe
            | IssueKind::HttpRequestSmugglingTeCl
            | IssueKind::HttpRequestSmugglingTeTe
            | IssueKind::HttpRequestSmugglingCl0 => 85,
            IssueKind::MassAssignment => 50,
            _ => 60,
        }
    }
}

/// A confirmed finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub details: String,
    /// 0..=100.
    pub confidence: u8,
    pub severity: Severity,
    pub workspace_id: Uuid,
    pub scan_id: Option<Uuid>,
    pub scan_job_id: Option<Uuid>,
    pub api_endpoint_id: Option<Uuid>,
    pub url: String,
    /// Request/response evidence.
    pub history_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// Build an issue from a history record and an issue template.
    pub fn from_history_and_template(
        history: &History,
        kind: IssueKind,
        details: impl Into<String>,
        confidence: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: kind.code().to_string(),
            title: kind.title().to_string(),
            details: details.into(),
            confidence: confidence.min(100),
            severity: kind.severity(),
            workspace_id: history.workspace_id,
            scan_id: history.scan_id,
            scan_job_id: history.scan_job_id,
            api_endpoint_id: history.api_endpoint_id,
            url: history.url.clone(),
            history_ids: vec![history.id],
            created_at: Utc::now(),
        }
    }

    pub fn with_histories(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.history_ids.extend(ids);
        self
    }
}

/// Kind of a parsed API definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiDefinitionKind {
    OpenApi,
    GraphQl,
    Wsdl,
}

impl ApiDefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiDefinitionKind::OpenApi => "openapi",
            ApiDefinitionKind::GraphQl => "graphql",
            ApiDefinitionKind::Wsdl => "wsdl",
        }
    }
}

/// A stored API definition, created by discovery and read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub kind: ApiDefinitionKind,
    pub base_url: String,
    pub source_url: String,
    pub raw: Vec<u8>,
    /// WSDL targetNamespace, when known.
    pub target_namespace: Option<String>,
}

/// A pre-computed request variation stored on an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestVariation {
    pub label: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

/// Denormalized view of one API operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub soap_action: Option<String>,
    /// Stored variations reused to avoid reparsing.
    pub variations: Vec<RequestVariation>,
}

/// Credential type of an auth config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Basic,
    Bearer,
    ApiKey,
    OAuth2,
}

/// Where an API key is placed on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
    Cookie,
}

/// OAuth-style flow used to refresh a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFlow {
    ClientCredentials,
    Password,
    RefreshToken,
}

/// Wire format of the refresh request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshBodyFormat {
    Form,
    Json,
}

/// Token refresh policy attached to an auth config.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshConfig {
    pub url: String,
    pub flow: RefreshFlow,
    pub body_format: RefreshBodyFormat,
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub scope: Option<String>,
    /// Refresh this many seconds before the reported expiry.
    #[serde(default = "default_expiry_skew")]
    pub expiry_skew_secs: u64,
}

fn default_expiry_skew() -> u64 {
    30
}

/// Stored credentials for API scanning. Exactly one config is applied per
/// request.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiAuthConfig {
    pub id: Uuid,
    pub kind: AuthKind,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub token: Option<SecretString>,
    /// Authorization prefix; defaults to "Bearer" for bearer/oauth2.
    pub prefix: Option<String>,
    pub key_name: Option<String>,
    pub key_location: Option<ApiKeyLocation>,
    /// Always appended last.
    pub custom_headers: Vec<(String, String)>,
    pub refresh: Option<TokenRefreshConfig>,
}

/// Response summary used for baseline comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub status: u16,
    pub body_hash: String,
    pub content_type: String,
    /// Exact body size; gzip framing differences are intentionally distinct.
    pub body_size: u64,
}

impl Fingerprint {
    pub fn of_response(status: u16, body: &[u8], content_type: &str) -> Self {
        Self {
            status,
            body_hash: response_hash(body),
            content_type: content_type.to_string(),
            body_size: body.len() as u64,
        }
    }

    /// Drop exact duplicates, keeping first occurrences in order.
    pub fn dedup(fingerprints: Vec<Fingerprint>) -> Vec<Fingerprint> {
        let mut seen = std::collections::HashSet::new();
        fingerprints
            .into_iter()
            .filter(|fp| seen.insert(fp.clone()))
            .collect()
    }
}

/// Baseline class probed by the behavior fingerprinter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineClass {
    NotFound,
    Unauthenticated,
    InvalidContentType,
    MalformedBody,
}

impl BaselineClass {
    pub const ALL: [BaselineClass; 4] = [
        BaselineClass::NotFound,
        BaselineClass::Unauthenticated,
        BaselineClass::InvalidContentType,
        BaselineClass::MalformedBody,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineClass::NotFound => "not_found",
            BaselineClass::Unauthenticated => "unauthenticated",
            BaselineClass::InvalidContentType => "invalid_content_type",
            BaselineClass::MalformedBody => "malformed_body",
        }
    }
}

/// Baseline fingerprints captured once per (scan, definition, class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiBehaviorResult {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub definition_id: Uuid,
    pub class: BaselineClass,
    pub fingerprints: Vec<Fingerprint>,
    pub created_at: DateTime<Utc>,
}

/// Baseline fingerprints for a plain site target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteBehaviorResult {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub base_url: String,
    pub not_found_samples: Vec<Fingerprint>,
    pub created_at: DateTime<Utc>,
}

/// Direction of a stored WebSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsDirection {
    Sent,
    Received,
}

/// One ordered frame on a stored connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub opcode: u8,
    pub direction: WsDirection,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored handshake plus its ordered frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConnection {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub scan_id: Option<Uuid>,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub messages: Vec<WebSocketMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trip() {
        for jt in [
            JobType::Crawl,
            JobType::Discovery,
            JobType::SiteBehavior,
            JobType::ApiBehavior,
            JobType::ActiveScan,
            JobType::WebsocketScan,
            JobType::ApiScan,
            JobType::Nuclei,
        ] {
            assert_eq!(JobType::parse(jt.as_str()), Some(jt));
        }
        assert_eq!(JobType::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_fingerprint_dedup_keeps_first() {
        let a = Fingerprint::of_response(200, b"hello", "text/html");
        let b = Fingerprint::of_response(200, b"hello", "text/html");
        let c = Fingerprint::of_response(404, b"nope", "text/html");
        let deduped = Fingerprint::dedup(vec![a.clone(), b, c.clone()]);
        assert_eq!(deduped, vec![a, c]);
    }

    #[test]
    fn test_fingerprint_size_compared_exactly() {
        // Same hash input but different recorded sizes must stay distinct.
        let mut a = Fingerprint::of_response(200, b"hello", "text/html");
        let mut b = a.clone();
        a.body_size = 5;
        b.body_size = 25;
        let deduped = Fingerprint::dedup(vec![a, b]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_history_body_extraction() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>".to_vec();
        let h = History::record(
            Uuid::new_v4(),
            None,
            None,
            "GET",
            "http://example.com/",
            200,
            b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            raw,
            b"<html>",
            "text/html",
        );
        assert_eq!(h.response_body(), b"<html>");
        assert_eq!(h.response_hash, response_hash(b"<html>"));
    }

    #[test]
    fn test_issue_template_links() {
        let h = History::record(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            "POST",
            "http://example.com/graphql",
            200,
            vec![],
            vec![],
            b"",
            "application/json",
        );
        let issue = Issue::from_history_and_template(
            &h,
            IssueKind::GraphqlIntrospectionEnabled,
            "introspection query succeeded",
            95,
        );
        assert_eq!(issue.code, "graphql_introspection_enabled");
        assert_eq!(issue.scan_id, h.scan_id);
        assert_eq!(issue.history_ids, vec![h.id]);
        assert_eq!(issue.severity, Severity::Medium);
    }
}
