//! Serialized job payload schemas, one per job type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::ScanMode;
use crate::scan::AuditCategories;
use crate::scan::insertion::InsertionPoint;

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveScanJobData {
    pub history_id: Uuid,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub insertion_points: Vec<InsertionPoint>,
    #[serde(default)]
    pub audit_categories: AuditCategories,
    #[serde(default)]
    pub experimental_audits: bool,
    #[serde(default)]
    pub fingerprint_tags: Vec<String>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiScanJobData {
    pub definition_id: Uuid,
    pub endpoint_id: Uuid,
    pub api_scan_id: Uuid,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub audit_categories: AuditCategories,
    #[serde(default)]
    pub run_api_specific_tests: bool,
    #[serde(default)]
    pub run_standard_tests: bool,
    #[serde(default)]
    pub run_schema_tests: bool,
    #[serde(default)]
    pub auth_config_id: Option<Uuid>,
    /// Security scheme name -> auth config, for APIs with several schemes.
    #[serde(default)]
    pub scheme_auth_map: Option<HashMap<String, Uuid>>,
    #[serde(default)]
    pub fingerprint_tags: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiBehaviorJobData {
    pub definition_id: Uuid,
    #[serde(default)]
    pub auth_config_id: Option<Uuid>,
    #[serde(default)]
    pub headers: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteBehaviorJobData {
    pub base_url: String,
    #[serde(default)]
    pub headers: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobData {
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub max_pages_to_crawl: u32,
    #[serde(default)]
    pub max_depth: u32,
    #[serde(default)]
    pub pool_size: u32,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub extra_headers: Option<Vec<(String, String)>>,
}

/// Which discovery module to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryModule {
    #[default]
    All,
    Graphql,
    Openapi,
    Actuator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJobData {
    pub base_url: String,
    #[serde(default)]
    pub module: DiscoveryModule,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub base_headers: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub site_behavior: Option<bool>,
}

fn default_observation_window() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketScanJobData {
    pub websocket_connection_id: Uuid,
    pub target_message_index: usize,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub replay_messages: bool,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Seconds to keep collecting frames after each injected payload.
    #[serde(default = "default_observation_window")]
    pub observation_window: u64,
    #[serde(default)]
    pub fingerprint_tags: Vec<String>,
    #[serde(default)]
    pub run_passive_scan: bool,
}
