//! Persistence boundary for the scan engine.
//!
//! The engine consumes storage through the [`Database`] trait; the relational
//! store behind it is an external collaborator. Two implementations ship
//! here: [`postgres::Store`] for production and [`memory::MemoryStore`] for
//! tests and standalone runs.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::{
    ApiAuthConfig, ApiBehaviorResult, ApiDefinition, ApiEndpoint, Fingerprint, History, Issue,
    JobState, Scan, ScanJob, ScanState, SiteBehaviorResult, WebSocketConnection, WebSocketMessage,
};
use crate::error::DatabaseError;

/// Storage contract consumed by the engine.
#[async_trait]
pub trait Database: Send + Sync {
    // --- Scans ---

    async fn create_scan(&self, scan: &Scan) -> Result<(), DatabaseError>;

    async fn get_scan(&self, id: Uuid) -> Result<Scan, DatabaseError>;

    async fn update_scan_state(&self, id: Uuid, state: ScanState) -> Result<(), DatabaseError>;

    // --- Jobs ---

    async fn insert_job(&self, job: &ScanJob) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<ScanJob, DatabaseError>;

    /// Atomically claim the oldest queued job: transition it to running and
    /// stamp the claim. Returns `None` when the queue is empty. Must be safe
    /// under concurrent callers.
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<ScanJob>, DatabaseError>;

    /// Set the job state, stamping `finished_at` for terminal states.
    async fn update_job_state(
        &self,
        id: Uuid,
        state: JobState,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    // --- History ---

    async fn create_history(&self, history: &History) -> Result<(), DatabaseError>;

    async fn get_history(&self, id: Uuid) -> Result<History, DatabaseError>;

    async fn link_history_to_scan_job(
        &self,
        history_id: Uuid,
        scan_job_id: Uuid,
    ) -> Result<(), DatabaseError>;

    // --- API definitions ---

    async fn get_api_definition(&self, id: Uuid) -> Result<ApiDefinition, DatabaseError>;

    async fn get_api_endpoint_with_relations(&self, id: Uuid)
        -> Result<ApiEndpoint, DatabaseError>;

    async fn mark_api_endpoint_scanned(
        &self,
        id: Uuid,
        issues_found: u32,
    ) -> Result<(), DatabaseError>;

    async fn increment_api_scan_completed_endpoints(
        &self,
        api_scan_id: Uuid,
    ) -> Result<(), DatabaseError>;

    async fn get_api_auth_config_with_relations(
        &self,
        id: Uuid,
    ) -> Result<ApiAuthConfig, DatabaseError>;

    // --- Issues ---

    async fn create_issue(&self, issue: &Issue) -> Result<(), DatabaseError>;

    /// Whether the same finding was already written by this scan job.
    async fn issue_exists(
        &self,
        scan_job_id: Uuid,
        code: &str,
        url: &str,
    ) -> Result<bool, DatabaseError>;

    // --- Behavior baselines ---

    async fn create_api_behavior_result(
        &self,
        result: &ApiBehaviorResult,
    ) -> Result<(), DatabaseError>;

    async fn get_api_behavior_for_definition(
        &self,
        scan_id: Uuid,
        definition_id: Uuid,
    ) -> Result<Vec<ApiBehaviorResult>, DatabaseError>;

    async fn create_site_behavior_result(
        &self,
        result: &SiteBehaviorResult,
    ) -> Result<(), DatabaseError>;

    async fn get_site_behavior_for_scan(
        &self,
        scan_id: Uuid,
    ) -> Result<Option<SiteBehaviorResult>, DatabaseError>;

    async fn create_site_behavior_not_found_sample(
        &self,
        result_id: Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<(), DatabaseError>;

    // --- WebSockets ---

    async fn get_websocket_connection_with_messages(
        &self,
        id: Uuid,
    ) -> Result<WebSocketConnection, DatabaseError>;

    async fn create_websocket_message(
        &self,
        message: &WebSocketMessage,
    ) -> Result<(), DatabaseError>;

    // --- JWT capture ---

    async fn get_or_create_jwt_from_token_and_history(
        &self,
        token: &str,
        history_id: Uuid,
    ) -> Result<Uuid, DatabaseError>;

    async fn get_or_create_jwt_from_token_and_websocket_message(
        &self,
        token: &str,
        message_id: Uuid,
    ) -> Result<Uuid, DatabaseError>;
}
