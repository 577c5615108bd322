//! In-memory store used by tests and standalone runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::Database;
use crate::db::models::{
    ApiAuthConfig, ApiBehaviorResult, ApiDefinition, ApiEndpoint, Fingerprint, History, Issue,
    JobState, Scan, ScanJob, ScanState, SiteBehaviorResult, WebSocketConnection, WebSocketMessage,
};
use crate::error::DatabaseError;

/// Hash-map backed [`Database`] implementation.
///
/// Claim atomicity comes from taking the jobs map write lock for the whole
/// select-and-update, which is the in-process equivalent of a row lock.
#[derive(Default)]
pub struct MemoryStore {
    scans: RwLock<HashMap<Uuid, Scan>>,
    jobs: RwLock<HashMap<Uuid, ScanJob>>,
    histories: RwLock<HashMap<Uuid, History>>,
    issues: RwLock<HashMap<Uuid, Issue>>,
    definitions: RwLock<HashMap<Uuid, ApiDefinition>>,
    endpoints: RwLock<HashMap<Uuid, ApiEndpoint>>,
    endpoint_scan_status: RwLock<HashMap<Uuid, u32>>,
    api_scan_progress: RwLock<HashMap<Uuid, u64>>,
    auth_configs: RwLock<HashMap<Uuid, ApiAuthConfig>>,
    api_behavior: RwLock<Vec<ApiBehaviorResult>>,
    site_behavior: RwLock<HashMap<Uuid, SiteBehaviorResult>>,
    websockets: RwLock<HashMap<Uuid, WebSocketConnection>>,
    jwts: RwLock<HashMap<String, Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers for entities created outside the engine (discovery,
    // crawling, configuration).

    pub async fn insert_api_definition(&self, definition: ApiDefinition) {
        self.definitions
            .write()
            .await
            .insert(definition.id, definition);
    }

    pub async fn insert_api_endpoint(&self, endpoint: ApiEndpoint) {
        self.endpoints.write().await.insert(endpoint.id, endpoint);
    }

    pub async fn insert_auth_config(&self, config: ApiAuthConfig) {
        self.auth_configs.write().await.insert(config.id, config);
    }

    pub async fn insert_websocket_connection(&self, conn: WebSocketConnection) {
        self.websockets.write().await.insert(conn.id, conn);
    }

    /// Issues written so far, for assertions.
    pub async fn issues(&self) -> Vec<Issue> {
        self.issues.read().await.values().cloned().collect()
    }

    /// Histories written so far, for assertions.
    pub async fn histories(&self) -> Vec<History> {
        self.histories.read().await.values().cloned().collect()
    }

    /// Completed-endpoint counter for an API scan.
    pub async fn api_scan_progress(&self, api_scan_id: Uuid) -> u64 {
        self.api_scan_progress
            .read()
            .await
            .get(&api_scan_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn create_scan(&self, scan: &Scan) -> Result<(), DatabaseError> {
        self.scans.write().await.insert(scan.id, scan.clone());
        Ok(())
    }

    async fn get_scan(&self, id: Uuid) -> Result<Scan, DatabaseError> {
        self.scans
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound { entity: "scan", id })
    }

    async fn update_scan_state(&self, id: Uuid, state: ScanState) -> Result<(), DatabaseError> {
        let mut scans = self.scans.write().await;
        let scan = scans
            .get_mut(&id)
            .ok_or(DatabaseError::NotFound { entity: "scan", id })?;
        scan.state = state;
        Ok(())
    }

    async fn insert_job(&self, job: &ScanJob) -> Result<(), DatabaseError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<ScanJob, DatabaseError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "scan_job",
                id,
            })
    }

    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<ScanJob>, DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let next = jobs
            .values()
            .filter(|j| j.state == JobState::Queued)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);

        let Some(job) = next.and_then(|id| jobs.get_mut(&id)) else {
            return Ok(None);
        };
        job.state = JobState::Running;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update_job_state(
        &self,
        id: Uuid,
        state: JobState,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(DatabaseError::NotFound {
            entity: "scan_job",
            id,
        })?;
        job.state = state;
        if state.is_terminal() {
            job.finished_at = Some(Utc::now());
        }
        if let Some(et) = error_type {
            job.error_type = Some(et.to_string());
        }
        if let Some(em) = error_message {
            job.error_message = Some(em.to_string());
        }
        Ok(())
    }

    async fn create_history(&self, history: &History) -> Result<(), DatabaseError> {
        self.histories
            .write()
            .await
            .insert(history.id, history.clone());
        Ok(())
    }

    async fn get_history(&self, id: Uuid) -> Result<History, DatabaseError> {
        self.histories
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "history",
                id,
            })
    }

    async fn link_history_to_scan_job(
        &self,
        history_id: Uuid,
        scan_job_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let mut histories = self.histories.write().await;
        let history = histories
            .get_mut(&history_id)
            .ok_or(DatabaseError::NotFound {
                entity: "history",
                id: history_id,
            })?;
        history.scan_job_id = Some(scan_job_id);
        Ok(())
    }

    async fn get_api_definition(&self, id: Uuid) -> Result<ApiDefinition, DatabaseError> {
        self.definitions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "api_definition",
                id,
            })
    }

    async fn get_api_endpoint_with_relations(
        &self,
        id: Uuid,
    ) -> Result<ApiEndpoint, DatabaseError> {
        self.endpoints
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "api_endpoint",
                id,
            })
    }

    async fn mark_api_endpoint_scanned(
        &self,
        id: Uuid,
        issues_found: u32,
    ) -> Result<(), DatabaseError> {
        self.endpoint_scan_status
            .write()
            .await
            .insert(id, issues_found);
        Ok(())
    }

    async fn increment_api_scan_completed_endpoints(
        &self,
        api_scan_id: Uuid,
    ) -> Result<(), DatabaseError> {
        *self
            .api_scan_progress
            .write()
            .await
            .entry(api_scan_id)
            .or_insert(0) += 1;
        Ok(())
    }

    async fn get_api_auth_config_with_relations(
        &self,
        id: Uuid,
    ) -> Result<ApiAuthConfig, DatabaseError> {
        self.auth_configs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "api_auth_config",
                id,
            })
    }

    async fn create_issue(&self, issue: &Issue) -> Result<(), DatabaseError> {
        self.issues.write().await.insert(issue.id, issue.clone());
        Ok(())
    }

    async fn issue_exists(
        &self,
        scan_job_id: Uuid,
        code: &str,
        url: &str,
    ) -> Result<bool, DatabaseError> {
        Ok(self.issues.read().await.values().any(|i| {
            i.scan_job_id == Some(scan_job_id) && i.code == code && i.url == url
        }))
    }

    async fn create_api_behavior_result(
        &self,
        result: &ApiBehaviorResult,
    ) -> Result<(), DatabaseError> {
        self.api_behavior.write().await.push(result.clone());
        Ok(())
    }

    async fn get_api_behavior_for_definition(
        &self,
        scan_id: Uuid,
        definition_id: Uuid,
    ) -> Result<Vec<ApiBehaviorResult>, DatabaseError> {
        Ok(self
            .api_behavior
            .read()
            .await
            .iter()
            .filter(|r| r.scan_id == scan_id && r.definition_id == definition_id)
            .cloned()
            .collect())
    }

    async fn create_site_behavior_result(
        &self,
        result: &SiteBehaviorResult,
    ) -> Result<(), DatabaseError> {
        self.site_behavior
            .write()
            .await
            .insert(result.scan_id, result.clone());
        Ok(())
    }

    async fn get_site_behavior_for_scan(
        &self,
        scan_id: Uuid,
    ) -> Result<Option<SiteBehaviorResult>, DatabaseError> {
        Ok(self.site_behavior.read().await.get(&scan_id).cloned())
    }

    async fn create_site_behavior_not_found_sample(
        &self,
        result_id: Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<(), DatabaseError> {
        let mut results = self.site_behavior.write().await;
        if let Some(result) = results.values_mut().find(|r| r.id == result_id) {
            result.not_found_samples.push(fingerprint.clone());
        }
        Ok(())
    }

    async fn get_websocket_connection_with_messages(
        &self,
        id: Uuid,
    ) -> Result<WebSocketConnection, DatabaseError> {
        self.websockets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                entity: "websocket_connection",
                id,
            })
    }

    async fn create_websocket_message(
        &self,
        message: &WebSocketMessage,
    ) -> Result<(), DatabaseError> {
        let mut websockets = self.websockets.write().await;
        if let Some(conn) = websockets.get_mut(&message.connection_id) {
            conn.messages.push(message.clone());
        }
        Ok(())
    }

    async fn get_or_create_jwt_from_token_and_history(
        &self,
        token: &str,
        _history_id: Uuid,
    ) -> Result<Uuid, DatabaseError> {
        let mut jwts = self.jwts.write().await;
        Ok(*jwts.entry(token.to_string()).or_insert_with(Uuid::new_v4))
    }

    async fn get_or_create_jwt_from_token_and_websocket_message(
        &self,
        token: &str,
        _message_id: Uuid,
    ) -> Result<Uuid, DatabaseError> {
        let mut jwts = self.jwts.write().await;
        Ok(*jwts.entry(token.to_string()).or_insert_with(Uuid::new_v4))
    }
}
