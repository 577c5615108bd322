//! PostgreSQL store for the scan engine.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::Database;
use crate::db::models::{
    ApiAuthConfig, ApiBehaviorResult, ApiDefinition, ApiDefinitionKind, ApiEndpoint, Fingerprint,
    History, Issue, JobState, JobType, Scan, ScanJob, ScanState, SiteBehaviorResult,
    WebSocketConnection, WebSocketMessage, WsDirection,
};
use crate::error::DatabaseError;

/// Database store backed by a deadpool-postgres pool.
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Create a new store and connect to the database.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }

    /// Create the engine's tables when they do not exist yet.
    ///
    /// Production deployments run migrations externally; this covers
    /// standalone and integration-test runs.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scans (
    id UUID PRIMARY KEY,
    workspace_id UUID NOT NULL,
    target TEXT NOT NULL,
    mode TEXT NOT NULL,
    options JSONB NOT NULL,
    pause_on_auth_failure BOOLEAN NOT NULL,
    capture_browser_events BOOLEAN NOT NULL,
    state TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_jobs (
    id UUID PRIMARY KEY,
    scan_id UUID NOT NULL,
    job_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    state TEXT NOT NULL,
    claimed_by TEXT,
    claimed_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ,
    error_type TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS scan_jobs_queued_idx
    ON scan_jobs (created_at) WHERE state = 'queued';

CREATE TABLE IF NOT EXISTS histories (
    id UUID PRIMARY KEY,
    workspace_id UUID NOT NULL,
    scan_id UUID,
    scan_job_id UUID,
    api_endpoint_id UUID,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status_code INT NOT NULL,
    request_raw BYTEA NOT NULL,
    response_raw BYTEA NOT NULL,
    response_hash TEXT NOT NULL,
    content_type TEXT NOT NULL,
    request_size BIGINT NOT NULL,
    response_size BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    id UUID PRIMARY KEY,
    code TEXT NOT NULL,
    title TEXT NOT NULL,
    details TEXT NOT NULL,
    confidence INT NOT NULL,
    severity TEXT NOT NULL,
    workspace_id UUID NOT NULL,
    scan_id UUID,
    scan_job_id UUID,
    api_endpoint_id UUID,
    url TEXT NOT NULL,
    history_ids UUID[] NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS issues_job_code_url_idx ON issues (scan_job_id, code, url);

CREATE TABLE IF NOT EXISTS api_definitions (
    id UUID PRIMARY KEY,
    workspace_id UUID NOT NULL,
    kind TEXT NOT NULL,
    base_url TEXT NOT NULL,
    source_url TEXT NOT NULL,
    raw BYTEA NOT NULL,
    target_namespace TEXT
);

CREATE TABLE IF NOT EXISTS api_endpoints (
    id UUID PRIMARY KEY,
    definition_id UUID NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    operation_id TEXT,
    soap_action TEXT,
    variations JSONB NOT NULL,
    scanned_issues INT
);

CREATE TABLE IF NOT EXISTS api_scan_progress (
    api_scan_id UUID PRIMARY KEY,
    completed_endpoints BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS api_auth_configs (
    id UUID PRIMARY KEY,
    doc JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS api_behavior_results (
    id UUID PRIMARY KEY,
    scan_id UUID NOT NULL,
    definition_id UUID NOT NULL,
    class TEXT NOT NULL,
    fingerprints JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS site_behavior_results (
    id UUID PRIMARY KEY,
    scan_id UUID NOT NULL,
    base_url TEXT NOT NULL,
    not_found_samples JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS websocket_connections (
    id UUID PRIMARY KEY,
    workspace_id UUID NOT NULL,
    scan_id UUID,
    url TEXT NOT NULL,
    request_headers JSONB NOT NULL,
    response_headers JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS websocket_messages (
    id UUID PRIMARY KEY,
    connection_id UUID NOT NULL,
    opcode INT NOT NULL,
    direction TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS jwts (
    token TEXT PRIMARY KEY,
    id UUID NOT NULL,
    history_id UUID,
    websocket_message_id UUID
);
"#;

fn scan_from_row(row: &Row) -> Result<Scan, DatabaseError> {
    let mode: String = row.get("mode");
    let state: String = row.get("state");
    let options: serde_json::Value = row.get("options");
    Ok(Scan {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        target: row.get("target"),
        mode: serde_json::from_value(serde_json::Value::String(mode))?,
        options: serde_json::from_value(options)?,
        pause_on_auth_failure: row.get("pause_on_auth_failure"),
        capture_browser_events: row.get("capture_browser_events"),
        state: serde_json::from_value(serde_json::Value::String(state))?,
        created_at: row.get("created_at"),
    })
}

fn job_from_row(row: &Row) -> Result<ScanJob, DatabaseError> {
    let job_type: String = row.get("job_type");
    let state: String = row.get("state");
    Ok(ScanJob {
        id: row.get("id"),
        scan_id: row.get("scan_id"),
        job_type: JobType::parse(&job_type).ok_or_else(|| {
            DatabaseError::Serialization(serde::de::Error::custom(format!(
                "unknown job type: {job_type}"
            )))
        })?,
        payload: row.get("payload"),
        state: JobState::parse(&state).ok_or_else(|| {
            DatabaseError::Serialization(serde::de::Error::custom(format!(
                "unknown job state: {state}"
            )))
        })?,
        claimed_by: row.get("claimed_by"),
        claimed_at: row.get("claimed_at"),
        finished_at: row.get("finished_at"),
        error_type: row.get("error_type"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}

fn history_from_row(row: &Row) -> History {
    History {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        scan_id: row.get("scan_id"),
        scan_job_id: row.get("scan_job_id"),
        api_endpoint_id: row.get("api_endpoint_id"),
        method: row.get("method"),
        url: row.get("url"),
        status_code: row.get::<_, i32>("status_code") as u16,
        request_raw: row.get("request_raw"),
        response_raw: row.get("response_raw"),
        response_hash: row.get("response_hash"),
        content_type: row.get("content_type"),
        request_size: row.get::<_, i64>("request_size") as u64,
        response_size: row.get::<_, i64>("response_size") as u64,
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Database for Store {
    async fn create_scan(&self, scan: &Scan) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO scans (id, workspace_id, target, mode, options, pause_on_auth_failure,
                                capture_browser_events, state, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &scan.id,
                &scan.workspace_id,
                &scan.target,
                &scan.mode.as_str(),
                &serde_json::to_value(&scan.options)?,
                &scan.pause_on_auth_failure,
                &scan.capture_browser_events,
                &scan.state.as_str(),
                &scan.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_scan(&self, id: Uuid) -> Result<Scan, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM scans WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound { entity: "scan", id })?;
        scan_from_row(&row)
    }

    async fn update_scan_state(&self, id: Uuid, state: ScanState) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let n = conn
            .execute(
                "UPDATE scans SET state = $2 WHERE id = $1",
                &[&id, &state.as_str()],
            )
            .await?;
        if n == 0 {
            return Err(DatabaseError::NotFound { entity: "scan", id });
        }
        Ok(())
    }

    async fn insert_job(&self, job: &ScanJob) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO scan_jobs (id, scan_id, job_type, payload, state, claimed_by,
                                    claimed_at, finished_at, error_type, error_message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &job.id,
                &job.scan_id,
                &job.job_type.as_str(),
                &job.payload,
                &job.state.as_str(),
                &job.claimed_by,
                &job.claimed_at,
                &job.finished_at,
                &job.error_type,
                &job.error_message,
                &job.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<ScanJob, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM scan_jobs WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "scan_job",
                id,
            })?;
        job_from_row(&row)
    }

    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<ScanJob>, DatabaseError> {
        let conn = self.conn().await?;
        // SKIP LOCKED makes concurrent claimants pick disjoint rows.
        let row = conn
            .query_opt(
                "WITH next AS (
                     SELECT id FROM scan_jobs
                     WHERE state = 'queued'
                     ORDER BY created_at
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 UPDATE scan_jobs
                 SET state = 'running', claimed_by = $1, claimed_at = NOW()
                 WHERE id IN (SELECT id FROM next)
                 RETURNING *",
                &[&worker_id],
            )
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    async fn update_job_state(
        &self,
        id: Uuid,
        state: JobState,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let n = conn
            .execute(
                "UPDATE scan_jobs
                 SET state = $2,
                     finished_at = CASE WHEN $3 THEN NOW() ELSE finished_at END,
                     error_type = COALESCE($4, error_type),
                     error_message = COALESCE($5, error_message)
                 WHERE id = $1",
                &[
                    &id,
                    &state.as_str(),
                    &state.is_terminal(),
                    &error_type,
                    &error_message,
                ],
            )
            .await?;
        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "scan_job",
                id,
            });
        }
        Ok(())
    }

    async fn create_history(&self, history: &History) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO histories (id, workspace_id, scan_id, scan_job_id, api_endpoint_id,
                                    method, url, status_code, request_raw, response_raw,
                                    response_hash, content_type, request_size, response_size,
                                    created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            &[
                &history.id,
                &history.workspace_id,
                &history.scan_id,
                &history.scan_job_id,
                &history.api_endpoint_id,
                &history.method,
                &history.url,
                &(history.status_code as i32),
                &history.request_raw,
                &history.response_raw,
                &history.response_hash,
                &history.content_type,
                &(history.request_size as i64),
                &(history.response_size as i64),
                &history.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_history(&self, id: Uuid) -> Result<History, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM histories WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "history",
                id,
            })?;
        Ok(history_from_row(&row))
    }

    async fn link_history_to_scan_job(
        &self,
        history_id: Uuid,
        scan_job_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE histories SET scan_job_id = $2 WHERE id = $1",
            &[&history_id, &scan_job_id],
        )
        .await?;
        Ok(())
    }

    async fn get_api_definition(&self, id: Uuid) -> Result<ApiDefinition, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM api_definitions WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "api_definition",
                id,
            })?;
        let kind: String = row.get("kind");
        Ok(ApiDefinition {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            kind: match kind.as_str() {
                "openapi" => ApiDefinitionKind::OpenApi,
                "graphql" => ApiDefinitionKind::GraphQl,
                _ => ApiDefinitionKind::Wsdl,
            },
            base_url: row.get("base_url"),
            source_url: row.get("source_url"),
            raw: row.get("raw"),
            target_namespace: row.get("target_namespace"),
        })
    }

    async fn get_api_endpoint_with_relations(
        &self,
        id: Uuid,
    ) -> Result<ApiEndpoint, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM api_endpoints WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "api_endpoint",
                id,
            })?;
        let variations: serde_json::Value = row.get("variations");
        Ok(ApiEndpoint {
            id: row.get("id"),
            definition_id: row.get("definition_id"),
            method: row.get("method"),
            path: row.get("path"),
            operation_id: row.get("operation_id"),
            soap_action: row.get("soap_action"),
            variations: serde_json::from_value(variations)?,
        })
    }

    async fn mark_api_endpoint_scanned(
        &self,
        id: Uuid,
        issues_found: u32,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE api_endpoints SET scanned_issues = $2 WHERE id = $1",
            &[&id, &(issues_found as i32)],
        )
        .await?;
        Ok(())
    }

    async fn increment_api_scan_completed_endpoints(
        &self,
        api_scan_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO api_scan_progress (api_scan_id, completed_endpoints)
             VALUES ($1, 1)
             ON CONFLICT (api_scan_id)
             DO UPDATE SET completed_endpoints = api_scan_progress.completed_endpoints + 1",
            &[&api_scan_id],
        )
        .await?;
        Ok(())
    }

    async fn get_api_auth_config_with_relations(
        &self,
        id: Uuid,
    ) -> Result<ApiAuthConfig, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT doc FROM api_auth_configs WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "api_auth_config",
                id,
            })?;
        let doc: serde_json::Value = row.get("doc");
        Ok(serde_json::from_value(doc)?)
    }

    async fn create_issue(&self, issue: &Issue) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO issues (id, code, title, details, confidence, severity, workspace_id,
                                 scan_id, scan_job_id, api_endpoint_id, url, history_ids,
                                 created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            &[
                &issue.id,
                &issue.code,
                &issue.title,
                &issue.details,
                &(issue.confidence as i32),
                &issue.severity.as_str(),
                &issue.workspace_id,
                &issue.scan_id,
                &issue.scan_job_id,
                &issue.api_endpoint_id,
                &issue.url,
                &issue.history_ids,
                &issue.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn issue_exists(
        &self,
        scan_job_id: Uuid,
        code: &str,
        url: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS(
                     SELECT 1 FROM issues
                     WHERE scan_job_id = $1 AND code = $2 AND url = $3
                 )",
                &[&scan_job_id, &code, &url],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create_api_behavior_result(
        &self,
        result: &ApiBehaviorResult,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO api_behavior_results (id, scan_id, definition_id, class, fingerprints,
                                               created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &result.id,
                &result.scan_id,
                &result.definition_id,
                &result.class.as_str(),
                &serde_json::to_value(&result.fingerprints)?,
                &result.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_api_behavior_for_definition(
        &self,
        scan_id: Uuid,
        definition_id: Uuid,
    ) -> Result<Vec<ApiBehaviorResult>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT * FROM api_behavior_results
                 WHERE scan_id = $1 AND definition_id = $2",
                &[&scan_id, &definition_id],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let class: String = row.get("class");
                let fingerprints: serde_json::Value = row.get("fingerprints");
                Ok(ApiBehaviorResult {
                    id: row.get("id"),
                    scan_id: row.get("scan_id"),
                    definition_id: row.get("definition_id"),
                    class: serde_json::from_value(serde_json::Value::String(class))?,
                    fingerprints: serde_json::from_value(fingerprints)?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn create_site_behavior_result(
        &self,
        result: &SiteBehaviorResult,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO site_behavior_results (id, scan_id, base_url, not_found_samples,
                                                created_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &result.id,
                &result.scan_id,
                &result.base_url,
                &serde_json::to_value(&result.not_found_samples)?,
                &result.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_site_behavior_for_scan(
        &self,
        scan_id: Uuid,
    ) -> Result<Option<SiteBehaviorResult>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT * FROM site_behavior_results WHERE scan_id = $1
                 ORDER BY created_at DESC LIMIT 1",
                &[&scan_id],
            )
            .await?;
        row.map(|row| {
            let samples: serde_json::Value = row.get("not_found_samples");
            Ok(SiteBehaviorResult {
                id: row.get("id"),
                scan_id: row.get("scan_id"),
                base_url: row.get("base_url"),
                not_found_samples: serde_json::from_value(samples)?,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    async fn create_site_behavior_not_found_sample(
        &self,
        result_id: Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE site_behavior_results
             SET not_found_samples = not_found_samples || $2::jsonb
             WHERE id = $1",
            &[&result_id, &serde_json::to_value(fingerprint)?],
        )
        .await?;
        Ok(())
    }

    async fn get_websocket_connection_with_messages(
        &self,
        id: Uuid,
    ) -> Result<WebSocketConnection, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM websocket_connections WHERE id = $1", &[&id])
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "websocket_connection",
                id,
            })?;
        let request_headers: serde_json::Value = row.get("request_headers");
        let response_headers: serde_json::Value = row.get("response_headers");
        let mut connection = WebSocketConnection {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            scan_id: row.get("scan_id"),
            url: row.get("url"),
            request_headers: serde_json::from_value(request_headers)?,
            response_headers: serde_json::from_value(response_headers)?,
            messages: Vec::new(),
        };

        let rows = conn
            .query(
                "SELECT * FROM websocket_messages WHERE connection_id = $1 ORDER BY timestamp",
                &[&id],
            )
            .await?;
        for row in rows {
            let direction: String = row.get("direction");
            connection.messages.push(WebSocketMessage {
                id: row.get("id"),
                connection_id: row.get("connection_id"),
                opcode: row.get::<_, i32>("opcode") as u8,
                direction: if direction == "sent" {
                    WsDirection::Sent
                } else {
                    WsDirection::Received
                },
                payload: row.get("payload"),
                timestamp: row.get("timestamp"),
            });
        }
        Ok(connection)
    }

    async fn create_websocket_message(
        &self,
        message: &WebSocketMessage,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO websocket_messages (id, connection_id, opcode, direction, payload,
                                             timestamp)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &message.id,
                &message.connection_id,
                &(message.opcode as i32),
                &match message.direction {
                    WsDirection::Sent => "sent",
                    WsDirection::Received => "received",
                },
                &message.payload,
                &message.timestamp,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_or_create_jwt_from_token_and_history(
        &self,
        token: &str,
        history_id: Uuid,
    ) -> Result<Uuid, DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO jwts (token, id, history_id) VALUES ($1, $2, $3)
             ON CONFLICT (token) DO NOTHING",
            &[&token, &Uuid::new_v4(), &history_id],
        )
        .await?;
        let row = conn
            .query_one("SELECT id FROM jwts WHERE token = $1", &[&token])
            .await?;
        Ok(row.get(0))
    }

    async fn get_or_create_jwt_from_token_and_websocket_message(
        &self,
        token: &str,
        message_id: Uuid,
    ) -> Result<Uuid, DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO jwts (token, id, websocket_message_id) VALUES ($1, $2, $3)
             ON CONFLICT (token) DO NOTHING",
            &[&token, &Uuid::new_v4(), &message_id],
        )
        .await?;
        let row = conn
            .query_one("SELECT id FROM jwts WHERE token = $1", &[&token])
            .await?;
        Ok(row.get(0))
    }
}
