//! WebSocket scan executor.
//!
//! One stored message is the mutation point. Each injected payload gets a
//! fresh connection; the scanner watches both direct replies and frames
//! arriving during the observation window before resetting for the next
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::control::ScanControl;
use crate::db::Database;
use crate::db::models::{
    Issue, JobType, Scan, ScanJob, WebSocketConnection, WebSocketMessage, WsDirection,
};
use crate::error::ExecutorError;
use crate::scan::insertion::{InsertionPoint, extract_from_ws_payload};
use crate::scan::passive::PassivePipeline;
use crate::scan::{AuditCategory, PayloadGenerator, set_json_path};
use crate::worker::payloads::WebSocketScanJobData;
use crate::worker::registry::{Executor, JobContext};

pub struct WebSocketScanExecutor {
    db: Arc<dyn Database>,
    passive: Arc<PassivePipeline>,
    generators: Vec<Arc<dyn PayloadGenerator>>,
}

impl WebSocketScanExecutor {
    pub fn new(
        db: Arc<dyn Database>,
        passive: Arc<PassivePipeline>,
        generators: Vec<Arc<dyn PayloadGenerator>>,
    ) -> Self {
        Self {
            db,
            passive,
            generators,
        }
    }

    /// One injection attempt on a fresh connection. Returns the frames that
    /// arrived within the observation window.
    async fn inject_and_observe(
        &self,
        connection: &WebSocketConnection,
        replayed: &[&WebSocketMessage],
        mutated_payload: &str,
        window: Duration,
    ) -> Result<Vec<String>, ExecutorError> {
        let (mut ws, _) = connect_async(connection.url.as_str())
            .await
            .map_err(|e| ExecutorError::Execution(format!("websocket connect failed: {e}")))?;

        for message in replayed {
            ws.send(Message::Text(message.payload.clone().into()))
                .await
                .map_err(|e| ExecutorError::Execution(format!("replay failed: {e}")))?;
        }
        ws.send(Message::Text(mutated_payload.to_string().into()))
            .await
            .map_err(|e| ExecutorError::Execution(format!("send failed: {e}")))?;

        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, ws.next()).await {
                Err(_) => break,
                Ok(None) => break,
                Ok(Some(Ok(message))) => {
                    let opcode = match &message {
                        Message::Text(_) => 1,
                        Message::Binary(_) => 2,
                        _ => continue,
                    };
                    if let Ok(text) = message.into_text() {
                        let frame = WebSocketMessage {
                            id: Uuid::new_v4(),
                            connection_id: connection.id,
                            opcode,
                            direction: WsDirection::Received,
                            payload: text.to_string(),
                            timestamp: Utc::now(),
                        };
                        self.db.create_websocket_message(&frame).await?;
                        frames.push(frame.payload);
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::debug!("WebSocket read error during observation: {e}");
                    break;
                }
            }
        }

        let _ = ws.close(None).await;
        Ok(frames)
    }
}

#[async_trait]
impl Executor for WebSocketScanExecutor {
    fn job_type(&self) -> JobType {
        JobType::WebsocketScan
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: WebSocketScanJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let connection = self
            .db
            .get_websocket_connection_with_messages(data.websocket_connection_id)
            .await?;

        if data.run_passive_scan {
            let issues = self
                .passive
                .scan_websocket_connection(&ctx.scan, &connection)
                .await?;
            tracing::debug!(
                connection_id = %connection.id,
                issues = issues.len(),
                "Passive websocket pass finished"
            );
        }

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let target = connection
            .messages
            .get(data.target_message_index)
            .filter(|m| m.direction == WsDirection::Sent)
            .ok_or_else(|| {
                ExecutorError::Execution(format!(
                    "target message index {} is not a sent message",
                    data.target_message_index
                ))
            })?;

        let replayed: Vec<&WebSocketMessage> = if data.replay_messages {
            connection.messages[..data.target_message_index]
                .iter()
                .filter(|m| m.direction == WsDirection::Sent)
                .collect()
        } else {
            Vec::new()
        };

        let insertion_points = extract_from_ws_payload(&target.payload);
        let window = Duration::from_secs(data.observation_window);
        let mut issues = 0u32;

        for generator in self
            .generators
            .iter()
            .filter(|g| g.category() == AuditCategory::ServerSide)
        {
            for payload in generator.payloads(data.mode) {
                for point in &insertion_points {
                    if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
                        return Err(ExecutorError::Cancelled);
                    }

                    let mutated = mutate_ws_payload(&target.payload, point, &payload.value);
                    let frames = match self
                        .inject_and_observe(&connection, &replayed, &mutated, window)
                        .await
                    {
                        Ok(frames) => frames,
                        Err(e) => {
                            tracing::debug!("WebSocket attempt failed: {e}");
                            continue;
                        }
                    };

                    let hit = frames.iter().any(|frame| {
                        match &payload.evidence_pattern {
                            Some(pattern) => regex::Regex::new(pattern)
                                .map(|re| re.is_match(frame))
                                .unwrap_or(false),
                            None => frame.contains(&payload.value),
                        }
                    });
                    if !hit {
                        continue;
                    }
                    if payload.confidence < payload.issue.report_threshold() {
                        continue;
                    }
                    if self
                        .db
                        .issue_exists(job.id, payload.issue.code(), &connection.url)
                        .await?
                    {
                        continue;
                    }

                    let issue = ws_finding(&ctx.scan, job, &connection, &payload.description, point, &payload);
                    self.db.create_issue(&issue).await?;
                    issues += 1;
                }
            }
        }

        tracing::info!(
            connection_id = %connection.id,
            issues,
            "WebSocket scan finished"
        );

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}

/// Substitute one insertion point in the message payload.
fn mutate_ws_payload(original: &str, point: &InsertionPoint, value: &str) -> String {
    if point.name == "message" {
        return value.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(original) {
        Ok(mut parsed) => {
            set_json_path(&mut parsed, &point.name, value);
            parsed.to_string()
        }
        Err(_) => value.to_string(),
    }
}

fn ws_finding(
    scan: &Scan,
    job: &ScanJob,
    connection: &WebSocketConnection,
    description: &str,
    point: &InsertionPoint,
    payload: &crate::scan::AttackPayload,
) -> Issue {
    Issue {
        id: Uuid::new_v4(),
        code: payload.issue.code().to_string(),
        title: payload.issue.title().to_string(),
        details: format!(
            "Payload {:?} ({description}) injected at websocket field {} produced a matching frame",
            payload.value, point.name
        ),
        confidence: payload.confidence,
        severity: payload.issue.severity(),
        workspace_id: connection.workspace_id,
        scan_id: Some(scan.id),
        scan_job_id: Some(job.id),
        api_endpoint_id: None,
        url: connection.url.clone(),
        history_ids: Vec::new(),
        created_at: Utc::now(),
    }
}
