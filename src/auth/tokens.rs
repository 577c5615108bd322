//! Lazy, refreshing token provider keyed by auth-config id.
//!
//! Each entry is refcounted by registered scans and holds its token under a
//! per-key mutex, so at most one refresh is in flight per key; concurrent
//! callers wait on the same lock and observe the refreshed value.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use secrecy::ExposeSecret;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::db::models::{ApiAuthConfig, RefreshBodyFormat, RefreshFlow, TokenRefreshConfig};
use crate::error::AuthError;

struct CachedToken {
    value: String,
    expires_at: Instant,
}

struct TokenEntry {
    refcount: AtomicUsize,
    cached: Mutex<Option<CachedToken>>,
}

/// Process-wide token manager.
pub struct TokenManager {
    client: reqwest::Client,
    entries: RwLock<HashMap<Uuid, Arc<TokenEntry>>>,
}

impl TokenManager {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create token refresh client");
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Take a refcount on an entry for the duration of a scan.
    pub async fn register_scan(&self, auth_config_id: Uuid) {
        let entry = self.entry(auth_config_id).await;
        entry.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Release a scan's refcount; the entry is evicted at zero.
    pub async fn unregister_scan(&self, auth_config_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&auth_config_id) {
            if entry.refcount.fetch_sub(1, Ordering::SeqCst) <= 1 {
                entries.remove(&auth_config_id);
            }
        }
    }

    /// Current token for the config, refreshing when it is missing or within
    /// the expiry skew.
    pub async fn get_token(&self, config: &ApiAuthConfig) -> Result<String, AuthError> {
        let refresh = config
            .refresh
            .as_ref()
            .ok_or(AuthError::RefreshUnsupported(config.id))?;
        let entry = self.entry(config.id).await;

        let mut cached = entry.cached.lock().await;
        let skew = Duration::from_secs(refresh.expiry_skew_secs);
        if let Some(token) = cached.as_ref() {
            if token.expires_at.saturating_duration_since(Instant::now()) > skew {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.refresh(refresh).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Bypass the cache and refresh now.
    pub async fn force_refresh(&self, config: &ApiAuthConfig) -> Result<String, AuthError> {
        let refresh = config
            .refresh
            .as_ref()
            .ok_or(AuthError::RefreshUnsupported(config.id))?;
        let entry = self.entry(config.id).await;

        let mut cached = entry.cached.lock().await;
        let fresh = self.refresh(refresh).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn entry(&self, id: Uuid) -> Arc<TokenEntry> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&id) {
                return entry.clone();
            }
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(id)
            .or_insert_with(|| {
                Arc::new(TokenEntry {
                    refcount: AtomicUsize::new(0),
                    cached: Mutex::new(None),
                })
            })
            .clone()
    }

    async fn refresh(&self, config: &TokenRefreshConfig) -> Result<CachedToken, AuthError> {
        let mut params: Vec<(&str, String)> = vec![
            ("grant_type", grant_type(config.flow).to_string()),
            ("client_id", config.client_id.clone()),
            ("client_secret", config.client_secret.expose_secret().to_string()),
        ];
        match config.flow {
            RefreshFlow::Password => {
                if let Some(username) = &config.username {
                    params.push(("username", username.clone()));
                }
                if let Some(password) = &config.password {
                    params.push(("password", password.expose_secret().to_string()));
                }
            }
            RefreshFlow::RefreshToken => {
                if let Some(token) = &config.refresh_token {
                    params.push(("refresh_token", token.expose_secret().to_string()));
                }
            }
            RefreshFlow::ClientCredentials => {}
        }
        if let Some(scope) = &config.scope {
            params.push(("scope", scope.clone()));
        }

        let request = self.client.post(&config.url);
        let request = match config.body_format {
            RefreshBodyFormat::Form => request.form(&params),
            RefreshBodyFormat::Json => {
                let body: HashMap<&str, &str> =
                    params.iter().map(|(k, v)| (*k, v.as_str())).collect();
                request.json(&body)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed {
                reason: format!("token endpoint returned {status}"),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::RefreshFailed {
                reason: "response missing access_token".to_string(),
            })?;
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);

        tracing::debug!(url = %config.url, "Refreshed token");
        Ok(CachedToken {
            value: access_token.to_string(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

fn grant_type(flow: RefreshFlow) -> &'static str {
    match flow {
        RefreshFlow::ClientCredentials => "client_credentials",
        RefreshFlow::Password => "password",
        RefreshFlow::RefreshToken => "refresh_token",
    }
}
