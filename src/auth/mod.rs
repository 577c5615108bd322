//! Credential application for API requests.
//!
//! Exactly one auth config is applied per request; custom headers always
//! append last so they can override whatever the credential surface set.

pub mod breaker;
pub mod tokens;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::ExposeSecret;

use crate::api::request::SynthesizedRequest;
use crate::auth::tokens::TokenManager;
use crate::db::models::{ApiAuthConfig, ApiKeyLocation, AuthKind};
use crate::error::AuthError;

/// Apply the config's credentials to a synthesized request.
pub async fn apply(
    config: &ApiAuthConfig,
    tokens: &TokenManager,
    request: &mut SynthesizedRequest,
) -> Result<(), AuthError> {
    match config.kind {
        AuthKind::Basic => {
            let user = config.username.as_deref().unwrap_or_default();
            let pass = config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            let encoded = BASE64.encode(format!("{user}:{pass}"));
            request.set_header("Authorization", format!("Basic {encoded}"));
        }
        AuthKind::Bearer | AuthKind::OAuth2 => {
            let token = current_token(config, tokens).await?;
            let prefix = config.prefix.as_deref().unwrap_or("Bearer");
            request.set_header("Authorization", format!("{prefix} {token}"));
        }
        AuthKind::ApiKey => {
            let value = current_token(config, tokens).await?;
            let name = config.key_name.as_deref().unwrap_or("X-Api-Key");
            match config.key_location.unwrap_or(ApiKeyLocation::Header) {
                ApiKeyLocation::Header => request.set_header(name, value),
                ApiKeyLocation::Query => request.append_query(name, &value),
                ApiKeyLocation::Cookie => request.append_cookie(name, &value),
            }
        }
    }

    for (name, value) in &config.custom_headers {
        request.set_header(name, value.clone());
    }
    Ok(())
}

/// Resolve the live credential: refreshed through the manager when the config
/// declares a refresh policy, the static value otherwise.
async fn current_token(
    config: &ApiAuthConfig,
    tokens: &TokenManager,
) -> Result<String, AuthError> {
    if config.refresh.is_some() {
        tokens.get_token(config).await
    } else {
        Ok(config
            .token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_default())
    }
}

/// Host portion of a URL, for breaker keys.
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request() -> SynthesizedRequest {
        SynthesizedRequest::new("GET", "http://api.example.com/v1/pets")
    }

    fn config(kind: AuthKind) -> ApiAuthConfig {
        ApiAuthConfig {
            id: Uuid::new_v4(),
            kind,
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string().into()),
            token: Some("tok-123".to_string().into()),
            prefix: None,
            key_name: Some("X-Api-Key".to_string()),
            key_location: Some(ApiKeyLocation::Header),
            custom_headers: Vec::new(),
            refresh: None,
        }
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let tokens = TokenManager::new();
        let mut req = request();
        apply(&config(AuthKind::Basic), &tokens, &mut req)
            .await
            .unwrap();
        // base64("alice:s3cret")
        assert_eq!(
            req.header("Authorization"),
            Some("Basic YWxpY2U6czNjcmV0")
        );
    }

    #[tokio::test]
    async fn test_bearer_with_default_prefix() {
        let tokens = TokenManager::new();
        let mut req = request();
        apply(&config(AuthKind::Bearer), &tokens, &mut req)
            .await
            .unwrap();
        assert_eq!(req.header("Authorization"), Some("Bearer tok-123"));
    }

    #[tokio::test]
    async fn test_bearer_with_custom_prefix() {
        let tokens = TokenManager::new();
        let mut cfg = config(AuthKind::Bearer);
        cfg.prefix = Some("Token".to_string());
        let mut req = request();
        apply(&cfg, &tokens, &mut req).await.unwrap();
        assert_eq!(req.header("Authorization"), Some("Token tok-123"));
    }

    #[tokio::test]
    async fn test_api_key_in_query() {
        let tokens = TokenManager::new();
        let mut cfg = config(AuthKind::ApiKey);
        cfg.key_name = Some("api_key".to_string());
        cfg.key_location = Some(ApiKeyLocation::Query);
        let mut req = request();
        apply(&cfg, &tokens, &mut req).await.unwrap();
        assert!(req.url.contains("api_key=tok-123"));
    }

    #[tokio::test]
    async fn test_api_key_in_cookie() {
        let tokens = TokenManager::new();
        let mut cfg = config(AuthKind::ApiKey);
        cfg.key_name = Some("session".to_string());
        cfg.key_location = Some(ApiKeyLocation::Cookie);
        let mut req = request();
        apply(&cfg, &tokens, &mut req).await.unwrap();
        assert_eq!(req.header("Cookie"), Some("session=tok-123"));
    }

    #[tokio::test]
    async fn test_custom_headers_append_last() {
        let tokens = TokenManager::new();
        let mut cfg = config(AuthKind::Bearer);
        cfg.custom_headers = vec![("Authorization".to_string(), "Custom override".to_string())];
        let mut req = request();
        apply(&cfg, &tokens, &mut req).await.unwrap();
        assert_eq!(req.header("Authorization"), Some("Custom override"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://api.example.com:8443/x"), "api.example.com");
        assert_eq!(host_of("not a url"), "not a url");
    }
}
