//! Bearer tokens for Azure Resource Manager

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::error::ArmError;

/// Default Microsoft Entra ID authority
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Source of bearer tokens
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<String, ArmError>;
}

/// A pre-acquired token (e.g. from `ARM_ACCESS_TOKEN`)
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<String, ArmError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

/// Entra ID returns `expires_in` as a number or a numeric string
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> i64 {
        match self {
            ExpiresIn::Seconds(s) => *s,
            ExpiresIn::Text(s) => s.parse().unwrap_or(0),
        }
    }
}

/// OAuth2 client-credentials flow for a service principal
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource_manager_endpoint: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: format!("{}/.default", resource_manager_endpoint.trim_end_matches('/')),
            cache: Mutex::new(None),
        }
    }

    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }

    async fn request_token(&self) -> Result<CachedToken, ArmError> {
        debug!("Requesting ARM token for client {}", self.client_id);
        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ArmError::Authentication(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ArmError::Authentication(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::try_seconds(parsed.expires_in.seconds()).ok_or_else(|| {
            ArmError::Authentication(format!(
                "token lifetime out of range: {} seconds",
                parsed.expires_in.seconds()
            ))
        })?;
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .ok_or_else(|| ArmError::Authentication("token expiry out of range".to_string()))?;

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String, ArmError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.expires_at - Duration::minutes(EXPIRY_MARGIN_MINUTES) > Utc::now()
        {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.request_token().await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let credential = StaticTokenCredential::new("abc");
        assert_eq!(credential.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn client_secret_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": "3599",
                "access_token": "token-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential =
            ClientSecretCredential::new("tenant", "client", "secret", "https://management.azure.com/")
                .with_authority_host(server.uri());

        assert_eq!(credential.token().await.unwrap(), "token-1");
        assert_eq!(credential.token().await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn token_close_to_expiry_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": 60,
                "access_token": "short-lived"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let credential =
            ClientSecretCredential::new("tenant", "client", "secret", "https://management.azure.com")
                .with_authority_host(server.uri());

        credential.token().await.unwrap();
        credential.token().await.unwrap();
    }

    #[tokio::test]
    async fn token_endpoint_error_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let credential =
            ClientSecretCredential::new("tenant", "client", "bad", "https://management.azure.com")
                .with_authority_host(server.uri());

        assert!(matches!(
            credential.token().await,
            Err(ArmError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_lifetime_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": i64::MAX,
                "access_token": "forever"
            })))
            .mount(&server)
            .await;

        let credential =
            ClientSecretCredential::new("tenant", "client", "secret", "https://management.azure.com")
                .with_authority_host(server.uri());

        assert!(matches!(
            credential.token().await,
            Err(ArmError::Authentication(_))
        ));
    }
}
