//! Session issuance against the upstream analytics platform.
//!
//! [`JwtSessionProvider`] signs a short-lived HS256 token for the user and
//! exchanges it for a session cookie by calling an authenticated endpoint on
//! the platform through its virtual proxy. The same endpoint, called with
//! the cookie, is the liveness probe.

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use reportbridge_core::config::{env_optional, env_or, env_required, ConfigError};
use reportbridge_core::script::SessionCredential;
use reportbridge_core::types::UserIdentity;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default token lifetime in seconds.
const DEFAULT_EXPIRY_SECS: i64 = 60;
/// Default session cookie name.
const DEFAULT_COOKIE_NAME: &str = "X-Qlik-Session";
/// Default authenticated endpoint used for issuance and probing.
const DEFAULT_PROBE_PATH: &str = "/api/hub/v1/user/info";

/// What a session is shared by: server, user and target app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub server_uri: String,
    pub user: UserIdentity,
    pub app_id: String,
}

impl SessionKey {
    pub fn new(server_uri: impl Into<String>, user: UserIdentity, app_id: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            user,
            app_id: app_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user, self.server_uri, self.app_id)
    }
}

/// Errors raised while obtaining a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to sign session token")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("Platform rejected the session request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Platform issued no session for {key}")]
    NotIssued { key: String },
}

/// External auth/session provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Issue a new credential for `key`, `None` when the platform answered
    /// without one.
    async fn issue(&self, key: &SessionKey) -> Result<Option<SessionCredential>, SessionError>;

    /// Cheap authenticated request telling whether `credential` still works.
    async fn validate(&self, key: &SessionKey, credential: &SessionCredential) -> bool;

    /// Tear down any live connection held for `credential`.
    async fn release(&self, key: &SessionKey, credential: &SessionCredential);
}

// ---------------------------------------------------------------------------
// JWT provider
// ---------------------------------------------------------------------------

/// Configuration of the JWT session exchange.
#[derive(Clone)]
pub struct JwtSessionConfig {
    /// HS256 secret shared with the platform's JWT virtual proxy.
    pub secret: String,
    /// Token lifetime in seconds.
    pub expiry_secs: i64,
    /// Virtual proxy prefix, empty for the default proxy.
    pub virtual_proxy: String,
    pub cookie_name: String,
    pub probe_path: String,
}

impl JwtSessionConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                   | Required | Default                  |
    /// |---------------------------|----------|--------------------------|
    /// | `SESSION_JWT_SECRET`      | **yes**  | --                       |
    /// | `SESSION_JWT_EXPIRY_SECS` | no       | `60`                     |
    /// | `SESSION_VIRTUAL_PROXY`   | no       | empty                    |
    /// | `SESSION_COOKIE_NAME`     | no       | `X-Qlik-Session`         |
    /// | `SESSION_PROBE_PATH`      | no       | `/api/hub/v1/user/info`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret: env_required("SESSION_JWT_SECRET")?,
            expiry_secs: env_or("SESSION_JWT_EXPIRY_SECS", DEFAULT_EXPIRY_SECS)?,
            virtual_proxy: env_optional("SESSION_VIRTUAL_PROXY").unwrap_or_default(),
            cookie_name: env_optional("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.into()),
            probe_path: env_optional("SESSION_PROBE_PATH")
                .unwrap_or_else(|| DEFAULT_PROBE_PATH.into()),
        })
    }
}

impl fmt::Debug for JwtSessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSessionConfig")
            .field("secret", &"[REDACTED]")
            .field("expiry_secs", &self.expiry_secs)
            .field("virtual_proxy", &self.virtual_proxy)
            .field("cookie_name", &self.cookie_name)
            .field("probe_path", &self.probe_path)
            .finish()
    }
}

/// Claims of the short-lived token exchanged for a session.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account name inside the user directory.
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userDirectory")]
    pub user_directory: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Issues sessions by exchanging signed tokens over HTTP.
pub struct JwtSessionProvider {
    client: reqwest::Client,
    config: JwtSessionConfig,
}

impl JwtSessionProvider {
    pub fn new(config: JwtSessionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Sign a token for `user` valid for the configured lifetime.
    pub fn sign(&self, user: &UserIdentity) -> Result<String, SessionError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            user_id: user.id.clone(),
            user_directory: user.directory.clone(),
            exp: now + self.config.expiry_secs,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )?)
    }

    fn probe_url(&self, server_uri: &str) -> String {
        let proxy = self.config.virtual_proxy.trim_matches('/');
        let path = self.config.probe_path.trim_start_matches('/');
        if proxy.is_empty() {
            format!("{}/{path}", server_uri.trim_end_matches('/'))
        } else {
            format!("{}/{proxy}/{path}", server_uri.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl SessionProvider for JwtSessionProvider {
    async fn issue(&self, key: &SessionKey) -> Result<Option<SessionCredential>, SessionError> {
        let token = self.sign(&key.user)?;
        let response = self
            .client
            .get(self.probe_url(&key.server_uri))
            .bearer_auth(&token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SessionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let Some(cookie_value) = session_cookie(response.headers(), &self.config.cookie_name) else {
            tracing::warn!(
                session = %key,
                cookie = %self.config.cookie_name,
                "Platform accepted the token but set no session cookie",
            );
            return Ok(None);
        };

        tracing::debug!(session = %key, "Issued platform session");
        Ok(Some(SessionCredential {
            cookie_name: self.config.cookie_name.clone(),
            cookie_value,
            bearer_token: Some(token),
        }))
    }

    async fn validate(&self, key: &SessionKey, credential: &SessionCredential) -> bool {
        let result = self
            .client
            .get(self.probe_url(&key.server_uri))
            .header(
                COOKIE,
                format!("{}={}", credential.cookie_name, credential.cookie_value),
            )
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(session = %key, error = %e, "Session probe failed");
                false
            }
        }
    }

    async fn release(&self, key: &SessionKey, _credential: &SessionCredential) {
        // Plain HTTP sessions hold no open connection; the cookie stays valid.
        tracing::debug!(session = %key, "Released platform session");
    }
}

/// Value of the `name` cookie among the `Set-Cookie` headers.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(cookie_name, _)| cookie_name.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use reqwest::header::HeaderValue;

    fn config(proxy: &str) -> JwtSessionConfig {
        JwtSessionConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".into(),
            expiry_secs: 60,
            virtual_proxy: proxy.into(),
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            probe_path: DEFAULT_PROBE_PATH.into(),
        }
    }

    #[test]
    fn signed_token_carries_the_user() {
        let provider = JwtSessionProvider::new(config(""));
        let token = provider.sign(&UserIdentity::new("CORP", "alice")).unwrap();

        let claims = decode::<SessionClaims>(
            &token,
            &DecodingKey::from_secret(b"test-secret-that-is-long-enough-for-hmac"),
            &Validation::default(),
        )
        .unwrap()
        .claims;
        assert_eq!(claims.user_id, "alice");
        assert_eq!(claims.user_directory, "CORP");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn probe_url_includes_the_virtual_proxy() {
        let plain = JwtSessionProvider::new(config(""));
        assert_eq!(
            plain.probe_url("https://sense/"),
            "https://sense/api/hub/v1/user/info"
        );
        let proxied = JwtSessionProvider::new(config("/jwt/"));
        assert_eq!(
            proxied.probe_url("https://sense"),
            "https://sense/jwt/api/hub/v1/user/info"
        );
    }

    #[test]
    fn session_cookie_is_found_among_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("other=1; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("X-Qlik-Session=abc-123; Path=/; HttpOnly"),
        );
        assert_eq!(
            session_cookie(&headers, "X-Qlik-Session").as_deref(),
            Some("abc-123")
        );
        assert_eq!(session_cookie(&headers, "missing"), None);
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let rendered = format!("{:?}", config(""));
        assert!(!rendered.contains("test-secret"));
    }
}
