//! Server-to-server client for the provider's OAuth endpoints.
//!
//! Two exchanges happen here: the authorization-code exchange performed by
//! the consent callback, and the refresh-token exchange that mints the
//! short-lived provider access token handed back to the TV. The provider
//! refresh token itself never leaves this process.

use crate::errors::SyzygyError;
use crate::settings;
use serde::Deserialize;

/// Token response from the provider's token endpoint. Unknown fields
/// (scope, uid, account id) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Owns one HTTP client for the process lifetime; constructed once at
/// startup and injected into the collaborators that need it.
#[derive(Clone)]
pub struct ProviderOAuth {
    client: reqwest::Client,
    app_key: String,
    app_secret: String,
    authorize_url: String,
    token_url: String,
    redirect_uri: String,
}

impl ProviderOAuth {
    pub fn new(provider: &settings::Provider, redirect_uri: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            app_key: provider.app_key.clone(),
            app_secret: provider.app_secret.clone(),
            authorize_url: provider.authorize_url.clone(),
            token_url: provider.token_url.clone(),
            redirect_uri,
        }
    }

    /// Hosted consent URL the phone browser is sent to.
    /// `token_access_type=offline` is what makes the provider return a
    /// refresh token on the code exchange.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&token_access_type=offline&state={}",
            self.authorize_url,
            urlencoding::encode(&self.app_key),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }

    /// Authorization-code exchange, called from the consent callback.
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, SyzygyError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &self.redirect_uri),
                ("client_id", &self.app_key),
                ("client_secret", &self.app_secret),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyzygyError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Refresh-token exchange: mints a short-lived provider access token
    /// (provider TTL is about four hours) from the stored refresh token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, SyzygyError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyzygyError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let tokens: ProviderTokens = response.json().await?;
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_settings(token_url: String) -> settings::Provider {
        settings::Provider {
            app_key: "app-key".to_string(),
            app_secret: "app-secret".to_string(),
            authorize_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url,
            redirect_uri: None,
        }
    }

    #[test]
    fn test_authorize_url_carries_state_and_offline_access() {
        let oauth = ProviderOAuth::new(
            &provider_settings("https://api.example.com/oauth2/token".to_string()),
            "https://link.example.com/api/auth/callback".to_string(),
        );
        let url = oauth.authorize_url("state-123");
        assert!(url.starts_with("https://www.dropbox.com/oauth2/authorize?"));
        assert!(url.contains("client_id=app-key"));
        assert!(url.contains("token_access_type=offline"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains(&urlencoding::encode("https://link.example.com/api/auth/callback").into_owned()));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "provider-at",
                "refresh_token": "provider-rt",
                "token_type": "bearer",
                "expires_in": 14400,
                "uid": "12345",
                "account_id": "dbid:xyz"
            })))
            .mount(&server)
            .await;

        let oauth = ProviderOAuth::new(
            &provider_settings(format!("{}/oauth2/token", server.uri())),
            "https://link.example.com/api/auth/callback".to_string(),
        );
        let tokens = oauth.exchange_code("auth-code").await.unwrap();
        assert_eq!(tokens.access_token, "provider-at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("provider-rt"));
        assert_eq!(tokens.expires_in, Some(14400));
    }

    #[tokio::test]
    async fn test_exchange_code_surfaces_provider_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let oauth = ProviderOAuth::new(
            &provider_settings(format!("{}/oauth2/token", server.uri())),
            "https://link.example.com/api/auth/callback".to_string(),
        );
        match oauth.exchange_code("bad-code").await {
            Err(SyzygyError::Provider { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_uses_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-provider-at",
                "token_type": "bearer",
                "expires_in": 14400
            })))
            .mount(&server)
            .await;

        let oauth = ProviderOAuth::new(
            &provider_settings(format!("{}/oauth2/token", server.uri())),
            "https://link.example.com/api/auth/callback".to_string(),
        );
        let access = oauth.refresh_access_token("provider-rt").await.unwrap();
        assert_eq!(access, "fresh-provider-at");
    }
}
