//! Device and first-party token lifecycle.
//!
//! A device identity is created exactly once, at flow completion, and from
//! then on the TV authenticates with first-party tokens minted here. The
//! provider refresh token stays server-side; the TV trades its access token
//! for a short-lived provider access token on demand.

use crate::errors::SyzygyError;
use crate::provider::ProviderOAuth;
use crate::security::{generate_salt, generate_token, Digester};
use crate::store::{DeviceRecord, StateStore, TokenDigest};

/// Freshly minted first-party credentials. The raw values exist only in
/// this response; the store keeps digests.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct DeviceManager {
    store: StateStore,
    digester: Digester,
    provider: ProviderOAuth,
}

fn bad_request() -> SyzygyError {
    // One generic message for every verification failure so callers cannot
    // learn which check tripped.
    SyzygyError::BadRequest("Bad Request".to_string())
}

impl DeviceManager {
    pub fn new(store: StateStore, digester: Digester, provider: ProviderOAuth) -> Self {
        Self {
            store,
            digester,
            provider,
        }
    }

    /// Persists the device-to-provider linkage created at flow completion.
    pub(crate) async fn register(
        &self,
        device_id: &str,
        record: &DeviceRecord,
    ) -> Result<(), SyzygyError> {
        self.store.put_device(device_id, record).await
    }

    /// Mints a new access/refresh pair and overwrites the device's token
    /// slots. Overwriting is the revocation: the previous pair stops
    /// verifying the moment the new digests land.
    pub async fn issue_token_pair(&self, device_id: &str) -> Result<TokenPair, SyzygyError> {
        let access_token = generate_token();
        let refresh_token = generate_token();

        let access_salt = generate_salt();
        self.store
            .put_access_token(
                device_id,
                &TokenDigest {
                    digest: self.digester.digest(&access_token, &access_salt),
                    salt: access_salt,
                },
            )
            .await?;

        let refresh_salt = generate_salt();
        self.store
            .put_refresh_token(
                device_id,
                &TokenDigest {
                    digest: self.digester.digest(&refresh_token, &refresh_salt),
                    salt: refresh_salt,
                },
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Rotates the first-party pair. Every failure collapses to the same
    /// `BadRequest`; the device record's TTL is extended on success.
    pub async fn refresh(
        &self,
        device_id: &str,
        refresh_token: &str,
        device_generate_id: &str,
    ) -> Result<TokenPair, SyzygyError> {
        let slot = self
            .store
            .get_refresh_token(device_id)
            .await?
            .ok_or_else(bad_request)?;
        if !self.digester.verify(&slot.digest, &slot.salt, refresh_token) {
            return Err(bad_request());
        }

        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(bad_request)?;
        if device.device_generate_id != device_generate_id {
            return Err(bad_request());
        }

        let pair = self.issue_token_pair(device_id).await?;
        self.store.extend_device(device_id).await?;
        Ok(pair)
    }

    async fn verify_access(
        &self,
        device_id: &str,
        access_token: &str,
        device_generate_id: &str,
    ) -> Result<DeviceRecord, SyzygyError> {
        let slot = self
            .store
            .get_access_token(device_id)
            .await?
            .ok_or(SyzygyError::Unauthorized)?;
        if !self.digester.verify(&slot.digest, &slot.salt, access_token) {
            return Err(SyzygyError::Unauthorized);
        }

        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or(SyzygyError::Unauthorized)?;
        if device.device_generate_id != device_generate_id {
            return Err(bad_request());
        }
        Ok(device)
    }

    /// Exchanges the stored provider refresh token for a fresh provider
    /// access token. Nothing is persisted; the provider token is good for
    /// roughly four hours and the TV re-requests it per session.
    pub async fn provider_access_token(
        &self,
        device_id: &str,
        access_token: &str,
        device_generate_id: &str,
    ) -> Result<String, SyzygyError> {
        let device = self
            .verify_access(device_id, access_token, device_generate_id)
            .await?;
        self.provider
            .refresh_access_token(&device.provider_refresh_token)
            .await
    }

    /// Unlinks the device. The token slots are removed as well, so the
    /// still-live first-party pair dies with the record instead of waiting
    /// out its own TTL.
    pub async fn deregister(
        &self,
        device_id: &str,
        access_token: &str,
        device_generate_id: &str,
    ) -> Result<(), SyzygyError> {
        self.verify_access(device_id, access_token, device_generate_id)
            .await?;
        self.store.delete_device(device_id).await?;
        self.store.delete_tokens(device_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings;
    use crate::store::{Kv, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_with_provider(token_url: String) -> DeviceManager {
        let kv: Arc<dyn Kv> = Arc::new(MemoryStore::new());
        let provider = settings::Provider {
            app_key: "app-key".to_string(),
            app_secret: "app-secret".to_string(),
            authorize_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url,
            redirect_uri: None,
        };
        DeviceManager::new(
            StateStore::new(kv),
            Digester::new("test-pepper"),
            ProviderOAuth::new(&provider, "http://localhost/api/auth/callback".to_string()),
        )
    }

    fn manager() -> DeviceManager {
        manager_with_provider("http://localhost/oauth2/token".to_string())
    }

    async fn linked_device(manager: &DeviceManager, device_id: &str) -> TokenPair {
        manager
            .register(
                device_id,
                &DeviceRecord {
                    device_generate_id: "gen-1".to_string(),
                    provider_refresh_token: "provider-rt".to_string(),
                },
            )
            .await
            .unwrap();
        manager.issue_token_pair(device_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_revokes_previous_pair() {
        let manager = manager();
        let first = linked_device(&manager, "dev-1").await;

        let second = manager
            .refresh("dev-1", &first.refresh_token, "gen-1")
            .await
            .unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_ne!(first.access_token, second.access_token);

        // The superseded refresh token must never mint another pair
        let stale = manager.refresh("dev-1", &first.refresh_token, "gen-1").await;
        assert!(matches!(stale, Err(SyzygyError::BadRequest(_))));

        // The current one works exactly once more
        assert!(manager
            .refresh("dev-1", &second.refresh_token, "gen-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_failures_are_indistinguishable() {
        let manager = manager();
        let pair = linked_device(&manager, "dev-1").await;

        let unknown_device = manager
            .refresh("dev-x", &pair.refresh_token, "gen-1")
            .await
            .unwrap_err();
        let wrong_token = manager
            .refresh("dev-1", "forged-token", "gen-1")
            .await
            .unwrap_err();
        let wrong_identity = manager
            .refresh("dev-1", &pair.refresh_token, "gen-2")
            .await
            .unwrap_err();

        for err in [unknown_device, wrong_token, wrong_identity] {
            match err {
                SyzygyError::BadRequest(message) => assert_eq!(message, "Bad Request"),
                other => panic!("expected BadRequest, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_provider_access_token_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=provider-rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "provider-at",
                "token_type": "bearer",
                "expires_in": 14400
            })))
            .mount(&server)
            .await;

        let manager = manager_with_provider(format!("{}/oauth2/token", server.uri()));
        let pair = linked_device(&manager, "dev-1").await;

        let provider_token = manager
            .provider_access_token("dev-1", &pair.access_token, "gen-1")
            .await
            .unwrap();
        assert_eq!(provider_token, "provider-at");

        // Wrong bearer token cannot reach the provider
        let denied = manager
            .provider_access_token("dev-1", "forged", "gen-1")
            .await;
        assert!(matches!(denied, Err(SyzygyError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_identity_mismatch_is_distinct_from_unauthorized() {
        let manager = manager();
        let pair = linked_device(&manager, "dev-1").await;

        let err = manager
            .provider_access_token("dev-1", &pair.access_token, "other-gen")
            .await
            .unwrap_err();
        assert!(matches!(err, SyzygyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_deregister_revokes_synchronously() {
        let manager = manager();
        let pair = linked_device(&manager, "dev-1").await;

        manager
            .deregister("dev-1", &pair.access_token, "gen-1")
            .await
            .unwrap();

        // Both the record and the live pair are gone
        let err = manager
            .deregister("dev-1", &pair.access_token, "gen-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyzygyError::Unauthorized));
        let err = manager.refresh("dev-1", &pair.refresh_token, "gen-1").await;
        assert!(matches!(err, Err(SyzygyError::BadRequest(_))));
    }
}
