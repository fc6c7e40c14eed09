//! TV-side client for the first-party linking API.
//!
//! One `reqwest::Client` owned for the life of the app; every call carries
//! the persisted device-generation id and whichever bearer token the
//! endpoint expects. Non-2xx statuses are partitioned into client/server
//! errors so the poller can pick the right user-facing message.

use crate::errors::ApiError;
use crate::web::DEVICE_GENERATE_ID_HEADER;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCreated {
    pub state: String,
    pub tmp_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub completed: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderAccessToken {
    dropbox_access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFlowBody<'a> {
    device_generate_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokensBody<'a> {
    device_id: &'a str,
    refresh_token: &'a str,
}

#[derive(Clone)]
pub struct LinkClient {
    http: reqwest::Client,
    base_url: String,
}

impl LinkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL the TV encodes into the QR code; the phone lands on the link
    /// page with the flow `state` attached.
    pub fn qr_url(&self, state: &str) -> String {
        format!("{}?state={}", self.base_url, urlencoding::encode(state))
    }

    pub async fn start_flow(&self, device_generate_id: &str) -> Result<FlowCreated, ApiError> {
        let response = self
            .http
            .post(format!("{}/api/auth/flows", self.base_url))
            .json(&CreateFlowBody { device_generate_id })
            .send()
            .await?;
        Ok(classify(response)?.json().await?)
    }

    pub async fn check_flow(
        &self,
        state: &str,
        device_generate_id: &str,
        tmp_token: &str,
    ) -> Result<FlowStatus, ApiError> {
        let response = self
            .http
            .get(format!("{}/api/auth/flows/{}", self.base_url, state))
            .header(DEVICE_GENERATE_ID_HEADER, device_generate_id)
            .bearer_auth(tmp_token)
            .send()
            .await?;
        Ok(classify(response)?.json().await?)
    }

    pub async fn cancel_flow(
        &self,
        state: &str,
        device_generate_id: &str,
        tmp_token: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(format!("{}/api/auth/flows/{}", self.base_url, state))
            .header(DEVICE_GENERATE_ID_HEADER, device_generate_id)
            .bearer_auth(tmp_token)
            .send()
            .await?;
        classify(response)?;
        Ok(())
    }

    pub async fn refresh_tokens(
        &self,
        device_id: &str,
        refresh_token: &str,
        device_generate_id: &str,
    ) -> Result<RotatedTokens, ApiError> {
        let response = self
            .http
            .post(format!("{}/api/auth/tokens", self.base_url))
            .header(DEVICE_GENERATE_ID_HEADER, device_generate_id)
            .json(&RefreshTokensBody {
                device_id,
                refresh_token,
            })
            .send()
            .await?;
        Ok(classify(response)?.json().await?)
    }

    /// Trades the first-party access token for a short-lived provider
    /// access token. The TV asks again next session; nothing is cached.
    pub async fn provider_access_token(
        &self,
        device_id: &str,
        access_token: &str,
        device_generate_id: &str,
    ) -> Result<String, ApiError> {
        let response = self
            .http
            .get(format!("{}/api/devices/{}", self.base_url, device_id))
            .header(DEVICE_GENERATE_ID_HEADER, device_generate_id)
            .bearer_auth(access_token)
            .send()
            .await?;
        let body: ProviderAccessToken = classify(response)?.json().await?;
        Ok(body.dropbox_access_token)
    }

    pub async fn deregister(
        &self,
        device_id: &str,
        access_token: &str,
        device_generate_id: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(format!("{}/api/devices/{}", self.base_url, device_id))
            .header(DEVICE_GENERATE_ID_HEADER, device_generate_id)
            .bearer_auth(access_token)
            .send()
            .await?;
        classify(response)?;
        Ok(())
    }
}

fn classify(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_client_error() {
        Err(ApiError::Client(status.as_u16()))
    } else if status.is_server_error() {
        Err(ApiError::Server(status.as_u16()))
    } else {
        Ok(response)
    }
}
