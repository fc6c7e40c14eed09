//! Flow state machine: the lifecycle of one authorization attempt.
//!
//! A flow is created when the TV asks to link, completed when the provider
//! callback lands with a refresh token, and consumed exactly once by the
//! poll that first observes completion. Consumption deletes the record, so
//! the record's absence is the terminal state; TTL expiry reads the same as
//! deletion to every caller.

use crate::device::DeviceManager;
use crate::errors::SyzygyError;
use crate::security::{generate_salt, generate_token, Digester};
use crate::store::{DeviceRecord, Expiry, FlowRecord, StateStore, FLOW_TTL_SECONDS};
use std::sync::Arc;
use uuid::Uuid;

/// Handed to the TV at creation. The raw temporary token exists only here;
/// the store keeps its digest.
#[derive(Debug, Clone)]
pub struct CreatedFlow {
    pub state: String,
    pub tmp_token: String,
}

/// Outcome of a poll against an existing flow.
#[derive(Debug, Clone)]
pub enum FlowCheck {
    Pending,
    Completed {
        device_id: String,
        access_token: String,
        refresh_token: String,
    },
}

pub struct FlowManager {
    store: StateStore,
    digester: Digester,
    devices: Arc<DeviceManager>,
}

impl FlowManager {
    pub fn new(store: StateStore, digester: Digester, devices: Arc<DeviceManager>) -> Self {
        Self {
            store,
            digester,
            devices,
        }
    }

    /// Starts a flow. `state` doubles as the OAuth CSRF parameter and the
    /// QR-encoded flow id, so it is a full-strength random token rather
    /// than a UUID.
    pub async fn create(&self, device_generate_id: &str) -> Result<CreatedFlow, SyzygyError> {
        if device_generate_id.trim().is_empty() {
            return Err(SyzygyError::BadRequest(
                "deviceGenerateId is required".to_string(),
            ));
        }

        let state = generate_token();
        let tmp_token = generate_token();
        let salt = generate_salt();

        let record = FlowRecord {
            tmp_token_digest: self.digester.digest(&tmp_token, &salt),
            salt,
            device_generate_id: device_generate_id.to_string(),
            completed: false,
            provider_refresh_token: None,
        };
        self.store
            .put_flow(&state, &record, Expiry::After(FLOW_TTL_SECONDS))
            .await?;

        Ok(CreatedFlow { state, tmp_token })
    }

    /// Existence check for the consent callback, which must verify the
    /// `state` before spending a provider round-trip on the code exchange.
    pub async fn lookup(&self, state: &str) -> Result<FlowRecord, SyzygyError> {
        self.store
            .get_flow(state)
            .await?
            .ok_or(SyzygyError::NotFound)
    }

    /// Records consent completion. The one mutation a flow record ever
    /// sees: `completed` flips to true and the provider refresh token is
    /// attached. The remaining absolute TTL is preserved.
    pub async fn complete(
        &self,
        state: &str,
        provider_refresh_token: &str,
    ) -> Result<(), SyzygyError> {
        let mut record = self.lookup(state).await?;
        record.completed = true;
        record.provider_refresh_token = Some(provider_refresh_token.to_string());
        self.store.put_flow(state, &record, Expiry::Keep).await
    }

    /// Three-step verification: record exists, client identity matches,
    /// bearer token verifies. Each failure collapses to `NotFound` so the
    /// response never reveals which check tripped.
    async fn verify(
        &self,
        state: &str,
        device_generate_id: &str,
        bearer_token: &str,
    ) -> Result<FlowRecord, SyzygyError> {
        let record = self
            .store
            .get_flow(state)
            .await?
            .ok_or(SyzygyError::NotFound)?;
        if record.device_generate_id != device_generate_id {
            return Err(SyzygyError::NotFound);
        }
        if !self
            .digester
            .verify(&record.tmp_token_digest, &record.salt, bearer_token)
        {
            return Err(SyzygyError::NotFound);
        }
        Ok(record)
    }

    /// Poll handler. On a completed flow this is the single conversion
    /// point from provider consent to a usable client credential: claim the
    /// record, mint the device identity, issue the first token pair.
    pub async fn check(
        &self,
        state: &str,
        device_generate_id: &str,
        bearer_token: &str,
    ) -> Result<FlowCheck, SyzygyError> {
        let record = self.verify(state, device_generate_id, bearer_token).await?;
        if !record.completed {
            return Ok(FlowCheck::Pending);
        }

        // Atomic claim: only the request that actually removed the record
        // proceeds. A concurrent poll that lost the race sees the same
        // not-found as an expired flow.
        if !self.store.delete_flow(state).await? {
            return Err(SyzygyError::NotFound);
        }

        let provider_refresh_token = record.provider_refresh_token.ok_or_else(|| {
            SyzygyError::Internal("completed flow is missing its provider refresh token".to_string())
        })?;

        let device_id = Uuid::new_v4().to_string();
        self.devices
            .register(
                &device_id,
                &DeviceRecord {
                    device_generate_id: record.device_generate_id,
                    provider_refresh_token,
                },
            )
            .await?;
        let pair = self.devices.issue_token_pair(&device_id).await?;

        Ok(FlowCheck::Completed {
            device_id,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    /// Explicit cancellation from the TV. Same verification as `check`;
    /// deleting an already-gone record is still a successful cancel.
    pub async fn cancel(
        &self,
        state: &str,
        device_generate_id: &str,
        bearer_token: &str,
    ) -> Result<(), SyzygyError> {
        self.verify(state, device_generate_id, bearer_token).await?;
        self.store.delete_flow(state).await?;
        Ok(())
    }
}
