//! Adaptive poller the TV runs while waiting for consent.
//!
//! Emits one event per iteration and backs off as the wait grows: every
//! 3 s for the first minute, every 5 s until five minutes, every 10 s
//! after that, giving up at ten minutes of wall clock. Per-iteration
//! failures are reported and polling continues; only the timeout or a
//! completed flow ends the stream.
//!
//! The stream is the cancellation handle: dropping it aborts the pending
//! wait immediately. A screen that restarts authentication simply replaces
//! the old stream with a new one, which is what keeps a single live poll
//! per attempt.

use crate::client::{FlowStatus, LinkClient};
use crate::errors::ApiError;
use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Overall wall-clock budget, independent of per-request latency.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Fixed user-facing messages, one per failure category. The presentation
/// layer shows these verbatim and never sees raw protocol errors.
pub const CLIENT_ERROR_MESSAGE: &str =
    "The server rejected the request. Start linking again from the TV.";
pub const SERVER_ERROR_MESSAGE: &str =
    "The linking server had a problem. Still trying.";
pub const NETWORK_ERROR_MESSAGE: &str =
    "Network connection failed. Check the TV's connection. Still trying.";

/// One observable event per poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    InProgress {
        elapsed_seconds: u64,
    },
    /// Terminal: consent landed and the server issued credentials.
    Success {
        device_id: String,
        access_token: String,
        refresh_token: String,
    },
    /// Non-terminal: polling continues after reporting.
    Error {
        message: String,
    },
    /// Terminal: the ten-minute budget ran out.
    Timeout,
}

/// Seam between the poll loop and the HTTP client, so the schedule can be
/// tested against a scripted prober.
#[async_trait]
pub trait FlowProbe: Send + Sync {
    async fn check(
        &self,
        state: &str,
        device_generate_id: &str,
        tmp_token: &str,
    ) -> Result<FlowStatus, ApiError>;
}

#[async_trait]
impl FlowProbe for LinkClient {
    async fn check(
        &self,
        state: &str,
        device_generate_id: &str,
        tmp_token: &str,
    ) -> Result<FlowStatus, ApiError> {
        self.check_flow(state, device_generate_id, tmp_token).await
    }
}

/// Interval for the next wait, keyed by elapsed time since poll start.
fn interval_for(elapsed: Duration) -> Duration {
    if elapsed < Duration::from_secs(60) {
        Duration::from_secs(3)
    } else if elapsed < Duration::from_secs(300) {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(10)
    }
}

/// Polls until success, timeout, or the stream is dropped.
pub fn poll_flow<P: FlowProbe>(
    probe: P,
    state: String,
    device_generate_id: String,
    tmp_token: String,
) -> impl Stream<Item = PollEvent> {
    stream! {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= POLL_TIMEOUT {
                yield PollEvent::Timeout;
                break;
            }

            match probe.check(&state, &device_generate_id, &tmp_token).await {
                Ok(status) if status.completed => {
                    match (status.device_id, status.access_token, status.refresh_token) {
                        (Some(device_id), Some(access_token), Some(refresh_token)) => {
                            yield PollEvent::Success {
                                device_id,
                                access_token,
                                refresh_token,
                            };
                            break;
                        }
                        // Completed without credentials is a server fault;
                        // report and keep polling.
                        _ => {
                            yield PollEvent::Error {
                                message: SERVER_ERROR_MESSAGE.to_string(),
                            };
                        }
                    }
                }
                Ok(_) => {
                    yield PollEvent::InProgress {
                        elapsed_seconds: elapsed.as_secs(),
                    };
                }
                Err(ApiError::Client(_)) => {
                    yield PollEvent::Error {
                        message: CLIENT_ERROR_MESSAGE.to_string(),
                    };
                }
                Err(ApiError::Server(_)) => {
                    yield PollEvent::Error {
                        message: SERVER_ERROR_MESSAGE.to_string(),
                    };
                }
                Err(ApiError::Network(_)) => {
                    yield PollEvent::Error {
                        message: NETWORK_ERROR_MESSAGE.to_string(),
                    };
                }
            }

            // Re-read the clock so a slow round-trip does not shorten the
            // next wait.
            sleep(interval_for(started.elapsed())).await;
        }
    }
}
