//! HTTP surface: the first-party API the TV talks to, the provider
//! consent callback, and the two phone-facing pages.
//!
//! Handlers stay thin; protocol decisions live in the flow and device
//! managers. Verification failures deliberately share one response shape
//! per endpoint family so a caller cannot probe which check failed.

use crate::device::DeviceManager;
use crate::errors::SyzygyError;
use crate::flow::{FlowCheck, FlowManager};
use crate::provider::ProviderOAuth;
use crate::settings::Settings;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

/// Custom header carrying the client-generated device-generation id on
/// every authenticated request.
pub const DEVICE_GENERATE_ID_HEADER: &str = "x-syzygy-device-generate-id";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub flows: Arc<FlowManager>,
    pub devices: Arc<DeviceManager>,
    pub provider: ProviderOAuth,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(link_page))
        .route("/success", get(success_page))
        .route("/api/auth/flows", post(create_flow))
        .route("/api/auth/flows/{state}", get(check_flow).delete(cancel_flow))
        .route("/api/auth/callback", get(provider_callback))
        .route("/api/auth/tokens", post(refresh_tokens))
        .route(
            "/api/devices/{device_id}",
            get(provider_access_token).delete(deregister_device),
        )
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(
    settings: Settings,
    flows: Arc<FlowManager>,
    devices: Arc<DeviceManager>,
    provider: ProviderOAuth,
) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        flows,
        devices,
        provider,
    };

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let router = router(state);

    tracing::info!(%addr, "Device-link API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    value.strip_prefix("Bearer ").map(|t| t.to_string())
}

fn device_generate_id(headers: &HeaderMap) -> String {
    headers
        .get(DEVICE_GENERATE_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Collapses the error taxonomy into the fixed set of response bodies the
/// clients may see. Provider and internal details go to the log only.
fn error_response(err: SyzygyError) -> Response {
    match err {
        SyzygyError::BadRequest(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Bad Request"})),
        )
            .into_response(),
        SyzygyError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Not Found"})),
        )
            .into_response(),
        SyzygyError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response(),
        SyzygyError::Provider { status, body } => {
            tracing::error!(status, %body, "provider request failed");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(json!({"error": "Provider error"}))).into_response()
        }
        other => {
            tracing::error!(error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFlowRequest {
    #[serde(default)]
    device_generate_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFlowResponse {
    state: String,
    tmp_token: String,
}

async fn create_flow(
    State(state): State<AppState>,
    Json(req): Json<CreateFlowRequest>,
) -> Response {
    match state.flows.create(&req.device_generate_id).await {
        Ok(flow) => Json(CreateFlowResponse {
            state: flow.state,
            tmp_token: flow.tmp_token,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowCheckResponse {
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

async fn check_flow(
    State(state): State<AppState>,
    Path(flow_state): Path<String>,
    headers: HeaderMap,
) -> Response {
    let generate_id = device_generate_id(&headers);
    let bearer = bearer_token(&headers).unwrap_or_default();

    match state.flows.check(&flow_state, &generate_id, &bearer).await {
        Ok(FlowCheck::Pending) => Json(FlowCheckResponse {
            completed: false,
            device_id: None,
            access_token: None,
            refresh_token: None,
        })
        .into_response(),
        Ok(FlowCheck::Completed {
            device_id,
            access_token,
            refresh_token,
        }) => Json(FlowCheckResponse {
            completed: true,
            device_id: Some(device_id),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn cancel_flow(
    State(state): State<AppState>,
    Path(flow_state): Path<String>,
    headers: HeaderMap,
) -> Response {
    let generate_id = device_generate_id(&headers);
    let bearer = bearer_token(&headers).unwrap_or_default();

    match state.flows.cancel(&flow_state, &generate_id, &bearer).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// Provider redirect target. Verifies the `state` before spending a
/// provider round-trip, exchanges the code, and records completion; the
/// phone lands on the success page.
async fn provider_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let flow_state = match query.state {
        Some(s) => s,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Missing state"})),
            )
                .into_response()
        }
    };

    if state.flows.lookup(&flow_state).await.is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid state"})),
        )
            .into_response();
    }

    let code = match query.code {
        Some(c) => c,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Missing code"})),
            )
                .into_response()
        }
    };

    let tokens = match state.provider.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(err) => return error_response(err),
    };
    let refresh_token = match tokens.refresh_token {
        Some(rt) => rt,
        None => {
            return error_response(SyzygyError::Internal(
                "provider response is missing refresh_token".to_string(),
            ))
        }
    };

    if let Err(err) = state.flows.complete(&flow_state, &refresh_token).await {
        return error_response(err);
    }

    Redirect::to(&format!("{}/success", state.settings.base_url())).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokensRequest {
    device_id: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPairResponse {
    access_token: String,
    refresh_token: String,
}

async fn refresh_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshTokensRequest>,
) -> Response {
    let (device_id, refresh_token) = match (req.device_id, req.refresh_token) {
        (Some(d), Some(r)) => (d, r),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Bad Request"})),
            )
                .into_response()
        }
    };
    let generate_id = device_generate_id(&headers);

    match state
        .devices
        .refresh(&device_id, &refresh_token, &generate_id)
        .await
    {
        Ok(pair) => Json(TokenPairResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderAccessTokenResponse {
    dropbox_access_token: String,
}

async fn provider_access_token(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let bearer = match bearer_token(&headers) {
        Some(t) => t,
        None => return error_response(SyzygyError::Unauthorized),
    };
    let generate_id = device_generate_id(&headers);

    match state
        .devices
        .provider_access_token(&device_id, &bearer, &generate_id)
        .await
    {
        Ok(token) => Json(ProviderAccessTokenResponse {
            dropbox_access_token: token,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn deregister_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let bearer = match bearer_token(&headers) {
        Some(t) => t,
        None => return error_response(SyzygyError::Unauthorized),
    };
    let generate_id = device_generate_id(&headers);

    match state
        .devices
        .deregister(&device_id, &bearer, &generate_id)
        .await
    {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct LinkPageQuery {
    state: Option<String>,
}

/// The QR target. The phone opens this page and follows the provider
/// consent link carrying the flow `state`.
async fn link_page(
    State(state): State<AppState>,
    Query(query): Query<LinkPageQuery>,
) -> Response {
    let flow_state = match query.state {
        Some(s) if !s.is_empty() => s,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Html(page(
                    "Link error",
                    "<h1>Link error</h1><p>This link is missing its flow identifier. \
                     Regenerate the QR code on your TV and scan it again.</p>",
                )),
            )
                .into_response()
        }
    };

    let authorize_url = state.provider.authorize_url(&flow_state);
    let body = format!(
        "<h1>Link your TV to Dropbox</h1>\
         <p>Signing in here completes the setup on your TV screen.</p>\
         <p><a class=\"button\" href=\"{}\">Continue with Dropbox</a></p>",
        html_escape(&authorize_url)
    );
    Html(page("Link your TV", &body)).into_response()
}

async fn success_page() -> Html<String> {
    Html(page(
        "Linked",
        "<h1>All set</h1><p>Your TV is now linked. You can close this page \
         and return to the TV.</p>",
    ))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\
         <html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>\
         <style>\
         body{{font-family:sans-serif;max-width:28rem;margin:4rem auto;padding:0 1rem}}\
         .button{{display:inline-block;padding:.75rem 1.5rem;border-radius:.5rem;\
         background:#0061fe;color:#fff;text-decoration:none}}\
         </style></head><body>{body}</body></html>"
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
