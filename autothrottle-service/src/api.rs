use crate::throttle_override::{OverrideGovernor, ThrottleOverrideConfig};

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

const INCORRECT_METHOD: &str = "disallowed method\n";

pub struct ApiState {
    pub governor: OverrideGovernor,
}

/// Admin control surface for the throttle override.
///
/// Response bodies (trailing newlines included) are a compatibility
/// surface and must not change. Parameter parse failures keep the default
/// 200 status with the error text as the body, matching the original
/// behavior. A global rate vs broker-specific rate is distinguished by the
/// trailing path segment; the broker-specific form is reserved and handled
/// identically for now.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/throttle", any(throttle_get_set))
        .route("/throttle/", any(throttle_get_set))
        .route("/throttle/{broker_id}", any(throttle_get_set))
        .route("/throttle/remove", any(throttle_remove))
        .route("/throttle/remove/", any(throttle_remove))
        // Deprecated route aliases, identical semantics.
        .route("/get_throttle", any(get_throttle_deprecated))
        .route("/set_throttle", any(set_throttle_deprecated))
        .route("/remove_throttle", any(remove_throttle_deprecated))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn log_request(method: &Method, uri: &Uri) {
    info!(method = %method, path = %uri.path(), "admin api request");
}

async fn throttle_get_set(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    log_request(&method, &uri);
    match method {
        Method::GET => get_throttle(&state).await.into_response(),
        Method::POST => set_throttle(&state, &params).await.into_response(),
        _ => (StatusCode::METHOD_NOT_ALLOWED, INCORRECT_METHOD).into_response(),
    }
}

async fn throttle_remove(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
) -> Response {
    log_request(&method, &uri);
    match method {
        Method::POST => remove_throttle(&state).await.into_response(),
        _ => (StatusCode::METHOD_NOT_ALLOWED, INCORRECT_METHOD).into_response(),
    }
}

async fn get_throttle(state: &ApiState) -> String {
    let config = match state.governor.get().await {
        Ok(config) => config,
        Err(e) => return e.to_string(),
    };

    match config.rate {
        0 => "no throttle override is set\n".to_string(),
        rate => format!(
            "a throttle override is configured at {}MB/s, autoremove=={}\n",
            rate, config.auto_remove
        ),
    }
}

async fn set_throttle(state: &ApiState, params: &HashMap<String, String>) -> String {
    let rate = match parse_rate_param(params) {
        Ok(rate) => rate,
        Err(msg) => return msg,
    };

    let auto_remove = match parse_auto_remove_param(params) {
        Ok(auto_remove) => auto_remove,
        Err(msg) => return msg,
    };

    let config = ThrottleOverrideConfig { rate, auto_remove };
    match state.governor.set(config).await {
        Ok(()) => format!(
            "throttle successfully set to {}MB/s, autoremove=={}\n",
            rate, auto_remove
        ),
        Err(e) => format!("{}\n", e),
    }
}

async fn remove_throttle(state: &ApiState) -> String {
    match state.governor.remove().await {
        Ok(()) => "throttle successfully removed\n".to_string(),
        Err(e) => format!("{}\n", e),
    }
}

fn parse_rate_param(params: &HashMap<String, String>) -> Result<u64, String> {
    match params.get("rate").map(String::as_str) {
        None | Some("") => Err("rate param must be supplied\n".to_string()),
        Some("0") => Err("rate param must be >0\n".to_string()),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| "rate param must be supplied as an integer\n".to_string()),
    }
}

fn parse_auto_remove_param(params: &HashMap<String, String>) -> Result<bool, String> {
    match params.get("autoremove").map(String::as_str) {
        None | Some("") => Ok(false),
        Some(raw) => raw
            .parse::<bool>()
            .map_err(|_| "autoremove param must be a bool\n".to_string()),
    }
}

async fn get_throttle_deprecated(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
) -> Response {
    log_request(&method, &uri);
    match method {
        Method::GET => get_throttle(&state).await.into_response(),
        _ => (StatusCode::METHOD_NOT_ALLOWED, INCORRECT_METHOD).into_response(),
    }
}

async fn set_throttle_deprecated(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    log_request(&method, &uri);
    match method {
        Method::POST => set_throttle(&state, &params).await.into_response(),
        _ => (StatusCode::METHOD_NOT_ALLOWED, INCORRECT_METHOD).into_response(),
    }
}

async fn remove_throttle_deprecated(
    State(state): State<Arc<ApiState>>,
    method: Method,
    uri: Uri,
) -> Response {
    log_request(&method, &uri);
    match method {
        Method::POST => remove_throttle(&state).await.into_response(),
        _ => (StatusCode::METHOD_NOT_ALLOWED, INCORRECT_METHOD).into_response(),
    }
}
