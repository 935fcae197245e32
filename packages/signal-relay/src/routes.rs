use crate::agent::{HealthResponse, RelayAgent};
use crate::endpoint::handle_stream;
use crate::error::{RelayError, RelayResult};
use crate::form::{parse_registration, registration_form, FormSchema};
use crate::registry::RegistrationResult;
use crate::types::{ConsumeMessage, Variable};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Acknowledgement returned by mutating handlers
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

/// Build the relay's HTTP surface
pub fn router(agent: Arc<RelayAgent>) -> Router {
    Router::new()
        .route("/form", get(get_form).post(submit_form))
        .route("/start", post(submit_form))
        .route("/bridge/{variable_name}", post(add_bridge))
        .route("/unbridge/{variable_name}", post(remove_bridge))
        .route("/stream/{signal_name}", get(handle_stream))
        .route("/consume/{stream_name}", post(consume))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

/// Registration form schema
pub async fn get_form(State(agent): State<Arc<RelayAgent>>) -> Json<FormSchema> {
    Json(registration_form(&agent.config().public_url()))
}

/// Submitted registration form
pub async fn submit_form(
    State(agent): State<Arc<RelayAgent>>,
    Json(data): Json<serde_json::Value>,
) -> RelayResult<Json<StatusResponse>> {
    let registration = parse_registration(&data)?;
    let message = agent.register_stream(registration).await?;
    Ok(Json(StatusResponse::success(message)))
}

pub async fn add_bridge(
    State(agent): State<Arc<RelayAgent>>,
    Path(variable_name): Path<String>,
    Json(variable): Json<Variable>,
) -> RelayResult<(StatusCode, Json<StatusResponse>)> {
    if variable.name != variable_name {
        return Err(RelayError::InvalidInput(format!(
            "Variable name {} does not match path {}",
            variable.name, variable_name
        )));
    }

    let (status, message) = match agent.bridge(variable).await {
        RegistrationResult::Added => (StatusCode::CREATED, format!("{} bridged", variable_name)),
        RegistrationResult::Replaced => (StatusCode::OK, format!("{} re-bridged", variable_name)),
    };
    Ok((status, Json(StatusResponse::success(message))))
}

/// Removing an unknown variable is not an error
pub async fn remove_bridge(
    State(agent): State<Arc<RelayAgent>>,
    Path(variable_name): Path<String>,
) -> Json<StatusResponse> {
    let message = if agent.unbridge(&variable_name).await {
        format!("{} removed", variable_name)
    } else {
        format!("{} was not bridged", variable_name)
    };
    Json(StatusResponse::success(message))
}

/// Consume callback invoked by the platform for each inbound message
pub async fn consume(
    State(agent): State<Arc<RelayAgent>>,
    Path(stream_name): Path<String>,
    Json(message): Json<ConsumeMessage>,
) -> RelayResult<StatusCode> {
    agent.consume(&stream_name, message).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check(State(agent): State<Arc<RelayAgent>>) -> Json<HealthResponse> {
    Json(agent.health())
}
