//! # Verifier HTTP Server Example
//!
//! A minimal axum front end combining [`trustvc::verifier::PresentationValidator`]
//! and [`trustvc::oid4vp::Oid4VpVerifier`]: batch presentation validation plus
//! the OID4VP `SAVE` / wallet-response / poll-result flow. Run with
//! `cargo run --example verifier-axum`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use trustvc::config::EngineConfig;
use trustvc::core::CancellationSignal;
use trustvc::did::{CachedResolver, HttpResolver};
use trustvc::mdl::MdlVerifier;
use trustvc::oid4vp::{AuthorizationResponse, ModifyMode, Oid4VpVerifier, VerifyResult};
use trustvc::status::StatusListClient;
use trustvc::verifier::{PresentationValidationResponse, PresentationValidator};

struct AppState {
    resolver: CachedResolver<HttpResolver>,
    status_client: StatusListClient,
    mdl: MdlVerifier,
    config: EngineConfig,
    oid4vp: Oid4VpVerifier,
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("sets default subscriber");

    let config = EngineConfig::builder(vec![]).build();
    let state = Arc::new(AppState {
        resolver: CachedResolver::new(HttpResolver::new(config.http_timeout), config.did_cache_ttl),
        status_client: StatusListClient::new(config.status_cache_ttl, config.http_timeout),
        mdl: MdlVerifier::new(config.mdl_trust_roots.clone()),
        oid4vp: Oid4VpVerifier::new(config.session_ttl),
        config,
    });

    let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

    let router = Router::new()
        .route("/api/presentation/validation", post(validate_presentations))
        .route("/oidvp/definition", post(save_definition))
        .route("/oidvp/response", post(authorization_response))
        .route("/oidvp/result", get(verify_result))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind("0.0.0.0:8082").await.expect("should bind");
    tracing::info!("listening on {}", listener.local_addr().expect("local_addr should be set"));
    axum::serve(listener, router).await.expect("server should run");
}

#[derive(Deserialize)]
struct ValidateRequest {
    presentations: Vec<String>,
}

#[axum::debug_handler]
async fn validate_presentations(
    State(state): State<Arc<AppState>>, Json(request): Json<ValidateRequest>,
) -> AxResult<Vec<PresentationValidationResponse>> {
    let validator =
        PresentationValidator::new(&state.resolver, &state.status_client, &state.mdl, &state.config);
    validator.validate(&request.presentations, &CancellationSignal::new()).into()
}

#[derive(Deserialize)]
struct SaveDefinitionRequest {
    client_id: String,
    nonce: String,
    presentation_definition: serde_json::Value,
}

#[axum::debug_handler]
async fn save_definition(
    State(state): State<Arc<AppState>>, Json(request): Json<SaveDefinitionRequest>,
) -> impl IntoResponse {
    match state.oid4vp.modify_presentation_definition(
        ModifyMode::Save,
        &request.client_id,
        &request.nonce,
        Some(request.presentation_definition),
    ) {
        Ok(()) => (StatusCode::NO_CONTENT, ()).into_response(),
        Err(e) => error_response(&e),
    }
}

#[axum::debug_handler]
async fn authorization_response(
    State(state): State<Arc<AppState>>, Json(request): Json<AuthorizationResponse>,
) -> AxResult<VerifyResult> {
    state
        .oid4vp
        .verify(&request, &state.resolver, state.config.temporal_skew, &validator_for(&state), &CancellationSignal::new())
        .into()
}

#[derive(Deserialize)]
struct ResultQuery {
    client_id: String,
    nonce: String,
}

#[axum::debug_handler]
async fn verify_result(State(state): State<Arc<AppState>>, Query(q): Query<ResultQuery>) -> AxResult<VerifyResult> {
    state.oid4vp.get_verify_result(&q.client_id, &q.nonce).into()
}

fn validator_for(state: &AppState) -> PresentationValidator<'_> {
    PresentationValidator::new(&state.resolver, &state.status_client, &state.mdl, &state.config)
}

// ----------------------------------------------------------------------------
// Axum Response
// ----------------------------------------------------------------------------

fn error_response(e: &trustvc::Error) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(e.body())).into_response()
}

/// Wrapper translating `trustvc::Result<T>` into an axum response, mapping
/// each error to its declared HTTP status rather than a blanket 500.
pub struct AxResult<T>(trustvc::Result<T>);

impl<T> IntoResponse for AxResult<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self.0 {
            Ok(v) => (StatusCode::OK, Json(json!(v))).into_response(),
            Err(e) => error_response(&e),
        }
    }
}

impl<T> From<trustvc::Result<T>> for AxResult<T> {
    fn from(val: trustvc::Result<T>) -> Self {
        Self(val)
    }
}
