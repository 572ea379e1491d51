//! # Issuer HTTP Server Example
//!
//! A minimal axum front end over [`trustvc::issuer::IssuerCredentialService`]:
//! generate, query, revoke, suspend and recover, over a single in-process
//! signing key. Run with `cargo run --example issuer-axum`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use p256::ecdsa::SigningKey;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use trustvc::issuer::{GenerateRequest, GenerateResponse, IssuerCredentialRecord, IssuerCredentialService};

const ISSUER_DID: &str = "did:example:issuer123";

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("sets default subscriber");

    let signing_key = SigningKey::random(&mut rand_core::OsRng);
    let service = Arc::new(IssuerCredentialService::new(
        ISSUER_DID.to_string(),
        signing_key,
        "issuer-key-1".to_string(),
        "http://localhost:8081/status".to_string(),
        131_072,
    ));

    let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

    let router = Router::new()
        .route("/credentials", post(generate))
        .route("/credentials/{cid}", get(query))
        .route("/credentials/{cid}/revoke", post(revoke))
        .route("/credentials/{cid}/suspend", post(suspend))
        .route("/credentials/{cid}/recover", post(recover))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service);

    let listener = TcpListener::bind("0.0.0.0:8081").await.expect("should bind");
    tracing::info!("listening on {}", listener.local_addr().expect("local_addr should be set"));
    axum::serve(listener, router).await.expect("server should run");
}

#[axum::debug_handler]
async fn generate(
    State(service): State<Arc<IssuerCredentialService>>, Json(request): Json<GenerateRequest>,
) -> AxResult<GenerateResponse> {
    service.generate(&request).into()
}

#[axum::debug_handler]
async fn query(
    State(service): State<Arc<IssuerCredentialService>>, Path(cid): Path<String>,
) -> AxResult<IssuerCredentialRecord> {
    service.query(&cid).into()
}

#[axum::debug_handler]
async fn revoke(State(service): State<Arc<IssuerCredentialService>>, Path(cid): Path<String>) -> impl IntoResponse {
    status_result(service.revoke(&cid))
}

#[axum::debug_handler]
async fn suspend(State(service): State<Arc<IssuerCredentialService>>, Path(cid): Path<String>) -> impl IntoResponse {
    status_result(service.suspend(&cid))
}

#[axum::debug_handler]
async fn recover(State(service): State<Arc<IssuerCredentialService>>, Path(cid): Path<String>) -> impl IntoResponse {
    status_result(service.recover(&cid))
}

fn status_result(result: trustvc::Result<()>) -> Response {
    match result {
        Ok(()) => (StatusCode::NO_CONTENT, ()).into_response(),
        Err(e) => (StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(e.body()))
            .into_response(),
    }
}

// ----------------------------------------------------------------------------
// Axum Response
// ----------------------------------------------------------------------------

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
            Err(e) => {
                let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(e.body())).into_response()
            }
        }
    }
}

impl<T> From<trustvc::Result<T>> for AxResult<T> {
    fn from(val: trustvc::Result<T>) -> Self {
        Self(val)
    }
}
