//! # onboarding-relay: forward onboarding forms to a workflow or a mailbox
//!
//! `onboarding-relay` serves the single endpoint an onboarding web form posts to. A submission is
//! a `multipart/form-data` body carrying the client's details as text fields and any number of
//! photos as file parts. The relay parses it, enforces a ceiling on the total attachment size and
//! forwards it in one of two shapes:
//!
//! - **webhook**: a JSON document (text fields, `submittedAt`, base64 files) POSTed to `FLOW_URL`
//! - **email**: a plain-text summary sent over SMTP with every photo attached
//!
//! A third variant, **liveness**, answers every request with a small JSON payload and is used to
//! check that the hosting plumbing routes requests to the process.
//!
//! Nothing is stored and nothing is retried. Every failure ends the request with a status code and
//! a human-readable message (in French, since the form displays it to the client).
//!
//! ## Request Flow
//!
//! ```text
//! POST /api/upload
//!   ├─ required operator variables present?     no → 500 "<VAR> manquant côté serveur."
//!   ├─ stream-parse multipart (submission)      attachments over ceiling → 413
//!   ├─ build JSON payload | build email
//!   ├─ send (webhook POST | SMTP)               webhook non-2xx → status and body passed through
//!   └─ 200 "OK"
//! ```
//!
//! `OPTIONS` on the upload path always answers 204, and every response carries permissive CORS
//! headers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use onboarding_relay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = onboarding_relay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     onboarding_relay::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod config;
pub mod email;
pub mod errors;
mod openapi;
pub mod submission;
pub mod telemetry;
pub mod webhook;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Json, Router,
    http::{HeaderValue, header},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use config::DeliveryMode;
use submission::ParseLimits;
use tokio::net::TcpListener;
use tower_http::{
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi;

use crate::openapi::ApiDoc;

/// Application state shared across all request handlers.
///
/// Immutable for the lifetime of the process: every request reads the same configuration and
/// shares one HTTP connection pool for webhook calls.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_attachment_bytes: self.config.limits.max_attachment_bytes,
            max_body_size: self.config.limits.max_body_size,
        }
    }
}

/// Install the aws-lc-rs rustls provider used by reqwest and lettre.
///
/// Safe to call more than once; later calls leave the installed provider in place.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Create the client used for webhook calls.
pub fn create_http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.webhook.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Build the application router.
///
/// - the upload route at `config.upload_path` (POST + OPTIONS, any method in liveness mode)
/// - `/healthz` and `/openapi.json`
/// - permissive CORS headers on every response
/// - tracing middleware
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> Router {
    let mut upload_route = post(api::handlers::upload::upload).options(api::handlers::upload::preflight);
    if state.config.delivery == DeliveryMode::Liveness {
        upload_route = upload_route.fallback(api::handlers::upload::liveness);
    }

    let router = Router::new()
        .route(&state.config.upload_path, upload_route)
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state);

    // The form is served from another origin; only set when a handler has not already
    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// The relay application: configuration plus its router.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        info!(
            delivery = %config.delivery,
            upload_path = %config.upload_path,
            max_attachment_bytes = config.limits.max_attachment_bytes,
            "Configuring onboarding relay"
        );

        let state = AppState::builder()
            .http_client(create_http_client(&config)?)
            .config(config.clone())
            .build();

        Ok(Self {
            router: build_router(state),
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Onboarding relay listening on http://{}, uploads at {}",
            bind_addr, self.config.upload_path
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::config::DeliveryMode;
    use crate::test_utils::{create_test_config, create_test_server};
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn test_healthz() {
        let server = create_test_server(create_test_config());

        let response = server.get("/healthz").await;

        assert_eq!(response.status_code().as_u16(), 200);
        assert_eq!(response.text(), "OK");
        assert_eq!(response.header("access-control-allow-origin"), "*");
    }

    #[tokio::test]
    async fn test_openapi_document_lists_upload_route() {
        let server = create_test_server(create_test_config());

        let response = server.get("/openapi.json").await;

        response.assert_status_ok();
        let doc: Value = response.json();
        assert!(doc["paths"]["/api/upload"]["post"].is_object());
        assert!(doc["paths"]["/api/upload"]["options"].is_object());
    }

    #[tokio::test]
    async fn test_get_upload_is_not_allowed_outside_liveness() {
        let mut config = create_test_config();
        config.delivery = DeliveryMode::Webhook;
        let server = create_test_server(config);

        let response = server.get("/api/upload").await;

        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }
}
