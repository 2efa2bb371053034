//! HTTP front end: alert strings in, program switches out.

mod handlers;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::controller::SwitchController;
use crate::pattern::PatternTranslator;

pub use handlers::{ControlQuery, ErrorBody, StatusBody};

#[derive(Debug, Clone)]
pub struct AppState {
    pub translator: Arc<PatternTranslator>,
    pub controller: SwitchController,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/control", get(handlers::control))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(bind: &str, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Unable to bind HTTP listener on {}", bind))?;
    info!("HTTP listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{self, Comm};
    use crate::directory::ProgramDirectory;
    use crate::payload::CommandPayload;
    use crate::pattern::ProgramId;
    use crate::session::testing::{login, Outcome, ScriptedConnector};
    use crate::session::{DeviceSession, SessionConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashMap};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    fn payload(hex: &str) -> CommandPayload {
        CommandPayload::parse(hex).unwrap()
    }

    /// Router over programs 01-16 except 07. Keep the receiver alive while
    /// the device end is in use.
    fn app(script: &[Outcome]) -> (Router, UnboundedReceiver<DuplexStream>) {
        let programs: HashMap<_, _> = (1u8..=16)
            .filter(|n| *n != 7)
            .map(|n| (ProgramId::new(n).unwrap(), payload(&format!("10{:02x}", n))))
            .collect();
        let directory = ProgramDirectory::new(
            programs,
            payload("2001"),
            payload("2002"),
            payload("2003"),
            BTreeMap::new(),
        )
        .unwrap();

        let (connector, peers) = ScriptedConnector::new(script);
        let session = DeviceSession::new(connector, login(), SessionConfig::default());
        let Comm { handle, .. } = comm::spawn(session);

        let app = router(AppState {
            translator: Arc::new(PatternTranslator::default()),
            controller: SwitchController::new(Arc::new(directory), handle),
        });
        (app, peers)
    }

    async fn get(script: &[Outcome], uri: &str) -> (StatusCode, Value) {
        let (app, _peers) = app(script);
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn alert_switches_program() {
        let (status, body) = get(&[Outcome::Accept], "/api/control?alert=10109999&id=42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "program": "11"}));

        let (status, body) = get(&[Outcome::Accept], "/api/control?alert=00019999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "program": "02"}));
    }

    #[tokio::test(start_paused = true)]
    async fn all_unknown_is_no_action() {
        let (status, body) = get(&[], "/api/control?alert=99999999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "message": "No action (all 9s)"}));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failures_are_bad_requests() {
        let cases = [
            ("/api/control", "Parameter_not_found"),
            ("/api/control?alert=", "Parameter_not_found"),
            ("/api/control?alert=1234", "Invalid_parameter_length"),
            ("/api/control?alert=123456789", "Invalid_parameter_length"),
            ("/api/control?alert=abcd9999", "Parameter_contains_invalid_value"),
            ("/api/control?alert=12349999", "Parameter_contains_invalid_value"),
        ];
        for (uri, tag) in cases {
            let (status, body) = get(&[], uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, json!({"detail": tag}), "{}", uri);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_query_is_json_bad_request() {
        let cases = [
            "/api/control?alert=10109999&alert=99999999",
            "/api/control?id=1&id=2&alert=10109999",
        ];
        for uri in cases {
            let (status, body) = get(&[], uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, json!({"detail": "Invalid_query"}), "{}", uri);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_program_is_bad_request() {
        // 0110 -> "07", left out of the directory.
        let (status, body) = get(&[Outcome::Accept], "/api/control?alert=01109999").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"detail": "Unknown_program"}));
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_is_server_error() {
        let (status, body) = get(&[], "/api/control?alert=10109999").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"detail": "Program_switch_failed"}));
    }

    #[tokio::test]
    async fn health() {
        let (status, body) = get(&[], "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy"}));
    }
}
