use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::error::ControlError;
use crate::pattern::Translation;

const NO_ACTION: &str = "No action (all 9s)";

#[derive(Debug, Default, Deserialize)]
pub struct ControlQuery {
    pub alert: Option<String>,
    /// Caller's correlation id. Only logged.
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: &'static str,
}

fn reject(status: StatusCode, detail: &'static str) -> Response {
    (status, Json(ErrorBody { detail })).into_response()
}

pub(super) async fn control(
    State(state): State<AppState>,
    query: Result<Query<ControlQuery>, QueryRejection>,
) -> Response {
    // Repeated or malformed parameters still get a JSON body.
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => {
            warn!("Rejected query: {}", err.body_text());
            return reject(StatusCode::BAD_REQUEST, "Invalid_query");
        }
    };
    let alert = query.alert.unwrap_or_default();
    info!(id = ?query.id, "Control request, alert {:?}", alert);

    let id = match state.translator.translate_alert(&alert) {
        Ok(Translation::Program(id)) => id,
        Ok(Translation::NoOp) => {
            return Json(StatusBody {
                status: "ok",
                program: None,
                message: Some(NO_ACTION),
            })
            .into_response();
        }
        Err(err) => {
            warn!("Rejected alert {:?}: {}", alert, err);
            return reject(StatusCode::BAD_REQUEST, err.tag());
        }
    };

    match state.controller.switch_program(id).await {
        Ok(()) => Json(StatusBody {
            status: "ok",
            program: Some(id.to_string()),
            message: None,
        })
        .into_response(),
        Err(ControlError::Directory(_)) => reject(StatusCode::BAD_REQUEST, "Unknown_program"),
        Err(ControlError::Delivery(_)) => {
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Program_switch_failed")
        }
    }
}

pub(super) async fn health() -> Json<StatusBody> {
    Json(StatusBody {
        status: "healthy",
        program: None,
        message: None,
    })
}
