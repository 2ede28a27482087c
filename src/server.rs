use std::sync::Arc;
use axum::{routing::post, Router, Json};
use tower_http::cors::{CorsLayer, Any};
use serde::{Deserialize, Serialize};
use axum::http::StatusCode;
use tracing::{info, warn};
use crate::error::TologError;
use crate::iri::Iri;
use crate::settings::{Output, Settings};
use crate::source::{MemoryResolver, Source};
use crate::ParseOptions;

#[derive(Deserialize)]
pub struct ParseRequest {
    pub query: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub tolog_plus: Option<bool>,
    #[serde(default)]
    pub optimizers: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<Output>,
    #[serde(default)]
    pub hints: Option<bool>,
}

#[derive(Serialize)]
pub struct ParseResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request fields fall back to the server settings.
fn run(req: ParseRequest, settings: &Settings) -> Result<String, TologError> {
    let base = match &req.base {
        Some(base) => Iri::parse(base)?,
        None => settings.base_iri()?,
    };
    let defaults = settings.parse_options();
    let options = ParseOptions {
        tolog_plus: req.tolog_plus.unwrap_or(defaults.tolog_plus),
        optimizers: req.optimizers.or(defaults.optimizers),
    };
    let source = Source::from_text(req.query, base);
    // requests never read local files; imported modules are left unloaded
    crate::transform_with(
        &source,
        &options,
        req.output.unwrap_or(settings.output),
        req.hints.unwrap_or(settings.hints),
        MemoryResolver::new(),
    )
}

fn status_of(e: &TologError) -> StatusCode {
    match e {
        TologError::Lexical { .. } | TologError::Query { .. } | TologError::Builder(_) | TologError::Config(_) | TologError::Render(_) => {
            StatusCode::BAD_REQUEST
        }
        TologError::Source(_) | TologError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(settings: Arc<Settings>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/parse", post(move |Json(req): Json<ParseRequest>| {
        let settings = Arc::clone(&settings);
        async move {
            // parsing is synchronous, keep it off the async workers
            let started = std::time::Instant::now();
            let result = tokio::task::spawn_blocking(move || run(req, &settings)).await.map_err(|e| {
                warn!(error=%e, "Join error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Join error")
            })?;
            let elapsed_ms_f64 = started.elapsed().as_secs_f64() * 1000.0;
            match result {
                Ok(output) => {
                    info!(ms=elapsed_ms_f64, bytes=output.len(), "parse complete");
                    let body = ParseResponse { status: "ok".into(), elapsed_ms: elapsed_ms_f64, output: Some(output), error: None };
                    Ok::<_, (StatusCode, &'static str)>((StatusCode::OK, Json(body)))
                }
                Err(e) => {
                    let status = status_of(&e);
                    let msg = format!("{e}");
                    warn!(%msg, code=%status.as_u16(), "parse error");
                    let body = ParseResponse { status: "error".into(), elapsed_ms: elapsed_ms_f64, output: None, error: Some(msg) };
                    Ok::<_, (StatusCode, &'static str)>((status, Json(body)))
                }
            }
        }
    }))
    .layer(cors)
}
