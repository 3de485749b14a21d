use crate::config::ConfigStore;
use crate::control::{ControlBus, ControlError};
use crate::history::{self, HistoryLog};
use crate::logs::read_log;
use crate::pages::{self, LogQuery};
use crate::scheduler::local_now;
use crate::settings::{self, Form as SettingsForm};
use crate::status::StatusSource;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use common::{ControlSignal, JobKey};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

/// Lines shown on the logs page when no limit is given.
const DEFAULT_MAX_LINES: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub bus: Arc<ControlBus>,
    pub status: Arc<StatusSource>,
    pub history: Arc<HistoryLog>,
}

pub fn router(state: AppState, assets_root: &str) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/status") }))
        .route("/status", get(status_page))
        .route("/history", get(history_page))
        .route("/settings", get(settings_page).post(settings_submit))
        .route("/logs", get(logs_page))
        .route("/send/:key", post(send_now))
        .nest_service("/static", ServeDir::new(assets_root))
        .with_state(state)
}

pub async fn serve(state: AppState, port: &str, assets_root: &str) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind web server to {}", addr))?;
    log::info!("web: listening on {}", addr);
    axum::serve(listener, router(state, assets_root))
        .await
        .context("Web server error")
}

async fn status_page(State(state): State<AppState>) -> Response {
    let config = match state.config.get() {
        Ok(c) => c,
        Err(e) => return server_error(e.to_string()),
    };
    let (status, errors) = state.status.current(&config).await;
    Html(pages::status_page(&status, &errors)).into_response()
}

async fn history_page(State(state): State<AppState>) -> Response {
    let config = match state.config.get() {
        Ok(c) => c,
        Err(e) => return server_error(e.to_string()),
    };
    let records = history::read_all(&config.history_file).map_err(|e| format!("{:#}", e));
    Html(pages::history_page(records)).into_response()
}

async fn settings_page(State(state): State<AppState>) -> Response {
    match state.config.get() {
        Ok(c) => Html(pages::settings_page(&settings::view(&c))).into_response(),
        Err(e) => server_error(e.to_string()),
    }
}

async fn settings_submit(State(state): State<AppState>, Form(form): Form<SettingsForm>) -> Html<String> {
    let view = settings::submit(&state.config, &state.bus, &form, local_now()).await;
    Html(pages::settings_page(&view))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogParams {
    pub log_type: String,
    pub start_date: String,
    pub max_lines: Option<usize>,
}

async fn logs_page(State(state): State<AppState>, Query(params): Query<LogParams>) -> Response {
    let config = match state.config.get() {
        Ok(c) => c,
        Err(e) => return server_error(e.to_string()),
    };
    let key = match params.log_type.as_str() {
        "simmon" => JobKey::Simmon,
        _ => JobKey::Reporter,
    };
    let query = LogQuery {
        log_type: if key == JobKey::Simmon { "simmon" } else { "reporter" },
        start_date: &params.start_date,
        max_lines: params.max_lines.unwrap_or(DEFAULT_MAX_LINES),
    };
    let lines = match config.log_file_path(key).filter(|p| !p.is_empty()) {
        Some(path) => read_log(path, query.start_date, query.max_lines).map_err(|e| format!("{:#}", e)),
        None => Err(format!("no log file configured for {}", key)),
    };
    Html(pages::logs_page(&query, lines)).into_response()
}

async fn send_now(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let key: JobKey = match key.parse() {
        Ok(k) => k,
        Err(e) => return (StatusCode::NOT_FOUND, Html(pages::layout("Not Found", &pages::error_block(&format!("{}", e))))).into_response(),
    };
    match state.bus.signal(key, ControlSignal::SendNow).await {
        Ok(()) => Redirect::to(back_to(key)).into_response(),
        Err(e @ ControlError::Closed(_)) => {
            log::error!("web: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Html(pages::layout("Error", &pages::error_block(&e.to_string())))).into_response()
        }
        Err(e) => server_error(e.to_string()),
    }
}

fn back_to(key: JobKey) -> &'static str {
    match key {
        JobKey::History => "/history",
        JobKey::Status => "/status",
        JobKey::Reporter | JobKey::Simmon => "/logs",
    }
}

fn server_error(message: String) -> Response {
    log::error!("web: {}", message);
    (StatusCode::INTERNAL_SERVER_ERROR, Html(pages::layout("Error", &pages::error_block(&message)))).into_response()
}
