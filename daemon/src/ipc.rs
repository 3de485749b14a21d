use crate::history;
use crate::scheduler::watch_period;
use crate::web::AppState;
use anyhow::{Context, Result};
use common::{Configuration, ControlSignal, JobKey, JobSummary, Request, Response};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Bind the control socket, replacing a stale one, and open it to all local users.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale socket {:?}", socket_path))?;
    }
    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind control socket {:?}", socket_path))?;
    let mut perms = std::fs::metadata(socket_path)?.permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(socket_path, perms)?;
    log::info!("ipc: listening on {:?}", socket_path);
    Ok(listener)
}

pub async fn serve(listener: UnixListener, state: AppState) -> Result<()> {
    loop {
        let (socket, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &state).await {
                log::error!("ipc: connection failed: {:#}", e);
            }
        });
    }
}

/// One JSON request per line, answered by one JSON response per line.
async fn handle_connection(socket: UnixStream, state: &AppState) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                log::info!("ipc: received request: {:?}", req);
                handle(state, req).await
            }
            Err(e) => Response::Error(format!("Invalid request: {}", e)),
        };
        let mut bytes = serde_json::to_vec(&resp)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
    }
    Ok(())
}

pub async fn handle(state: &AppState, req: Request) -> Response {
    match req {
        Request::SendNow(key) => signal(state, key, ControlSignal::SendNow).await,
        Request::ReloadJob(key) => signal(state, key, ControlSignal::ConfigChanged).await,
        Request::GetConfig => match state.config.get() {
            Ok(c) => Response::Config(Box::new(c)),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::ListJobs => match state.config.get() {
            Ok(c) => Response::JobList(JobKey::ALL.iter().map(|&key| summary(&c, key)).collect()),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::GetHistory => {
            let result = state
                .config
                .get()
                .map_err(anyhow::Error::from)
                .and_then(|c| history::read_all(&c.history_file));
            match result {
                Ok(records) => Response::HistoryList(records),
                Err(e) => Response::Error(format!("{:#}", e)),
            }
        }
    }
}

async fn signal(state: &AppState, key: JobKey, signal: ControlSignal) -> Response {
    match state.bus.signal(key, signal).await {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}

pub fn summary(c: &Configuration, key: JobKey) -> JobSummary {
    match c.auto_email(key) {
        Some(aec) => JobSummary {
            key,
            enabled: aec.auto_email_enable,
            schedule: format!("every {} {}", aec.auto_email_count.max(1), aec.auto_email_period),
            next: (aec.auto_email_enable && !aec.auto_email_next.is_empty()).then(|| aec.auto_email_next.clone()),
        },
        None => JobSummary {
            key,
            enabled: c.enable_acer_file_watch,
            schedule: format!("poll {}s", watch_period(c.acer_file_watch_period).as_secs()),
            next: None,
        },
    }
}
