mod config;
mod control;
mod history;
mod ipc;
mod logs;
mod mailer;
mod pages;
mod report;
mod scheduler;
mod settings;
mod status;
mod web;

use anyhow::Context;
use clap::Parser;
use common::JobKey;
use config::ConfigStore;
use control::ControlBus;
use history::HistoryLog;
use mailer::{MailTransport, SmtpMailer};
use report::{HistoryReport, LogReport, ReportGenerator, ReportJob, StatusReport};
use scheduler::{PeriodicScheduler, WatchScheduler};
use status::StatusSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use web::AppState;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file, rewritten when settings change
    #[arg(long, default_value = common::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Log file, also the source of the reporter log emails
    #[arg(long, default_value = common::DEFAULT_LOG_FILE)]
    logfile: PathBuf,
    /// Control socket for the reporter CLI
    #[arg(long, default_value = common::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args.logfile)?;
    log::info!("Starting syncbox reporter...");

    let store = ConfigStore::open(args.config.clone())
        .with_context(|| format!("Cannot start without a configuration ({:?})", args.config))?;
    let config = Arc::new(store);
    let initial = config.get()?;
    log::info!("Using configuration {:?}, serving on port {}", config.path().unwrap_or_default(), initial.port);

    let bus = Arc::new(ControlBus::new());
    let status = Arc::new(StatusSource::new());
    let history = Arc::new(HistoryLog::new());
    let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new());

    for key in JobKey::ALL {
        let generator: Arc<dyn ReportGenerator> = match key {
            JobKey::History => Arc::new(HistoryReport::new(status.clone(), history.clone())),
            JobKey::Reporter | JobKey::Simmon => Arc::new(LogReport::new(key)),
            JobKey::Status => Arc::new(StatusReport::new(status.clone(), history.clone())),
        };
        let action = Arc::new(ReportJob::new(config.clone(), generator, transport.clone()));
        let control = bus
            .take_receiver(key)
            .with_context(|| format!("control channel for {} already taken", key))?;
        if key.is_periodic() {
            tokio::spawn(PeriodicScheduler::new(config.clone(), control, action).run());
        } else {
            tokio::spawn(WatchScheduler::new(config.clone(), control, action).run());
        }
    }

    let state = AppState {
        config: config.clone(),
        bus,
        status,
        history,
    };

    let listener = ipc::bind(&args.socket)?;
    let ipc_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = ipc::serve(listener, ipc_state).await {
            log::error!("ipc: server stopped: {:#}", e);
        }
    });

    web::serve(state, &initial.port, &initial.assets_root).await
}

fn setup_logging(log_file: &Path) -> anyhow::Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format(common::TIME_FORMAT),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_file).with_context(|| format!("Cannot open log file {:?}", log_file))?)
        .apply()?;
    Ok(())
}
