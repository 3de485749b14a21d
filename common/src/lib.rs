pub mod config;
pub mod ipc;
pub mod job;
pub mod schedule;
pub mod status;

pub use config::{AutoEmailConfig, Configuration};
pub use ipc::{JobSummary, Request, Response};
pub use job::{ControlSignal, JobKey};
pub use schedule::{calculate_next_time, format_duration, format_time, parse_time, Period, TIME_FORMAT};
pub use status::BackupStatus;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_LOG_FILE: &str = "reporter.log";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/syncbox-reporter.sock";

/// Smallest gap to a scheduled email that is still worth waiting for.
pub const MIN_WAIT_SECS: u64 = 10;
/// Floor for the status-file poll period.
pub const MIN_WATCH_PERIOD_SECS: u64 = 10;
