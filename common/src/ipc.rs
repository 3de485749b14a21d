use serde::{Deserialize, Serialize};
use crate::config::Configuration;
use crate::job::JobKey;
use crate::status::BackupStatus;

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    SendNow(JobKey),
    ReloadJob(JobKey),
    GetConfig,
    ListJobs,
    GetHistory,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    Config(Box<Configuration>),
    JobList(Vec<JobSummary>),
    HistoryList(Vec<BackupStatus>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub key: JobKey,
    pub enabled: bool,
    pub schedule: String, // "every 2 hours" or "poll 60s"
    pub next: Option<String>,
}
