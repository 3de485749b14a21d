use serde::{Deserialize, Serialize};
use crate::job::JobKey;
use crate::schedule::Period;

/// Per-job schedule state, persisted with the rest of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AutoEmailConfig {
    #[serde(default)]
    pub auto_email_enable: bool,
    #[serde(default = "default_auto_email_count")]
    pub auto_email_count: i64,
    #[serde(default)]
    pub auto_email_period: Period,
    /// Local time, `YYYY-MM-DD HH:MM:SS`. May be empty or stale.
    #[serde(default)]
    pub auto_email_next: String,
}

fn default_auto_email_count() -> i64 { 1 }

impl Default for AutoEmailConfig {
    fn default() -> Self {
        Self {
            auto_email_enable: false,
            auto_email_count: default_auto_email_count(),
            auto_email_period: Period::default(),
            auto_email_next: String::new(),
        }
    }
}

/// The whole configuration file. Field names match the JSON keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: i64,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub acer_file_path: String,
    #[serde(default = "default_time_zone")]
    pub acer_time_zone: String,
    #[serde(default)]
    pub sync_api_endpoint: String,
    #[serde(default)]
    pub sync_api_key: String,
    #[serde(default)]
    pub sync_folder_id: String,

    #[serde(default = "default_doc_root")]
    pub doc_root: String,
    #[serde(default = "default_assets_root")]
    pub assets_root: String,

    #[serde(default)]
    pub enable_acer_file_watch: bool,
    #[serde(default = "default_watch_period")]
    pub acer_file_watch_period: i64,
    #[serde(default)]
    pub history_file_auto_append: bool,

    #[serde(default = "default_history_file")]
    pub history_file: String,
    #[serde(default)]
    pub history_log_auto_email: AutoEmailConfig,

    #[serde(default)]
    pub reporter_log_file_path: String,
    #[serde(default)]
    pub reporter_log_auto_email: AutoEmailConfig,

    #[serde(default)]
    pub simmon_log_file_path: String,
    #[serde(default)]
    pub simmon_log_auto_email: AutoEmailConfig,

    #[serde(default)]
    pub email_from: String,
    #[serde(default)]
    pub email_to: String,
    #[serde(default)]
    pub email_user_name: String,
    #[serde(default)]
    pub email_password: String,
    #[serde(default)]
    pub email_host: String,
}

fn default_dial_timeout() -> i64 { 3 }
fn default_port() -> String { "8090".to_string() }
fn default_time_zone() -> String { "UTC".to_string() }
fn default_doc_root() -> String { "./".to_string() }
fn default_assets_root() -> String { "./static".to_string() }
fn default_watch_period() -> i64 { 60 }
fn default_history_file() -> String { "history.json".to_string() }

impl Default for Configuration {
    fn default() -> Self {
        Self {
            dial_timeout: default_dial_timeout(),
            port: default_port(),
            acer_file_path: String::new(),
            acer_time_zone: default_time_zone(),
            sync_api_endpoint: String::new(),
            sync_api_key: String::new(),
            sync_folder_id: String::new(),
            doc_root: default_doc_root(),
            assets_root: default_assets_root(),
            enable_acer_file_watch: false,
            acer_file_watch_period: default_watch_period(),
            history_file_auto_append: false,
            history_file: default_history_file(),
            history_log_auto_email: AutoEmailConfig::default(),
            reporter_log_file_path: String::new(),
            reporter_log_auto_email: AutoEmailConfig::default(),
            simmon_log_file_path: String::new(),
            simmon_log_auto_email: AutoEmailConfig::default(),
            email_from: String::new(),
            email_to: String::new(),
            email_user_name: String::new(),
            email_password: String::new(),
            email_host: String::new(),
        }
    }
}

impl Configuration {
    /// The schedule of a periodic job; `None` for the file-watch job.
    pub fn auto_email(&self, key: JobKey) -> Option<&AutoEmailConfig> {
        match key {
            JobKey::History => Some(&self.history_log_auto_email),
            JobKey::Reporter => Some(&self.reporter_log_auto_email),
            JobKey::Simmon => Some(&self.simmon_log_auto_email),
            JobKey::Status => None,
        }
    }

    pub fn auto_email_mut(&mut self, key: JobKey) -> Option<&mut AutoEmailConfig> {
        match key {
            JobKey::History => Some(&mut self.history_log_auto_email),
            JobKey::Reporter => Some(&mut self.reporter_log_auto_email),
            JobKey::Simmon => Some(&mut self.simmon_log_auto_email),
            JobKey::Status => None,
        }
    }

    /// Log file mailed by a log job.
    pub fn log_file_path(&self, key: JobKey) -> Option<&str> {
        match key {
            JobKey::Reporter => Some(&self.reporter_log_file_path),
            JobKey::Simmon => Some(&self.simmon_log_file_path),
            _ => None,
        }
    }

    /// Keys whose scheduling inputs differ between `self` and `other`.
    pub fn changed_jobs(&self, other: &Configuration) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = JobKey::PERIODIC
            .into_iter()
            .filter(|k| self.auto_email(*k) != other.auto_email(*k))
            .collect();
        if self.enable_acer_file_watch != other.enable_acer_file_watch
            || self.acer_file_watch_period != other.acer_file_watch_period
            || self.acer_file_path != other.acer_file_path
        {
            keys.push(JobKey::Status);
        }
        keys
    }
}
