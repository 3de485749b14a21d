use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use common::{format_duration, BackupStatus, Configuration};
use serde::Deserialize;
use std::time::Duration;

/// Timestamp layout in the workstation's status file, e.g. `03:04 PM, Mon 02/01/2006`.
pub const ACER_TIME_FORMAT: &str = "%I:%M %p, %a %d/%m/%Y";
/// Timestamp layout written into reports.
pub const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:00";

/// Subset of Syncthing's `/rest/db/status` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncthingStatus {
    pub errors: i64,
    pub global_bytes: i64,
    pub global_files: i64,
    pub in_sync_bytes: i64,
    pub in_sync_files: i64,
    pub local_bytes: i64,
    pub local_files: i64,
    pub need_bytes: i64,
    pub need_files: i64,
    pub pull_errors: i64,
    pub state: String,
    pub state_changed: String,
}

/// The workstation's status file: a title line, a date line, a time line,
/// then a Syncthing-style JSON document with its local counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcerStatus {
    pub title: String,
    pub date_string: String,
    pub time_string: String,
    pub file_count: i64,
    pub byte_count: i64,
}

pub fn parse_acer_status(content: &str) -> Result<AcerStatus> {
    let mut lines = content.lines();
    let mut next_line = |what: &str| {
        lines
            .next()
            .map(|l| l.trim().to_string())
            .ok_or_else(|| anyhow!("status file has no {} line", what))
    };
    let title = next_line("title")?;
    let date_string = next_line("date")?;
    let time_string = next_line("time")?;
    let json: String = lines.collect::<Vec<_>>().join("\n");
    let counts: SyncthingStatus =
        serde_json::from_str(&json).context("status file JSON is malformed")?;
    Ok(AcerStatus {
        title,
        date_string,
        time_string,
        file_count: counts.local_files,
        byte_count: counts.local_bytes,
    })
}

/// Interpret the status file's date and time strings in `zone`.
pub fn parse_acer_time(acer: &AcerStatus, zone: &str) -> Result<DateTime<Tz>> {
    let tz: Tz = zone
        .parse()
        .map_err(|e| anyhow!("unknown time zone '{}': {}", zone, e))?;
    let text = format!("{}, {}", acer.time_string, acer.date_string);
    let naive = NaiveDateTime::parse_from_str(&text, ACER_TIME_FORMAT)
        .with_context(|| format!("parsing status time '{}'", text))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("status time '{}' does not exist in {}", text, zone))
}

/// Compare the two sources. Whatever could be read is filled in; missing
/// counts stay zero and each problem is reported in `errors`.
pub fn compare(
    server_time: DateTime<Local>,
    acer: Result<AcerStatus>,
    syncthing: Result<SyncthingStatus>,
    zone: &str,
) -> (BackupStatus, Vec<String>) {
    let mut errors = Vec::new();
    let mut status = BackupStatus {
        server_time: server_time.format(REPORT_TIME_FORMAT).to_string(),
        ..Default::default()
    };

    let syncthing = match syncthing {
        Ok(s) => {
            status.backed_up_files = s.local_files;
            status.backed_up_bytes = s.local_bytes;
            Some(s)
        }
        Err(e) => {
            errors.push(format!("syncthing: {:#}", e));
            None
        }
    };

    match acer {
        Ok(acer) => {
            status.acer_files = acer.file_count;
            status.acer_bytes = acer.byte_count;
            status.acer_time_stamp = format!("{}, {} {}", acer.time_string, acer.date_string, zone);
            if syncthing.is_some() {
                status.missing_files = status.acer_files - status.backed_up_files;
                status.missing_bytes = status.acer_bytes - status.backed_up_bytes;
            }
            match parse_acer_time(&acer, zone) {
                Ok(t) => {
                    status.acer_time_stamp = t.format(REPORT_TIME_FORMAT).to_string();
                    status.acer_age = format_duration(server_time.signed_duration_since(t));
                }
                Err(e) => errors.push(format!("status time: {:#}", e)),
            }
        }
        Err(e) => errors.push(format!("status file: {:#}", e)),
    }
    (status, errors)
}

/// Reads the status file and asks Syncthing for its view of the folder.
pub struct StatusSource {
    client: reqwest::Client,
}

impl StatusSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub async fn syncthing_status(&self, c: &Configuration) -> Result<SyncthingStatus> {
        if c.sync_api_endpoint.is_empty() {
            return Err(anyhow!("Syncthing API endpoint not configured"));
        }
        let response = self
            .client
            .get(&c.sync_api_endpoint)
            .query(&[("folder", &c.sync_folder_id)])
            .header("X-API-Key", &c.sync_api_key)
            .send()
            .await
            .context("Syncthing request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("Syncthing responded with {}", response.status()));
        }
        let text = response.text().await.context("reading Syncthing response")?;
        serde_json::from_str(&text).with_context(|| format!("Syncthing response is not status JSON: {}", text))
    }

    pub async fn acer_status(&self, c: &Configuration) -> Result<AcerStatus> {
        let content = tokio::fs::read_to_string(&c.acer_file_path)
            .await
            .with_context(|| format!("opening {}", c.acer_file_path))?;
        parse_acer_status(&content)
    }

    /// A fresh `BackupStatus` plus the problems met while building it.
    pub async fn current(&self, c: &Configuration) -> (BackupStatus, Vec<String>) {
        let syncthing = self.syncthing_status(c).await;
        let acer = self.acer_status(c).await;
        let (status, errors) = compare(Local::now(), acer, syncthing, &c.acer_time_zone);
        for e in &errors {
            log::error!("status: {}", e);
        }
        (status, errors)
    }
}

impl Default for StatusSource {
    fn default() -> Self {
        Self::new()
    }
}
