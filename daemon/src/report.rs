use crate::config::ConfigStore;
use crate::history::{self, HistoryLog};
use crate::logs::read_log;
use crate::mailer::{Email, MailTransport, SmtpSettings};
use crate::pages;
use crate::scheduler::{local_now, Clock, JobAction};
use crate::status::StatusSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::{format_time, schedule::recurrence, Configuration, JobKey};
use std::sync::Arc;

/// Cap on log lines mailed in one report.
pub const MAX_LOG_LINES: usize = 500;

/// Writes a report body into `body` and returns its subject line.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, config: &Configuration, body: &mut String) -> Result<String>;
}

/// The backup history table, optionally topped up with a fresh status first.
pub struct HistoryReport {
    status: Arc<StatusSource>,
    history: Arc<HistoryLog>,
}

impl HistoryReport {
    pub fn new(status: Arc<StatusSource>, history: Arc<HistoryLog>) -> Self {
        Self { status, history }
    }
}

#[async_trait]
impl ReportGenerator for HistoryReport {
    async fn generate(&self, config: &Configuration, body: &mut String) -> Result<String> {
        if config.history_file_auto_append {
            let (status, _) = self.status.current(config).await;
            if let Err(e) = self.history.append(&config.history_file, &status) {
                log::error!("history: {:#}", e);
            }
        }
        let records = history::read_all(&config.history_file)?;
        body.push_str(&pages::history_table(&records));
        Ok(match records.last() {
            Some(r) => format!("Backup history: {} files missing at {}", r.missing_files, r.server_time),
            None => "Backup history: no records".to_string(),
        })
    }
}

/// The tail of a log file covering the job's last recurrence window.
pub struct LogReport {
    key: JobKey,
    clock: Clock,
}

impl LogReport {
    pub fn new(key: JobKey) -> Self {
        Self { key, clock: local_now }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ReportGenerator for LogReport {
    async fn generate(&self, config: &Configuration, body: &mut String) -> Result<String> {
        let path = config
            .log_file_path(self.key)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("no log file configured for {}", self.key))?;
        let aec = config
            .auto_email(self.key)
            .ok_or_else(|| anyhow!("{} has no auto-email settings", self.key))?;
        let now = (self.clock)();
        let since = now
            .checked_sub_signed(recurrence(aec.auto_email_count, aec.auto_email_period)?)
            .ok_or_else(|| {
                anyhow!(
                    "{} {} before {} is out of range",
                    aec.auto_email_count,
                    aec.auto_email_period,
                    format_time(&now)
                )
            })?;
        let since = format_time(&since);

        let lines = read_log(path, &since, MAX_LOG_LINES)?;
        body.push_str(&pages::log_block(&lines));
        Ok(format!("{} log: {} lines since {}", self.key, lines.len(), since))
    }
}

/// A fresh backup status, recorded in the history and mailed.
pub struct StatusReport {
    status: Arc<StatusSource>,
    history: Arc<HistoryLog>,
}

impl StatusReport {
    pub fn new(status: Arc<StatusSource>, history: Arc<HistoryLog>) -> Self {
        Self { status, history }
    }
}

#[async_trait]
impl ReportGenerator for StatusReport {
    async fn generate(&self, config: &Configuration, body: &mut String) -> Result<String> {
        let (status, mut errors) = self.status.current(config).await;
        if let Err(e) = self.history.append(&config.history_file, &status) {
            errors.push(format!("history: {:#}", e));
        }
        body.push_str(&pages::status_section(&status, &errors));
        Ok(if errors.is_empty() {
            format!("Backup status: {} files missing", status.missing_files)
        } else {
            format!("Backup status: {} files missing ({} errors)", status.missing_files, errors.len())
        })
    }
}

/// Generates a report and mails it with the current email settings.
pub struct ReportJob {
    config: Arc<ConfigStore>,
    generator: Arc<dyn ReportGenerator>,
    transport: Arc<dyn MailTransport>,
}

impl ReportJob {
    pub fn new(
        config: Arc<ConfigStore>,
        generator: Arc<dyn ReportGenerator>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self { config, generator, transport }
    }
}

#[async_trait]
impl JobAction for ReportJob {
    async fn fire(&self, key: JobKey) -> Result<()> {
        let config = self.config.get()?;
        let mut body = String::new();
        // A failed report is still mailed, carrying the error.
        let subject = match self.generator.generate(&config, &mut body).await {
            Ok(subject) => subject,
            Err(e) => {
                log::error!("mailer({}): generating report: {:#}", key, e);
                body.push_str(&pages::error_block(&format!("{:#}", e)));
                format!("{} report failed", key)
            }
        };
        let email = Email {
            from: config.email_from.clone(),
            to: config.email_to.clone(),
            subject,
            html_body: pages::email(&body),
        };
        self.transport.send(email, SmtpSettings::from_config(&config)).await?;
        log::info!("mailer({}): emailed OK", key);
        Ok(())
    }
}
