use crate::config::{ConfigError, ConfigStore};
use crate::control::ControlBus;
use chrono::NaiveDateTime;
use common::{calculate_next_time, format_time, AutoEmailConfig, Configuration, JobKey, Period};
use std::collections::HashMap;

pub type Form = HashMap<String, String>;

/// One row of the settings form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub id: &'static str,
    pub name: &'static str,
    /// HTML input type.
    pub kind: &'static str,
    pub value: String,
    pub checked: bool,
    pub readonly: bool,
    /// `"errored"` or empty.
    pub errored: &'static str,
    /// Help text, replaced by the error when validation fails.
    pub description: String,
}

/// The enable/count/period controls of one periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoEmailSetting {
    pub key: JobKey,
    pub id: &'static str,
    pub name: &'static str,
    pub checked: bool,
    /// Count and period can only be edited while the job is disabled.
    pub locked: bool,
    pub count: String,
    pub period: Period,
    pub next: String,
    pub errored: &'static str,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsView {
    pub message: String,
    pub settings: Vec<Setting>,
    pub auto_emails: Vec<AutoEmailSetting>,
}

impl SettingsView {
    pub fn has_errors(&self) -> bool {
        self.settings.iter().any(|s| !s.errored.is_empty())
            || self.auto_emails.iter().any(|a| !a.errored.is_empty())
    }
}

fn field(id: &'static str, name: &'static str, kind: &'static str, value: String, description: &str) -> Setting {
    Setting {
        id,
        name,
        kind,
        value,
        checked: false,
        readonly: false,
        errored: "",
        description: description.to_string(),
    }
}

fn checkbox(id: &'static str, name: &'static str, checked: bool, description: &str) -> Setting {
    Setting {
        checked,
        ..field(id, name, "checkbox", String::new(), description)
    }
}

fn readonly(id: &'static str, name: &'static str, value: String, description: &str) -> Setting {
    Setting {
        readonly: true,
        ..field(id, name, "text", value, description)
    }
}

/// Form id and label of each periodic job's controls.
const AUTO_EMAIL_FIELDS: [(JobKey, &str, &str); 3] = [
    (JobKey::History, "HistoryLogAutoEmail", "History Auto Email"),
    (JobKey::Reporter, "ReporterLogAutoEmail", "Reporter Auto Email"),
    (JobKey::Simmon, "SimmonLogAutoEmail", "Simmon Auto Email"),
];

fn auto_email_setting(key: JobKey, id: &'static str, name: &'static str, aec: &AutoEmailConfig) -> AutoEmailSetting {
    AutoEmailSetting {
        key,
        id,
        name,
        checked: aec.auto_email_enable,
        locked: aec.auto_email_enable,
        count: aec.auto_email_count.to_string(),
        period: aec.auto_email_period,
        next: aec.auto_email_next.clone(),
        errored: "",
        description: format!("Check to enable auto emailing of {} reports", key.name().to_lowercase()),
    }
}

/// The form as it shows the current configuration.
pub fn view(c: &Configuration) -> SettingsView {
    let settings = vec![
        field(
            "DialTimeout",
            "Connection Timeout",
            "number",
            c.dial_timeout.to_string(),
            "Retry count for the initial connection",
        ),
        readonly("Port", "Server Port", c.port.clone(), "Reporter server listening port"),
        field(
            "AcerFilePath",
            "Acer File Path",
            "text",
            c.acer_file_path.clone(),
            "Location of file containing AcerStatus",
        ),
        field(
            "SyncFolderId",
            "Syncthing Folder Id",
            "text",
            c.sync_folder_id.clone(),
            "Identifies folder being monitored (from Syncthing-GUI)",
        ),
        field(
            "SyncApiKey",
            "Syncthing API Key",
            "text",
            c.sync_api_key.clone(),
            "Authorises API access (from Syncthing-GUI)",
        ),
        checkbox(
            "EnableAcerFileWatch",
            "Watch Acer File",
            c.enable_acer_file_watch,
            "Email the backup status whenever the Acer file changes",
        ),
        field(
            "AcerFileWatchPeriod",
            "Acer File Watch Period",
            "number",
            c.acer_file_watch_period.to_string(),
            "Seconds between checks of the Acer file",
        ),
        checkbox(
            "HistoryFileAutoAppend",
            "History Auto Append",
            c.history_file_auto_append,
            "Record a fresh status before each history email",
        ),
        readonly(
            "SimmonLogFilePath",
            "Simmon Log Path",
            c.simmon_log_file_path.clone(),
            "Path to logfile for Simmon",
        ),
        readonly(
            "ReporterLogFilePath",
            "Reporter Log Path",
            c.reporter_log_file_path.clone(),
            "Path to logfile for Reporter",
        ),
    ];
    let auto_emails = AUTO_EMAIL_FIELDS
        .iter()
        .filter_map(|&(key, id, name)| c.auto_email(key).map(|aec| auto_email_setting(key, id, name, aec)))
        .collect();
    SettingsView {
        message: String::new(),
        settings,
        auto_emails,
    }
}

/// What a valid form changes in one job's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoEmailChange {
    Keep,
    Disable,
    Enable { count: i64, period: Period, next: String },
}

/// Every validated value of a submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPatch {
    pub dial_timeout: i64,
    pub acer_file_path: String,
    pub sync_folder_id: String,
    pub sync_api_key: String,
    pub enable_acer_file_watch: bool,
    pub acer_file_watch_period: i64,
    pub history_file_auto_append: bool,
    pub auto_emails: Vec<(JobKey, AutoEmailChange)>,
}

impl SettingsPatch {
    /// Write the patch onto `c`. Jobs marked `Keep` are left alone so a
    /// concurrent reschedule by their loop survives.
    pub fn apply(&self, c: &mut Configuration) {
        c.dial_timeout = self.dial_timeout;
        c.acer_file_path = self.acer_file_path.clone();
        c.sync_folder_id = self.sync_folder_id.clone();
        c.sync_api_key = self.sync_api_key.clone();
        c.enable_acer_file_watch = self.enable_acer_file_watch;
        c.acer_file_watch_period = self.acer_file_watch_period;
        c.history_file_auto_append = self.history_file_auto_append;
        for (key, change) in &self.auto_emails {
            let Some(aec) = c.auto_email_mut(*key) else { continue };
            match change {
                AutoEmailChange::Keep => {}
                AutoEmailChange::Disable => aec.auto_email_enable = false,
                AutoEmailChange::Enable { count, period, next } => {
                    aec.auto_email_enable = true;
                    aec.auto_email_count = *count;
                    aec.auto_email_period = *period;
                    aec.auto_email_next = next.clone();
                }
            }
        }
    }
}

fn form_value(form: &Form, id: &str) -> String {
    form.get(id).cloned().unwrap_or_default()
}

fn form_checked(form: &Form, id: &str) -> bool {
    form.get(id).map_or(false, |v| !v.is_empty())
}

fn parse_int(value: &str, min: i64, max: i64) -> Result<i64, String> {
    let n: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a whole number", value))?;
    if n < min || n > max {
        return Err(format!("out of range ({},{})", min, max));
    }
    Ok(n)
}

fn mark(setting: &mut Setting, error: String) {
    setting.errored = "errored";
    setting.description = error;
}

/// Check a submitted form against the current configuration.
///
/// The returned view echoes what was entered, with errors marked. A patch is
/// only returned when every field is valid.
pub fn validate(form: &Form, current: &Configuration, now: NaiveDateTime) -> (SettingsView, Option<SettingsPatch>) {
    let mut view = view(current);
    let mut patch = SettingsPatch {
        dial_timeout: current.dial_timeout,
        acer_file_path: current.acer_file_path.clone(),
        sync_folder_id: current.sync_folder_id.clone(),
        sync_api_key: current.sync_api_key.clone(),
        enable_acer_file_watch: current.enable_acer_file_watch,
        acer_file_watch_period: current.acer_file_watch_period,
        history_file_auto_append: current.history_file_auto_append,
        auto_emails: Vec::new(),
    };

    for s in view.settings.iter_mut().filter(|s| !s.readonly) {
        if s.kind == "checkbox" {
            s.checked = form_checked(form, s.id);
        } else {
            s.value = form_value(form, s.id);
        }
        let result = match s.id {
            "DialTimeout" => parse_int(&s.value, 1, 10_000).map(|n| patch.dial_timeout = n),
            "AcerFileWatchPeriod" => parse_int(&s.value, 1, i64::MAX).map(|n| patch.acer_file_watch_period = n),
            id => {
                match id {
                    "AcerFilePath" => patch.acer_file_path = s.value.clone(),
                    "SyncFolderId" => patch.sync_folder_id = s.value.clone(),
                    "SyncApiKey" => patch.sync_api_key = s.value.clone(),
                    "EnableAcerFileWatch" => patch.enable_acer_file_watch = s.checked,
                    "HistoryFileAutoAppend" => patch.history_file_auto_append = s.checked,
                    _ => {}
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            mark(s, e);
        }
    }

    for a in view.auto_emails.iter_mut() {
        let was_enabled = a.checked;
        a.checked = form_checked(form, &format!("{}_Checked", a.id));
        let change = match (was_enabled, a.checked) {
            (false, true) => {
                a.count = form_value(form, &format!("{}_Count", a.id));
                let period = form_value(form, &format!("{}_Period", a.id));
                let parsed = parse_int(&a.count, 1, i64::MAX)
                    .map_err(|e| format!("count {}", e))
                    .and_then(|count| {
                        let period: Period = period.parse().map_err(|e: anyhow::Error| e.to_string())?;
                        let next = calculate_next_time(now, count, period).map_err(|e| e.to_string())?;
                        Ok((count, period, format_time(&next)))
                    });
                match parsed {
                    Ok((count, period, next)) => {
                        a.period = period;
                        a.next = next.clone();
                        a.locked = true;
                        AutoEmailChange::Enable { count, period, next }
                    }
                    Err(e) => {
                        a.errored = "errored";
                        a.description = e;
                        AutoEmailChange::Keep
                    }
                }
            }
            (true, false) => {
                a.locked = false;
                AutoEmailChange::Disable
            }
            _ => AutoEmailChange::Keep,
        };
        patch.auto_emails.push((a.key, change));
    }

    if view.has_errors() {
        (view, None)
    } else {
        (view, Some(patch))
    }
}

/// Handle a settings form post: validate, commit, then tell every affected
/// job. Returns the page to show.
pub async fn submit(store: &ConfigStore, bus: &ControlBus, form: &Form, now: NaiveDateTime) -> SettingsView {
    let current = match store.get() {
        Ok(c) => c,
        Err(e) => {
            log::error!("settings: {}", e);
            return SettingsView {
                message: format!("Error reading config: {}", e),
                ..SettingsView::default()
            };
        }
    };
    if form.get("submit").map(String::as_str) != Some("yes") {
        return view(&current);
    }

    let (mut page, patch) = validate(form, &current, now);
    let Some(patch) = patch else {
        page.message = "Settings not saved: correct the highlighted fields".to_string();
        return page;
    };

    let mut changed = Vec::new();
    let result = store.update(|c| {
        let before = c.clone();
        patch.apply(c);
        changed = before.changed_jobs(c);
    });
    page.message = match &result {
        Ok(()) => "Settings updated successfully".to_string(),
        Err(e) => {
            log::error!("settings: {}", e);
            format!("Error saving config: {}", e)
        }
    };
    // A failed write still changed the in-memory config the jobs read.
    if matches!(result, Ok(()) | Err(ConfigError::Io { .. })) {
        if let Err(e) = bus.config_changed(&changed).await {
            log::warn!("settings: {}", e);
        }
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{parse_time, ControlSignal};

    fn now() -> NaiveDateTime {
        parse_time("2026-06-01 12:00:00").unwrap()
    }

    /// A form that resubmits `c` unchanged.
    fn form_for(c: &Configuration) -> Form {
        let mut form = Form::new();
        form.insert("submit".into(), "yes".into());
        for s in view(c).settings {
            if s.kind == "checkbox" {
                if s.checked {
                    form.insert(s.id.into(), "checked".into());
                }
            } else {
                form.insert(s.id.into(), s.value);
            }
        }
        for a in view(c).auto_emails {
            if a.checked {
                form.insert(format!("{}_Checked", a.id), "checked".into());
            }
            form.insert(format!("{}_Count", a.id), a.count);
            form.insert(format!("{}_Period", a.id), a.period.to_string());
        }
        form
    }

    #[test]
    fn test_view_lists_every_field() {
        let v = view(&Configuration::default());
        let ids: Vec<_> = v.settings.iter().map(|s| s.id).collect();
        assert!(ids.contains(&"DialTimeout"));
        assert!(ids.contains(&"EnableAcerFileWatch"));
        assert!(v.settings.iter().find(|s| s.id == "Port").unwrap().readonly);
        let auto: Vec<_> = v.auto_emails.iter().map(|a| a.id).collect();
        assert_eq!(auto, vec!["HistoryLogAutoEmail", "ReporterLogAutoEmail", "SimmonLogAutoEmail"]);
        let keys: Vec<_> = v.auto_emails.iter().map(|a| a.key).collect();
        assert_eq!(keys, JobKey::PERIODIC.to_vec());
    }

    #[test]
    fn test_dial_timeout_range() {
        let c = Configuration::default();
        let mut form = form_for(&c);
        form.insert("DialTimeout".into(), "20000".into());
        let (page, patch) = validate(&form, &c, now());
        assert!(patch.is_none());
        let s = page.settings.iter().find(|s| s.id == "DialTimeout").unwrap();
        assert_eq!(s.errored, "errored");
        assert_eq!(s.description, "out of range (1,10000)");
        assert_eq!(s.value, "20000");

        form.insert("DialTimeout".into(), "abc".into());
        assert!(validate(&form, &c, now()).1.is_none());
        form.insert("DialTimeout".into(), "10000".into());
        assert_eq!(validate(&form, &c, now()).1.unwrap().dial_timeout, 10000);
    }

    #[test]
    fn test_enabling_schedules_next_from_now() {
        let c = Configuration::default();
        let mut form = form_for(&c);
        form.insert("ReporterLogAutoEmail_Checked".into(), "checked".into());
        form.insert("ReporterLogAutoEmail_Count".into(), "3".into());
        form.insert("ReporterLogAutoEmail_Period".into(), "days".into());

        let (page, patch) = validate(&form, &c, now());
        let patch = patch.unwrap();
        let mut after = c.clone();
        patch.apply(&mut after);
        let aec = &after.reporter_log_auto_email;
        assert!(aec.auto_email_enable);
        assert_eq!(aec.auto_email_count, 3);
        assert_eq!(aec.auto_email_period, Period::Days);
        assert_eq!(aec.auto_email_next, "2026-06-04 12:00:00");
        assert!(page.auto_emails[1].locked);
        assert_eq!(c.changed_jobs(&after), vec![JobKey::Reporter]);
    }

    #[test]
    fn test_enabled_job_ignores_count_edits() {
        let mut c = Configuration::default();
        c.simmon_log_auto_email.auto_email_enable = true;
        c.simmon_log_auto_email.auto_email_next = "2026-06-01 13:00:00".into();
        let mut form = form_for(&c);
        form.insert("SimmonLogAutoEmail_Count".into(), "9".into());

        let patch = validate(&form, &c, now()).1.unwrap();
        assert!(patch.auto_emails.contains(&(JobKey::Simmon, AutoEmailChange::Keep)));

        form.remove("SimmonLogAutoEmail_Checked");
        let patch = validate(&form, &c, now()).1.unwrap();
        assert!(patch.auto_emails.contains(&(JobKey::Simmon, AutoEmailChange::Disable)));
    }

    #[test]
    fn test_bad_auto_email_count_rejects_form() {
        let c = Configuration::default();
        let mut form = form_for(&c);
        form.insert("HistoryLogAutoEmail_Checked".into(), "checked".into());
        form.insert("HistoryLogAutoEmail_Count".into(), "0".into());
        let (page, patch) = validate(&form, &c, now());
        assert!(patch.is_none());
        assert_eq!(page.auto_emails[0].errored, "errored");

        form.insert("HistoryLogAutoEmail_Count".into(), "2".into());
        form.insert("HistoryLogAutoEmail_Period".into(), "fortnights".into());
        assert!(validate(&form, &c, now()).1.is_none());
    }

    #[test]
    fn test_keep_preserves_concurrent_reschedule() {
        let mut c = Configuration::default();
        c.history_log_auto_email.auto_email_enable = true;
        c.history_log_auto_email.auto_email_next = "2026-06-01 13:00:00".into();
        let patch = validate(&form_for(&c), &c, now()).1.unwrap();

        // The job loop moves its schedule on before the form commits.
        let mut latest = c.clone();
        latest.history_log_auto_email.auto_email_next = "2026-06-01 14:00:00".into();
        patch.apply(&mut latest);
        assert_eq!(latest.history_log_auto_email.auto_email_next, "2026-06-01 14:00:00");
    }

    fn store_with(dir: &tempfile::TempDir, c: &Configuration) -> ConfigStore {
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(c).unwrap()).unwrap();
        ConfigStore::open(path).unwrap()
    }

    #[tokio::test]
    async fn test_submit_saves_and_signals_affected_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let c = Configuration::default();
        let store = store_with(&dir, &c);
        let bus = ControlBus::new();
        let mut status_rx = bus.take_receiver(JobKey::Status).unwrap();

        let mut form = form_for(&c);
        form.insert("EnableAcerFileWatch".into(), "checked".into());
        form.insert("SyncApiKey".into(), "secret".into());

        let (page, signal) = tokio::join!(submit(&store, &bus, &form, now()), status_rx.recv());
        assert_eq!(page.message, "Settings updated successfully");
        assert_eq!(signal, Some(ControlSignal::ConfigChanged));
        let saved = store.get().unwrap();
        assert!(saved.enable_acer_file_watch);
        assert_eq!(saved.sync_api_key, "secret");
    }

    #[tokio::test]
    async fn test_submit_with_errors_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let c = Configuration::default();
        let store = store_with(&dir, &c);
        let bus = ControlBus::new();

        let mut form = form_for(&c);
        form.insert("SyncApiKey".into(), "secret".into());
        form.insert("AcerFileWatchPeriod".into(), "0".into());
        let page = submit(&store, &bus, &form, now()).await;
        assert!(page.has_errors());
        assert_eq!(store.get().unwrap(), c);
    }

    #[tokio::test]
    async fn test_submit_without_flag_just_shows_page() {
        let dir = tempfile::tempdir().unwrap();
        let c = Configuration::default();
        let store = store_with(&dir, &c);
        let mut form = form_for(&c);
        form.remove("submit");
        form.insert("SyncApiKey".into(), "secret".into());
        let page = submit(&store, &ControlBus::new(), &form, now()).await;
        assert!(page.message.is_empty());
        assert_eq!(store.get().unwrap().sync_api_key, "");
    }
}
