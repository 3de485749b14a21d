use crate::settings::SettingsView;
use common::{BackupStatus, JobKey, Period};
use std::fmt::Write;

const STYLE: &str = "body{font-family:sans-serif;margin:1em}table{border-collapse:collapse}\
td,th{border:1px solid #ccc;padding:2px 6px;text-align:right}\
.errored{color:#b00}.message{font-weight:bold}pre{font-size:90%}";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// A full page with the navigation bar.
pub fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <link rel=\"stylesheet\" href=\"/static/reporter.css\"><style>{STYLE}</style></head>\n\
         <body><nav><a href=\"/status\">Status</a> | <a href=\"/history\">History</a> | \
         <a href=\"/logs\">Logs</a> | <a href=\"/settings\">Settings</a></nav>\n\
         <h1>{title}</h1>\n{body}</body></html>\n",
        title = escape(title),
    )
}

/// The wrapper for mailed reports.
pub fn email(body: &str) -> String {
    format!("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><style>{STYLE}</style></head>\n<body>{body}</body></html>\n")
}

pub fn error_block(message: &str) -> String {
    format!("<p class=\"errored\">{}</p>\n", escape(message))
}

pub fn status_section(status: &BackupStatus, errors: &[String]) -> String {
    let mut out = String::from("<table>\n");
    let rows: [(&str, String); 9] = [
        ("Server time", status.server_time.clone()),
        ("Status file time", status.acer_time_stamp.clone()),
        ("Status file age", status.acer_age.clone()),
        ("Files on workstation", status.acer_files.to_string()),
        ("Bytes on workstation", status.acer_bytes.to_string()),
        ("Files backed up", status.backed_up_files.to_string()),
        ("Bytes backed up", status.backed_up_bytes.to_string()),
        ("Missing files", status.missing_files.to_string()),
        ("Missing bytes", status.missing_bytes.to_string()),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "<tr><th>{}</th><td>{}</td></tr>", name, escape(&value));
    }
    out.push_str("</table>\n");
    for e in errors {
        out.push_str(&error_block(e));
    }
    out
}

/// Newest record first.
pub fn history_table(records: &[BackupStatus]) -> String {
    if records.is_empty() {
        return "<p>No history recorded yet.</p>\n".to_string();
    }
    let mut out = String::from(
        "<table>\n<tr><th>Server time</th><th>Status file time</th><th>Age</th>\
         <th>Workstation files</th><th>Backed up files</th><th>Missing files</th><th>Missing bytes</th></tr>\n",
    );
    for r in records.iter().rev() {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&r.server_time),
            escape(&r.acer_time_stamp),
            escape(&r.acer_age),
            r.acer_files,
            r.backed_up_files,
            r.missing_files,
            r.missing_bytes,
        );
    }
    out.push_str("</table>\n");
    out
}

pub fn log_block(lines: &[String]) -> String {
    let mut out = String::from("<pre>\n");
    for line in lines {
        out.push_str(&escape(line));
        out.push('\n');
    }
    out.push_str("</pre>\n");
    out
}

fn send_button(key: JobKey) -> String {
    format!(
        "<form method=\"post\" action=\"/send/{}\"><button type=\"submit\">Email {} report now</button></form>\n",
        key.name().to_lowercase(),
        key.name().to_lowercase(),
    )
}

pub fn status_page(status: &BackupStatus, errors: &[String]) -> String {
    let body = status_section(status, errors) + &send_button(JobKey::Status);
    layout("Backup Status", &body)
}

pub fn history_page(records: Result<Vec<BackupStatus>, String>) -> String {
    let body = match records {
        Ok(records) => history_table(&records) + &send_button(JobKey::History),
        Err(e) => error_block(&e),
    };
    layout("Backup History", &body)
}

/// Query parameters echoed back into the log form.
pub struct LogQuery<'a> {
    pub log_type: &'a str,
    pub start_date: &'a str,
    pub max_lines: usize,
}

pub fn logs_page(query: &LogQuery, lines: Result<Vec<String>, String>) -> String {
    let mut body = String::from("<form method=\"get\" action=\"/logs\"><select name=\"LogType\">");
    for (value, label) in [("reporter", "Reporter"), ("simmon", "Simmon")] {
        let selected = if value == query.log_type { " selected" } else { "" };
        let _ = write!(body, "<option value=\"{}\"{}>{}</option>", value, selected, label);
    }
    let _ = write!(
        body,
        "</select> from <input type=\"text\" name=\"StartDate\" value=\"{}\"> \
         max <input type=\"number\" name=\"MaxLines\" value=\"{}\"> \
         <button type=\"submit\">Show</button></form>\n",
        escape(query.start_date),
        query.max_lines,
    );
    match lines {
        Ok(lines) => body.push_str(&log_block(&lines)),
        Err(e) => body.push_str(&error_block(&e)),
    }
    layout("Logs", &body)
}

fn period_options(selected: Period) -> String {
    let mut out = String::new();
    for p in Period::ALL {
        let mark = if p == selected { " selected" } else { "" };
        let _ = write!(out, "<option value=\"{}\"{}>{}</option>", p, mark, p);
    }
    out
}

pub fn settings_page(view: &SettingsView) -> String {
    let mut body = String::new();
    if !view.message.is_empty() {
        let _ = writeln!(body, "<p class=\"message\">{}</p>", escape(&view.message));
    }
    body.push_str("<form method=\"post\" action=\"/settings\">\n<table>\n");
    for s in &view.settings {
        let readonly = if s.readonly { " readonly" } else { "" };
        let input = if s.kind == "checkbox" {
            let checked = if s.checked { " checked" } else { "" };
            format!("<input type=\"checkbox\" id=\"{id}\" name=\"{id}\" value=\"checked\"{checked}{readonly}>", id = s.id)
        } else {
            format!(
                "<input type=\"{}\" id=\"{id}\" name=\"{id}\" value=\"{}\"{readonly}>",
                s.kind,
                escape(&s.value),
                id = s.id
            )
        };
        let _ = writeln!(
            body,
            "<tr class=\"{}\"><th><label for=\"{}\">{}</label></th><td>{}</td><td>{}</td></tr>",
            s.errored,
            s.id,
            escape(s.name),
            input,
            escape(&s.description),
        );
    }
    body.push_str("</table>\n<h2>Automatic emails</h2>\n<table>\n");
    for a in &view.auto_emails {
        let checked = if a.checked { " checked" } else { "" };
        // Count and period are fixed while a schedule is running.
        let locked = if a.locked { " readonly" } else { "" };
        let _ = writeln!(
            body,
            "<tr class=\"{errored}\"><th>{name}</th>\
             <td><input type=\"checkbox\" name=\"{id}_Checked\" value=\"checked\"{checked}></td>\
             <td>every <input type=\"number\" name=\"{id}_Count\" value=\"{count}\"{locked}>\
             <select name=\"{id}_Period\">{options}</select></td>\
             <td>next: {next}</td><td>{description}</td></tr>",
            errored = a.errored,
            name = escape(a.name),
            id = a.id,
            count = escape(&a.count),
            options = period_options(a.period),
            next = escape(&a.next),
            description = escape(&a.description),
        );
    }
    body.push_str(
        "</table>\n<input type=\"hidden\" name=\"submit\" value=\"yes\">\
         <button type=\"submit\">Save</button> <a href=\"/settings\">Reset</a>\n</form>\n",
    );
    layout("Settings", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_history_table_newest_first() {
        let records = vec![
            BackupStatus { server_time: "2026-06-01 10:00:00".into(), ..Default::default() },
            BackupStatus { server_time: "2026-06-02 10:00:00".into(), ..Default::default() },
        ];
        let html = history_table(&records);
        let first = html.find("2026-06-02").unwrap();
        let second = html.find("2026-06-01").unwrap();
        assert!(first < second);
        assert!(history_table(&[]).contains("No history"));
    }

    #[test]
    fn test_status_section_escapes_errors() {
        let html = status_section(&BackupStatus::default(), &["bad <thing>".to_string()]);
        assert!(html.contains("bad &lt;thing&gt;"));
        assert!(html.contains("class=\"errored\""));
    }

    #[test]
    fn test_logs_page_keeps_query() {
        let query = LogQuery { log_type: "simmon", start_date: "2026-06-01", max_lines: 20 };
        let html = logs_page(&query, Ok(vec!["line <1>".into()]));
        assert!(html.contains("<option value=\"simmon\" selected>"));
        assert!(html.contains("value=\"2026-06-01\""));
        assert!(html.contains("line &lt;1&gt;"));
    }
}
