use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Lines of a log file starting at the first line that `matches` `start`,
/// at most `max_lines` of them (0 means no limit).
///
/// Both the reporter's and the monitor's logs begin each line with a
/// timestamp, so `start` is normally a timestamp prefix such as
/// `2026-06-01 08:00`.
pub fn read_log(path: impl AsRef<Path>, start: &str, max_lines: usize) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_context(|| format!("opening log {:?}", path))?;
    let mut lines = Vec::new();
    let mut adding = false;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !adding && matches(start, &line) {
            adding = true;
        }
        if adding {
            lines.push(line);
            if max_lines > 0 && lines.len() >= max_lines {
                break;
            }
        }
    }
    log::debug!("read_log: {} lines from {:?}", lines.len(), path);
    Ok(lines)
}

/// Whether `line` is at or after `prefix`.
///
/// An empty prefix matches everything and an exact prefix always matches.
/// Otherwise both are compared as timestamps over the prefix's length:
/// wherever the prefix has a digit the line must too, separators are
/// ignored, and the digits are compared in order.
pub fn matches(prefix: &str, line: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let p: Vec<char> = prefix.chars().collect();
    let l: Vec<char> = line.chars().collect();
    let n = p.len().min(l.len());
    if p[..n] == l[..n] {
        return true;
    }

    let mut masked_p = String::with_capacity(n);
    let mut masked_l = String::with_capacity(n);
    for i in 0..n {
        if p[i].is_ascii_digit() {
            if !l[i].is_ascii_digit() {
                return false;
            }
            masked_p.push(p[i]);
            masked_l.push(l[i]);
        } else {
            masked_p.push(' ');
            masked_l.push(' ');
        }
    }
    masked_p <= masked_l
}
