use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The fixed set of jobs the daemon schedules, one long-lived loop each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKey {
    History,
    Reporter,
    Simmon,
    Status,
}

impl JobKey {
    pub const ALL: [JobKey; 4] = [JobKey::History, JobKey::Reporter, JobKey::Simmon, JobKey::Status];

    /// Jobs driven by an `AutoEmailConfig` rather than the file watch.
    pub const PERIODIC: [JobKey; 3] = [JobKey::History, JobKey::Reporter, JobKey::Simmon];

    pub fn name(&self) -> &'static str {
        match self {
            JobKey::History => "HISTORY",
            JobKey::Reporter => "REPORTER",
            JobKey::Simmon => "SIMMON",
            JobKey::Status => "STATUS",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            JobKey::History => 0,
            JobKey::Reporter => 1,
            JobKey::Simmon => 2,
            JobKey::Status => 3,
        }
    }

    pub fn is_periodic(&self) -> bool {
        !matches!(self, JobKey::Status)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for JobKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HISTORY" => Ok(JobKey::History),
            "REPORTER" | "REPORTER-LOG" => Ok(JobKey::Reporter),
            "SIMMON" | "SIMMON-LOG" => Ok(JobKey::Simmon),
            "STATUS" | "WATCH" | "FILE-WATCH" => Ok(JobKey::Status),
            _ => Err(anyhow::anyhow!("Unknown job key: {}", s)),
        }
    }
}

/// A wake-up delivered to a scheduler loop.
///
/// `TimerExpired` is produced by the timed wait itself and is never accepted
/// from outside the loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlSignal {
    ConfigChanged,
    SendNow,
    TimerExpired,
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlSignal::ConfigChanged => "CONFIG_CHANGED",
            ControlSignal::SendNow => "SEND_NOW",
            ControlSignal::TimerExpired => "TIMER_EXPIRED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names_round_trip() {
        for key in JobKey::ALL {
            assert_eq!(key.name().parse::<JobKey>().unwrap(), key);
        }
        assert_eq!("reporter-log".parse::<JobKey>().unwrap(), JobKey::Reporter);
        assert_eq!("watch".parse::<JobKey>().unwrap(), JobKey::Status);
        assert!("nope".parse::<JobKey>().is_err());
    }

    #[test]
    fn test_indices_are_distinct() {
        let mut seen = [false; 4];
        for key in JobKey::ALL {
            assert!(!seen[key.index()]);
            seen[key.index()] = true;
        }
        assert!(JobKey::PERIODIC.iter().all(|k| k.is_periodic()));
        assert!(!JobKey::Status.is_periodic());
    }
}
