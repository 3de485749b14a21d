use serde::{Deserialize, Serialize};

/// Comparison of the workstation's backup status file against Syncthing.
/// One of these is appended to the history log per line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupStatus {
    /// Also the timestamp of the record.
    pub server_time: String,
    pub missing_files: i64,
    pub missing_bytes: i64,
    pub backed_up_files: i64,
    pub backed_up_bytes: i64,
    pub acer_files: i64,
    pub acer_bytes: i64,
    pub acer_time_stamp: String,
    /// How long before `server_time` the workstation wrote its status.
    pub acer_age: String,
}
