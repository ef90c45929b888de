//! Append-only JSONL provenance event log: one structured record per
//! resource-apply outcome, plus bundle-level start/finish brackets. This
//! crate applies to one host per run, not a fleet, so each line names a
//! resource rather than a machine.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One structured outcome of a resource apply, or a bundle-level bracket
/// event. Additional to, and never a replacement for, the single
/// `events.saved` trigger file (`eventstate::EventState`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        run_id: String,
        fuselage_version: String,
    },
    ResourceSkipped {
        resource: String,
    },
    ResourceConverged {
        resource: String,
        duration_seconds: f64,
    },
    ResourceUnchanged {
        resource: String,
    },
    ResourceFailed {
        resource: String,
        error: String,
    },
    ApplyFinished {
        run_id: String,
        resources_converged: u32,
        resources_unchanged: u32,
        resources_skipped: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper — one line of `events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

/// Generate an ISO 8601 UTC timestamp. No `chrono`/`time` dependency is
/// needed for a UTC, second-resolution timestamp this simple.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let leap = is_leap(y);
    let month_days = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut m = 0;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md as i64 {
            m = i + 1;
            break;
        }
        remaining -= md as i64;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID, unique enough within a single host's clock resolution.
pub fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// The event log's path: `<state_dir>/events.jsonl`.
pub fn event_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

/// Append one event to the log, creating `state_dir` if needed.
pub fn append_event(state_dir: &Path, event: ProvenanceEvent) -> std::io::Result<()> {
    let path = event_log_path(state_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{json}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601_shape() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn test_generate_run_id_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert!(id.len() > 4);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/state"));
        assert_eq!(p, PathBuf::from("/state/events.jsonl"));
    }

    #[test]
    fn test_append_resource_converged_event() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            ProvenanceEvent::ResourceConverged {
                resource: "File[/etc/motd]".to_string(),
                duration_seconds: 0.01,
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert!(content.contains("resource_converged"));
        assert!(content.contains("File[/etc/motd]"));
    }

    #[test]
    fn test_append_multiple_events_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            append_event(
                dir.path(),
                ProvenanceEvent::ResourceSkipped {
                    resource: format!("r{i}"),
                },
            )
            .unwrap();
        }
        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_is_leap_years() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(is_leap(2024));
        assert!(!is_leap(2023));
    }
}
