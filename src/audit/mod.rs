use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const FILE_PREFIX: &str = "admin_actions_";

/// Append-only record of operator actions, one file per local day.
#[derive(Debug, Clone)]
pub struct ActionLog {
    dir: PathBuf,
}

impl ActionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, at: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("{}{}.log", FILE_PREFIX, at.format("%Y-%m-%d")))
    }

    /// Writes the entry and mirrors it to tracing. Write failures are logged
    /// here and never reach the caller.
    pub async fn record(&self, admin: &str, target: &str, action: &str, detail: &str) {
        tracing::info!(%admin, %target, %action, %detail, "admin action");
        let now = Local::now();
        if let Err(err) = self.append(&now, &format_entry(&now, admin, target, action, detail)).await {
            tracing::warn!(dir = %self.dir.display(), error = %err, "failed to write action log");
        }
    }

    async fn append(&self, at: &DateTime<Local>, line: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(at))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

fn format_entry(at: &DateTime<Local>, admin: &str, target: &str, action: &str, detail: &str) -> String {
    let mut entry = format!(
        "[{}] admin={} | hall={} | action={}",
        at.format("%Y-%m-%d %H:%M:%S"),
        admin,
        target,
        action
    );
    if !detail.is_empty() {
        entry.push_str(" | ");
        entry.push_str(detail);
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_omits_empty_detail() {
        let at = Local.with_ymd_and_hms(2026, 3, 1, 21, 5, 9).unwrap();
        assert_eq!(
            format_entry(&at, "alice", "hall1", "STOP", ""),
            "[2026-03-01 21:05:09] admin=alice | hall=hall1 | action=STOP"
        );
        assert_eq!(
            format_entry(&at, "alice", "hall1", "VOLUME", "level: 4.5"),
            "[2026-03-01 21:05:09] admin=alice | hall=hall1 | action=VOLUME | level: 4.5"
        );
    }

    #[test]
    fn files_are_named_per_day() {
        let log = ActionLog::new("logs");
        let at = Local.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        assert_eq!(
            log.file_for(&at),
            PathBuf::from("logs").join("admin_actions_2026-10-14.log")
        );
    }

    #[tokio::test]
    async fn record_appends_lines_and_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let log = ActionLog::new(tmp.path().join("audit"));

        log.record("bob", "SYSTEM", "LOGIN", "signed in").await;
        log.record("bob", "hall2", "PLAY", "").await;

        let raw = std::fs::read_to_string(log.file_for(&Local::now())).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("admin=bob | hall=SYSTEM | action=LOGIN | signed in"));
        assert!(lines[1].ends_with("action=PLAY"));
    }
}
