use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;
use tokio::sync::Mutex;
use tracing::error;

/// Append-only event log. One record per line, `YYYY-MM-DD HH:MM:SS - <event>`
/// in local time. The record is written and flushed while the lock is held,
/// so records never interleave.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<EventLog> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(EventLog { file: Mutex::new(file) })
    }

    pub async fn record(&self, event: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self.file.lock().await;
        if let Err(err) = writeln!(file, "{stamp} - {event}").and_then(|()| file.flush()) {
            error!("Failed to append to event log: {err}");
        }
    }
}
