//! Plain-text transcript of one server run
//!
//! Lines look like `[2025-01-02 03:04:05] <alice> hello`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::message::ChatMessage;

#[derive(Debug)]
pub struct ChatLog {
    path: PathBuf,
    file: File,
}

impl ChatLog {
    /// Open a fresh `session-<timestamp>.log` under `dir`
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let name = format!("session-{}.log", Local::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Writing session log to {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message; failures are logged only
    pub fn append(&mut self, message: &ChatMessage) {
        if let Err(e) = writeln!(self.file, "{}", format_line(message)) {
            warn!("Failed to write session log {}: {}", self.path.display(), e);
        }
    }
}

fn format_line(message: &ChatMessage) -> String {
    format!(
        "[{}] <{}> {}",
        message.timestamp().with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        message.sender(),
        message.text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = ChatLog::create(dir.path().join("logs")).unwrap();

        let first = ChatMessage::new("alice", "hello");
        log.append(&first);
        log.append(&ChatMessage::system("bob joined the chat"));

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("<alice> hello"));
        assert!(lines[1].ends_with("<SERVER> bob joined the chat"));

        let stamp = first.timestamp().with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        assert!(lines[0].starts_with(&format!("[{}]", stamp)));
    }
}
