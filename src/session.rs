//! Session identity and transcript logging.
//!
//! Each HTTP request or line connection is a session with a process-wide
//! unique id. When logging is enabled its traffic goes to
//! `<location>/sess_<id>.log`.

use crate::config::SessionLogging;
use crate::conversation::Scoreboard;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Hands out session ids, starting at 1.
#[derive(Debug, Default)]
pub struct SessionCounter {
    last: Mutex<u64>,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last += 1;
        *last
    }
}

/// Per-request state: the id and the scores accumulated while matching.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub scores: Scoreboard,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            scores: Scoreboard::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Received => "r: ",
            Direction::Sent => "s: ",
        }
    }
}

/// Writes session transcripts. The file is reopened for every write.
#[derive(Debug, Clone)]
pub struct SessionLog {
    location: PathBuf,
    log_received: bool,
    log_sent: bool,
}

impl From<&SessionLogging> for SessionLog {
    fn from(cfg: &SessionLogging) -> Self {
        Self {
            location: cfg.location.clone(),
            log_received: cfg.log_received,
            log_sent: cfg.log_sent,
        }
    }
}

impl SessionLog {
    pub fn is_enabled(&self) -> bool {
        self.log_received || self.log_sent
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn filename(&self, id: u64) -> PathBuf {
        self.location.join(format!("sess_{:04}.log", id))
    }

    /// Create the location and write the session header.
    pub async fn open(&self, id: u64) -> std::io::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        fs::create_dir_all(&self.location).await?;
        let header = format!("# session {}, {}\n", id, Local::now().to_rfc3339());
        self.append(id, header.as_bytes()).await
    }

    /// Append `data` if logging is enabled for `direction`.
    pub async fn record(&self, id: u64, direction: Direction, data: &[u8]) -> std::io::Result<()> {
        let enabled = match direction {
            Direction::Received => self.log_received,
            Direction::Sent => self.log_sent,
        };
        if !enabled {
            return Ok(());
        }

        let mut entry = Vec::with_capacity(data.len() + 4);
        if self.log_received && self.log_sent {
            entry.extend_from_slice(direction.tag().as_bytes());
        }
        entry.extend_from_slice(data);
        entry.push(b'\n');
        self.append(id, &entry).await
    }

    async fn append(&self, id: u64, data: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.filename(id))
            .await?;
        file.write_all(data).await?;
        file.flush().await
    }
}
