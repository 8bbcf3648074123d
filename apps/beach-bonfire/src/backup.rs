//! Periodic dumps of broadcast traffic to timestamp-named text files.
//!
//! Producers push composed lines into a bounded queue. A single consumer task
//! batches them in memory and writes the batch out whenever the interval
//! timer fires. Producers wait while the queue is full, so a stalled consumer
//! eventually throttles every broadcast.

use std::{
    io,
    mem,
    path::PathBuf,
    time::Duration,
};

use chrono::{DateTime, Local};
use metrics::counter;
use thiserror::Error;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub const BACKUP_QUEUE_DEPTH: usize = 100;
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub type BackupSender = mpsc::Sender<String>;
pub type BackupReceiver = mpsc::Receiver<String>;

pub fn queue() -> (BackupSender, BackupReceiver) {
    mpsc::channel(BACKUP_QUEUE_DEPTH)
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub directory: PathBuf,
    pub interval: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            interval: DEFAULT_BACKUP_INTERVAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to open backup file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub path: PathBuf,
    pub written: usize,
    pub failed: usize,
}

pub fn backup_file_name(at: DateTime<Local>) -> String {
    format!("messages_{}.txt", at.format("%Y%m%d_%H%M%S"))
}

/// Lines received since the last flush.
#[derive(Debug)]
pub struct BackupBatch {
    directory: PathBuf,
    lines: Vec<String>,
}

impl BackupBatch {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends the batch to the file named after `at`.
    ///
    /// Returns `Ok(None)` without touching the filesystem when nothing is
    /// buffered. The batch is emptied before any I/O, so lines that fail to
    /// write are lost rather than retried.
    pub async fn flush(&mut self, at: DateTime<Local>) -> Result<Option<FlushReport>, BackupError> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        let lines = mem::take(&mut self.lines);
        let path = self.directory.join(backup_file_name(at));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| BackupError::Open {
                path: path.clone(),
                source,
            })?;

        let mut report = FlushReport {
            path,
            written: 0,
            failed: 0,
        };
        for line in lines {
            let mut record = line.into_bytes();
            record.push(b'\n');
            match file.write_all(&record).await {
                Ok(()) => report.written += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(path = %report.path.display(), error = %err, "failed to write backup line");
                }
            }
        }
        if let Err(err) = file.flush().await {
            warn!(path = %report.path.display(), error = %err, "failed to flush backup file");
        }

        Ok(Some(report))
    }
}

/// Consumer side of the backup queue.
pub struct BackupPipeline {
    receiver: BackupReceiver,
    config: BackupConfig,
}

impl BackupPipeline {
    pub fn new(receiver: BackupReceiver, config: BackupConfig) -> Self {
        Self { receiver, config }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every producer is gone, then flushes whatever is left.
    pub async fn run(mut self) {
        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut batch = BackupBatch::new(self.config.directory);

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(line) => batch.push(line),
                    None => {
                        flush_logged(&mut batch).await;
                        debug!("backup queue closed");
                        break;
                    }
                },
                _ = ticker.tick() => flush_logged(&mut batch).await,
            }
        }
    }
}

async fn flush_logged(batch: &mut BackupBatch) {
    match batch.flush(Local::now()).await {
        Ok(Some(report)) => {
            counter!("beach_bonfire_backup_flushes_total", 1);
            if report.failed > 0 {
                counter!(
                    "beach_bonfire_backup_write_failures_total",
                    report.failed as u64
                );
            }
            info!(
                path = %report.path.display(),
                written = report.written,
                failed = report.failed,
                "chat backup made"
            );
        }
        Ok(None) => {}
        Err(err) => {
            counter!("beach_bonfire_backup_write_failures_total", 1);
            warn!(error = %err, "chat backup skipped");
        }
    }
}
