//! Logging module
//!
//! Installs the global `tracing` subscriber and provides [`AsyncLogSink`], a
//! fire-and-forget log writer for hot paths. Writes never block: records go
//! through a bounded queue and are dropped (and counted) when it is full.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging/tracing system
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info,embergate_server=debug"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Severity of a sink record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A record queued to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Fire-and-forget log writer
pub trait LogSink: Send + Sync {
    /// Queue a message; never blocks
    fn write(&self, level: LogLevel, message: String);
}

/// Log sink backed by a bounded queue and a consumer task
#[derive(Debug)]
pub struct AsyncLogSink {
    sender: Mutex<Option<mpsc::Sender<LogRecord>>>,
    receiver: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl AsyncLogSink {
    /// Create a sink holding at most `capacity` pending records
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Spawn the consumer task; must run inside a Tokio runtime
    pub fn start(&self) {
        let Some(rx) = self.receiver.lock().take() else {
            return;
        };
        *self.consumer.lock() = Some(tokio::spawn(consume(rx)));
    }

    /// Records dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting records and wait for the queue to drain
    pub async fn close(&self) {
        self.sender.lock().take();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            let _ = consumer.await;
        }
        let dropped = self.dropped();
        if dropped > 0 {
            warn!(dropped, "Log sink dropped records under load");
        }
    }
}

impl LogSink for AsyncLogSink {
    fn write(&self, level: LogLevel, message: String) {
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            message,
        };
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn consume(mut rx: mpsc::Receiver<LogRecord>) {
    while let Some(record) = rx.recv().await {
        let at = record.timestamp.to_rfc3339();
        match record.level {
            LogLevel::Trace => trace!(target: "embergate::log", at = %at, "{}", record.message),
            LogLevel::Debug => debug!(target: "embergate::log", at = %at, "{}", record.message),
            LogLevel::Info => info!(target: "embergate::log", at = %at, "{}", record.message),
            LogLevel::Warn => warn!(target: "embergate::log", at = %at, "{}", record.message),
            LogLevel::Error => error!(target: "embergate::log", at = %at, "{}", record.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_and_counts() {
        // Not started: nothing drains the queue.
        let sink = AsyncLogSink::new(2);
        for i in 0..5 {
            sink.write(LogLevel::Info, format!("record {i}"));
        }
        assert_eq!(sink.dropped(), 3);
    }

    #[tokio::test]
    async fn test_started_sink_drains() {
        let sink = AsyncLogSink::new(4);
        sink.start();
        for i in 0..4 {
            sink.write(LogLevel::Debug, format!("record {i}"));
        }
        sink.close().await;
        assert_eq!(sink.dropped(), 0);

        sink.write(LogLevel::Error, "after close".to_string());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_level_serde_names() {
        let level: LogLevel = toml::from_str::<std::collections::HashMap<String, LogLevel>>("level = \"warn\"")
            .unwrap()["level"];
        assert_eq!(level, LogLevel::Warn);
    }
}
