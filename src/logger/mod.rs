pub mod console_sink;
pub mod memory_sink;
pub mod types;

pub use self::console_sink::ConsoleLogSink;
pub use self::memory_sink::MemoryLogSink;
pub use self::types::{DetectionLogAction, DetectionLogEntry, DetectionLogSink};

use crate::config::LoggingConfig;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

/// Shared view into a [`MemoryLogSink`] buffer.
pub type DetectionLogBuffer = Arc<RwLock<VecDeque<DetectionLogEntry>>>;

/// Fans detection entries out to the configured sinks, each on its own task.
pub struct DetectionLogger {
    sinks: Vec<mpsc::Sender<DetectionLogEntry>>,
    memory: Option<DetectionLogBuffer>,
}

impl DetectionLogger {
    /// Must be called from within a tokio runtime.
    pub fn new(config: LoggingConfig) -> Arc<Self> {
        let mut sinks = Vec::new();
        let mut memory = None;

        for sink_type in &config.detection_log_sinks {
            let sink: Box<dyn DetectionLogSink> = match sink_type.as_str() {
                "console" => Box::new(ConsoleLogSink::new(config.clone())),
                "memory" => {
                    let sink = MemoryLogSink::new(config.memory_capacity);
                    memory = Some(sink.clone_buffer());
                    Box::new(sink)
                }
                other => {
                    warn!("Unknown detection log sink type: {}", other);
                    continue;
                }
            };
            sinks.push(spawn_sink(sink));
        }

        Arc::new(Self { sinks, memory })
    }

    /// Logger with no sinks.
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            sinks: Vec::new(),
            memory: None,
        })
    }

    pub fn memory_buffer(&self) -> Option<DetectionLogBuffer> {
        self.memory.clone()
    }

    pub async fn log(&self, entry: DetectionLogEntry) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        // Fire and forget, a full buffer drops the entry rather than stall a scan
        for sink in rest {
            let _ = sink.try_send(entry.clone());
        }
        let _ = last.try_send(entry);
    }
}

fn spawn_sink(sink: Box<dyn DetectionLogSink>) -> mpsc::Sender<DetectionLogEntry> {
    let (tx, mut rx) = mpsc::channel::<DetectionLogEntry>(1000);
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            sink.log(&entry);
        }
    });
    tx
}
