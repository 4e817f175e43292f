use super::{DetectionLogEntry, DetectionLogSink};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

/// Keeps the most recent detections in a bounded ring buffer.
pub struct MemoryLogSink {
    buffer: Arc<RwLock<VecDeque<DetectionLogEntry>>>,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn get_recent(&self) -> Vec<DetectionLogEntry> {
        let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().cloned().collect()
    }

    // Lets callers keep reading after the sink moved into the logger task.
    pub fn clone_buffer(&self) -> Arc<RwLock<VecDeque<DetectionLogEntry>>> {
        self.buffer.clone()
    }
}

impl DetectionLogSink for MemoryLogSink {
    fn log(&self, entry: &DetectionLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::DetectionLogAction;

    fn entry(url: &str) -> DetectionLogEntry {
        DetectionLogEntry {
            image_url: url.to_string(),
            page_domain: "example.com".to_string(),
            action: DetectionLogAction::Allowed,
            top_category: None,
            top_score: None,
            latency_ms: 1,
        }
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let sink = MemoryLogSink::new(2);
        sink.log(&entry("a"));
        sink.log(&entry("b"));
        sink.log(&entry("c"));

        let recent: Vec<String> = sink.get_recent().into_iter().map(|e| e.image_url).collect();
        assert_eq!(recent, vec!["b".to_string(), "c".to_string()]);
    }
}
