use parking_lot::Mutex;

use super::{TraceError, TracePayload, Tracer};

/// A recorded event with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub seq: u64,
    pub event: String,
    pub payload: TracePayload,
}

#[derive(Debug, Default)]
struct MemoryTraceLog {
    records: Vec<TraceRecord>,
    next_seq: u64,
}

/// In-memory tracer with deterministic sequencing.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    log: Mutex<MemoryTraceLog>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.log.lock().records.clone()
    }

    /// Event names in recording order.
    pub fn events(&self) -> Vec<String> {
        self.log
            .lock()
            .records
            .iter()
            .map(|record| record.event.clone())
            .collect()
    }

    /// Records carrying the given event name.
    pub fn named(&self, event: &str) -> Vec<TraceRecord> {
        self.log
            .lock()
            .records
            .iter()
            .filter(|record| record.event == event)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().records.is_empty()
    }

    pub fn clear(&self) {
        self.log.lock().records.clear();
    }
}

impl Tracer for MemoryTracer {
    fn log(&self, event: &str, payload: &TracePayload) -> Result<(), TraceError> {
        let mut log = self.log.lock();
        let seq = log.next_seq;
        log.next_seq += 1;
        log.records.push(TraceRecord {
            seq,
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
