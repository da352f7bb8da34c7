//! Batched, non-blocking telemetry
//!
//! The run loop records events into a bounded queue and never waits on it.
//! A flusher thread drains the queue and hands batches to a transport;
//! when the queue is full, events are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::HostError;

/// Something worth reporting about a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Started { script: Option<String> },
    Stopped { iterations: u64 },
    SceneChanged { from: String, to: String },
    Acted { scene: String, region: String },
    StuckRetry { region: String, checks: u32 },
    Recovered { reason: String, scene: String },
    FocusDrift { foreground: String, origin: String },
}

/// Timestamped event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Remote collector
pub trait TelemetryTransport: Send + Sync {
    fn send_batch(&self, batch: &[TelemetryRecord]) -> Result<(), HostError>;
}

/// Queue tuning
#[derive(Debug, Clone, Copy)]
pub struct TelemetryOptions {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            capacity: 256,
            batch_size: 32,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Producer side of the telemetry queue
#[derive(Clone)]
pub struct TelemetryQueue {
    tx: SyncSender<TelemetryRecord>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryQueue {
    /// Start a flusher thread delivering to `transport`
    pub fn spawn(
        transport: Arc<dyn TelemetryTransport>,
        options: TelemetryOptions,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::sync_channel(options.capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("telemetry-flush".to_string())
            .spawn(move || flush_loop(rx, transport, options))?;
        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    /// Queue an event without blocking
    pub fn record(&self, event: EngineEvent) {
        let record = TelemetryRecord {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Telemetry flusher is gone, event discarded");
            }
        }
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn flush_loop(rx: Receiver<TelemetryRecord>, transport: Arc<dyn TelemetryTransport>, options: TelemetryOptions) {
    let mut batch = Vec::with_capacity(options.batch_size);
    loop {
        match rx.recv_timeout(options.flush_interval) {
            Ok(record) => {
                batch.push(record);
                if batch.len() >= options.batch_size {
                    flush(&*transport, &mut batch);
                }
            }
            Err(RecvTimeoutError::Timeout) => flush(&*transport, &mut batch),
            Err(RecvTimeoutError::Disconnected) => {
                flush(&*transport, &mut batch);
                break;
            }
        }
    }
    log::debug!("Telemetry flusher stopped");
}

fn flush(transport: &dyn TelemetryTransport, batch: &mut Vec<TelemetryRecord>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = transport.send_batch(batch) {
        log::warn!("Dropping {} telemetry events: {}", batch.len(), e);
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collector {
        batches: Mutex<Vec<usize>>,
    }

    impl TelemetryTransport for Collector {
        fn send_batch(&self, batch: &[TelemetryRecord]) -> Result<(), HostError> {
            self.batches.lock().unwrap().push(batch.len());
            Ok(())
        }
    }

    struct Offline;

    impl TelemetryTransport for Offline {
        fn send_batch(&self, _batch: &[TelemetryRecord]) -> Result<(), HostError> {
            Err(HostError::Call("no network".to_string()))
        }
    }

    fn acted(i: usize) -> EngineEvent {
        EngineEvent::Acted {
            scene: "home".to_string(),
            region: format!("r{}", i),
        }
    }

    #[test]
    fn test_batches_flushed_on_size_and_shutdown() {
        let collector = Arc::new(Collector::default());
        let options = TelemetryOptions {
            capacity: 64,
            batch_size: 4,
            flush_interval: Duration::from_secs(60),
        };
        let (queue, handle) = TelemetryQueue::spawn(collector.clone(), options).unwrap();
        for i in 0..10 {
            queue.record(acted(i));
        }
        drop(queue);
        handle.join().unwrap();

        let batches = collector.batches.lock().unwrap().clone();
        assert_eq!(batches.iter().sum::<usize>(), 10);
        assert_eq!(batches, vec![4, 4, 2]);
    }

    #[test]
    fn test_offline_transport_does_not_block() {
        let options = TelemetryOptions {
            capacity: 2,
            batch_size: 1,
            flush_interval: Duration::from_millis(10),
        };
        let (queue, handle) = TelemetryQueue::spawn(Arc::new(Offline), options).unwrap();
        for i in 0..100 {
            queue.record(acted(i));
        }
        drop(queue);
        handle.join().unwrap();
    }

    #[test]
    fn test_record_serialization() {
        let record = TelemetryRecord {
            timestamp: Utc::now(),
            event: EngineEvent::SceneChanged {
                from: "home".to_string(),
                to: "battle".to_string(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "scene_changed");
        assert_eq!(json["to"], "battle");
        assert!(json["timestamp"].is_string());
    }
}
