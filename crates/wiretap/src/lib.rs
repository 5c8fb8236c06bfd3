//! Wiretap: an append-only JSON-lines record of every boundary crossing.
//!
//! [`Wiretap::emit`] never blocks and never fails the caller. Events go
//! onto a bounded channel drained by one background writer task; a full
//! channel drops the event, and sink write errors are swallowed. Both are
//! counted and surfaced through [`Wiretap::stats`].

pub mod sink;

pub use sink::{FileSink, MemorySink, WireSink};

use relayclaw_core::wire::WireEvent;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time wiretap counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WiretapStats {
    /// Events accepted onto the channel
    pub emitted: u64,
    /// Events dropped because the channel was full or closed
    pub dropped: u64,
    /// Lines successfully appended
    pub written: u64,
    /// Lines lost to serialization or sink errors
    pub write_failures: u64,
}

pub struct Wiretap {
    enabled: bool,
    tx: std::sync::Mutex<Option<mpsc::Sender<WireEvent>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Wiretap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wiretap")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Wiretap {
    /// Start a wiretap writing to `sink`. Must be called inside a tokio runtime.
    pub fn new(sink: Box<dyn WireSink>, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let counters = Arc::new(Counters::default());
        let writer = tokio::spawn(run_writer(rx, sink, counters.clone()));

        Self {
            enabled: true,
            tx: std::sync::Mutex::new(Some(tx)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            counters,
        }
    }

    /// Start a wiretap appending to the file at `path`.
    pub async fn open(path: &Path, buffer: usize) -> std::io::Result<Self> {
        let sink = FileSink::open(path).await?;
        debug!(path = %path.display(), "Wiretap writing");
        Ok(Self::new(Box::new(sink), buffer))
    }

    /// A wiretap that discards everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tx: std::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an event. Never blocks.
    pub fn emit(&self, event: WireEvent) {
        if !self.enabled {
            return;
        }

        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Warn on the first drop and every 1000th after
                if dropped % 1000 == 1 {
                    warn!(dropped, "Wiretap channel full, dropping events");
                }
            }
        }
    }

    /// Close the channel and wait until every queued event is written.
    pub async fn shutdown(&self) {
        let sender = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Wiretap writer ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> WiretapStats {
        let c = &self.counters;
        WiretapStats {
            emitted: c.emitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
        }
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<WireEvent>,
    mut sink: Box<dyn WireSink>,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                counters.write_failures.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Wiretap event failed to serialize");
                continue;
            }
        };

        match sink.write_line(&line).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.write_failures.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Wiretap write failed");
            }
        }
    }

    if let Err(e) = sink.flush().await {
        counters.write_failures.fetch_add(1, Ordering::Relaxed);
        debug!(error = %e, "Wiretap flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relayclaw_core::classification::Tier;
    use relayclaw_core::wire::Direction;

    fn event(n: usize) -> WireEvent {
        WireEvent::new(Direction::Inbound, "user", "c1", "auto", n)
    }

    struct FailingSink;

    #[async_trait]
    impl WireSink for FailingSink {
        async fn write_line(&mut self, _line: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    #[tokio::test]
    async fn events_are_written_in_order() {
        let sink = MemorySink::new();
        let wiretap = Wiretap::new(Box::new(sink.clone()), 16);

        wiretap.emit(event(1));
        wiretap.emit(event(2).tier(Tier::Override));
        wiretap.shutdown().await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        let first: WireEvent = serde_json::from_str(&lines[0]).unwrap();
        let second: WireEvent = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(first.content_length, 1);
        assert_eq!(second.decision_tier, Some(Tier::Override));

        let stats = wiretap.stats();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.written, 2);
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let sink = MemorySink::new();
        let wiretap = Wiretap::new(Box::new(sink.clone()), 2);

        // current-thread runtime: the writer cannot run until we yield
        for n in 0..5 {
            wiretap.emit(event(n));
        }
        let stats = wiretap.stats();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.dropped, 3);

        wiretap.shutdown().await;
        assert_eq!(sink.lines().len(), 2);
    }

    #[tokio::test]
    async fn sink_failures_are_counted_not_raised() {
        let wiretap = Wiretap::new(Box::new(FailingSink), 8);
        wiretap.emit(event(1));
        wiretap.emit(event(2));
        wiretap.shutdown().await;

        let stats = wiretap.stats();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.written, 0);
        assert_eq!(stats.write_failures, 2);
    }

    #[tokio::test]
    async fn disabled_wiretap_ignores_events() {
        let wiretap = Wiretap::disabled();
        wiretap.emit(event(1));
        wiretap.shutdown().await;
        assert!(!wiretap.is_enabled());
        assert_eq!(wiretap.stats(), WiretapStats::default());
    }

    #[tokio::test]
    async fn file_wiretap_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.jsonl");

        let first = Wiretap::open(&path, 8).await.unwrap();
        first.emit(event(1));
        first.shutdown().await;

        let second = Wiretap::open(&path, 8).await.unwrap();
        second.emit(event(2).status("complete"));
        second.shutdown().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"status\":\"complete\""));
    }
}
