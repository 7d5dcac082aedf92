//! Progress side channel for ingest routines.
//!
//! Observation only: nothing reported here influences the pipeline's
//! control flow or the snapshot it publishes.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Progress callback for ingest routines that process many items.
pub trait IngestProgress: Send + Sync {
    /// Called once before the first item with the expected item count.
    fn on_start(&self, bundle: &str, total: usize);

    /// Called after each item (a symbol, a file, a request).
    fn on_advance(&self, bundle: &str, item: &str, done: usize, total: usize);

    /// Called once when the routine is done with its items.
    fn on_finish(&self, bundle: &str, done: usize);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_start(&self, _bundle: &str, _total: usize) {}

    fn on_advance(&self, _bundle: &str, _item: &str, _done: usize, _total: usize) {}

    fn on_finish(&self, _bundle: &str, _done: usize) {}
}

/// Simple progress reporter that prints to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_start(&self, bundle: &str, total: usize) {
        println!("{bundle}: ingesting {total} item(s)");
    }

    fn on_advance(&self, _bundle: &str, item: &str, done: usize, total: usize) {
        println!("[{done}/{total}] {item}");
    }

    fn on_finish(&self, bundle: &str, done: usize) {
        println!("{bundle}: {done} item(s) written");
    }
}

/// Counts events; used by tests and by callers that poll progress.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    total: AtomicUsize,
    advanced: AtomicUsize,
    finished: AtomicUsize,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn advanced(&self) -> usize {
        self.advanced.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed) > 0
    }
}

impl IngestProgress for ProgressCounter {
    fn on_start(&self, _bundle: &str, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn on_advance(&self, _bundle: &str, _item: &str, _done: usize, _total: usize) {
        self.advanced.fetch_add(1, Ordering::Relaxed);
    }

    fn on_finish(&self, _bundle: &str, _done: usize) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_records_events() {
        let counter = ProgressCounter::new();
        counter.on_start("alpha", 3);
        counter.on_advance("alpha", "AAPL", 1, 3);
        counter.on_advance("alpha", "MSFT", 2, 3);
        assert_eq!(counter.total(), 3);
        assert_eq!(counter.advanced(), 2);
        assert!(!counter.finished());
        counter.on_finish("alpha", 2);
        assert!(counter.finished());
    }
}
