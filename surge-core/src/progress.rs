use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, TryLockError,
    },
    time::{Duration, Instant},
};

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub total_size: u64,
    pub completed_bytes: u64,
}

impl TransferProgress {
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 0f64;
        }
        (self.completed_bytes as f64 / self.total_size as f64) * 100f64
    }
}

struct Reporter {
    sink: Box<dyn FnMut(f64) + Send>,
    last_percentage: f64,
    last_emit: Option<Instant>,
}

/// Aggregates the byte counts of all segment workers and forwards percentages to a sink.
///
/// `completed_bytes` only grows and is capped at `total_size`. The sink sees strictly
/// increasing values below 100 while bytes arrive; the single 100.0 call comes from
/// [`ProgressTracker::finish`]. If another worker is already inside the sink, an update
/// is coalesced into the next one instead of waiting.
pub struct ProgressTracker {
    total_size: u64,
    completed: AtomicU64,
    min_interval: Duration,
    reporter: Mutex<Reporter>,
}

impl ProgressTracker {
    pub fn new<P>(total_size: u64, min_interval: Duration, sink: P) -> Self
    where
        P: FnMut(f64) + Send + 'static,
    {
        assert!(total_size > 0, "progress needs a known total size");
        ProgressTracker {
            total_size,
            completed: AtomicU64::new(0),
            min_interval,
            reporter: Mutex::new(Reporter {
                sink: Box::new(sink),
                last_percentage: 0f64,
                last_emit: None,
            }),
        }
    }

    /// Adds `delta` received bytes.
    pub fn record(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let total = self.total_size;
        // fetch_update only fails when the closure returns None, which it never does.
        let _ = self
            .completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta).min(total))
            });

        let mut reporter = match self.reporter.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let snapshot = self.snapshot();
        if snapshot.completed_bytes >= total {
            return;
        }
        if let Some(last_emit) = reporter.last_emit {
            if last_emit.elapsed() < self.min_interval {
                return;
            }
        }
        let percentage = snapshot.percentage();
        if percentage > reporter.last_percentage {
            reporter.last_percentage = percentage;
            reporter.last_emit = Some(Instant::now());
            (reporter.sink)(percentage);
        }
    }

    /// Reports 100% once. Called after the output file is in place.
    pub fn finish(&self) {
        self.completed.store(self.total_size, Ordering::Release);
        let mut reporter = self
            .reporter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if reporter.last_percentage < 100f64 {
            reporter.last_percentage = 100f64;
            reporter.last_emit = Some(Instant::now());
            (reporter.sink)(100f64);
        }
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            total_size: self.total_size,
            completed_bytes: self.completed_bytes(),
        }
    }
}
