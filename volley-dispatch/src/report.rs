//! Per-batch outcomes and the run-wide report built from them.

use std::{collections::HashSet, fmt, time::Duration};

use volley_common::Message;

use crate::{
    error::FailureReason,
    timing::{TimingSummary, millis},
};

/// A message that was not sent, and why.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Position in the dispatched input
    pub index: usize,
    pub message: Message,
    pub reason: FailureReason,
}

/// What happened to one message.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent { index: usize, latency: Duration },
    Failed(FailedMessage),
}

/// Everything a single batch worker produced.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub batch: usize,
    pub sent: usize,
    pub failures: Vec<FailedMessage>,
    /// Send latency of each successful message, in send order
    pub latencies: Vec<Duration>,
    /// Scheduled session replacements
    pub refreshes: usize,
    /// Replacements after a session broke
    pub error_refreshes: usize,
    /// Input positions that already have an outcome
    resolved: HashSet<usize>,
}

impl BatchReport {
    #[must_use]
    pub fn new(batch: usize) -> Self {
        Self {
            batch,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Sent { index, latency } => {
                self.resolved.insert(index);
                self.sent += 1;
                self.latencies.push(latency);
            }
            SendOutcome::Failed(failure) => {
                self.resolved.insert(failure.index);
                self.failures.push(failure);
            }
        }
    }

    /// `true` once the message at input position `index` has an outcome.
    #[must_use]
    pub fn is_resolved(&self, index: usize) -> bool {
        self.resolved.contains(&index)
    }

    /// Marks every message in `messages` as failed for the same reason.
    pub fn fail_all<'a>(
        &mut self,
        messages: impl IntoIterator<Item = (usize, &'a Message)>,
        reason: &FailureReason,
    ) {
        for (index, message) in messages {
            self.record(SendOutcome::Failed(FailedMessage {
                index,
                message: message.clone(),
                reason: reason.clone(),
            }));
        }
    }

    /// Fails every message in `messages` that has no outcome yet, leaving
    /// earlier outcomes untouched.
    pub fn fail_unresolved<'a>(
        &mut self,
        messages: impl IntoIterator<Item = (usize, &'a Message)>,
        reason: &FailureReason,
    ) {
        let unresolved: Vec<_> = messages
            .into_iter()
            .filter(|(index, _)| !self.is_resolved(*index))
            .collect();
        self.fail_all(unresolved, reason);
    }

    /// Messages this report accounts for.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.sent + self.failures.len()
    }
}

/// Minimum, mean and maximum send latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Number of latencies the figures were computed from
    pub samples: usize,
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl LatencyStats {
    /// All zero when `latencies` is empty.
    #[must_use]
    pub fn from_latencies(latencies: &[Duration]) -> Self {
        let (Some(min), Some(max)) = (latencies.iter().min(), latencies.iter().max()) else {
            return Self::default();
        };

        let total: Duration = latencies.iter().sum();
        let count = u32::try_from(latencies.len()).unwrap_or(u32::MAX);

        Self {
            samples: latencies.len(),
            min: *min,
            avg: total / count,
            max: *max,
        }
    }
}

/// The outcome of a whole dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    total: usize,
    sent: usize,
    elapsed: Duration,
    batches: usize,
    concurrency: usize,
    refreshes: usize,
    error_refreshes: usize,
    latency: LatencyStats,
    failures: Vec<FailedMessage>,
    timings: TimingSummary,
}

impl DispatchReport {
    /// Combines batch reports into run totals. Failures are ordered by
    /// their position in the input.
    #[must_use]
    pub fn aggregate(
        total: usize,
        reports: Vec<BatchReport>,
        elapsed: Duration,
        concurrency: usize,
        timings: TimingSummary,
    ) -> Self {
        let batches = reports.len();
        let mut sent = 0;
        let mut refreshes = 0;
        let mut error_refreshes = 0;
        let mut latencies = Vec::new();
        let mut failures = Vec::new();

        for report in reports {
            sent += report.sent;
            refreshes += report.refreshes;
            error_refreshes += report.error_refreshes;
            latencies.extend(report.latencies);
            failures.extend(report.failures);
        }
        failures.sort_by_key(|failure| failure.index);

        Self {
            total,
            sent,
            elapsed,
            batches,
            concurrency,
            refreshes,
            error_refreshes,
            latency: LatencyStats::from_latencies(&latencies),
            failures,
            timings,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub const fn sent(&self) -> usize {
        self.sent
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Messages sent per second of wall-clock time; zero for an instant run.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let sent = self.sent as f64;
            sent / secs
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn rate_per_hour(&self) -> f64 {
        self.rate() * 3600.0
    }

    #[must_use]
    pub const fn latency(&self) -> LatencyStats {
        self.latency
    }

    #[must_use]
    pub const fn batches(&self) -> usize {
        self.batches
    }

    /// Workers allowed to run at once: `min(max_connections, batches)`.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub const fn refreshes(&self) -> usize {
        self.refreshes
    }

    #[must_use]
    pub const fn error_refreshes(&self) -> usize {
        self.error_refreshes
    }

    #[must_use]
    pub fn failures(&self) -> &[FailedMessage] {
        &self.failures
    }

    #[must_use]
    pub const fn timings(&self) -> &TimingSummary {
        &self.timings
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sent {}/{} messages ({} failed) in {:.2}s",
            self.sent,
            self.total,
            self.failed(),
            self.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "Rate: {:.2} msg/s ({:.0} msg/h) over {} batches, {} concurrent sessions",
            self.rate(),
            self.rate_per_hour(),
            self.batches,
            self.concurrency
        )?;
        write!(
            f,
            "Latency: min {:.2}ms, avg {:.2}ms, max {:.2}ms",
            millis(self.latency.min),
            millis(self.latency.avg),
            millis(self.latency.max)
        )
    }
}
