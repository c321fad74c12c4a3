//! Per-phase latency collection shared by every batch worker in a run.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    time::{Duration, Instant},
};

use dashmap::DashMap;

/// Protocol commands timed individually inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    SubmitSender,
    SubmitRecipient,
    SubmitData,
    Reset,
    FinalizeSession,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SubmitSender => "submit-sender",
            Self::SubmitRecipient => "submit-recipient",
            Self::SubmitData => "submit-data",
            Self::Reset => "reset",
            Self::FinalizeSession => "finalize-session",
        })
    }
}

/// A timed step of a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Connect,
    Identify,
    SecureUpgrade,
    PostUpgradeIdentify,
    Authenticate,
    MessageBuild,
    MessageSend,
    Command(Command),
    Refresh,
    ErrorRefresh,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("initial-connect"),
            Self::Identify => f.write_str("identify"),
            Self::SecureUpgrade => f.write_str("secure-upgrade"),
            Self::PostUpgradeIdentify => f.write_str("post-upgrade-identify"),
            Self::Authenticate => f.write_str("authenticate"),
            Self::MessageBuild => f.write_str("message-build"),
            Self::MessageSend => f.write_str("message-send"),
            Self::Command(command) => write!(f, "command:{command}"),
            Self::Refresh => f.write_str("refresh"),
            Self::ErrorRefresh => f.write_str("error-refresh"),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// One measured duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    pub phase: Phase,
    pub duration: Duration,
}

impl TimingSample {
    #[must_use]
    pub const fn new(phase: Phase, duration: Duration) -> Self {
        Self { phase, duration }
    }
}

/// Append-only collection of [`TimingSample`]s, safe to record into from
/// many workers at once. Samples are never dropped or reordered within a
/// phase.
#[derive(Debug, Default)]
pub struct TimingAggregator {
    samples: DashMap<Phase, Vec<Duration>>,
}

impl TimingAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: TimingSample) {
        self.samples
            .entry(sample.phase)
            .or_default()
            .push(sample.duration);
    }

    /// Awaits `future` and records how long it took under `phase`.
    pub async fn timed<F: Future>(&self, phase: Phase, future: F) -> F::Output {
        let started = Instant::now();
        let output = future.await;
        self.record(TimingSample::new(phase, started.elapsed()));
        output
    }

    /// Runs `f` and records how long it took under `phase`.
    pub fn measure<T>(&self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let output = f();
        self.record(TimingSample::new(phase, started.elapsed()));
        output
    }

    /// Number of samples recorded for `phase`.
    #[must_use]
    pub fn count(&self, phase: Phase) -> usize {
        self.samples.get(&phase).map_or(0, |samples| samples.len())
    }

    /// Statistics for every phase with at least one sample.
    #[must_use]
    pub fn summarize(&self) -> TimingSummary {
        let phases = self
            .samples
            .iter()
            .filter_map(|entry| PhaseStats::from_samples(entry.value()).map(|s| (*entry.key(), s)))
            .collect();

        TimingSummary { phases }
    }
}

/// Aggregate statistics for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStats {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl PhaseStats {
    fn from_samples(samples: &[Duration]) -> Option<Self> {
        let first = *samples.first()?;

        Some(samples.iter().skip(1).fold(
            Self {
                count: 1,
                min: first,
                max: first,
                total: first,
            },
            |stats, &sample| Self {
                count: stats.count + 1,
                min: stats.min.min(sample),
                max: stats.max.max(sample),
                total: stats.total + sample,
            },
        ))
    }

    #[must_use]
    pub fn avg(&self) -> Duration {
        let count = u32::try_from(self.count).unwrap_or(u32::MAX);
        self.total / count.max(1)
    }
}

/// Snapshot of a [`TimingAggregator`], ordered by phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingSummary {
    phases: BTreeMap<Phase, PhaseStats>,
}

impl TimingSummary {
    #[must_use]
    pub fn get(&self, phase: Phase) -> Option<&PhaseStats> {
        self.phases.get(&phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Phase, &PhaseStats)> {
        self.phases.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// `duration` as fractional milliseconds, for display.
pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:>8} {:>12} {:>12} {:>12} {:>12}",
            "phase", "count", "min ms", "avg ms", "max ms", "total ms"
        )?;

        for (phase, stats) in &self.phases {
            writeln!(
                f,
                "{:<32} {:>8} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
                phase.to_string(),
                stats.count,
                millis(stats.min),
                millis(stats.avg()),
                millis(stats.max),
                millis(stats.total),
            )?;
        }

        Ok(())
    }
}
