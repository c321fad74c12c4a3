use std::{num::NonZeroUsize, sync::Arc, time::Instant};

use volley_smtp::Connector;

use crate::{
    batch::{Batch, WireMessage},
    error::{FailureReason, SessionError},
    report::{BatchReport, FailedMessage, SendOutcome},
    session::{Session, SessionOptions},
    timing::{Phase, TimingAggregator, TimingSample},
};

/// Sends every message of a batch over one session at a time.
pub struct BatchWorker<C: Connector> {
    connector: Arc<C>,
    options: Arc<SessionOptions>,
    timings: Arc<TimingAggregator>,
    sender: Arc<str>,
    refresh_threshold: NonZeroUsize,
}

impl<C: Connector> BatchWorker<C> {
    #[must_use]
    pub const fn new(
        connector: Arc<C>,
        options: Arc<SessionOptions>,
        timings: Arc<TimingAggregator>,
        sender: Arc<str>,
        refresh_threshold: NonZeroUsize,
    ) -> Self {
        Self {
            connector,
            options,
            timings,
            sender,
            refresh_threshold,
        }
    }

    fn session(&self) -> Session<C> {
        Session::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.options),
            Arc::clone(&self.timings),
        )
    }

    /// Attempts every message in `batch` exactly once and records each as
    /// sent or failed in `report` as soon as it is known.
    ///
    /// The session is replaced after `refresh_threshold` successful sends
    /// when messages remain, and immediately when it breaks. If a
    /// replacement cannot be opened, every remaining message fails. Every
    /// session opened here is closed exactly once.
    #[tracing::instrument(level = "debug", skip_all, fields(batch = batch.index(), size = batch.len()))]
    pub async fn run(&self, batch: &Batch, report: &mut BatchReport) {
        let mut session = self.session();

        if let Err(error) = session.open().await {
            self.timings.timed(Phase::Cleanup, session.close()).await;
            tracing::warn!(batch = batch.index(), %error, "Batch failed: no session");
            report.fail_all(batch.iter(), &FailureReason::SessionUnavailable(error));
            return;
        }

        let total = batch.len();
        let mut since_refresh = 0;
        let mut abandoned: Option<(usize, SessionError)> = None;

        for (position, (index, message)) in batch.iter().enumerate() {
            let remaining = position + 1 < total;

            if let Err(error) = message.validate() {
                tracing::warn!(index, recipient = message.to(), %error, "Skipping invalid message");
                report.record(SendOutcome::Failed(FailedMessage {
                    index,
                    message: message.clone(),
                    reason: error.into(),
                }));
                continue;
            }

            let wire = self
                .timings
                .measure(Phase::MessageBuild, || WireMessage::build(&self.sender, message));

            let started = Instant::now();
            let result = session.send(&wire).await;
            let latency = started.elapsed();
            self.timings
                .record(TimingSample::new(Phase::MessageSend, latency));

            match result {
                Ok(()) => {
                    since_refresh += 1;
                    report.record(SendOutcome::Sent { index, latency });
                }
                Err(error) => {
                    tracing::warn!(index, recipient = message.to(), %error, "Failed to send message");
                    report.record(SendOutcome::Failed(FailedMessage {
                        index,
                        message: message.clone(),
                        reason: error.into(),
                    }));
                }
            }

            if !remaining {
                break;
            }

            let phase = if !session.is_usable() {
                Phase::ErrorRefresh
            } else if since_refresh >= self.refresh_threshold.get() {
                Phase::Refresh
            } else {
                continue;
            };

            if let Err(error) = self.replace(&mut session, phase).await {
                abandoned = Some((position + 1, error));
                break;
            }

            since_refresh = 0;
            if phase == Phase::Refresh {
                report.refreshes += 1;
            } else {
                report.error_refreshes += 1;
            }
        }

        self.timings.timed(Phase::Cleanup, session.close()).await;

        if let Some((from, error)) = abandoned {
            tracing::warn!(
                batch = batch.index(),
                remaining = total - from,
                %error,
                "Could not replace session, abandoning rest of batch"
            );
            report.fail_all(
                batch.iter().skip(from),
                &FailureReason::SessionUnavailable(error),
            );
        }

        debug_assert_eq!(report.attempted(), total);
    }

    /// Closes `session` and opens a fresh one in its place, timing the whole
    /// swap under `phase`. On failure the half-open replacement is left in
    /// `session` for the caller to close.
    async fn replace(&self, session: &mut Session<C>, phase: Phase) -> Result<(), SessionError> {
        let started = Instant::now();

        session.close().await;
        *session = self.session();
        let result = session.open().await;

        self.timings
            .record(TimingSample::new(phase, started.elapsed()));
        result
    }
}
