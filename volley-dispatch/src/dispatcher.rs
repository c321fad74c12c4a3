use std::{
    any::Any, collections::HashMap, num::NonZeroUsize, panic::AssertUnwindSafe, sync::Arc,
    time::Instant,
};

use futures_util::FutureExt;
use tokio::{
    sync::Mutex,
    task::{Id, JoinSet},
};
use tracing::{error, info};
use volley_common::Message;
use volley_smtp::Connector;

use crate::{
    batch::Batch,
    config::DispatchConfig,
    error::FailureReason,
    report::{BatchReport, DispatchReport},
    session::SessionOptions,
    timing::TimingAggregator,
    worker::BatchWorker,
};

/// Splits a run into batches and works through them with a bounded number
/// of concurrent sessions.
pub struct Dispatcher<C: Connector> {
    connector: Arc<C>,
    options: Arc<SessionOptions>,
    config: DispatchConfig,
}

impl<C: Connector> Dispatcher<C> {
    #[must_use]
    pub fn new(connector: C, options: SessionOptions, config: DispatchConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            options: Arc::new(options),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatches `messages` using the configured batch size, connection
    /// limit and refresh threshold.
    pub async fn dispatch(&self, messages: Vec<Message>) -> DispatchReport {
        self.dispatch_with(
            messages,
            self.config.batch_size,
            self.config.max_connections,
            self.config.messages_per_connection,
        )
        .await
    }

    /// Dispatches `messages` and reports on every one of them.
    ///
    /// At most `min(max_concurrency, batches)` workers run at once; a new
    /// batch starts as soon as any running one finishes. A worker that
    /// panics or is aborted fails the rest of its own batch; messages it had
    /// already resolved keep their outcome.
    #[tracing::instrument(level = "debug", skip_all, fields(total = messages.len()))]
    pub async fn dispatch_with(
        &self,
        messages: Vec<Message>,
        batch_size: NonZeroUsize,
        max_concurrency: NonZeroUsize,
        refresh_threshold: NonZeroUsize,
    ) -> DispatchReport {
        let started = Instant::now();
        let total = messages.len();
        let timings = Arc::new(TimingAggregator::new());

        let batches = Batch::partition(messages, batch_size);
        let batch_count = batches.len();
        let concurrency = max_concurrency.get().min(batch_count);

        info!(
            total,
            batches = batch_count,
            concurrency,
            "Dispatching {total} messages in {batch_count} batches using {concurrency} concurrent connections"
        );

        let worker = Arc::new(BatchWorker::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.options),
            Arc::clone(&timings),
            Arc::from(self.config.sender.as_str()),
            refresh_threshold,
        ));

        let mut reports = Vec::with_capacity(batch_count);
        let mut join_set = JoinSet::new();
        let mut running = HashMap::with_capacity(concurrency);
        let mut pending = batches.into_iter();

        for batch in pending.by_ref().take(concurrency) {
            spawn_batch(&mut join_set, &mut running, &worker, batch);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, failure) = match joined {
                Ok((id, None)) => (id, None),
                Ok((id, Some(panic))) => (id, Some(FailureReason::WorkerPanicked(panic))),
                Err(err) => {
                    error!("Batch task did not complete: {err}");
                    (err.id(), Some(FailureReason::WorkerAborted(err.to_string())))
                }
            };

            if let Some(task) = running.remove(&id) {
                reports.push(task.settle(failure).await);
            }

            if let Some(batch) = pending.next() {
                spawn_batch(&mut join_set, &mut running, &worker, batch);
            }
        }

        let report = DispatchReport::aggregate(
            total,
            reports,
            started.elapsed(),
            concurrency,
            timings.summarize(),
        );

        info!(
            sent = report.sent(),
            failed = report.failed(),
            elapsed_secs = report.elapsed().as_secs_f64(),
            rate = report.rate(),
            "Dispatch complete"
        );

        report
    }
}

/// A batch in flight, and the report its worker fills in as it goes.
struct RunningBatch {
    batch: Arc<Batch>,
    report: Arc<Mutex<BatchReport>>,
}

impl RunningBatch {
    /// Takes the finished report. When the worker did not complete, every
    /// message without an outcome fails with `failure`.
    async fn settle(self, failure: Option<FailureReason>) -> BatchReport {
        let mut report = std::mem::take(&mut *self.report.lock().await);
        if let Some(reason) = failure {
            report.fail_unresolved(self.batch.iter(), &reason);
        }
        report
    }
}

/// Spawns a worker for `batch`. The task resolves to the panic message if
/// the worker panicked.
fn spawn_batch<C: Connector>(
    join_set: &mut JoinSet<Option<String>>,
    running: &mut HashMap<Id, RunningBatch>,
    worker: &Arc<BatchWorker<C>>,
    batch: Batch,
) {
    let batch = Arc::new(batch);
    let report = Arc::new(Mutex::new(BatchReport::new(batch.index())));

    let task = {
        let worker = Arc::clone(worker);
        let batch = Arc::clone(&batch);
        let shared = Arc::clone(&report);

        async move {
            let mut report = shared.lock().await;
            let outcome = AssertUnwindSafe(worker.run(&batch, &mut report))
                .catch_unwind()
                .await;

            outcome.err().map(|panic| {
                let reason = panic_message(panic.as_ref());
                error!(batch = batch.index(), "Batch worker panicked: {reason}");
                reason
            })
        }
    };

    let handle = join_set.spawn(task);
    running.insert(handle.id(), RunningBatch { batch, report });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
