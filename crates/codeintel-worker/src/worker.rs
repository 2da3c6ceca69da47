//! The polling worker pool.

use std::sync::Arc;

use chrono::Duration;
use codeintel_storage::DequeueOptions;
use codeintel_types::WorkerSettings;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::budget::ByteBudget;
use crate::error::WorkerError;
use crate::handler::{HandleOutcome, Handler};
use crate::store::Store;

/// Runs `num_handlers` poll loops over the upload queue.
///
/// Each loop claims one upload at a time through the shared [`ByteBudget`],
/// handles it to completion, and keeps claiming until the queue has nothing
/// eligible before waiting for the next tick.
pub struct Worker {
    store: Arc<dyn Store>,
    handler: Handler,
    budget: ByteBudget,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(store: Arc<dyn Store>, handler: Handler, settings: WorkerSettings) -> Self {
        Self {
            budget: ByteBudget::new(settings.maximum_upload_bytes),
            store,
            handler,
            settings,
        }
    }

    pub fn budget(&self) -> &ByteBudget {
        &self.budget
    }

    fn dequeue_options(&self, max_size: Option<i64>) -> DequeueOptions {
        DequeueOptions {
            max_size,
            max_num_retries: self.settings.max_num_retries,
            retry_after: Duration::from_std(self.settings.retry_after())
                .unwrap_or(Duration::MAX),
        }
    }

    /// Claim and handle one upload. Returns false when nothing was eligible.
    ///
    /// Failures of the upload itself are recorded on its row and logged;
    /// only a failure to dequeue is returned.
    pub async fn dequeue_and_handle(&self, token: &CancellationToken) -> Result<bool, WorkerError> {
        let admitted = self
            .budget
            .admit(|max_size| {
                let options = self.dequeue_options(max_size);
                async move { self.store.dequeue(&options).await }
            })
            .await
            .map_err(WorkerError::store("dequeue upload"))?;

        let Some((upload, _budget)) = admitted else {
            return Ok(false);
        };

        match self.handler.process(&upload, token).await {
            Ok(HandleOutcome::Completed) => {}
            Ok(HandleOutcome::Requeued { .. }) => {}
            Err(WorkerError::Cancelled) => {
                info!(upload_id = upload.id, "Upload handling cancelled, requeued");
            }
            Err(e) => {
                warn!(
                    upload_id = upload.id,
                    repository_id = upload.repository_id,
                    error = %e,
                    "Failed to process upload"
                );
            }
        }
        Ok(true)
    }

    /// Run the poll loops until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            num_handlers = self.settings.num_handlers,
            poll_interval_ms = self.settings.poll_interval_ms,
            budget = self.budget.maximum(),
            "Worker starting"
        );

        let mut tasks = JoinSet::new();
        for handler_id in 0..self.settings.num_handlers {
            let worker = Arc::clone(&self);
            let token = token.clone();
            tasks.spawn(async move { worker.poll(handler_id, token).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Handler task failed");
            }
        }
        info!("Worker stopped");
    }

    async fn poll(&self, handler_id: usize, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            while !token.is_cancelled() {
                match self.dequeue_and_handle(&token).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!(handler_id, error = %e, "Failed to dequeue upload");
                        break;
                    }
                }
            }
        }
    }
}
