//! Byte budget admission control.
//!
//! Handlers share a budget of upload bytes. Claiming an upload subtracts its
//! declared size; dropping the returned [`BudgetGuard`] adds it back, on
//! every exit path. While the budget is enabled, dequeue only considers rows
//! whose declared size fits what remains. Rows of unknown size are always
//! admitted and cost nothing.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use codeintel_types::Upload;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared byte budget. Disabled when the maximum is not positive.
pub struct ByteBudget {
    remaining: Arc<AtomicI64>,
    maximum: i64,
    /// Held from reading the remaining budget until the claimed row has been
    /// charged, so concurrent admissions cannot overcommit.
    admission: Mutex<()>,
}

impl ByteBudget {
    pub fn new(maximum: i64) -> Self {
        Self {
            remaining: Arc::new(AtomicI64::new(maximum.max(0))),
            maximum,
            admission: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.maximum > 0
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn maximum(&self) -> i64 {
        self.maximum
    }

    /// Claim an upload through `dequeue`, charging its size to the budget.
    ///
    /// `dequeue` receives the largest declared size it may return, or None
    /// when the budget is disabled.
    pub async fn admit<F, Fut, E>(&self, dequeue: F) -> Result<Option<(Upload, BudgetGuard)>, E>
    where
        F: FnOnce(Option<i64>) -> Fut,
        Fut: Future<Output = Result<Option<Upload>, E>>,
    {
        if !self.is_enabled() {
            return Ok(dequeue(None)
                .await?
                .map(|upload| (upload, BudgetGuard::untracked())));
        }

        let _admission = self.admission.lock().await;
        let remaining = self.remaining();

        let Some(upload) = dequeue(Some(remaining)).await? else {
            return Ok(None);
        };

        let cost = upload.upload_size.unwrap_or(0).max(0);
        self.remaining.fetch_sub(cost, Ordering::SeqCst);
        debug!(
            upload_id = upload.id,
            cost,
            remaining = remaining - cost,
            "Charged upload to budget"
        );

        let guard = BudgetGuard {
            remaining: Some(Arc::clone(&self.remaining)),
            cost,
        };
        Ok(Some((upload, guard)))
    }
}

/// Returns an upload's cost to the budget when dropped.
pub struct BudgetGuard {
    remaining: Option<Arc<AtomicI64>>,
    cost: i64,
}

impl BudgetGuard {
    fn untracked() -> Self {
        Self {
            remaining: None,
            cost: 0,
        }
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }
}

impl Drop for BudgetGuard {
    fn drop(&mut self) {
        if let Some(remaining) = &self.remaining {
            remaining.fetch_add(self.cost, Ordering::SeqCst);
        }
    }
}
