//! Order pipeline: bounded-concurrency submission of orders to the saga
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use common::{Order, OrderStatus};
use saga::{SagaOrchestrator, SellerApi};

/// Per-order outcomes reported back to the order supplier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Orders handed to the pipeline.
    pub total: usize,

    /// Orders the pipeline submitted before shutdown.
    pub submitted: usize,

    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl PipelineSummary {
    fn record(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::Completed => {
                self.completed += 1;
                metrics::counter!("orders_completed_total").increment(1);
            }
            OrderStatus::Cancelled => {
                self.cancelled += 1;
                metrics::counter!("orders_cancelled_total").increment(1);
            }
            _ => {
                self.failed += 1;
                metrics::counter!("orders_failed_total").increment(1);
            }
        }
    }
}

/// Submits orders to the orchestrator with a bounded worker pool.
pub struct OrderPipeline<S: SellerApi + 'static> {
    orchestrator: Arc<SagaOrchestrator<S>>,
    workers: usize,
    submit_delay: Duration,
    grace_period: Duration,
}

impl<S: SellerApi + 'static> OrderPipeline<S> {
    /// Creates a pipeline over the orchestrator.
    pub fn new(
        orchestrator: Arc<SagaOrchestrator<S>>,
        workers: usize,
        submit_delay: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
            submit_delay,
            grace_period,
        }
    }

    /// Runs every order through the orchestrator and reports outcomes.
    ///
    /// A shutdown signal stops submission; in-flight orders get the
    /// grace period to finish before being aborted.
    pub async fn run(
        &self,
        orders: Vec<Order>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> PipelineSummary {
        let mut summary = PipelineSummary {
            total: orders.len(),
            ..PipelineSummary::default()
        };
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<OrderStatus> = JoinSet::new();
        let mut draining = false;

        for order in orders {
            if summary.submitted > 0 && !self.submit_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.submit_delay) => {}
                    _ = shutdown_requested(&mut shutdown) => {
                        draining = true;
                    }
                }
            }
            if draining {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("semaphore closed")
                }
                _ = shutdown_requested(&mut shutdown) => {
                    draining = true;
                    break;
                }
            };

            let orchestrator = Arc::clone(&self.orchestrator);
            summary.submitted += 1;
            metrics::counter!("orders_submitted_total").increment(1);
            tracing::info!(order_id = %order.order_id(), "order submitted");
            tasks.spawn(async move {
                let _permit = permit;
                let order = orchestrator.process_order(order).await;
                tracing::info!(
                    order_id = %order.order_id(),
                    status = %order.status(),
                    "order finished"
                );
                order.status()
            });
        }

        if draining {
            tracing::info!(
                in_flight = tasks.len(),
                grace_s = self.grace_period.as_secs(),
                "pipeline stopped accepting orders, draining"
            );
            let deadline = tokio::time::Instant::now() + self.grace_period;
            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(result)) => summary.record(unwrap_status(result)),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(
                            aborted = tasks.len(),
                            "grace period elapsed, cancelling in-flight orders"
                        );
                        tasks.abort_all();
                        while let Some(result) = tasks.join_next().await {
                            summary.record(unwrap_status(result));
                        }
                        break;
                    }
                }
            }
        } else {
            while let Some(result) = tasks.join_next().await {
                summary.record(unwrap_status(result));
            }
        }

        tracing::info!(
            total = summary.total,
            submitted = summary.submitted,
            completed = summary.completed,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "pipeline finished"
        );
        summary
    }
}

/// Completes only when a shutdown signal arrives.
///
/// A closed channel means no signal can ever arrive, so this pends
/// instead of misreading the closure as a shutdown request.
async fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) {
    loop {
        match shutdown.recv().await {
            Ok(()) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            Err(broadcast::error::RecvError::Lagged(_)) => return,
        }
    }
}

fn unwrap_status(result: Result<OrderStatus, tokio::task::JoinError>) -> OrderStatus {
    match result {
        Ok(status) => status,
        Err(error) => {
            if !error.is_cancelled() {
                tracing::error!(%error, "order task failed");
            }
            OrderStatus::Failed
        }
    }
}
