//! Durable task scheduler.
//!
//! Named tasks with typed JSON payloads run on two queues: `transfers`
//! (execute/confirm) and `bids` (periodic bid recomputation, purged at
//! startup). Tasks live in the service database; workers claim them with a
//! lease, so redelivery is at-least-once and a worker that dies mid-flight
//! only delays its task until the lease expires.
//!
//! Handlers return [`TaskOutcome::Retry`] to re-run after a countdown; a
//! registered `max_attempts` caps the number of executions, unbounded when
//! `None`.

use chrono::{Duration, Utc};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::Context;
use crate::store::{StoreError, TaskStore};

pub const TRANSFERS_QUEUE: &str = "transfers";
pub const BIDS_QUEUE: &str = "bids";

/// How long a claimed task stays invisible to other workers.
const TASK_LEASE_SECONDS: i64 = 300;
/// Poll interval of an idle worker.
const IDLE_POLL_MILLIS: u64 = 500;

#[derive(Debug)]
pub enum TaskOutcome {
    Done,
    Retry { countdown: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Other(String),
}

pub type TaskHandler =
    Arc<dyn Fn(Arc<Context>, serde_json::Value) -> BoxFuture<'static, Result<TaskOutcome, TaskError>> + Send + Sync>;

struct RegisteredTask {
    queue: &'static str,
    /// Total execution cap; `None` is unbounded.
    max_attempts: Option<i32>,
    handler: TaskHandler,
}

/// Task handlers by name, built once at boot.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<&'static str, RegisteredTask>,
}

impl TaskRegistry {
    pub fn register(
        &mut self,
        name: &'static str,
        queue: &'static str,
        max_attempts: Option<i32>,
        handler: TaskHandler,
    ) {
        self.tasks.insert(
            name,
            RegisteredTask {
                queue,
                max_attempts,
                handler,
            },
        );
    }

    fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }
}

/// Enqueues a typed task payload.
pub async fn enqueue<T: serde::Serialize>(
    store: &Arc<dyn TaskStore>,
    queue: &str,
    name: &str,
    payload: &T,
    delay: Duration,
) -> Result<Uuid, TaskError> {
    let payload = serde_json::to_value(payload)?;
    Ok(store.enqueue_task(queue, name, payload, delay).await?)
}

/// Spawns the worker pools for both queues.
pub fn spawn_workers(
    ctx: Arc<Context>,
    registry: Arc<TaskRegistry>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_counts = [
        (TRANSFERS_QUEUE, ctx.config.tasks.workers.transfers),
        (BIDS_QUEUE, ctx.config.tasks.workers.bids),
    ];
    for (queue, count) in worker_counts {
        for worker in 0..count.max(1) {
            let ctx = Arc::clone(&ctx);
            let registry = Arc::clone(&registry);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                run_worker(ctx, registry, queue, worker, cancel).await;
            }));
        }
    }
    handles
}

/// One worker loop: claim, dispatch, settle, repeat.
pub async fn run_worker(
    ctx: Arc<Context>,
    registry: Arc<TaskRegistry>,
    queue: &'static str,
    worker: usize,
    cancel: CancellationToken,
) {
    tracing::debug!(queue, worker, "task worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let claimed = ctx
            .tasks
            .claim_due_task(queue, Duration::seconds(TASK_LEASE_SECONDS), Utc::now())
            .await;
        let task = match claimed {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(IDLE_POLL_MILLIS)) => continue,
                }
            }
            Err(e) => {
                tracing::error!(queue, worker, error = %e, "unable to claim a task");
                tokio::time::sleep(std::time::Duration::from_millis(IDLE_POLL_MILLIS)).await;
                continue;
            }
        };

        let Some(registered) = registry.get(&task.name) else {
            tracing::error!(queue, task = %task.name, "no handler registered, dropping task");
            settle(&ctx, task.id).await;
            continue;
        };
        if registered.queue != queue {
            tracing::warn!(queue, task = %task.name, "task claimed from an unexpected queue");
        }

        let result = (registered.handler)(Arc::clone(&ctx), task.payload.clone()).await;
        match result {
            Ok(TaskOutcome::Done) => settle(&ctx, task.id).await,
            Ok(TaskOutcome::Retry { countdown }) => {
                let executions = task.attempts + 1;
                match registered.max_attempts {
                    Some(max) if executions >= max => {
                        tracing::error!(
                            task = %task.name,
                            id = %task.id,
                            executions,
                            "retry limit reached, dropping task"
                        );
                        settle(&ctx, task.id).await;
                    }
                    _ => {
                        if let Err(e) = ctx.tasks.retry_task(task.id, countdown).await {
                            tracing::error!(id = %task.id, error = %e, "unable to re-schedule task");
                        }
                    }
                }
            }
            Err(e) => {
                // Handlers classify their own retries; an error here is a
                // malformed payload or a store failure, neither of which a
                // re-run fixes.
                tracing::error!(task = %task.name, id = %task.id, error = %e, "task failed, dropping");
                settle(&ctx, task.id).await;
            }
        }
    }
    tracing::debug!(queue, worker, "task worker stopped");
}

async fn settle(ctx: &Arc<Context>, id: Uuid) {
    if let Err(e) = ctx.tasks.complete_task(id).await {
        tracing::error!(%id, error = %e, "unable to complete task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{StaticBidPlugin, context};
    use crate::store::memory::InMemoryStore;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ctx(store: Arc<InMemoryStore>) -> Arc<Context> {
        context(store, StdHashMap::new(), Arc::new(StaticBidPlugin::accepting()))
    }

    fn counting_handler(counter: Arc<AtomicUsize>, outcome_after: usize) -> TaskHandler {
        Arc::new(move |_ctx, _payload| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let runs = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if runs >= outcome_after {
                    Ok(TaskOutcome::Done)
                } else {
                    Ok(TaskOutcome::Retry {
                        countdown: Duration::zero(),
                    })
                }
            })
        })
    }

    async fn run_until_idle(ctx: Arc<Context>, registry: Arc<TaskRegistry>, queue: &'static str) {
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&ctx),
            registry,
            queue,
            0,
            cancel.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn tasks_run_and_complete() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(Arc::clone(&store));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::default();
        registry.register(
            "count",
            TRANSFERS_QUEUE,
            None,
            counting_handler(Arc::clone(&counter), 1),
        );

        enqueue(
            &ctx.tasks,
            TRANSFERS_QUEUE,
            "count",
            &serde_json::json!({}),
            Duration::zero(),
        )
        .await
        .unwrap();

        run_until_idle(ctx, Arc::new(registry), TRANSFERS_QUEUE).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(store.task_count(TRANSFERS_QUEUE), 0);
    }

    #[tokio::test]
    async fn retry_reruns_until_done() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(Arc::clone(&store));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::default();
        registry.register(
            "retrying",
            TRANSFERS_QUEUE,
            None,
            counting_handler(Arc::clone(&counter), 3),
        );

        enqueue(
            &ctx.tasks,
            TRANSFERS_QUEUE,
            "retrying",
            &serde_json::json!({}),
            Duration::zero(),
        )
        .await
        .unwrap();

        run_until_idle(ctx, Arc::new(registry), TRANSFERS_QUEUE).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(store.task_count(TRANSFERS_QUEUE), 0);
    }

    #[tokio::test]
    async fn bounded_retries_drop_the_task_at_the_cap() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(Arc::clone(&store));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::default();
        // Never finishes on its own; the cap must stop it.
        registry.register(
            "hopeless",
            TRANSFERS_QUEUE,
            Some(2),
            counting_handler(Arc::clone(&counter), usize::MAX),
        );

        enqueue(
            &ctx.tasks,
            TRANSFERS_QUEUE,
            "hopeless",
            &serde_json::json!({}),
            Duration::zero(),
        )
        .await
        .unwrap();

        run_until_idle(ctx, Arc::new(registry), TRANSFERS_QUEUE).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(store.task_count(TRANSFERS_QUEUE), 0);
    }

    #[tokio::test]
    async fn unknown_task_names_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(Arc::clone(&store));
        enqueue(
            &ctx.tasks,
            TRANSFERS_QUEUE,
            "ghost",
            &serde_json::json!({}),
            Duration::zero(),
        )
        .await
        .unwrap();

        run_until_idle(ctx, Arc::new(TaskRegistry::default()), TRANSFERS_QUEUE).await;
        assert_eq!(store.task_count(TRANSFERS_QUEUE), 0);
    }
}
