//! Worker pools: lease one unit at a time, run the stage handler under
//! the time limits, and settle the lease.
//!
//! Prefetch per worker is 1 by construction - a worker holds at most
//! one lease, so a crashed worker never strands a buffer of units
//! behind it; they surface again after the visibility timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jimaku_core::{LeasedUnit, PipelineError, WorkKind, WorkQueuePort, WorkUnit};

use crate::backoff::retry_delay;

/// A stage handler driven by the pool.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Which queue this handler consumes.
    fn kind(&self) -> WorkKind;

    /// Execute one unit. Transient errors are retried by the pool;
    /// terminal errors end the task.
    async fn handle(&self, unit: &WorkUnit) -> Result<(), PipelineError>;

    /// Record a final failure on the task graph (child task Failed +
    /// propagation to the root). Called by the pool exactly once per
    /// unit that will not be retried.
    async fn fail_terminal(&self, unit: &WorkUnit, error: &str);
}

/// Tuning knobs for a pool. Defaults follow the reference deployment.
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    /// How long a lease hides a unit from other workers.
    pub visibility: Duration,
    /// Delivery attempts before the dead-letter log.
    pub max_attempts: u32,
    /// Hard per-unit time limit; exceeding it fails the unit.
    pub hard_time_limit: Duration,
    /// Soft per-unit time limit; exceeding it only logs.
    pub soft_time_limit: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// First retry delay (doubles per attempt).
    pub retry_base: Duration,
    /// Retry delay ceiling.
    pub retry_cap: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            visibility: Duration::from_secs(120),
            max_attempts: 3,
            hard_time_limit: Duration::from_secs(3600),
            soft_time_limit: Duration::from_secs(55 * 60),
            poll_interval: Duration::from_secs(1),
            retry_base: Duration::from_secs(60),
            retry_cap: Duration::from_secs(600),
        }
    }
}

/// A pool of identical workers consuming one queue.
pub struct WorkerPool {
    queue: Arc<dyn WorkQueuePort>,
    handler: Arc<dyn WorkHandler>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueuePort>,
        handler: Arc<dyn WorkHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Spawn `workers` lease loops, each stopping on `shutdown`.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, workers: usize, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|index| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    pool.run(index, shutdown).await;
                })
            })
            .collect()
    }

    async fn run(&self, index: usize, shutdown: CancellationToken) {
        let queue_name = self.handler.kind().queue_name();
        tracing::info!(queue = queue_name, worker = index, "worker started");

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!(queue = queue_name, worker = index, "worker stopping");
                    break;
                }

                processed = self.run_once() => {
                    match processed {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                        Err(e) => {
                            tracing::error!(queue = queue_name, error = %e, "queue error, backing off");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }
    }

    /// Lease and process at most one unit. Returns whether a unit was
    /// processed (false means the queue was empty).
    pub async fn run_once(&self) -> Result<bool, PipelineError> {
        let Some(leased) = self
            .queue
            .lease(self.handler.kind(), self.config.visibility)
            .await?
        else {
            return Ok(false);
        };

        self.process(leased).await?;
        Ok(true)
    }

    async fn process(&self, leased: LeasedUnit) -> Result<(), PipelineError> {
        let unit = &leased.unit;
        let queue_name = unit.kind.queue_name();
        tracing::info!(
            queue = queue_name,
            task_id = %unit.task_id,
            attempt = unit.attempt,
            "processing work unit"
        );

        // Advisory soft limit: warn, keep running.
        let soft_watch = spawn_soft_limit_watch(
            self.config.soft_time_limit,
            queue_name,
            unit.task_id.to_string(),
        );

        let outcome =
            match tokio::time::timeout(self.config.hard_time_limit, self.handler.handle(unit))
                .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(PipelineError::Timeout),
            };
        soft_watch.abort();

        match outcome {
            Ok(()) => {
                self.queue.ack(leased.lease_id).await?;
                tracing::info!(queue = queue_name, task_id = %unit.task_id, "work unit completed");
            }
            Err(error) if error.is_transient() && unit.attempt < self.config.max_attempts => {
                let delay = retry_delay(unit.attempt, self.config.retry_base, self.config.retry_cap);
                tracing::warn!(
                    queue = queue_name,
                    task_id = %unit.task_id,
                    attempt = unit.attempt,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "transient failure, retrying"
                );
                self.queue.nack(leased.lease_id, delay).await?;
            }
            Err(error) if error.is_transient() => {
                // Transient but out of attempts.
                let message = PipelineError::RetriesExhausted.to_string();
                tracing::error!(
                    queue = queue_name,
                    task_id = %unit.task_id,
                    attempt = unit.attempt,
                    error = %error,
                    "retries exhausted"
                );
                self.queue.dead_letter(leased.lease_id, &message).await?;
                self.handler.fail_terminal(unit, &message).await;
            }
            Err(error) => {
                tracing::error!(
                    queue = queue_name,
                    task_id = %unit.task_id,
                    error = %error,
                    "terminal failure"
                );
                self.queue.ack(leased.lease_id).await?;
                self.handler.fail_terminal(unit, &error.to_string()).await;
            }
        }

        Ok(())
    }
}

fn spawn_soft_limit_watch(limit: Duration, queue: &str, task_id: String) -> JoinHandle<()> {
    let queue = queue.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        tracing::warn!(queue, task_id, "work unit exceeded the soft time limit");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jimaku_db::{SqliteWorkQueue, setup_test_database};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Handler scripted to fail a fixed number of times.
    struct ScriptedHandler {
        kind: WorkKind,
        failures: AtomicU32,
        transient: bool,
        calls: AtomicU32,
        terminal_errors: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn new(kind: WorkKind, failures: u32, transient: bool) -> Self {
            Self {
                kind,
                failures: AtomicU32::new(failures),
                transient,
                calls: AtomicU32::new(0),
                terminal_errors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkHandler for ScriptedHandler {
        fn kind(&self) -> WorkKind {
            self.kind
        }

        async fn handle(&self, _unit: &WorkUnit) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                if self.transient {
                    Err(PipelineError::Upstream("scripted".into()))
                } else {
                    Err(PipelineError::Input("scripted".into()))
                }
            } else {
                Ok(())
            }
        }

        async fn fail_terminal(&self, _unit: &WorkUnit, error: &str) {
            self.terminal_errors.lock().unwrap().push(error.to_string());
        }
    }

    fn fast_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            retry_base: Duration::ZERO,
            retry_cap: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            ..WorkerPoolConfig::default()
        }
    }

    async fn pool_with(
        handler: Arc<ScriptedHandler>,
        config: WorkerPoolConfig,
    ) -> (Arc<SqliteWorkQueue>, WorkerPool) {
        let queue = Arc::new(SqliteWorkQueue::new(setup_test_database().await.unwrap()));
        let pool = WorkerPool::new(queue.clone(), handler, config);
        (queue, pool)
    }

    #[tokio::test]
    async fn success_acks_the_unit() {
        let handler = Arc::new(ScriptedHandler::new(WorkKind::Download, 0, true));
        let (queue, pool) = pool_with(handler.clone(), fast_config()).await;

        queue
            .enqueue(WorkKind::Download, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        assert!(pool.run_once().await.unwrap());
        assert!(!pool.run_once().await.unwrap());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.dead_letter_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let handler = Arc::new(ScriptedHandler::new(WorkKind::Transcribe, 2, true));
        let (queue, pool) = pool_with(handler.clone(), fast_config()).await;

        queue
            .enqueue(WorkKind::Transcribe, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        // Two failing deliveries, one successful third attempt.
        assert!(pool.run_once().await.unwrap());
        assert!(pool.run_once().await.unwrap());
        assert!(pool.run_once().await.unwrap());
        assert!(!pool.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(handler.terminal_errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_and_fail_the_task() {
        let handler = Arc::new(ScriptedHandler::new(WorkKind::Download, 10, true));
        let (queue, pool) = pool_with(handler.clone(), fast_config()).await;

        queue
            .enqueue(WorkKind::Download, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(pool.run_once().await.unwrap());
        }
        // Third attempt exhausted the budget; nothing left to lease.
        assert!(!pool.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.dead_letter_count().await.unwrap(), 1);
        let errors = handler.terminal_errors.lock().unwrap();
        assert_eq!(errors.as_slice(), ["retries exhausted"]);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let handler = Arc::new(ScriptedHandler::new(WorkKind::Enrich, 10, false));
        let (queue, pool) = pool_with(handler.clone(), fast_config()).await;

        queue
            .enqueue(WorkKind::Enrich, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        assert!(pool.run_once().await.unwrap());
        assert!(!pool.run_once().await.unwrap());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        // Terminal input errors do not go to the dead-letter log.
        assert_eq!(queue.dead_letter_count().await.unwrap(), 0);
        assert_eq!(
            handler.terminal_errors.lock().unwrap().as_slice(),
            ["scripted"]
        );
    }

    #[tokio::test]
    async fn hard_timeout_fails_the_unit() {
        struct SlowHandler;

        #[async_trait]
        impl WorkHandler for SlowHandler {
            fn kind(&self) -> WorkKind {
                WorkKind::Transcribe
            }
            async fn handle(&self, _unit: &WorkUnit) -> Result<(), PipelineError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            async fn fail_terminal(&self, _unit: &WorkUnit, error: &str) {
                assert!(error.contains("time limit"));
            }
        }

        let queue = Arc::new(SqliteWorkQueue::new(setup_test_database().await.unwrap()));
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(SlowHandler),
            WorkerPoolConfig {
                hard_time_limit: Duration::from_millis(20),
                soft_time_limit: Duration::from_millis(10),
                ..fast_config()
            },
        );

        queue
            .enqueue(WorkKind::Transcribe, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        assert!(pool.run_once().await.unwrap());
        // Timeout is terminal: the unit is gone.
        assert!(!pool.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn spawned_workers_drain_the_queue_and_stop() {
        let handler = Arc::new(ScriptedHandler::new(WorkKind::Download, 0, true));
        let (queue, pool) = pool_with(handler.clone(), fast_config()).await;
        let pool = Arc::new(pool);

        for _ in 0..4 {
            queue
                .enqueue(WorkKind::Download, Uuid::new_v4(), json!({}))
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let handles = pool.spawn(2, &shutdown);

        // Wait for the workers to drain the queue.
        for _ in 0..200 {
            if handler.calls.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
