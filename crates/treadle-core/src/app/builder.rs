//! AppBuilder - wiring and fail-fast validation.
//!
//! # Usage
//! ```ignore
//! let app = AppBuilder::new()
//!     .config(OrchestratorConfig::default())
//!     .backend(Arc::new(EchoBackend::new()))
//!     .build()?;
//! let running = app.start();
//! let receipt = app.gateway.submit(None, "2+2=", GenerationParams::default()).await?;
//! running.shutdown().await;
//! ```
//!
//! `build()` checks the configuration and refuses to produce an `App` that
//! could never work (no backend, zero deadline, empty bucket, ...).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::config::{BackendConfig, MAX_INTERVAL, OrchestratorConfig};
use crate::app::gateway::SubmissionGateway;
use crate::app::gc_loop::GcLoop;
use crate::app::rate_limit::RateLimiter;
use crate::app::status::StatusReader;
use crate::app::worker_loop::{WorkerGroup, WorkerLoop};
use crate::domain::{BackendError, QueueError};
use crate::impls::{
    EchoBackend, InMemoryBrokerQueue, InMemoryResultStore, OllamaBackend, TracingEventSink,
};
use crate::observability::{StatsCollector, StatsSnapshot};
use crate::ports::{
    BrokerQueue, Clock, EventSink, FanoutSink, GenerationBackend, IdGenerator, ResultStore,
    SystemClock, UlidGenerator,
};

/// Wiring errors raised by `AppBuilder::build`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no generation backend configured")]
    MissingBackend,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
}

/// Instantiate the backend a `BackendConfig` names.
pub fn backend_from_config(
    config: &BackendConfig,
) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    Ok(match config {
        BackendConfig::Echo { latency } => Arc::new(EchoBackend::new().with_latency(*latency)),
        BackendConfig::Ollama {
            base_url,
            model,
            request_timeout,
        } => Arc::new(OllamaBackend::new(
            base_url.clone(),
            model.clone(),
            *request_timeout,
        )?),
    })
}

/// Fluent wiring for an `App`. Only the backend is mandatory.
pub struct AppBuilder {
    config: OrchestratorConfig,
    backend: Option<Arc<dyn GenerationBackend>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    store: Option<Arc<dyn ResultStore>>,
    queue: Option<Arc<dyn BrokerQueue>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            backend: None,
            clock: None,
            ids: None,
            store: None,
            queue: None,
            sinks: Vec::new(),
        }
    }

    /// Replace the whole configuration; validated in `build`.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend shared by every worker.
    pub fn backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Like `backend`, but instantiated from a `BackendConfig`.
    pub fn backend_config(self, config: &BackendConfig) -> Result<Self, BuildError> {
        let backend = backend_from_config(config)?;
        Ok(self.backend(backend))
    }

    /// Defaults to the wall clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to ULIDs from the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `InMemoryResultStore` with `result_ttl`.
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to `InMemoryBrokerQueue` with `task_time_limit + lease_grace`
    /// visibility.
    pub fn queue(mut self, queue: Arc<dyn BrokerQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Extra sink next to the built-in stats and tracing sinks.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate and wire. Nothing is spawned yet.
    pub fn build(self) -> Result<App, BuildError> {
        validate(&self.config)?;
        let backend = self.backend.ok_or(BuildError::MissingBackend)?;
        let config = self.config;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryResultStore::new(
                config.result_ttl,
                Arc::clone(&clock),
            ))
        });
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryBrokerQueue::new(config.visibility_timeout())));

        let stats = Arc::new(StatsCollector::new());
        let events = self
            .sinks
            .into_iter()
            .fold(
                FanoutSink::new()
                    .with(stats.clone())
                    .with(Arc::new(TracingEventSink)),
                FanoutSink::with,
            );
        let events: Arc<dyn EventSink> = Arc::new(events);

        let limiter = Arc::new(RateLimiter::new(config.rate_limit, Arc::clone(&clock)));
        let shutdown = CancellationToken::new();

        let gateway = SubmissionGateway::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&limiter),
            ids,
            Arc::clone(&clock),
            Arc::clone(&events),
            config.limits.clone(),
        );
        let reader = StatusReader::new(
            Arc::clone(&store),
            config.stream_interval,
            shutdown.clone(),
        );
        let worker = WorkerLoop::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            backend,
            clock,
            events,
            config.task_time_limit,
            config.lease_wait,
        );

        Ok(App {
            gateway: Arc::new(gateway),
            reader,
            store,
            queue,
            stats,
            worker: Arc::new(worker),
            limiter,
            shutdown,
            config,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &OrchestratorConfig) -> Result<(), BuildError> {
    let positive = [
        ("task_time_limit", config.task_time_limit),
        ("result_ttl", config.result_ttl),
        ("stream_interval", config.stream_interval),
        ("gc_interval", config.gc_interval),
    ];
    if let Some((name, _)) = positive.iter().find(|(_, d)| *d == Duration::ZERO) {
        return Err(BuildError::InvalidConfig(format!("{name} must be > 0")));
    }
    let bounded = [
        ("task_time_limit", config.task_time_limit),
        ("lease_grace", config.lease_grace),
        ("lease_wait", config.lease_wait),
        ("stream_interval", config.stream_interval),
        ("gc_interval", config.gc_interval),
    ];
    if let Some((name, _)) = bounded.iter().find(|(_, d)| *d > MAX_INTERVAL) {
        return Err(BuildError::InvalidConfig(format!(
            "{name} must be <= {}s",
            MAX_INTERVAL.as_secs()
        )));
    }
    if config.worker_count == 0 {
        return Err(BuildError::InvalidConfig(
            "worker_count must be >= 1".to_string(),
        ));
    }
    if config.rate_limit.per_minute == 0 || config.rate_limit.burst == 0 {
        return Err(BuildError::InvalidConfig(
            "rate limit needs per_minute >= 1 and burst >= 1".to_string(),
        ));
    }
    if config.limits.max_tokens.is_empty() || config.limits.max_prompt_chars == 0 {
        return Err(BuildError::InvalidConfig(
            "parameter limits admit no request".to_string(),
        ));
    }
    Ok(())
}

/// A wired application. Nothing runs until `start`.
pub struct App {
    pub gateway: Arc<SubmissionGateway>,
    pub reader: StatusReader,
    pub store: Arc<dyn ResultStore>,
    pub queue: Arc<dyn BrokerQueue>,
    pub stats: Arc<StatsCollector>,
    worker: Arc<WorkerLoop>,
    limiter: Arc<RateLimiter<Arc<dyn Clock>>>,
    shutdown: CancellationToken,
    config: OrchestratorConfig,
}

impl App {
    /// The validated configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawn `worker_count` workers and the GC loop.
    pub fn start(&self) -> RunningApp {
        let workers = WorkerGroup::spawn(self.config.worker_count, Arc::clone(&self.worker));
        let gc = GcLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.limiter),
            self.config.gc_interval,
        );
        let gc = tokio::spawn(gc.run(self.shutdown.child_token()));
        tracing::info!(
            workers = self.config.worker_count,
            task_time_limit_s = self.config.task_time_limit.as_secs_f64(),
            "orchestrator started"
        );

        RunningApp {
            workers,
            gc,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Event counters plus the current queue depth.
    pub async fn stats(&self) -> Result<StatsSnapshot, QueueError> {
        let depth = self.queue.depth().await?;
        Ok(self.stats.snapshot(depth))
    }
}

/// Handle to the spawned background tasks.
pub struct RunningApp {
    workers: WorkerGroup,
    gc: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl RunningApp {
    /// Stop leasing, let in-flight tasks finish, end streams and GC.
    pub async fn shutdown(self) {
        self.workers.shutdown_and_join().await;
        self.shutdown.cancel();
        if let Err(err) = self.gc.await {
            tracing::error!(error = %err, "gc loop ended abnormally");
        }
        tracing::info!("orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::RateLimitConfig;
    use crate::domain::{GenerationParams, TaskStatus};
    use rstest::rstest;

    #[test]
    fn build_without_backend_fails() {
        let result = AppBuilder::new().build();
        assert!(matches!(result, Err(BuildError::MissingBackend)));
    }

    #[rstest]
    #[case::zero_deadline(OrchestratorConfig { task_time_limit: Duration::ZERO, ..Default::default() })]
    #[case::no_workers(OrchestratorConfig { worker_count: 0, ..Default::default() })]
    #[case::empty_bucket(OrchestratorConfig {
        rate_limit: RateLimitConfig { per_minute: 60, burst: 0 },
        ..Default::default()
    })]
    #[case::zero_stream_tick(OrchestratorConfig { stream_interval: Duration::ZERO, ..Default::default() })]
    #[case::max_deadline(OrchestratorConfig { task_time_limit: Duration::MAX, ..Default::default() })]
    #[case::huge_deadline(OrchestratorConfig {
        task_time_limit: Duration::from_secs(u64::MAX / 2),
        ..Default::default()
    })]
    #[case::huge_grace(OrchestratorConfig { lease_grace: Duration::MAX, ..Default::default() })]
    #[case::huge_lease_wait(OrchestratorConfig { lease_wait: Duration::MAX, ..Default::default() })]
    fn invalid_config_is_rejected(#[case] config: OrchestratorConfig) {
        let result = AppBuilder::new()
            .config(config)
            .backend(Arc::new(EchoBackend::new()))
            .build();
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn longest_accepted_deadline_still_leases() {
        let config = OrchestratorConfig {
            task_time_limit: MAX_INTERVAL,
            lease_grace: MAX_INTERVAL,
            ..Default::default()
        };
        let app = AppBuilder::new()
            .config(config)
            .backend(Arc::new(EchoBackend::new()))
            .build()
            .unwrap();
        let running = app.start();

        let receipt = app
            .gateway
            .submit(None, "hello", GenerationParams::default())
            .await
            .unwrap();
        let view = app
            .reader
            .wait_for_terminal(receipt.task_id, Duration::from_millis(10), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(view.status(), TaskStatus::Completed);

        running.shutdown().await;
    }

    #[test]
    fn backend_config_builds_echo() {
        let backend = backend_from_config(&BackendConfig::default()).unwrap();
        assert_eq!(backend.name(), "echo");
    }

    #[tokio::test]
    async fn end_to_end_with_echo_backend() {
        let app = AppBuilder::new()
            .backend(Arc::new(EchoBackend::new()))
            .build()
            .unwrap();
        let running = app.start();

        let receipt = app
            .gateway
            .submit(Some("alice"), "hello there", GenerationParams::default())
            .await
            .unwrap();
        let view = app
            .reader
            .wait_for_terminal(
                receipt.task_id,
                Duration::from_millis(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(view.status(), TaskStatus::Completed);

        running.shutdown().await;

        let stats = app.stats().await.unwrap();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queue.ready + stats.queue.in_flight, 0);
    }
}
