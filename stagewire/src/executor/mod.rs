//! Running a validated graph.
//!
//! The [`Executor`] owns the run-wide pieces: configuration, the event sink,
//! the cancellation token and the cleanup registry for scratch space. Each
//! call to [`Executor::run`] gets a fresh run id and its own directory under
//! the configured work root.

mod scheduler;
mod summary;

pub use summary::{RunSummary, StageCounts, UnmatchedItem};

use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::config::EngineConfig;
use crate::errors::StagewireError;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::Graph;
use scheduler::Scheduler;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Seconds allowed for removing a successful run's scratch directory.
const CLEANUP_TIMEOUT_SECS: f64 = 30.0;

/// Executes a [`Graph`] with bounded parallelism.
pub struct Executor {
    graph: Arc<Graph>,
    config: Arc<EngineConfig>,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
    cleanup: CleanupRegistry,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pipeline", &self.graph.name())
            .field("config", &self.config)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor that discards events.
    #[must_use]
    pub fn new(graph: impl Into<Arc<Graph>>, config: EngineConfig) -> Self {
        Self {
            graph: graph.into(),
            config: Arc::new(config),
            sink: Arc::new(NoOpEventSink),
            token: Arc::new(CancellationToken::new()),
            cleanup: CleanupRegistry::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares an existing cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// The token that aborts this executor's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.token.clone()
    }

    /// The graph being executed.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Runs the graph until every stream drains, a fail-fast instance fails,
    /// or the token is cancelled.
    ///
    /// Instance failures are reported in the summary, not as `Err`.
    ///
    /// # Errors
    ///
    /// `Io` if the run directory can't be created.
    pub async fn run(&self) -> Result<RunSummary, StagewireError> {
        let run_id = Uuid::now_v7();
        let run_dir = self.config.work_dir.join(run_id.to_string());
        tokio::fs::create_dir_all(&run_dir).await?;

        info!(
            %run_id,
            pipeline = %self.graph.name(),
            stages = self.graph.stage_count(),
            max_workers = self.config.max_workers,
            work_dir = %run_dir.display(),
            "Starting run"
        );

        let summary = Scheduler::new(
            self.graph.clone(),
            self.config.clone(),
            self.sink.clone(),
            self.token.clone(),
            run_id,
            run_dir.clone(),
        )
        .run()
        .await;

        if !self.config.retain_work && summary.is_success() {
            self.cleanup.register_dir(run_dir);
            for (name, error) in self.cleanup.run_all(CLEANUP_TIMEOUT_SECS).await {
                warn!(%run_id, cleanup = %name, %error, "Cleanup failed");
            }
        } else {
            self.cleanup.clear();
        }

        Ok(summary)
    }
}
