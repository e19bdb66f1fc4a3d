//! Execution façade
//!
//! [`Executor`] drives one invocation from request to value: it packages the
//! code, persists the unit, launches the interpreter under the isolation
//! strategy, removes the unit, and consumes the result envelope. Every
//! outcome is classified into an [`ExecuteError`] variant.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Span, debug, info, instrument, warn};

pub use crate::runner::locks::KeyedLocks;

mod locks;

use crate::{
    config::{Config, ConfigError},
    isolation::{IsolationError, IsolationStrategy, LaunchError, ProcessLauncher},
    packager::{CodePackager, PackageError},
    store::{ArtifactStore, StoreError},
    types::{ExecutionRequest, InvocationId, Keywords, ProcessOutput, Termination},
};

/// Classified outcome of a failed invocation
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to package code: {0}")]
    Packaging(#[from] PackageError),

    #[error("failed to start interpreter: {0}")]
    ProcessSpawn(#[from] LaunchError),

    #[error("interpreter terminated abnormally ({termination}): {stderr}")]
    Interpreter {
        termination: Termination,
        stderr: String,
    },

    #[error("no result envelope for invocation {0}")]
    ResultMissing(InvocationId),

    #[error("malformed result envelope for invocation {id}: {message}")]
    ResultMalformed { id: InvocationId, message: String },

    /// The callable raised, or no entry callable could be selected
    #[error("{0}")]
    Execution(String),

    #[error("sandbox storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("isolation unavailable: {0}")]
    Isolation(#[from] IsolationError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("executor is closed")]
    Closed,
}

impl ExecuteError {
    /// Whether the caller's code ran and reported a failure of its own
    ///
    /// Every other variant is an infrastructure fault.
    #[must_use]
    pub fn is_business_failure(&self) -> bool {
        matches!(self, ExecuteError::Execution(_))
    }

    /// Whether the child was killed for exceeding its deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecuteError::Interpreter {
                termination: Termination::TimedOut(_),
                ..
            }
        )
    }
}

impl From<StoreError> for ExecuteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ResultMissing(id) => ExecuteError::ResultMissing(id),
            StoreError::ResultMalformed { id, message } => {
                ExecuteError::ResultMalformed { id, message }
            }
            other => ExecuteError::Storage(other),
        }
    }
}

/// Runs caller code in isolated interpreter processes
///
/// Cheap to share behind an `Arc`; every method takes `&self` and
/// invocations never touch each other's artifacts.
#[derive(Debug)]
pub struct Executor {
    config: Config,
    store: ArtifactStore,
    packager: CodePackager,
    launcher: ProcessLauncher,
    permits: Arc<Semaphore>,
    locks: KeyedLocks,
}

impl Executor {
    /// Build an executor, preparing the sandbox directory
    ///
    /// The isolation strategy is resolved here, once. A missing sandbox
    /// account is reported as [`ExecuteError::Isolation`].
    #[instrument(skip_all)]
    pub fn new(config: Config) -> Result<Self, ExecuteError> {
        config.validate()?;

        let strategy = IsolationStrategy::resolve(&config)?;
        let store = ArtifactStore::open(&config.sandbox_root, strategy.identity().cloned())?;
        let packager = CodePackager::from_config(&config);
        let launcher = ProcessLauncher::from_config(&config, strategy);
        let permits = Arc::new(Semaphore::new(
            config.max_concurrency.unwrap_or(Semaphore::MAX_PERMITS),
        ));

        info!(
            root = %store.root().display(),
            interpreter = %launcher.interpreter().display(),
            isolation = ?launcher.strategy().mode(),
            timeout = ?config.timeout(),
            max_concurrency = ?config.max_concurrency,
            "executor ready"
        );

        Ok(Self {
            config,
            store,
            packager,
            launcher,
            permits,
            locks: KeyedLocks::new(),
        })
    }

    /// Build an executor from the embedded default configuration
    pub fn with_defaults() -> Result<Self, ExecuteError> {
        Self::new(Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// The isolation actually in effect, after any fallback
    pub fn strategy(&self) -> &IsolationStrategy {
        self.launcher.strategy()
    }

    /// Run the callable defined by `code` with `keywords` as named arguments
    pub async fn execute(&self, code: &str, keywords: &Keywords) -> Result<Value, ExecuteError> {
        let request = ExecutionRequest::new(code).with_keywords(keywords.clone());
        self.execute_request(&request).await
    }

    /// Run one request
    ///
    /// Artifacts of the invocation are gone when this returns, whatever the
    /// outcome, and also when the future is dropped before completion.
    #[instrument(skip_all, fields(id = tracing::field::Empty))]
    pub async fn execute_request(&self, request: &ExecutionRequest) -> Result<Value, ExecuteError> {
        let _permit = self.acquire_permit().await?;

        let id = self.store.reserve();
        Span::current().record("id", tracing::field::display(id));
        let _guard = self.store.guard(id);

        let unit = self.packager.package(request, &self.store.result_path(&id))?;
        let script = self.store.write_script(&id, &unit).await?;
        debug!(path = %script.display(), "packaged");

        let launched = self.launcher.run(&script).await;

        // The unit is removed before the outcome is inspected
        if let Err(e) = self.store.remove_script(&id).await {
            warn!(error = %e, "failed to remove script");
        }

        let output = launched?;
        log_output(&output);
        check_termination(&output)?;

        let envelope = self.store.read_and_consume_result(&id).await?;
        debug!(code = envelope.code, "completed");

        envelope.into_result().map_err(ExecuteError::Execution)
    }

    /// Run `request` after every earlier request sharing `key` has finished
    pub async fn execute_serialized(
        &self,
        key: &str,
        request: &ExecutionRequest,
    ) -> Result<Value, ExecuteError> {
        let lock = self.locks.get(key);
        let _held = lock.lock().await;
        self.execute_request(request).await
    }

    /// Blocking variant of [`execute`](Self::execute) for callers outside an
    /// async runtime
    ///
    /// Drives the invocation on a private current-thread runtime. Panics if
    /// called from within a Tokio runtime.
    pub fn execute_blocking(&self, code: &str, keywords: &Keywords) -> Result<Value, ExecuteError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecuteError::Runtime)?;
        runtime.block_on(self.execute(code, keywords))
    }

    /// Stop accepting invocations
    ///
    /// Invocations already running finish normally. Later calls, and calls
    /// waiting for a concurrency slot, fail with [`ExecuteError::Closed`].
    pub fn close(&self) {
        self.permits.close();
        info!("executor closed");
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Drop per-key locks that no invocation is using
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, ExecuteError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecuteError::Closed)
    }
}

fn log_output(output: &ProcessOutput) {
    debug!(termination = %output.termination, "spawned process finished");
    if !output.stdout.is_empty() {
        debug!(stdout = %output.stdout, "child stdout");
    }
    if !output.stderr.is_empty() {
        warn!(stderr = %output.stderr, "child wrote to stderr");
    }
}

/// Anything but a clean exit means the unit never got to record an outcome
fn check_termination(output: &ProcessOutput) -> Result<(), ExecuteError> {
    if output.is_normal() {
        return Ok(());
    }
    Err(ExecuteError::Interpreter {
        termination: output.termination,
        stderr: output.stderr.clone(),
    })
}
