//! A library for running caller-supplied code fragments in isolated child processes.
//!
//! Sandexec takes a fragment of Python source that defines a callable, plus
//! keyword arguments, and runs it in a fresh interpreter process. The value
//! the callable returns (or the error it raised) travels back through a
//! private sandbox directory as a JSON envelope.
//!
//! # Features
//!
//! - **Process isolation** — Every invocation runs in its own interpreter process, optionally as an unprivileged account or in fresh user and network namespaces.
//! - **Secret hygiene** — Environment variables matching configured prefixes never reach caller code.
//! - **Single-use artifacts** — Scripts and result envelopes are namespaced per invocation and removed on every exit path.
//! - **Classified failures** — Business failures are kept apart from interpreter, spawn and integrity faults.
//! - **TOML configuration** — File and environment driven settings with validated defaults.
//!
//! # Example
//!
//! ```no_run
//! use sandexec::{Config, Executor, Keywords};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), sandexec::ExecuteError> {
//! let executor = Executor::new(Config::default())?;
//!
//! let mut keywords = Keywords::new();
//! keywords.insert("a".into(), json!(2));
//! keywords.insert("b".into(), json!(3));
//!
//! let value = executor
//!     .execute("def add(a, b):\n    return a + b", &keywords)
//!     .await?;
//! assert_eq!(value, json!(5));
//! # Ok(())
//! # }
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, EntryPolicy, IsolationMode};
pub use isolation::{
    Identity, IsolationError, IsolationStrategy, LaunchError, ProcessLauncher,
    namespaces_available,
};
pub use packager::{CodePackager, PackageError};
pub use runner::{ExecuteError, Executor, KeyedLocks};
pub use store::{ArtifactGuard, ArtifactStore, StoreError};
pub use types::{
    ExecutionRequest, InvocationId, Keywords, ProcessOutput, ResultEnvelope, Termination,
};

pub mod config;
pub mod isolation;
pub mod packager;
pub mod runner;
pub mod store;
pub mod types;
