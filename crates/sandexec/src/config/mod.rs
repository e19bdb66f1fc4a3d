use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../sandexec.example.toml");

/// Prefix for environment variable overrides (`SANDEXEC_TIMEOUT=10`)
pub const ENV_PREFIX: &str = "SANDEXEC";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How packaged units are launched
///
/// Selected once per engine, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Same identity and filesystem view as the engine
    #[default]
    Local,

    /// Switch to `sandbox_user` before running the interpreter
    UnprivilegedUser,

    /// Run in fresh user and network namespaces (Linux)
    Namespaced,
}

/// Which binding of the evaluated code is treated as the entry callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPolicy {
    /// The last callable the code defines
    #[default]
    Last,

    /// Exactly one callable must be defined
    Single,
}

impl EntryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPolicy::Last => "last",
            EntryPolicy::Single => "single",
        }
    }
}

/// Config for the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the sandbox directory holding scripts and result envelopes
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Path to the interpreter that runs packaged units (uses PATH if not specified)
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    /// Working directory of the child process (defaults to the current directory)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Isolation strategy for every invocation
    #[serde(default)]
    pub isolation: IsolationMode,

    /// Account used when `isolation = "unprivileged_user"`
    #[serde(default = "default_sandbox_user")]
    pub sandbox_user: String,

    /// Environment variables starting with any of these are removed before
    /// user code runs
    #[serde(default = "default_sensitive_env_prefixes")]
    pub sensitive_env_prefixes: Vec<String>,

    /// Wall-clock limit for one child process in seconds.
    /// No limit when absent.
    #[serde(default)]
    pub timeout: Option<f64>,

    #[serde(default)]
    pub entry_policy: EntryPolicy,

    /// Maximum number of children running at the same time
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the path to the interpreter binary
    pub fn interpreter_binary(&self) -> PathBuf {
        self.interpreter
            .clone()
            .unwrap_or_else(|| PathBuf::from("python3"))
    }

    /// Get the working directory for child processes
    pub fn working_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Get the wall-clock deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Check whether an environment variable name is a host secret
    pub fn is_sensitive(&self, name: &str) -> bool {
        has_sensitive_prefix(&self.sensitive_env_prefixes, name)
    }
}

/// Match a variable name against a list of case-sensitive prefixes
pub(crate) fn has_sensitive_prefix(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("data/sandbox")
}

fn default_sandbox_user() -> String {
    "sandbox".to_string()
}

fn default_sensitive_env_prefixes() -> Vec<String> {
    ["SANDEXEC", "POSTGRES", "PG", "SECRET", "AWS_", "DATABASE"]
        .into_iter()
        .map(String::from)
        .collect()
}
