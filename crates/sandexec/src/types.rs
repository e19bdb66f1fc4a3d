use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Envelope code written by a packaged unit when the callable returned
pub const SUCCESS_CODE: i64 = 200;

/// Envelope code written by a packaged unit when the callable raised
pub const FAILURE_CODE: i64 = 500;

/// Keyword arguments bound to the entry callable
pub type Keywords = Map<String, Value>;

/// A request to run one callable
///
/// `code` must bind exactly one callable when evaluated. `keywords` are
/// passed to it as named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source defining the entry callable
    pub code: String,

    /// Named arguments for the entry callable
    #[serde(default)]
    pub keywords: Keywords,
}

impl ExecutionRequest {
    /// Create a request with no keyword arguments
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            keywords: Keywords::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_keyword(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.insert(name.into(), value.into());
        self
    }

    /// Replace all keyword arguments
    pub fn with_keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }
}

/// Unique token namespacing the artifacts of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Mint a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Success or failure payload written once by a packaged unit
///
/// Wire shape: `{"code": <int>, "message": <string|null>, "data": <any|null>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub code: i64,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub data: Option<Value>,
}

impl ResultEnvelope {
    /// Build a success envelope carrying `data`
    pub fn success(data: Value) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: Some("ok".to_string()),
            data: Some(data),
        }
    }

    /// Build a failure envelope carrying `message`
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: FAILURE_CODE,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Decode an envelope from its serialized form
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Split the envelope into the callable's value or its failure message
    ///
    /// A `null` return value decodes as `Value::Null`. A failure without a
    /// message is reported with its code.
    pub fn into_result(self) -> Result<Value, String> {
        if self.is_success() {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .message
                .unwrap_or_else(|| format!("execution failed with code {}", self.code)))
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited with a status code
    Exited(i32),

    /// Killed by a signal
    Signaled(i32),

    /// Killed after exceeding the wall-clock deadline
    TimedOut(Duration),
}

impl Termination {
    /// Whether this is the "normal completion" convention of a packaged unit
    ///
    /// Business failures are caught by the unit and still exit with 0, so
    /// anything else is a fault in the harness or the interpreter.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit code {code}"),
            Termination::Signaled(signal) => write!(f, "signal {signal}"),
            Termination::TimedOut(limit) => {
                write!(f, "timed out after {:.3}s", limit.as_secs_f64())
            }
        }
    }
}

/// Captured result of one child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.termination.is_normal()
    }
}
