//! Packaging of caller code into a self-contained unit
//!
//! The unit is a Python script built from an embedded template. All request
//! data travels as one JSON document embedded as a string literal, so caller
//! text is never spliced into the script as source.
//!
//! When run, the unit:
//! 1. removes sensitive environment variables,
//! 2. evaluates the code in a fresh namespace and picks the entry callable,
//! 3. calls it with the keyword arguments,
//! 4. writes a [`ResultEnvelope`](crate::types::ResultEnvelope) to the
//!    result path, through a `.part` file and an atomic rename.
//!
//! Exceptions raised by the code are recorded as failure envelopes and the
//! unit still exits with status 0.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, EntryPolicy};
use crate::types::{ExecutionRequest, FAILURE_CODE, Keywords, SUCCESS_CODE};

const HARNESS_TEMPLATE: &str = include_str!("harness.py");
const MANIFEST_PLACEHOLDER: &str = "__UNIT_MANIFEST__";

/// `__name__` of the namespace the code is evaluated in
pub const UNIT_MODULE: &str = "__sandexec_unit__";

const PYTHON_KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Errors that occur while building a unit
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("code is empty")]
    EmptyCode,

    #[error("code contains a NUL byte")]
    NulByte,

    #[error("keyword '{0}' is not a valid identifier")]
    InvalidKeyword(String),

    #[error("result path is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    #[error("failed to encode unit data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Data embedded in every unit
#[derive(Debug, Serialize)]
struct UnitManifest<'a> {
    code: &'a str,
    keywords: &'a Keywords,
    sensitive_prefixes: &'a [String],
    result_path: &'a str,
    success_code: i64,
    failure_code: i64,
    entry_policy: &'static str,
    module: &'static str,
}

/// Builds executable units from requests
#[derive(Debug, Clone)]
pub struct CodePackager {
    sensitive_prefixes: Vec<String>,
    entry_policy: EntryPolicy,
}

impl CodePackager {
    pub fn new(sensitive_prefixes: Vec<String>, entry_policy: EntryPolicy) -> Self {
        Self {
            sensitive_prefixes,
            entry_policy,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sensitive_env_prefixes.clone(), config.entry_policy)
    }

    pub fn entry_policy(&self) -> EntryPolicy {
        self.entry_policy
    }

    /// Build the source of a unit that records its outcome at `result_path`
    pub fn package(
        &self,
        request: &ExecutionRequest,
        result_path: &Path,
    ) -> Result<String, PackageError> {
        validate(request)?;

        let result_path = result_path
            .to_str()
            .ok_or_else(|| PackageError::NonUtf8Path(result_path.display().to_string()))?;

        let manifest = UnitManifest {
            code: &request.code,
            keywords: &request.keywords,
            sensitive_prefixes: &self.sensitive_prefixes,
            result_path,
            success_code: SUCCESS_CODE,
            failure_code: FAILURE_CODE,
            entry_policy: self.entry_policy.as_str(),
            module: UNIT_MODULE,
        };

        // A JSON string literal is also a valid Python string literal
        let document = serde_json::to_string(&manifest)?;
        let literal = serde_json::to_string(&document)?;

        Ok(HARNESS_TEMPLATE.replacen(MANIFEST_PLACEHOLDER, &literal, 1))
    }
}

fn validate(request: &ExecutionRequest) -> Result<(), PackageError> {
    if request.code.trim().is_empty() {
        return Err(PackageError::EmptyCode);
    }
    if request.code.contains('\0') {
        return Err(PackageError::NulByte);
    }
    if let Some(name) = request.keywords.keys().find(|name| !is_identifier(name)) {
        return Err(PackageError::InvalidKeyword(name.clone()));
    }
    Ok(())
}

/// Check whether `name` can be bound as a named argument
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || first.is_alphabetic()) {
        return false;
    }
    if !chars.all(|c| c == '_' || c.is_alphanumeric()) {
        return false;
    }
    !PYTHON_KEYWORDS.contains(&name)
}
