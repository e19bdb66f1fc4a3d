//! Isolation strategies for packaged units
//!
//! The strategy is chosen once when the engine is built. Hosts that cannot
//! provide the requested isolation fall back to [`IsolationStrategy::Local`]
//! with a warning instead of failing.

use thiserror::Error;
use tracing::{info, warn};

pub use crate::isolation::launcher::{LaunchError, ProcessLauncher};
use crate::config::{Config, IsolationMode};

pub mod launcher;

/// Errors that occur while resolving an isolation strategy
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("sandbox user '{0}' does not exist")]
    UnknownUser(String),

    #[error("failed to look up sandbox user '{user}': {message}")]
    Lookup { user: String, message: String },
}

/// OS account a packaged unit runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Resolve an account by name from the system user database
    #[cfg(unix)]
    pub fn lookup(name: &str) -> Result<Self, IsolationError> {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Ok(Self {
                name: user.name,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            }),
            Ok(None) => Err(IsolationError::UnknownUser(name.to_string())),
            Err(e) => Err(IsolationError::Lookup {
                user: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// How a packaged unit is launched, resolved against the host's capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationStrategy {
    /// Current identity, current filesystem view
    Local,

    /// Switch to an unprivileged account before exec
    UnprivilegedUser(Identity),

    /// Fresh user and network namespaces before exec
    Namespaced,
}

impl IsolationStrategy {
    /// Resolve the configured mode on this host
    pub fn resolve(config: &Config) -> Result<Self, IsolationError> {
        let strategy = match config.isolation {
            IsolationMode::Local => IsolationStrategy::Local,
            IsolationMode::UnprivilegedUser => resolve_unprivileged(&config.sandbox_user)?,
            IsolationMode::Namespaced => {
                if namespaces_available() {
                    IsolationStrategy::Namespaced
                } else {
                    warn!(
                        "user namespaces unavailable on this host, falling back to local isolation"
                    );
                    IsolationStrategy::Local
                }
            }
        };

        info!(
            requested = ?config.isolation,
            resolved = ?strategy.mode(),
            "isolation strategy resolved"
        );
        Ok(strategy)
    }

    /// Identity artifacts must be handed to, if any
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IsolationStrategy::UnprivilegedUser(identity) => Some(identity),
            _ => None,
        }
    }

    /// The mode this strategy actually provides
    pub fn mode(&self) -> IsolationMode {
        match self {
            IsolationStrategy::Local => IsolationMode::Local,
            IsolationStrategy::UnprivilegedUser(_) => IsolationMode::UnprivilegedUser,
            IsolationStrategy::Namespaced => IsolationMode::Namespaced,
        }
    }
}

#[cfg(unix)]
fn resolve_unprivileged(user: &str) -> Result<IsolationStrategy, IsolationError> {
    Identity::lookup(user).map(IsolationStrategy::UnprivilegedUser)
}

#[cfg(not(unix))]
fn resolve_unprivileged(user: &str) -> Result<IsolationStrategy, IsolationError> {
    warn!(
        user,
        "identity switching is unsupported on this platform, falling back to local isolation"
    );
    Ok(IsolationStrategy::Local)
}

/// Check whether this process may create user and network namespaces.
///
/// Unprivileged user namespaces can be disabled by the kernel, by a sysctl
/// or by AppArmor. Root is only subject to the first.
#[cfg(target_os = "linux")]
pub fn namespaces_available() -> bool {
    use std::path::Path;

    if !Path::new("/proc/self/ns/user").exists() || !Path::new("/proc/self/ns/net").exists() {
        return false;
    }

    if nix::unistd::geteuid().is_root() {
        return true;
    }

    if let Some(value) = read_sysctl("/proc/sys/kernel/unprivileged_userns_clone")
        && value == "0"
    {
        return false;
    }
    if let Some(value) = read_sysctl("/proc/sys/user/max_user_namespaces")
        && value == "0"
    {
        return false;
    }
    if let Some(value) = read_sysctl("/proc/sys/kernel/apparmor_restrict_unprivileged_userns")
        && value == "1"
    {
        return false;
    }

    true
}

#[cfg(not(target_os = "linux"))]
pub fn namespaces_available() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn read_sysctl(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|value| value.trim().to_string())
}
