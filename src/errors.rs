//! Typed error taxonomy for the quay platform.
//!
//! Every user-facing failure carries a machine-checkable code (for the CLI
//! and dashboard to branch on) plus a human-readable message. Underlying
//! git/filesystem/supervisor failures are propagated verbatim, never
//! retried.

use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum QuayError {
    #[error("app {name} already exists")]
    AlreadyExists { name: String },

    #[error("app {name} is not registered")]
    NotFound { name: String },

    #[error("{name} is reserved for the web dashboard")]
    Protected { name: String },

    #[error("invalid app name {name}: only letters, digits, - and _ are allowed")]
    InvalidName { name: String },

    #[error("entry point {script} for app {name} does not exist")]
    NoScript { name: String, script: PathBuf },

    #[error("app {name} is already running")]
    AlreadyRunning { name: String },

    #[error("app {name} is not running")]
    NotRunning { name: String },

    #[error("config file at {path} is corrupt: {source}")]
    ConfigCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("deployment hook exited with code {code:?}")]
    HookFailed { code: Option<i32> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuayError {
    /// Stable code for callers that need to branch without string-matching
    /// the message text.
    pub fn code(&self) -> &'static str {
        match self {
            QuayError::AlreadyExists { .. } => "exists",
            QuayError::NotFound { .. } => "not_found",
            QuayError::Protected { .. } => "protected",
            QuayError::InvalidName { .. } => "invalid_name",
            QuayError::NoScript { .. } => "no_script",
            QuayError::AlreadyRunning { .. } => "already_running",
            QuayError::NotRunning { .. } => "not_running",
            QuayError::ConfigCorrupt { .. } => "config_corrupt",
            QuayError::Git(_) => "git",
            QuayError::Io(_) => "io",
            QuayError::Supervisor(_) => "supervisor",
            QuayError::HookFailed { .. } => "hook_failed",
            QuayError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_carries_name() {
        let err = QuayError::AlreadyExists {
            name: "myapp".into(),
        };
        assert!(err.to_string().contains("myapp"));
        assert_eq!(err.code(), "exists");
    }

    #[test]
    fn no_script_carries_path() {
        let err = QuayError::NoScript {
            name: "myapp".into(),
            script: PathBuf::from("/srv/quay/apps/myapp/app.js"),
        };
        match &err {
            QuayError::NoScript { script, .. } => {
                assert_eq!(script, &PathBuf::from("/srv/quay/apps/myapp/app.js"));
            }
            _ => panic!("expected NoScript"),
        }
        assert_eq!(err.code(), "no_script");
    }

    #[test]
    fn config_corrupt_wraps_serde_error() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QuayError::ConfigCorrupt {
            path: PathBuf::from("/home/user/.quayrc"),
            source,
        };
        assert_eq!(err.code(), "config_corrupt");
        assert!(err.to_string().contains(".quayrc"));
    }

    #[test]
    fn codes_are_distinct_per_lifecycle_variant() {
        let running = QuayError::AlreadyRunning { name: "a".into() };
        let stopped = QuayError::NotRunning { name: "a".into() };
        assert_ne!(running.code(), stopped.code());
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&QuayError::NotFound { name: "x".into() });
    }
}
