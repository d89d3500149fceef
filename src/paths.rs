//! Canonical filesystem locations for an application.
//!
//! Every app owns exactly two directories derived from its name and the
//! configured root: a bare repo at `<root>/repos/<name>.git` and a working
//! copy at `<root>/apps/<name>`. No other module is allowed to construct
//! these paths on its own.

use std::path::{Path, PathBuf};

use crate::errors::QuayError;

/// App name reserved for the administrative dashboard. Never a key of the
/// registered app map.
pub const RESERVED_WEB_ID: &str = "web-interface";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub name: String,
    pub repo_path: PathBuf,
    pub work_path: PathBuf,
}

/// Map an app name to its bare repo and working copy locations.
pub fn app_paths(root: &Path, name: &str) -> AppPaths {
    AppPaths {
        name: name.to_string(),
        repo_path: root.join("repos").join(format!("{name}.git")),
        work_path: root.join("apps").join(name),
    }
}

/// Reject names that could escape the root tree or splice into the hook
/// script. App names end up verbatim in shell templates, so only an
/// allow-list character set is accepted at registration time.
pub fn validate_name(name: &str) -> Result<(), QuayError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(QuayError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Fixed internal location of the dashboard app, outside the repos/apps
/// tree.
pub fn dashboard_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quay")
        .join("web")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_pure_functions_of_root_and_name() {
        let paths = app_paths(Path::new("/srv/quay"), "foo");
        assert_eq!(paths.repo_path, PathBuf::from("/srv/quay/repos/foo.git"));
        assert_eq!(paths.work_path, PathBuf::from("/srv/quay/apps/foo"));
        assert_eq!(paths.name, "foo");
    }

    #[test]
    fn validate_accepts_typical_names() {
        for name in ["foo", "my-app", "my_app", "App2"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn validate_rejects_shell_metacharacters_and_traversal() {
        for name in ["", "a b", "a;rm -rf /", "../evil", "a$(x)", "a/b"] {
            let err = validate_name(name).unwrap_err();
            assert_eq!(err.code(), "invalid_name", "{name} should be rejected");
        }
    }

    #[test]
    fn dashboard_dir_is_outside_any_root() {
        let dir = dashboard_dir();
        assert!(dir.ends_with("quay/web"));
    }
}
