//! Webhook-triggered deployment execution.
//!
//! Verification failures are silent no-ops by design: the gateway
//! acknowledges the provider either way and nothing runs. Execution
//! acknowledges at the first of {deadline, script exit}; the spawned
//! script is deliberately allowed to outlive the request.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::AppOptions;
use crate::errors::QuayError;
use crate::hook;

use super::event::{repo_path, DeploymentEvent};

/// Commit-message marker that suppresses deployment for one push.
pub const SKIP_MARKER: &str = "[quay skip]";

/// The provider must be acknowledged no later than this after receipt,
/// whether or not the hook script has finished.
pub const ACK_DEADLINE: Duration = Duration::from_secs(3);

/// Check a normalized push event against the app's stored config. Any
/// failed step aborts the deployment without surfacing an error.
pub fn verify(options: &AppOptions, event: &DeploymentEvent) -> bool {
    // apps without a remote never accept webhook-triggered deploys
    let Some(remote) = options.remote.as_deref() else {
        return false;
    };

    match (repo_path(&event.repo_url), repo_path(remote)) {
        (Some(got), Some(expected)) if got == expected => {}
        _ => {
            tracing::info!(url = %event.repo_url, "repository mismatch, aborted");
            return false;
        }
    }

    let Some(message) = event.commit_message.as_deref() else {
        return false;
    };
    if message.contains(SKIP_MARKER) {
        tracing::info!("skip marker in commit message, aborted");
        return false;
    }

    let Some(branch) = event.branch.as_deref() else {
        return false;
    };
    let expected = options.branch.as_deref().unwrap_or("master");
    if branch != expected {
        tracing::info!(expected, got = branch, "branch mismatch, aborted");
        return false;
    }
    true
}

/// Render the hook with the app's branch substituted, run it, and return
/// once either the script exits or the acknowledgement deadline passes. A
/// nonzero exit is only observable before the deadline; afterwards the
/// script keeps running in the background and is cleaned up on its own
/// exit.
pub async fn execute(root: &Path, appid: &str, options: &AppOptions) -> Result<(), QuayError> {
    let script = hook::render_with_branch(root, appid, options.branch.as_deref());
    tracing::info!(app = appid, "executing deployment hook");
    run_script(root, &script, ACK_DEADLINE).await
}

/// Spawn a shell script from a temp path under the root, streaming its
/// output through, and acknowledge at the first of {deadline, exit}. The
/// second trigger is a no-op; the temp script is removed when the child
/// eventually exits.
pub(crate) async fn run_script(
    root: &Path,
    script: &str,
    deadline: Duration,
) -> Result<(), QuayError> {
    let hook_path = root.join("temphook.sh");
    tokio::fs::write(&hook_path, script).await?;
    hook::make_executable(&hook_path)?;

    let mut child = Command::new("bash")
        .arg(&hook_path)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?;

    // The waiter owns the child and the temp script; it always cleans up
    // after the script's own exit, however late that is.
    let waiter = tokio::spawn(async move {
        let status = child.wait().await;
        if let Err(err) = tokio::fs::remove_file(&hook_path).await {
            tracing::warn!(path = %hook_path.display(), %err, "failed to remove temp hook");
        }
        status
    });

    match tokio::time::timeout(deadline, waiter).await {
        Ok(joined) => {
            let status = joined.map_err(|e| QuayError::Other(e.into()))??;
            if status.success() {
                Ok(())
            } else {
                Err(QuayError::HookFailed {
                    code: status.code(),
                })
            }
        }
        // acknowledge now; the detached waiter finishes in the background
        Err(_) => Ok(()),
    }
}
