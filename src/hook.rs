//! Deployment hook templating.
//!
//! One fixed shell template with two placeholders ({{quay_dir}} and
//! {{app}}), rendered at provisioning time into a repo's post-receive slot
//! and at webhook time into a temporary script. Substitution is verbatim;
//! app names are validated against an allow-list at registration so shell
//! metacharacters never reach the template.

use std::path::Path;

use crate::errors::QuayError;

pub const HOOK_TEMPLATE: &str = include_str!("../hooks/post-receive");

/// Substitute the root directory and app name into the template.
pub fn render(root: &Path, app: &str) -> String {
    HOOK_TEMPLATE
        .replace("{{quay_dir}}", &root.to_string_lossy())
        .replace("{{app}}", app)
}

/// Render with the deployed branch substituted for the default. Used on
/// the webhook path where the app config may pin a non-master branch.
pub fn render_with_branch(root: &Path, app: &str, branch: Option<&str>) -> String {
    let script = render(root, app);
    match branch {
        Some(branch) => script.replace("origin/master", &format!("origin/{branch}")),
        None => script,
    }
}

/// Install the rendered hook into a bare repo's post-receive slot,
/// executable by all.
pub fn install(repo_path: &Path, root: &Path, app: &str) -> Result<(), QuayError> {
    let hook_path = repo_path.join("hooks").join("post-receive");
    std::fs::write(&hook_path, render(root, app))?;
    make_executable(&hook_path)?;
    Ok(())
}

pub(crate) fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o777);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
