//! Push payload normalization.
//!
//! The three supported providers ship three different payload shapes
//! (head-commit-bearing, commit-list, and Bitbucket's nested change list).
//! They are decoded exactly once at the gateway boundary into a single
//! [`DeploymentEvent`]; verification logic never touches raw JSON.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
}

/// One webhook push, normalized. Exists only for the duration of
/// verification plus execution; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentEvent {
    pub provider: Provider,
    pub repo_url: String,
    /// Branch name with the `refs/heads/` prefix already stripped; absent
    /// when the payload carries no usable ref.
    pub branch: Option<String>,
    pub commit_message: Option<String>,
}

impl DeploymentEvent {
    /// Decode a raw push payload. Returns `None` when no repository URL
    /// can be resolved at all; missing commit or ref data is kept as
    /// `None` so verification can abort on it explicitly.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let repo = payload.get("repository")?;

        let bitbucket_url = repo
            .pointer("/links/html/href")
            .and_then(Value::as_str)
            .filter(|href| href.contains("bitbucket.org"));

        if let Some(url) = bitbucket_url {
            let change = payload.pointer("/push/changes/0/new");
            return Some(Self {
                provider: Provider::Bitbucket,
                repo_url: url.to_string(),
                branch: change
                    .and_then(|c| c.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                commit_message: change
                    .and_then(|c| c.pointer("/target/message"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let repo_url = repo.get("url").and_then(Value::as_str)?.to_string();
        let commit = match payload.get("head_commit").filter(|c| !c.is_null()) {
            Some(head) => Some(head),
            None => payload
                .get("commits")
                .and_then(Value::as_array)
                .and_then(|commits| commits.last()),
        };
        let provider = if payload.get("object_kind").is_some() {
            Provider::GitLab
        } else {
            Provider::GitHub
        };
        Some(Self {
            provider,
            repo_url,
            branch: payload
                .get("ref")
                .and_then(Value::as_str)
                .map(|r| r.trim_start_matches("refs/heads/").to_string()),
            commit_message: commit
                .and_then(|c| c.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Normalize a repository URL to its `owner/repo` path so the same repo is
/// recognized across https, ssh and shorthand spellings.
pub fn repo_path(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/').trim_end_matches(".git");

    // scheme://host/owner/repo[/...]
    if let Some(pos) = url.find("://") {
        let rest = &url[pos + 3..];
        let mut parts = rest.split('/');
        let _host = parts.next()?;
        let owner = parts.next()?;
        let repo = parts.next()?;
        if !owner.is_empty() && !repo.is_empty() {
            return Some(format!("{owner}/{repo}"));
        }
        return None;
    }

    // git@host:owner/repo
    if let Some(colon) = url.find(':') {
        if url[..colon].contains('@') {
            let rest = &url[colon + 1..];
            let parts: Vec<&str> = rest.splitn(3, '/').collect();
            if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
                return Some(format!("{}/{}", parts[0], parts[1]));
            }
            return None;
        }
    }

    // bare owner/repo shorthand
    let parts: Vec<&str> = url.splitn(3, '/').collect();
    if parts.len() == 2 && !parts[0].contains(':') && !parts[0].contains('.') {
        return Some(format!("{}/{}", parts[0], parts[1]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_head_commit_shape() {
        let payload = json!({
            "ref": "refs/heads/master",
            "repository": { "url": "https://github.com/owner/repo" },
            "head_commit": { "message": "fix: things" },
            "commits": [{ "message": "older" }]
        });
        let event = DeploymentEvent::from_payload(&payload).unwrap();
        assert_eq!(event.provider, Provider::GitHub);
        assert_eq!(event.repo_url, "https://github.com/owner/repo");
        assert_eq!(event.branch.as_deref(), Some("master"));
        assert_eq!(event.commit_message.as_deref(), Some("fix: things"));
    }

    #[test]
    fn commit_list_shape_uses_last_commit() {
        let payload = json!({
            "object_kind": "push",
            "ref": "refs/heads/deploy",
            "repository": { "url": "https://gitlab.com/owner/repo" },
            "commits": [
                { "message": "first" },
                { "message": "latest" }
            ]
        });
        let event = DeploymentEvent::from_payload(&payload).unwrap();
        assert_eq!(event.provider, Provider::GitLab);
        assert_eq!(event.branch.as_deref(), Some("deploy"));
        assert_eq!(event.commit_message.as_deref(), Some("latest"));
    }

    #[test]
    fn bitbucket_change_list_shape() {
        let payload = json!({
            "repository": {
                "links": { "html": { "href": "https://bitbucket.org/owner/repo" } }
            },
            "push": {
                "changes": [{
                    "new": {
                        "name": "master",
                        "target": { "message": "deploy this" }
                    }
                }]
            }
        });
        let event = DeploymentEvent::from_payload(&payload).unwrap();
        assert_eq!(event.provider, Provider::Bitbucket);
        assert_eq!(event.branch.as_deref(), Some("master"));
        assert_eq!(event.commit_message.as_deref(), Some("deploy this"));
    }

    #[test]
    fn payload_without_repository_url_is_rejected() {
        assert!(DeploymentEvent::from_payload(&json!({})).is_none());
        assert!(
            DeploymentEvent::from_payload(&json!({ "repository": {} })).is_none()
        );
    }

    #[test]
    fn missing_commit_data_is_kept_as_none() {
        let payload = json!({
            "ref": "refs/heads/master",
            "repository": { "url": "https://github.com/owner/repo" }
        });
        let event = DeploymentEvent::from_payload(&payload).unwrap();
        assert!(event.commit_message.is_none());
    }

    #[test]
    fn repo_path_normalizes_across_spellings() {
        assert_eq!(
            repo_path("https://github.com/owner/repo.git").as_deref(),
            Some("owner/repo")
        );
        assert_eq!(
            repo_path("git@github.com:owner/repo.git").as_deref(),
            Some("owner/repo")
        );
        assert_eq!(repo_path("owner/repo").as_deref(), Some("owner/repo"));
        assert_eq!(
            repo_path("https://bitbucket.org/owner/repo/").as_deref(),
            Some("owner/repo")
        );
        assert_eq!(repo_path("not a url"), None);
        assert_eq!(repo_path("https://github.com/owner"), None);
    }
}
