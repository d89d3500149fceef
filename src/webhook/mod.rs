//! Webhook gateway.
//!
//! `POST /hooks/{appid}` receives push notifications from GitHub, GitLab
//! and Bitbucket. The payload is normalized once ([`event`]), verified
//! against the app's stored config and, on a match, deployed ([`executor`])
//! with the acknowledgement bounded by a fixed deadline. Verification
//! failures acknowledge silently; the provider is never left hanging.

pub mod event;
pub mod executor;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::lifecycle::AppManager;

pub struct GatewayState {
    pub manager: AppManager,
}

pub type SharedState = Arc<GatewayState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/hooks/{appid}", post(handle_hook))
        .route("/json", get(list_json))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// App list as JSON, consumed by the dashboard front-end.
async fn list_json(State(state): State<SharedState>) -> Response {
    match state.manager.list().await {
        Ok(apps) => Json(apps).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string(), "code": err.code() })),
        )
            .into_response(),
    }
}

async fn handle_hook(
    Path(appid): Path<String>,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> StatusCode {
    // pick up external config edits before consulting app options
    let cfg = match state.manager.reload_config().await {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(%err, "config reload failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    let options = cfg.apps.get(&appid);

    let is_ping = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "ping");
    if is_ping {
        // connectivity check: only repository identity is re-verified
        let ping_url = payload
            .pointer("/repository/git_url")
            .and_then(Value::as_str);
        let matches = match (options.and_then(|o| o.remote.as_deref()), ping_url) {
            (Some(remote), Some(url)) => {
                let got = event::repo_path(url);
                got.is_some() && got == event::repo_path(remote)
            }
            _ => false,
        };
        return if matches {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
    }

    let Some(options) = options else {
        return StatusCode::OK;
    };
    let Some(evt) = event::DeploymentEvent::from_payload(&payload) else {
        return StatusCode::OK;
    };
    if executor::verify(options, &evt) {
        if let Err(err) = executor::execute(&cfg.root, &appid, options).await {
            // the provider is acknowledged regardless
            tracing::warn!(app = %appid, %err, "deployment hook failed");
        }
    }
    StatusCode::OK
}

/// Run the gateway until ctrl-c.
pub async fn serve(state: SharedState, port: u16, dev_mode: bool) -> anyhow::Result<()> {
    let mut app = router(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind to port {port}"))?;
    tracing::info!("webhook gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::supervisor::MemorySupervisor;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    fn test_state() -> (TempDir, SharedState) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quayrc.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "root": dir.path().join("root"),
                "apps": {
                    "hooked": { "remote": "owner/repo" }
                }
            })
            .to_string(),
        )
        .unwrap();
        let store = ConfigStore::open(&path).unwrap();
        let manager = AppManager::new(store, Arc::new(MemorySupervisor::new()));
        (dir, Arc::new(GatewayState { manager }))
    }

    fn post_hook(appid: &str, payload: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/hooks/{appid}"))
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    fn push_payload(url: &str, branch: &str, message: &str) -> Value {
        serde_json::json!({
            "ref": format!("refs/heads/{branch}"),
            "repository": { "url": url },
            "head_commit": { "message": message }
        })
    }

    fn hook_was_run(dir: &TempDir) -> bool {
        // execution always materializes the temp script under the root,
        // even when it is cleaned up afterwards; verification failures
        // never write it
        dir.path().join("root/temphook.sh").exists()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_dir, state) = test_state();
        let resp = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn json_endpoint_lists_apps() {
        let (_dir, state) = test_state();
        let resp = router(state)
            .oneshot(Request::builder().uri("/json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let apps: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(apps.as_array().unwrap().len(), 1);
        assert_eq!(apps[0]["name"], "hooked");
    }

    #[tokio::test]
    async fn ping_acknowledges_on_repository_match() {
        let (_dir, state) = test_state();
        let payload = serde_json::json!({
            "repository": { "git_url": "git://github.com/owner/repo.git" }
        });
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/hooked")
            .header("content-type", "application/json")
            .header("x-github-event", "ping")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ping_rejects_repository_mismatch() {
        let (_dir, state) = test_state();
        let payload = serde_json::json!({
            "repository": { "git_url": "git://github.com/other/project.git" }
        });
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/hooked")
            .header("content-type", "application/json")
            .header("x-github-event", "ping")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn mismatched_repository_never_triggers_execution() {
        let (dir, state) = test_state();
        let payload = push_payload("https://github.com/other/project", "master", "ok");
        let resp = router(state).oneshot(post_hook("hooked", &payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!hook_was_run(&dir));
    }

    #[tokio::test]
    async fn skip_marker_never_triggers_execution() {
        let (dir, state) = test_state();
        let payload = push_payload(
            "https://github.com/owner/repo",
            "master",
            "wip [quay skip]",
        );
        let resp = router(state).oneshot(post_hook("hooked", &payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!hook_was_run(&dir));
    }

    #[tokio::test]
    async fn branch_mismatch_never_triggers_execution() {
        let (dir, state) = test_state();
        let payload = push_payload("https://github.com/owner/repo", "develop", "ok");
        let resp = router(state).oneshot(post_hook("hooked", &payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!hook_was_run(&dir));
    }

    #[tokio::test]
    async fn unknown_app_acknowledges_silently() {
        let (dir, state) = test_state();
        let payload = push_payload("https://github.com/owner/repo", "master", "ok");
        let resp = router(state).oneshot(post_hook("ghost", &payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!hook_was_run(&dir));
    }

    #[tokio::test]
    async fn verified_push_acknowledges_even_when_the_hook_fails() {
        let (_dir, state) = test_state();
        // no working copy exists, so the hook exits nonzero immediately;
        // the provider still gets a 200
        let payload = push_payload("https://github.com/owner/repo", "master", "ok");
        let resp = router(state).oneshot(post_hook("hooked", &payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
