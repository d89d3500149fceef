//! Application lifecycle orchestration.
//!
//! Brokers every create/remove/start/stop/restart/list/prune operation
//! against the config store, the path resolver, the process supervisor and
//! git. Operations return human-readable progress messages plus structured
//! data; failures surface once to the caller and are never retried.
//!
//! Config writes happen before filesystem provisioning, so a crash mid
//! provision leaves a registered-but-broken app rather than silent data
//! loss. Recovery is the `broken` flag in `list` plus `rm`/`prune`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{AppOptions, ConfigStore, GlobalConfig};
use crate::errors::QuayError;
use crate::hook;
use crate::paths::{self, RESERVED_WEB_ID};
use crate::supervisor::{ProcessInstance, StartConfig, Supervisor};

/// Derived record for one application, recomputed on demand from the
/// config plus filesystem probing. Never persisted standalone.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub name: String,
    /// Absent for the reserved dashboard app, which has no push repo.
    pub repo_path: Option<PathBuf>,
    pub work_path: PathBuf,
    pub config: AppOptions,
    /// Resolved absolute entry-point path.
    pub script: PathBuf,
    /// Explicit config value, else sniffed from source, else unknown.
    pub port: Option<u16>,
    /// Live view from the supervisor; filled only when listing.
    pub instances: Vec<ProcessInstance>,
    pub broken: bool,
}

/// Option keys consumed by quay itself and stripped before the start
/// request reaches the supervisor.
const CONTROL_KEYS: [&str; 6] = ["remote", "username", "password", "jsonp", "port", "node_env"];

pub struct AppManager {
    store: Mutex<ConfigStore>,
    supervisor: Arc<dyn Supervisor>,
}

impl AppManager {
    pub fn new(store: ConfigStore, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            store: Mutex::new(store),
            supervisor,
        }
    }

    /// Register and provision a new app. The config entry is persisted
    /// before any filesystem step and is not rolled back on failure.
    pub async fn create(
        &self,
        name: &str,
        options: AppOptions,
    ) -> Result<(Vec<String>, AppInfo), QuayError> {
        paths::validate_name(name)?;
        let mut store = self.store.lock().await;
        if name == RESERVED_WEB_ID || store.config().apps.contains_key(name) {
            return Err(QuayError::AlreadyExists { name: name.into() });
        }

        let root = store.config().root.clone();
        let app_paths = paths::app_paths(&root, name);
        let remote = options.remote.clone();
        store.config_mut().apps.insert(name.to_string(), options);
        store.save()?;
        let mut msgs = vec!["updated config.".to_string()];

        match remote {
            Some(remote) => {
                // Deployment is driven externally; no local repo or hook.
                let remote = expand_remote(&remote);
                git2::Repository::clone(&remote, &app_paths.work_path)?;
                msgs.push(format!(
                    "created remote app at {}",
                    app_paths.work_path.display()
                ));
                msgs.push(format!("tracking remote: {remote}"));
            }
            None => {
                git2::Repository::init_bare(&app_paths.repo_path)?;
                msgs.push(format!(
                    "created bare repo at {}",
                    app_paths.repo_path.display()
                ));
                hook::install(&app_paths.repo_path, &root, name)?;
                msgs.push("created post-receive hook.".to_string());
                git2::Repository::clone(
                    &app_paths.repo_path.to_string_lossy(),
                    &app_paths.work_path,
                )?;
                msgs.push(format!(
                    "created empty working copy at {}",
                    app_paths.work_path.display()
                ));
            }
        }

        let info = build_info(store.config(), name).ok_or_else(|| QuayError::NotFound {
            name: name.to_string(),
        })?;
        Ok((msgs, info))
    }

    /// Stop, delete storage, deregister. Both the filesystem deletion and
    /// the config rewrite must complete for success.
    pub async fn remove(&self, name: &str) -> Result<String, QuayError> {
        if name == RESERVED_WEB_ID {
            return Err(QuayError::Protected { name: name.into() });
        }
        {
            let store = self.store.lock().await;
            if !store.config().apps.contains_key(name) {
                return Err(QuayError::NotFound { name: name.into() });
            }
        }
        // A not-running app stops as a structured no-op, so any error here
        // is a real supervisor failure and aborts the removal.
        self.stop(name).await?;

        let mut store = self.store.lock().await;
        let root = store.config().root.clone();
        let app_paths = paths::app_paths(&root, name);
        remove_path(&app_paths.repo_path).await?;
        remove_path(&app_paths.work_path).await?;
        store.config_mut().apps.remove(name);
        store.save()?;
        Ok(format!("deleted app: {name}"))
    }

    pub async fn start(&self, name: &str) -> Result<String, QuayError> {
        let (info, global) = {
            let store = self.store.lock().await;
            let info = build_info(store.config(), name).ok_or_else(|| QuayError::NotFound {
                name: name.to_string(),
            })?;
            (info, store.config().clone())
        };
        if !info.script.exists() {
            return Err(QuayError::NoScript {
                name: name.into(),
                script: info.script,
            });
        }
        if !self.live_instances(name).await?.is_empty() {
            return Err(QuayError::AlreadyRunning { name: name.into() });
        }
        self.supervisor.start(prepare_config(&info, &global)).await?;
        let port = info
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown port".into());
        Ok(format!("{name} running on {port}"))
    }

    /// Stop then delete every live instance. Not running is a no-op
    /// success, not an error.
    pub async fn stop(&self, name: &str) -> Result<String, QuayError> {
        {
            let store = self.store.lock().await;
            if build_info(store.config(), name).is_none() {
                return Err(QuayError::NotFound { name: name.into() });
            }
        }
        let live = self.live_instances(name).await?;
        if live.is_empty() {
            return Ok(format!("{name} is not running."));
        }
        // Instances fan out; each instance's stop and delete stay ordered.
        let results = join_all(live.iter().map(|inst| async move {
            self.supervisor.stop_instance(inst.id).await?;
            self.supervisor.delete_instance(inst.id).await
        }))
        .await;
        for result in results {
            result?;
        }
        Ok(counted_message(name, "stopped", live.len()))
    }

    pub async fn restart(&self, name: &str) -> Result<String, QuayError> {
        {
            let store = self.store.lock().await;
            if build_info(store.config(), name).is_none() {
                return Err(QuayError::NotFound { name: name.into() });
            }
        }
        let live = self.live_instances(name).await?;
        if live.is_empty() {
            return Err(QuayError::NotRunning { name: name.into() });
        }
        let results = join_all(
            live.iter()
                .map(|inst| self.supervisor.restart_instance(inst.id)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(counted_message(name, "restarted", live.len()))
    }

    pub async fn start_all(&self) -> Result<Vec<String>, QuayError> {
        let names = self.registered_names().await;
        join_all(names.iter().map(|n| self.start(n)))
            .await
            .into_iter()
            .collect()
    }

    pub async fn stop_all(&self) -> Result<Vec<String>, QuayError> {
        let names = self.registered_names().await;
        join_all(names.iter().map(|n| self.stop(n)))
            .await
            .into_iter()
            .collect()
    }

    /// One supervisor query; restarts only instances whose reported name
    /// belongs to a registered app, skipping orphans.
    pub async fn restart_all(&self) -> Result<Vec<String>, QuayError> {
        let names: BTreeSet<String> = self.registered_names().await.into_iter().collect();
        let targets: Vec<ProcessInstance> = self
            .supervisor
            .get_monitor_data()
            .await
            .map_err(QuayError::from)?
            .into_iter()
            .filter(|inst| names.contains(&inst.name))
            .collect();
        let results = join_all(
            targets
                .iter()
                .map(|inst| self.supervisor.restart_instance(inst.id)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(targets
            .iter()
            .map(|inst| format!("instance of {} restarted", inst.name))
            .collect())
    }

    /// Every registered app with its live instances and broken flag.
    pub async fn list(&self) -> Result<Vec<AppInfo>, QuayError> {
        let cfg = {
            let store = self.store.lock().await;
            store.config().clone()
        };
        if cfg.apps.is_empty() {
            return Ok(Vec::new());
        }
        let monitor = self.supervisor.get_monitor_data().await?;
        Ok(cfg
            .apps
            .keys()
            .filter_map(|name| {
                let mut info = build_info(&cfg, name)?;
                info.instances = monitor
                    .iter()
                    .filter(|inst| inst.name == *name && inst.status.is_live())
                    .cloned()
                    .collect();
                Some(info)
            })
            .collect())
    }

    /// Reconcile the root tree with the config: removes strays in the root
    /// itself, unregistered workdirs and unregistered or misnamed repos.
    /// The three scans proceed independently.
    pub async fn prune(&self) -> Result<Vec<PathBuf>, QuayError> {
        let (root, names) = {
            let store = self.store.lock().await;
            let cfg = store.config();
            (
                cfg.root.clone(),
                cfg.apps.keys().cloned().collect::<BTreeSet<String>>(),
            )
        };
        let apps_names = names.clone();
        let repos_names = names;
        let (root_removed, apps_removed, repos_removed) = tokio::join!(
            prune_dir(root.clone(), |f| f == "apps" || f == "repos"),
            prune_dir(root.join("apps"), move |f| apps_names.contains(f)),
            prune_dir(root.join("repos"), move |f| {
                f.strip_suffix(".git")
                    .is_some_and(|base| repos_names.contains(base))
            }),
        );
        let mut pruned = root_removed?;
        pruned.extend(apps_removed?);
        pruned.extend(repos_removed?);
        Ok(pruned)
    }

    /// Re-render and reinstall the push hook for every registered app that
    /// has a repo on disk. Returns the updated names.
    pub async fn update_hooks(&self) -> Result<Vec<String>, QuayError> {
        let store = self.store.lock().await;
        let cfg = store.config();
        let mut updated = Vec::new();
        for name in cfg.apps.keys() {
            let app_paths = paths::app_paths(&cfg.root, name);
            if app_paths.repo_path.is_dir() {
                hook::install(&app_paths.repo_path, &cfg.root, name)?;
                updated.push(name.clone());
            }
        }
        Ok(updated)
    }

    /// Pure read; absent means unregistered (callers use presence to
    /// decide `NotFound`).
    pub async fn get_app_info(&self, name: &str) -> Option<AppInfo> {
        let store = self.store.lock().await;
        build_info(store.config(), name)
    }

    pub async fn get_config(&self) -> GlobalConfig {
        self.store.lock().await.config().clone()
    }

    /// Re-read the config file, picking up external edits.
    pub async fn reload_config(&self) -> Result<GlobalConfig, QuayError> {
        let mut store = self.store.lock().await;
        Ok(store.reload()?.clone())
    }

    async fn registered_names(&self) -> Vec<String> {
        let store = self.store.lock().await;
        store.config().apps.keys().cloned().collect()
    }

    async fn live_instances(&self, name: &str) -> Result<Vec<ProcessInstance>, QuayError> {
        let list = self.supervisor.get_monitor_data().await?;
        Ok(list
            .into_iter()
            .filter(|inst| inst.name == name && inst.status.is_live())
            .collect())
    }
}

fn counted_message(name: &str, verb: &str, count: usize) -> String {
    if count > 1 {
        format!("{name} {verb}. ({count} instances)")
    } else {
        format!("{name} {verb}.")
    }
}

fn build_info(cfg: &GlobalConfig, name: &str) -> Option<AppInfo> {
    if name == RESERVED_WEB_ID {
        return Some(dashboard_info(cfg));
    }
    let options = cfg.apps.get(name)?.clone();
    let app_paths = paths::app_paths(&cfg.root, name);
    let script = resolve_script(&app_paths.work_path, &options, &cfg.default_script);
    let port = options.port.or_else(|| sniff_port(&script));
    let broken = (options.remote.is_none() && !app_paths.repo_path.exists())
        || !app_paths.work_path.exists();
    Some(AppInfo {
        name: name.to_string(),
        repo_path: Some(app_paths.repo_path),
        work_path: app_paths.work_path,
        config: options,
        script,
        port,
        instances: Vec::new(),
        broken,
    })
}

/// The dashboard lives at a fixed internal path, never under repos/apps.
fn dashboard_info(cfg: &GlobalConfig) -> AppInfo {
    let work_path = paths::dashboard_dir();
    AppInfo {
        name: RESERVED_WEB_ID.to_string(),
        repo_path: None,
        script: work_path.join("app.js"),
        port: Some(cfg.web.port.unwrap_or(19999)),
        work_path,
        config: AppOptions::default(),
        instances: Vec::new(),
        broken: false,
    }
}

/// Expand `owner/repo` shorthand into a full GitHub URL; anything else is
/// taken as-is.
pub fn expand_remote(remote: &str) -> String {
    let mut parts = remote.splitn(2, '/');
    let (owner, repo) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
    let shorthand = !owner.is_empty()
        && !repo.is_empty()
        && !repo.contains('/')
        && [owner, repo].iter().all(|s| {
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if shorthand {
        format!("https://github.com/{owner}/{repo}.git")
    } else {
        remote.to_string()
    }
}

/// Entry-point resolution: explicit config script, else the working copy's
/// `package.json` main, else the global default. Bare names gain a `.js`
/// extension; directories resolve to their `index.js`.
fn resolve_script(work_path: &Path, options: &AppOptions, default_script: &str) -> PathBuf {
    let main = options.script.clone().or_else(|| package_main(work_path));
    let Some(main) = main else {
        return work_path.join(default_script);
    };
    if main.ends_with(".js") {
        return work_path.join(main);
    }
    let candidate = work_path.join(&main);
    if candidate.is_dir() {
        candidate.join("index.js")
    } else if candidate.exists() {
        candidate
    } else {
        work_path.join(format!("{main}.js"))
    }
}

fn package_main(work_path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(work_path.join("package.json")).ok()?;
    let pkg: Value = serde_json::from_str(&raw).ok()?;
    pkg.get("main")?.as_str().map(str::to_string)
}

/// Best-effort scan of the entry-point source for a `listen(<port>)` call,
/// resolving either a literal or a same-named variable assigned elsewhere
/// in the file. Heuristic, never authoritative.
fn sniff_port(script: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(script).ok()?;
    let literal = Regex::new(r"\.listen\(\D*(\d{4,5})\D*\)").ok()?;
    if let Some(caps) = literal.captures(&content) {
        return caps[1].parse().ok();
    }
    let variable = Regex::new(r"\.listen\(\s*([A-Za-z_$][A-Za-z0-9_$]*)").ok()?;
    let var = variable.captures(&content)?;
    let assignment = Regex::new(&format!(
        r"{}\s*=\D*(\d{{4,5}})\D",
        regex::escape(&var[1])
    ))
    .ok()?;
    assignment.captures(&content)?[1].parse().ok()
}

/// Merge app options, global env defaults and global restart constraints
/// into the supervisor start request, stripping control-only keys.
fn prepare_config(info: &AppInfo, global: &GlobalConfig) -> StartConfig {
    let mut env = BTreeMap::new();
    env.insert(
        "NODE_ENV".to_string(),
        info.config
            .node_env
            .clone()
            .or_else(|| global.node_env.clone())
            .unwrap_or_else(|| "development".to_string()),
    );
    if let Some(port) = info.config.port {
        env.insert("PORT".to_string(), port.to_string());
    }
    for (key, value) in &global.env {
        env.insert(key.clone(), value.clone());
    }
    let options = info
        .config
        .extra
        .iter()
        .filter(|(key, _)| !CONTROL_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    StartConfig {
        name: info.name.clone(),
        script: info.script.clone(),
        env,
        min_uptime: info.config.min_uptime.or(global.min_uptime),
        max_restarts: info.config.max_restarts.or(global.max_restarts),
        options,
    }
}

async fn remove_path(path: &Path) -> Result<(), QuayError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn prune_dir<F>(dir: PathBuf, keep: F) -> Result<Vec<PathBuf>, QuayError>
where
    F: Fn(&str) -> bool,
{
    let mut removed = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if keep(&file_name) {
            continue;
        }
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        removed.push(path);
    }
    Ok(removed)
}
