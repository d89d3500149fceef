//! CLI command implementations.
//!
//! Thin dispatch over [`quay::lifecycle::AppManager`]: each handler runs
//! one operation and prints its progress messages. All structured data and
//! error codes come from the library; this layer only formats.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use quay::config::{AppOptions, ConfigStore, default_config_path};
use quay::lifecycle::AppManager;
use quay::supervisor::HttpSupervisor;
use quay::webhook::{self, GatewayState};

/// Open the config store and wire the manager to the supervisor daemon
/// named in it.
pub fn build_manager(config_path: Option<PathBuf>) -> Result<AppManager> {
    let path = config_path.unwrap_or_else(default_config_path);
    let store = ConfigStore::open(path)?;
    let supervisor_url = store.config().supervisor_url.clone();
    Ok(AppManager::new(
        store,
        Arc::new(HttpSupervisor::new(supervisor_url)),
    ))
}

pub async fn cmd_create(manager: &AppManager, name: &str, options: AppOptions) -> Result<()> {
    let (msgs, info) = manager.create(name, options).await?;
    for msg in msgs {
        println!("{msg}");
    }
    if info.config.remote.is_none() {
        println!(
            "push to {} to deploy.",
            style(info.repo_path.unwrap_or_default().display()).yellow()
        );
    }
    Ok(())
}

pub async fn cmd_remove(manager: &AppManager, name: &str) -> Result<()> {
    let msg = manager.remove(name).await?;
    println!("{msg}");
    Ok(())
}

pub async fn cmd_start(manager: &AppManager, name: &str) -> Result<()> {
    println!("{}", manager.start(name).await?);
    Ok(())
}

pub async fn cmd_stop(manager: &AppManager, name: &str) -> Result<()> {
    println!("{}", manager.stop(name).await?);
    Ok(())
}

pub async fn cmd_restart(manager: &AppManager, name: &str) -> Result<()> {
    println!("{}", manager.restart(name).await?);
    Ok(())
}

pub async fn cmd_start_all(manager: &AppManager) -> Result<()> {
    for msg in manager.start_all().await? {
        println!("{msg}");
    }
    Ok(())
}

pub async fn cmd_stop_all(manager: &AppManager) -> Result<()> {
    for msg in manager.stop_all().await? {
        println!("{msg}");
    }
    Ok(())
}

pub async fn cmd_restart_all(manager: &AppManager) -> Result<()> {
    let msgs = manager.restart_all().await?;
    if msgs.is_empty() {
        println!("no running instances of registered apps.");
    }
    for msg in msgs {
        println!("{msg}");
    }
    Ok(())
}

pub async fn cmd_list(manager: &AppManager) -> Result<()> {
    let apps = manager.list().await?;
    if apps.is_empty() {
        println!("no apps registered.");
        return Ok(());
    }
    for app in apps {
        let status = if app.broken {
            style("broken").red().to_string()
        } else if app.instances.is_empty() {
            style("stopped").dim().to_string()
        } else if app.instances.len() > 1 {
            style(format!("running ({})", app.instances.len()))
                .green()
                .to_string()
        } else {
            style("running").green().to_string()
        };
        let port = app
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<18} port {}",
            style(&app.name).yellow(),
            status,
            port
        );
    }
    Ok(())
}

pub async fn cmd_prune(manager: &AppManager) -> Result<()> {
    let pruned = manager.prune().await?;
    if pruned.is_empty() {
        println!("root directory is clean.");
    } else {
        println!("pruned:");
        for path in pruned {
            println!("{}", style(path.display()).dim());
        }
    }
    Ok(())
}

pub async fn cmd_update_hooks(manager: &AppManager) -> Result<()> {
    let updated = manager.update_hooks().await?;
    println!("updated hooks for:");
    for name in updated {
        println!("{}", style(name).yellow());
    }
    Ok(())
}

pub async fn cmd_config(manager: &AppManager) -> Result<()> {
    let cfg = manager.get_config().await;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

pub async fn cmd_serve(manager: AppManager, port: Option<u16>, dev: bool) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => manager.get_config().await.web.port.unwrap_or(19999),
    };
    let state = Arc::new(GatewayState { manager });
    webhook::serve(state, port, dev).await
}
