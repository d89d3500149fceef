//! RPC façade over the external process supervisor daemon.
//!
//! The supervisor keeps application processes alive on its own; this module
//! only lists, starts, stops, deletes and restarts instances by id. The
//! [`Supervisor`] trait is the seam: production talks HTTP/JSON to the
//! daemon, tests substitute [`MemorySupervisor`]. Instance status is
//! structured rather than string-matched; transitional states the daemon
//! reports are carried verbatim in `Other`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("supervisor rejected request: {0}")]
    Rejected(String),

    #[error("no such instance: {0}")]
    UnknownInstance(u64),
}

/// Lifecycle status of one running unit, as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Other(String),
}

impl From<String> for InstanceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            _ => InstanceStatus::Other(s),
        }
    }
}

impl From<InstanceStatus> for String {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Running => "running".into(),
            InstanceStatus::Stopped => "stopped".into(),
            InstanceStatus::Other(s) => s,
        }
    }
}

impl InstanceStatus {
    /// Anything the supervisor has not confirmed stopped counts as live,
    /// including transitional states like "launching".
    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceStatus::Stopped)
    }
}

/// One running unit. A live view from the daemon, never cached across
/// calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: u64,
    pub name: String,
    pub status: InstanceStatus,
}

/// Per-app start request submitted to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConfig {
    pub name: String,
    pub script: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_uptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Remaining user options forwarded untouched.
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn get_monitor_data(&self) -> Result<Vec<ProcessInstance>, SupervisorError>;
    async fn start(&self, config: StartConfig) -> Result<(), SupervisorError>;
    async fn stop_instance(&self, id: u64) -> Result<(), SupervisorError>;
    async fn delete_instance(&self, id: u64) -> Result<(), SupervisorError>;
    async fn restart_instance(&self, id: u64) -> Result<(), SupervisorError>;
}

/// HTTP/JSON client for the already-running supervisor daemon.
pub struct HttpSupervisor {
    base: String,
    client: reqwest::Client,
}

impl HttpSupervisor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, SupervisorError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(SupervisorError::Rejected(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl Supervisor for HttpSupervisor {
    async fn get_monitor_data(&self) -> Result<Vec<ProcessInstance>, SupervisorError> {
        let resp = self.client.get(self.url("/processes")).send().await?;
        Ok(self.check(resp).await?.json().await?)
    }

    async fn start(&self, config: StartConfig) -> Result<(), SupervisorError> {
        let resp = self
            .client
            .post(self.url("/processes"))
            .json(&config)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn stop_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let resp = self
            .client
            .post(self.url(&format!("/processes/{id}/stop")))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn delete_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let resp = self
            .client
            .delete(self.url(&format!("/processes/{id}")))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn restart_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let resp = self
            .client
            .post(self.url(&format!("/processes/{id}/restart")))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }
}

/// In-memory supervisor, used by the test suite and `--dry-run` style
/// tooling. Start requests become running instances immediately; stop
/// flips status, delete removes.
#[derive(Default)]
pub struct MemorySupervisor {
    inner: std::sync::Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    instances: Vec<ProcessInstance>,
    starts: Vec<StartConfig>,
    restarts: Vec<u64>,
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configs received so far, for assertions.
    pub fn start_requests(&self) -> Vec<StartConfig> {
        self.inner.lock().unwrap().starts.clone()
    }

    /// Instance ids restarted so far, for assertions.
    pub fn restarted_ids(&self) -> Vec<u64> {
        self.inner.lock().unwrap().restarts.clone()
    }

    /// Inject an instance directly, e.g. an orphan not owned by any
    /// registered app.
    pub fn inject(&self, name: &str, status: InstanceStatus) -> u64 {
        let mut state = self.inner.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.instances.push(ProcessInstance {
            id,
            name: name.to_string(),
            status,
        });
        id
    }
}

#[async_trait]
impl Supervisor for MemorySupervisor {
    async fn get_monitor_data(&self) -> Result<Vec<ProcessInstance>, SupervisorError> {
        Ok(self.inner.lock().unwrap().instances.clone())
    }

    async fn start(&self, config: StartConfig) -> Result<(), SupervisorError> {
        let mut state = self.inner.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.instances.push(ProcessInstance {
            id,
            name: config.name.clone(),
            status: InstanceStatus::Running,
        });
        state.starts.push(config);
        Ok(())
    }

    async fn stop_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let mut state = self.inner.lock().unwrap();
        let inst = state
            .instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(SupervisorError::UnknownInstance(id))?;
        inst.status = InstanceStatus::Stopped;
        Ok(())
    }

    async fn delete_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let mut state = self.inner.lock().unwrap();
        let before = state.instances.len();
        state.instances.retain(|i| i.id != id);
        if state.instances.len() == before {
            return Err(SupervisorError::UnknownInstance(id));
        }
        Ok(())
    }

    async fn restart_instance(&self, id: u64) -> Result<(), SupervisorError> {
        let mut state = self.inner.lock().unwrap();
        if !state.instances.iter().any(|i| i.id == id) {
            return Err(SupervisorError::UnknownInstance(id));
        }
        state.restarts.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_known_and_transitional_states() {
        assert_eq!(
            InstanceStatus::from("running".to_string()),
            InstanceStatus::Running
        );
        assert_eq!(
            InstanceStatus::from("stopped".to_string()),
            InstanceStatus::Stopped
        );
        assert_eq!(
            InstanceStatus::from("launching".to_string()),
            InstanceStatus::Other("launching".into())
        );
    }

    #[test]
    fn transitional_states_count_as_live() {
        assert!(InstanceStatus::Running.is_live());
        assert!(InstanceStatus::Other("launching".into()).is_live());
        assert!(!InstanceStatus::Stopped.is_live());
    }

    #[test]
    fn status_roundtrips_through_json_verbatim() {
        let inst = ProcessInstance {
            id: 3,
            name: "foo".into(),
            status: InstanceStatus::Other("errored".into()),
        };
        let json = serde_json::to_string(&inst).unwrap();
        assert!(json.contains("\"errored\""));
        let back: ProcessInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, InstanceStatus::Other("errored".into()));
    }

    #[tokio::test]
    async fn memory_supervisor_start_stop_delete_cycle() {
        let sup = MemorySupervisor::new();
        sup.start(StartConfig {
            name: "foo".into(),
            script: PathBuf::from("/srv/apps/foo/app.js"),
            env: BTreeMap::new(),
            min_uptime: None,
            max_restarts: None,
            options: serde_json::Map::new(),
        })
        .await
        .unwrap();

        let list = sup.get_monitor_data().await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].status.is_live());

        sup.stop_instance(list[0].id).await.unwrap();
        let list = sup.get_monitor_data().await.unwrap();
        assert!(!list[0].status.is_live());

        sup.delete_instance(list[0].id).await.unwrap();
        assert!(sup.get_monitor_data().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_supervisor_rejects_unknown_ids() {
        let sup = MemorySupervisor::new();
        let err = sup.restart_instance(99).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownInstance(99)));
    }
}
