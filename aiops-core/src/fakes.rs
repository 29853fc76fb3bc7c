//! In-memory test doubles for the external interfaces this crate consumes.
//! Used by this crate's own tests and by the standalone binary when no real
//! cluster/chat integration has been wired in (wiring an actual
//! `kube::Client`-backed `ClusterApi` is left to the deploying application).

use crate::traits::{ClusterApi, DeploymentSnapshot, NodeSnapshot, Notifier, PodSnapshot, ToolInvoker};
use aiops_common::Result;
use aiops_types::ReplyTarget;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

/// A `ClusterApi` whose snapshots are set directly by the caller, for tests
/// and for running the watchloop without a live cluster.
#[derive(Default)]
pub struct FakeClusterApi {
    pub pods: Mutex<Vec<PodSnapshot>>,
    pub nodes: Mutex<Vec<NodeSnapshot>>,
    pub deployments: Mutex<Vec<DeploymentSnapshot>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>> {
        Ok(self.pods.lock().clone())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>> {
        Ok(self.nodes.lock().clone())
    }

    async fn list_deployments(&self) -> Result<Vec<DeploymentSnapshot>> {
        Ok(self.deployments.lock().clone())
    }
}

/// A `ToolInvoker` that records every call and returns a canned success
/// string, for tests and demo runs with no real tool-execution transport.
#[derive(Default)]
pub struct ScriptedToolInvoker {
    pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedToolInvoker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedToolInvoker {
    async fn call(&self, tool_name: &str, params: &Map<String, Value>) -> Result<String> {
        self.calls.lock().push((tool_name.to_string(), params.clone()));
        Ok(format!("ok: {tool_name} invoked with {params}"))
    }
}

/// A `Notifier` that logs the message instead of delivering it to a chat
/// channel; this crate's Non-goals exclude the chat transport itself.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, target: &ReplyTarget, message: &str) -> Result<()> {
        tracing::info!(channel_type = %target.channel_type, channel_id = %target.channel_id, "{message}");
        Ok(())
    }
}

/// A `Notifier` that records messages in memory, for assertions in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(ReplyTarget, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &ReplyTarget, message: &str) -> Result<()> {
        self.messages.lock().push((target.clone(), message.to_string()));
        Ok(())
    }
}
