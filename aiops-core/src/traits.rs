use aiops_common::Result;
use aiops_types::ReplyTarget;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A snapshot of one pod's container waiting-state, as the watchloop needs it.
#[derive(Clone, Debug)]
pub struct PodSnapshot {
    pub namespace: String,
    pub name: String,
    pub waiting_reason: Option<String>,
    pub restart_count: u32,
}

#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    pub name: String,
    pub ready: bool,
}

#[derive(Clone, Debug)]
pub struct DeploymentSnapshot {
    pub namespace: String,
    pub name: String,
    pub desired_replicas: u32,
    pub available_replicas: u32,
}

/// The cluster read surface the watchloop polls. Opaque beyond the snapshot
/// shapes above — how a concrete implementation talks to the API server is
/// not this crate's concern.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>>;
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>>;
    async fn list_deployments(&self) -> Result<Vec<DeploymentSnapshot>>;
}

/// Opaque tool execution. The core never introspects what a tool does.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call(&self, tool_name: &str, params: &Map<String, Value>) -> Result<String>;
}

/// Delivers a human-readable message to a reply target (a chat channel).
/// Errors are logged by callers and never propagated further.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &ReplyTarget, message: &str) -> Result<()>;
}

/// Key-value store with TTL and compare-and-set, backing the approval store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn setex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;
    /// Atomically replace `key`'s value with `new` iff the current value
    /// equals `expected`. Returns whether the swap happened.
    async fn cas(&self, key: &str, expected: &str, new: &str, ttl_seconds: u64) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Durable append-only sink for normalized cluster/alert events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &aiops_types::ClusterEvent) -> Result<()>;
}

/// Incident context passed into playbook template resolution: a flattened
/// string map derived from the triggering event.
pub fn context_from_event(event: &aiops_types::ClusterEvent) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("kind".to_string(), event.resource.kind.clone());
    ctx.insert("namespace".to_string(), event.resource.namespace.clone());
    ctx.insert("name".to_string(), event.resource.name.clone());
    ctx.insert("pod".to_string(), event.resource.name.clone());
    ctx.insert("node".to_string(), event.resource.name.clone());
    ctx.insert("deployment".to_string(), event.resource.name.clone());
    ctx.insert("message".to_string(), event.message.clone());
    ctx.insert("severity".to_string(), event.severity.to_string());
    for (k, v) in &event.labels {
        ctx.entry(k.clone()).or_insert_with(|| v.clone());
    }
    ctx
}
