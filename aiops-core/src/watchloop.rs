use crate::traits::ClusterApi;
use aiops_types::{ClusterEvent, EventType, ResourceRef, Severity};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Namespaces the watchloop never reports anomalies for.
const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Waiting-state reasons that count a pod as crash-looping.
const CRASH_REASONS: &[&str] =
    &["CrashLoopBackOff", "Error", "OOMKilled", "ImagePullBackOff", "ErrImagePull"];

type EventCallback = Arc<dyn Fn(ClusterEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type TickHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Edge-triggered dedup state: `resource_key -> first_seen_at`.
#[derive(Default)]
struct KnownIssueSet {
    issues: HashMap<String, chrono::DateTime<Utc>>,
}

impl KnownIssueSet {
    /// Returns true (and records `now`) the first time `key` is seen; false
    /// on every subsequent tick it remains present.
    fn observe(&mut self, key: &str, now: chrono::DateTime<Utc>) -> bool {
        if self.issues.contains_key(key) {
            false
        } else {
            self.issues.insert(key.to_string(), now);
            true
        }
    }

    /// Drop every known key not present in `still_failing`, returning the
    /// keys that recovered.
    fn reap(&mut self, still_failing: &std::collections::HashSet<String>, prefix: &str) -> Vec<String> {
        let recovered: Vec<String> = self
            .issues
            .keys()
            .filter(|k| k.starts_with(prefix) && !still_failing.contains(*k))
            .cloned()
            .collect();
        for k in &recovered {
            self.issues.remove(k);
        }
        recovered
    }
}

pub struct Watchloop {
    cluster: Arc<dyn ClusterApi>,
    interval: Duration,
    callback: EventCallback,
    known: Mutex<KnownIssueSet>,
    cancel: CancellationToken,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
    on_tick: Option<TickHook>,
}

impl Watchloop {
    pub fn new<F, Fut>(cluster: Arc<dyn ClusterApi>, interval: Duration, callback: F) -> Arc<Self>
    where
        F: Fn(ClusterEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            cluster,
            interval,
            callback: Arc::new(move |e| Box::pin(callback(e))),
            known: Mutex::new(KnownIssueSet::default()),
            cancel: CancellationToken::new(),
            handle: AsyncMutex::new(None),
            on_tick: None,
        })
    }

    /// Registers a hook invoked after every completed tick, whether or not
    /// it emitted any events. Used to gate readiness on the first tick
    /// rather than on the loop merely having been spawned.
    pub fn with_on_tick<F, Fut>(self: Arc<Self>, hook: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match Arc::try_unwrap(self) {
            Ok(mut watchloop) => {
                watchloop.on_tick = Some(Arc::new(move || Box::pin(hook())));
                Arc::new(watchloop)
            }
            Err(shared) => shared,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Spawns the periodic tick loop. Idempotent: a second call while
    /// already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = this.tick().await {
                            aiops_common::metrics::watchloop_tick_failed();
                            tracing::error!(error = %err, "watchloop tick failed");
                        }
                        if let Some(hook) = &this.on_tick {
                            hook().await;
                        }
                    }
                }
            }
        }));
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn tick(&self) -> aiops_common::Result<()> {
        let started = std::time::Instant::now();
        let mut emitted = 0usize;

        emitted += self.scan_pods().await?;
        emitted += self.scan_nodes().await?;
        emitted += self.scan_deployments().await?;

        aiops_common::metrics::watchloop_tick_completed(started.elapsed().as_secs_f64(), emitted);
        if emitted > 0 {
            tracing::info!(events_emitted = emitted, "watchloop_tick_complete");
        }
        Ok(())
    }

    async fn emit(&self, event: ClusterEvent) {
        (self.callback)(event).await;
    }

    async fn scan_pods(&self) -> aiops_common::Result<usize> {
        let pods = self.cluster.list_pods().await?;
        let now = Utc::now();
        let mut still_failing = std::collections::HashSet::new();
        let mut to_emit = Vec::new();

        for pod in pods {
            if SYSTEM_NAMESPACES.contains(&pod.namespace.as_str()) {
                continue;
            }
            let Some(reason) = &pod.waiting_reason else { continue };
            if !CRASH_REASONS.contains(&reason.as_str()) {
                continue;
            }
            let resource = ResourceRef::new("Pod", pod.namespace.clone(), pod.name.clone());
            let key = resource.resource_key();
            still_failing.insert(key.clone());

            let is_new = self.known.lock().observe(&key, now);
            if is_new {
                let event_type = if reason.contains("OOM") { EventType::OomKilled } else { EventType::CrashLoop };
                to_emit.push(ClusterEvent {
                    event_type,
                    severity: Severity::Critical,
                    message: format!("pod {} is {} (restarts={})", key, reason, pod.restart_count),
                    resource,
                    labels: HashMap::new(),
                    detected_at: now,
                });
            }
        }

        let recovered = self.known.lock().reap(&still_failing, "Pod/");
        for key in recovered {
            aiops_common::metrics::watchloop_recovery_detected("pod");
            tracing::info!(resource_key = %key, "pod recovered");
        }

        let emitted = to_emit.len();
        for event in to_emit {
            self.emit(event).await;
        }
        Ok(emitted)
    }

    async fn scan_nodes(&self) -> aiops_common::Result<usize> {
        let nodes = self.cluster.list_nodes().await?;
        let now = Utc::now();
        let mut still_failing = std::collections::HashSet::new();
        let mut to_emit = Vec::new();

        for node in nodes {
            if node.ready {
                continue;
            }
            let resource = ResourceRef::new("Node", "", node.name.clone());
            let key = resource.resource_key();
            still_failing.insert(key.clone());

            if self.known.lock().observe(&key, now) {
                to_emit.push(ClusterEvent {
                    event_type: EventType::NotReadyNode,
                    severity: Severity::Critical,
                    message: format!("node {} is NotReady", node.name),
                    resource,
                    labels: HashMap::new(),
                    detected_at: now,
                });
            }
        }

        let recovered = self.known.lock().reap(&still_failing, "Node/");
        for key in recovered {
            aiops_common::metrics::watchloop_recovery_detected("node");
            tracing::info!(resource_key = %key, "node recovered");
        }

        let emitted = to_emit.len();
        for event in to_emit {
            self.emit(event).await;
        }
        Ok(emitted)
    }

    async fn scan_deployments(&self) -> aiops_common::Result<usize> {
        let deployments = self.cluster.list_deployments().await?;
        let now = Utc::now();
        let mut still_failing = std::collections::HashSet::new();
        let mut to_emit = Vec::new();

        for dep in deployments {
            if SYSTEM_NAMESPACES.contains(&dep.namespace.as_str()) {
                continue;
            }
            if !(dep.desired_replicas > 0 && dep.available_replicas == 0) {
                continue;
            }
            let resource = ResourceRef::new("Deployment", dep.namespace.clone(), dep.name.clone());
            let key = resource.resource_key();
            still_failing.insert(key.clone());

            if self.known.lock().observe(&key, now) {
                to_emit.push(ClusterEvent {
                    event_type: EventType::ReplicationFailure,
                    severity: Severity::Critical,
                    message: format!("deployment {} has zero available replicas", key),
                    resource,
                    labels: HashMap::new(),
                    detected_at: now,
                });
            }
        }

        let recovered = self.known.lock().reap(&still_failing, "Deployment/");
        for key in recovered {
            aiops_common::metrics::watchloop_recovery_detected("deployment");
            tracing::info!(resource_key = %key, "deployment recovered");
        }

        let emitted = to_emit.len();
        for event in to_emit {
            self.emit(event).await;
        }
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DeploymentSnapshot, NodeSnapshot, PodSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCluster {
        pods: Mutex<Vec<PodSnapshot>>,
        nodes: Mutex<Vec<NodeSnapshot>>,
        deployments: Mutex<Vec<DeploymentSnapshot>>,
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn list_pods(&self) -> aiops_common::Result<Vec<PodSnapshot>> {
            Ok(self.pods.lock().clone())
        }
        async fn list_nodes(&self) -> aiops_common::Result<Vec<NodeSnapshot>> {
            Ok(self.nodes.lock().clone())
        }
        async fn list_deployments(&self) -> aiops_common::Result<Vec<DeploymentSnapshot>> {
            Ok(self.deployments.lock().clone())
        }
    }

    fn crashing_pod() -> PodSnapshot {
        PodSnapshot {
            namespace: "prod".into(),
            name: "api-7".into(),
            waiting_reason: Some("CrashLoopBackOff".into()),
            restart_count: 5,
        }
    }

    #[tokio::test]
    async fn emits_once_then_suppresses_then_reemits_after_recovery() {
        let cluster = Arc::new(FakeCluster {
            pods: Mutex::new(vec![crashing_pod()]),
            nodes: Mutex::new(vec![]),
            deployments: Mutex::new(vec![]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let watchloop = Watchloop::new(cluster.clone(), Duration::from_secs(30), move |_event| {
            let count = Arc::clone(&count2);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1, "second tick must not re-emit");

        cluster.pods.lock().clear();
        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1, "recovery tick emits nothing");

        cluster.pods.lock().push(crashing_pod());
        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2, "regression re-emits");
    }

    #[tokio::test]
    async fn skips_system_namespaces() {
        let cluster = Arc::new(FakeCluster {
            pods: Mutex::new(vec![PodSnapshot {
                namespace: "kube-system".into(),
                name: "coredns-1".into(),
                waiting_reason: Some("CrashLoopBackOff".into()),
                restart_count: 9,
            }]),
            nodes: Mutex::new(vec![]),
            deployments: Mutex::new(vec![]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let watchloop = Watchloop::new(cluster, Duration::from_secs(30), move |_event| {
            let count = Arc::clone(&count2);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_ready_node_emits_once() {
        let cluster = Arc::new(FakeCluster {
            pods: Mutex::new(vec![]),
            nodes: Mutex::new(vec![NodeSnapshot { name: "node-1".into(), ready: false }]),
            deployments: Mutex::new(vec![]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let watchloop = Watchloop::new(cluster, Duration::from_secs(30), move |event| {
            let count = Arc::clone(&count2);
            async move {
                assert_eq!(event.event_type, EventType::NotReadyNode);
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        watchloop.tick().await.unwrap();
        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_available_deployment_emits_replication_failure() {
        let cluster = Arc::new(FakeCluster {
            pods: Mutex::new(vec![]),
            nodes: Mutex::new(vec![]),
            deployments: Mutex::new(vec![DeploymentSnapshot {
                namespace: "prod".into(),
                name: "api".into(),
                desired_replicas: 3,
                available_replicas: 0,
            }]),
        });
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let watchloop = Watchloop::new(cluster, Duration::from_secs(30), move |event| {
            let count = Arc::clone(&count2);
            async move {
                assert_eq!(event.event_type, EventType::ReplicationFailure);
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        watchloop.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
