use crate::traits::{KvStore, Notifier, ToolInvoker};
use aiops_common::{Error, Result};
use aiops_types::{ApprovalStatus, PendingApproval, ReplyTarget, RiskLevel};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const REDIS_KEY_PREFIX: &str = "approval:";

/// What happened to a pending approval, delivered back to whoever is waiting
/// on it (normally the executor resuming a halted playbook run).
#[derive(Clone, Debug)]
pub enum ApprovalOutcome {
    Executed { output: String },
    ExecutionFailed { error: String },
    Rejected,
    Expired,
}

type ResumeCallback = Arc<dyn Fn(ApprovalOutcome) -> BoxFuture<'static, ()> + Send + Sync>;

/// TTL-bound, CAS-atomic store for human-in-the-loop tool authorization.
///
/// The durable `PendingApproval` record lives in the KV store so any process
/// replica can answer a chat reply; the resumption callback is in-process
/// state, since only the executor that created the run can resume it.
pub struct ApprovalManager {
    kv: Arc<dyn KvStore>,
    notifier: Arc<dyn Notifier>,
    tool_invoker: Arc<dyn ToolInvoker>,
    default_timeout_seconds: u64,
    callbacks: Mutex<HashMap<Uuid, ResumeCallback>>,
}

fn approve_regex() -> Regex {
    Regex::new(r"(?i)\b(?:approve|yes|confirm)\s+([0-9a-f]{8})\b").unwrap()
}

fn reject_regex() -> Regex {
    Regex::new(r"(?i)\b(?:reject|no|cancel)\s+([0-9a-f]{8})\b").unwrap()
}

impl ApprovalManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        notifier: Arc<dyn Notifier>,
        tool_invoker: Arc<dyn ToolInvoker>,
        default_timeout_seconds: u64,
    ) -> Self {
        Self { kv, notifier, tool_invoker, default_timeout_seconds, callbacks: Mutex::new(HashMap::new()) }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn request<F, Fut>(
        &self,
        tool_name: impl Into<String>,
        tool_params: Map<String, Value>,
        risk_level: RiskLevel,
        description: impl Into<String>,
        requested_by: impl Into<String>,
        reply_target: ReplyTarget,
        playbook_run_id: Option<Uuid>,
        on_resolved: F,
    ) -> Result<Uuid>
    where
        F: Fn(ApprovalOutcome) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now();
        let approval = PendingApproval {
            approval_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            tool_params,
            risk_level,
            description: description.into(),
            requested_by: requested_by.into(),
            reply_target,
            requested_at: now,
            expires_at: now + chrono::Duration::seconds(self.default_timeout_seconds as i64),
            playbook_run_id,
            incident_id: None,
            status: ApprovalStatus::Pending,
        };

        let key = format!("{REDIS_KEY_PREFIX}{}", approval.approval_id);
        let payload = serde_json::to_string(&approval)?;
        self.kv.setex(&key, &payload, self.default_timeout_seconds).await?;

        self.callbacks
            .lock()
            .insert(approval.approval_id, Arc::new(move |outcome| Box::pin(on_resolved(outcome))));

        let risk_label = match approval.risk_level {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        aiops_common::metrics::approval_requested(risk_label);

        let message = approval.approval_message();
        if let Err(err) = self.notifier.notify(&approval.reply_target, &message).await {
            tracing::warn!(error = %err, "failed to notify approval request");
        }

        Ok(approval.approval_id)
    }

    /// Parses a chat reply. Returns `Ok(None)` when the text carries no
    /// approve/reject instruction (an unrelated message, not an error).
    pub async fn process_reply(&self, text: &str, reply_target: &ReplyTarget) -> Result<Option<String>> {
        let (short_handle, approve) = if let Some(caps) = approve_regex().captures(text) {
            (caps[1].to_ascii_lowercase(), true)
        } else if let Some(caps) = reject_regex().captures(text) {
            (caps[1].to_ascii_lowercase(), false)
        } else {
            return Ok(None);
        };

        let Some(approval) = self.find_pending_by_short_handle(&short_handle).await? else {
            return Ok(Some("no pending approval found for that handle".to_string()));
        };

        if approval.reply_target != *reply_target {
            return Err(Error::AuthorizationDenied(
                "reply did not originate from the approval's target channel".to_string(),
            ));
        }

        if approve {
            Ok(Some(self.execute_approval(approval).await?))
        } else {
            Ok(Some(self.reject_approval(approval).await?))
        }
    }

    /// Scans the KV store for pending approvals whose handle begins with
    /// `short_handle`, in lexicographic order of the full `approval_id` — the
    /// documented, deterministic tie-break for short-handle collisions.
    async fn find_pending_by_short_handle(&self, short_handle: &str) -> Result<Option<PendingApproval>> {
        let mut keys = self.kv.scan(REDIS_KEY_PREFIX).await?;
        keys.sort();
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else { continue };
            let approval: PendingApproval = serde_json::from_str(&raw)?;
            if approval.status == ApprovalStatus::Pending && approval.short_handle() == short_handle {
                return Ok(Some(approval));
            }
        }
        Ok(None)
    }

    async fn cas_status(&self, approval: &PendingApproval, new_status: ApprovalStatus) -> Result<PendingApproval> {
        let key = format!("{REDIS_KEY_PREFIX}{}", approval.approval_id);
        let expected = serde_json::to_string(approval)?;
        let mut updated = approval.clone();
        updated.status = new_status;
        let new_payload = serde_json::to_string(&updated)?;
        let ttl = (approval.expires_at - Utc::now()).num_seconds().max(1) as u64;
        let swapped = self.kv.cas(&key, &expected, &new_payload, ttl).await?;
        if !swapped {
            return Err(Error::PreconditionViolated(
                "approval was concurrently modified by another reply".to_string(),
            ));
        }
        Ok(updated)
    }

    async fn execute_approval(&self, approval: PendingApproval) -> Result<String> {
        let approved = self.cas_status(&approval, ApprovalStatus::Approved).await?;

        let outcome = match self.tool_invoker.call(&approved.tool_name, &approved.tool_params).await {
            Ok(output) => {
                let _ = self.cas_status(&approved, ApprovalStatus::Executed).await;
                aiops_common::metrics::approval_resolved("executed");
                let result_message = format!("approved and executed: {}", aiops_types::truncate(&output, 800));
                (ApprovalOutcome::Executed { output }, result_message)
            }
            Err(err) => {
                let _ = self.cas_status(&approved, ApprovalStatus::ExecutionFailed).await;
                aiops_common::metrics::approval_resolved("execution_failed");
                let message = format!("approved, but execution failed: {err}");
                (ApprovalOutcome::ExecutionFailed { error: err.to_string() }, message)
            }
        };

        self.notify_callback(approval.approval_id, outcome.0).await;
        Ok(outcome.1)
    }

    async fn reject_approval(&self, approval: PendingApproval) -> Result<String> {
        self.cas_status(&approval, ApprovalStatus::Rejected).await?;
        aiops_common::metrics::approval_resolved("rejected");
        self.notify_callback(approval.approval_id, ApprovalOutcome::Rejected).await;
        Ok("rejected".to_string())
    }

    /// Sweeps the store for pending approvals whose TTL has elapsed and
    /// marks them expired, notifying whoever is waiting on them. Intended to
    /// run periodically, alongside the watchloop.
    pub async fn expire_sweep(&self) -> Result<usize> {
        let mut keys = self.kv.scan(REDIS_KEY_PREFIX).await?;
        keys.sort();
        let mut expired = 0;
        let now = Utc::now();
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else { continue };
            let approval: PendingApproval = serde_json::from_str(&raw)?;
            if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
                if self.cas_status(&approval, ApprovalStatus::Expired).await.is_ok() {
                    aiops_common::metrics::approval_resolved("expired");
                    self.notify_callback(approval.approval_id, ApprovalOutcome::Expired).await;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    async fn notify_callback(&self, approval_id: Uuid, outcome: ApprovalOutcome) {
        let callback = self.callbacks.lock().remove(&approval_id);
        if let Some(callback) = callback {
            callback(outcome).await;
        }
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingApproval>> {
        let mut keys = self.kv.scan(REDIS_KEY_PREFIX).await?;
        keys.sort();
        let mut out = Vec::new();
        for key in keys {
            if let Some(raw) = self.kv.get(&key).await? {
                let approval: PendingApproval = serde_json::from_str(&raw)?;
                if approval.status == ApprovalStatus::Pending {
                    out.push(approval);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryKvStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingNotifier {
        messages: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _target: &ReplyTarget, message: &str) -> Result<()> {
            self.messages.lock().await.push(message.to_string());
            Ok(())
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolInvoker for EchoTool {
        async fn call(&self, tool_name: &str, _params: &Map<String, Value>) -> Result<String> {
            Ok(format!("ran {tool_name}"))
        }
    }

    fn manager() -> (Arc<ApprovalManager>, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let notifier = Arc::new(RecordingNotifier { messages: AsyncMutex::new(Vec::new()) });
        let manager = Arc::new(ApprovalManager::new(kv.clone(), notifier, Arc::new(EchoTool), 300));
        (manager, kv)
    }

    #[tokio::test]
    async fn approve_executes_tool_and_fires_callback() {
        let (manager, _kv) = manager();
        let target = ReplyTarget::new("slack", "c1");
        let resumed = Arc::new(AtomicBool::new(false));
        let resumed2 = Arc::clone(&resumed);

        let approval_id = manager
            .request("k8s_restart_pod", Map::new(), RiskLevel::Medium, "restart api-7", "auto", target.clone(), None, move |outcome| {
                let resumed = Arc::clone(&resumed2);
                async move {
                    assert!(matches!(outcome, ApprovalOutcome::Executed { .. }));
                    resumed.store(true, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        let handle = approval_id.simple().to_string()[..8].to_string();
        let reply = manager.process_reply(&format!("approve {handle}"), &target).await.unwrap();
        assert!(reply.unwrap().contains("executed"));
        assert!(resumed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reject_short_circuits_without_executing() {
        let (manager, _kv) = manager();
        let target = ReplyTarget::new("slack", "c1");
        let rejected = Arc::new(AtomicBool::new(false));
        let rejected2 = Arc::clone(&rejected);

        let approval_id = manager
            .request("k8s_rollback_deployment", Map::new(), RiskLevel::High, "rollback api", "auto", target.clone(), None, move |outcome| {
                let rejected = Arc::clone(&rejected2);
                async move {
                    assert!(matches!(outcome, ApprovalOutcome::Rejected));
                    rejected.store(true, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        let handle = approval_id.simple().to_string()[..8].to_string();
        let reply = manager.process_reply(&format!("reject {handle}"), &target).await.unwrap();
        assert_eq!(reply.unwrap(), "rejected");
        assert!(rejected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reply_from_wrong_target_is_denied() {
        let (manager, _kv) = manager();
        let target = ReplyTarget::new("slack", "c1");
        let other = ReplyTarget::new("slack", "c2");

        let approval_id = manager
            .request("k8s_restart_pod", Map::new(), RiskLevel::Medium, "d", "auto", target, None, |_| async {})
            .await
            .unwrap();

        let handle = approval_id.simple().to_string()[..8].to_string();
        let result = manager.process_reply(&format!("approve {handle}"), &other).await;
        assert!(matches!(result, Err(Error::AuthorizationDenied(_))));
    }

    #[tokio::test]
    async fn unrelated_text_returns_none() {
        let (manager, _kv) = manager();
        let target = ReplyTarget::new("slack", "c1");
        let result = manager.process_reply("just chatting", &target).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn expiry_prevents_later_approval() {
        let (manager, _kv) = manager();
        let target = ReplyTarget::new("slack", "c1");
        let expired_flag = Arc::new(AtomicBool::new(false));
        let expired_flag2 = Arc::clone(&expired_flag);

        let approval_id = manager
            .request("k8s_restart_pod", Map::new(), RiskLevel::Medium, "d", "auto", target.clone(), None, move |outcome| {
                let expired_flag = Arc::clone(&expired_flag2);
                async move {
                    assert!(matches!(outcome, ApprovalOutcome::Expired));
                    expired_flag.store(true, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        // Force immediate expiry by rewriting the stored record's expires_at.
        let kv2 = manager.kv.clone();
        let key = format!("{REDIS_KEY_PREFIX}{approval_id}");
        if let Some(raw) = kv2.get(&key).await.unwrap() {
            let mut approval: PendingApproval = serde_json::from_str(&raw).unwrap();
            approval.expires_at = Utc::now() - chrono::Duration::seconds(1);
            kv2.setex(&key, &serde_json::to_string(&approval).unwrap(), 300).await.unwrap();
        }

        manager.expire_sweep().await.unwrap();

        let handle = approval_id.simple().to_string()[..8].to_string();
        let reply = manager.process_reply(&format!("approve {handle}"), &target).await.unwrap();
        assert_eq!(reply.unwrap(), "no pending approval found for that handle");
        assert!(expired_flag.load(Ordering::SeqCst));
    }
}
