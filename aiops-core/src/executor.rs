use crate::approval::{ApprovalManager, ApprovalOutcome};
use crate::playbooks::PlaybookRegistry;
use crate::traits::{Notifier, ToolInvoker};
use aiops_common::{Error, Result};
use aiops_types::{truncate, Playbook, PlaybookRun, ReplyTarget, RiskLevel, RunStatus, StepOutcome, STEP_OUTPUT_TRUNCATE_LEN};
use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type CompletionHook = Arc<dyn Fn(Uuid, bool, Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Drives playbook runs to completion, halting at medium/high-risk steps
/// pending human approval and resuming when the approval resolves.
pub struct Executor {
    registry: Arc<PlaybookRegistry>,
    tool_invoker: Arc<dyn ToolInvoker>,
    approval_manager: Arc<ApprovalManager>,
    notifier: Arc<dyn Notifier>,
    auto_remediation: AtomicBool,
    runs: SyncMutex<HashMap<Uuid, PlaybookRun>>,
    on_complete: Option<CompletionHook>,
}

impl Executor {
    pub fn new(
        registry: Arc<PlaybookRegistry>,
        tool_invoker: Arc<dyn ToolInvoker>,
        approval_manager: Arc<ApprovalManager>,
        notifier: Arc<dyn Notifier>,
        auto_remediation: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            tool_invoker,
            approval_manager,
            notifier,
            auto_remediation: AtomicBool::new(auto_remediation),
            runs: SyncMutex::new(HashMap::new()),
            on_complete: None,
        })
    }

    pub fn set_auto_remediation(&self, enabled: bool) {
        self.auto_remediation.store(enabled, Ordering::SeqCst);
    }

    /// Registers a hook invoked when a run reaches a terminal state.
    /// Only callable before the executor is wrapped in further `Arc` clones
    /// that have started runs, since it mutates through an `Arc::get_mut`.
    pub fn with_on_complete<F, Fut>(self: Arc<Self>, hook: F) -> Arc<Self>
    where
        F: Fn(Uuid, bool, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        match Arc::try_unwrap(self) {
            Ok(mut executor) => {
                executor.on_complete = Some(Arc::new(move |id, success, error| Box::pin(hook(id, success, error))));
                Arc::new(executor)
            }
            Err(shared) => shared,
        }
    }

    pub fn get_run(&self, run_id: Uuid) -> Option<PlaybookRun> {
        self.runs.lock().get(&run_id).cloned()
    }

    pub async fn execute(
        self: &Arc<Self>,
        playbook_id: &str,
        incident_context: HashMap<String, String>,
        reply_target: ReplyTarget,
        requested_by: impl Into<String>,
    ) -> Result<PlaybookRun> {
        let playbook = self
            .registry
            .get(playbook_id)
            .ok_or_else(|| Error::NotFound(format!("no such playbook: {playbook_id}")))?;

        let mut run = PlaybookRun::new(playbook_id, incident_context);
        run.status = RunStatus::Running;
        let run_id = run.run_id;
        self.runs.lock().insert(run_id, run.clone());

        self.run_steps(run_id, playbook, reply_target, requested_by.into()).await?;

        Ok(self.get_run(run_id).expect("run inserted above"))
    }

    /// Effective risk level for a step, folding in the auto-remediation
    /// downgrade. HIGH is never downgraded.
    fn effective_risk(&self, risk: RiskLevel) -> RiskLevel {
        if risk == RiskLevel::Medium && self.auto_remediation.load(Ordering::SeqCst) {
            RiskLevel::Low
        } else {
            risk
        }
    }

    async fn run_steps(
        self: &Arc<Self>,
        run_id: Uuid,
        playbook: Playbook,
        reply_target: ReplyTarget,
        requested_by: String,
    ) -> Result<()> {
        loop {
            let (current_step, context) = {
                let run = self.runs.lock().get(&run_id).cloned().ok_or_else(|| Error::Internal("run vanished".into()))?;
                (run.current_step, run.incident_context.clone())
            };

            if current_step >= playbook.steps.len() {
                self.finish(run_id, RunStatus::Completed, None).await;
                return Ok(());
            }

            let step = playbook.steps[current_step].clone();
            let resolved = step.resolve_params(&context);
            let risk = self.effective_risk(step.risk_level);

            match risk {
                RiskLevel::Low => match self.tool_invoker.call(&step.tool_name, &resolved).await {
                    Ok(output) => {
                        aiops_common::metrics::step_executed(&step.tool_name, true);
                        self.append_step_output(run_id, &step.name, &output);
                        self.advance(run_id);
                        self.notify_progress(&reply_target, &step.name).await;
                    }
                    Err(err) => {
                        aiops_common::metrics::step_executed(&step.tool_name, false);
                        self.finish(run_id, RunStatus::Failed, Some(err.to_string())).await;
                        return Ok(());
                    }
                },
                RiskLevel::Medium | RiskLevel::High => {
                    self.set_status(run_id, RunStatus::AwaitingApproval);
                    let executor = Arc::clone(self);
                    let playbook_for_resume = playbook.clone();
                    let reply_target_for_resume = reply_target.clone();
                    let requested_by_for_resume = requested_by.clone();
                    let step_name = step.name.clone();

                    self.approval_manager
                        .request(
                            step.tool_name.clone(),
                            resolved,
                            risk,
                            format!("{}: {}", step.name, step.description),
                            requested_by.clone(),
                            reply_target.clone(),
                            Some(run_id),
                            move |outcome| {
                                let executor = Arc::clone(&executor);
                                let playbook = playbook_for_resume.clone();
                                let reply_target = reply_target_for_resume.clone();
                                let requested_by = requested_by_for_resume.clone();
                                let step_name = step_name.clone();
                                async move {
                                    executor
                                        .resume_after_approval(run_id, playbook, reply_target, requested_by, step_name, outcome)
                                        .await;
                                }
                            },
                        )
                        .await?;

                    return Ok(());
                }
            }
        }
    }

    async fn resume_after_approval(
        self: &Arc<Self>,
        run_id: Uuid,
        playbook: Playbook,
        reply_target: ReplyTarget,
        requested_by: String,
        step_name: String,
        outcome: ApprovalOutcome,
    ) {
        match outcome {
            ApprovalOutcome::Executed { output } => {
                self.append_step_output(run_id, &step_name, &output);
                self.advance(run_id);
                self.notify_progress(&reply_target, &step_name).await;
                let _ = self.run_steps(run_id, playbook, reply_target, requested_by).await;
            }
            ApprovalOutcome::ExecutionFailed { error } => {
                self.finish(run_id, RunStatus::Failed, Some(error)).await;
            }
            ApprovalOutcome::Rejected => {
                self.finish(run_id, RunStatus::Failed, Some("step rejected by approver".to_string())).await;
            }
            ApprovalOutcome::Expired => {
                self.finish(run_id, RunStatus::Failed, Some("approval expired".to_string())).await;
            }
        }
    }

    fn append_step_output(&self, run_id: Uuid, step_name: &str, output: &str) {
        if let Some(run) = self.runs.lock().get_mut(&run_id) {
            run.step_outputs.push(StepOutcome {
                step_name: step_name.to_string(),
                summary: truncate(output, STEP_OUTPUT_TRUNCATE_LEN),
            });
        }
    }

    fn advance(&self, run_id: Uuid) {
        if let Some(run) = self.runs.lock().get_mut(&run_id) {
            run.current_step += 1;
            run.status = RunStatus::Running;
        }
    }

    fn set_status(&self, run_id: Uuid, status: RunStatus) {
        if let Some(run) = self.runs.lock().get_mut(&run_id) {
            run.status = status;
        }
    }

    async fn finish(&self, run_id: Uuid, status: RunStatus, error: Option<String>) {
        let playbook_id = {
            let mut runs = self.runs.lock();
            let Some(run) = runs.get_mut(&run_id) else { return };
            run.status = status;
            run.error = error.clone();
            run.playbook_id.clone()
        };
        let status_label = match status {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            _ => "unknown",
        };
        aiops_common::metrics::playbook_run_finished(&playbook_id, status_label);
        if let Some(hook) = &self.on_complete {
            hook(run_id, status == RunStatus::Completed, error).await;
        }
    }

    async fn notify_progress(&self, reply_target: &ReplyTarget, step_name: &str) {
        let message = format!("step complete: {step_name}");
        if let Err(err) = self.notifier.notify(reply_target, &message).await {
            tracing::warn!(error = %err, "failed to send progress notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryKvStore;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedTool {
        calls: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolInvoker for ScriptedTool {
        async fn call(&self, tool_name: &str, _params: &Map<String, Value>) -> aiops_common::Result<String> {
            self.calls.lock().await.push(tool_name.to_string());
            Ok(format!("{tool_name}-output"))
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _target: &ReplyTarget, _message: &str) -> aiops_common::Result<()> {
            Ok(())
        }
    }

    fn harness() -> (Arc<Executor>, Arc<ScriptedTool>) {
        let registry = Arc::new(PlaybookRegistry::with_defaults());
        let tool = Arc::new(ScriptedTool { calls: AsyncMutex::new(Vec::new()) });
        let kv = Arc::new(MemoryKvStore::new());
        let notifier = Arc::new(NullNotifier);
        let approval_manager = Arc::new(ApprovalManager::new(kv, notifier.clone(), tool.clone(), 300));
        let executor = Executor::new(registry, tool.clone(), approval_manager, notifier, false);
        (executor, tool)
    }

    #[tokio::test]
    async fn halts_at_first_medium_risk_step() {
        let (executor, _tool) = harness();
        let mut ctx = HashMap::new();
        ctx.insert("namespace".to_string(), "prod".to_string());
        ctx.insert("pod".to_string(), "api-7".to_string());

        let run = executor
            .execute("crash_loop_remediation", ctx, ReplyTarget::new("slack", "c1"), "auto")
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::AwaitingApproval);
        assert_eq!(run.step_outputs.len(), 2);
        assert_eq!(run.current_step, 2);
    }

    #[tokio::test]
    async fn approval_resumes_remaining_steps_to_completion() {
        let (executor, _tool) = harness();
        let mut ctx = HashMap::new();
        ctx.insert("namespace".to_string(), "prod".to_string());
        ctx.insert("pod".to_string(), "api-7".to_string());
        let target = ReplyTarget::new("slack", "c1");

        let run = executor.execute("crash_loop_remediation", ctx, target.clone(), "auto").await.unwrap();
        let run_id = run.run_id;

        let approvals = executor.approval_manager.list_pending().await.unwrap();
        assert_eq!(approvals.len(), 1);
        let handle = approvals[0].short_handle();

        let reply = executor.approval_manager.process_reply(&format!("approve {handle}"), &target).await.unwrap();
        assert!(reply.is_some());

        let run = executor.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_outputs.len(), 4);
    }

    #[tokio::test]
    async fn reject_fails_run_without_running_later_steps() {
        let (executor, tool) = harness();
        let mut ctx = HashMap::new();
        ctx.insert("namespace".to_string(), "prod".to_string());
        ctx.insert("deployment".to_string(), "api".to_string());
        let target = ReplyTarget::new("slack", "c1");

        let run = executor.execute("deployment_rollback", ctx, target.clone(), "auto").await.unwrap();
        let run_id = run.run_id;

        let approvals = executor.approval_manager.list_pending().await.unwrap();
        let handle = approvals[0].short_handle();
        executor.approval_manager.process_reply(&format!("reject {handle}"), &target).await.unwrap();

        let run = executor.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.step_outputs.len(), 1);
        assert_eq!(tool.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn auto_remediation_downgrades_medium_but_not_high() {
        let (executor, _tool) = harness();
        executor.set_auto_remediation(true);
        let mut ctx = HashMap::new();
        ctx.insert("namespace".to_string(), "prod".to_string());
        ctx.insert("name".to_string(), "api".to_string());
        ctx.insert("deployment".to_string(), "api".to_string());
        ctx.insert("pod".to_string(), "api-7".to_string());

        let run = executor
            .execute("oom_kill_remediation", ctx, ReplyTarget::new("slack", "c1"), "auto")
            .await
            .unwrap();

        // step 1 is LOW, step 2 is HIGH: auto-remediation never downgrades HIGH.
        assert_eq!(run.status, RunStatus::AwaitingApproval);
        assert_eq!(run.current_step, 1);
    }
}
