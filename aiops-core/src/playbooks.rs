use aiops_types::{Playbook, PlaybookStep, ParamValue, RiskLevel};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Immutable-after-registration catalogue of playbooks.
pub struct PlaybookRegistry {
    playbooks: RwLock<HashMap<String, Playbook>>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self { playbooks: RwLock::new(HashMap::new()) }
    }

    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for playbook in default_playbooks() {
            registry.register(playbook);
        }
        registry
    }

    pub fn register(&self, playbook: Playbook) {
        self.playbooks.write().insert(playbook.id.clone(), playbook);
    }

    pub fn get(&self, id: &str) -> Option<Playbook> {
        self.playbooks.read().get(id).cloned()
    }

    pub fn list_playbooks(&self) -> Vec<Playbook> {
        self.playbooks.read().values().cloned().collect()
    }
}

impl Default for PlaybookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn step(name: &str, description: &str, risk: RiskLevel, tool: &str, params: &[(&str, &str)]) -> PlaybookStep {
    let mut params_template = IndexMap::new();
    for (k, v) in params {
        params_template.insert(k.to_string(), ParamValue::Template(v.to_string()));
    }
    PlaybookStep {
        name: name.to_string(),
        description: description.to_string(),
        risk_level: risk,
        tool_name: tool.to_string(),
        params_template,
        success_pattern: None,
    }
}

/// The built-in remediation playbooks, matching the reference implementation's
/// `_register_defaults` one-for-one, plus `scale_up_on_load` which the
/// reference implementation ships but no default rule fires automatically —
/// it exists for manual or HPA-triggered invocation.
pub fn default_playbooks() -> Vec<Playbook> {
    vec![
        Playbook {
            id: "crash_loop_remediation".into(),
            name: "Crash Loop Remediation".into(),
            description: "Diagnose and restart a crash-looping pod".into(),
            steps: vec![
                step("Describe Pod", "Gather pod status and events", RiskLevel::Low, "k8s_describe_resource", &[("kind", "Pod"), ("namespace", "{namespace}"), ("name", "{pod}")]),
                step("Fetch Recent Logs", "Retrieve recent container logs", RiskLevel::Low, "k8s_analyze_logs", &[("namespace", "{namespace}"), ("pod", "{pod}")]),
                step("Restart Pod", "Delete the pod so it is rescheduled", RiskLevel::Medium, "k8s_restart_pod", &[("namespace", "{namespace}"), ("pod", "{pod}")]),
                step("Verify Recovery", "Confirm the pod is running again", RiskLevel::Low, "k8s_get_pods", &[("namespace", "{namespace}")]),
            ],
        },
        Playbook {
            id: "oom_kill_remediation".into(),
            name: "OOM Kill Remediation".into(),
            description: "Raise memory limits after an OOM kill".into(),
            steps: vec![
                step("Get Current Limits", "Read the container's current resource limits", RiskLevel::Low, "k8s_describe_resource", &[("kind", "Pod"), ("namespace", "{namespace}"), ("name", "{pod}")]),
                step("Increase Memory Limit", "Patch the owning workload's memory limit", RiskLevel::High, "k8s_patch_resource", &[("namespace", "{namespace}"), ("name", "{deployment}"), ("patch", "{memory_patch}")]),
            ],
        },
        Playbook {
            id: "deployment_rollback".into(),
            name: "Deployment Rollback".into(),
            description: "Roll back a deployment after a replication failure".into(),
            steps: vec![
                step("Get Rollout History", "List prior revisions", RiskLevel::Low, "k8s_get_rollout_history", &[("namespace", "{namespace}"), ("deployment", "{deployment}")]),
                step("Rollback Deployment", "Revert to the previous revision", RiskLevel::High, "k8s_rollback_deployment", &[("namespace", "{namespace}"), ("deployment", "{deployment}")]),
                step("Check Rollout Status", "Confirm the rollback completed", RiskLevel::Low, "k8s_rollout_status", &[("namespace", "{namespace}"), ("deployment", "{deployment}")]),
            ],
        },
        Playbook {
            id: "node_not_ready_remediation".into(),
            name: "Node Not Ready Remediation".into(),
            description: "Evacuate and drain a NotReady node".into(),
            steps: vec![
                step("Describe Node", "Gather node conditions", RiskLevel::Low, "k8s_describe_resource", &[("kind", "Node"), ("name", "{node}")]),
                step("Cordon Node", "Mark the node unschedulable", RiskLevel::Medium, "k8s_cordon_node", &[("node", "{node}")]),
                step("Drain Node", "Evict workloads from the node", RiskLevel::High, "k8s_drain_node", &[("node", "{node}")]),
            ],
        },
        Playbook {
            id: "scale_up_on_load".into(),
            name: "Scale Up On Load".into(),
            description: "Scale a deployment up under sustained load".into(),
            steps: vec![step(
                "Scale Deployment",
                "Increase the deployment's replica count",
                RiskLevel::Medium,
                "k8s_scale_deployment",
                &[("namespace", "{namespace}"), ("deployment", "{deployment}"), ("replicas", "{target_replicas}")],
            )],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_five_playbooks() {
        let registry = PlaybookRegistry::with_defaults();
        let mut ids: Vec<_> = registry.list_playbooks().into_iter().map(|p| p.id).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "crash_loop_remediation",
                "deployment_rollback",
                "node_not_ready_remediation",
                "oom_kill_remediation",
                "scale_up_on_load",
            ]
        );
    }

    #[test]
    fn crash_loop_remediation_halts_at_first_medium_step() {
        let playbook = registry_get("crash_loop_remediation");
        assert_eq!(playbook.steps[2].risk_level, RiskLevel::Medium);
        assert_eq!(playbook.steps[0].risk_level, RiskLevel::Low);
    }

    fn registry_get(id: &str) -> Playbook {
        PlaybookRegistry::with_defaults().get(id).unwrap()
    }
}
