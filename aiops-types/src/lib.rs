//! Plain data model shared by every component of the control plane:
//! cluster events, rules, playbooks, runs, and pending approvals.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of anomaly a `ClusterEvent` represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CrashLoop,
    OomKilled,
    NotReadyNode,
    ReplicationFailure,
    HighRestartCount,
    AlertmanagerFiring,
    PrometheusThreshold,
}

/// Closed severity scale. Unknown values at the ingress boundary fall back to
/// `Warning` rather than rejecting the whole alert batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Warning,
    Info,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            "info" => Severity::Info,
            _ => Severity::Warning,
        })
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// A resource addressed by kind/namespace/name. Cluster-scoped resources
/// (nodes) carry an empty namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), namespace: namespace.into(), name: name.into() }
    }

    /// Deduplication identity used by the watchloop's known-issue set.
    pub fn resource_key(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}", self.kind, self.name)
        } else {
            format!("{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A normalized, edge-triggered representation of a cluster anomaly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub resource: ResourceRef,
    pub message: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub detected_at: DateTime<Utc>,
}

impl ClusterEvent {
    pub fn resource_key(&self) -> String {
        self.resource.resource_key()
    }
}

/// Condition a rule matches against. Mirrors `EventType` one-to-one; kept
/// distinct so a future rule language can add conditions `EventType` does not
/// name without touching the event model.
pub type RuleCondition = EventType;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub namespace_filter: Option<String>,
    pub severity_filter: Option<Severity>,
    pub playbook_id: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Risk level gating whether a step runs inline or requires human approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A step parameter value: either a literal JSON value, or a template string
/// containing `{placeholder}` tokens resolved from the incident context at
/// execution time. Unresolved placeholders are left literal, never an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Literal(serde_json::Value),
    Template(String),
}

impl ParamValue {
    /// Resolve against a context map, leaving unknown placeholders untouched.
    pub fn resolve(&self, context: &HashMap<String, String>) -> serde_json::Value {
        match self {
            ParamValue::Literal(v) => v.clone(),
            ParamValue::Template(tpl) => serde_json::Value::String(substitute(tpl, context)),
        }
    }
}

/// Replace every `{key}` occurrence in `tpl` found in `context`; tokens with
/// no matching key are left as-is.
pub fn substitute(tpl: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(tpl.len());
    let bytes = tpl.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = tpl[i + 1..].find('}') {
                let key = &tpl[i + 1..i + 1 + end];
                match context.get(key) {
                    Some(val) => out.push_str(val),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                i = i + 1 + end + 1;
                continue;
            }
        }
        let ch = tpl[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub tool_name: String,
    pub params_template: IndexMap<String, ParamValue>,
    pub success_pattern: Option<String>,
}

impl PlaybookStep {
    pub fn resolve_params(&self, context: &HashMap<String, String>) -> serde_json::Map<String, serde_json::Value> {
        self.params_template
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve(context)))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<PlaybookStep>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_name: String,
    pub summary: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybookRun {
    pub run_id: Uuid,
    pub playbook_id: String,
    pub incident_context: HashMap<String, String>,
    pub current_step: usize,
    pub status: RunStatus,
    pub step_outputs: Vec<StepOutcome>,
    pub error: Option<String>,
}

impl PlaybookRun {
    pub fn new(playbook_id: impl Into<String>, incident_context: HashMap<String, String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            playbook_id: playbook_id.into(),
            incident_context,
            current_step: 0,
            status: RunStatus::Pending,
            step_outputs: Vec::new(),
            error: None,
        }
    }
}

/// Where an approval request was posted and must be replied from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub channel_type: String,
    pub channel_id: String,
}

impl ReplyTarget {
    pub fn new(channel_type: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self { channel_type: channel_type.into(), channel_id: channel_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
    ExecutionFailed,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: Uuid,
    pub tool_name: String,
    pub tool_params: serde_json::Map<String, serde_json::Value>,
    pub risk_level: RiskLevel,
    pub description: String,
    pub requested_by: String,
    pub reply_target: ReplyTarget,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub playbook_run_id: Option<Uuid>,
    pub incident_id: Option<String>,
    pub status: ApprovalStatus,
}

impl PendingApproval {
    /// First 8 hex characters of `approval_id`, the handle users type in a
    /// chat reply (`approve <handle>` / `reject <handle>`).
    pub fn short_handle(&self) -> String {
        self.approval_id.simple().to_string()[..8].to_string()
    }

    pub fn approval_message(&self) -> String {
        let emoji = match self.risk_level {
            RiskLevel::Low => "",
            RiskLevel::Medium => "",
            RiskLevel::High => "[HIGH RISK] ",
        };
        format!(
            "{emoji}Approval required: {desc}\ntool: {tool}\nreply `approve {handle}` or `reject {handle}`",
            emoji = emoji,
            desc = self.description,
            tool = self.tool_name,
            handle = self.short_handle(),
        )
    }
}

/// Truncate step output/tool output to the fixed length the executor records.
pub const STEP_OUTPUT_TRUNCATE_LEN: usize = 600;

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}
