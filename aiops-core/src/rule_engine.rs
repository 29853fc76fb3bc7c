use aiops_types::{ClusterEvent, Rule};
use parking_lot::RwLock;
use regex::Regex;

/// Pure matcher plus a runtime-mutable rule catalogue, seeded with the
/// built-in rule set.
pub struct RuleEngine {
    rules: RwLock<Vec<Rule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: RwLock::new(Vec::new()) }
    }

    pub fn with_defaults() -> Self {
        let engine = Self::new();
        for rule in default_rules() {
            engine.add_rule(rule);
        }
        engine
    }

    pub fn add_rule(&self, rule: Rule) {
        self.rules.write().push(rule);
    }

    pub fn remove_rule(&self, id: &str) {
        self.rules.write().retain(|r| r.id != id);
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    /// Every enabled rule matching `event`, in registration order, paired
    /// with the playbook it fires.
    pub fn evaluate(&self, event: &ClusterEvent) -> Vec<(Rule, String)> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule_matches(rule, event))
            .map(|rule| (rule.clone(), rule.playbook_id.clone()))
            .collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_matches(rule: &Rule, event: &ClusterEvent) -> bool {
    if !rule.enabled {
        return false;
    }
    if rule.condition != event.event_type {
        return false;
    }
    if let Some(pattern) = &rule.namespace_filter {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&event.resource.namespace) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }
    if let Some(severity) = &rule.severity_filter {
        if *severity != event.severity {
            return false;
        }
    }
    true
}

/// The built-in remediation rules, matching the reference implementation's
/// default set one-for-one.
pub fn default_rules() -> Vec<Rule> {
    use aiops_types::{EventType, Severity};
    use std::collections::HashMap;

    vec![
        Rule {
            id: "rule-001".into(),
            name: "CrashLoop Auto-Restart".into(),
            enabled: true,
            condition: EventType::CrashLoop,
            namespace_filter: None,
            severity_filter: Some(Severity::Critical),
            playbook_id: "crash_loop_remediation".into(),
            params: HashMap::new(),
        },
        Rule {
            id: "rule-002".into(),
            name: "OOMKill Memory Increase".into(),
            enabled: true,
            condition: EventType::OomKilled,
            namespace_filter: None,
            severity_filter: Some(Severity::Critical),
            playbook_id: "oom_kill_remediation".into(),
            params: HashMap::new(),
        },
        Rule {
            id: "rule-003".into(),
            name: "NotReady Node Evacuation".into(),
            enabled: true,
            condition: EventType::NotReadyNode,
            namespace_filter: None,
            severity_filter: Some(Severity::Critical),
            playbook_id: "node_not_ready_remediation".into(),
            params: HashMap::new(),
        },
        Rule {
            id: "rule-004".into(),
            name: "Replication Failure Rollback".into(),
            enabled: true,
            condition: EventType::ReplicationFailure,
            namespace_filter: None,
            severity_filter: Some(Severity::Critical),
            playbook_id: "deployment_rollback".into(),
            params: HashMap::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{EventType, ResourceRef, Severity};
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(event_type: EventType, namespace: &str, severity: Severity) -> ClusterEvent {
        ClusterEvent {
            event_type,
            severity,
            resource: ResourceRef::new("Pod", namespace, "api-7"),
            message: "boom".into(),
            labels: HashMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn default_crash_loop_rule_fires_on_critical() {
        let engine = RuleEngine::with_defaults();
        let matches = engine.evaluate(&event(EventType::CrashLoop, "prod", Severity::Critical));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1, "crash_loop_remediation");
    }

    #[test]
    fn severity_filter_excludes_non_matching_severity() {
        let engine = RuleEngine::with_defaults();
        let matches = engine.evaluate(&event(EventType::CrashLoop, "prod", Severity::Warning));
        assert!(matches.is_empty());
    }

    #[test]
    fn disabled_rule_never_matches() {
        let engine = RuleEngine::new();
        let mut rule = default_rules().remove(0);
        rule.enabled = false;
        engine.add_rule(rule);
        let matches = engine.evaluate(&event(EventType::CrashLoop, "prod", Severity::Critical));
        assert!(matches.is_empty());
    }

    #[test]
    fn namespace_filter_is_a_regex_search() {
        let engine = RuleEngine::new();
        let mut rule = default_rules().remove(0);
        rule.namespace_filter = Some("^prod-.*".to_string());
        engine.add_rule(rule);
        assert!(engine.evaluate(&event(EventType::CrashLoop, "prod-eu", Severity::Critical)).len() == 1);
        assert!(engine.evaluate(&event(EventType::CrashLoop, "staging", Severity::Critical)).is_empty());
    }

    #[test]
    fn multiple_matching_rules_all_fire_in_registration_order() {
        let engine = RuleEngine::new();
        let mut rule_a = default_rules().remove(0);
        rule_a.id = "a".into();
        rule_a.playbook_id = "first".into();
        let mut rule_b = rule_a.clone();
        rule_b.id = "b".into();
        rule_b.playbook_id = "second".into();
        engine.add_rule(rule_a);
        engine.add_rule(rule_b);
        let matches = engine.evaluate(&event(EventType::CrashLoop, "prod", Severity::Critical));
        assert_eq!(matches.iter().map(|(_, p)| p.clone()).collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn remove_rule_drops_it_from_evaluation() {
        let engine = RuleEngine::with_defaults();
        engine.remove_rule("rule-001");
        let matches = engine.evaluate(&event(EventType::CrashLoop, "prod", Severity::Critical));
        assert!(matches.is_empty());
    }
}
