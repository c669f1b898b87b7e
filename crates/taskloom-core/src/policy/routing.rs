//! Task routing: which worker type a new task is meant for.
//!
//! Rules are checked in a fixed order and the first match wins:
//! 1. `area` matches a configured area pattern
//! 2. `owner_role` has a configured worker type
//! 3. `priority` reaches the escalation threshold
//! 4. `task_code` starts with a configured prefix
//! 5. the default worker type
//!
//! `route` has no side effects. The trace id is supplied by the caller, so
//! replaying the same input with the same trace id reproduces the decision
//! exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{NewTask, RouteRule, Routing, TraceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaRoute {
    /// Exact area (`ci/exchange`), a subtree (`ci` matches `ci/exchange`),
    /// or a prefix glob ending in `*` (`ci/ex*`).
    pub pattern: String,
    pub worker_type: String,
}

impl AreaRoute {
    pub fn matches(&self, area: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => area.starts_with(prefix),
            None => {
                area == self.pattern
                    || area
                        .strip_prefix(self.pattern.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRoute {
    pub prefix: String,
    pub worker_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRules {
    pub area_routes: Vec<AreaRoute>,
    pub role_routes: BTreeMap<String, String>,
    pub high_priority_threshold: Option<i32>,
    pub escalation_worker_type: String,
    pub prefix_routes: Vec<PrefixRoute>,
    pub default_worker_type: String,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            area_routes: Vec::new(),
            role_routes: BTreeMap::new(),
            high_priority_threshold: None,
            escalation_worker_type: "escalation".to_string(),
            prefix_routes: Vec::new(),
            default_worker_type: "general".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingEngine {
    rules: RoutingRules,
}

impl RoutingEngine {
    pub fn new(rules: RoutingRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    pub fn route(&self, task: &NewTask, trace_id: TraceId) -> Routing {
        let (worker_type, rule, decision) = self.decide(task);
        Routing {
            worker_type,
            rule,
            decision,
            trace_id,
        }
    }

    fn decide(&self, task: &NewTask) -> (String, RouteRule, String) {
        if let Some(area) = task.area.as_deref() {
            if let Some(route) = self.rules.area_routes.iter().find(|r| r.matches(area)) {
                return (
                    route.worker_type.clone(),
                    RouteRule::Area,
                    format!("area {area} matched {}", route.pattern),
                );
            }
        }

        if let Some(worker_type) = self.rules.role_routes.get(&task.owner_role) {
            return (
                worker_type.clone(),
                RouteRule::OwnerRole,
                format!("owner_role {} mapped", task.owner_role),
            );
        }

        if let Some(threshold) = self.rules.high_priority_threshold {
            if task.priority >= threshold {
                return (
                    self.rules.escalation_worker_type.clone(),
                    RouteRule::Priority,
                    format!("priority {} >= {threshold}", task.priority),
                );
            }
        }

        if let Some(route) = self
            .rules
            .prefix_routes
            .iter()
            .find(|r| task.task_code.starts_with(&r.prefix))
        {
            return (
                route.worker_type.clone(),
                RouteRule::TaskCodePrefix,
                format!("task_code {} has prefix {}", task.task_code, route.prefix),
            );
        }

        (
            self.rules.default_worker_type.clone(),
            RouteRule::Default,
            "no rule matched".to_string(),
        )
    }
}
