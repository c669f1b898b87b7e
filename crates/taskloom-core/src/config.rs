//! Broker configuration, loaded from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [lease]
//! default_lease_seconds = 300
//! sweep_interval_secs = 5
//!
//! [retry]
//! default_max_retries = 3
//! default_backoff_sec = 30
//! backoff = { kind = "exponential", multiplier = 2.0, max_delay_sec = 600 }
//!
//! [routing]
//! default_worker_type = "general"
//! area_routes = [{ pattern = "ci/exchange", worker_type = "exchange-ci" }]
//!
//! [[agents]]
//! agent_id = "qa-1"
//! owner_role = "qa"
//! capacity = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentRegistration, BrokerError, TaskDefaults, TaskTemplate};
use crate::policy::{Backoff, RoutingRules};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub template: TaskTemplate,
    pub routing: RoutingRules,
    /// Agents registered at start-up.
    pub agents: Vec<AgentRegistration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub default_lease_seconds: u32,
    pub sweep_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_lease_seconds: 300,
            sweep_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_max_retries: u32,
    pub default_backoff_sec: u64,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_backoff_sec: 30,
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Only hand out tasks whose dependencies are all DONE.
    pub gate_on_dependencies: bool,
    /// Reject `task.create` when no online agent could serve the task.
    pub eager_agent_match: bool,
}

impl BrokerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, BrokerError> {
        let config: Self = toml::from_str(text).map_err(|e| BrokerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.lease.default_lease_seconds == 0 {
            return Err(BrokerError::Config(
                "lease.default_lease_seconds must be positive".into(),
            ));
        }
        if self.lease.sweep_interval_secs == 0 {
            return Err(BrokerError::Config(
                "lease.sweep_interval_secs must be positive".into(),
            ));
        }
        if let Backoff::Exponential { multiplier, .. } = self.retry.backoff {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(BrokerError::Config(format!(
                    "retry.backoff.multiplier must be >= 1.0, got {multiplier}"
                )));
            }
        }
        if self.routing.default_worker_type.trim().is_empty() {
            return Err(BrokerError::Config(
                "routing.default_worker_type is empty".into(),
            ));
        }
        for agent in &self.agents {
            agent
                .validate()
                .map_err(|e| BrokerError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn task_defaults(&self) -> TaskDefaults {
        TaskDefaults {
            lease_seconds: self.lease.default_lease_seconds,
            max_retries: self.retry.default_max_retries,
            retry_backoff_sec: self.retry.default_backoff_sec,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lease.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TemplateField;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BrokerConfig::from_toml_str("").unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.lease.default_lease_seconds, 300);
        assert_eq!(config.retry.backoff, Backoff::Fixed);
        assert_eq!(config.template.required_fields.len(), 4);
        assert_eq!(config.routing.default_worker_type, "general");
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
            [lease]
            default_lease_seconds = 10
            sweep_interval_secs = 1

            [retry]
            default_max_retries = 5
            backoff = { kind = "exponential", multiplier = 2.0, max_delay_sec = 600 }

            [scheduler]
            gate_on_dependencies = true

            [template]
            required_fields = ["area"]

            [routing]
            high_priority_threshold = 8
            area_routes = [{ pattern = "ci/exchange", worker_type = "exchange-ci" }]
            role_routes = { security = "sec-worker" }

            [[agents]]
            agent_id = "qa-1"
            owner_role = "qa"
            capacity = 2
            allowed_tools = ["git"]
        "#;
        let config = BrokerConfig::from_toml_str(text).unwrap();

        assert_eq!(config.lease.default_lease_seconds, 10);
        assert_eq!(config.retry.default_max_retries, 5);
        assert_eq!(config.retry.default_backoff_sec, 30);
        assert!(config.scheduler.gate_on_dependencies);
        assert!(!config.scheduler.eager_agent_match);
        assert_eq!(config.template.required_fields, vec![TemplateField::Area]);
        assert_eq!(config.routing.high_priority_threshold, Some(8));
        assert_eq!(config.routing.role_routes["security"], "sec-worker");
        assert_eq!(config.agents.len(), 1);
        assert!(config.agents[0].allowed_tools.contains("git"));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_invalid_values() {
        for text in [
            "[lease]\ndefault_lease_seconds = 0",
            "[retry]\nbackoff = { kind = \"exponential\", multiplier = 0.5 }",
            "[routing]\ndefault_worker_type = \"\"",
            "[[agents]]\nagent_id = \"\"\nowner_role = \"qa\"\ncapacity = 1",
            "[lease]\ndefault_lease_seconds = \"soon\"",
        ] {
            let err = BrokerConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, BrokerError::Config(_)), "{text}");
        }
    }
}
