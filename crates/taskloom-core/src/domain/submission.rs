//! Task submissions: the raw `task.create` payload and its validated form.
//!
//! Submitters historically sent the task code as either `TaskCode` or
//! `task_code`. Both are accepted here and nothing past [`TaskSubmission::validate`]
//! sees the difference.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::BrokerError;

/// Raw `task.create` input. Every field is optional so that a missing field is
/// reported as `invalid_task_template` rather than a decode error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    #[serde(alias = "TaskCode")]
    pub task_code: Option<String>,
    pub owner_role: Option<String>,
    pub instructions: Option<String>,
    pub area: Option<String>,
    pub how_to_repro: Option<String>,
    pub expected: Option<String>,
    pub evidence_requirements: Option<String>,
    pub priority: Option<i32>,
    #[serde(alias = "lease_seconds")]
    pub timeout_seconds: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_backoff_sec: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Pin the task to one agent.
    pub agent_id: Option<String>,
}

/// Template-mandated fields, on top of the always-required
/// task_code, owner_role and instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateField {
    Area,
    HowToRepro,
    Expected,
    EvidenceRequirements,
}

impl TemplateField {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateField::Area => "area",
            TemplateField::HowToRepro => "how_to_repro",
            TemplateField::Expected => "expected",
            TemplateField::EvidenceRequirements => "evidence_requirements",
        }
    }
}

impl fmt::Display for TemplateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub required_fields: Vec<TemplateField>,
}

impl Default for TaskTemplate {
    fn default() -> Self {
        Self {
            required_fields: vec![
                TemplateField::Area,
                TemplateField::HowToRepro,
                TemplateField::Expected,
                TemplateField::EvidenceRequirements,
            ],
        }
    }
}

/// Values applied when a submission leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    pub lease_seconds: u32,
    pub max_retries: u32,
    pub retry_backoff_sec: u64,
}

/// Canonical, validated task input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub task_code: String,
    pub owner_role: String,
    pub instructions: String,
    pub area: Option<String>,
    pub how_to_repro: Option<String>,
    pub expected: Option<String>,
    pub evidence_requirements: Option<String>,
    pub priority: i32,
    pub lease_seconds: u32,
    pub max_retries: u32,
    pub retry_backoff_sec: u64,
    pub dependencies: Vec<String>,
    pub required_tools: BTreeSet<String>,
    pub pinned_agent: Option<String>,
}

/// Trimmed value, or `None` when absent or blank.
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(value: &Option<String>, name: &str) -> Result<String, BrokerError> {
    present(value).ok_or_else(|| BrokerError::InvalidTaskTemplate(format!("missing field: {name}")))
}

impl TaskSubmission {
    fn template_value(&self, field: TemplateField) -> &Option<String> {
        match field {
            TemplateField::Area => &self.area,
            TemplateField::HowToRepro => &self.how_to_repro,
            TemplateField::Expected => &self.expected,
            TemplateField::EvidenceRequirements => &self.evidence_requirements,
        }
    }

    pub fn validate(
        &self,
        template: &TaskTemplate,
        defaults: TaskDefaults,
    ) -> Result<NewTask, BrokerError> {
        let task_code = required(&self.task_code, "task_code")?;
        let owner_role = required(&self.owner_role, "owner_role")?;
        let instructions = required(&self.instructions, "instructions")?;
        for field in &template.required_fields {
            required(self.template_value(*field), field.as_str())?;
        }

        let lease_seconds = self.timeout_seconds.unwrap_or(defaults.lease_seconds);
        if lease_seconds == 0 {
            return Err(BrokerError::InvalidTaskTemplate(
                "timeout_seconds must be positive".into(),
            ));
        }

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            let dep = dep.trim();
            if dep.is_empty() {
                return Err(BrokerError::InvalidTaskTemplate(
                    "empty dependency task_code".into(),
                ));
            }
            if dep == task_code {
                return Err(BrokerError::InvalidTaskTemplate(format!(
                    "task {task_code} depends on itself"
                )));
            }
            if !dependencies.iter().any(|d: &String| d == dep) {
                dependencies.push(dep.to_string());
            }
        }

        let mut required_tools = BTreeSet::new();
        for tool in &self.required_tools {
            let tool = tool.trim();
            if tool.is_empty() {
                return Err(BrokerError::InvalidTaskTemplate("empty required tool".into()));
            }
            required_tools.insert(tool.to_string());
        }

        Ok(NewTask {
            task_code,
            owner_role,
            instructions,
            area: present(&self.area),
            how_to_repro: present(&self.how_to_repro),
            expected: present(&self.expected),
            evidence_requirements: present(&self.evidence_requirements),
            priority: self.priority.unwrap_or(0),
            lease_seconds,
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_sec: self.retry_backoff_sec.unwrap_or(defaults.retry_backoff_sec),
            dependencies,
            required_tools,
            pinned_agent: present(&self.agent_id),
        })
    }
}
