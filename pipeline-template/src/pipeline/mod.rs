// Resolved pipeline models
// The graph the composers build from evaluated template tokens

pub mod compose;
pub mod container;
pub mod job;
pub mod names;
pub mod stage;
pub mod steps;
pub mod strategy;
pub mod triggers;
pub mod variables;

pub use compose::{load_pipeline, load_pipeline_with_parameters};
pub use job::parse_jobs;
pub use names::DEFAULT_NAME;
pub use stage::parse_stages;
pub use steps::parse_steps;
pub use triggers::TriggerFilter;
pub use variables::{parse_static_variables, parse_variables};

use crate::inputs::TaskInputs;
use crate::template::token::TemplateToken;

use serde::Serialize;
use std::collections::BTreeMap;

/// Root of a resolved pipeline.
///
/// `steps:` and `jobs:` at the root are normalized into an implicit stage,
/// so after parsing every job lives inside `stages`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,

    /// Default pool for every job that names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Pool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_commit_message_to_run_name: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_behavior: Option<String>,

    /// Trigger sections are kept as evaluated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TemplateToken>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<TemplateToken>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedules: Option<TemplateToken>,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Resources {
    /// Container resources, each carrying its alias
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    /// Repositories, pipelines, packages, webhooks: kept as sequences
    #[serde(flatten)]
    pub other: BTreeMap<String, TemplateToken>,
}

impl Resources {
    pub fn container(&self, alias: &str) -> Option<&Container> {
        self.containers.iter().find(|c| {
            c.alias
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(alias))
        })
    }
}

// =============================================================================
// Stages and jobs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// `None` for the implicit stage until names are generated
    #[serde(rename = "stage", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<Job>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Pool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_behavior: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_context: Option<TemplateToken>,
}

/// A regular or deployment job. Scalar control values stay strings so
/// runtime expressions (`$[ ... ]`) survive untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deployment: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_minutes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_timeout_in_minutes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeMap<String, Container>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<TaskStep>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_context: Option<TemplateToken>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Pool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<Uses>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Uses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pools: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Workspace {
    pub clean: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

// =============================================================================
// Strategy
// =============================================================================

/// Fan-out policy. Regular jobs use `parallel`/`matrix`/`max_parallel`;
/// deployment jobs use one of the rollout strategies.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<BTreeMap<String, BTreeMap<String, String>>>,

    /// A matrix given as a single (runtime) expression string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_expression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_once: Option<DeploymentHooks>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling: Option<DeploymentHooks>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<DeploymentHooks>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHooks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_deploy: Option<DeploymentHook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploymentHook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_traffic: Option<DeploymentHook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_route_traffic: Option<DeploymentHook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<DeploymentHook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<DeploymentHook>,

    /// Rolling only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<String>,

    /// Canary only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increments: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DeploymentHook {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<TaskStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Pool>,
}

// =============================================================================
// Containers and pools
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Resource alias, set for `resources.containers` entries
    #[serde(rename = "container", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_docker_socket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_read_only: Option<MountReadOnly>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MountReadOnly {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub externals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demands: Option<Vec<String>>,
}

// =============================================================================
// Steps
// =============================================================================

/// Every step after resolution: shorthands are desugared and step
/// templates are spliced in.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
    pub reference: TaskReference,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count_on_task_failure: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_minutes: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StepTarget>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "TaskInputs::is_empty")]
    pub inputs: TaskInputs,
}

/// Task identity. Only `raw_name_and_version` is known until a task
/// catalog resolves the rest.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub raw_name_and_version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTarget {
    #[serde(rename = "container", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<String>,
    /// `Some(empty)` means `settableVariables: none`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settable_variables: Option<Vec<String>>,
}

// =============================================================================
// Variables
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Variable {
    Value {
        name: String,
        value: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        readonly: bool,
    },
    Group {
        group: String,
    },
}

impl Variable {
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Variable::Value {
            name: name.into(),
            value: value.into(),
            readonly: false,
        }
    }

    /// Name of a value variable; groups have none
    pub fn name(&self) -> Option<&str> {
        match self {
            Variable::Value { name, .. } => Some(name),
            Variable::Group { .. } => None,
        }
    }
}
