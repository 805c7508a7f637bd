// Release-pipeline ("process") dialect
// Typed models plus the readers, writers and loader for them

pub mod mustache;
pub mod parser;
pub mod phases;
pub mod steps;
pub mod templates;
pub mod variables;

pub use parser::ProcessParser;
pub use phases::{read_phase, read_phases, write_phase, write_phases};
pub use steps::{read_step, read_steps, write_step, write_steps};
pub use templates::{
    read_phases_template, read_process, read_process_template, read_steps_template,
    read_variables_template, write_phases_template, write_process, write_process_template,
    write_steps_template, write_variables_template,
};
pub use variables::{read_variables, write_variables};

use crate::inputs::TaskInputs;
use crate::yaml::Value;

use std::collections::BTreeMap;

/// Parameters passed to a template reference
pub type TemplateParameters = BTreeMap<String, Value>;

/// Group name to the simple steps that replace that group
pub type StepOverrides = BTreeMap<String, Vec<Step>>;

/// Matrix leg name to its variables
pub type Matrix = BTreeMap<String, BTreeMap<String, String>>;

// =============================================================================
// Process
// =============================================================================

/// Root document of the release-pipeline dialect.
///
/// A process is either a template reference, a list of phases, or a single
/// implicit phase spelled out with the phase-level keys at the root.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Process {
    pub name: Option<String>,
    pub resources: Option<Vec<ProcessResource>>,
    pub template: Option<ProcessTemplateReference>,
    pub phases: Option<Vec<PhaseEntry>>,
    pub properties: PhaseProperties,
    pub variables: Option<Vec<Variable>>,
    pub steps: Option<Vec<Step>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessResource {
    pub name: String,
    pub resource_type: Option<String>,
    pub data: Option<BTreeMap<String, Value>>,
}

/// Process-level template reference. Shares the phases reference shape.
pub type ProcessTemplateReference = PhasesTemplateReference;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessTemplate {
    pub resources: Option<Vec<ProcessResource>>,
    pub phases: Option<Vec<PhaseEntry>>,
    pub steps: Option<Vec<Step>>,
}

// =============================================================================
// Phases
// =============================================================================

/// A phases list entry: a concrete phase or a reference to a phases template
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEntry {
    Phase(Phase),
    Template(PhasesTemplateReference),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Phase {
    pub name: Option<String>,
    pub properties: PhaseProperties,
    pub variables: Vec<Variable>,
    pub steps: Vec<Step>,
}

/// Keys shared by a concrete phase and a process acting as its own phase
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseProperties {
    pub depends_on: Vec<String>,
    pub condition: Option<String>,
    pub continue_on_error: Option<String>,
    pub enable_access_token: Option<String>,
    pub target: Option<PhaseTarget>,
}

impl PhaseProperties {
    pub fn is_empty(&self) -> bool {
        self == &PhaseProperties::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseTarget {
    Queue(QueueTarget),
    DeploymentGroup(DeploymentTarget),
    Server(ServerTarget),
}

impl PhaseTarget {
    /// The key the target is spelled with
    pub fn keyword(&self) -> &'static str {
        match self {
            PhaseTarget::Queue(_) => "queue",
            PhaseTarget::DeploymentGroup(_) => "deployment",
            PhaseTarget::Server(_) => "server",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueTarget {
    pub name: Option<String>,
    pub continue_on_error: Option<String>,
    pub demands: Vec<String>,
    pub matrix: Matrix,
    pub parallel: Option<String>,
    pub timeout_in_minutes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeploymentTarget {
    pub group: Option<String>,
    pub continue_on_error: Option<String>,
    pub health_option: Option<String>,
    pub percentage: Option<String>,
    pub tags: Vec<String>,
    pub timeout_in_minutes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerTarget {
    pub continue_on_error: Option<String>,
    pub matrix: Matrix,
    pub parallel: Option<String>,
    pub timeout_in_minutes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhasesTemplateReference {
    pub name: String,
    pub parameters: TemplateParameters,
    pub step_overrides: StepOverrides,
    pub phase_selectors: Vec<PhaseSelector>,
}

/// Step overrides scoped to one phase of a phases template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseSelector {
    pub name: String,
    pub step_overrides: StepOverrides,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhasesTemplate {
    pub phases: Option<Vec<PhaseEntry>>,
    pub steps: Option<Vec<Step>>,
}

// =============================================================================
// Steps
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Task(TaskStep),
    Checkout(CheckoutStep),
    Group(StepGroup),
    Template(StepsTemplateReference),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStep {
    pub name: Option<String>,
    pub enabled: bool,
    pub condition: Option<String>,
    pub continue_on_error: bool,
    pub timeout_in_minutes: i32,
    pub environment: BTreeMap<String, String>,
    pub reference: TaskReference,
    pub inputs: TaskInputs,
}

impl TaskStep {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: None,
            enabled: true,
            condition: None,
            continue_on_error: false,
            timeout_in_minutes: 0,
            environment: BTreeMap::new(),
            reference: TaskReference {
                name: name.to_string(),
                version: version.to_string(),
            },
            inputs: TaskInputs::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskReference {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckoutStep {
    pub name: String,
    pub clean: Option<String>,
    pub fetch_depth: Option<String>,
    pub lfs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepGroup {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepsTemplateReference {
    pub name: String,
    pub parameters: TemplateParameters,
    pub step_overrides: StepOverrides,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepsTemplate {
    pub steps: Vec<Step>,
}

// =============================================================================
// Variables
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Value(ValueVariable),
    Template(VariablesTemplateReference),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueVariable {
    pub name: String,
    pub value: Option<String>,
    pub verbatim: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariablesTemplateReference {
    pub name: String,
    pub parameters: TemplateParameters,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariablesTemplate {
    pub variables: Vec<Variable>,
}
