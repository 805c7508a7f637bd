// Phase converters
// Concrete phases, their queue/deployment/server targets and phases template references

use crate::error::{ParseError, ParseResult};
use crate::process::steps::{
    read_step_overrides, read_steps, unexpected_property, write_step_overrides, write_steps,
};
use crate::process::variables::{read_variables, write_variables};
use crate::process::{
    DeploymentTarget, Matrix, Phase, PhaseEntry, PhaseProperties, PhaseSelector, PhaseTarget,
    PhasesTemplateReference, QueueTarget, ServerTarget,
};
use crate::yaml::reader::validate_null;
use crate::yaml::{KeyComparer, Scalar, YamlReader, YamlWriter};

use std::collections::BTreeMap;

pub fn read_phases(r: &mut YamlReader, simple_only: bool) -> ParseResult<Vec<PhaseEntry>> {
    r.expect_sequence_start()?;
    let mut phases = Vec::new();
    while !r.allow_sequence_end() {
        phases.push(read_phase(r, simple_only)?);
    }
    Ok(phases)
}

/// Read one phases entry. The first key decides between a concrete phase
/// (`phase`, `name` or `deployment`) and a template reference.
pub fn read_phase(r: &mut YamlReader, simple_only: bool) -> ParseResult<PhaseEntry> {
    r.expect_mapping_start()?;
    let first = r.expect_scalar()?;

    match first.value.as_str() {
        "phase" | "name" | "deployment" => {
            let mut phase = Phase {
                name: Some(r.read_non_empty_string()?),
                ..Default::default()
            };
            while !r.allow_mapping_end() {
                let key = r.expect_scalar()?;
                if read_phase_property(r, &mut phase.properties, &key)? {
                    continue;
                }
                match key.value.as_str() {
                    "variables" => phase.variables = read_variables(r, false)?,
                    "steps" => phase.steps = read_steps(r, false)?,
                    _ => {
                        return Err(ParseError::syntax(
                            Some(key.span),
                            format!("Unexpected phase property: '{}'", key.value),
                        ));
                    }
                }
            }
            Ok(PhaseEntry::Phase(phase))
        }
        "template" => {
            if simple_only {
                return Err(ParseError::syntax(
                    Some(first.span),
                    "A phases template cannot reference another phases 'template'.",
                ));
            }
            let mut reference = PhasesTemplateReference {
                name: r.read_non_empty_string()?,
                ..Default::default()
            };
            while !r.allow_mapping_end() {
                let key = r.expect_scalar()?;
                read_template_reference_property(r, &mut reference, &key)?;
            }
            Ok(PhaseEntry::Template(reference))
        }
        _ => Err(ParseError::syntax(
            Some(first.span),
            format!("Unknown phase type: '{}'", first.value),
        )),
    }
}

/// Read a phase-level key into `properties`. Returns false when `key` is not
/// one of them so the caller can try its own vocabulary.
pub(crate) fn read_phase_property(
    r: &mut YamlReader,
    properties: &mut PhaseProperties,
    key: &Scalar,
) -> ParseResult<bool> {
    match key.value.as_str() {
        "dependsOn" => properties.depends_on = read_string_or_sequence_allow_empty(r)?,
        "condition" => properties.condition = Some(r.read_non_empty_string()?),
        "continueOnError" => properties.continue_on_error = Some(r.read_non_empty_string()?),
        "enableAccessToken" => properties.enable_access_token = Some(r.read_non_empty_string()?),
        "queue" => {
            check_target(&properties.target, "queue", key)?;
            properties.target = Some(PhaseTarget::Queue(read_queue_target(r)?));
        }
        "deployment" => {
            check_target(&properties.target, "deployment", key)?;
            properties.target = Some(PhaseTarget::DeploymentGroup(read_deployment_target(r)?));
        }
        "server" => {
            check_target(&properties.target, "server", key)?;
            properties.target = read_server_target(r)?.map(PhaseTarget::Server);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Keys of a phases template reference after its name
pub(crate) fn read_template_reference_property(
    r: &mut YamlReader,
    reference: &mut PhasesTemplateReference,
    key: &Scalar,
) -> ParseResult<()> {
    match key.value.as_str() {
        "parameters" => reference.parameters = r.read_mapping(1)?,
        "steps" => reference.step_overrides = read_step_overrides(r)?,
        "phases" => reference.phase_selectors = read_phase_selectors(r)?,
        _ => return Err(unexpected_property(key)),
    }
    Ok(())
}

fn read_phase_selectors(r: &mut YamlReader) -> ParseResult<Vec<PhaseSelector>> {
    r.expect_sequence_start()?;
    let mut selectors = Vec::new();
    while !r.allow_sequence_end() {
        r.expect_mapping_start()?;
        r.read_exact_string("name")?;
        let mut selector = PhaseSelector {
            name: r.read_non_empty_string()?,
            ..Default::default()
        };
        while !r.allow_mapping_end() {
            let key = r.expect_scalar()?;
            match key.value.as_str() {
                "steps" => selector.step_overrides = read_step_overrides(r)?,
                _ => return Err(unexpected_property(&key)),
            }
        }
        selectors.push(selector);
    }
    Ok(selectors)
}

fn check_target(previous: &Option<PhaseTarget>, current: &str, key: &Scalar) -> ParseResult<()> {
    match previous {
        Some(target) => validate_null(&Some(()), target.keyword(), current, key.span),
        None => Ok(()),
    }
}

/// A scalar or a sequence of scalars. An empty scalar yields no items.
fn read_string_or_sequence_allow_empty(r: &mut YamlReader) -> ParseResult<Vec<String>> {
    if r.accept_scalar() {
        let scalar = r.expect_scalar()?;
        if scalar.value.is_empty() || scalar.is_null() {
            return Ok(Vec::new());
        }
        return Ok(vec![scalar.value]);
    }
    r.read_string_or_sequence()
}

fn read_queue_target(r: &mut YamlReader) -> ParseResult<QueueTarget> {
    if r.accept_scalar() {
        return Ok(QueueTarget {
            name: Some(r.read_non_empty_string()?),
            ..Default::default()
        });
    }

    let mut target = QueueTarget::default();
    let mut parallel_or_matrix: Option<&'static str> = None;
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "name" => target.name = Some(r.read_non_empty_string()?),
            "continueOnError" => target.continue_on_error = Some(r.read_non_empty_string()?),
            "demands" => target.demands = read_string_or_sequence_allow_empty(r)?,
            "matrix" => {
                if let Some(previous) = parallel_or_matrix {
                    validate_null(&Some(()), previous, "matrix", key.span)?;
                }
                parallel_or_matrix = Some("matrix");
                target.matrix = read_matrix(r)?;
            }
            "parallel" => {
                if let Some(previous) = parallel_or_matrix {
                    validate_null(&Some(()), previous, "parallel", key.span)?;
                }
                parallel_or_matrix = Some("parallel");
                target.parallel = Some(r.read_non_empty_string()?);
            }
            "timeoutInMinutes" => target.timeout_in_minutes = Some(r.read_non_empty_string()?),
            _ => return Err(unexpected_property(&key)),
        }
    }
    Ok(target)
}

fn read_deployment_target(r: &mut YamlReader) -> ParseResult<DeploymentTarget> {
    if r.accept_scalar() {
        return Ok(DeploymentTarget {
            group: Some(r.read_non_empty_string()?),
            ..Default::default()
        });
    }

    let mut target = DeploymentTarget::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "group" => target.group = Some(r.read_non_empty_string()?),
            "continueOnError" => target.continue_on_error = Some(r.read_non_empty_string()?),
            "healthOption" => target.health_option = Some(r.read_non_empty_string()?),
            "percentage" => target.percentage = Some(r.read_non_empty_string()?),
            "tags" => target.tags = read_string_or_sequence_allow_empty(r)?,
            "timeoutInMinutes" => target.timeout_in_minutes = Some(r.read_non_empty_string()?),
            _ => return Err(unexpected_property(&key)),
        }
    }
    Ok(target)
}

/// `server: true` is the shorthand; `server: false` means no target
fn read_server_target(r: &mut YamlReader) -> ParseResult<Option<ServerTarget>> {
    if r.accept_scalar() {
        return Ok(r.read_boolean()?.then(ServerTarget::default));
    }

    let mut target = ServerTarget::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "continueOnError" => target.continue_on_error = Some(r.read_non_empty_string()?),
            "matrix" => target.matrix = read_matrix(r)?,
            "parallel" => target.parallel = Some(r.read_non_empty_string()?),
            "timeoutInMinutes" => target.timeout_in_minutes = Some(r.read_non_empty_string()?),
            _ => return Err(unexpected_property(&key)),
        }
    }
    Ok(Some(target))
}

/// Leg names compare case-insensitively
fn read_matrix(r: &mut YamlReader) -> ParseResult<Matrix> {
    r.expect_mapping_start()?;
    let mut matrix: Matrix = BTreeMap::new();
    while !r.allow_mapping_end() {
        let span = r.current_span();
        let leg = r.read_non_empty_string()?;
        if matrix.keys().any(|existing| existing.eq_ignore_ascii_case(&leg)) {
            return Err(ParseError::syntax(
                span,
                format!("Duplicate matrix leg '{}'", leg),
            ));
        }
        let variables = r.read_mapping_of_string_string(KeyComparer::Ordinal)?;
        matrix.insert(leg, variables);
    }
    Ok(matrix)
}

// =============================================================================
// Writers
// =============================================================================

pub fn write_phases(w: &mut YamlWriter, phases: &[PhaseEntry]) {
    w.sequence_start();
    for phase in phases {
        write_phase(w, phase);
    }
    w.sequence_end();
}

pub fn write_phase(w: &mut YamlWriter, phase: &PhaseEntry) {
    w.mapping_start();
    match phase {
        PhaseEntry::Phase(phase) => {
            w.entry("phase", phase.name.clone().unwrap_or_default());
            write_phase_properties(w, &phase.properties);
            if !phase.variables.is_empty() {
                w.scalar("variables");
                write_variables(w, &phase.variables);
            }
            if !phase.steps.is_empty() {
                w.scalar("steps");
                write_steps(w, &phase.steps);
            }
        }
        PhaseEntry::Template(reference) => {
            w.entry("template", reference.name.as_str());
            write_template_reference_body(w, reference);
        }
    }
    w.mapping_end();
}

/// Parameters, phase selectors and step overrides of a reference
pub(crate) fn write_template_reference_body(w: &mut YamlWriter, reference: &PhasesTemplateReference) {
    if !reference.parameters.is_empty() {
        w.scalar("parameters");
        w.write_mapping(&reference.parameters);
    }

    if !reference.phase_selectors.is_empty() {
        w.scalar("phases");
        w.sequence_start();
        for selector in &reference.phase_selectors {
            w.mapping_start();
            w.entry("name", selector.name.as_str());
            write_step_overrides(w, &selector.step_overrides);
            w.mapping_end();
        }
        w.sequence_end();
    }

    write_step_overrides(w, &reference.step_overrides);
}

pub(crate) fn write_phase_properties(w: &mut YamlWriter, properties: &PhaseProperties) {
    write_string_or_sequence(w, "dependsOn", &properties.depends_on);
    write_optional(w, "condition", &properties.condition);
    write_optional(w, "continueOnError", &properties.continue_on_error);
    write_optional(w, "enableAccessToken", &properties.enable_access_token);

    match &properties.target {
        Some(PhaseTarget::Queue(queue)) => write_queue_target(w, queue),
        Some(PhaseTarget::DeploymentGroup(deployment)) => write_deployment_target(w, deployment),
        Some(PhaseTarget::Server(server)) => write_server_target(w, server),
        None => {}
    }
}

fn write_queue_target(w: &mut YamlWriter, queue: &QueueTarget) {
    w.scalar("queue");
    let shorthand = QueueTarget {
        name: queue.name.clone(),
        ..Default::default()
    };
    if let (Some(name), true) = (&queue.name, queue == &shorthand) {
        w.scalar(name.as_str());
        return;
    }

    w.mapping_start();
    write_optional(w, "name", &queue.name);
    write_optional(w, "continueOnError", &queue.continue_on_error);
    write_optional(w, "parallel", &queue.parallel);
    write_optional(w, "timeoutInMinutes", &queue.timeout_in_minutes);
    write_string_or_sequence(w, "demands", &queue.demands);
    write_matrix(w, &queue.matrix);
    w.mapping_end();
}

fn write_deployment_target(w: &mut YamlWriter, deployment: &DeploymentTarget) {
    w.scalar("deployment");
    let shorthand = DeploymentTarget {
        group: deployment.group.clone(),
        ..Default::default()
    };
    if let (Some(group), true) = (&deployment.group, deployment == &shorthand) {
        w.scalar(group.as_str());
        return;
    }

    w.mapping_start();
    write_optional(w, "group", &deployment.group);
    write_optional(w, "continueOnError", &deployment.continue_on_error);
    write_optional(w, "healthOption", &deployment.health_option);
    write_optional(w, "percentage", &deployment.percentage);
    write_optional(w, "timeoutInMinutes", &deployment.timeout_in_minutes);
    write_string_or_sequence(w, "tags", &deployment.tags);
    w.mapping_end();
}

fn write_server_target(w: &mut YamlWriter, server: &ServerTarget) {
    w.scalar("server");
    if server == &ServerTarget::default() {
        w.scalar("true");
        return;
    }

    w.mapping_start();
    write_optional(w, "continueOnError", &server.continue_on_error);
    write_optional(w, "parallel", &server.parallel);
    write_optional(w, "timeoutInMinutes", &server.timeout_in_minutes);
    write_matrix(w, &server.matrix);
    w.mapping_end();
}

/// Legs are emitted sorted case-insensitively
fn write_matrix(w: &mut YamlWriter, matrix: &Matrix) {
    if matrix.is_empty() {
        return;
    }
    let mut legs: Vec<_> = matrix.iter().collect();
    legs.sort_by_key(|(name, _)| name.to_lowercase());

    w.scalar("matrix");
    w.mapping_start();
    for (name, variables) in legs {
        w.scalar(name.as_str());
        w.write_string_map(variables);
    }
    w.mapping_end();
}

fn write_optional(w: &mut YamlWriter, key: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        w.entry(key, value);
    }
}

/// A single item is written as a scalar, more as a sequence
fn write_string_or_sequence(w: &mut YamlWriter, key: &str, items: &[String]) {
    match items {
        [] => {}
        [single] => w.entry(key, single.as_str()),
        _ => {
            w.scalar(key);
            w.write_strings(items);
        }
    }
}
