// Process and template document converters
// Root readers/writers for process files and the templates they include

use crate::error::{ParseError, ParseResult};
use crate::process::phases::{
    read_phase_property, read_phases, read_template_reference_property, write_phase_properties,
    write_phases, write_template_reference_body,
};
use crate::process::steps::{read_steps, unexpected_property, write_steps};
use crate::process::variables::{read_variables, write_variables};
use crate::process::{
    PhasesTemplate, Process, ProcessResource, ProcessTemplate, ProcessTemplateReference,
    StepsTemplate, VariablesTemplate,
};
use crate::yaml::reader::validate_null;
use crate::yaml::{Scalar, Span, YamlReader, YamlWriter};

// =============================================================================
// Process
// =============================================================================

pub fn read_process(r: &mut YamlReader) -> ParseResult<Process> {
    let mut process = Process::default();
    r.expect_mapping_start()?;

    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        let span = key.span;
        match key.value.as_str() {
            "name" => process.name = Some(r.expect_scalar()?.value),
            "resources" => process.resources = Some(read_process_resources(r)?),
            "template" => {
                validate_null(&process.phases, "phases", "template", span)?;
                check_phase_level(&process, "template", span)?;
                process.template = Some(read_process_template_reference(r)?);
            }
            "phases" => {
                validate_null(&process.template, "template", "phases", span)?;
                check_phase_level(&process, "phases", span)?;
                process.phases = Some(read_phases(r, false)?);
            }
            "variables" => {
                check_composite(&process, "variables", span)?;
                process.variables = Some(read_variables(r, false)?);
            }
            "steps" => {
                check_composite(&process, "steps", span)?;
                process.steps = Some(read_steps(r, false)?);
            }
            _ => {
                check_composite(&process, &key.value, span)?;
                if !read_phase_property(r, &mut process.properties, &key)? {
                    return Err(unexpected_process_property(&key));
                }
            }
        }
    }

    Ok(process)
}

/// `template` and `phases` exclude every key of the implicit phase
fn check_phase_level(process: &Process, current: &str, span: Span) -> ParseResult<()> {
    validate_null(&process.variables, "variables", current, span)?;
    validate_null(&process.steps, "steps", current, span)?;

    let properties = &process.properties;
    let present = [
        ("dependsOn", !properties.depends_on.is_empty()),
        ("condition", properties.condition.is_some()),
        ("continueOnError", properties.continue_on_error.is_some()),
        ("enableAccessToken", properties.enable_access_token.is_some()),
    ];
    for (name, set) in present {
        validate_null(&set.then_some(()), name, current, span)?;
    }
    if let Some(target) = &properties.target {
        validate_null(&Some(()), target.keyword(), current, span)?;
    }
    Ok(())
}

/// Implicit phase keys are not allowed next to `template` or `phases`
fn check_composite(process: &Process, current: &str, span: Span) -> ParseResult<()> {
    validate_null(&process.template, "template", current, span)?;
    validate_null(&process.phases, "phases", current, span)
}

fn read_process_template_reference(r: &mut YamlReader) -> ParseResult<ProcessTemplateReference> {
    r.expect_mapping_start()?;
    r.read_exact_string("name")?;
    let mut reference = ProcessTemplateReference {
        name: r.read_non_empty_string()?,
        ..Default::default()
    };
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        read_template_reference_property(r, &mut reference, &key)?;
    }
    Ok(reference)
}

fn read_process_resources(r: &mut YamlReader) -> ParseResult<Vec<ProcessResource>> {
    r.expect_sequence_start()?;
    let mut resources = Vec::new();
    while !r.allow_sequence_end() {
        r.expect_mapping_start()?;
        r.read_exact_string("name")?;
        let mut resource = ProcessResource {
            name: r.read_non_empty_string()?,
            ..Default::default()
        };
        while !r.allow_mapping_end() {
            let key = r.expect_scalar()?;
            match key.value.as_str() {
                "type" => resource.resource_type = Some(r.read_non_empty_string()?),
                "data" => resource.data = Some(r.read_mapping(1)?),
                _ => return Err(unexpected_property(&key)),
            }
        }
        resources.push(resource);
    }
    Ok(resources)
}

fn unexpected_process_property(key: &Scalar) -> ParseError {
    ParseError::syntax(
        Some(key.span),
        format!("Unexpected process property: '{}'", key.value),
    )
}

pub fn write_process(w: &mut YamlWriter, process: &Process) {
    w.mapping_start();
    if let Some(name) = process.name.as_deref().filter(|n| !n.is_empty()) {
        w.entry("name", name);
    }
    if let Some(resources) = &process.resources {
        w.scalar("resources");
        write_process_resources(w, resources);
    }
    if let Some(reference) = &process.template {
        w.scalar("template");
        w.mapping_start();
        w.entry("name", reference.name.as_str());
        write_template_reference_body(w, reference);
        w.mapping_end();
    }
    if let Some(phases) = &process.phases {
        w.scalar("phases");
        write_phases(w, phases);
    }
    write_phase_properties(w, &process.properties);
    if let Some(variables) = &process.variables {
        w.scalar("variables");
        write_variables(w, variables);
    }
    if let Some(steps) = &process.steps {
        w.scalar("steps");
        write_steps(w, steps);
    }
    w.mapping_end();
}

fn write_process_resources(w: &mut YamlWriter, resources: &[ProcessResource]) {
    w.sequence_start();
    for resource in resources {
        w.mapping_start();
        w.entry("name", resource.name.as_str());
        if let Some(resource_type) = &resource.resource_type {
            w.entry("type", resource_type.as_str());
        }
        if let Some(data) = &resource.data {
            w.scalar("data");
            w.write_mapping(data);
        }
        w.mapping_end();
    }
    w.sequence_end();
}

// =============================================================================
// Templates
// =============================================================================

pub fn read_process_template(r: &mut YamlReader) -> ParseResult<ProcessTemplate> {
    let mut template = ProcessTemplate::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "resources" => template.resources = Some(read_process_resources(r)?),
            "phases" => {
                validate_null(&template.steps, "steps", "phases", key.span)?;
                template.phases = Some(read_phases(r, false)?);
            }
            "steps" => {
                validate_null(&template.phases, "phases", "steps", key.span)?;
                template.steps = Some(read_steps(r, false)?);
            }
            _ => return Err(unexpected_process_property(&key)),
        }
    }
    Ok(template)
}

pub fn write_process_template(w: &mut YamlWriter, template: &ProcessTemplate) {
    w.mapping_start();
    if let Some(resources) = &template.resources {
        w.scalar("resources");
        write_process_resources(w, resources);
    }
    if let Some(phases) = &template.phases {
        w.scalar("phases");
        write_phases(w, phases);
    }
    if let Some(steps) = &template.steps {
        w.scalar("steps");
        write_steps(w, steps);
    }
    w.mapping_end();
}

pub fn read_phases_template(r: &mut YamlReader) -> ParseResult<PhasesTemplate> {
    let mut template = PhasesTemplate::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "phases" => {
                validate_null(&template.steps, "steps", "phases", key.span)?;
                template.phases = Some(read_phases(r, true)?);
            }
            "steps" => {
                validate_null(&template.phases, "phases", "steps", key.span)?;
                template.steps = Some(read_steps(r, false)?);
            }
            _ => return Err(unexpected_process_property(&key)),
        }
    }
    Ok(template)
}

pub fn write_phases_template(w: &mut YamlWriter, template: &PhasesTemplate) {
    w.mapping_start();
    if let Some(phases) = &template.phases {
        w.scalar("phases");
        write_phases(w, phases);
    }
    if let Some(steps) = &template.steps {
        w.scalar("steps");
        write_steps(w, steps);
    }
    w.mapping_end();
}

pub fn read_steps_template(r: &mut YamlReader) -> ParseResult<StepsTemplate> {
    let mut template = StepsTemplate::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "steps" => template.steps = read_steps(r, true)?,
            _ => {
                return Err(ParseError::syntax(
                    Some(key.span),
                    format!("Unexpected steps template property: '{}'", key.value),
                ));
            }
        }
    }
    Ok(template)
}

pub fn write_steps_template(w: &mut YamlWriter, template: &StepsTemplate) {
    w.mapping_start();
    if !template.steps.is_empty() {
        w.scalar("steps");
        write_steps(w, &template.steps);
    }
    w.mapping_end();
}

pub fn read_variables_template(r: &mut YamlReader) -> ParseResult<VariablesTemplate> {
    let mut template = VariablesTemplate::default();
    r.expect_mapping_start()?;
    while !r.allow_mapping_end() {
        let key = r.expect_scalar()?;
        match key.value.as_str() {
            "variables" => template.variables = read_variables(r, true)?,
            _ => {
                return Err(ParseError::syntax(
                    Some(key.span),
                    format!("Unexpected variables template property: '{}'", key.value),
                ));
            }
        }
    }
    Ok(template)
}

pub fn write_variables_template(w: &mut YamlWriter, template: &VariablesTemplate) {
    w.mapping_start();
    if !template.variables.is_empty() {
        w.scalar("variables");
        write_variables(w, &template.variables);
    }
    w.mapping_end();
}
