// Runtime checks
// Name generation, implicit dependencies, pool fallback and dependency validation

use crate::error::{ParseError, ParseResult};
use crate::expression::ExprParser;
use crate::pipeline::{Pipeline, Pool, Stage, Variable};

use std::collections::HashSet;
use tracing::debug;

/// Name given to the implicit stage and the implicit job
pub const DEFAULT_NAME: &str = "__default";

/// Hands out `Stage`, `Stage2`, `Stage3`, ... skipping names in use.
/// Comparison is case-insensitive.
#[derive(Debug, Default)]
pub(crate) struct NameBuilder {
    used: HashSet<String>,
}

impl NameBuilder {
    /// Mark `name` as taken without validating it
    pub(crate) fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_ascii_lowercase());
    }

    fn add_known(&mut self, name: &str, what: &str) -> Result<(), String> {
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!(
                "{} name '{}' is invalid. Names may only contain letters, numbers and '_', and must not start with a number",
                what, name
            ));
        }
        if !self.used.insert(name.to_ascii_lowercase()) {
            return Err(format!("{} name '{}' is used more than once", what, name));
        }
        Ok(())
    }

    pub(crate) fn build(&mut self, prefix: &str) -> String {
        let mut attempt = 1;
        loop {
            let candidate = match attempt {
                1 => prefix.to_string(),
                n => format!("{}{}", prefix, n),
            };
            if self.used.insert(candidate.to_ascii_lowercase()) {
                return candidate;
            }
            attempt += 1;
        }
    }
}

impl Pipeline {
    /// Checks the pipeline the way a run would before scheduling it.
    ///
    /// Missing names are generated, stages without `dependsOn` depend on the
    /// previous stage, jobs without a pool inherit the stage or pipeline
    /// pool, dependencies must exist and be acyclic, and runtime expressions
    /// (`condition`, `$[ ... ]` values) must parse. All problems found are
    /// reported together.
    pub fn check_for_runtime_failure(&mut self) -> ParseResult<()> {
        self.initialize_names()?;
        self.check_dependencies()?;

        let errors = self.runtime_expression_errors();
        if !errors.is_empty() {
            return Err(ParseError::validation(errors.join(". ")));
        }
        Ok(())
    }

    fn initialize_names(&mut self) -> ParseResult<()> {
        let pipeline_pool = self.pool.clone();
        let stages = self.stages.get_or_insert_with(Vec::new);

        let mut stage_names = NameBuilder::default();
        let errors: Vec<String> = stages
            .iter()
            .filter_map(|s| s.name.as_deref())
            .filter_map(|name| stage_names.add_known(name, "Stage").err())
            .collect();
        if !errors.is_empty() {
            return Err(ParseError::validation(errors.join(". ")));
        }

        let single_stage = stages.len() == 1;
        for index in 0..stages.len() {
            if stages[index].depends_on.is_none() && index > 0 {
                stages[index].depends_on = stages[index - 1].name.clone().map(|name| vec![name]);
            }
            let stage = &mut stages[index];
            if stage.name.is_none() {
                let name = if single_stage {
                    DEFAULT_NAME.to_string()
                } else {
                    stage_names.build("Stage")
                };
                debug!(stage = %name, "generated stage name");
                stage.name = Some(name);
            }
            name_jobs(stage, pipeline_pool.as_ref())?;
        }
        Ok(())
    }

    fn check_dependencies(&self) -> ParseResult<()> {
        let stages = self.stages.as_deref().unwrap_or_default();
        let stage_graph: Vec<(&str, Vec<&str>)> = stages
            .iter()
            .map(|s| (s.name.as_deref().unwrap_or_default(), dependencies(&s.depends_on)))
            .collect();
        check_graph(&stage_graph, "Stage", "stage")?;

        for stage in stages {
            let jobs: Vec<(&str, Vec<&str>)> = stage
                .jobs
                .iter()
                .flatten()
                .map(|j| (j.name.as_deref().unwrap_or_default(), dependencies(&j.depends_on)))
                .collect();
            check_graph(&jobs, "Job", "job")?;
        }
        Ok(())
    }

    fn runtime_expression_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_variables(&mut errors, self.variables.as_deref());
        for stage in self.stages.iter().flatten() {
            check_variables(&mut errors, stage.variables.as_deref());
            check_condition(&mut errors, stage.condition.as_deref());
            for job in stage.jobs.iter().flatten() {
                check_variables(&mut errors, job.variables.as_deref());
                check_condition(&mut errors, job.condition.as_deref());
                check_runtime_expression(&mut errors, job.continue_on_error.as_deref());
                if let Some(strategy) = &job.strategy {
                    check_runtime_expression(&mut errors, strategy.matrix_expression.as_deref());
                    check_runtime_expression(&mut errors, strategy.max_parallel.as_deref());
                    check_runtime_expression(&mut errors, strategy.parallel.as_deref());
                }
                for step in job.steps.iter().flatten() {
                    check_condition(&mut errors, step.condition.as_deref());
                }
            }
        }
        errors
    }
}

fn name_jobs(stage: &mut Stage, pipeline_pool: Option<&Pool>) -> ParseResult<()> {
    let Some(jobs) = stage.jobs.as_mut() else {
        return Ok(());
    };
    let mut job_names = NameBuilder::default();
    let errors: Vec<String> = jobs
        .iter()
        .filter_map(|j| j.name.as_deref())
        .filter_map(|name| job_names.add_known(name, "Job").err())
        .collect();
    if !errors.is_empty() {
        return Err(ParseError::validation(errors.join(". ")));
    }

    let single_job = jobs.len() == 1;
    for job in jobs.iter_mut() {
        if job.name.is_none() {
            let name = if single_job {
                DEFAULT_NAME.to_string()
            } else {
                job_names.build("Job")
            };
            debug!(job = %name, "generated job name");
            job.name = Some(name);
        }
        if job.pool.is_none() {
            job.pool = stage.pool.clone().or_else(|| pipeline_pool.cloned());
        }
    }
    Ok(())
}

fn dependencies(depends_on: &Option<Vec<String>>) -> Vec<&str> {
    depends_on.iter().flatten().map(String::as_str).collect()
}

/// Every dependency names a node of `graph` and no node reaches itself
fn check_graph(graph: &[(&str, Vec<&str>)], kind: &str, noun: &str) -> ParseResult<()> {
    let index_of = |name: &str| graph.iter().position(|(n, _)| n.eq_ignore_ascii_case(name));

    for (name, needs) in graph {
        for need in needs {
            if index_of(*need).is_none() {
                return Err(ParseError::validation(format!(
                    "{} '{}' depends on unknown {} '{}'",
                    kind, name, noun, need
                )));
            }
        }
    }

    // 0 unvisited, 1 on the current path, 2 done
    let mut state = vec![0u8; graph.len()];
    fn visit(
        node: usize,
        graph: &[(&str, Vec<&str>)],
        index_of: &dyn Fn(&str) -> Option<usize>,
        state: &mut [u8],
        path: &mut Vec<usize>,
    ) -> Result<(), Vec<usize>> {
        match state[node] {
            2 => return Ok(()),
            1 => {
                let start = path.iter().position(|&n| n == node).unwrap_or_default();
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                return Err(cycle);
            }
            _ => {}
        }
        state[node] = 1;
        path.push(node);
        for need in &graph[node].1 {
            if let Some(next) = index_of(*need) {
                visit(next, graph, index_of, state, path)?;
            }
        }
        path.pop();
        state[node] = 2;
        Ok(())
    }

    for node in 0..graph.len() {
        let mut path = Vec::new();
        if let Err(cycle) = visit(node, graph, &index_of, &mut state, &mut path) {
            let names: Vec<&str> = cycle.iter().map(|&i| graph[i].0).collect();
            return Err(ParseError::validation(format!(
                "Detected dependency cycle: {}",
                names.join(" -> ")
            )));
        }
    }
    Ok(())
}

fn check_variables(errors: &mut Vec<String>, variables: Option<&[Variable]>) {
    for variable in variables.unwrap_or_default() {
        if let Variable::Value { value, .. } = variable {
            check_runtime_expression(errors, Some(value));
        }
    }
}

/// `$[ ... ]` values are parsed; anything else is a literal
fn check_runtime_expression(errors: &mut Vec<String>, value: Option<&str>) {
    let Some(body) = value.and_then(|v| v.strip_prefix("$[")).and_then(|v| v.strip_suffix(']')) else {
        return;
    };
    if let Err(err) = ExprParser::parse_str(body) {
        errors.push(err.to_string());
    }
}

fn check_condition(errors: &mut Vec<String>, condition: Option<&str>) {
    if let Some(condition) = condition {
        if let Err(err) = ExprParser::parse_str(condition) {
            errors.push(err.to_string());
        }
    }
}
