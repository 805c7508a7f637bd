// Job strategies
// Matrix/parallel for regular jobs, rollout hooks for deployment jobs

use crate::error::ParseResult;
use crate::pipeline::container::strings;
use crate::pipeline::steps::{parse_step_list, string_map};
use crate::pipeline::{DeploymentHook, DeploymentHooks, Pool, Strategy, TaskStep};
use crate::template::context::Context;
use crate::template::token::TemplateToken;

impl Strategy {
    pub fn parse(context: &Context, token: &TemplateToken, deployment: bool) -> ParseResult<Strategy> {
        let mut strategy = Strategy::default();
        for (key, value) in token.expect_mapping("strategy")? {
            let key = key.expect_string("strategy")?;
            match (deployment, key.as_str()) {
                (false, "parallel") => strategy.parallel = Some(value.expect_string("parallel")?),
                (false, "maxParallel") => strategy.max_parallel = Some(value.expect_string("maxParallel")?),
                (false, "matrix") if value.is_scalar() => {
                    strategy.matrix_expression = Some(value.expect_string("matrix")?)
                }
                (false, "matrix") => {
                    let mut matrix = std::collections::BTreeMap::new();
                    for (leg, variables) in value.expect_mapping("matrix")? {
                        matrix.insert(
                            leg.expect_string("matrix")?,
                            variables.expect_string_map("matrix")?.into_iter().collect(),
                        );
                    }
                    strategy.matrix = Some(matrix);
                }
                (true, "runOnce") => strategy.run_once = Some(parse_hooks(context, value)?),
                (true, "rolling") => {
                    let mut hooks = parse_hooks(context, value)?;
                    hooks.max_parallel = value
                        .get("maxParallel")
                        .map(|v| v.expect_string("maxParallel"))
                        .transpose()?;
                    strategy.rolling = Some(hooks);
                }
                (true, "canary") => {
                    let mut hooks = parse_hooks(context, value)?;
                    hooks.increments = value
                        .get("increments")
                        .map(|v| {
                            v.expect_sequence("increments")?
                                .iter()
                                .map(|i| i.expect_string("increments"))
                                .collect::<ParseResult<Vec<_>>>()
                        })
                        .transpose()?;
                    strategy.canary = Some(hooks);
                }
                _ => {}
            }
        }
        Ok(strategy)
    }

    pub fn to_token(&self) -> TemplateToken {
        let mut fields = Vec::new();
        if let Some(parallel) = &self.parallel {
            fields.push(("parallel", TemplateToken::string(parallel.as_str())));
        }
        if let Some(expression) = &self.matrix_expression {
            fields.push(("matrix", TemplateToken::string(expression.as_str())));
        }
        if let Some(matrix) = &self.matrix {
            fields.push((
                "matrix",
                TemplateToken::from_pairs(matrix.iter().map(|(leg, vars)| (leg.as_str(), string_map(vars.iter())))),
            ));
        }
        if let Some(max_parallel) = &self.max_parallel {
            fields.push(("maxParallel", TemplateToken::string(max_parallel.as_str())));
        }
        for (key, hooks) in [
            ("runOnce", &self.run_once),
            ("rolling", &self.rolling),
            ("canary", &self.canary),
        ] {
            if let Some(hooks) = hooks {
                fields.push((key, hooks.to_token()));
            }
        }
        TemplateToken::from_pairs(fields)
    }
}

fn parse_hooks(context: &Context, token: &TemplateToken) -> ParseResult<DeploymentHooks> {
    let mut hooks = DeploymentHooks::default();
    for (key, value) in token.expect_mapping("strategy")? {
        match key.as_str().unwrap_or_default() {
            "preDeploy" => hooks.pre_deploy = Some(parse_hook(context, value)?),
            "deploy" => hooks.deploy = Some(parse_hook(context, value)?),
            "routeTraffic" => hooks.route_traffic = Some(parse_hook(context, value)?),
            "postRouteTraffic" => hooks.post_route_traffic = Some(parse_hook(context, value)?),
            "on" => {
                for (outcome, hook) in value.expect_mapping("on")? {
                    match outcome.as_str().unwrap_or_default() {
                        "failure" => hooks.on_failure = Some(parse_hook(context, hook)?),
                        "success" => hooks.on_success = Some(parse_hook(context, hook)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(hooks)
}

fn parse_hook(context: &Context, token: &TemplateToken) -> ParseResult<DeploymentHook> {
    let mut hook = DeploymentHook::default();
    for (key, value) in token.expect_mapping("hook")? {
        match key.as_str().unwrap_or_default() {
            "steps" => hook.steps = Some(parse_step_list(context, value)?),
            "pool" => hook.pool = Some(Pool::parse(value)?),
            _ => {}
        }
    }
    Ok(hook)
}

impl DeploymentHooks {
    fn to_token(&self) -> TemplateToken {
        let mut fields = Vec::new();
        for (key, hook) in [
            ("preDeploy", &self.pre_deploy),
            ("deploy", &self.deploy),
            ("routeTraffic", &self.route_traffic),
            ("postRouteTraffic", &self.post_route_traffic),
        ] {
            if let Some(hook) = hook {
                fields.push((key, hook.to_token()));
            }
        }
        let mut on = Vec::new();
        if let Some(hook) = &self.on_failure {
            on.push(("failure", hook.to_token()));
        }
        if let Some(hook) = &self.on_success {
            on.push(("success", hook.to_token()));
        }
        if !on.is_empty() {
            fields.push(("on", TemplateToken::from_pairs(on)));
        }
        if let Some(max_parallel) = &self.max_parallel {
            fields.push(("maxParallel", TemplateToken::string(max_parallel.as_str())));
        }
        if let Some(increments) = &self.increments {
            fields.push(("increments", strings(increments)));
        }
        TemplateToken::from_pairs(fields)
    }
}

impl DeploymentHook {
    fn to_token(&self) -> TemplateToken {
        let mut fields = Vec::new();
        if let Some(steps) = &self.steps {
            fields.push((
                "steps",
                TemplateToken::sequence(steps.iter().map(TaskStep::to_token).collect()),
            ));
        }
        if let Some(pool) = &self.pool {
            fields.push(("pool", pool.to_token()));
        }
        TemplateToken::from_pairs(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::context::{MemoryFileProvider, NoopTraceWriter};
    use crate::template::schema::Schema;
    use pretty_assertions::assert_eq;

    fn parse(yaml: &str, deployment: bool) -> Strategy {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        Strategy::parse(&context, &TemplateToken::load(yaml, None).unwrap(), deployment).unwrap()
    }

    #[test]
    fn test_matrix_strategy() {
        let strategy = parse(
            "matrix:\n  linux:\n    image: ubuntu\n  windows:\n    image: windows\nmaxParallel: 2\n",
            false,
        );
        let matrix = strategy.matrix.as_ref().unwrap();
        assert_eq!(matrix["linux"]["image"], "ubuntu");
        assert_eq!(matrix.len(), 2);
        assert_eq!(strategy.max_parallel.as_deref(), Some("2"));
    }

    #[test]
    fn test_matrix_expression_kept_verbatim() {
        let strategy = parse("matrix: $[ variables.legs ]\n", false);
        assert_eq!(strategy.matrix_expression.as_deref(), Some("$[ variables.legs ]"));
        assert_eq!(strategy.matrix, None);
    }

    #[test]
    fn test_deployment_strategies() {
        let strategy = parse(
            "canary:\n  increments: [10, 20]\n  deploy:\n    steps:\n    - script: ship\n  on:\n    failure:\n      steps:\n      - script: rollback\n",
            true,
        );
        let canary = strategy.canary.as_ref().unwrap();
        assert_eq!(canary.increments, Some(vec!["10".to_string(), "20".to_string()]));
        assert_eq!(canary.deploy.as_ref().and_then(|h| h.steps.as_ref()).map(Vec::len), Some(1));
        assert!(canary.on_failure.is_some());
        assert_eq!(canary.on_success, None);

        let rolling = parse("rolling:\n  maxParallel: 25%\n", true);
        assert_eq!(
            rolling.rolling.and_then(|r| r.max_parallel).as_deref(),
            Some("25%")
        );
    }

    #[test]
    fn test_regular_keys_ignored_for_deployments() {
        let strategy = parse("parallel: 3\n", true);
        assert_eq!(strategy, Strategy::default());
    }

    #[test]
    fn test_token_form_parses_back() {
        let strategy = parse(
            "runOnce:\n  preDeploy:\n    pool: Default\n    steps:\n    - bash: ./prepare.sh\n  on:\n    success:\n      steps:\n      - script: notify\n",
            true,
        );
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        assert_eq!(Strategy::parse(&context, &strategy.to_token(), true).unwrap(), strategy);
    }
}
