// Trigger filters
// Branch and path filters of the `trigger` and `pr` sections

use crate::error::ParseResult;
use crate::pattern::PatternSet;
use crate::pipeline::Pipeline;
use crate::template::token::TemplateToken;

use tracing::debug;

const BRANCH_PREFIX: &str = "refs/heads/";

/// Compiled filters of one trigger section.
///
/// An absent section fires for every branch. `none` disables it. A sequence
/// lists branch includes. A mapping carries `branches` and `paths`, each
/// either a list or an `include`/`exclude` pair.
#[derive(Debug, Clone, Default)]
pub struct TriggerFilter {
    pub enabled: bool,
    pub branches: PatternSet,
    pub paths: PatternSet,
}

impl TriggerFilter {
    pub fn parse(section: &str, token: Option<&TemplateToken>) -> ParseResult<Self> {
        let mut filter = Self {
            enabled: true,
            ..Default::default()
        };
        let Some(token) = token.filter(|t| !t.is_null()) else {
            return Ok(filter);
        };

        if let Some(value) = token.as_str() {
            if value.eq_ignore_ascii_case("none") {
                filter.enabled = false;
            } else {
                filter.branches = filters(section, token, token)?;
            }
        } else if token.as_sequence().is_some() {
            filter.branches = filters(section, token, token)?;
        } else {
            for (key, value) in token.expect_mapping(section)? {
                match key.expect_string(section)?.as_str() {
                    "branches" => filter.branches = filters("branches", token, value)?,
                    "paths" => filter.paths = filters("paths", token, value)?,
                    _ => {}
                }
            }
        }
        debug!(section, enabled = filter.enabled, "parsed trigger filter");
        Ok(filter)
    }

    /// True when a push of `changed` paths to `branch` fires the trigger.
    /// Path filters only apply when changed paths are known.
    pub fn fires(&self, branch: &str, changed: &[&str]) -> bool {
        if !self.enabled {
            return false;
        }
        let branch = branch.strip_prefix(BRANCH_PREFIX).unwrap_or(branch);
        if !self.branches.matches(branch) {
            return false;
        }
        changed.is_empty() || self.paths.is_empty() || changed.iter().any(|path| self.paths.matches(path))
    }
}

/// `[a, b]` or `{include: [a], exclude: [b]}`, as one pattern set
fn filters(what: &str, section: &TemplateToken, token: &TemplateToken) -> ParseResult<PatternSet> {
    let mut entries = Vec::new();
    match token.as_mapping() {
        Some(pairs) => {
            for (key, value) in pairs {
                let negate = match key.expect_string(what)?.as_str() {
                    "include" => false,
                    "exclude" => true,
                    other => {
                        return Err(key.error(format!(
                            "Unexpected key '{}' in '{}', expected include or exclude",
                            other, what
                        )))
                    }
                };
                for entry in value.expect_string_list(what)? {
                    entries.push(pattern_entry(&entry, negate));
                }
            }
        }
        None => {
            for entry in token.expect_string_list(what)? {
                entries.push(pattern_entry(&entry, false));
            }
        }
    }
    PatternSet::new(&entries).map_err(|e| e.with_span(token.span.or(section.span)))
}

fn pattern_entry(entry: &str, negate: bool) -> String {
    let entry = entry.trim();
    let entry = entry.strip_prefix(BRANCH_PREFIX).unwrap_or(entry);
    if negate {
        format!("!{}", entry)
    } else {
        entry.to_string()
    }
}

impl Pipeline {
    /// Filters of the push trigger
    pub fn ci_trigger(&self) -> ParseResult<TriggerFilter> {
        TriggerFilter::parse("trigger", self.trigger.as_ref())
    }

    /// Filters of the pull request trigger
    pub fn pr_trigger(&self) -> ParseResult<TriggerFilter> {
        TriggerFilter::parse("pr", self.pr.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter(yaml: &str) -> ParseResult<TriggerFilter> {
        let token = TemplateToken::load(yaml, None).unwrap();
        TriggerFilter::parse("trigger", Some(&token))
    }

    #[test]
    fn test_absent_trigger_fires_everywhere() {
        let pipeline = Pipeline::default();
        let trigger = pipeline.ci_trigger().unwrap();
        assert!(trigger.fires("main", &[]));
        assert!(trigger.fires("refs/heads/feature/x", &["src/lib.rs"]));
    }

    #[test]
    fn test_none_disables() {
        let trigger = filter("none\n").unwrap();
        assert!(!trigger.enabled);
        assert!(!trigger.fires("main", &[]));
    }

    #[test]
    fn test_branch_list() {
        let trigger = filter("- main\n- releases/*\n").unwrap();
        assert!(trigger.fires("main", &[]));
        assert!(trigger.fires("refs/heads/releases/v1", &[]));
        assert!(!trigger.fires("feature/x", &[]));
    }

    #[test]
    fn test_include_exclude_with_paths() {
        let trigger = filter(
            "branches:\n  include: [refs/heads/main, releases/*]\n  exclude: [releases/old]\npaths:\n  exclude: [docs/**]\n",
        )
        .unwrap();
        assert!(trigger.fires("main", &["src/lib.rs"]));
        assert!(!trigger.fires("releases/old", &[]));
        assert!(!trigger.fires("main", &["docs/index.md"]));
        assert!(trigger.fires("main", &["docs/index.md", "Cargo.toml"]));
    }

    #[test]
    fn test_invalid_filters() {
        let err = filter("branches:\n  only: [main]\n").unwrap_err();
        assert_eq!(
            err.message,
            "Unexpected key 'only' in 'branches', expected include or exclude"
        );

        let err = filter("branches: [\"main[\"]\n").unwrap_err();
        assert!(err.span.is_some());
    }

    #[test]
    fn test_trigger_read_from_pipeline() {
        use crate::pipeline::compose::load_pipeline;
        use crate::template::context::{Context, MemoryFileProvider, NoopTraceWriter};
        use crate::template::schema::Schema;

        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new().with_file(
            "ci.yml",
            "trigger:\n  branches:\n    include: [main]\npr: none\nsteps:\n- script: make\n",
        );
        let context = Context::new(&provider, &NoopTraceWriter, &schema);
        let pipeline = load_pipeline(&context, "ci.yml").unwrap();

        assert!(pipeline.ci_trigger().unwrap().fires("main", &[]));
        assert!(!pipeline.ci_trigger().unwrap().fires("dev", &[]));
        assert!(!pipeline.pr_trigger().unwrap().fires("main", &[]));
    }
}
