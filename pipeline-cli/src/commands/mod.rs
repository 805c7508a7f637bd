// Shared command-line plumbing: repository roots, aliases and parameters

pub mod expand;
pub mod legacy;
pub mod validate;

use crate::output;

use std::path::{Component, Path, PathBuf};

use clap::{Args, ValueEnum};
use color_eyre::eyre::bail;
use color_eyre::Result;
use serde::Serialize;
use tracing::debug;

use pipeline_template::{
    load_pipeline_with_parameters, Context, LocalFileProvider, Pipeline, Schema, TemplateToken, TracingWriter,
};

/// Where templates come from and what the root document is given
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Repository root for template resolution (default: enclosing git repository)
    #[arg(long, value_name = "DIR")]
    pub repo_root: Option<PathBuf>,

    /// Map a repository alias to a local checkout (can be repeated, format: alias=path)
    #[arg(long = "repository", value_name = "ALIAS=PATH")]
    pub repositories: Vec<String>,

    /// Set a root parameter (can be repeated, format: name=value)
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    pub parameters: Vec<String>,
}

impl SourceArgs {
    pub fn repo_root(&self) -> PathBuf {
        self.repo_root.clone().unwrap_or_else(|| {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            find_repo_root(&cwd).unwrap_or(cwd)
        })
    }

    /// `--param` values parsed as YAML scalars, `None` when there are none
    pub fn parameter_token(&self) -> Result<Option<TemplateToken>> {
        if self.parameters.is_empty() {
            return Ok(None);
        }
        let mut pairs = Vec::with_capacity(self.parameters.len());
        for entry in &self.parameters {
            let (name, value) = split_pair(entry, "parameter", "name=value")?;
            let token = match TemplateToken::load(&value, None) {
                Ok(token) if !value.is_empty() => token,
                _ => TemplateToken::string(value),
            };
            pairs.push((name, token));
        }
        Ok(Some(TemplateToken::from_pairs(pairs)))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

pub fn render<T: Serialize>(value: &T, format: Format) -> Result<String> {
    Ok(match format {
        Format::Yaml => serde_yaml::to_string(value)?,
        Format::Json => serde_json::to_string_pretty(value)? + "\n",
    })
}

/// Resolve the pipeline at `path` against the repository root and the
/// `--repository` checkouts. Parse errors are reported and end the process.
pub fn load(path: &Path, source: &SourceArgs) -> Result<Pipeline> {
    if !path.exists() {
        bail!("Pipeline file not found: {}", path.display());
    }

    let root = source.repo_root();
    let relative = relative_path(&root, path)?;

    let mut provider = LocalFileProvider::new(&root);
    let mut aliases = Vec::new();
    for entry in &source.repositories {
        let (alias, dir) = split_pair(entry, "repository", "alias=path")?;
        provider = provider.with_repository(alias.as_str(), dir);
        aliases.push(alias);
    }

    let schema = Schema::embedded()?;
    let mut context = Context::new(&provider, &TracingWriter, &schema);
    for alias in aliases {
        context = context.with_repository(alias.as_str(), alias.as_str());
    }

    let parameters = source.parameter_token()?;
    debug!(root = %root.display(), file = %relative, repositories = source.repositories.len(), "resolving pipeline");
    output::status("Resolving", &relative);
    match load_pipeline_with_parameters(&context, &relative, parameters.as_ref()) {
        Ok(pipeline) => Ok(pipeline),
        Err(err) => output::fail(&err),
    }
}

/// Split `key=value`, naming the expected shape when `=` is missing
pub fn split_pair(entry: &str, what: &str, expected: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Invalid {} format '{}'. Expected {}", what, entry, expected),
    }
}

/// `file` as a forward-slash path relative to `root`
pub fn relative_path(root: &Path, file: &Path) -> Result<String> {
    let root = root.canonicalize()?;
    let file = file.canonicalize()?;
    let Ok(relative) = file.strip_prefix(&root) else {
        bail!(
            "Pipeline file {} is outside the repository root {}",
            file.display(),
            root.display()
        );
    };
    let segments: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(segments.join("/"))
}

/// Walk up from `start` to the first directory holding `.git`
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}
