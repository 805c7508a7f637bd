// Resolution context
// File access, tracing, task metadata and limits shared by one parse

use crate::error::{FileError, ParseError, ParseResult};
use crate::template::schema::Schema;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

/// Tunable ceilings for a parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_depth: usize,
    pub max_events: usize,
    pub max_bytes: usize,
    /// Legacy loader file ceiling, 0 means unlimited
    pub max_files: usize,
    /// Mustache output ceiling, 0 means unlimited
    pub max_result_length: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_events: 1_000_000,
            max_bytes: 10 * 1024 * 1024,
            max_files: 0,
            max_result_length: 10 * 1024 * 1024,
        }
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Source of template text. `None` for the repository means the repository
/// the root document lives in.
pub trait FileProvider {
    fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Result<String, FileError>;
}

/// Reads from a directory on disk, with extra directories per repository
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    root: PathBuf,
    repositories: HashMap<String, PathBuf>,
}

impl LocalFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repositories: HashMap::new(),
        }
    }

    /// Map a repository descriptor (`name` or `name@ref`) to a checkout
    pub fn with_repository(mut self, repository: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.repositories.insert(repository.into(), dir.into());
        self
    }
}

impl FileProvider for LocalFileProvider {
    fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Result<String, FileError> {
        let base = match repository_and_ref {
            None => &self.root,
            Some(repository) => lookup_repository(&self.repositories, repository)
                .ok_or_else(|| FileError::UnknownRepository(repository.to_string()))?,
        };
        let full = base.join(path.trim_start_matches('/'));
        std::fs::read_to_string(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            _ => FileError::Io {
                path: path.to_string(),
                source,
            },
        })
    }
}

/// In-memory files, keyed by repository and normalized path
#[derive(Debug, Clone, Default)]
pub struct MemoryFileProvider {
    files: HashMap<(Option<String>, String), String>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files
            .insert((None, normalize(path)), content.to_string());
        self
    }

    pub fn with_repository_file(mut self, repository: &str, path: &str, content: &str) -> Self {
        self.files.insert(
            (Some(repository.to_string()), normalize(path)),
            content.to_string(),
        );
        self
    }
}

impl FileProvider for MemoryFileProvider {
    fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Result<String, FileError> {
        let path = normalize(path);
        let mut candidates = vec![repository_and_ref.map(str::to_string)];
        if let Some((name, _)) = repository_and_ref.and_then(|r| r.split_once('@')) {
            candidates.push(Some(name.to_string()));
        }
        candidates
            .into_iter()
            .find_map(|repository| self.files.get(&(repository, path.clone())))
            .cloned()
            .ok_or(FileError::NotFound(path))
    }
}

fn lookup_repository<'a>(table: &'a HashMap<String, PathBuf>, repository: &str) -> Option<&'a PathBuf> {
    table.get(repository).or_else(|| {
        let (name, _) = repository.split_once('@')?;
        table.get(name)
    })
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

/// Diagnostic sink for template loads
pub trait TraceWriter {
    fn info(&self, message: &str);
    fn verbose(&self, message: &str);
}

/// Forwards trace output to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWriter;

impl TraceWriter for TracingWriter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn verbose(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceWriter;

impl TraceWriter for NoopTraceWriter {
    fn info(&self, _message: &str) {}
    fn verbose(&self, _message: &str) {}
}

/// Canonical identity of a task
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
}

pub trait TaskMetadataProvider {
    fn resolve(&self, name_and_version: &str) -> Option<TaskMetadata>;
}

/// Fixed task table keyed by `name@major`, case-insensitive
#[derive(Debug, Clone, Default)]
pub struct StaticTaskCatalog {
    tasks: HashMap<String, TaskMetadata>,
}

impl StaticTaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, name_and_version: &str, metadata: TaskMetadata) -> Self {
        self.tasks.insert(name_and_version.to_lowercase(), metadata);
        self
    }
}

impl TaskMetadataProvider for StaticTaskCatalog {
    fn resolve(&self, name_and_version: &str) -> Option<TaskMetadata> {
        self.tasks.get(&name_and_version.to_lowercase()).cloned()
    }
}

// =============================================================================
// Budget
// =============================================================================

/// Event and byte counters for one template, over the file table shared by
/// every template of the parse
#[derive(Debug, Default)]
pub struct EvaluationBudget {
    events: Cell<usize>,
    bytes: Cell<usize>,
    files: Rc<RefCell<Vec<String>>>,
}

impl EvaluationBudget {
    /// Zeroed counters over the same file table
    pub fn for_template(&self) -> Self {
        Self {
            events: Cell::new(0),
            bytes: Cell::new(0),
            files: Rc::clone(&self.files),
        }
    }

    pub fn add_events(&self, count: usize, options: &ParseOptions) -> ParseResult<()> {
        let total = self.events.get() + count;
        self.events.set(total);
        if total > options.max_events {
            return Err(ParseError::resource_limit(
                "Maximum number of template evaluation events exceeded",
            ));
        }
        Ok(())
    }

    pub fn add_bytes(&self, count: usize, options: &ParseOptions) -> ParseResult<()> {
        let total = self.bytes.get() + count;
        self.bytes.set(total);
        if total > options.max_bytes {
            return Err(ParseError::resource_limit(format!(
                "Maximum template size of {} bytes exceeded",
                options.max_bytes
            )));
        }
        Ok(())
    }

    /// Register a loaded file, returning its id in the file table
    pub fn add_file(&self, name: &str, options: &ParseOptions) -> ParseResult<usize> {
        let mut files = self.files.borrow_mut();
        files.push(name.to_string());
        if options.max_files > 0 && files.len() > options.max_files {
            return Err(ParseError::resource_limit(format!(
                "Maximum file count of {} exceeded.",
                options.max_files
            )));
        }
        Ok(files.len() - 1)
    }

    pub fn file_name(&self, id: usize) -> Option<String> {
        self.files.borrow().get(id).cloned()
    }

    pub fn events(&self) -> usize {
        self.events.get()
    }

    pub fn bytes(&self) -> usize {
        self.bytes.get()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Per-include resolution environment.
///
/// Children are structural copies: [`Context::child`] never touches the
/// parent, so sibling includes resolve paths independently. Only the file
/// table is shared; every child counts its own events and bytes.
#[derive(Clone)]
pub struct Context<'a> {
    pub file_provider: &'a dyn FileProvider,
    pub trace: &'a dyn TraceWriter,
    pub schema: &'a Schema,
    pub task_metadata: Option<&'a dyn TaskMetadataProvider>,
    pub options: ParseOptions,
    pub variables: BTreeMap<String, String>,
    pub repository_and_ref: Option<String>,
    pub cwd: Option<String>,
    pub repositories: HashMap<String, String>,
    budget: Rc<EvaluationBudget>,
}

impl<'a> Context<'a> {
    pub fn new(file_provider: &'a dyn FileProvider, trace: &'a dyn TraceWriter, schema: &'a Schema) -> Self {
        Self {
            file_provider,
            trace,
            schema,
            task_metadata: None,
            options: ParseOptions::default(),
            variables: BTreeMap::new(),
            repository_and_ref: None,
            cwd: None,
            repositories: HashMap::new(),
            budget: Rc::new(EvaluationBudget::default()),
        }
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_task_metadata(mut self, provider: &'a dyn TaskMetadataProvider) -> Self {
        self.task_metadata = Some(provider);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Register a repository alias. `descriptor` is what the file provider
    /// receives, usually `name@ref`.
    pub fn with_repository(mut self, alias: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.repositories.insert(alias.into(), descriptor.into());
        self
    }

    /// Context for the template at `path`, read from `repository_and_ref`
    pub fn child(&self, path: &str, repository_and_ref: Option<String>) -> Context<'a> {
        let mut child = self.clone();
        child.cwd = parent_dir(path);
        child.repository_and_ref = repository_and_ref;
        child.budget = Rc::new(self.budget.for_template());
        child
    }

    pub fn budget(&self) -> &EvaluationBudget {
        &self.budget
    }

    /// Attach the name of the file `file` points at to `err`
    pub fn locate(&self, err: ParseError, file: Option<usize>) -> ParseError {
        match file.and_then(|id| self.budget.file_name(id)) {
            Some(name) => err.with_file(name),
            None => err,
        }
    }
}

fn parent_dir(path: &str) -> Option<String> {
    path.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .filter(|dir| !dir.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let options = ParseOptions::default();
        assert_eq!(options.max_depth, 100);
        assert_eq!(options.max_events, 1_000_000);
        assert_eq!(options.max_bytes, 10 * 1024 * 1024);
        assert_eq!(options.max_files, 0);
    }

    #[test]
    fn test_memory_provider_repositories() {
        let provider = MemoryFileProvider::new()
            .with_file("./a.yml", "a")
            .with_repository_file("tools", "b.yml", "b");
        assert_eq!(provider.read_file(None, "a.yml").unwrap(), "a");
        assert_eq!(provider.read_file(Some("tools@main"), "/b.yml").unwrap(), "b");
        assert!(matches!(
            provider.read_file(None, "b.yml"),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_local_provider() {
        let root = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("ci")).unwrap();
        std::fs::write(root.path().join("ci/steps.yml"), "steps: []").unwrap();
        std::fs::write(tools.path().join("shared.yml"), "jobs: []").unwrap();

        let provider = LocalFileProvider::new(root.path()).with_repository("tools", tools.path());
        assert_eq!(provider.read_file(None, "ci/steps.yml").unwrap(), "steps: []");
        assert_eq!(
            provider.read_file(Some("tools@refs/heads/main"), "shared.yml").unwrap(),
            "jobs: []"
        );
        assert!(matches!(
            provider.read_file(Some("other"), "shared.yml"),
            Err(FileError::UnknownRepository(_))
        ));
        assert!(matches!(
            provider.read_file(None, "missing.yml"),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_task_catalog_is_case_insensitive() {
        let catalog = StaticTaskCatalog::new().with_task(
            "MyTask@2",
            TaskMetadata {
                id: "1".to_string(),
                name: "MyTask".to_string(),
                version: "2.0.0".to_string(),
            },
        );
        assert_eq!(catalog.resolve("mytask@2").unwrap().version, "2.0.0");
        assert!(catalog.resolve("MyTask@3").is_none());
    }

    #[test]
    fn test_child_does_not_touch_parent() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let parent = Context::new(&provider, &NoopTraceWriter, &schema);
        let child = parent.child("templates/jobs/build.yml", Some("tools@main".to_string()));

        assert_eq!(child.cwd.as_deref(), Some("templates/jobs"));
        assert_eq!(child.repository_and_ref.as_deref(), Some("tools@main"));
        assert_eq!(parent.cwd, None);
        assert_eq!(parent.repository_and_ref, None);
        assert_eq!(parent.child("build.yml", None).cwd, None);
    }

    #[test]
    fn test_budget_limits() {
        let options = ParseOptions {
            max_events: 3,
            max_bytes: 4,
            max_files: 1,
            ..Default::default()
        };
        let budget = EvaluationBudget::default();
        assert!(budget.add_events(3, &options).is_ok());
        assert!(budget.add_events(1, &options).unwrap_err().is_resource_limit());
        assert_eq!(
            budget.add_bytes(5, &options).unwrap_err().message,
            "Maximum template size of 4 bytes exceeded"
        );
        assert_eq!(budget.add_file("a.yml", &options).unwrap(), 0);
        assert_eq!(
            budget.add_file("b.yml", &options).unwrap_err().message,
            "Maximum file count of 1 exceeded."
        );
    }

    #[test]
    fn test_child_counts_its_own_budget() {
        let schema = Schema::embedded().unwrap();
        let provider = MemoryFileProvider::new();
        let options = ParseOptions::default();
        let parent = Context::new(&provider, &NoopTraceWriter, &schema);
        parent.budget().add_events(5, &options).unwrap();
        parent.budget().add_bytes(7, &options).unwrap();
        let id = parent.budget().add_file("ci.yml", &options).unwrap();

        let child = parent.child("templates/build.yml", None);
        assert_eq!(child.budget().events(), 0);
        assert_eq!(child.budget().bytes(), 0);
        assert_eq!(child.budget().file_name(id).as_deref(), Some("ci.yml"));

        let child_id = child.budget().add_file("templates/build.yml", &options).unwrap();
        assert_eq!(parent.budget().file_name(child_id).as_deref(), Some("templates/build.yml"));
        assert_eq!(parent.budget().events(), 5);
    }
}
