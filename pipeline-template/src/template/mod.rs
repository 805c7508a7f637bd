// Template context and resolver
// Tokens, schema validation, include resolution and parameter coercion

pub mod coerce;
pub mod context;
pub mod evaluate;
pub mod reader;
pub mod schema;
pub mod token;

pub use coerce::convert_value;
pub use context::{
    Context, EvaluationBudget, FileProvider, LocalFileProvider, MemoryFileProvider, NoopTraceWriter,
    ParseOptions, StaticTaskCatalog, TaskMetadata, TaskMetadataProvider, TraceWriter, TracingWriter,
};
pub use evaluate::TemplateEvaluator;
pub use reader::{bind_parameters, read_template, relative_to, LoadedTemplate};
pub use schema::Schema;
pub use token::{TemplateToken, TokenValue};
