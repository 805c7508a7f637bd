// Pipeline Template Library
// Template expansion and stage/job/phase composition for YAML pipelines

pub mod error;
pub mod expression;
pub mod inputs;
pub mod pattern;
pub mod pipeline;
pub mod process;
pub mod template;
pub mod yaml;

// Re-export commonly used types
pub use error::{FileError, ParseError, ParseErrorKind, ParseResult};

// Re-export template resolution types
pub use template::{
    read_template, Context, FileProvider, LocalFileProvider, MemoryFileProvider, NoopTraceWriter,
    ParseOptions, Schema, TemplateToken, TraceWriter, TracingWriter,
};

// Re-export composer types
pub use pipeline::{
    load_pipeline, load_pipeline_with_parameters, Job, Pipeline, Stage, TriggerFilter, DEFAULT_NAME,
};

// Re-export the legacy process loader
pub use process::{Process, ProcessParser};

pub use inputs::TaskInputs;
pub use pattern::{Pattern, PatternSet};
