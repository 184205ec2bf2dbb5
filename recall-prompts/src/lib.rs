//! Prompt assembly for context-augmented generation.

#![warn(missing_docs, clippy::pedantic)]

pub mod context;
pub mod template;
pub mod tokens;

pub use context::{ContextAssembler, ContextBlock, ContextSnippet};
pub use template::{PromptTemplate, TemplateError, TemplateResult};
pub use tokens::estimate_tokens;
