//! Error types for the effect stack.
//!
//! Most failures inside [`crate::Stack::apply`] are recovered locally and
//! only logged; these variants surface from the configuration-side API
//! (catalog loading, template parsing, stack editing).

use thiserror::Error;

use crate::stack::EntryId;

#[derive(Error, Debug)]
pub enum FxError {
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    #[error("no stack entry with id {0}")]
    UnknownEntry(EntryId),

    #[error("invalid code template: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid uniform `{key}`: {message}")]
    InvalidUniform { key: String, message: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pass {pass} failed to compile: {message}")]
    Compile { pass: usize, message: String },

    #[error("texture `{0}` could not be resolved")]
    ResourceMissing(String),

    #[error("device error: {0}")]
    Device(String),
}

/// Errors raised while parsing a `${id}` code template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown substitution `${{{name}}}` at byte {offset}")]
    UnknownParameter { name: String, offset: usize },

    #[error("unterminated substitution at byte {0}")]
    Unterminated(usize),

    #[error("stray `$` at byte {0} (write `$$` for a literal dollar)")]
    StrayDollar(usize),
}
