//! Compile error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the compile passes. Every error is fatal to the current
/// compile: the pipeline stops at the failing pass and the caller keeps the
/// partially processed template and environment.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CompileError {
    #[error("definition lookup function is undefined")]
    MissingDefinitionLookup,

    #[error("cannot find template definition for '{0}'")]
    MissingDefinition(String),

    #[error("{action} {entity}: unexpected param key '{key}'{}", params_hint(.required, .extra))]
    UnexpectedParamKey {
        action: String,
        entity: String,
        key: String,
        required: Vec<String>,
        extra: Vec<String>,
    },

    #[error("using reference '${0}' but '{0}' is undefined in template")]
    UndefinedReference(String),

    #[error("using reference '${0}' but '{0}' has already been assigned in template")]
    DuplicateIdentifier(String),

    #[error("cannot resolve aliases: {0:?}. Maybe you need to update your local model with `cumulus sync` ?")]
    UnresolvedAliases(Vec<String>),

    #[error("template contains unresolved holes: {0:?}")]
    UnresolvedHoles(Vec<String>),

    #[error("template contains unresolved alias: {0:?}")]
    UnresolvedAliasParams(Vec<String>),
}

fn params_hint(required: &[String], extra: &[String]) -> String {
    let mut hint = String::new();
    if !required.is_empty() {
        hint.push_str(&format!("\n\t- required params: {}", required.join(", ")));
    }
    if !extra.is_empty() {
        hint.push_str(&format!("\n\t- extra params: {}", extra.join(", ")));
    }
    hint
}
