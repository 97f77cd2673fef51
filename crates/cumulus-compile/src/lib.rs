//! cumulus-compile: definitions, environment and the multi-pass compiler.
//!
//! Takes a parsed [`cumulus_core::Script`], wraps it in a [`Template`] and
//! resolves it against a caller-supplied environment: command definitions,
//! hole fillers, an optional interactive fallback and an alias resolver
//! bound to the external cloud model. The output is an executable template
//! plus the audit trail of substitutions that were actually applied.
//!
//! Execution itself (drivers, rollback, persistence) is out of scope; this
//! crate ends where a fully resolved template begins.

pub mod compile;
pub mod definition;
pub mod env;
pub mod error;

// Re-export commonly used types
pub use compile::{
    compile, compile_lenient, compile_normal, CompilePass, Template, LENIENT_COMPILE_MODE,
    NORMAL_COMPILE_MODE,
};
pub use definition::{Definition, DefinitionLookup};
pub use env::{AliasResolverFn, Env, MissingHolesFn};
pub use error::CompileError;
