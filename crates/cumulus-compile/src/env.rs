//! Compilation environment.
//!
//! The environment carries everything a compile needs besides the template
//! itself: the definition oracle, user-supplied hole fillers, the optional
//! interactive fallback for missing holes, the alias resolver bound to the
//! external cloud model, and the outputs the passes accumulate (resolved
//! references and the audit trail of fillers actually consumed).
//!
//! It is created empty, populated by the caller, threaded `&mut` through
//! every pass and handed back afterwards. Nothing here is process-global,
//! so concurrent compiles over distinct environments are safe.

use cumulus_core::ParamValue;
use std::collections::HashMap;

use crate::definition::DefinitionLookup;

/// Interactive fallback for holes no filler covered. `None` means "leave
/// unresolved"; the answer is still recorded in the audit trail, and
/// normal mode will then fail on the remaining holes.
pub type MissingHolesFn = Box<dyn FnMut(&str) -> Option<ParamValue>>;

/// Alias resolver: `(entity, key, alias) -> resolved`. The empty string is
/// the sole failure signal; "not found" and "lookup error" are not
/// distinguishable through it.
pub type AliasResolverFn = Box<dyn FnMut(&str, &str, &str) -> String>;

/// Mutable state threaded through the compile passes.
#[derive(Default)]
pub struct Env {
    /// Definition oracle. Compilation fails fast when absent.
    pub lookup: Option<DefinitionLookup>,

    /// Explicit hole fillers, keyed by hole name.
    pub fillers: HashMap<String, ParamValue>,

    /// Interactive fallback for holes left after explicit filling.
    pub missing_holes: Option<MissingHolesFn>,

    /// Alias resolver against the external model.
    pub alias_resolver: Option<AliasResolverFn>,

    /// Values of resolved assignments, keyed by identifier. Populated by
    /// the reference-propagation pass; callers read it back for logging
    /// and reproducibility.
    pub resolved_refs: HashMap<String, ParamValue>,

    /// Fillers actually consumed, including answers from the missing-holes
    /// callback. A `None` value marks a hole the callback was asked about
    /// and declined to fill. The audit trail callers persist alongside an
    /// execution.
    processed_fillers: HashMap<String, Option<ParamValue>>,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    /// Merge filler maps into the environment; later entries win.
    pub fn add_fillers(&mut self, fillers: impl IntoIterator<Item = (String, ParamValue)>) {
        self.fillers.extend(fillers);
    }

    /// Copy of the audit trail of substitutions actually applied. `None`
    /// entries are holes the missing-holes callback declined.
    pub fn processed_fillers(&self) -> HashMap<String, Option<ParamValue>> {
        self.processed_fillers.clone()
    }

    /// Record consumed fillers reported back by a fill pass.
    pub(crate) fn record_processed(
        &mut self,
        consumed: impl IntoIterator<Item = (String, Option<ParamValue>)>,
    ) {
        self.processed_fillers.extend(consumed);
    }
}
