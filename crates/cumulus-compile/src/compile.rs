//! Multi-pass template compiler.
//!
//! Compilation is an ordered list of passes over a parsed template and its
//! environment:
//!
//! ```text
//! parsed
//!   → resolve_against_definitions      schema check + hole normalization
//!   → check_invalid_reference_declarations
//!   → resolve_holes                    explicit fillers
//!   → resolve_missing_holes            interactive fallback, sorted order
//!   → replace_variable_values          assignments → resolved_refs → commands
//!   → remove_value_statements          prune resolved value assignments
//!   → resolve_aliases                  external model lookup
//!   → fail_on_unresolved_holes         normal mode only
//!   → fail_on_unresolved_aliases       normal mode only
//! → compiled
//! ```
//!
//! Passes run sequentially; the first error aborts the pipeline. The caller
//! keeps the partially processed template and the mutated environment either
//! way, so a failed compile can still be rendered, logged or retried.
//!
//! Ordering constraints: definitions must be resolved before holes are
//! filled (hole names get normalized there), variable values must be
//! replaced before value statements are pruned, and the two fail-fast
//! checks come last. Everything else is independent; extending the
//! pipeline means prepending or appending to a mode slice.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use cumulus_core::parser::ParseError;
use cumulus_core::{parse_script, AssignExpr, CompositeValue, ParamValue, Script, Statement};

use crate::env::Env;
use crate::error::CompileError;

// =============================================================================
// TEMPLATE
// =============================================================================

/// A parsed script plus the opaque execution ID assigned by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub id: String,
    pub script: Script,
}

impl Template {
    pub fn new(id: impl Into<String>, script: Script) -> Self {
        Template {
            id: id.into(),
            script,
        }
    }

    /// Parse `source` into a template carrying `id`.
    pub fn parse(id: impl Into<String>, source: &str) -> Result<Self, ParseError> {
        Ok(Template {
            id: id.into(),
            script: parse_script(source)?,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.script)
    }
}

// =============================================================================
// PASS COMPOSITION
// =============================================================================

/// A single compile pass. Mutates the template and environment in place.
pub type CompilePass = fn(&mut Template, &mut Env) -> Result<(), CompileError>;

/// Lenient mode: resolve what can be resolved, let unresolved holes and
/// alias params survive. Downstream consumers of a lenient compile must
/// tolerate `@…` params and remaining holes.
pub static LENIENT_COMPILE_MODE: &[CompilePass] = &[
    resolve_against_definitions,
    check_invalid_reference_declarations,
    resolve_holes,
    resolve_missing_holes,
    replace_variable_values,
    remove_value_statements,
    resolve_aliases,
];

/// Normal mode: lenient plus fail-fast on anything still unresolved.
pub static NORMAL_COMPILE_MODE: &[CompilePass] = &[
    resolve_against_definitions,
    check_invalid_reference_declarations,
    resolve_holes,
    resolve_missing_holes,
    replace_variable_values,
    remove_value_statements,
    resolve_aliases,
    fail_on_unresolved_holes,
    fail_on_unresolved_aliases,
];

/// Run `passes` in order over the template and environment. Stops at the
/// first failing pass; the template then holds whatever the completed
/// passes produced.
pub fn compile(
    tpl: &mut Template,
    env: &mut Env,
    passes: &[CompilePass],
) -> Result<(), CompileError> {
    for pass in passes {
        pass(tpl, env)?;
    }
    Ok(())
}

/// [`compile`] with [`NORMAL_COMPILE_MODE`].
pub fn compile_normal(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    compile(tpl, env, NORMAL_COMPILE_MODE)
}

/// [`compile`] with [`LENIENT_COMPILE_MODE`].
pub fn compile_lenient(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    compile(tpl, env, LENIENT_COMPILE_MODE)
}

// =============================================================================
// PASSES
// =============================================================================

/// Check every command against its definition and normalize required-key
/// holes: a required key the user did not supply gets an auto-inserted hole
/// named `entity.key`.
fn resolve_against_definitions(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    let lookup = env
        .lookup
        .as_ref()
        .ok_or(CompileError::MissingDefinitionLookup)?;

    for cmd in tpl.script.commands_mut() {
        let def_key = cmd.definition_key();
        let def = lookup(&def_key).ok_or_else(|| CompileError::MissingDefinition(def_key))?;

        for key in cmd.keys() {
            if !def.accepts(key) {
                return Err(CompileError::UnexpectedParamKey {
                    action: cmd.action.clone(),
                    entity: cmd.entity.clone(),
                    key: key.to_string(),
                    required: def.required_params.clone(),
                    extra: def.extra_params.clone(),
                });
            }
        }

        for required in &def.required_params {
            let normalized = format!("{}.{}", cmd.entity, required);
            if cmd.param(required).is_some() || cmd.has_ref_at(required) {
                cmd.holes.retain(|(key, _)| key != &normalized);
            } else if !cmd.has_hole_at(required) {
                cmd.holes.push((required.clone(), normalized));
            }
        }
    }

    Ok(())
}

/// Forward scan over the statements: every `$ref` must name an identifier
/// assigned by an earlier statement, and no identifier is assigned twice.
fn check_invalid_reference_declarations(
    tpl: &mut Template,
    _env: &mut Env,
) -> Result<(), CompileError> {
    let mut known: BTreeSet<String> = BTreeSet::new();

    for st in &tpl.script.statements {
        if let Some(cmd) = st.command() {
            for name in cmd.ref_names() {
                if !known.contains(name) {
                    return Err(CompileError::UndefinedReference(name.to_string()));
                }
            }
        }
        if let Statement::Assignment(assign) = st {
            if !known.insert(assign.ident.clone()) {
                return Err(CompileError::DuplicateIdentifier(assign.ident.clone()));
            }
        }
    }

    Ok(())
}

/// Fill holes from the explicit fillers and record what was consumed.
fn resolve_holes(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    let mut consumed = HashMap::new();
    tpl.script
        .visit_holes(|h| consumed.extend(h.fill_holes(&env.fillers)));
    env.record_processed(consumed.into_iter().map(|(name, val)| (name, Some(val))));
    Ok(())
}

/// Ask the missing-holes callback for every hole still unresolved, in
/// lexicographic order so prompting is deterministic, then fill with the
/// answers. A `None` answer leaves the hole unresolved but is still
/// recorded in the audit trail; only never-asked holes leave no trace.
fn resolve_missing_holes(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    let mut remaining: BTreeSet<String> = BTreeSet::new();
    tpl.script.visit_holes(|h| remaining.extend(h.hole_names()));

    let mut answers: HashMap<String, Option<ParamValue>> = HashMap::new();
    if let Some(callback) = env.missing_holes.as_mut() {
        for name in &remaining {
            answers.insert(name.clone(), callback(name));
        }
    }

    let fillers: HashMap<String, ParamValue> = answers
        .iter()
        .filter_map(|(name, val)| val.clone().map(|v| (name.clone(), v)))
        .collect();
    tpl.script.visit_holes(|h| {
        h.fill_holes(&fillers);
    });
    env.record_processed(answers);
    Ok(())
}

/// Record the value of every fully resolved value assignment under its
/// identifier, then propagate those values into command references.
fn replace_variable_values(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    for assign in tpl.script.assignments() {
        if let AssignExpr::Value(val) = &assign.expr {
            if val.is_resolved() {
                if let Some(resolved) = val.value() {
                    env.resolved_refs.insert(assign.ident.clone(), resolved);
                }
            }
        }
    }

    for cmd in tpl.script.commands_mut() {
        cmd.process_refs(&env.resolved_refs);
    }

    tracing::debug!(references = ?env.resolved_refs.keys().collect::<Vec<_>>(), "references resolved so far");
    Ok(())
}

/// Drop assignments whose expression is a resolved value; their work is
/// done once the values are propagated. Commands and command assignments
/// are preserved.
fn remove_value_statements(tpl: &mut Template, _env: &mut Env) -> Result<(), CompileError> {
    let statements = std::mem::take(&mut tpl.script.statements);
    tpl.script.statements = statements
        .into_iter()
        .filter(|st| {
            !matches!(
                st,
                Statement::Assignment(assign)
                    if matches!(&assign.expr, AssignExpr::Value(val) if val.is_resolved())
            )
        })
        .collect();
    Ok(())
}

/// Resolve alias params through the environment's alias resolver. An empty
/// resolution is a failure; all failures are reported together. Without a
/// resolver every alias is simply left unresolved.
fn resolve_aliases(tpl: &mut Template, env: &mut Env) -> Result<(), CompileError> {
    let mut unresolved: Vec<String> = Vec::new();

    if let Some(resolver) = env.alias_resolver.as_mut() {
        for cmd in tpl.script.commands_mut() {
            let entity = cmd.entity.clone();
            for i in 0..cmd.params.len() {
                let key = cmd.params[i].0.clone();

                let alias = match &cmd.params[i].1 {
                    CompositeValue::Alias {
                        name,
                        resolved: None,
                    } => Some(name.clone()),
                    _ => None,
                };
                if let Some(alias) = alias {
                    let actual = resolver(&entity, &key, &alias);
                    if actual.is_empty() {
                        unresolved.push(alias);
                    } else {
                        tracing::debug!(%entity, %key, %alias, resolved = %actual, "alias resolved");
                        cmd.params[i].1 = CompositeValue::Literal(ParamValue::Str(actual));
                        cmd.holes.retain(|(k, _)| k != &key);
                    }
                    continue;
                }

                // aliases nested in lists resolve through the value itself
                cmd.params[i].1.resolve_aliases(&mut |alias| {
                    let actual = resolver(&entity, &key, alias);
                    if actual.is_empty() {
                        unresolved.push(alias.to_string());
                        None
                    } else {
                        Some(ParamValue::Str(actual))
                    }
                });
            }
        }
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(CompileError::UnresolvedAliases(unresolved))
    }
}

/// Normal mode backstop: no command may still carry holes.
fn fail_on_unresolved_holes(tpl: &mut Template, _env: &mut Env) -> Result<(), CompileError> {
    let mut unresolved: Vec<String> = Vec::new();
    for cmd in tpl.script.commands() {
        unresolved.extend(cmd.holes.iter().map(|(_, name)| name.clone()));
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(CompileError::UnresolvedHoles(unresolved))
    }
}

/// Normal mode backstop: no command param may still be an alias.
fn fail_on_unresolved_aliases(tpl: &mut Template, _env: &mut Env) -> Result<(), CompileError> {
    let mut unresolved: Vec<String> = Vec::new();
    for cmd in tpl.script.commands() {
        for (_, val) in &cmd.params {
            if let CompositeValue::Alias {
                name,
                resolved: None,
            } = val
            {
                unresolved.push(format!("@{}", name));
            }
        }
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(CompileError::UnresolvedAliasParams(unresolved))
    }
}

// =============================================================================
// TESTS
// =============================================================================
