//! Template AST.
//!
//! A parsed script is an ordered sequence of statements; each statement is a
//! command (`action entity key=value …`), an assignment (`ident = <command
//! or value>`) or a comment. Command parameters live in exactly one of three
//! ordered maps:
//!
//! - `params` — plain and composite values,
//! - `refs`   — key → referenced identifier (`$name`),
//! - `holes`  — key → hole name (`{name}`, or the normalized
//!   `entity.key` inserted by the schema-check pass).
//!
//! Compiler passes walk the tree through the iterator accessors and
//! [`Script::visit_holes`]; walking is in document order and the visited
//! node may be mutated.

pub mod values;

pub use values::{CompositeValue, ParamValue};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// SCRIPT & STATEMENTS
// =============================================================================

/// A complete parsed template script.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Script {
    pub statements: Vec<Statement>,
}

/// A single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Command(CommandNode),
    Assignment(AssignmentNode),
    /// Raw comment text, marker included, rendered back verbatim.
    Comment(String),
}

impl Statement {
    /// The command carried by this statement, if any: a direct command or
    /// one bound by an assignment.
    pub fn command(&self) -> Option<&CommandNode> {
        match self {
            Statement::Command(cmd) => Some(cmd),
            Statement::Assignment(AssignmentNode {
                expr: AssignExpr::Command(cmd),
                ..
            }) => Some(cmd),
            _ => None,
        }
    }

    /// Mutable variant of [`Statement::command`].
    pub fn command_mut(&mut self) -> Option<&mut CommandNode> {
        match self {
            Statement::Command(cmd) => Some(cmd),
            Statement::Assignment(AssignmentNode {
                expr: AssignExpr::Command(cmd),
                ..
            }) => Some(cmd),
            _ => None,
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// An action applied to an entity with a bag of parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandNode {
    pub action: String,
    pub entity: String,
    /// Ordered key → value map. A key appears in exactly one of `params`,
    /// `refs` and `holes`.
    pub params: Vec<(String, CompositeValue)>,
    /// Ordered key → referenced identifier.
    pub refs: Vec<(String, String)>,
    /// Ordered key → hole name.
    pub holes: Vec<(String, String)>,
}

impl CommandNode {
    pub fn new(action: impl Into<String>, entity: impl Into<String>) -> Self {
        CommandNode {
            action: action.into(),
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Schema lookup key: `action` + `entity`, no separator.
    pub fn definition_key(&self) -> String {
        format!("{}{}", self.action, self.entity)
    }

    /// All parameter keys supplied by the user: params first, then refs,
    /// in document order.
    pub fn keys(&self) -> Vec<&str> {
        self.params
            .iter()
            .map(|(k, _)| k.as_str())
            .chain(self.refs.iter().map(|(k, _)| k.as_str()))
            .collect()
    }

    /// Look up a param value by key.
    pub fn param(&self, key: &str) -> Option<&CompositeValue> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace a param value, preserving insertion order.
    pub fn set_param(&mut self, key: &str, val: CompositeValue) {
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = val,
            None => self.params.push((key.to_string(), val)),
        }
    }

    /// Is `key` present in the refs map?
    pub fn has_ref_at(&self, key: &str) -> bool {
        self.refs.iter().any(|(k, _)| k == key)
    }

    /// Is `key` present in the holes map?
    pub fn has_hole_at(&self, key: &str) -> bool {
        self.holes.iter().any(|(k, _)| k == key)
    }

    /// Referenced identifiers from the refs map, in order.
    pub fn ref_names(&self) -> Vec<&str> {
        self.refs.iter().map(|(_, name)| name.as_str()).collect()
    }

    /// Fill keyed holes and holes nested in list params from `fillers`.
    /// A filled keyed hole moves to `params` as a literal. Returns the
    /// consumed subset of `fillers`.
    pub fn process_holes(
        &mut self,
        fillers: &HashMap<String, ParamValue>,
    ) -> HashMap<String, ParamValue> {
        let mut consumed = HashMap::new();

        let holes = std::mem::take(&mut self.holes);
        for (key, name) in holes {
            match fillers.get(&name) {
                Some(v) => {
                    self.set_param(&key, CompositeValue::Literal(v.clone()));
                    consumed.insert(name, v.clone());
                }
                None => self.holes.push((key, name)),
            }
        }

        for (_, val) in &mut self.params {
            consumed.extend(val.fill_holes(fillers));
        }

        consumed
    }

    /// Fill keyed refs and refs nested in list params from `resolved`.
    /// A filled keyed ref moves to `params` as a literal.
    pub fn process_refs(&mut self, resolved: &HashMap<String, ParamValue>) {
        let refs = std::mem::take(&mut self.refs);
        for (key, name) in refs {
            match resolved.get(&name) {
                Some(v) => self.set_param(&key, CompositeValue::Literal(v.clone())),
                None => self.refs.push((key, name)),
            }
        }

        for (_, val) in &mut self.params {
            val.fill_refs(resolved);
        }
    }
}

// =============================================================================
// ASSIGNMENTS
// =============================================================================

/// `ident = <command or value>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentNode {
    pub ident: String,
    pub expr: AssignExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignExpr {
    Command(CommandNode),
    Value(CompositeValue),
}

// =============================================================================
// HOLE CARRIERS
// =============================================================================

/// Uniform surface over everything that can carry holes: command nodes
/// (keyed holes plus holes nested in list params) and assignment value
/// expressions.
pub trait WithHoles {
    /// Names of unfilled holes, in document order.
    fn hole_names(&self) -> Vec<String>;

    /// Fill from `fillers`; returns the consumed subset.
    fn fill_holes(&mut self, fillers: &HashMap<String, ParamValue>)
        -> HashMap<String, ParamValue>;
}

impl WithHoles for CommandNode {
    fn hole_names(&self) -> Vec<String> {
        self.holes
            .iter()
            .map(|(_, name)| name.clone())
            .chain(
                self.params
                    .iter()
                    .flat_map(|(_, v)| v.holes().into_iter().map(str::to_string)),
            )
            .collect()
    }

    fn fill_holes(
        &mut self,
        fillers: &HashMap<String, ParamValue>,
    ) -> HashMap<String, ParamValue> {
        self.process_holes(fillers)
    }
}

impl WithHoles for CompositeValue {
    fn hole_names(&self) -> Vec<String> {
        self.holes().into_iter().map(str::to_string).collect()
    }

    fn fill_holes(
        &mut self,
        fillers: &HashMap<String, ParamValue>,
    ) -> HashMap<String, ParamValue> {
        CompositeValue::fill_holes(self, fillers)
    }
}

// =============================================================================
// TREE WALKING
// =============================================================================

impl Script {
    /// Commands in document order: direct commands and commands bound by
    /// assignments.
    pub fn commands(&self) -> impl Iterator<Item = &CommandNode> {
        self.statements.iter().filter_map(Statement::command)
    }

    /// Mutable variant of [`Script::commands`].
    pub fn commands_mut(&mut self) -> impl Iterator<Item = &mut CommandNode> {
        self.statements.iter_mut().filter_map(Statement::command_mut)
    }

    /// Assignment statements in document order.
    pub fn assignments(&self) -> impl Iterator<Item = &AssignmentNode> {
        self.statements.iter().filter_map(|st| match st {
            Statement::Assignment(a) => Some(a),
            _ => None,
        })
    }

    /// Mutable variant of [`Script::assignments`].
    pub fn assignments_mut(&mut self) -> impl Iterator<Item = &mut AssignmentNode> {
        self.statements.iter_mut().filter_map(|st| match st {
            Statement::Assignment(a) => Some(a),
            _ => None,
        })
    }

    /// Visit every hole carrier in document order. The callback may mutate
    /// the carrier.
    pub fn visit_holes(&mut self, mut f: impl FnMut(&mut dyn WithHoles)) {
        for st in &mut self.statements {
            match st {
                Statement::Command(cmd) => f(cmd),
                Statement::Assignment(a) => match &mut a.expr {
                    AssignExpr::Command(cmd) => f(cmd),
                    AssignExpr::Value(v) => f(v),
                },
                Statement::Comment(_) => {}
            }
        }
    }
}

// =============================================================================
// RENDERING
// =============================================================================

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.entity)?;
        for (key, val) in &self.params {
            write!(f, " {}={}", key, val)?;
        }
        for (key, name) in &self.refs {
            write!(f, " {}=${}", key, name)?;
        }
        for (key, name) in &self.holes {
            write!(f, " {}={{{}}}", key, name)?;
        }
        Ok(())
    }
}

impl fmt::Display for AssignmentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            AssignExpr::Command(cmd) => write!(f, "{} = {}", self.ident, cmd),
            AssignExpr::Value(v) => write!(f, "{} = {}", self.ident, v),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Command(cmd) => write!(f, "{}", cmd),
            Statement::Assignment(a) => write!(f, "{}", a),
            Statement::Comment(text) => write!(f, "{}", text),
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, st) in self.statements.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", st)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
