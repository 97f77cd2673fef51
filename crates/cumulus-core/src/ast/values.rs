//! Composite value algebra.
//!
//! Every parameter position in a template holds a [`CompositeValue`]: a
//! plain literal, a hole `{name}` awaiting an external filler, a reference
//! `$name` to an earlier assignment, an alias `@name` to be looked up in the
//! cloud model, or a list of such values. The compiler passes talk to all of
//! them through the same small surface: enumerate what is still unresolved,
//! fill in what can be filled, and render back to source text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// PLAIN PAYLOADS
// =============================================================================

/// A fully resolved parameter payload.
///
/// CIDR and IP payloads keep their canonical textual form; the parser
/// normalizes them before construction. `List` only arises from composite
/// list values and from fillers, never from a single literal token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Cidr(String),
    Ip(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Get as string slice (string-like payloads only).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) | ParamValue::Cidr(s) | ParamValue::Ip(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

/// Character set of a bare (unquoted) parameter token.
pub(crate) fn is_bare_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "._-:/+;~<>@*".contains(c)
}

/// Would `s` survive rendering as a bare token and re-parse as the same
/// string? Anything number-shaped must be quoted to preserve its type.
fn renders_bare(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(is_bare_char)
        && s.parse::<i64>().is_err()
        && s.parse::<f64>().is_err()
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => {
                if s.contains('\'') {
                    write!(f, "\"{}\"", s)
                } else if renders_bare(s) {
                    write!(f, "{}", s)
                } else {
                    write!(f, "'{}'", s)
                }
            }
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Cidr(s) | ParamValue::Ip(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// COMPOSITE VALUES
// =============================================================================

/// A template parameter value before and during compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompositeValue {
    /// A plain literal.
    Literal(ParamValue),

    /// A hole `{name}`. Unfilled until an explicit filler or the
    /// missing-holes callback supplies a payload.
    Hole {
        name: String,
        filled: Option<ParamValue>,
    },

    /// A reference `$name` to a previously assigned identifier.
    Ref {
        name: String,
        resolved: Option<ParamValue>,
    },

    /// An alias `@name`, resolved against the external cloud model.
    Alias {
        name: String,
        resolved: Option<ParamValue>,
    },

    /// An ordered list of values. The grammar only produces flat lists but
    /// the operations recurse, so nesting is tolerated.
    List(Vec<CompositeValue>),
}

impl CompositeValue {
    // =========================================================================
    // CONSTRUCTORS
    // =========================================================================

    pub fn literal(v: impl Into<ParamValue>) -> Self {
        CompositeValue::Literal(v.into())
    }

    pub fn hole(name: impl Into<String>) -> Self {
        CompositeValue::Hole {
            name: name.into(),
            filled: None,
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        CompositeValue::Ref {
            name: name.into(),
            resolved: None,
        }
    }

    pub fn alias(name: impl Into<String>) -> Self {
        CompositeValue::Alias {
            name: name.into(),
            resolved: None,
        }
    }

    pub fn list(vals: impl IntoIterator<Item = CompositeValue>) -> Self {
        CompositeValue::List(vals.into_iter().collect())
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Names of unfilled holes, in document order.
    pub fn holes(&self) -> Vec<&str> {
        match self {
            CompositeValue::Hole { name, filled: None } => vec![name.as_str()],
            CompositeValue::List(items) => items.iter().flat_map(|v| v.holes()).collect(),
            _ => vec![],
        }
    }

    /// Names of unresolved references, in document order.
    pub fn refs(&self) -> Vec<&str> {
        match self {
            CompositeValue::Ref {
                name,
                resolved: None,
            } => vec![name.as_str()],
            CompositeValue::List(items) => items.iter().flat_map(|v| v.refs()).collect(),
            _ => vec![],
        }
    }

    /// Names of unresolved aliases, in document order.
    pub fn aliases(&self) -> Vec<&str> {
        match self {
            CompositeValue::Alias {
                name,
                resolved: None,
            } => vec![name.as_str()],
            CompositeValue::List(items) => items.iter().flat_map(|v| v.aliases()).collect(),
            _ => vec![],
        }
    }

    /// No holes, references or aliases left unresolved.
    pub fn is_resolved(&self) -> bool {
        self.holes().is_empty() && self.refs().is_empty() && self.aliases().is_empty()
    }

    /// The current resolved payload. A list yields the payloads of the
    /// children that have one; an unresolved scalar yields `None`.
    pub fn value(&self) -> Option<ParamValue> {
        match self {
            CompositeValue::Literal(v) => Some(v.clone()),
            CompositeValue::Hole { filled, .. } => filled.clone(),
            CompositeValue::Ref { resolved, .. } | CompositeValue::Alias { resolved, .. } => {
                resolved.clone()
            }
            CompositeValue::List(items) => Some(ParamValue::List(
                items.iter().filter_map(|v| v.value()).collect(),
            )),
        }
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    /// Fill holes from `fillers`. Mutates in place and returns the subset of
    /// `fillers` that was consumed.
    pub fn fill_holes(
        &mut self,
        fillers: &HashMap<String, ParamValue>,
    ) -> HashMap<String, ParamValue> {
        let mut consumed = HashMap::new();
        match self {
            CompositeValue::Hole { name, filled } => {
                if let Some(v) = fillers.get(name) {
                    *filled = Some(v.clone());
                    consumed.insert(name.clone(), v.clone());
                }
            }
            CompositeValue::List(items) => {
                for item in items {
                    consumed.extend(item.fill_holes(fillers));
                }
            }
            _ => {}
        }
        consumed
    }

    /// Fill references from `resolved`. Mutates in place.
    pub fn fill_refs(&mut self, resolved: &HashMap<String, ParamValue>) {
        match self {
            CompositeValue::Ref {
                name,
                resolved: slot,
            } => {
                if let Some(v) = resolved.get(name) {
                    *slot = Some(v.clone());
                }
            }
            CompositeValue::List(items) => {
                for item in items {
                    item.fill_refs(resolved);
                }
            }
            _ => {}
        }
    }

    /// Resolve aliases through `resolver`. `None` leaves the alias
    /// unresolved; the caller decides whether that is fatal.
    pub fn resolve_aliases(&mut self, resolver: &mut dyn FnMut(&str) -> Option<ParamValue>) {
        match self {
            CompositeValue::Alias {
                name,
                resolved: slot,
            } if slot.is_none() => {
                if let Some(v) = resolver(name) {
                    *slot = Some(v);
                }
            }
            CompositeValue::List(items) => {
                for item in items {
                    item.resolve_aliases(resolver);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for CompositeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeValue::Literal(v) => write!(f, "{}", v),
            CompositeValue::Hole { name, filled: None } => write!(f, "{{{}}}", name),
            CompositeValue::Hole {
                filled: Some(v), ..
            } => write!(f, "{}", v),
            CompositeValue::Ref {
                name,
                resolved: None,
            } => write!(f, "${}", name),
            CompositeValue::Alias {
                name,
                resolved: None,
            } => {
                // alias names may carry spaces, which need re-quoting
                if name.chars().all(is_bare_char) && !name.is_empty() {
                    write!(f, "@{}", name)
                } else {
                    write!(f, "@'{}'", name)
                }
            }
            CompositeValue::Ref {
                resolved: Some(v), ..
            }
            | CompositeValue::Alias {
                resolved: Some(v), ..
            } => write!(f, "{}", v),
            CompositeValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
