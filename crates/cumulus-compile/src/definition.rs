//! Command definitions.
//!
//! A definition is the schema for one `action entity` pair: which parameter
//! keys the command requires and which extra keys it accepts. Definitions
//! come from the caller (typically generated from the cloud driver), so the
//! compiler only depends on a lookup function.

use serde::{Deserialize, Serialize};

/// Schema for a single `action entity` pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Definition {
    pub action: String,
    pub entity: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub extra_params: Vec<String>,
}

impl Definition {
    pub fn new(action: impl Into<String>, entity: impl Into<String>) -> Self {
        Definition {
            action: action.into(),
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Builder-style required params.
    pub fn required(mut self, params: &[&str]) -> Self {
        self.required_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder-style extra params.
    pub fn extra(mut self, params: &[&str]) -> Self {
        self.extra_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Lookup key: `action` + `entity`, no separator.
    pub fn key(&self) -> String {
        format!("{}{}", self.action, self.entity)
    }

    /// Is `key` a valid parameter key for this command?
    pub fn accepts(&self, key: &str) -> bool {
        self.required_params.iter().any(|p| p == key)
            || self.extra_params.iter().any(|p| p == key)
    }
}

/// Caller-supplied definition oracle, keyed by [`Definition::key`].
pub type DefinitionLookup = Box<dyn Fn(&str) -> Option<Definition>>;
