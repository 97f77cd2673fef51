//! cumulus-core: template grammar, AST and composite value algebra.
//!
//! This crate contains the pure language layer with no I/O and no knowledge
//! of cloud drivers:
//! - AST types (`Script`, `Statement`, `CommandNode`, `AssignmentNode`)
//! - The composite value algebra (`CompositeValue`, `ParamValue`)
//! - The nom-based template parser with positioned errors
//! - Canonical rendering (`Display`) for the round-trip contract
//!
//! Compilation against definitions and an environment lives in
//! `cumulus-compile`.

pub mod ast;
pub mod parser;

// Re-export commonly used types
pub use ast::{
    AssignExpr, AssignmentNode, CommandNode, CompositeValue, ParamValue, Script, Statement,
    WithHoles,
};
pub use parser::{parse_script, ParseError};
