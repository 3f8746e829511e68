//! Universal Query Language interpreter
//!
//! Two-stage pipeline: [`lexer`] turns the statement into position-tagged
//! tokens, [`parser`] builds the engine-agnostic [`UqlCommand`] that the
//! facade dispatches to exactly one adapter primitive. A command is never
//! persisted and never partially executed: any syntax error aborts the
//! whole statement.

pub mod lexer;
pub mod parser;

pub use parser::{parse, UqlCommand};
