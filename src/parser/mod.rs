//! Source text to bytecode.
//!
//! The lexer feeds a recursive-descent parser that builds a syntax tree;
//! the emitter walks the tree and produces function definitions that
//! `entry` materializes on the heap.

pub mod ast;
pub mod emit;
mod entry;
pub mod error;
pub mod json;
pub mod lexer;
pub mod parse;
pub mod pc2line;
pub mod regexp_flags;
pub mod stack_limit;
pub mod tokens;
