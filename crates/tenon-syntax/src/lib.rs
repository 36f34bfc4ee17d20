//! Syntax layer of the tenon language workbench.
//!
//! This crate turns source text into trees for a language described by a
//! [`Grammar`]:
//!
//! - [`grammar`]: rule model and DSL, compiled once per language
//! - [`lexer`]: longest-match tokenizer over keywords and terminals
//! - [`parser`]: grammar interpreter producing a [`ParseResult`]
//! - [`cst`]: concrete syntax tree arena and its incremental builder
//! - [`ast`]: abstract syntax tree arena, property values and node paths
//! - [`convert`]: token text → property value conversion
//! - [`wire`]: serialized form of parse results and hydration
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tenon_syntax::grammar::{GrammarBuilder, append, assign, call, group, keyword, many, terminal};
//! use tenon_syntax::AstParser;
//!
//! let mut builder = GrammarBuilder::new("shapes");
//! builder
//!     .node_rule("Model", many(append("shapes", call("Shape"))))
//!     .node_rule("Shape", group([keyword("shape"), assign("name", terminal("ID"))]))
//!     .terminal("ID", r"[a-z]+")
//!     .hidden_terminal("WS", r"\s+");
//! let parser = AstParser::new(Arc::new(builder.build().unwrap())).unwrap();
//!
//! let result = parser.parse("shape circle shape square");
//! let root = result.root().unwrap();
//! assert_eq!(result.ast.children(root).len(), 2);
//! ```

pub mod ast;
pub mod convert;
pub mod cst;
pub mod error;
pub mod grammar;
pub mod lexer;
pub mod parser;
pub mod text;
pub mod wire;

pub use ast::{Ast, AstNode, AstNodeId, Reference, ReferenceLocator, ReferenceTarget, Resolution, Value};
pub use convert::{ConvertContext, DefaultValueConverter, ValueConverter};
pub use cst::{CstBuilder, CstNodeId, CstTree};
pub use error::{GrammarError, Result, SyntaxError};
pub use grammar::{Grammar, GrammarBuilder};
pub use lexer::{Lexer, LexingReport, Token};
pub use parser::{AstParser, ParseAborted, ParseResult};
pub use text::{LineIndex, Position, Range, Span};
