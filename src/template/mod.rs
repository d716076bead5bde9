//! Glimmer template syntax: AST, parser and span-preserving code generation.

pub mod ast;
pub mod codegen;
pub mod parser;

pub use ast::Template;
pub use codegen::regenerate;
pub use parser::{parse_template, TemplateParseError};
