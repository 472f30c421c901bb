// bfc — Bifrost Compiler
//
// Library root. Lowers module listings of trained spiking networks to a
// network IR and emits PyNN programs from it.

pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod listing;
pub mod literal;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod statement;
