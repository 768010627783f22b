// ptcg — Ptolemy code generator
//
// Library root. Template macros, adapters and the generation driver.

pub mod adapter;
pub mod adapters;
pub mod convert;
pub mod diag;
pub mod director;
pub mod exec;
pub mod expr;
pub mod generator;
pub mod lexer;
pub mod macros;
pub mod model;
pub mod pass;
pub mod pipeline;
pub mod resolver;
pub mod substitute;
pub mod target;
pub mod template;
pub mod types;
