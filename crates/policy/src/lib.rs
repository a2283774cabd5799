//! Supabase RLS policy predicates for Rust
//!
//! This crate describes row-level security policies and compiles their predicates
//! into the SQL text used by `CREATE POLICY` / `ALTER POLICY`.
//!
//! # Features
//!
//! - Literal SQL predicates, deferred predicates and structured predicates
//! - Resolution of structured predicates against table metadata
//! - Safe inlining of literal values (policy DDL has no bind parameters)
//! - Identifier and literal quoting for PostgreSQL

pub mod compiler;
pub mod error;
pub mod expr;
pub mod filter;
pub mod model;
pub mod policy;
pub mod quote;

pub use compiler::Compiler;
pub use error::CompileError;
pub use expr::{Operand, Predicate};
pub use filter::Comparison;
pub use model::{Column, ModelCatalog, Relation, TableModel};
pub use policy::{DeclaredPolicy, Deferred, Policy, PolicyExpr};
pub use quote::{quote_literal, quote_name, quote_string};
