//! The query DSL: spec types, derived-expression grammar, compiler, cache

pub mod cache;
pub mod compiler;
pub mod expr;
pub mod spec;

pub use cache::QueryCache;
pub use compiler::{CompiledQuery, SqlValue, Table, compile, compile_and_run};
pub use spec::{AggFn, Aggregation, DerivedField, FilterCondition, FilterOp, QuerySpec, SortDir, SortSpec};
