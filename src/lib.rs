//! Natural-language analytics over tabular data.
//!
//! The model never writes SQL: it drives a fixed set of validated tools,
//! and every computation runs deterministically in the embedded analytical
//! store. The crate is organised the usual way: `core` for configuration
//! and lifecycle, `data` for the store and dataset registry, `domain` for
//! the query compiler, tools, LLM adapters, and the agent loop, `api` for
//! the HTTP surface.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
