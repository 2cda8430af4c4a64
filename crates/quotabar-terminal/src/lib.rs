//! Terminal output formatting for quotabar
//!
//! This crate provides table and JSON formatters for instance status,
//! configured instances, and the provider type catalog.

pub mod output;

pub use output::{
    JsonFormatter, OutputFormatter, StatusEntry, TableFormatter, TypeEntry, get_formatter,
};
