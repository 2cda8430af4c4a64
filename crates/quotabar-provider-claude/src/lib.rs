//! Claude provider for quotabar
//!
//! This crate implements the provider trait for Claude subscriptions, reading
//! the OAuth credentials Claude Code keeps on disk and refreshing them when
//! they expire.

pub mod credentials;
pub mod oauth;
pub mod provider;

pub use provider::{ClaudeProvider, TokenState};
