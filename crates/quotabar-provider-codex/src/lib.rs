//! Codex provider for quotabar
//!
//! Rate limits are read from the Codex CLI's `app-server` over line-delimited
//! JSON-RPC. When the CLI cannot answer, the most recent session logs under
//! `~/.codex/sessions` are scanned for the last reported limits instead.
//!
//! Several Codex instances can point at different ChatGPT workspaces. The
//! [`WorkspaceCache`] learns which organization belongs to which workspace
//! from whatever login `auth.json` currently shows.

pub mod auth;
pub mod limits;
pub mod provider;
pub mod rpc;
pub mod session_log;
pub mod workspace;

pub use provider::CodexProvider;
pub use workspace::WorkspaceCache;
