//! Cursor provider for quotabar
//!
//! Cursor keeps its session JWT in the editor's `state.vscdb` SQLite file.
//! The token is read through the `sqlite3` command line tool, the user id is
//! taken from its `sub` claim, and the monthly request usage is fetched with
//! the derived session cookie.

pub mod provider;
pub mod state_db;

pub use provider::CursorProvider;
