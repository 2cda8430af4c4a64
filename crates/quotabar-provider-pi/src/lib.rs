//! Pi provider for quotabar
//!
//! Pi has no quota API. This crate sums the token and cost fields of the
//! agent's local JSONL sessions, once for today and once for all time, and
//! reports both as informational quotas.

pub mod provider;
pub mod sessions;

pub use provider::PiUsageProvider;
