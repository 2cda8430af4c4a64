//! Billing API providers for quotabar
//!
//! This crate implements the provider trait for SaaS cost/usage endpoints that
//! authenticate with a bearer key held in the secret store.

pub mod credentials;
pub mod openai;
pub mod openrouter;

pub use openai::OpenAiBillingProvider;
pub use openrouter::OpenRouterProvider;
