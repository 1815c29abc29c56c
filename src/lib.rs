//! # Session Token Cache
//!
//! Obtains short-lived session tokens from an authentication backend,
//! caches them per (session, template, organization), refreshes them ahead
//! of expiry and coalesces concurrent requests for the same key.
//!
//! Modules:
//! - `cache`: token value object, cache keys, per-key state machine and the lifecycle cache
//! - `sources`: fetcher contract and the HTTP fetcher
//! - `resilience`: retry policy with exponential backoff
//! - `config`: YAML configuration, defaults and validation
//! - `observability`: prometheus metrics
//! - `server`: axum routes serving tokens, health and metrics

pub mod cache;
pub mod config;
pub mod helpers;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod sources;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::cache::cache_key::CacheKey;
pub use crate::cache::error::TokenError;
pub use crate::cache::token::{Token, TokenClaims};
pub use crate::cache::token_cache::{GetTokenOptions, TokenLifecycleCache};
pub use crate::resilience::retry::RetryPolicy;
pub use crate::sources::fetch::{FetchParams, FetchToken};
