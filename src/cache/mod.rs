pub mod cache_key;
pub mod error;
pub mod observer;
pub mod token;
pub mod token_cache;
pub mod token_state;
