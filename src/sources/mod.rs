/// Sources module
///
/// The fetcher contract the cache depends on, and the HTTP implementation
/// used by the agent binary.
pub mod fetch;
pub mod http;

pub use fetch::{FetchParams, FetchToken};
pub use http::HttpFetcher;
