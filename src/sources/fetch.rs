//! Fetcher contract
//!
//! The cache never talks to the network itself; it hands `FetchParams` to a
//! `FetchToken` implementation and classifies whatever error comes back.

use std::future::Future;

use serde::Serialize;

use crate::cache::error::TokenError;
use crate::cache::token::Token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchParams {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

pub trait FetchToken: Send + Sync + 'static {
    fn fetch_token(
        &self,
        params: FetchParams,
    ) -> impl Future<Output = Result<Token, TokenError>> + Send;
}
