use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cache::error::TokenError;
use crate::cache::token::Token;
use crate::config::types::{BackendConfig, GenericSourceValue};
use crate::sources::fetch::{FetchParams, FetchToken};

#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    jwt: String,
}

/// Fetches session tokens from
/// `POST {base_url}/v1/client/sessions/{session_id}/tokens[/{template}]`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpFetcher {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            headers: HeaderMap::new(),
        }
    }

    /// Builds the fetcher and its client, resolving configured header values.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let mut fetcher = Self::new(client, &config.base_url);
        if let Some(headers) = &config.headers {
            fetcher.headers = resolve_headers(headers)?;
        }
        Ok(fetcher)
    }

    pub fn endpoint(&self, params: &FetchParams) -> String {
        match &params.template {
            Some(template) => format!(
                "{}/v1/client/sessions/{}/tokens/{}",
                self.base_url, params.session_id, template
            ),
            None => format!("{}/v1/client/sessions/{}/tokens", self.base_url, params.session_id),
        }
    }
}

impl FetchToken for HttpFetcher {
    async fn fetch_token(&self, params: FetchParams) -> Result<Token, TokenError> {
        let url = self.endpoint(&params);
        let form = [(
            "organization_id",
            params.organization_id.clone().unwrap_or_default(),
        )];

        debug!(url = %url, "requesting session token");
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::retryable(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::from_status(status.as_u16(), body));
        }

        let body: SessionTokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidToken(format!("unexpected response body: {}", e)))?;

        Token::decode(body.jwt)
    }
}

fn resolve_headers(headers: &HashMap<String, GenericSourceValue>) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    for (name, source) in headers {
        let value = match source {
            GenericSourceValue::Literal { value } => value.clone(),
            GenericSourceValue::FromEnv { from_env } => std::env::var(from_env)
                .map_err(|e| anyhow!("header '{}': env var '{}': {}", name, from_env, e))?,
            GenericSourceValue::FromFile { path } => std::fs::read_to_string(path)
                .map_err(|e| anyhow!("header '{}': file '{}': {}", name, path, e))?
                .trim()
                .to_string(),
        };
        header_map.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(&value)?,
        );
    }
    Ok(header_map)
}
