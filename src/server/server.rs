use anyhow::Result;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cache::error::TokenError;
use crate::cache::token::Token;
use crate::cache::token_cache::{GetTokenOptions, TokenLifecycleCache};
use crate::config::settings::SettingsConfig;
use crate::observability::metrics::get_metrics;
use crate::observability::routes::MetricsState;
use crate::sources::fetch::FetchToken;

pub struct AppState<F> {
    pub metrics_state: MetricsState,
    pub cache: TokenLifecycleCache<F>,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            metrics_state: self.metrics_state.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<F: FetchToken> AppState<F> {
    pub fn new(cache: TokenLifecycleCache<F>) -> Self {
        Self {
            metrics_state: MetricsState::new(get_metrics().registry.clone()),
            cache,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub template: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub leeway_in_seconds: u64,
    #[serde(default)]
    pub skip_cache: bool,
}

impl From<TokenQuery> for GetTokenOptions {
    fn from(query: TokenQuery) -> Self {
        GetTokenOptions {
            template: query.template,
            organization_id: query.organization_id,
            leeway_in_seconds: query.leeway_in_seconds,
            skip_cache: query.skip_cache,
        }
    }
}

pub fn router<F: FetchToken>(settings_config: &SettingsConfig, state: AppState<F>) -> Router {
    Router::new()
        .route("/token", get(get_token::<F>))
        .route("/health", get(health::<F>))
        .merge(state.metrics_state.router::<F>(&settings_config.metrics))
        .with_state(state)
}

/// Start one Axum server for the token, health and metrics routes.
pub async fn start<F: FetchToken>(settings_config: &SettingsConfig, cache: TokenLifecycleCache<F>) -> Result<()> {
    let app = router(settings_config, AppState::new(cache));

    let bind_addr = &settings_config.server.host;
    let port = &settings_config.server.port;
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_addr, port)).await?;
    info!(address = %bind_addr, port = %port, "http server listening");

    get_metrics().up.set(1);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_token<F: FetchToken>(
    State(state): State<AppState<F>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let options = GetTokenOptions::from(query);
    let key = state
        .cache
        .cache_key(options.template.as_deref(), options.organization_id.as_deref());

    match state.cache.get_token(options).await {
        Ok(jwt) => {
            // the cache entry may not be settled yet, so read expiry off the token
            let expires_at_ms = Token::decode(jwt.as_str())
                .ok()
                .and_then(|token| token.expires_at_secs())
                .map(|exp| exp * 1000);
            (StatusCode::OK, Json(json!({ "jwt": jwt, "expires_at": expires_at_ms }))).into_response()
        }
        Err(error) => {
            warn!(cache_key = %key, error = %error, "token request failed");
            (error_status(&error), Json(json!({ "error": error.to_string() }))).into_response()
        }
    }
}

async fn health<F: FetchToken>(State(state): State<AppState<F>>) -> impl IntoResponse {
    if state.cache.is_destroyed() {
        (StatusCode::SERVICE_UNAVAILABLE, "destroyed")
    } else {
        (StatusCode::OK, "ok")
    }
}

fn error_status(error: &TokenError) -> StatusCode {
    match error {
        TokenError::ClientFetch { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        TokenError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TokenError::ServiceDestroyed => StatusCode::SERVICE_UNAVAILABLE,
        TokenError::RetryableFetch { .. } | TokenError::InvalidToken(_) => StatusCode::BAD_GATEWAY,
    }
}
