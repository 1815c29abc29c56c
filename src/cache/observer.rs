use tokio::sync::broadcast::Sender;
use tracing::trace;

use crate::cache::cache_key::CacheKey;
use crate::cache::error::TokenError;
use crate::cache::token::Token;

/// Hooks through which token outcomes leave the cache.
///
/// `on_token_resolved` fires once per successful fetch, foreground or
/// background. `on_token_error` fires once per terminal foreground failure.
/// Implementations must not block; they run on the task that settled the fetch.
pub trait TokenObserver: Send + Sync {
    fn on_token_resolved(&self, _token: &Token, _key: &CacheKey) {}

    fn on_token_error(&self, _error: &TokenError, _key: &CacheKey) {}
}

/// Event passed to async subscribers.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    Resolved { token: Token, key: CacheKey },
    Failed { error: TokenError, key: CacheKey },
}

impl TokenEvent {
    pub fn key(&self) -> &CacheKey {
        match self {
            TokenEvent::Resolved { key, .. } | TokenEvent::Failed { key, .. } => key,
        }
    }
}

/// Forwards observer hooks into a broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: Sender<TokenEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<TokenEvent>) -> Self {
        Self { sender }
    }
}

impl TokenObserver for ChannelObserver {
    fn on_token_resolved(&self, token: &Token, key: &CacheKey) {
        let event = TokenEvent::Resolved {
            token: token.clone(),
            key: key.clone(),
        };
        if self.sender.send(event).is_err() {
            trace!(cache_key = %key, "no subscribers for resolved token");
        }
    }

    fn on_token_error(&self, error: &TokenError, key: &CacheKey) {
        let event = TokenEvent::Failed {
            error: error.clone(),
            key: key.clone(),
        };
        if self.sender.send(event).is_err() {
            trace!(cache_key = %key, "no subscribers for token error");
        }
    }
}
