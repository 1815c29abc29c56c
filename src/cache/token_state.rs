use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use crate::cache::error::TokenError;
use crate::cache::token::Token;

pub type SharedFetch = Shared<BoxFuture<'static, Result<Token, TokenError>>>;

/// One outstanding fetch, joinable by any number of callers.
///
/// `id` lets the settling task tell whether the key still belongs to it.
#[derive(Clone)]
pub struct InFlight {
    pub id: u64,
    pub operation: SharedFetch,
    pub started_at_ms: i64,
}

/// Proactive refresh timer. Dropping it cancels the pending wake-up.
#[derive(Debug)]
pub struct RefreshTimer {
    handle: AbortHandle,
    pub refresh_at_ms: i64,
}

impl RefreshTimer {
    pub fn new(handle: AbortHandle, refresh_at_ms: i64) -> Self {
        Self {
            handle,
            refresh_at_ms,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Per-key lifecycle state.
pub enum TokenState {
    Idle,
    Fetching(InFlight),
    Valid {
        token: Token,
        expires_at_ms: i64,
        refresh_timer: Option<RefreshTimer>,
    },
    Refreshing {
        token: Token,
        expires_at_ms: i64,
        in_flight: InFlight,
    },
    Error {
        error: TokenError,
        failed_at_ms: i64,
        next_retry_at_ms: i64,
        retry_count: u32,
    },
}

impl TokenState {
    pub fn view(&self) -> TokenStateView {
        match self {
            TokenState::Idle => TokenStateView::Idle,
            TokenState::Fetching(in_flight) => TokenStateView::Fetching {
                started_at_ms: in_flight.started_at_ms,
            },
            TokenState::Valid {
                token,
                expires_at_ms,
                refresh_timer,
            } => TokenStateView::Valid {
                token: token.clone(),
                expires_at_ms: *expires_at_ms,
                refresh_at_ms: refresh_timer
                    .as_ref()
                    .filter(|t| t.is_pending())
                    .map(|t| t.refresh_at_ms),
            },
            TokenState::Refreshing {
                token,
                expires_at_ms,
                in_flight,
            } => TokenStateView::Refreshing {
                token: token.clone(),
                expires_at_ms: *expires_at_ms,
                started_at_ms: in_flight.started_at_ms,
            },
            TokenState::Error {
                error,
                failed_at_ms,
                next_retry_at_ms,
                retry_count,
            } => TokenStateView::Error {
                error: error.clone(),
                failed_at_ms: *failed_at_ms,
                next_retry_at_ms: *next_retry_at_ms,
                retry_count: *retry_count,
            },
        }
    }

    /// Id of the outstanding operation, if this state has one.
    pub fn in_flight_id(&self) -> Option<u64> {
        match self {
            TokenState::Fetching(in_flight) | TokenState::Refreshing { in_flight, .. } => {
                Some(in_flight.id)
            }
            _ => None,
        }
    }
}

/// Read-only snapshot returned by `TokenLifecycleCache::get_state`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenStateView {
    Idle,
    Fetching {
        started_at_ms: i64,
    },
    Valid {
        token: Token,
        expires_at_ms: i64,
        /// set while a proactive refresh timer is armed
        refresh_at_ms: Option<i64>,
    },
    Refreshing {
        token: Token,
        expires_at_ms: i64,
        started_at_ms: i64,
    },
    Error {
        error: TokenError,
        failed_at_ms: i64,
        next_retry_at_ms: i64,
        retry_count: u32,
    },
}

impl TokenStateView {
    pub fn name(&self) -> &'static str {
        match self {
            TokenStateView::Idle => "idle",
            TokenStateView::Fetching { .. } => "fetching",
            TokenStateView::Valid { .. } => "valid",
            TokenStateView::Refreshing { .. } => "refreshing",
            TokenStateView::Error { .. } => "error",
        }
    }
}
