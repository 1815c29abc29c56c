// tests/common/mod.rs
pub use axum::Router;
pub use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use crate::cache::cache_key::CacheKey;
use crate::cache::error::TokenError;
use crate::cache::observer::TokenObserver;
use crate::cache::token::Token;
use crate::cache::token_cache::TokenLifecycleCache;
use crate::helpers::time::{Clock, TokioClock};
use crate::resilience::retry::RetryPolicy;
use crate::sources::fetch::{FetchParams, FetchToken};

pub const SESSION_ID: &str = "sess_2abc";
/// 2023-11-14T22:13:20Z, a whole second so `exp * 1000` lines up with the clock
pub const ORIGIN_MS: i64 = 1_700_000_000_000;

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

/// Unsigned compact token carrying `claims`.
pub fn make_jwt(claims: &Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(json!({"alg": "RS256", "typ": "JWT"}).to_string());
    let payload = engine.encode(claims.to_string());
    format!("{}.{}.{}", header, payload, engine.encode("signature"))
}

/// Token for `SESSION_ID` expiring `lifetime_secs` after the clock's current second.
pub fn token_expiring_in(clock: &TokioClock, lifetime_secs: i64, jti: &str) -> Token {
    let now = clock.now_ms() / 1000;
    Token::decode(make_jwt(&json!({
        "sub": "user_1",
        "sid": SESSION_ID,
        "iat": now,
        "exp": now + lifetime_secs,
        "jti": jti,
    })))
    .unwrap()
}

/// Lets spawned settle/timer tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Token,
    Fail(TokenError),
}

/// Scripted fetcher: pops one reply per call, then falls back to `fallback`.
/// Minted tokens live `lifetime_secs` from the moment the reply is produced.
pub struct MockFetcher {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<FetchParams>>>,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    clock: TokioClock,
    lifetime_secs: i64,
    latency: Duration,
}

impl MockFetcher {
    pub fn new(clock: TokioClock) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            script: Mutex::new(VecDeque::new()),
            fallback: Reply::Token,
            clock,
            lifetime_secs: 60,
            latency: Duration::ZERO,
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn failing_with(mut self, error: TokenError) -> Self {
        self.fallback = Reply::Fail(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<FetchParams>>> {
        self.requests.clone()
    }
}

impl FetchToken for MockFetcher {
    async fn fetch_token(&self, params: FetchParams) -> Result<Token, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(params.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            Reply::Token => {
                let now = self.clock.now_ms() / 1000;
                Token::decode(make_jwt(&json!({
                    "sub": "user_1",
                    "sid": params.session_id,
                    "iat": now,
                    "exp": now + self.lifetime_secs,
                    "jti": format!("fetch-{}", n),
                    "org_id": params.organization_id,
                })))
            }
            Reply::Fail(error) => Err(error),
        }
    }
}

/// Observer that records every hook invocation.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub resolved: Arc<Mutex<Vec<(String, CacheKey)>>>,
    pub errors: Arc<Mutex<Vec<(TokenError, CacheKey)>>>,
}

impl RecordingObserver {
    pub fn resolved_count(&self) -> usize {
        self.resolved.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl TokenObserver for RecordingObserver {
    fn on_token_resolved(&self, token: &Token, key: &CacheKey) {
        self.resolved
            .lock()
            .unwrap()
            .push((token.raw().to_owned(), key.clone()));
    }

    fn on_token_error(&self, error: &TokenError, key: &CacheKey) {
        self.errors.lock().unwrap().push((error.clone(), key.clone()));
    }
}

/// Fast retry policy: 100ms initial delay, at most 3 attempts.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(1.55, 100, 1_000, 2)
}

/// Cache over `fetcher` with a 10s refresh buffer and `quick_retry`.
pub fn build_cache(
    fetcher: MockFetcher,
    clock: TokioClock,
    observer: &RecordingObserver,
) -> TokenLifecycleCache<MockFetcher> {
    TokenLifecycleCache::builder(SESSION_ID, fetcher)
        .clock(clock)
        .refresh_buffer_seconds(10)
        .retry_policy(quick_retry())
        .observer(observer.clone())
        .build()
}
