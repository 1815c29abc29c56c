//! Token lifecycle cache
//!
//! Owns one `TokenState` per cache key and drives every transition:
//!
//! - `Idle`/`Error` -> `Fetching` -> `Valid` | `Error`
//! - `Valid` -> `Refreshing` -> `Valid` (new token, or the old one on failure)
//!
//! Concurrent callers of the same key while a fetch is outstanding join the
//! same shared future, so N callers cost one network call. The state map is
//! guarded by a mutex that is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::cache::cache_key::{check_component, CacheKey};
use crate::cache::error::TokenError;
use crate::cache::observer::TokenObserver;
use crate::cache::token::Token;
use crate::cache::token_state::{InFlight, RefreshTimer, SharedFetch, TokenState, TokenStateView};
use crate::config::settings::SettingsConfig;
use crate::helpers::time::{Clock, SystemClock};
use crate::observability::metrics::get_metrics;
use crate::resilience::retry::RetryPolicy;
use crate::sources::fetch::{FetchParams, FetchToken};
use crate::utils::constants::{
    DEFAULT_REFRESH_BUFFER_SECONDS, MODE_BACKGROUND, MODE_BYPASS, MODE_FOREGROUND,
};

/// Per-call options for [`TokenLifecycleCache::get_token`].
#[derive(Debug, Clone, Default)]
pub struct GetTokenOptions {
    pub template: Option<String>,
    pub organization_id: Option<String>,
    /// extra margin subtracted from expiry before a cached token counts as stale
    pub leeway_in_seconds: u64,
    /// fetch a fresh token without joining any in-flight fetch
    pub skip_cache: bool,
}

impl GetTokenOptions {
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn leeway(mut self, seconds: u64) -> Self {
        self.leeway_in_seconds = seconds;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum SettleKind {
    Foreground { prior_failures: u32 },
    Background,
}

struct Inner<F> {
    session_id: String,
    fetcher: Arc<F>,
    refresh_buffer_ms: i64,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn TokenObserver>>,
    states: Mutex<HashMap<CacheKey, TokenState>>,
    destroyed: AtomicBool,
    next_operation_id: AtomicU64,
}

/// Session token cache bound to one session id.
///
/// Cheap to clone; clones share state. Must be used from within a tokio
/// runtime since fetches and refresh timers run as spawned tasks.
pub struct TokenLifecycleCache<F> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for TokenLifecycleCache<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F> fmt::Debug for TokenLifecycleCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLifecycleCache")
            .field("session_id", &self.inner.session_id)
            .field("refresh_buffer_ms", &self.inner.refresh_buffer_ms)
            .field("retry", &self.inner.retry)
            .field("destroyed", &self.inner.destroyed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

pub struct TokenCacheBuilder<F> {
    session_id: String,
    fetcher: F,
    refresh_buffer_seconds: u64,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn TokenObserver>>,
}

impl<F: FetchToken> TokenCacheBuilder<F> {
    /// Applies `refresh_buffer_seconds` and `retry` from the settings block.
    pub fn settings(mut self, settings: &SettingsConfig) -> Self {
        self.refresh_buffer_seconds = settings.refresh_buffer_seconds();
        if let Some(retry) = &settings.retry {
            self.retry = RetryPolicy::from(retry);
        }
        self
    }

    pub fn refresh_buffer_seconds(mut self, seconds: u64) -> Self {
        self.refresh_buffer_seconds = seconds;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn observer(mut self, observer: impl TokenObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn build(self) -> TokenLifecycleCache<F> {
        TokenLifecycleCache {
            inner: Arc::new(Inner {
                session_id: self.session_id,
                fetcher: Arc::new(self.fetcher),
                refresh_buffer_ms: (self.refresh_buffer_seconds as i64).saturating_mul(1000),
                retry: self.retry,
                clock: self.clock,
                observers: self.observers,
                states: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
                next_operation_id: AtomicU64::new(1),
            }),
        }
    }
}

/// What `get_token` decided while holding the lock.
enum Lookup {
    StartFetch,
    Join(SharedFetch),
    Serve { raw: String, refresh: bool },
}

impl<F: FetchToken> TokenLifecycleCache<F> {
    pub fn builder(session_id: impl Into<String>, fetcher: F) -> TokenCacheBuilder<F> {
        TokenCacheBuilder {
            session_id: session_id.into(),
            fetcher,
            refresh_buffer_seconds: DEFAULT_REFRESH_BUFFER_SECONDS,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn cache_key(&self, template: Option<&str>, organization_id: Option<&str>) -> CacheKey {
        CacheKey::new(&self.inner.session_id, template, organization_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the raw token for the requested template/organization.
    ///
    /// Serves a cached token without waiting whenever one is usable, joins an
    /// outstanding fetch for the same key, or starts a new one.
    pub async fn get_token(&self, options: GetTokenOptions) -> Result<String, TokenError> {
        if self.is_destroyed() {
            return Err(TokenError::ServiceDestroyed);
        }
        check_component("template", options.template.as_deref())?;
        check_component("organization_id", options.organization_id.as_deref())?;

        let key = self.cache_key(options.template.as_deref(), options.organization_id.as_deref());

        if options.skip_cache {
            return self
                .fetch_bypassing_cache(&key)
                .await
                .map(|token| token.raw().to_owned());
        }

        let operation = {
            let mut states = self.lock_states();
            let now = self.now_ms();
            let leeway_ms = (options.leeway_in_seconds as i64).saturating_mul(1000);
            let state = states.entry(key.clone()).or_insert(TokenState::Idle);

            let lookup = match &*state {
                TokenState::Idle | TokenState::Error { .. } => Lookup::StartFetch,
                TokenState::Fetching(in_flight) => Lookup::Join(in_flight.operation.clone()),
                TokenState::Valid {
                    token,
                    expires_at_ms,
                    refresh_timer,
                } => {
                    if now >= expires_at_ms - leeway_ms {
                        Lookup::StartFetch
                    } else {
                        let timer_pending = refresh_timer.as_ref().is_some_and(RefreshTimer::is_pending);
                        Lookup::Serve {
                            raw: token.raw().to_owned(),
                            refresh: !timer_pending && now >= expires_at_ms - self.inner.refresh_buffer_ms,
                        }
                    }
                }
                // past the caller's expiry the stale token is never served;
                // wait for the replacement instead
                TokenState::Refreshing {
                    token,
                    expires_at_ms,
                    in_flight,
                } => {
                    if now >= expires_at_ms - leeway_ms {
                        Lookup::Join(in_flight.operation.clone())
                    } else {
                        Lookup::Serve {
                            raw: token.raw().to_owned(),
                            refresh: false,
                        }
                    }
                }
            };

            match lookup {
                Lookup::StartFetch => {
                    debug!(cache_key = %key, state = state.view().name(), "starting token fetch");
                    self.start_fetch(&key, state, now)
                }
                Lookup::Join(operation) => {
                    trace!(cache_key = %key, "joining in-flight token fetch");
                    operation
                }
                Lookup::Serve { raw, refresh } => {
                    if refresh {
                        debug!(cache_key = %key, "token inside refresh buffer, refreshing in background");
                        self.begin_background_refresh(&key, state, now);
                    }
                    return Ok(raw);
                }
            }
        };

        operation.await.map(|token| token.raw().to_owned())
    }

    /// Replaces a `Valid` token in the background; other states are left alone.
    ///
    /// Callers keep being served the current token until the refresh settles.
    /// A failed refresh restores the current token instead of surfacing an error.
    pub fn background_refresh(&self, key: &CacheKey) {
        if self.is_destroyed() {
            return;
        }

        let mut states = self.lock_states();
        let now = self.now_ms();
        match states.get_mut(key) {
            Some(state) if matches!(state, TokenState::Valid { .. }) => {
                self.begin_background_refresh(key, state, now);
            }
            _ => trace!(cache_key = %key, "no valid token, skipping background refresh"),
        }
    }

    /// Adopts a token obtained elsewhere without any network call.
    pub fn ingest_token(&self, token: Token, key: &CacheKey) {
        if self.is_destroyed() {
            warn!(cache_key = %key, "ignoring token ingestion after destroy");
            return;
        }

        let now = self.now_ms();
        let expires_at_ms = token.expires_at_ms(now);

        let mut states = self.lock_states();
        // drop the previous state, and its timer, before arming a new one
        drop(states.remove(key));
        let refresh_timer = self.schedule_refresh(key, expires_at_ms, now);
        states.insert(
            key.clone(),
            TokenState::Valid {
                token,
                expires_at_ms,
                refresh_timer,
            },
        );
        record_cache_state(&states);
        debug!(cache_key = %key, expires_at_ms, "ingested token");
    }

    /// Forgets one key, or every key when `key` is `None`, cancelling timers.
    pub fn invalidate(&self, key: Option<&CacheKey>) {
        let mut states = self.lock_states();
        match key {
            Some(key) => {
                states.remove(key);
                debug!(cache_key = %key, "invalidated token");
            }
            None => {
                states.clear();
                debug!("invalidated all tokens");
            }
        }
        record_cache_state(&states);
    }

    pub fn has_valid_token(&self, key: &CacheKey) -> bool {
        let states = self.lock_states();
        match states.get(key) {
            Some(TokenState::Valid { expires_at_ms, .. })
            | Some(TokenState::Refreshing { expires_at_ms, .. }) => self.now_ms() < *expires_at_ms,
            _ => false,
        }
    }

    /// Permanently shuts the cache down.
    ///
    /// Fetches already in flight still settle for their callers, but their
    /// results no longer touch cache state.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.invalidate(None);
        info!(session_id = %self.inner.session_id, "token cache destroyed");
    }

    pub fn get_state(&self, key: &CacheKey) -> TokenStateView {
        self.lock_states()
            .get(key)
            .map(TokenState::view)
            .unwrap_or(TokenStateView::Idle)
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<CacheKey, TokenState>> {
        self.inner
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Moves `state` to `Fetching` and spawns the task that settles it.
    fn start_fetch(&self, key: &CacheKey, state: &mut TokenState, now: i64) -> SharedFetch {
        let prior_failures = match state {
            TokenState::Error { retry_count, .. } => *retry_count,
            _ => 0,
        };

        let in_flight = self.launch(key, MODE_FOREGROUND, now);
        let operation = in_flight.operation.clone();
        *state = TokenState::Fetching(in_flight.clone());
        self.spawn_settle(key, in_flight, SettleKind::Foreground { prior_failures });
        operation
    }

    /// `Valid` -> `Refreshing`. Any armed timer is cancelled on the way.
    fn begin_background_refresh(&self, key: &CacheKey, state: &mut TokenState, now: i64) {
        let previous = std::mem::replace(state, TokenState::Idle);
        let TokenState::Valid {
            token,
            expires_at_ms,
            refresh_timer,
        } = previous
        else {
            *state = previous;
            return;
        };
        drop(refresh_timer);

        let in_flight = self.launch(key, MODE_BACKGROUND, now);
        *state = TokenState::Refreshing {
            token,
            expires_at_ms,
            in_flight: in_flight.clone(),
        };
        self.spawn_settle(key, in_flight, SettleKind::Background);
    }

    fn launch(&self, key: &CacheKey, mode: &'static str, now: i64) -> InFlight {
        InFlight {
            id: self.inner.next_operation_id.fetch_add(1, Ordering::Relaxed),
            operation: self.fetch_with_retry(key, mode).boxed().shared(),
            started_at_ms: now,
        }
    }

    fn fetch_with_retry(
        &self,
        key: &CacheKey,
        mode: &'static str,
    ) -> impl Future<Output = Result<Token, TokenError>> + Send + 'static {
        let fetcher = self.inner.fetcher.clone();
        let retry = self.inner.retry.clone();
        let params = FetchParams::from(key.decode());
        let cache_key = key.clone();

        async move {
            let metrics = get_metrics();
            metrics.fetch_requests.with_label_values(&[mode]).inc();
            let start = Instant::now();

            let result = retry
                .run_with_retry(|| fetcher.fetch_token(params.clone()))
                .await;

            metrics
                .fetch_duration
                .with_label_values(&[mode])
                .observe(start.elapsed().as_secs_f64());
            match &result {
                Ok(_) => debug!(cache_key = %cache_key, mode, "token fetched"),
                Err(e) => {
                    metrics
                        .fetch_failures
                        .with_label_values(&[mode, e.reason()])
                        .inc();
                }
            }
            result
        }
    }

    fn spawn_settle(&self, key: &CacheKey, in_flight: InFlight, kind: SettleKind) {
        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = in_flight.operation.await;
            cache.settle(&key, in_flight.id, kind, result);
        });
    }

    /// Applies a finished fetch, unless the key moved on or the cache was destroyed.
    fn settle(&self, key: &CacheKey, id: u64, kind: SettleKind, result: Result<Token, TokenError>) {
        if self.is_destroyed() {
            debug!(cache_key = %key, "cache destroyed, discarding fetch result");
            return;
        }

        let now = self.now_ms();
        let mut states = self.lock_states();
        let Some(state) = states.get_mut(key) else {
            debug!(cache_key = %key, "key invalidated, discarding fetch result");
            return;
        };
        if state.in_flight_id() != Some(id) {
            debug!(cache_key = %key, "fetch superseded, discarding result");
            return;
        }

        match (kind, result) {
            (_, Ok(token)) => {
                let expires_at_ms = token.expires_at_ms(now);
                let refresh_timer = self.schedule_refresh(key, expires_at_ms, now);
                *state = TokenState::Valid {
                    token: token.clone(),
                    expires_at_ms,
                    refresh_timer,
                };
                record_cache_state(&states);
                drop(states);

                info!(cache_key = %key, expires_at_ms, "token resolved");
                self.notify_resolved(&token, key);
            }
            (SettleKind::Foreground { prior_failures }, Err(error)) => {
                *state = TokenState::Error {
                    error: error.clone(),
                    failed_at_ms: now,
                    next_retry_at_ms: now + self.inner.retry.initial_delay_ms as i64,
                    retry_count: prior_failures.saturating_add(1),
                };
                drop(states);

                self.notify_error(&error, key);
            }
            (SettleKind::Background, Err(error)) => {
                if let TokenState::Refreshing {
                    token,
                    expires_at_ms,
                    ..
                } = std::mem::replace(state, TokenState::Idle)
                {
                    *state = TokenState::Valid {
                        token,
                        expires_at_ms,
                        refresh_timer: None,
                    };
                }
                get_metrics().background_refresh_fallbacks.inc();
                warn!(cache_key = %key, error = %error, "background refresh failed, keeping current token");
            }
        }
    }

    /// Fresh fetch that neither joins nor publishes an in-flight operation.
    ///
    /// The result is adopted into the cache unless another fetch for the key
    /// is outstanding, which then remains the owner of the key's state.
    async fn fetch_bypassing_cache(&self, key: &CacheKey) -> Result<Token, TokenError> {
        debug!(cache_key = %key, "fetching token, bypassing cache");
        let result = self.fetch_with_retry(key, MODE_BYPASS).await;

        if self.is_destroyed() {
            return result;
        }

        match &result {
            Ok(token) => {
                let now = self.now_ms();
                let mut states = self.lock_states();
                let state = states.entry(key.clone()).or_insert(TokenState::Idle);
                if state.in_flight_id().is_none() {
                    let expires_at_ms = token.expires_at_ms(now);
                    let refresh_timer = self.schedule_refresh(key, expires_at_ms, now);
                    *state = TokenState::Valid {
                        token: token.clone(),
                        expires_at_ms,
                        refresh_timer,
                    };
                }
                record_cache_state(&states);
                drop(states);
                self.notify_resolved(token, key);
            }
            Err(error) => self.notify_error(error, key),
        }

        result
    }

    /// Arms a timer at `expires_at - refresh_buffer`; `None` if that moment has passed.
    fn schedule_refresh(&self, key: &CacheKey, expires_at_ms: i64, now: i64) -> Option<RefreshTimer> {
        let refresh_at_ms = expires_at_ms - self.inner.refresh_buffer_ms;
        if refresh_at_ms <= now {
            trace!(cache_key = %key, "refresh point already passed, no timer armed");
            return None;
        }

        // deadline is fixed now, not when the task first gets polled
        let deadline = Instant::now() + Duration::from_millis((refresh_at_ms - now) as u64);
        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                trace!(cache_key = %key, "refresh timer fired");
                TokenLifecycleCache { inner }.background_refresh(&key);
            }
        });

        Some(RefreshTimer::new(handle.abort_handle(), refresh_at_ms))
    }

    fn notify_resolved(&self, token: &Token, key: &CacheKey) {
        for observer in &self.inner.observers {
            observer.on_token_resolved(token, key);
        }
    }

    fn notify_error(&self, error: &TokenError, key: &CacheKey) {
        for observer in &self.inner.observers {
            observer.on_token_error(error, key);
        }
    }
}

/// Key count plus the soonest expiry among held tokens (0 when none).
fn record_cache_state(states: &HashMap<CacheKey, TokenState>) {
    let metrics = get_metrics();
    metrics.cached_keys.set(states.len() as i64);

    let earliest_ms = states
        .values()
        .filter_map(|state| match state {
            TokenState::Valid { expires_at_ms, .. } | TokenState::Refreshing { expires_at_ms, .. } => {
                Some(*expires_at_ms)
            }
            _ => None,
        })
        .min()
        .unwrap_or(0);
    metrics.earliest_token_expiry_unix.set(earliest_ms / 1000);
}
