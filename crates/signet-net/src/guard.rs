//! Admission control and abuse mitigation shared by all connections.
//!
//! One guard instance serves every connection handler. All state lives
//! behind a single async mutex with short critical sections; no I/O ever
//! happens under the lock, so unrelated connections never serialize on
//! each other's sockets.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use signet_shared::{PeerId, SessionToken};

use crate::error::GuardError;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Token bucket burst capacity per source address.
    pub rate_capacity: f64,
    /// Tokens refilled per second.
    pub rate_refill_per_sec: f64,
    /// Strikes within the window that trigger a blacklist.
    pub strike_threshold: u32,
    /// Sliding window for strike accumulation.
    pub strike_window: Duration,
    /// How long a blacklisted address stays rejected.
    pub blacklist_duration: Duration,
    /// Total concurrent session cap.
    pub max_sessions: usize,
    /// Concurrent session cap per source address.
    pub max_sessions_per_addr: usize,
    /// Session time-to-live.
    pub session_ttl: Duration,
    /// Sessions with no traffic within this window are considered stale.
    pub liveness_window: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_capacity: 30.0,
            rate_refill_per_sec: 10.0,
            strike_threshold: 5,
            strike_window: Duration::from_secs(60),
            blacklist_duration: Duration::from_secs(30 * 60),
            max_sessions: 10,
            max_sessions_per_addr: 2,
            session_ttl: Duration::from_secs(3600),
            liveness_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct StrikeWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    peer_id: PeerId,
    addr: IpAddr,
    expires_at: Instant,
    last_activity: Instant,
}

#[derive(Default)]
struct GuardState {
    buckets: HashMap<IpAddr, TokenBucket>,
    strikes: HashMap<IpAddr, StrikeWindow>,
    blacklist: HashMap<IpAddr, Instant>, // address -> unblock time
    sessions: HashMap<SessionToken, SessionEntry>,
}

/// Shared admission-control state. Cheap to clone.
#[derive(Clone)]
pub struct SecurityGuard {
    state: Arc<Mutex<GuardState>>,
    config: GuardConfig,
}

impl SecurityGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(GuardState::default())),
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Gate an incoming request from `addr`. Blacklist is checked first,
    /// then the rate limit; a rate rejection also counts as a strike.
    pub async fn admit(&self, addr: IpAddr) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if Self::blacklisted_locked(&mut state, addr, now) {
            return Err(GuardError::Blacklisted);
        }

        let bucket = state
            .buckets
            .entry(addr)
            .or_insert_with(|| TokenBucket::new(self.config.rate_capacity));
        if !bucket.try_consume(self.config.rate_refill_per_sec, self.config.rate_capacity) {
            warn!(addr = %addr, "Rate limit exceeded");
            self.strike_locked(&mut state, addr, "rate limit", now);
            return Err(GuardError::RateLimited);
        }

        Ok(())
    }

    /// Record a unit of suspicion against an address. Crossing the
    /// threshold within the window blacklists it.
    pub async fn record_strike(&self, addr: IpAddr, reason: &str) {
        let mut state = self.state.lock().await;
        self.strike_locked(&mut state, addr, reason, Instant::now());
    }

    pub async fn is_blacklisted(&self, addr: IpAddr) -> bool {
        let mut state = self.state.lock().await;
        Self::blacklisted_locked(&mut state, addr, Instant::now())
    }

    fn blacklisted_locked(state: &mut GuardState, addr: IpAddr, now: Instant) -> bool {
        match state.blacklist.get(&addr) {
            Some(unblock_at) if now < *unblock_at => true,
            Some(_) => {
                state.blacklist.remove(&addr);
                info!(addr = %addr, "Blacklist entry expired");
                false
            }
            None => false,
        }
    }

    fn strike_locked(&self, state: &mut GuardState, addr: IpAddr, reason: &str, now: Instant) {
        let window = state.strikes.entry(addr).or_insert(StrikeWindow {
            count: 0,
            window_start: now,
        });

        if now.duration_since(window.window_start) > self.config.strike_window {
            window.count = 0;
            window.window_start = now;
        }
        window.count += 1;
        debug!(addr = %addr, reason, strikes = window.count, "Strike recorded");

        if window.count >= self.config.strike_threshold {
            state
                .blacklist
                .insert(addr, now + self.config.blacklist_duration);
            state.strikes.remove(&addr);
            warn!(
                addr = %addr,
                duration_secs = self.config.blacklist_duration.as_secs(),
                "Address blacklisted"
            );
        }
    }

    /// Track a freshly established session. Enforces token uniqueness and
    /// the total and per-address concurrency caps.
    pub async fn register_session(
        &self,
        token: SessionToken,
        peer_id: PeerId,
        addr: IpAddr,
    ) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if state.sessions.contains_key(&token) {
            return Err(GuardError::TokenInUse);
        }
        if state.sessions.len() >= self.config.max_sessions {
            warn!("Session capacity reached");
            return Err(GuardError::AtCapacity);
        }
        let per_addr = state.sessions.values().filter(|s| s.addr == addr).count();
        if per_addr >= self.config.max_sessions_per_addr {
            warn!(addr = %addr, "Per-address session capacity reached");
            return Err(GuardError::AtCapacity);
        }

        state.sessions.insert(
            token,
            SessionEntry {
                peer_id,
                addr,
                expires_at: now + self.config.session_ttl,
                last_activity: now,
            },
        );
        debug!(peer = %peer_id.short(), token = %token, "Session registered");
        Ok(())
    }

    /// Refresh a session's liveness timestamp.
    pub async fn touch_session(&self, token: &SessionToken) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.sessions.get_mut(token) {
            entry.last_activity = Instant::now();
        }
    }

    /// Release a session's accounting.
    pub async fn close_session(&self, token: &SessionToken) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.sessions.remove(token) {
            debug!(peer = %entry.peer_id.short(), "Session closed");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Evict sessions past expiry or with no recent traffic, and drop
    /// idle rate-limit buckets. Run periodically from a background task.
    pub async fn sweep(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let liveness = self.config.liveness_window;

        let before = state.sessions.len();
        state.sessions.retain(|token, entry| {
            let keep = now < entry.expires_at
                && now.duration_since(entry.last_activity) <= liveness;
            if !keep {
                debug!(token = %token, peer = %entry.peer_id.short(), "Evicting session");
            }
            keep
        });
        let evicted = before - state.sessions.len();

        state
            .buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < liveness);

        if evicted > 0 {
            info!(evicted, "Session sweep complete");
        }
        evicted
    }
}
