//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the coordination map and both compute paths.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding one subdirectory per corpus.
    pub cache_root: PathBuf,

    /// A claim whose lease was not renewed for this long is stale.
    pub lease_ttl: Duration,

    /// How often a computing claim renews its lease.
    pub heartbeat_interval: Duration,

    /// Upper bound on waiting for an asynchronous worker's handshake.
    pub handshake_timeout: Duration,

    /// Per-request timeout on a worker's contact endpoint.
    pub io_timeout: Duration,

    /// Back-off between polls while attached to another computation.
    pub poll_interval: Duration,

    /// Claim attempts before giving up on a slot that keeps changing hands.
    pub claim_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(".concache"),
            lease_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(50),
            claim_attempts: 5,
        }
    }
}

impl CacheConfig {
    /// Defaults with the given cache root.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `CONCACHE_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning, and the lease settings
    /// go through [`with_valid_lease`](Self::with_valid_lease).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("CONCACHE_CACHE_DIR") {
            config.cache_root = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("CONCACHE_LEASE_TTL_SECS") {
            config.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCACHE_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCACHE_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("CONCACHE_IO_TIMEOUT_MS") {
            config.io_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CONCACHE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("CONCACHE_CLAIM_ATTEMPTS") {
            config.claim_attempts = n.clamp(1, u32::MAX as u64) as u32;
        }
        config.with_valid_lease()
    }

    /// Keep the heartbeat strictly inside a non-zero lease.
    ///
    /// Otherwise a live claim could be taken over between two renewals. A
    /// zero lease falls back to the default; a zero heartbeat, or one not
    /// shorter than the lease, becomes a third of the lease. Both warn.
    pub fn with_valid_lease(mut self) -> Self {
        if self.lease_ttl.is_zero() {
            let lease = Self::default().lease_ttl;
            tracing::warn!("Lease TTL must not be zero; using {:?}", lease);
            self.lease_ttl = lease;
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lease_ttl {
            let heartbeat = self.lease_ttl / 3;
            tracing::warn!(
                "Heartbeat {:?} does not fit in lease {:?}; using {:?}",
                self.heartbeat_interval,
                self.lease_ttl,
                heartbeat
            );
            self.heartbeat_interval = heartbeat;
        }
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
