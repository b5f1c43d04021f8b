use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Largest accepted signaling text frame.
pub const MAX_WS_TEXT_BYTES: usize = 64 * 1024;
/// Frames a single socket may send per [`WS_FRAME_WINDOW`].
pub const MAX_WS_FRAMES_PER_WINDOW: u32 = 600;
pub const WS_FRAME_WINDOW: Duration = Duration::from_secs(60);

/// Largest accepted SDP blob on `/call-user`.
pub const MAX_SDP_BYTES: usize = 32 * 1024;
pub const CALL_RATE_LIMIT: u32 = 30;
pub const CALL_RATE_WINDOW: Duration = Duration::from_secs(60);
const CALL_RATE_MAX_KEYS: usize = 10_000;

#[derive(Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            started: now,
        }
    }

    fn hit(&mut self, now: Instant, length: Duration, max: u32) -> bool {
        if now.duration_since(self.started) >= length {
            *self = Window::new(now);
        }
        self.count = self.count.saturating_add(1);
        self.count <= max
    }
}

/// Fixed-window limiter keyed by caller. Once `max_keys` live keys are
/// tracked, unknown keys are refused until old windows expire.
pub struct FixedWindowRateLimiter<K> {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<K, Window>>,
}

impl<K: Hash + Eq + Clone> FixedWindowRateLimiter<K> {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_keys,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `/call-user`, keyed by the calling client.
    pub fn for_calls() -> Self {
        Self::new(CALL_RATE_LIMIT, CALL_RATE_WINDOW, CALL_RATE_MAX_KEYS)
    }

    pub fn allow(&self, key: &K) -> bool {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };

        if entries.len() >= self.max_keys && !entries.contains_key(key) {
            entries.retain(|_, w| now.duration_since(w.started) < self.window);
            if entries.len() >= self.max_keys {
                return false;
            }
        }

        entries
            .entry(key.clone())
            .or_insert_with(|| Window::new(now))
            .hit(now, self.window, self.max_requests)
    }
}

/// Per-socket frame budget; owned by the socket task, so no locking.
pub struct FrameBudget {
    window: Window,
    max_frames: u32,
    length: Duration,
}

impl FrameBudget {
    pub fn new(max_frames: u32, length: Duration) -> Self {
        Self {
            window: Window::new(Instant::now()),
            max_frames,
            length,
        }
    }

    pub fn for_socket() -> Self {
        Self::new(MAX_WS_FRAMES_PER_WINDOW, WS_FRAME_WINDOW)
    }

    pub fn allow(&mut self) -> bool {
        self.window
            .hit(Instant::now(), self.length, self.max_frames)
    }
}

pub fn check_public_bind_allowed(addr: SocketAddr, allow_public_bind: bool) -> anyhow::Result<()> {
    if addr.ip().is_loopback() || allow_public_bind {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "refusing non-loopback bind on {} without --allow-public-bind",
        addr
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_counts_per_key() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_secs(60), 100);
        assert!(limiter.allow(&"a"));
        assert!(limiter.allow(&"a"));
        assert!(!limiter.allow(&"a"));
        assert!(limiter.allow(&"b"));
    }

    #[test]
    fn test_limiter_window_resets() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::ZERO, 100);
        assert!(limiter.allow(&1u32));
        assert!(limiter.allow(&1u32));
    }

    #[test]
    fn test_limiter_refuses_new_keys_when_full() {
        let limiter = FixedWindowRateLimiter::new(5, Duration::from_secs(60), 2);
        assert!(limiter.allow(&"a"));
        assert!(limiter.allow(&"b"));
        assert!(!limiter.allow(&"c"));
        assert!(limiter.allow(&"a"));
    }

    #[test]
    fn test_frame_budget() {
        let mut budget = FrameBudget::new(3, Duration::from_secs(60));
        assert!((0..3).all(|_| budget.allow()));
        assert!(!budget.allow());
    }

    #[test]
    fn test_public_bind_requires_flag() {
        let loopback: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let public: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        assert!(check_public_bind_allowed(loopback, false).is_ok());
        assert!(check_public_bind_allowed(public, false).is_err());
        assert!(check_public_bind_allowed(public, true).is_ok());
    }
}
