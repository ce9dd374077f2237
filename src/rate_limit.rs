use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Per-connection inbound message ceiling.
///
/// Owned by a single socket loop, so no synchronization: a fixed one-second
/// window with a counter. `allow` returns false once the ceiling is hit
/// inside the current window.
#[derive(Debug)]
pub struct MessageRateLimiter {
    max_per_second: u32,
    window_start: Instant,
    count: u32,
}

impl MessageRateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window_start: Instant::now(),
            count: 0,
        }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count < self.max_per_second {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Windowed per-IP limiter for the external-game HTTP surface.
pub struct IpRateLimiter {
    max_per_window: u32,
    window: Duration,
    entries: Arc<RwLock<HashMap<IpAddr, WindowEntry>>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    window_start: Instant,
    count: u32,
}

impl IpRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Limiter with a one-minute window, the shape used by both API routes.
    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::new(max_per_minute, Duration::from_secs(60))
    }

    /// Check and count one request from `ip`.
    pub async fn allow(&self, ip: IpAddr) -> bool {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let entry = entries.entry(ip).or_insert(WindowEntry {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count < self.max_per_window {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop entries idle for two windows.
    pub async fn cleanup_old_entries(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let threshold = self.window * 2;
        entries.retain(|_, entry| now.duration_since(entry.window_start) < threshold);
    }

    /// Periodic cleanup so one-off pollers do not accumulate forever.
    pub fn start_cleanup_task(self: Arc<Self>) {
        let limiter = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.window);
            loop {
                interval.tick().await;
                limiter.cleanup_old_entries().await;
            }
        });
    }
}
