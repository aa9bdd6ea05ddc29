use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window limiter keyed by client address.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests: max_requests.max(1),
        }
    }

    /// Records a hit for `key`. When the window is full the hit is not
    /// recorded and the wait until the oldest hit expires is returned.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut hits = self.hits.lock();
        let queue = hits.entry(key.to_string()).or_default();

        while queue
            .front()
            .is_some_and(|front| now.duration_since(*front) >= self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.max_requests {
            let oldest = queue.front().copied().unwrap_or(now);
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }

        queue.push_back(now);
        Ok(())
    }

    /// Drops keys whose hits have all expired.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
        before - hits.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().len()
    }
}
