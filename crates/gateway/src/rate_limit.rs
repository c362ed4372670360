use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sliding-window attempt counter keyed by an arbitrary string.
#[derive(Clone)]
pub struct RateLimiter {
    attempts: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_keys: usize) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_keys: max_keys.max(1),
        }
    }

    /// Records an attempt unless `limit` attempts already fall inside the
    /// window. A limit of zero disables limiting.
    pub fn allow(&self, key: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }

        let now = Instant::now();
        let mut attempts = self.lock();

        let queue = attempts.entry(key.to_string()).or_default();
        prune_queue(queue, now, self.window);
        if queue.len() >= limit as usize {
            return false;
        }
        queue.push_back(now);

        if attempts.len() > self.max_keys {
            attempts.retain(|_, events| {
                prune_queue(events, now, self.window);
                !events.is_empty()
            });
        }
        while attempts.len() > self.max_keys {
            let Some(oldest) = attempts
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .min_by_key(|(_, events)| events.back().copied())
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            attempts.remove(&oldest);
        }

        true
    }

    /// Time until the oldest attempt for `key` leaves the window.
    pub fn retry_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        let attempts = self.lock();
        attempts
            .get(key)
            .and_then(|queue| queue.front())
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default()
    }

    /// Forgets every attempt for `key`.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn prune_queue(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
