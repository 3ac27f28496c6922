use axum::http::StatusCode;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_REQUESTS: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter keyed by client identifier.
///
/// Entries are never evicted, so the map grows with the number of distinct
/// clients seen over the lifetime of the process.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: HashMap<String, ClientWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub count: u32,
    pub window_age: Duration,
}

struct ClientWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("client exceeded {limit} requests per {}s", .window.as_secs())]
    Exceeded { limit: u32, window: Duration },
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: HashMap::new(),
        }
    }

    pub fn check_and_record(&mut self, client: &str, now: Instant) -> Result<(), RateLimitError> {
        match self.clients.get_mut(client) {
            Some(entry) if now.saturating_duration_since(entry.window_start) < self.window => {
                if entry.count >= self.max_requests {
                    return Err(RateLimitError::Exceeded {
                        limit: self.max_requests,
                        window: self.window,
                    });
                }
                entry.count += 1;
            }
            Some(entry) => {
                entry.count = 1;
                entry.window_start = now;
            }
            None => {
                self.clients.insert(
                    client.to_string(),
                    ClientWindow {
                        count: 1,
                        window_start: now,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn usage_snapshot(&self, client: &str, now: Instant) -> UsageSnapshot {
        self.clients
            .get(client)
            .map(|entry| UsageSnapshot {
                count: entry.count,
                window_age: now.saturating_duration_since(entry.window_start),
            })
            .unwrap_or(UsageSnapshot {
                count: 0,
                window_age: Duration::ZERO,
            })
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

impl RateLimitError {
    pub fn describe(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            RateLimitError::Exceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "per_client_window",
                "per-window request limit",
            ),
        }
    }
}
