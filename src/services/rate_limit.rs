use crate::core::error::Endpoint;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Length of one accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Ceilings are kept below the published limits (chat 120 rpm, speech 60 rpm).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_chat_rpm")]
    pub chat_rpm: u32,
    #[serde(default)]
    pub chat_tpm: Option<u64>,
    #[serde(default = "default_speech_rpm")]
    pub speech_rpm: u32,
    /// Characters per minute.
    #[serde(default)]
    pub speech_tpm: Option<u64>,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat_rpm: default_chat_rpm(),
            chat_tpm: None,
            speech_rpm: default_speech_rpm(),
            speech_tpm: None,
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_chat_rpm() -> u32 {
    100
}
fn default_speech_rpm() -> u32 {
    50
}
fn default_retry_delay() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub rpm: u32,
    pub tpm: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub calls: u32,
    pub units: u64,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    calls: u32,
    units: u64,
}

#[derive(Debug)]
struct EndpointSlot {
    limit: EndpointLimit,
    window: Mutex<Window>,
}

#[derive(Debug)]
pub struct RateLimiter {
    slots: HashMap<Endpoint, EndpointSlot>,
    period: Duration,
}

impl RateLimiter {
    pub fn new(limits: impl IntoIterator<Item = (Endpoint, EndpointLimit)>) -> Self {
        let now = Instant::now();
        let slots = limits
            .into_iter()
            .map(|(endpoint, limit)| {
                let limit = EndpointLimit {
                    rpm: limit.rpm.max(1),
                    tpm: limit.tpm,
                };
                let window = Mutex::new(Window {
                    started: now,
                    calls: 0,
                    units: 0,
                });
                (endpoint, EndpointSlot { limit, window })
            })
            .collect();
        Self {
            slots,
            period: WINDOW,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new([
            (
                Endpoint::Chat,
                EndpointLimit {
                    rpm: config.chat_rpm,
                    tpm: config.chat_tpm,
                },
            ),
            (
                Endpoint::Speech,
                EndpointLimit {
                    rpm: config.speech_rpm,
                    tpm: config.speech_tpm,
                },
            ),
        ])
    }

    pub fn limit(&self, endpoint: Endpoint) -> Option<EndpointLimit> {
        self.slots.get(&endpoint).map(|s| s.limit)
    }

    /// Waits until `endpoint` has room for one call of `units`, then reserves it.
    ///
    /// The check and the reservation happen under the endpoint's lock, so two
    /// callers can never both take the last slot. Sleeping happens outside
    /// the lock. Endpoints without a configured limit are not paced.
    pub async fn acquire(&self, endpoint: Endpoint, units: u64) {
        let Some(slot) = self.slots.get(&endpoint) else {
            return;
        };

        loop {
            let wait = {
                let mut window = slot.window.lock().await;
                let now = Instant::now();
                if now.duration_since(window.started) >= self.period {
                    window.started = now;
                    window.calls = 0;
                    window.units = 0;
                }

                let calls_ok = window.calls < slot.limit.rpm;
                // An oversized request still fits into an empty window.
                let units_ok = match slot.limit.tpm {
                    Some(tpm) => window.calls == 0 || window.units + units <= tpm,
                    None => true,
                };

                if calls_ok && units_ok {
                    window.calls += 1;
                    window.units += units;
                    debug!(
                        "{} slot reserved ({}/{} calls in window)",
                        endpoint, window.calls, slot.limit.rpm
                    );
                    return;
                }

                (window.started + self.period).saturating_duration_since(now)
            };

            info!(
                "Rate limit protection on {}: waiting {:.1} seconds...",
                endpoint,
                wait.as_secs_f64()
            );
            sleep(wait).await;
        }
    }

    /// Usage of the current window, or `None` for an unpaced endpoint.
    pub async fn usage(&self, endpoint: Endpoint) -> Option<WindowUsage> {
        let slot = self.slots.get(&endpoint)?;
        let window = slot.window.lock().await;
        if window.started.elapsed() >= self.period {
            return Some(WindowUsage { calls: 0, units: 0 });
        }
        Some(WindowUsage {
            calls: window.calls,
            units: window.units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(rpm: u32, tpm: Option<u64>) -> RateLimiter {
        RateLimiter::new([(Endpoint::Speech, EndpointLimit { rpm, tpm })])
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_call_waits_for_window_reset() {
        let limiter = limiter(2, None);
        let start = Instant::now();

        limiter.acquire(Endpoint::Speech, 1).await;
        limiter.acquire(Endpoint::Speech, 1).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire(Endpoint::Speech, 1).await;
        assert!(start.elapsed() >= WINDOW);
        assert_eq!(
            limiter.usage(Endpoint::Speech).await,
            Some(WindowUsage { calls: 1, units: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_never_exceed_ceiling() {
        let limiter = Arc::new(limiter(2, None));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(Endpoint::Speech, 0).await;
                start.elapsed()
            }));
        }

        let mut admitted = Vec::new();
        for h in handles {
            admitted.push(h.await.unwrap());
        }

        let in_window = |n: u64| {
            admitted
                .iter()
                .filter(|d| **d >= WINDOW * (n as u32) && **d < WINDOW * (n as u32 + 1))
                .count()
        };
        assert_eq!(in_window(0), 2);
        assert_eq!(in_window(1), 2);
        assert_eq!(in_window(2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_ceiling() {
        let limiter = limiter(100, Some(1000));
        let start = Instant::now();

        limiter.acquire(Endpoint::Speech, 600).await;
        limiter.acquire(Endpoint::Speech, 400).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire(Endpoint::Speech, 1).await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_fits_empty_window() {
        let limiter = limiter(100, Some(100));
        let start = Instant::now();
        limiter.acquire(Endpoint::Speech, 5000).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_endpoint_is_not_paced() {
        let limiter = limiter(1, None);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire(Endpoint::Chat, 1).await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(limiter.usage(Endpoint::Chat).await.is_none());
    }

    #[test]
    fn test_defaults_stay_under_published_limits() {
        let config = RateLimitConfig::default();
        assert!(config.chat_rpm < 120);
        assert!(config.speech_rpm < 60);
        let limiter = RateLimiter::from_config(&config);
        assert_eq!(limiter.limit(Endpoint::Chat).map(|l| l.rpm), Some(100));
    }
}
