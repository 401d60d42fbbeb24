use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chat::{Response, Tier};

#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicUsize,

    // Terminal outcomes
    features: AtomicUsize,
    chat: AtomicUsize,
    secondary: AtomicUsize,
    tertiary: AtomicUsize,
    local: AtomicUsize,

    // Timing (in microseconds)
    total_handle_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, response: &Response, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_handle_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        let counter = match response {
            Response::Features { .. } => &self.features,
            Response::Chat { .. } => &self.chat,
            Response::FallbackChat { served_by, .. } => match served_by {
                Tier::Secondary => &self.secondary,
                Tier::Tertiary => &self.tertiary,
                Tier::Local => &self.local,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_us = self.total_handle_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_requests,
            outcomes: OutcomeCounts {
                features: self.features.load(Ordering::Relaxed),
                chat: self.chat.load(Ordering::Relaxed),
                secondary: self.secondary.load(Ordering::Relaxed),
                tertiary: self.tertiary.load(Ordering::Relaxed),
                local: self.local.load(Ordering::Relaxed),
            },
            avg_handle_time_ms: if total_requests > 0 {
                total_us / total_requests as f64 / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeCounts {
    pub features: usize,
    pub chat: usize,
    pub secondary: usize,
    pub tertiary: usize,
    pub local: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub outcomes: OutcomeCounts,
    pub avg_handle_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
