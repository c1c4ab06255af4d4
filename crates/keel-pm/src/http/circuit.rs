//! Per-host circuit breaker over server errors.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Failures tolerated before the host is cut off
    pub max_errors: u32,
    /// How long after the last failure the host stays cut off
    pub age: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_errors: 5,
            age: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct HostErrors {
    count: u32,
    last_failure: Instant,
}

/// Records timestamps of server errors per host and admits new requests
/// only while the error count stays under the limit or the window has
/// elapsed since the last failure.
///
/// The process-wide instance is shared by every client; the table is
/// guarded by a mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: Mutex<HashMap<String, HostErrors>>,
}

lazy_static! {
    static ref SHARED: CircuitBreaker = CircuitBreaker::new(CircuitBreakerConfig::default());
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide breaker.
    pub fn shared() -> &'static CircuitBreaker {
        &SHARED
    }

    pub fn admits(&self, host: &str) -> bool {
        self.admits_at(host, Instant::now())
    }

    fn admits_at(&self, host: &str, now: Instant) -> bool {
        let mut hosts = self.hosts.lock().expect("host-error table poisoned");
        match hosts.get(host) {
            None => true,
            Some(record) => {
                if record.count < self.config.max_errors {
                    true
                } else if now.duration_since(record.last_failure) >= self.config.age {
                    hosts.remove(host);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self, host: &str) {
        self.record_failure_at(host, Instant::now());
    }

    fn record_failure_at(&self, host: &str, now: Instant) {
        let mut hosts = self.hosts.lock().expect("host-error table poisoned");
        let record = hosts.entry(host.to_string()).or_insert(HostErrors {
            count: 0,
            last_failure: now,
        });
        record.count += 1;
        record.last_failure = now;
    }

    pub fn record_success(&self, host: &str) {
        let mut hosts = self.hosts.lock().expect("host-error table poisoned");
        hosts.remove(host);
    }
}
