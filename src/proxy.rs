//! Proxy representation and status.

use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// Status of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyStatus {
    /// The proxy has not been checked yet.
    #[default]
    Unknown,
    /// The last check reached the proxy.
    Active,
    /// The last check failed, or a check is in flight.
    Unavailable,
}

impl ProxyStatus {
    /// Numeric code used in the persistence files.
    pub fn code(self) -> i64 {
        match self {
            ProxyStatus::Unknown => 0,
            ProxyStatus::Active => 1,
            ProxyStatus::Unavailable => 2,
        }
    }

    /// Inverse of [`ProxyStatus::code`]. Unrecognised codes map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ProxyStatus::Active,
            2 => ProxyStatus::Unavailable,
            _ => ProxyStatus::Unknown,
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyStatus::Unknown => "unknown",
            ProxyStatus::Active => "active",
            ProxyStatus::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Plain snapshot of a proxy as stored in the persistence files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// The proxy URL, also its unique key.
    pub address: String,
    /// Advisory weight; selection ignores it.
    pub weight: i64,
    pub status: ProxyStatus,
    /// Unix seconds of the last completed check.
    pub last_check: i64,
    /// Duration of the last check in milliseconds.
    pub check_used: i64,
}

impl ProxyRecord {
    /// A record for `address` carrying the persistence defaults.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: 1,
            status: ProxyStatus::Active,
            last_check: 0,
            check_used: 0,
        }
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxy={}\tweight={}\tlast_check={}\tcheck_used={}\tstatus={}",
            self.address,
            self.weight,
            self.last_check,
            self.check_used,
            self.status.code()
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Health {
    status: ProxyStatus,
    last_check: i64,
    check_used: i64,
}

/// Representation of an upstream proxy server.
///
/// Records are shared between the full and active sets of the registry, so the
/// mutable health state lives behind interior mutability.
#[derive(Debug)]
pub struct Proxy {
    address: String,
    endpoint: Url,
    weight: i64,
    health: Mutex<Health>,
    use_count: AtomicU64,
    /// Rate limiter to control requests per second through this proxy.
    pub limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl Proxy {
    /// Build a proxy from a persisted record. Returns `None` if the address is not a URL.
    pub fn from_record(record: &ProxyRecord, max_rps: f64) -> Option<Self> {
        let endpoint = Url::parse(&record.address).ok()?;
        let quota = Quota::per_second(NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN));

        Some(Self {
            address: record.address.clone(),
            endpoint,
            weight: record.weight,
            health: Mutex::new(Health {
                status: record.status,
                last_check: record.last_check,
                check_used: record.check_used,
            }),
            use_count: AtomicU64::new(0),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Shorthand for a proxy with default record values.
    pub fn new(address: &str, max_rps: f64) -> Option<Self> {
        Self::from_record(&ProxyRecord::new(address), max_rps)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Parsed form of the address, used to open connections.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn status(&self) -> ProxyStatus {
        self.health.lock().status
    }

    pub fn is_ok(&self) -> bool {
        self.status() == ProxyStatus::Active
    }

    /// Unix seconds of the last completed check.
    pub fn last_checked_at(&self) -> i64 {
        self.health.lock().last_check
    }

    /// Duration of the last completed check in milliseconds.
    pub fn last_check_duration_ms(&self) -> i64 {
        self.health.lock().check_used
    }

    /// Number of times the allocator handed this proxy out.
    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_use(&self) {
        self.use_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Pessimistically mark the proxy unavailable while a check is in flight.
    pub(crate) fn begin_check(&self) {
        self.health.lock().status = ProxyStatus::Unavailable;
    }

    pub(crate) fn finish_check(&self, started_at: i64, used_ms: i64, reachable: bool) {
        let mut health = self.health.lock();
        health.last_check = started_at;
        health.check_used = used_ms;
        if reachable {
            health.status = ProxyStatus::Active;
        }
    }

    /// Snapshot the persisted fields.
    pub fn record(&self) -> ProxyRecord {
        let health = *self.health.lock();
        ProxyRecord {
            address: self.address.clone(),
            weight: self.weight,
            status: health.status,
            last_check: health.last_check,
            check_used: health.check_used,
        }
    }

    /// Convert the proxy URL to a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.endpoint.as_str())
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.record().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        for status in [ProxyStatus::Unknown, ProxyStatus::Active, ProxyStatus::Unavailable] {
            assert_eq!(ProxyStatus::from_code(status.code()), status);
        }
        assert_eq!(ProxyStatus::from_code(42), ProxyStatus::Unknown);
        assert_eq!(ProxyStatus::Unavailable.to_string(), "unavailable");
    }

    #[test]
    fn rejects_unparseable_address() {
        assert!(Proxy::new("not a url", 1.0).is_none());
        assert!(Proxy::new("http://10.0.0.1:8080", 1.0).is_some());
    }

    #[test]
    fn check_transitions() {
        let proxy = Proxy::new("http://10.0.0.1:8080", 1.0).unwrap();
        assert!(proxy.is_ok());

        proxy.begin_check();
        assert_eq!(proxy.status(), ProxyStatus::Unavailable);
        proxy.finish_check(100, 12, false);
        assert_eq!(proxy.status(), ProxyStatus::Unavailable);
        assert_eq!(proxy.last_checked_at(), 100);
        assert_eq!(proxy.last_check_duration_ms(), 12);

        proxy.begin_check();
        proxy.finish_check(200, 3, true);
        assert_eq!(proxy.status(), ProxyStatus::Active);
        assert_eq!(proxy.last_checked_at(), 200);
    }

    #[test]
    fn display_matches_checked_line() {
        let record = ProxyRecord {
            address: "http://10.0.0.1:8080".into(),
            weight: 3,
            status: ProxyStatus::Unavailable,
            last_check: 1700000000,
            check_used: 250,
        };
        let proxy = Proxy::from_record(&record, 5.0).unwrap();
        assert_eq!(
            proxy.to_string(),
            "proxy=http://10.0.0.1:8080\tweight=3\tlast_check=1700000000\tcheck_used=250\tstatus=2"
        );
        assert_eq!(proxy.record(), record);
    }
}
