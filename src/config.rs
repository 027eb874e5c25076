//! Configuration for the proxy pool.

use std::path::PathBuf;
use std::time::Duration;

/// File name of the baseline proxy list inside the configuration directory.
pub const BASELINE_FILE: &str = "pool.conf";
/// File name of the checked proxy list inside the configuration directory.
pub const CHECKED_FILE: &str = "pool_checked.conf";

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Directory holding the baseline and checked proxy lists.
    pub conf_dir: PathBuf,
    /// Global request timeout. Alive-check probes use half of it.
    pub timeout: Duration,
    /// URL fetched through each proxy to verify it. `{%rand}` is replaced with a
    /// random number on every request. Without it proxies are checked with a TCP dial.
    pub alive_check_url: Option<String>,
    /// Interval between sweeps. Checks younger than half of it are not repeated.
    pub check_interval: Duration,
    /// Maximum number of probes in flight during a sweep.
    pub probe_concurrency: usize,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
    /// Number of times to retry a request with a different proxy.
    pub retry_count: usize,
    /// Forget sessions that have not allocated for this long. Disabled when unset.
    pub session_idle_timeout: Option<Duration>,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.conf_dir.join(BASELINE_FILE)
    }

    pub fn checked_path(&self) -> PathBuf {
        self.conf_dir.join(CHECKED_FILE)
    }

    /// Timeout applied to alive-check requests.
    pub fn probe_timeout(&self) -> Duration {
        self.timeout / 2
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    conf_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    alive_check_url: Option<String>,
    check_interval: Option<Duration>,
    probe_concurrency: Option<usize>,
    max_requests_per_second: Option<f64>,
    retry_count: Option<usize>,
    session_idle_timeout: Option<Duration>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            conf_dir: None,
            timeout: None,
            alive_check_url: None,
            check_interval: None,
            probe_concurrency: None,
            max_requests_per_second: None,
            retry_count: None,
            session_idle_timeout: None,
        }
    }

    /// Set the directory holding `pool.conf` and `pool_checked.conf`.
    pub fn conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = Some(dir.into());
        self
    }

    /// Set the global request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the alive-check URL template.
    pub fn alive_check_url(mut self, url: impl Into<String>) -> Self {
        self.alive_check_url = Some(url.into());
        self
    }

    /// Set the interval between sweeps.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Set the maximum number of concurrent probes.
    pub fn probe_concurrency(mut self, count: usize) -> Self {
        self.probe_concurrency = Some(count);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Expire sessions that stay idle for `timeout`.
    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            conf_dir: self.conf_dir.unwrap_or_else(|| PathBuf::from(".")),
            timeout: self.timeout.unwrap_or(Duration::from_secs(10)),
            alive_check_url: self.alive_check_url.filter(|u| !u.is_empty()),
            check_interval: self
                .check_interval
                .unwrap_or(Duration::from_secs(300))
                .max(Duration::from_secs(1)),
            probe_concurrency: self.probe_concurrency.unwrap_or(100).max(1),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
            retry_count: self.retry_count.unwrap_or(3),
            session_idle_timeout: self.session_idle_timeout.filter(|t| !t.is_zero()),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
