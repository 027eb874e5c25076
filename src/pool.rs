//! Core proxy pool implementation.

use crate::allocator::SessionKey;
use crate::config::ProxyPoolConfig;
use crate::error::Result;
use crate::prober::HealthProber;
use crate::proxy::Proxy;
use crate::registry::Registry;
use crate::scanner::{Scanner, SweepReport};
use crate::store::{self, Store};

use log::{debug, info};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A pool of upstream proxies handed out per session.
pub struct ProxyPool {
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    registry: Arc<Registry>,
    scanner: Arc<Scanner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProxyPool {
    /// Create a new proxy pool with the given configuration.
    ///
    /// Loads the proxy lists, runs the first sweep to completion and then keeps
    /// sweeping every `check_interval` in the background until [`ProxyPool::close`].
    pub async fn init(config: ProxyPoolConfig) -> Result<Arc<Self>> {
        info!("loading proxy pool from {}", config.conf_dir.display());

        let prober = HealthProber::new(&config).await?;
        let store = Store::new(config.baseline_path(), config.checked_path());
        let proxies = store.load(config.max_requests_per_second).await?;
        let registry = Arc::new(Registry::new(proxies));
        let scanner = Arc::new(Scanner::new(
            Arc::clone(&registry),
            prober,
            store,
            config.probe_concurrency,
        ));

        let pool = Arc::new(Self {
            config,
            registry,
            scanner,
            tasks: Mutex::new(Vec::new()),
        });

        let report = pool.scanner.sweep().await;
        info!(
            "initial proxy pool status: {}/{} active proxies",
            report.active, report.total
        );

        pool.spawn_background_tasks();
        Ok(pool)
    }

    fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock();

        let scanner = Arc::clone(&self.scanner);
        let period = self.config.check_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = scanner.sweep().await;
                info!(
                    "proxy pool status update: {}/{} active proxies",
                    report.active, report.total
                );
            }
        }));

        if let Some(max_idle) = self.config.session_idle_timeout {
            let registry = Arc::clone(&self.registry);
            tasks.push(tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + max_idle, max_idle);
                loop {
                    ticker.tick().await;
                    let expired = registry.expire_idle_sessions(max_idle);
                    if expired > 0 {
                        debug!("expired {} idle sessions", expired);
                    }
                }
            }));
        }
    }

    /// Stop the background sweeps. Safe to call more than once.
    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Get a proxy for `session` that it has not been given before.
    pub fn allocate(&self, session: SessionKey) -> Result<Arc<Proxy>> {
        self.registry.allocate(session)
    }

    /// Signal that `session` is done, so its proxies may be handed to it again.
    pub fn release(&self, session: SessionKey) {
        self.registry.release(session);
    }

    /// Look up a known proxy by address.
    pub fn lookup(&self, address: &str) -> Option<Arc<Proxy>> {
        self.registry.get(address)
    }

    /// Run a sweep now. Waits for a running sweep to finish first.
    pub async fn sweep(&self) -> SweepReport {
        self.scanner.sweep().await
    }

    /// Get statistics about the proxy pool as `(total, active)`.
    pub fn stats(&self) -> (usize, usize) {
        self.registry.stats()
    }

    /// Number of sessions with allocation history.
    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&store::render_records(&self.registry.records()))
    }
}
