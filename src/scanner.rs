//! Concurrent health-check sweeps over the whole registry.

use crate::prober::HealthProber;
use crate::registry::Registry;
use crate::store::Store;

use futures::future;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Proxies checked.
    pub total: usize,
    /// Proxies found reachable.
    pub reachable: usize,
    /// Size of the active set after the sweep.
    pub active: usize,
    pub elapsed: Duration,
}

/// Runs sweeps one at a time, with a bounded number of probes in flight.
pub struct Scanner {
    registry: Arc<Registry>,
    prober: Arc<HealthProber>,
    store: Store,
    sweep_gate: Mutex<()>,
    probe_gate: Arc<Semaphore>,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>, prober: HealthProber, store: Store, probe_concurrency: usize) -> Self {
        Self {
            registry,
            prober: Arc::new(prober),
            store,
            sweep_gate: Mutex::new(()),
            probe_gate: Arc::new(Semaphore::new(probe_concurrency.max(1))),
        }
    }

    /// Check every known proxy, update the active set, then rewrite the checked list.
    ///
    /// A sweep started while another is running waits for it to finish first.
    pub async fn sweep(&self) -> SweepReport {
        let _running = self.sweep_gate.lock().await;
        let start = Instant::now();
        let addresses = self.registry.addresses();
        info!("start checking all proxies, total={}", addresses.len());

        let units = addresses.into_iter().map(|address| {
            let registry = Arc::clone(&self.registry);
            let prober = Arc::clone(&self.prober);
            let gate = Arc::clone(&self.probe_gate);
            tokio::spawn(async move {
                let _permit = gate.acquire_owned().await.ok()?;
                let proxy = registry.get(&address)?;
                let reachable = prober.check(&proxy).await;
                if reachable {
                    registry.mark_active(&address);
                } else {
                    registry.mark_inactive(&address);
                }
                Some(reachable)
            })
        });

        let mut total = 0;
        let mut reachable = 0;
        for result in future::join_all(units).await {
            match result {
                Ok(Some(ok)) => {
                    total += 1;
                    if ok {
                        reachable += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("proxy check task failed: {}", e),
            }
        }

        let (_, active) = self.registry.stats();
        let elapsed = start.elapsed();
        info!(
            "finished checking all proxies, total={} reachable={} active={} used={:?}",
            total, reachable, active, elapsed
        );

        if let Err(e) = self.store.save(&self.registry.records()).await {
            warn!("failed to save checked proxy list: {}", e);
        }

        SweepReport {
            total,
            reachable,
            active,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyPoolConfig, BASELINE_FILE, CHECKED_FILE};
    use crate::proxy::{Proxy, ProxyStatus};
    use crate::store::parse_records;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "proxy-session-pool-scanner-{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn scanner_for(dir: &Path, addresses: &[String], concurrency: usize) -> (Scanner, Arc<Registry>) {
        let config = ProxyPoolConfig::builder()
            .conf_dir(dir)
            .timeout(Duration::from_secs(2))
            .check_interval(Duration::from_secs(1))
            .build();
        let prober = HealthProber::new(&config).await.unwrap();
        let registry = Arc::new(Registry::new(addresses.iter().map(|a| Proxy::new(a, 5.0).unwrap())));
        let store = Store::new(dir.join(BASELINE_FILE), dir.join(CHECKED_FILE));
        (Scanner::new(Arc::clone(&registry), prober, store, concurrency), registry)
    }

    #[tokio::test]
    async fn sweep_updates_active_set_and_saves() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = temp_dir("sweep");
        let up = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let down = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up_addr = format!("http://{}", up.local_addr().unwrap());
        let down_addr = format!("http://{}", down.local_addr().unwrap());
        drop(down);

        let (scanner, registry) = scanner_for(&dir, &[up_addr.clone(), down_addr.clone()], 100).await;
        let report = scanner.sweep().await;
        assert_eq!(report.total, 2);
        assert_eq!(report.reachable, 1);
        assert_eq!(report.active, 1);
        assert!(registry.is_active(&up_addr));
        assert!(!registry.is_active(&down_addr));
        assert!(registry.get(&down_addr).is_some());

        let saved = parse_records(&std::fs::read_to_string(dir.join(CHECKED_FILE)).unwrap());
        assert_eq!(saved.len(), 2);
        let down_record = saved.iter().find(|r| r.address == down_addr).unwrap();
        assert_eq!(down_record.status, ProxyStatus::Unavailable);
        assert!(down_record.last_check > 0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn proxy_going_down_leaves_active_set() {
        let dir = temp_dir("down");
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let a_addr = format!("http://{}", a.local_addr().unwrap());
        let b_addr = format!("http://{}", b.local_addr().unwrap());

        let (scanner, registry) = scanner_for(&dir, &[a_addr.clone(), b_addr.clone()], 100).await;
        assert_eq!(scanner.sweep().await.active, 2);

        drop(b);
        // A one second interval rounds the throttle window down to zero.
        let report = scanner.sweep().await;
        assert_eq!(report.active, 1);

        for session in 0..4 {
            let proxy = registry.allocate(session).unwrap();
            assert_eq!(proxy.address(), a_addr);
        }
        assert!(registry.get(&b_addr).is_some());

        std::fs::remove_dir_all(dir).ok();
    }

    /// Connection counters shared by a group of slow responders.
    #[derive(Default)]
    struct Load {
        accepted: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    /// Answers every request with a fixed body after `delay`, tracking load.
    async fn slow_responder(load: Arc<Load>, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let load = Arc::clone(&load);
                tokio::spawn(async move {
                    load.accepted.fetch_add(1, Ordering::SeqCst);
                    let now = load.current.fetch_add(1, Ordering::SeqCst) + 1;
                    load.peak.fetch_max(now, Ordering::SeqCst);

                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    tokio::time::sleep(delay).await;
                    // Leave before answering so the count never outlives the check.
                    load.current.fetch_sub(1, Ordering::SeqCst);
                    let response =
                        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    async fn http_scanner(dir: &Path, proxies: usize, concurrency: usize) -> (Scanner, Arc<Load>) {
        let origin = slow_responder(Arc::new(Load::default()), Duration::ZERO).await;
        let load = Arc::new(Load::default());
        let mut addresses = Vec::new();
        for _ in 0..proxies {
            addresses.push(slow_responder(Arc::clone(&load), Duration::from_millis(150)).await);
        }

        let config = ProxyPoolConfig::builder()
            .conf_dir(dir)
            .alive_check_url(format!("{}/alive", origin))
            .timeout(Duration::from_secs(6))
            .check_interval(Duration::from_secs(1))
            .build();
        let prober = HealthProber::new(&config).await.unwrap();
        let registry = Arc::new(Registry::new(addresses.iter().map(|a| Proxy::new(a, 5.0).unwrap())));
        let store = Store::new(dir.join(BASELINE_FILE), dir.join(CHECKED_FILE));
        (Scanner::new(registry, prober, store, concurrency), load)
    }

    #[tokio::test]
    async fn checks_in_flight_are_capped() {
        let dir = temp_dir("cap");
        let (scanner, load) = http_scanner(&dir, 6, 2).await;

        let report = scanner.sweep().await;
        assert_eq!(report.total, 6);
        assert_eq!(report.reachable, 6);
        assert_eq!(load.accepted.load(Ordering::SeqCst), 6);
        let peak = load.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak of {} checks in flight", peak);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn overlapping_sweeps_run_one_after_another() {
        let dir = temp_dir("overlap");
        let (scanner, load) = http_scanner(&dir, 4, 100).await;

        let first = async {
            let report = scanner.sweep().await;
            (report, load.accepted.load(Ordering::SeqCst))
        };
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            scanner.sweep().await
        };
        let ((first, accepted_when_first_done), second) = tokio::join!(first, second);

        // None of the second sweep's checks started before the first one returned.
        assert_eq!(accepted_when_first_done, 4);
        assert_eq!(first.total, 4);
        assert_eq!(second.total, 4);
        assert_eq!(load.accepted.load(Ordering::SeqCst), 8);
        assert!(load.peak.load(Ordering::SeqCst) <= 4);

        std::fs::remove_dir_all(dir).ok();
    }
}
