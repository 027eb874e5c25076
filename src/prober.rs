//! Reachability checks for a single proxy.

use crate::config::ProxyPoolConfig;
use crate::error::{Error, Result};
use crate::proxy::Proxy;
use crate::utils;

use log::{debug, info};
use reqwest::header::CONTENT_LENGTH;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;

/// How a proxy is checked.
#[derive(Debug, Clone)]
enum Strategy {
    /// Fetch the alive-check URL through the proxy and compare its
    /// Content-Length with the one seen on a direct request at startup.
    Http {
        url_template: String,
        baseline_length: Option<String>,
        timeout: Duration,
    },
    /// Open and immediately close a TCP connection to the proxy.
    Tcp { timeout: Duration },
}

/// Checks one proxy at a time and records the outcome on it.
#[derive(Debug, Clone)]
pub struct HealthProber {
    strategy: Strategy,
    /// Checks younger than this many seconds are not repeated.
    throttle_secs: i64,
}

impl HealthProber {
    /// Create a prober for `config`.
    ///
    /// With an alive-check URL configured this performs the direct baseline
    /// request and fails if it cannot be completed.
    pub async fn new(config: &ProxyPoolConfig) -> Result<Self> {
        let throttle_secs = (config.check_interval.as_secs() / 2) as i64;

        let strategy = match &config.alive_check_url {
            Some(template) => {
                let url = utils::substitute_rand(template);
                let client = reqwest::Client::builder()
                    .no_proxy()
                    .timeout(config.timeout)
                    .build()?;
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|source| Error::BaselineUnreachable {
                        url: template.clone(),
                        source,
                    })?;
                let baseline_length = content_length(&response);
                info!(
                    "alive check baseline from {}: status {}, content-length {:?}",
                    template,
                    response.status(),
                    baseline_length
                );
                Strategy::Http {
                    url_template: template.clone(),
                    baseline_length,
                    timeout: config.probe_timeout(),
                }
            }
            None => Strategy::Tcp {
                timeout: config.timeout,
            },
        };

        Ok(Self {
            strategy,
            throttle_secs,
        })
    }

    /// Check `proxy`, updating its status and timing. Returns whether it is reachable.
    ///
    /// A proxy checked within the last half interval is not probed again; its
    /// current status is returned instead.
    pub async fn check(&self, proxy: &Proxy) -> bool {
        let started_at = utils::unix_now();
        if started_at - proxy.last_checked_at() < self.throttle_secs {
            return proxy.is_ok();
        }

        proxy.begin_check();
        let start = Instant::now();
        let outcome = match &self.strategy {
            Strategy::Http {
                url_template,
                baseline_length,
                timeout,
            } => probe_http(proxy, url_template, baseline_length.as_deref(), *timeout).await,
            Strategy::Tcp { timeout } => probe_tcp(proxy, *timeout).await,
        };
        let used_ms = start.elapsed().as_millis() as i64;

        let reachable = outcome.is_ok();
        proxy.finish_check(started_at, used_ms, reachable);
        match outcome {
            Ok(()) => debug!("check proxy {} pass, used {}ms", proxy.address(), used_ms),
            Err(reason) => debug!("check proxy {} failed, {}, used {}ms", proxy.address(), reason, used_ms),
        }
        reachable
    }
}

fn content_length(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn probe_http(
    proxy: &Proxy,
    url_template: &str,
    baseline_length: Option<&str>,
    timeout: Duration,
) -> std::result::Result<(), String> {
    let reqwest_proxy = proxy.to_reqwest_proxy().map_err(|e| format!("bad proxy url: {}", e))?;
    let client = reqwest::Client::builder()
        .proxy(reqwest_proxy)
        .timeout(timeout)
        .build()
        .map_err(|e| format!("client build error: {}", e))?;

    let url = utils::substitute_rand(url_template);
    let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
    let length = content_length(&response);
    if length.as_deref() != baseline_length {
        return Err(format!(
            "content-length mismatch, expected {:?} got {:?}",
            baseline_length, length
        ));
    }
    Ok(())
}

async fn probe_tcp(proxy: &Proxy, timeout: Duration) -> std::result::Result<(), String> {
    let addr = utils::host_port(proxy.endpoint())
        .ok_or_else(|| format!("no host/port in {}", proxy.address()))?;
    match time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(())
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("connect timed out".to_string()),
    }
}
