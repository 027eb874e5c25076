//! Middleware implementation for reqwest.

use crate::allocator::SessionKey;
use crate::pool::ProxyPool;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Request extension naming the session a request belongs to.
///
/// Requests of one session are never sent through the same proxy twice while
/// another is available. Requests without it get a one-shot session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub SessionKey);

/// Middleware that routes requests through proxies allocated from a pool.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    /// Source of one-shot session keys, counting up from `i64::MIN`.
    ephemeral: Arc<AtomicI64>,
}

impl ProxyPoolMiddleware {
    /// Wrap an initialised pool.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let (total, active) = pool.stats();
        info!("Proxy pool middleware using {}/{} active proxies", active, total);
        if active == 0 {
            warn!("No active proxies available in pool");
        }
        Self {
            pool,
            ephemeral: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    async fn send(&self, req: reqwest::Request, session: SessionKey) -> Result<reqwest::Response> {
        let max_retries = self.pool.config.retry_count;
        let mut retry_count = 0;
        let mut last_error: Option<reqwest::Error> = None;

        loop {
            let proxy = match self.pool.allocate(session) {
                Ok(proxy) => proxy,
                Err(e) => {
                    let (total, active) = self.pool.stats();
                    warn!(
                        "No proxy available for session {}. Total: {}, Active: {}",
                        session, total, active
                    );
                    // A session that ran dry while retrying reports why its last attempt failed.
                    return Err(match last_error {
                        Some(err) => Error::Reqwest(err),
                        None => Error::Middleware(anyhow!(e)),
                    });
                }
            };

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            info!("Using proxy: {} (attempt {})", proxy.address(), retry_count + 1);

            // Apply rate limiting
            proxy.limiter.until_ready().await;

            let client = proxy
                .to_reqwest_proxy()
                .and_then(|p| {
                    reqwest::Client::builder()
                        .proxy(p)
                        .timeout(self.pool.config.timeout)
                        .build()
                });
            let client = match client {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to build client with proxy {}: {}", proxy.address(), e);
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Err(Error::Reqwest(e));
                    }
                    last_error = Some(e);
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(
                        "Request failed with proxy {} (attempt {}): {}",
                        proxy.address(),
                        retry_count + 1,
                        err
                    );
                    retry_count += 1;
                    if retry_count > max_retries {
                        return Err(Error::Reqwest(err));
                    }
                    last_error = Some(err);
                    // Next allocation for this session picks a different proxy.
                }
            }
        }
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        match extensions.get::<SessionId>() {
            Some(SessionId(session)) => self.send(req, *session).await,
            None => {
                let session = self.ephemeral.fetch_add(1, Ordering::Relaxed);
                let result = self.send(req, session).await;
                self.pool.release(session);
                result
            }
        }
    }
}
