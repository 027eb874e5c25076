//! Simple example of using proxy-session-pool.

use proxy_session_pool::{ProxyPool, ProxyPoolConfig, ProxyPoolMiddleware, SessionId};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    // `./conf/pool.conf` lists one proxy per line, e.g. `proxy=http://10.0.0.1:8080`
    let config = ProxyPoolConfig::builder()
        .conf_dir("./conf")
        .alive_check_url("http://httpbin.org/bytes/64?seed={%rand}")
        .timeout(Duration::from_secs(10))
        .check_interval(Duration::from_secs(120))
        .retry_count(2)
        // rate limit for each proxy, lower performance but avoid banned
        .max_requests_per_second(3.0)
        .build();

    let pool = ProxyPool::init(config).await?;
    let (total, active) = pool.stats();
    println!("{}/{} proxies active", active, total);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(pool.clone()))
        .build();

    // Both requests of session 1 go out through different proxies.
    let session = 1;
    for _ in 0..2 {
        let response = client
            .get("https://httpbin.org/ip")
            .with_extension(SessionId(session))
            .send()
            .await?;
        println!("Status: {}", response.status());
        println!("Response: {}", response.text().await?);
    }
    pool.release(session);

    pool.close();
    Ok(())
}
