//! Integration tests for connection pool configuration.

use loadgen::connection_pool::PoolConfig;
use std::time::Duration;

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();

    assert_eq!(config.max_idle_per_host, 32);
    assert_eq!(config.idle_timeout, Duration::from_secs(90));
    assert_eq!(config.tcp_keepalive, Some(Duration::from_secs(60)));
}

#[test]
fn test_pool_config_builder_pattern() {
    let config = PoolConfig::new()
        .with_max_idle_per_host(64)
        .with_idle_timeout(Duration::from_secs(120))
        .with_tcp_keepalive(Some(Duration::from_secs(30)));

    assert_eq!(config.max_idle_per_host, 64);
    assert_eq!(config.idle_timeout, Duration::from_secs(120));
    assert_eq!(config.tcp_keepalive, Some(Duration::from_secs(30)));
}

#[test]
fn test_pool_config_disable_keepalive() {
    let config = PoolConfig::new().with_tcp_keepalive(None);
    assert_eq!(config.tcp_keepalive, None);
}

#[test]
fn test_pool_config_apply_to_builder() {
    let config = PoolConfig::new()
        .with_max_idle_per_host(64)
        .with_idle_timeout(Duration::from_secs(120))
        .with_tcp_keepalive(Some(Duration::from_secs(30)));

    let builder = reqwest::Client::builder();
    let _builder = config.apply_to_builder(builder);
}

#[tokio::test]
async fn test_pool_with_real_client() {
    let config = PoolConfig::new()
        .with_max_idle_per_host(10)
        .with_idle_timeout(Duration::from_secs(30));

    let builder = reqwest::Client::builder();
    let builder = config.apply_to_builder(builder);
    let client = builder.build().expect("Failed to build client");

    assert!(client.get("http://example.com").build().is_ok());
}
