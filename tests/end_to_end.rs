//! Full stack: config → start → proxy listener → shutdown.

use std::time::Duration;

use traffic_lb::config::{BalancerConfig, ClientQuotaConfig};
use traffic_lb::http::ErrorBody;
use traffic_lb::lifecycle::{self, Shutdown};

mod common;

fn config(backends: Vec<String>) -> BalancerConfig {
    let mut config = BalancerConfig {
        backends,
        ..Default::default()
    };
    config.listener.bind_address = "127.0.0.1:0".into();
    config.health_check.interval_ms = 100;
    config.health_check.timeout_ms = 100;
    config.rate_limit.capacity = 100.0;
    config.rate_limit.rate = 100.0;
    config
}

#[tokio::test]
async fn rotates_limits_and_routes_around_unhealthy_backend() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let mut config = config(vec![a.url(), b.url()]);
    config.clients.push(ClientQuotaConfig {
        client_id: "127.0.0.1".into(),
        capacity: 2.0,
        rate: 1.0,
    });

    let shutdown = Shutdown::new();
    let balancer = lifecycle::start(config, None, &shutdown).await.unwrap();
    let proxy = format!("http://{}/", balancer.proxy_addr);
    let client = common::client();

    // First round already ran: both backends take traffic in order.
    let first = client.get(&proxy).send().await.unwrap();
    assert_eq!(first.headers()["x-backend"], "a");
    let second = client.get(&proxy).send().await.unwrap();
    assert_eq!(second.headers()["x-backend"], "b");

    let limited = client.get(&proxy).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    let body: ErrorBody = limited.json().await.unwrap();
    assert_eq!(body.code, 429);
    assert_eq!(a.hits() + b.hits(), 2);

    b.set_health(500);
    let tracked = balancer.registry.get(&b.url()).unwrap();
    assert!(common::eventually(Duration::from_secs(2), || !tracked.is_healthy()).await);

    // Refill both tokens.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    for _ in 0..2 {
        let res = client.get(&proxy).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["x-backend"], "a");
    }
    assert_eq!(b.hits(), 1);

    shutdown.trigger();
    assert!(balancer.join().await);
}

#[tokio::test]
async fn clients_are_limited_independently_of_each_other() {
    let a = common::start_mock_backend("a").await;
    let mut config = config(vec![a.url()]);
    config.rate_limit.capacity = 3.0;
    config.rate_limit.rate = 0.01;

    let shutdown = Shutdown::new();
    let balancer = lifecycle::start(config, None, &shutdown).await.unwrap();
    let client = common::client();
    let proxy = format!("http://{}/", balancer.proxy_addr);

    let mut statuses = Vec::new();
    for _ in 0..5 {
        statuses.push(client.get(&proxy).send().await.unwrap().status().as_u16());
    }
    assert_eq!(statuses, [200, 200, 200, 429, 429]);

    let snapshot = balancer.limiter.snapshot("127.0.0.1").unwrap();
    assert!(snapshot.tokens < 1.0);
    assert!(balancer.limiter.snapshot("10.1.1.1").is_none());

    shutdown.trigger();
    assert!(balancer.join().await);
}

#[tokio::test]
async fn starts_with_every_backend_down() {
    let dead = format!("http://{}", common::unused_addr().await);
    let shutdown = Shutdown::new();
    let balancer = lifecycle::start(config(vec![dead]), None, &shutdown).await.unwrap();

    let res = common::client()
        .get(format!("http://{}/", balancer.proxy_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);

    shutdown.trigger();
    assert!(balancer.join().await);
}

#[cfg(not(feature = "redis-store"))]
#[tokio::test]
async fn redis_store_requires_feature() {
    use traffic_lb::config::StoreKind;
    use traffic_lb::lifecycle::StartupError;

    let mut config = config(vec!["http://127.0.0.1:9".into()]);
    config.rate_limit.store.kind = StoreKind::Redis;

    let shutdown = Shutdown::new();
    let err = lifecycle::start(config, None, &shutdown).await.err().unwrap();
    assert!(matches!(err, StartupError::RedisUnavailable));
}

#[tokio::test]
async fn zero_interval_is_fatal() {
    use traffic_lb::lifecycle::StartupError;

    let mut config = config(vec!["http://127.0.0.1:9".into()]);
    config.health_check.interval_ms = 0;

    let shutdown = Shutdown::new();
    let err = lifecycle::start(config, None, &shutdown).await.err().unwrap();
    assert!(matches!(err, StartupError::Health(_)));
}
