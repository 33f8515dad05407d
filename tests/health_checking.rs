//! Health checker classification tests against mock backends

use spindle::config::BackendConfig;
use spindle::health::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use spindle::health::{HealthChecker, HealthConfig};
use spindle::registry::{BackendStatus, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_health_config() -> HealthConfig {
    HealthConfig {
        interval_stable_seconds: 1,
        interval_unstable_seconds: 1,
        probe_timeout_seconds: 2,
        cpu_threshold: 90.0,
    }
}

fn registry_for(addr: SocketAddr) -> Arc<Registry> {
    let configs = vec![BackendConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        weight: 1,
    }];
    Arc::new(Registry::new(&configs, &CircuitBreakerConfig::default()))
}

fn checker_for(registry: Arc<Registry>) -> HealthChecker {
    let (shutdown_tx, _) = broadcast::channel(1);
    HealthChecker::new(registry, test_health_config(), shutdown_tx.subscribe())
}

#[tokio::test]
async fn healthy_backend_is_classified_up() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cpu_utilization": 12.3
            })),
        )
        .expect(1..)
        .mount(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    let any_down = checker.cycle().await;
    assert!(!any_down);

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Up);
    assert_eq!(backend.cpu_utilization(), 12.3);
    assert!(backend.response_time().is_some());
}

#[tokio::test]
async fn http_error_classifies_down() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1..)
        .mount(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    let any_down = checker.cycle().await;
    assert!(any_down);

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Down);
    assert_eq!(backend.response_time(), None);
}

#[tokio::test]
async fn cpu_over_threshold_classifies_down_despite_200() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cpu_utilization": 95.0
            })),
        )
        .expect(1..)
        .mount(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    let any_down = checker.cycle().await;
    assert!(any_down);

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Down);
    // The measurement itself is retained for the metrics surface
    assert_eq!(backend.cpu_utilization(), 95.0);
    assert!(backend.response_time().is_some());
}

#[tokio::test]
async fn unreachable_backend_classifies_down() {
    // Bind then drop a listener so the port is very likely unbound
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = registry_for(addr);
    let checker = checker_for(Arc::clone(&registry));

    let any_down = checker.cycle().await;
    assert!(any_down);

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Down);
    assert_eq!(backend.response_time(), None);
}

#[tokio::test]
async fn non_json_health_body_counts_as_no_cpu_pressure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1..)
        .mount(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    checker.cycle().await;

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Up);
    assert_eq!(backend.cpu_utilization(), 0.0);
}

#[tokio::test]
async fn checker_never_touches_breaker_state() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1..)
        .mount(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    for _ in 0..3 {
        checker.cycle().await;
    }

    let backend = &registry.all()[0];
    assert_eq!(backend.status(), BackendStatus::Down);
    // Breaker transitions belong to the traffic path alone
    assert_eq!(backend.breaker().state(), CircuitState::Closed);
    assert_eq!(backend.breaker().fail_count(), 0);
}

#[tokio::test]
async fn recovery_flips_back_to_up() {
    let mock_server = MockServer::start().await;

    let failing = Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .named("failing health")
        .mount_as_scoped(&mock_server)
        .await;

    let registry = registry_for(*mock_server.address());
    let checker = checker_for(Arc::clone(&registry));

    checker.cycle().await;
    assert_eq!(registry.all()[0].status(), BackendStatus::Down);

    drop(failing);
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cpu_utilization": 5.0
            })),
        )
        .mount(&mock_server)
        .await;

    checker.cycle().await;
    assert_eq!(registry.all()[0].status(), BackendStatus::Up);
}
