//! A memory-backed broker wired from configuration, end to end

use domain_broker_adapters::AppConfig;
use domain_broker_application::OperationParameters;
use domain_broker_core::{Action, InstanceId, OperationState, ResourceKind};
use domain_broker_server::{BrokerRuntime, initialize};
use std::time::Duration;

const LOAD_BALANCER: &str =
    "arn:aws:elasticloadbalancing:us-east-1:000000000000:loadbalancer/app/runtime";

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dns.root_domain = "broker.test".to_string();
    config.routing.load_balancer_arns = vec![LOAD_BALANCER.to_string()];
    config.queue.poll_interval_ms = 5;
    config.worker.concurrency = 2;
    config.polling.dns_poll_interval_ms = 1;
    config.polling.distribution_poll_interval_ms = 1;
    config
}

async fn delegate(runtime: &BrokerRuntime, domain: &str) {
    runtime
        .remotes
        .resolver
        .set_cname(
            format!("_acme-challenge.{}", domain),
            format!("_acme-challenge.{}.broker.test", domain),
        )
        .await;
}

#[tokio::test]
async fn test_routing_instance_provisions_through_the_pool() {
    let runtime = initialize(test_config()).await.unwrap();
    delegate(&runtime, "app.example.com").await;

    let operation_id = runtime
        .service
        .start_operation(
            &InstanceId::new("runtime-1"),
            Action::Provision,
            OperationParameters {
                kind: Some(ResourceKind::Routing),
                domains: Some("App.Example.com".to_string()),
                ..OperationParameters::default()
            },
        )
        .await
        .unwrap();
    runtime.pool.process_available().await;

    let status = runtime
        .service
        .get_operation_status(operation_id)
        .await
        .unwrap();
    assert_eq!(status.state, OperationState::Succeeded);
    assert_eq!(status.step_description.as_deref(), Some("Complete!"));
    assert_eq!(
        runtime
            .remotes
            .load_balancers
            .attached_certificates(LOAD_BALANCER)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let runtime = initialize(test_config()).await.unwrap();
    delegate(&runtime, "cdn.example.com").await;
    let service = runtime.service.clone();
    let queue = runtime.queue.clone();

    let operation_id = service
        .start_operation(
            &InstanceId::new("runtime-2"),
            Action::Provision,
            OperationParameters {
                kind: Some(ResourceKind::Cdn),
                domains: Some("cdn.example.com".to_string()),
                origin: Some("origin.example.org".to_string()),
                ..OperationParameters::default()
            },
        )
        .await
        .unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(runtime.run(async {
        let _ = stop_rx.await;
    }));

    let mut state = OperationState::InProgress;
    for _ in 0..200 {
        state = service
            .get_operation_status(operation_id)
            .await
            .unwrap()
            .state;
        if state != OperationState::InProgress {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(state, OperationState::Succeeded);

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    // the queue was closed on the way out
    assert!(queue.dequeue().await.is_err());
}
