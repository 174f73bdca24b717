//! End-to-end pipeline scenarios against in-memory state and simulated remotes

mod common;

use chrono::{Duration, Utc};
use common::{Harness, LB_A, LB_B, ROOT_DOMAIN};
use domain_broker_application::{
    ApplicationError, OperationParameters, RenewalScanner, RetryPolicy, StalledOperationScanner,
    StepOutcome, StepScope,
};
use domain_broker_core::{
    Action, CorrelationId, DomainError, InstanceId, NewOperation, OperationState, ResourceKind,
    ServiceInstance, StepId, StepTask,
};
use domain_broker_ports::{DnsRecord, EntityStore, TaskQueue};

#[tokio::test]
async fn test_routing_provision_completes() {
    let harness = Harness::new().await;
    harness.load_balancers.preload_certificates(LB_A, 3).await;

    let operation_id = harness
        .provision(
            "routing-1",
            ResourceKind::Routing,
            &["a.example.com", "b.example.com"],
        )
        .await;
    harness.run_until_idle().await;

    let operation = harness.operation(operation_id).await;
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.step_description.as_deref(), Some("Complete!"));

    let instance = harness.instance("routing-1").await;
    let certificate = instance.current_certificate.clone().unwrap();
    let stored = certificate.stored.clone().unwrap();
    let binding = certificate.binding.clone().unwrap();
    assert!(instance.new_certificate.is_none());
    assert!(instance.dns_change_ids.is_empty());

    // the emptier load balancer wins
    assert_eq!(binding.load_balancer_arn, LB_B);
    assert!(
        harness
            .load_balancers
            .attached_certificates(LB_B)
            .await
            .contains(&stored.arn)
    );
    assert!(stored.name.starts_with("routing-1-"));
    assert!(stored.name.ends_with(&certificate.id.to_string()));

    for domain in ["a.example.com", "b.example.com"] {
        let alias = harness
            .dns
            .record(&format!("{}.{}", domain, ROOT_DOMAIN))
            .await
            .unwrap();
        assert!(matches!(alias, DnsRecord::Alias { ref target, .. } if Some(target) == instance.alias_target.as_ref()));
        assert!(
            harness
                .dns
                .record(&format!("_acme-challenge.{}.{}", domain, ROOT_DOMAIN))
                .await
                .is_some()
        );
    }
    assert_eq!(harness.acme.certificates_issued().await, 1);
    assert_eq!(harness.acme.accounts_created().await, 1);
}

#[tokio::test]
async fn test_cdn_provision_creates_one_distribution() {
    let harness = Harness::new().await;

    let operation_id = harness
        .provision("cdn-1", ResourceKind::Cdn, &["www.example.com"])
        .await;
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    let instance = harness.instance("cdn-1").await;
    let details = instance.cdn_details().unwrap();
    let distribution_id = details.distribution_id.clone().unwrap();
    let stored = instance.current_certificate.as_ref().unwrap().stored.clone().unwrap();

    assert_eq!(harness.cdn.distribution_count().await, 1);
    assert_eq!(
        harness.cdn.distribution_certificate(&distribution_id).await,
        Some(stored.id)
    );
    assert_eq!(instance.alias_target, details.distribution_domain);
    assert!(
        harness
            .certificates
            .certificate_names()
            .await
            .contains(&stored.name)
    );
}

#[tokio::test]
async fn test_status_starts_with_queuing_tasks() {
    let harness = Harness::new().await;
    let operation_id = harness
        .provision("status-1", ResourceKind::Routing, &["s.example.com"])
        .await;

    let status = harness.service.get_operation_status(operation_id).await.unwrap();
    assert_eq!(status.state, OperationState::InProgress);
    assert_eq!(status.step_description.as_deref(), Some("Queuing tasks"));

    let pending = harness.queue.pending_tasks().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].step, StepId::CreateAcmeAccount);
    assert_eq!(pending[0].attempt, 1);
}

#[tokio::test]
async fn test_provision_without_cname_delegation_is_rejected() {
    let harness = Harness::new().await;
    harness.delegate(&["ok.example.com"]).await;

    let err = harness
        .service
        .start_operation(
            &InstanceId::new("missing-cname"),
            Action::Provision,
            OperationParameters {
                domains: Some("ok.example.com, missing.example.com".into()),
                ..OperationParameters::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        ApplicationError::Domain(DomainError::Validation(message)) => {
            assert!(message.contains("_acme-challenge.missing.example.com.domains.test"));
            assert!(!message.contains("_acme-challenge.ok.example.com"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        harness
            .store
            .get_instance(&InstanceId::new("missing-cname"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_unknown_operation_status_is_not_found() {
    let harness = Harness::new().await;
    let err = harness
        .service
        .get_operation_status(domain_broker_core::OperationId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotFound(_))));
}

#[tokio::test]
async fn test_cdn_renewal_swaps_certificate() {
    let harness = Harness::new().await;
    harness
        .provision("cdn-renew", ResourceKind::Cdn, &["renew.example.com"])
        .await;
    harness.run_until_idle().await;

    let mut instance = harness.instance("cdn-renew").await;
    let old = instance.current_certificate.clone().unwrap();
    instance.current_certificate.as_mut().unwrap().expires_at = Some(Utc::now() + Duration::days(9));
    harness.store.save_instance(&instance).await.unwrap();

    let scanner = RenewalScanner::new(
        harness.store_port(),
        harness.queue_port(),
        Duration::days(10),
    );
    let created = scanner.scan(Utc::now()).await.unwrap();
    assert_eq!(created.len(), 1);
    let pending = harness.queue.pending_tasks().await;
    assert_eq!(pending[0].correlation_id.as_str(), CorrelationId::RENEWAL);
    assert_eq!(pending[0].step, StepId::GeneratePrivateKey);

    harness.run_until_idle().await;

    let renewal = harness.operation(created[0]).await;
    assert_eq!(renewal.action, Action::Renew);
    assert_eq!(renewal.state, OperationState::Succeeded);

    let instance = harness.instance("cdn-renew").await;
    let current = instance.current_certificate.clone().unwrap();
    let old_stored = old.stored.unwrap();
    let new_stored = current.stored.unwrap();
    assert_ne!(current.id, old.id);
    assert!(instance.retiring_certificate.is_none());
    assert!(current.expires_at.unwrap() > Utc::now() + Duration::days(80));

    let distribution_id = instance.cdn_details().unwrap().distribution_id.clone().unwrap();
    assert_eq!(
        harness.cdn.distribution_certificate(&distribution_id).await,
        Some(new_stored.id)
    );
    let names = harness.certificates.certificate_names().await;
    assert!(names.contains(&new_stored.name));
    assert!(!names.contains(&old_stored.name));
    assert_eq!(harness.cdn.distribution_count().await, 1);
    assert_eq!(harness.acme.certificates_issued().await, 2);
    // the account of the first issuance is reused
    assert_eq!(harness.acme.accounts_created().await, 1);
}

#[tokio::test]
async fn test_routing_renewal_moves_to_emptier_load_balancer() {
    let harness = Harness::new().await;
    harness.load_balancers.preload_certificates(LB_A, 3).await;
    harness
        .provision("routing-renew", ResourceKind::Routing, &["move.example.com"])
        .await;
    harness.run_until_idle().await;

    let old = harness
        .instance("routing-renew")
        .await
        .current_certificate
        .unwrap();
    let old_arn = old.stored.clone().unwrap().arn;
    assert_eq!(old.binding.unwrap().load_balancer_arn, LB_B);

    harness.load_balancers.preload_certificates(LB_B, 10).await;
    let renewal_id = harness.start("routing-renew", Action::Renew).await;
    harness.run_until_idle().await;
    assert_eq!(
        harness.operation(renewal_id).await.state,
        OperationState::Succeeded
    );

    let instance = harness.instance("routing-renew").await;
    let current = instance.current_certificate.clone().unwrap();
    let new_arn = current.stored.clone().unwrap().arn;
    assert_eq!(current.binding.unwrap().load_balancer_arn, LB_A);
    assert_eq!(
        instance.routing_details().unwrap().load_balancer_arn.as_deref(),
        Some(LB_A)
    );
    assert!(harness.load_balancers.attached_certificates(LB_A).await.contains(&new_arn));
    assert!(!harness.load_balancers.attached_certificates(LB_B).await.contains(&old_arn));

    match harness
        .dns
        .record(&format!("move.example.com.{}", ROOT_DOMAIN))
        .await
        .unwrap()
    {
        DnsRecord::Alias { target, .. } => {
            assert_eq!(Some(target), instance.alias_target);
        }
        other => panic!("unexpected record: {other:?}"),
    }
}

#[tokio::test]
async fn test_deprovision_cancels_running_provision() {
    let harness = Harness::new().await;
    let provision_id = harness
        .provision("cancel-1", ResourceKind::Routing, &["c.example.com"])
        .await;

    // first step only, then the customer changes their mind
    assert_eq!(
        harness.step_once().await,
        Some(StepOutcome::Advanced {
            next: Some(StepId::GeneratePrivateKey)
        })
    );
    let deprovision_id = harness.start("cancel-1", Action::Deprovision).await;
    harness.run_until_idle().await;

    let provision = harness.operation(provision_id).await;
    assert!(provision.canceled_at.is_some());
    assert_eq!(provision.state, OperationState::InProgress);

    let deprovision = harness.operation(deprovision_id).await;
    assert_eq!(deprovision.state, OperationState::Succeeded);
    assert_eq!(deprovision.step_description.as_deref(), Some("Complete!"));

    let instance = harness.instance("cancel-1").await;
    assert!(instance.deactivated_at.is_some());
    assert!(
        instance
            .new_certificate
            .iter()
            .all(|certificate| certificate.private_key_pem.is_none())
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
    assert_eq!(harness.acme.orders_created().await, 0);

    // a canceled operation is never picked up as stalled
    let scanner = StalledOperationScanner::new(
        harness.store_port(),
        harness.queue_port(),
        Duration::hours(2),
    );
    harness
        .store
        .backdate_operation(provision_id, Utc::now() - Duration::hours(5))
        .await;
    assert!(scanner.scan(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_routing_deprovision_removes_everything() {
    let harness = Harness::new().await;
    harness
        .provision("gone-1", ResourceKind::Routing, &["gone.example.com"])
        .await;
    harness.run_until_idle().await;
    let certificate = harness.instance("gone-1").await.current_certificate.unwrap();
    let stored = certificate.stored.unwrap();
    let binding = certificate.binding.unwrap();

    let operation_id = harness.start("gone-1", Action::Deprovision).await;
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert!(harness.dns.records().await.is_empty());
    assert!(harness.certificates.certificate_names().await.is_empty());
    assert!(
        !harness
            .load_balancers
            .attached_certificates(&binding.load_balancer_arn)
            .await
            .contains(&stored.arn)
    );

    let instance = harness.instance("gone-1").await;
    assert!(!instance.is_active());
    assert!(instance.current_certificate.unwrap().private_key_pem.is_none());
    assert!(instance.alias_records.is_empty());

    // deprovisioned instances are not renewed
    let scanner = RenewalScanner::new(
        harness.store_port(),
        harness.queue_port(),
        Duration::days(365),
    );
    assert!(scanner.scan(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cdn_deprovision_deletes_distribution() {
    let harness = Harness::new().await;
    harness
        .provision("cdn-gone", ResourceKind::Cdn, &["cdn-gone.example.com"])
        .await;
    harness.run_until_idle().await;

    let operation_id = harness.start("cdn-gone", Action::Deprovision).await;
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert_eq!(harness.cdn.distribution_count().await, 0);
    assert!(harness.certificates.certificate_names().await.is_empty());
    let instance = harness.instance("cdn-gone").await;
    assert!(instance.cdn_details().unwrap().distribution_id.is_none());
}

#[tokio::test]
async fn test_cdn_deprovision_after_external_removal() {
    let harness = Harness::new().await;
    harness
        .provision("cdn-ext", ResourceKind::Cdn, &["cdn-ext.example.com"])
        .await;
    harness.run_until_idle().await;

    let instance = harness.instance("cdn-ext").await;
    let distribution_id = instance.cdn_details().unwrap().distribution_id.clone().unwrap();
    let stored = instance.current_certificate.unwrap().stored.unwrap();
    harness.cdn.remove_externally(&distribution_id).await;
    harness.certificates.remove_externally(&stored.name).await;

    let operation_id = harness.start("cdn-ext", Action::Deprovision).await;
    harness.run_until_idle().await;

    let operation = harness.operation(operation_id).await;
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.step_description.as_deref(), Some("Complete!"));
    let instance = harness.instance("cdn-ext").await;
    assert!(instance.deactivated_at.is_some());
    assert!(instance.current_certificate.unwrap().private_key_pem.is_none());
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_routing_deprovision_after_external_removal() {
    let harness = Harness::new().await;
    harness
        .provision("alb-ext", ResourceKind::Routing, &["alb-ext.example.com"])
        .await;
    harness.run_until_idle().await;

    let stored = harness
        .instance("alb-ext")
        .await
        .current_certificate
        .unwrap()
        .stored
        .unwrap();
    harness.certificates.remove_externally(&stored.name).await;

    let operation_id = harness.start("alb-ext", Action::Deprovision).await;
    harness.run_until_idle().await;

    let operation = harness.operation(operation_id).await;
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.step_description.as_deref(), Some("Complete!"));
    let instance = harness.instance("alb-ext").await;
    assert!(instance.deactivated_at.is_some());
    assert!(instance.current_certificate.unwrap().private_key_pem.is_none());
    assert!(harness.certificates.certificate_names().await.is_empty());
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_deprovision_deletes_certificate_of_canceled_provision() {
    let harness = Harness::new().await;
    harness
        .provision("half-done", ResourceKind::Routing, &["half.example.com"])
        .await;
    // stop right after the upload, before the certificate is attached
    while harness.queue.pending_tasks().await[0].step != StepId::SelectLoadBalancer {
        harness.step_once().await.unwrap();
    }
    assert_eq!(harness.certificates.certificate_names().await.len(), 1);

    let operation_id = harness.start("half-done", Action::Deprovision).await;
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert!(harness.certificates.certificate_names().await.is_empty());
    let instance = harness.instance("half-done").await;
    assert!(instance.current_certificate.is_none());
    assert!(
        instance
            .new_certificate
            .iter()
            .all(|certificate| certificate.private_key_pem.is_none())
    );
}

#[tokio::test]
async fn test_in_flight_step_does_not_undo_cancellation() {
    let harness = Harness::new().await;
    let provision_id = harness
        .provision("late-1", ResourceKind::Routing, &["late.example.com"])
        .await;
    for _ in 0..3 {
        harness.step_once().await.unwrap();
    }

    // a worker picks up the next provision step and loads its state
    let provision = harness.operation(provision_id).await;
    let mut in_flight = StepScope::new(provision, harness.instance("late-1").await);

    let deprovision_id = harness.start("late-1", Action::Deprovision).await;
    harness
        .run_step(StepId::CancelPendingProvisioning, deprovision_id)
        .await;
    assert!(harness.operation(provision_id).await.canceled_at.is_some());

    harness
        .runner
        .run(StepId::PublishValidationRecords, &mut in_flight)
        .await
        .unwrap();
    let provision = harness.operation(provision_id).await;
    assert!(provision.canceled_at.is_some());
    assert_eq!(provision.state, OperationState::InProgress);

    harness.run_until_idle().await;
    assert_eq!(
        harness.operation(deprovision_id).await.state,
        OperationState::Succeeded
    );
    assert!(harness.operation(provision_id).await.canceled_at.is_some());
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_lagging_step_does_not_reopen_finished_operation() {
    let harness = Harness::new().await;
    let operation_id = harness
        .provision("lag-1", ResourceKind::Routing, &["lag.example.com"])
        .await;
    while harness.queue.pending_tasks().await[0].step != StepId::MarkProvisioned {
        harness.step_once().await.unwrap();
    }
    let operation = harness.operation(operation_id).await;
    let mut lagging = StepScope::new(operation, harness.instance("lag-1").await);

    harness.step_once().await.unwrap();
    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );

    harness
        .runner
        .run(StepId::PublishAliasRecords, &mut lagging)
        .await
        .unwrap();
    let operation = harness.operation(operation_id).await;
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.step_description.as_deref(), Some("Complete!"));
}

#[tokio::test]
async fn test_best_effort_dns_cleanup_does_not_block_deprovision() {
    let harness = Harness::new().await;
    harness
        .provision("sticky-dns", ResourceKind::Routing, &["sticky.example.com"])
        .await;
    harness.run_until_idle().await;

    harness.dns.failures().fail_always("delete_record");
    let operation_id = harness.start("sticky-dns", Action::Deprovision).await;
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    // the records outlive the instance, nothing else does
    assert!(
        harness
            .dns
            .record(&format!("sticky.example.com.{}", ROOT_DOMAIN))
            .await
            .is_some()
    );
    assert!(harness.certificates.certificate_names().await.is_empty());
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_rescheduled_then_succeeds() {
    let harness = Harness::new().await;
    harness.acme.failures().fail_next("finalize_order", 2);
    let operation_id = harness
        .provision("flaky-ca", ResourceKind::Routing, &["flaky.example.com"])
        .await;

    harness.run_until_idle().await;
    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::InProgress
    );
    let pending = harness.queue.pending_tasks().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].step, StepId::RetrieveCertificate);
    assert_eq!(pending[0].attempt, 2);

    // retries are delayed, not visible right away
    assert_eq!(harness.run_until_idle().await, 0);

    harness.queue.release_scheduled().await;
    harness.run_until_idle().await;
    assert_eq!(harness.queue.pending_tasks().await[0].attempt, 3);

    harness.queue.release_scheduled().await;
    harness.run_until_idle().await;
    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert_eq!(harness.acme.certificates_issued().await, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_operation() {
    let harness = Harness::with_retry(RetryPolicy {
        retry_delay: std::time::Duration::from_secs(600),
        max_attempts: 3,
    })
    .await;
    harness.acme.failures().fail_always("new_order");
    let operation_id = harness
        .provision("broken-ca", ResourceKind::Routing, &["broken.example.com"])
        .await;

    harness.run_with_retries(10).await;

    let operation = harness.operation(operation_id).await;
    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(
        operation.step_description.as_deref(),
        Some("Initiating Lets Encrypt challenges")
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_default_retry_policy_fails_on_attempt_144() {
    let harness = Harness::new().await;
    assert_eq!(RetryPolicy::default().max_attempts, 144);
    harness.acme.failures().fail_always("new_order");
    let operation_id = harness
        .provision("never-ca", ResourceKind::Routing, &["never.example.com"])
        .await;

    // account and key
    for _ in 0..2 {
        assert!(matches!(
            harness.step_once().await,
            Some(StepOutcome::Advanced { .. })
        ));
    }

    let mut attempt = 1;
    loop {
        match harness.step_once().await {
            Some(StepOutcome::Rescheduled { attempt: next }) => {
                assert_eq!(next, attempt + 1);
                let pending = harness.queue.pending_tasks().await;
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].attempt, next);
                attempt = next;
                harness.queue.release_scheduled().await;
            }
            Some(StepOutcome::Failed) => break,
            other => panic!("unexpected outcome on attempt {attempt}: {other:?}"),
        }
    }

    assert_eq!(attempt, 144);
    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Failed
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_chain_drift_is_fatal() {
    let harness = Harness::new().await;
    let instance = ServiceInstance::routing(
        InstanceId::new("drift-1"),
        vec!["drift.example.com".into()],
    );
    harness.store.save_instance(&instance).await.unwrap();
    let operation = harness
        .store
        .create_operation(NewOperation::new(instance.id.clone(), Action::Provision))
        .await
        .unwrap();

    let task = StepTask::new(operation.id, CorrelationId::new(), StepId::MarkProvisioned, 0);
    assert_eq!(
        harness.executor.execute(task).await.unwrap(),
        StepOutcome::Failed
    );
    assert_eq!(
        harness.operation(operation.id).await.state,
        OperationState::Failed
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_tasks_of_finished_or_missing_operations_are_dropped() {
    let harness = Harness::new().await;
    let operation_id = harness
        .provision("done-1", ResourceKind::Routing, &["done.example.com"])
        .await;
    harness.run_until_idle().await;

    let late = StepTask::new(operation_id, CorrelationId::new(), StepId::CreateAcmeAccount, 0);
    assert_eq!(
        harness.executor.execute(late).await.unwrap(),
        StepOutcome::Dropped
    );

    let orphan = StepTask::new(
        domain_broker_core::OperationId(9999),
        CorrelationId::new(),
        StepId::CreateAcmeAccount,
        0,
    );
    assert_eq!(
        harness.executor.execute(orphan).await.unwrap(),
        StepOutcome::Failed
    );
    assert!(harness.queue.pending_tasks().await.is_empty());
}

#[tokio::test]
async fn test_stalled_provision_recovers_from_the_head() {
    let harness = Harness::new().await;
    let operation_id = harness
        .provision("stalled-1", ResourceKind::Routing, &["stalled.example.com"])
        .await;

    // a worker crashed after the first step and its successor task was lost
    harness.step_once().await;
    let lost = harness.queue.dequeue().await.unwrap().unwrap();
    harness.queue.ack(&lost).await.unwrap();
    harness
        .store
        .backdate_operation(operation_id, Utc::now() - Duration::minutes(121))
        .await;

    let scanner = StalledOperationScanner::new(
        harness.store_port(),
        harness.queue_port(),
        Duration::hours(2),
    );
    assert_eq!(scanner.scan(Utc::now()).await.unwrap(), vec![operation_id]);
    let pending = harness.queue.pending_tasks().await;
    assert_eq!(pending[0].correlation_id.as_str(), CorrelationId::RECOVERED);
    assert_eq!(pending[0].position, 0);

    harness.run_until_idle().await;
    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert_eq!(harness.acme.accounts_created().await, 1);
    assert_eq!(harness.acme.certificates_issued().await, 1);
}

#[tokio::test]
async fn test_duplicate_chains_converge() {
    let harness = Harness::new().await;
    let operation_id = harness
        .provision("twice-1", ResourceKind::Routing, &["twice.example.com"])
        .await;
    harness.step_once().await;

    // a second chain for the same operation, as after a premature recovery
    let duplicate = StepTask::new(
        operation_id,
        CorrelationId::recovered(),
        StepId::CreateAcmeAccount,
        0,
    );
    harness.queue.enqueue(duplicate).await.unwrap();
    harness.run_until_idle().await;

    assert_eq!(
        harness.operation(operation_id).await.state,
        OperationState::Succeeded
    );
    assert_eq!(harness.acme.certificates_issued().await, 1);
    assert_eq!(harness.certificates.certificate_names().await.len(), 1);
    assert!(harness.queue.pending_tasks().await.is_empty());
}
