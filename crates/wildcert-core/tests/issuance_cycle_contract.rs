//! Issuance Cycle Contract Tests
//!
//! Verify that one orchestrator cycle:
//! - Orders `<domain>` and `*.<domain>` and builds a matching CSR
//! - Produces a bundle whose recorded validity is exactly 90 days
//! - Fails with the step-specific error and leaves no TXT records behind
//! - Generates fresh key material every time

mod common;

use common::*;
use openssl::pkey::PKey;
use std::time::Duration;
use wildcert_core::bundle::VALIDITY_WINDOW_MS;
use wildcert_core::config::LETSENCRYPT_STAGING;
use wildcert_core::{Error, IssuanceStep, ShutdownSignal};
use x509_parser::prelude::*;

const NOW: i64 = 1_700_000_000_000;

fn sorted_values(records: &[wildcert_core::traits::TxtChallenge]) -> Vec<String> {
    let mut values: Vec<String> = records.iter().map(|r| r.value.clone()).collect();
    values.sort();
    values
}

#[tokio::test]
async fn successful_cycle_records_ninety_day_validity() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let bundle = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(bundle.issued_at_epoch_ms(), NOW);
    assert_eq!(
        bundle.expires_at_epoch_ms() - bundle.issued_at_epoch_ms(),
        7_776_000_000
    );
    assert_eq!(VALIDITY_WINDOW_MS, 7_776_000_000);
    assert!(bundle.is_staging_issued());
    assert_eq!(
        bundle.leaf_and_chain_pem,
        format!("{}\n{}\n", LEAF_PEM, CHAIN_PEM)
    );

    // Key material is real and matches the requested strength
    let key = PKey::private_key_from_pem(bundle.private_key_pem.as_bytes()).unwrap();
    assert_eq!(key.bits(), 1024);
    let public = PKey::public_key_from_pem(bundle.public_key_pem.as_bytes()).unwrap();
    assert!(key.public_eq(&public));
    assert!(bundle.csr_pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
}

#[tokio::test]
async fn order_and_csr_cover_apex_and_wildcard() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(acme.contacts(), vec!["mailto:ops@example.com".to_string()]);
    assert_eq!(
        acme.ordered_identifiers(),
        vec![vec!["example.com".to_string(), "*.example.com".to_string()]]
    );

    let csrs = acme.submitted_csrs();
    assert_eq!(csrs.len(), 1);
    let (_, csr) = X509CertificationRequest::from_der(&csrs[0]).unwrap();

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    assert_eq!(common_name.as_deref(), Some("example.com"));

    let mut san = Vec::new();
    for extension in csr.requested_extensions().into_iter().flatten() {
        if let ParsedExtension::SubjectAlternativeName(names) = extension {
            for name in &names.general_names {
                if let GeneralName::DNSName(dns_name) = name {
                    san.push(dns_name.to_string());
                }
            }
        }
    }
    assert_eq!(san, vec!["example.com", "*.example.com"]);
}

#[tokio::test]
async fn challenge_records_share_name_and_are_removed() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();

    let published = dns.published();
    assert_eq!(published.len(), 2);
    assert!(
        published
            .iter()
            .all(|r| r.record_name == "_acme-challenge.example.com")
    );
    assert_ne!(published[0].value, published[1].value);
    assert_eq!(acme.ready_count(), 2);
    assert_eq!(sorted_values(&dns.removed()), sorted_values(&published));
}

#[tokio::test]
async fn propagation_timeout_aborts_before_validation() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    dns.set_never_propagates(true);
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    match &err {
        Error::ChallengePropagationTimeout { record_name, timeout } => {
            assert_eq!(record_name, "_acme-challenge.example.com");
            assert_eq!(*timeout, fast_settings().propagation_timeout);
        }
        other => panic!("expected propagation timeout, got {:?}", other),
    }
    assert_eq!(err.step(), IssuanceStep::PropagationWait);

    assert_eq!(acme.ready_count(), 0, "CA must not be asked to validate");
    assert_eq!(acme.finalize_count(), 0);
    assert_eq!(sorted_values(&dns.removed()), sorted_values(&dns.published()));
    assert_eq!(dns.removed().len(), 2);
}

#[tokio::test]
async fn provider_overrunning_its_timeout_is_cut_off() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    dns.set_overruns_timeout(true);
    let clock = ManualClock::new(NOW);

    let orch = orchestrator(&acme, &dns, &clock);
    let req = request();
    let shutdown = ShutdownSignal::never();
    let issue = orch.issue(&req, &shutdown);
    let err = tokio::time::timeout(Duration::from_secs(5), issue)
        .await
        .expect("propagation wait must end at the configured timeout")
        .unwrap_err();

    match &err {
        Error::ChallengePropagationTimeout { timeout, .. } => {
            assert_eq!(*timeout, fast_settings().propagation_timeout);
        }
        other => panic!("expected propagation timeout, got {:?}", other),
    }
    assert_eq!(acme.ready_count(), 0);
    assert_eq!(dns.removed().len(), 2);
}

#[tokio::test]
async fn ca_rejection_carries_problem_and_cleans_up() {
    let acme = ScriptedAcmeClient::new();
    acme.set_reject_validation(true);
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    match &err {
        Error::ChallengeValidationFailed { domain, problem } => {
            assert_eq!(domain, "example.com");
            assert_eq!(
                problem.problem_type.as_deref(),
                Some("urn:ietf:params:acme:error:unauthorized")
            );
            assert!(problem.detail.as_deref().unwrap_or_default().contains("Incorrect TXT"));
            assert_eq!(problem.status, Some(403));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(err.to_string().contains("Incorrect TXT record"));

    assert_eq!(acme.finalize_count(), 0);
    assert_eq!(acme.download_count(), 0);
    assert_eq!(dns.removed().len(), 2);
}

#[tokio::test]
async fn pending_authorizations_are_polled_until_valid() {
    let acme = ScriptedAcmeClient::new();
    acme.set_pending_polls(3);
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let bundle = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(bundle.issued_at_epoch_ms(), NOW);
    assert_eq!(acme.finalize_count(), 1);
}

#[tokio::test]
async fn authorization_stuck_pending_fails_validation() {
    let acme = ScriptedAcmeClient::new();
    acme.set_pending_polls(1_000);
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChallengeValidationFailed { .. }));
    assert!(err.to_string().contains("still pending"));
    assert_eq!(acme.finalize_count(), 0);
    assert_eq!(dns.removed().len(), 2);
}

#[tokio::test]
async fn unreachable_directory_fails_before_any_dns_work() {
    let acme = ScriptedAcmeClient::new();
    acme.set_directory_unreachable(true);
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    match &err {
        Error::DirectoryUnreachable { url, .. } => assert_eq!(url, LETSENCRYPT_STAGING),
        other => panic!("expected directory failure, got {:?}", other),
    }
    assert_eq!(acme.registration_count(), 0);
    assert!(dns.published().is_empty());
    assert!(dns.removed().is_empty());
}

#[tokio::test]
async fn rejected_registration_reports_account_failure() {
    let acme = ScriptedAcmeClient::new();
    acme.set_reject_registration(true);
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AccountRegistrationFailed(_)));
    assert_eq!(
        err.problem().and_then(|p| p.problem_type.as_deref()),
        Some("urn:ietf:params:acme:error:invalidContact")
    );
    assert_eq!(acme.order_count(), 0);
}

#[tokio::test]
async fn publish_failure_removes_only_what_was_published() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    dns.set_fail_publish(true);
    let clock = ManualClock::new(NOW);

    let err = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap_err();

    match &err {
        Error::ChallengePublishFailed { record_name, message } => {
            assert_eq!(record_name, "_acme-challenge.example.com");
            assert!(message.contains("Zone is locked"));
        }
        other => panic!("expected publish failure, got {:?}", other),
    }
    assert!(dns.removed().is_empty());
    assert_eq!(dns.propagation_check_count(), 0);
}

#[tokio::test]
async fn cleanup_failures_do_not_fail_the_cycle() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    dns.set_fail_remove(true);
    let clock = ManualClock::new(NOW);

    let result = orchestrator(&acme, &dns, &clock)
        .issue(&request(), &ShutdownSignal::never())
        .await;

    assert!(result.is_ok());
    assert_eq!(dns.removed().len(), 2, "every record removal is attempted");
}

#[tokio::test]
async fn every_cycle_uses_fresh_keys() {
    let acme = ScriptedAcmeClient::new();
    let dns = MockDnsProvider::new();
    let clock = ManualClock::new(NOW);
    let orchestrator = orchestrator(&acme, &dns, &clock);

    let first = orchestrator
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();
    clock.advance(60_000);
    let second = orchestrator
        .issue(&request(), &ShutdownSignal::never())
        .await
        .unwrap();

    assert_ne!(first.private_key_pem, second.private_key_pem);
    assert_ne!(first.csr_pem, second.csr_pem);
    assert!(second.issued_at_epoch_ms() > first.issued_at_epoch_ms());
    assert_eq!(acme.open_count(), 2);
    assert_eq!(acme.registration_count(), 2, "no account reuse across cycles");
}
