//! Test doubles and common utilities for contract tests
//!
//! The doubles script a CA and a DNS provider closely enough to drive the
//! orchestrator and scheduler through every branch without any network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use wildcert_core::clock::Clock;
use wildcert_core::config::{
    IssuanceRequest, KeyStrength, OrchestratorSettings, PollPolicy, RenewalConfig,
};
use wildcert_core::crypto::{KeyKind, KeyMaterialGenerator};
use wildcert_core::error::{ProtocolProblem, Result};
use wildcert_core::traits::{
    AccountInfo, AcmeClient, AcmeSession, AuthorizationState, AuthorizationStatus,
    CertificateStore, Dns01Challenge, DnsChallengeProvider, IssuedCertificate,
    NewAccountRequest, OrderState, OrderStatus, PendingAuthorization, ProtocolResult,
    TxtChallenge, dns01_txt_value,
};
use wildcert_core::{AcmeOrchestrator, RenewalScheduler, SchedulerEvent};

pub const DOMAIN: &str = "example.com";
pub const CONTACT: &str = "ops@example.com";

pub const LEAF_PEM: &str =
    "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----";
pub const CHAIN_PEM: &str =
    "-----BEGIN CERTIFICATE-----\nSVNTVUVS\n-----END CERTIFICATE-----";

/// Request for `example.com` with a small key so tests stay fast
pub fn request() -> IssuanceRequest {
    IssuanceRequest::new(DOMAIN, KeyStrength::Bits1024, CONTACT, true).unwrap()
}

/// Same as [`request`], against the production CA
pub fn production_request() -> IssuanceRequest {
    IssuanceRequest::new(DOMAIN, KeyStrength::Bits1024, CONTACT, false).unwrap()
}

/// Settings with millisecond-scale waits
pub fn fast_settings() -> OrchestratorSettings {
    let poll = PollPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };
    OrchestratorSettings {
        propagation_timeout: Duration::from_millis(200),
        validation_poll: poll,
        finalization_poll: poll,
    }
}

pub fn renewal_config(check_interval: Duration) -> RenewalConfig {
    RenewalConfig {
        threshold_days: 30,
        check_interval,
        event_channel_capacity: 64,
    }
}

pub fn orchestrator(
    acme: &ScriptedAcmeClient,
    dns: &MockDnsProvider,
    clock: &ManualClock,
) -> AcmeOrchestrator {
    AcmeOrchestrator::new(Arc::new(acme.clone()), Arc::new(dns.clone()), fast_settings())
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: i64) {
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Pauses a session inside `finalize()` until released
#[derive(Debug, Clone, Default)]
pub struct FinalizeGate {
    /// Notified when `finalize()` is entered
    pub entered: Arc<Notify>,
    /// Notify to let `finalize()` return
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct AcmeScript {
    directory_unreachable: AtomicBool,
    reject_registration: AtomicBool,
    reject_validation: AtomicBool,
    pending_polls: AtomicUsize,
    finalize_gate: Mutex<Option<FinalizeGate>>,

    opens: AtomicUsize,
    registrations: AtomicUsize,
    orders: AtomicUsize,
    ready_calls: AtomicUsize,
    finalizations: AtomicUsize,
    downloads: AtomicUsize,

    directories: Mutex<Vec<String>>,
    contacts: Mutex<Vec<String>>,
    ordered_identifiers: Mutex<Vec<Vec<String>>>,
    submitted_csrs: Mutex<Vec<Vec<u8>>>,
}

/// A scripted CA
///
/// Clones share the script and the counters.
#[derive(Clone, Default)]
pub struct ScriptedAcmeClient {
    script: Arc<AcmeScript>,
}

impl ScriptedAcmeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_directory_unreachable(&self, value: bool) {
        self.script.directory_unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_reject_registration(&self, value: bool) {
        self.script.reject_registration.store(value, Ordering::SeqCst);
    }

    /// Make authorizations turn `invalid` with an `unauthorized` problem
    pub fn set_reject_validation(&self, value: bool) {
        self.script.reject_validation.store(value, Ordering::SeqCst);
    }

    /// Answer `pending` to this many status polls before settling
    pub fn set_pending_polls(&self, polls: usize) {
        self.script.pending_polls.store(polls, Ordering::SeqCst);
    }

    pub fn gate_finalize(&self) -> FinalizeGate {
        let gate = FinalizeGate::default();
        *self.script.finalize_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn open_count(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.script.registrations.load(Ordering::SeqCst)
    }

    pub fn order_count(&self) -> usize {
        self.script.orders.load(Ordering::SeqCst)
    }

    pub fn ready_count(&self) -> usize {
        self.script.ready_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_count(&self) -> usize {
        self.script.finalizations.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.script.downloads.load(Ordering::SeqCst)
    }

    pub fn directories(&self) -> Vec<String> {
        self.script.directories.lock().unwrap().clone()
    }

    pub fn contacts(&self) -> Vec<String> {
        self.script.contacts.lock().unwrap().clone()
    }

    pub fn ordered_identifiers(&self) -> Vec<Vec<String>> {
        self.script.ordered_identifiers.lock().unwrap().clone()
    }

    pub fn submitted_csrs(&self) -> Vec<Vec<u8>> {
        self.script.submitted_csrs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AcmeClient for ScriptedAcmeClient {
    async fn open(&self, directory_url: &str) -> ProtocolResult<Box<dyn AcmeSession>> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        self.script
            .directories
            .lock()
            .unwrap()
            .push(directory_url.to_string());

        if self.script.directory_unreachable.load(Ordering::SeqCst) {
            return Err(ProtocolProblem::new(format!(
                "Connection refused: {}",
                directory_url
            )));
        }

        // A real account key per session, like a CA that sees a new account every cycle
        let account_key = KeyMaterialGenerator::new()
            .generate(KeyKind::Ec, None)
            .map_err(|e| ProtocolProblem::new(e.to_string()))?;
        let session_id = self.script.opens.load(Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
            thumbprint: dns01_txt_value(account_key.public_key_pem()),
            session_id,
        }))
    }

    fn client_name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    script: Arc<AcmeScript>,
    thumbprint: String,
    session_id: usize,
}

#[async_trait]
impl AcmeSession for ScriptedSession {
    async fn register_account(&mut self, request: &NewAccountRequest) -> ProtocolResult<AccountInfo> {
        self.script.registrations.fetch_add(1, Ordering::SeqCst);
        self.script
            .contacts
            .lock()
            .unwrap()
            .extend(request.contact.iter().cloned());

        if self.script.reject_registration.load(Ordering::SeqCst) {
            return Err(ProtocolProblem::from_document(
                Some("urn:ietf:params:acme:error:invalidContact".to_string()),
                Some("Contact email has invalid domain".to_string()),
                Some(400),
            ));
        }

        Ok(AccountInfo {
            account_url: format!("https://ca.test/acct/{}", self.session_id),
        })
    }

    async fn create_order(&mut self, identifiers: &[String]) -> ProtocolResult<Vec<PendingAuthorization>> {
        self.script.orders.fetch_add(1, Ordering::SeqCst);
        self.script
            .ordered_identifiers
            .lock()
            .unwrap()
            .push(identifiers.to_vec());

        Ok(identifiers
            .iter()
            .enumerate()
            .map(|(i, identifier)| {
                let token = format!("tok-{}-{}", self.session_id, i);
                PendingAuthorization {
                    url: format!("https://ca.test/authz/{}/{}", self.session_id, i),
                    identifier: identifier.clone(),
                    status: AuthorizationStatus::Pending,
                    dns01: Some(Dns01Challenge {
                        url: format!("https://ca.test/chall/{}/{}", self.session_id, i),
                        key_authorization: format!("{}.{}", token, self.thumbprint),
                        token,
                    }),
                }
            })
            .collect())
    }

    async fn set_challenge_ready(&mut self, _challenge_url: &str) -> ProtocolResult<()> {
        self.script.ready_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn authorization_status(&mut self, _authorization_url: &str) -> ProtocolResult<AuthorizationState> {
        let pending = self
            .script
            .pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending {
            return Ok(AuthorizationState {
                status: AuthorizationStatus::Pending,
                problem: None,
            });
        }

        if self.script.reject_validation.load(Ordering::SeqCst) {
            return Ok(AuthorizationState {
                status: AuthorizationStatus::Invalid,
                problem: Some(ProtocolProblem::from_document(
                    Some("urn:ietf:params:acme:error:unauthorized".to_string()),
                    Some("Incorrect TXT record found at _acme-challenge.example.com".to_string()),
                    Some(403),
                )),
            });
        }

        Ok(AuthorizationState {
            status: AuthorizationStatus::Valid,
            problem: None,
        })
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> ProtocolResult<()> {
        self.script.finalizations.fetch_add(1, Ordering::SeqCst);
        self.script.submitted_csrs.lock().unwrap().push(csr_der.to_vec());

        let gate = self.script.finalize_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        Ok(())
    }

    async fn order_status(&mut self) -> ProtocolResult<OrderState> {
        Ok(OrderState {
            status: OrderStatus::Valid,
            problem: None,
        })
    }

    async fn download_certificate(&mut self) -> ProtocolResult<IssuedCertificate> {
        self.script.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(IssuedCertificate {
            leaf_pem: LEAF_PEM.to_string(),
            chain_pem: CHAIN_PEM.to_string(),
        })
    }
}

#[derive(Default)]
struct DnsScript {
    never_propagates: AtomicBool,
    overruns_timeout: AtomicBool,
    fail_publish: AtomicBool,
    fail_remove: AtomicBool,
    propagation_entered: Arc<Notify>,

    published: Mutex<Vec<TxtChallenge>>,
    removed: Mutex<Vec<TxtChallenge>>,
    propagation_checks: AtomicUsize,
}

/// A DNS provider that records what it was asked to do
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MockDnsProvider {
    script: Arc<DnsScript>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagation waits out the full timeout and reports `false`
    pub fn set_never_propagates(&self, value: bool) {
        self.script.never_propagates.store(value, Ordering::SeqCst);
    }

    /// Propagation ignores its timeout and only reports success a minute later
    pub fn set_overruns_timeout(&self, value: bool) {
        self.script.overruns_timeout.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, value: bool) {
        self.script.fail_publish.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, value: bool) {
        self.script.fail_remove.store(value, Ordering::SeqCst);
    }

    /// Notified every time a propagation wait begins
    pub fn propagation_entered(&self) -> Arc<Notify> {
        Arc::clone(&self.script.propagation_entered)
    }

    pub fn published(&self) -> Vec<TxtChallenge> {
        self.script.published.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<TxtChallenge> {
        self.script.removed.lock().unwrap().clone()
    }

    pub fn propagation_check_count(&self) -> usize {
        self.script.propagation_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsChallengeProvider for MockDnsProvider {
    async fn publish(&self, challenge: &TxtChallenge) -> Result<()> {
        if self.script.fail_publish.load(Ordering::SeqCst) {
            return Err(wildcert_core::Error::dns_provider("Zone is locked"));
        }
        self.script.published.lock().unwrap().push(challenge.clone());
        Ok(())
    }

    async fn await_propagation(&self, _challenge: &TxtChallenge, timeout: Duration) -> Result<bool> {
        self.script.propagation_checks.fetch_add(1, Ordering::SeqCst);
        self.script.propagation_entered.notify_one();

        if self.script.never_propagates.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }
        if self.script.overruns_timeout.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(true)
    }

    async fn remove(&self, challenge: &TxtChallenge) -> Result<()> {
        self.script.removed.lock().unwrap().push(challenge.clone());
        if self.script.fail_remove.load(Ordering::SeqCst) {
            return Err(wildcert_core::Error::dns_provider("Record delete refused"));
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Build a scheduler over the doubles, sharing one clock
pub fn build_scheduler(
    acme: &ScriptedAcmeClient,
    dns: &MockDnsProvider,
    clock: &ManualClock,
    store: Arc<dyn CertificateStore>,
    check_interval: Duration,
) -> (RenewalScheduler, mpsc::Receiver<SchedulerEvent>) {
    build_scheduler_for(request(), acme, dns, clock, store, check_interval)
}

pub fn build_scheduler_for(
    request: IssuanceRequest,
    acme: &ScriptedAcmeClient,
    dns: &MockDnsProvider,
    clock: &ManualClock,
    store: Arc<dyn CertificateStore>,
    check_interval: Duration,
) -> (RenewalScheduler, mpsc::Receiver<SchedulerEvent>) {
    let (scheduler, events) = RenewalScheduler::new(
        orchestrator(acme, dns, clock),
        store,
        request,
        renewal_config(check_interval),
    )
    .unwrap();
    (scheduler.with_clock(Arc::new(clock.clone())), events)
}

/// Receive events until one matches, failing the test after 10s
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<SchedulerEvent>,
    matches: impl Fn(&SchedulerEvent) -> bool,
) -> SchedulerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected scheduler event was not emitted")
}

/// Drain whatever is already queued
pub fn drain_events(events: &mut mpsc::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
