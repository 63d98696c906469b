//! ACME issuance orchestrator
//!
//! The AcmeOrchestrator turns an [`IssuanceRequest`] into a
//! [`CertificateBundle`]:
//! - Generates a fresh certificate key and CSR
//! - Drives the ACME order through DNS-01 validation
//! - Publishes and removes challenge records via DnsChallengeProvider
//! - Finalizes the order and downloads the certificate
//!
//! ## Cycle
//!
//! ```text
//! key + CSR ─▶ directory ─▶ account ─▶ order ─▶ publish TXT
//!                                                   │
//!        bundle ◀─ download ◀─ finalize ◀─ poll ◀─ propagate
//!                                 ▲
//!                  shutdown is ignored from here on
//! ```
//!
//! Every step either succeeds or aborts the cycle with its own error
//! variant. TXT records published during the cycle are removed on every
//! path that published them. Nothing is persisted here; the caller decides
//! what to do with the bundle.

mod challenge;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bundle::{BundleMetadata, CertificateBundle};
use crate::clock::{Clock, SystemClock};
use crate::config::{IssuanceRequest, KeyStrength, OrchestratorSettings};
use crate::crypto::{CertificateSigningRequest, CsrBuilder, KeyMaterialGenerator, KeyPair};
use crate::error::{Error, IssuanceStep, ProtocolProblem, Result};
use crate::shutdown::ShutdownSignal;
use crate::traits::{
    AcmeClient, AcmeSession, AuthorizationStatus, DnsChallengeProvider, NewAccountRequest,
    OrderStatus, TxtChallenge,
};

use challenge::{ChallengePlan, plan_challenges};

/// Drives one issuance cycle at a time
///
/// The orchestrator itself holds no per-cycle state, so one instance can be
/// shared across cycles. Running two cycles at once is the caller's
/// responsibility to prevent (see `RenewalScheduler`).
pub struct AcmeOrchestrator {
    /// ACME transport
    acme: Arc<dyn AcmeClient>,

    /// DNS-01 record management
    dns: Arc<dyn DnsChallengeProvider>,

    /// Timestamp source for issued bundles
    clock: Arc<dyn Clock>,

    keys: KeyMaterialGenerator,
    csr: CsrBuilder,
    settings: OrchestratorSettings,
}

impl AcmeOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Parameters
    ///
    /// - `acme`: ACME client implementation
    /// - `dns`: DNS challenge provider implementation
    /// - `settings`: Propagation and polling bounds
    pub fn new(
        acme: Arc<dyn AcmeClient>,
        dns: Arc<dyn DnsChallengeProvider>,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            acme,
            dns,
            clock: Arc::new(SystemClock),
            keys: KeyMaterialGenerator::new(),
            csr: CsrBuilder::new(),
            settings,
        })
    }

    /// Replace the clock used to stamp bundles
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a full issuance cycle
    ///
    /// # Parameters
    ///
    /// - `request`: What to issue
    /// - `shutdown`: Checked between steps up to validation; once the CSR
    ///   is submitted the cycle runs to completion regardless
    ///
    /// # Returns
    ///
    /// - `Ok(CertificateBundle)`: A freshly issued bundle, not yet persisted
    /// - `Err(Error)`: The step-specific failure, or `Error::Cancelled`
    pub async fn issue(
        &self,
        request: &IssuanceRequest,
        shutdown: &ShutdownSignal,
    ) -> Result<CertificateBundle> {
        let started = Instant::now();
        info!(
            domain = %request.primary_domain(),
            staging = request.use_staging_directory(),
            key_size = %request.key_strength(),
            acme = self.acme.client_name(),
            dns = self.dns.provider_name(),
            "Starting issuance cycle"
        );

        let result = self.run_cycle(request, shutdown).await;

        match &result {
            Ok(bundle) => info!(
                domain = %request.primary_domain(),
                issued_at = bundle.issued_at_epoch_ms(),
                expires_at = bundle.expires_at_epoch_ms(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Issuance cycle completed"
            ),
            Err(e) if e.is_cancelled() => warn!(
                domain = %request.primary_domain(),
                step = %e.step(),
                "Issuance cycle cancelled by shutdown"
            ),
            Err(e) => error!(
                domain = %request.primary_domain(),
                step = %e.step(),
                error = %e,
                "Issuance cycle failed"
            ),
        }

        result
    }

    async fn run_cycle(
        &self,
        request: &IssuanceRequest,
        shutdown: &ShutdownSignal,
    ) -> Result<CertificateBundle> {
        let domains = request.domains();

        ensure_running(shutdown, IssuanceStep::KeyGeneration)?;
        let key = self.generate_certificate_key(request.key_strength()).await?;

        ensure_running(shutdown, IssuanceStep::CsrConstruction)?;
        let csr = self.csr.build(&key, &domains)?;
        debug!(domains = ?domains, "Built CSR");

        ensure_running(shutdown, IssuanceStep::DirectoryDiscovery)?;
        let directory_url = request.directory_url();
        let mut session = self
            .acme
            .open(directory_url)
            .await
            .map_err(|problem| Error::DirectoryUnreachable {
                url: directory_url.to_string(),
                problem,
            })?;

        ensure_running(shutdown, IssuanceStep::AccountRegistration)?;
        let account = session
            .register_account(&NewAccountRequest {
                contact: vec![request.contact_uri()],
                terms_of_service_agreed: true,
            })
            .await
            .map_err(Error::AccountRegistrationFailed)?;
        info!(account = %account.account_url, "Registered ACME account");

        ensure_running(shutdown, IssuanceStep::OrderCreation)?;
        let authorizations = session
            .create_order(&domains)
            .await
            .map_err(Error::OrderCreationFailed)?;
        let plans = plan_challenges(&authorizations)?;
        debug!(
            authorizations = authorizations.len(),
            challenges = plans.len(),
            "Order created"
        );

        let mut published = Vec::with_capacity(plans.len());
        let validated = self
            .validate(session.as_mut(), &plans, &mut published, shutdown)
            .await;
        self.remove_records(&published).await;
        validated?;

        // Past this point the CA is issuing; shutdown no longer interrupts
        self.finalize(session.as_mut(), &csr).await?;

        let issued = session
            .download_certificate()
            .await
            .map_err(Error::DownloadFailed)?;

        let metadata = BundleMetadata::issued_at(
            self.clock.now_ms(),
            request.use_staging_directory(),
        );

        Ok(CertificateBundle::new(
            &issued.leaf_pem,
            &issued.chain_pem,
            key.private_key_pem(),
            key.public_key_pem(),
            csr.pem(),
            metadata,
        ))
    }

    /// RSA generation is CPU bound, so it runs on the blocking pool
    async fn generate_certificate_key(&self, strength: KeyStrength) -> Result<KeyPair> {
        let generator = self.keys;
        tokio::task::spawn_blocking(move || generator.generate_rsa(strength))
            .await
            .map_err(|e| Error::key_generation(format!("Key generation task failed: {}", e)))?
    }

    /// Publish, propagate and validate every planned challenge
    ///
    /// Records are appended to `published` as soon as they exist so the
    /// caller can remove them whatever happens next.
    async fn validate(
        &self,
        session: &mut dyn AcmeSession,
        plans: &[ChallengePlan],
        published: &mut Vec<TxtChallenge>,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        for plan in plans {
            ensure_running(shutdown, IssuanceStep::ChallengePreparation)?;

            self.dns.publish(&plan.txt).await.map_err(|e| Error::ChallengePublishFailed {
                record_name: plan.txt.record_name.clone(),
                message: e.to_string(),
            })?;
            published.push(plan.txt.clone());

            info!(
                identifier = %plan.identifier,
                record = %plan.txt.record_name,
                "Published challenge record"
            );
        }

        let timeout = self.settings.propagation_timeout;
        for plan in plans {
            // Bounded here as well; a provider may overrun the timeout it is given
            let bounded =
                tokio::time::timeout(timeout, self.dns.await_propagation(&plan.txt, timeout));
            let propagated = tokio::select! {
                result = bounded => match result {
                    Ok(checked) => checked.map_err(|e| match e {
                        Error::DnsProvider(_) => e,
                        other => Error::dns_provider(other.to_string()),
                    })?,
                    Err(_elapsed) => false,
                },
                _ = shutdown.triggered() => {
                    return Err(Error::Cancelled { step: IssuanceStep::PropagationWait });
                }
            };

            if !propagated {
                return Err(Error::ChallengePropagationTimeout {
                    record_name: plan.txt.record_name.clone(),
                    timeout,
                });
            }
            debug!(record = %plan.txt.record_name, "Challenge record propagated");
        }

        for plan in plans {
            ensure_running(shutdown, IssuanceStep::Validation)?;
            session
                .set_challenge_ready(&plan.challenge_url)
                .await
                .map_err(|problem| Error::ChallengeValidationFailed {
                    domain: plan.identifier.clone(),
                    problem,
                })?;
        }

        for plan in plans {
            self.poll_authorization(session, plan, shutdown).await?;
        }

        Ok(())
    }

    async fn poll_authorization(
        &self,
        session: &mut dyn AcmeSession,
        plan: &ChallengePlan,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        let policy = self.settings.validation_poll;
        let failed = |problem: ProtocolProblem| Error::ChallengeValidationFailed {
            domain: plan.identifier.clone(),
            problem,
        };

        for attempt in 0..policy.max_attempts {
            let state = session
                .authorization_status(&plan.authorization_url)
                .await
                .map_err(failed)?;

            match state.status {
                AuthorizationStatus::Valid => {
                    info!(identifier = %plan.identifier, "Authorization valid");
                    return Ok(());
                }
                AuthorizationStatus::Pending => {
                    debug!(
                        identifier = %plan.identifier,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        "Authorization still pending"
                    );
                }
                other => {
                    let problem = state.problem.unwrap_or_else(|| {
                        ProtocolProblem::new(format!("Authorization became {:?}", other))
                    });
                    return Err(failed(problem));
                }
            }

            if attempt + 1 < policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
                    _ = shutdown.triggered() => {
                        return Err(Error::Cancelled { step: IssuanceStep::Validation });
                    }
                }
            }
        }

        Err(failed(ProtocolProblem::new(format!(
            "Authorization still pending after {} checks",
            policy.max_attempts
        ))))
    }

    async fn finalize(
        &self,
        session: &mut dyn AcmeSession,
        csr: &CertificateSigningRequest,
    ) -> Result<()> {
        info!("Submitting CSR");
        session
            .finalize(csr.der())
            .await
            .map_err(Error::FinalizationFailed)?;

        let policy = self.settings.finalization_poll;
        for attempt in 0..policy.max_attempts {
            let state = session
                .order_status()
                .await
                .map_err(Error::FinalizationFailed)?;

            match state.status {
                OrderStatus::Valid => {
                    info!("Order valid, certificate issued");
                    return Ok(());
                }
                OrderStatus::Invalid => {
                    return Err(Error::FinalizationFailed(state.problem.unwrap_or_else(
                        || ProtocolProblem::new("Order became invalid after finalization"),
                    )));
                }
                status => {
                    debug!(status = ?status, attempt = attempt + 1, "Waiting for issuance");
                }
            }

            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }

        Err(Error::FinalizationFailed(ProtocolProblem::new(format!(
            "Order not valid after {} checks",
            policy.max_attempts
        ))))
    }

    /// Best effort; failures are logged and never change the cycle outcome
    async fn remove_records(&self, published: &[TxtChallenge]) {
        for txt in published {
            match self.dns.remove(txt).await {
                Ok(()) => debug!(record = %txt.record_name, "Removed challenge record"),
                Err(e) => warn!(
                    record = %txt.record_name,
                    error = %e,
                    "Failed to remove challenge record"
                ),
            }
        }
    }
}

impl std::fmt::Debug for AcmeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeOrchestrator")
            .field("acme", &self.acme.client_name())
            .field("dns", &self.dns.provider_name())
            .field("settings", &self.settings)
            .finish()
    }
}

fn ensure_running(shutdown: &ShutdownSignal, step: IssuanceStep) -> Result<()> {
    if shutdown.is_triggered() {
        Err(Error::Cancelled { step })
    } else {
        Ok(())
    }
}
