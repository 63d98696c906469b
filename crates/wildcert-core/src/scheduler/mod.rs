//! Renewal scheduler
//!
//! The RenewalScheduler is responsible for:
//! - Deciding whether the stored bundle needs renewing
//! - Running issuance cycles through the AcmeOrchestrator
//! - Persisting new bundles via CertificateStore
//! - Re-checking on a fixed period until shutdown
//!
//! ## Lifecycle
//!
//! ```text
//! start() ── tick (inline, errors are fatal) ──▶ spawn loop
//!                                                  │
//!            ┌─────────── every check_interval ◀───┤
//!            ▼                                     │
//!          tick (errors logged) ───────────────────┘
//!                                                  │
//!                            shutdown ─────────────▶ Stopped
//! ```
//!
//! At most one cycle runs at a time. A tick that finds a cycle in flight
//! reports [`TickOutcome::CycleInProgress`] and does nothing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bundle::{BundleMetadata, DAY_MS};
use crate::clock::{Clock, SystemClock};
use crate::config::{IssuanceRequest, RenewalConfig};
use crate::error::{Error, IssuanceStep, Result};
use crate::orchestrator::AcmeOrchestrator;
use crate::shutdown::{ShutdownSignal, ShutdownTrigger};
use crate::traits::CertificateStore;

/// Why a tick did or did not renew
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalReason {
    /// The store holds no bundle
    NoCertificateFound,

    /// The bundle is inside the renewal threshold (or already expired)
    ExpiringSoon,

    /// The bundle has more than the threshold left
    StillValid,
}

/// Result of [`evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalDecision {
    pub should_renew: bool,
    pub reason: RenewalReason,

    /// Milliseconds of validity left, `None` without a bundle
    pub remaining_ms: Option<i64>,
}

impl RenewalDecision {
    /// Whole days of validity left, rounded down
    pub fn remaining_days(&self) -> Option<i64> {
        self.remaining_ms.map(|ms| ms.div_euclid(DAY_MS))
    }
}

/// Decide whether a bundle needs renewing
///
/// Renews when no bundle exists, or when `threshold_days` or fewer remain.
/// The boundary itself renews.
pub fn evaluate(
    now_ms: i64,
    metadata: Option<&BundleMetadata>,
    threshold_days: u32,
) -> RenewalDecision {
    let Some(metadata) = metadata else {
        return RenewalDecision {
            should_renew: true,
            reason: RenewalReason::NoCertificateFound,
            remaining_ms: None,
        };
    };

    let remaining = metadata.remaining_ms(now_ms);
    let threshold = i64::from(threshold_days) * DAY_MS;

    if remaining <= threshold {
        RenewalDecision {
            should_renew: true,
            reason: RenewalReason::ExpiringSoon,
            remaining_ms: Some(remaining),
        }
    } else {
        RenewalDecision {
            should_renew: false,
            reason: RenewalReason::StillValid,
            remaining_ms: Some(remaining),
        }
    }
}

/// Events emitted by the RenewalScheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Scheduler started
    Started {
        domain: String,
        check_interval: Duration,
    },

    /// A tick evaluated the stored bundle
    Checked { decision: RenewalDecision },

    /// An issuance cycle is starting
    RenewalStarted { reason: RenewalReason },

    /// A new bundle was issued and persisted
    RenewalSucceeded { metadata: BundleMetadata },

    /// The cycle or its persistence failed
    RenewalFailed { step: IssuanceStep, error: String },

    /// A tick found another cycle in flight
    CycleInProgress,

    /// Scheduler stopped
    Stopped { reason: String },
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new bundle was issued and stored
    Renewed(BundleMetadata),

    /// Nothing to do
    Skipped(RenewalDecision),

    /// Another cycle holds the guard
    CycleInProgress,
}

/// Periodic renewal driver
///
/// Cheap to clone; clones share the cycle guard, so a manual
/// [`run_once`](Self::run_once) and the background loop never overlap.
#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    orchestrator: AcmeOrchestrator,
    store: Arc<dyn CertificateStore>,
    request: IssuanceRequest,
    config: RenewalConfig,
    clock: Arc<dyn Clock>,

    /// Held for the duration of a tick that issues
    cycle: Mutex<()>,

    event_tx: mpsc::Sender<SchedulerEvent>,
}

impl RenewalScheduler {
    /// Create a new scheduler
    ///
    /// # Parameters
    ///
    /// - `orchestrator`: Runs the issuance cycles
    /// - `store`: Holds the latest bundle
    /// - `request`: What to issue
    /// - `config`: Threshold and check period
    ///
    /// # Returns
    ///
    /// A tuple of (scheduler, event_receiver)
    pub fn new(
        orchestrator: AcmeOrchestrator,
        store: Arc<dyn CertificateStore>,
        request: IssuanceRequest,
        config: RenewalConfig,
    ) -> Result<(Self, mpsc::Receiver<SchedulerEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let scheduler = Self {
            inner: Arc::new(SchedulerInner {
                orchestrator,
                store,
                request,
                config,
                clock: Arc::new(SystemClock),
                cycle: Mutex::new(()),
                event_tx: tx,
            }),
        };

        Ok((scheduler, rx))
    }

    /// Replace the clock used for renewal decisions
    ///
    /// Only affects the scheduler; the orchestrator keeps its own clock.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.clock = clock;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                warn!("Scheduler already shared, clock not replaced");
                Self { inner }
            }
        }
    }

    pub fn request(&self) -> &IssuanceRequest {
        &self.inner.request
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.inner.config
    }

    /// Evaluate the stored bundle and renew it if needed
    ///
    /// # Returns
    ///
    /// - `Ok(TickOutcome)`: What the tick did
    /// - `Err(Error)`: The cycle failed, was cancelled, or the bundle could
    ///   not be persisted; the previous bundle is untouched
    pub async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<TickOutcome> {
        self.inner.run_once(shutdown).await
    }

    /// Run the startup tick, then keep checking in the background
    ///
    /// The startup tick runs before this returns. If it fails, nothing is
    /// spawned and its error is returned. Later ticks only log failures.
    ///
    /// # Parameters
    ///
    /// - `shutdown`: Firing it stops the loop and cancels an unfinalized
    ///   cycle; the returned handle fires it on [`SchedulerHandle::stop`]
    pub async fn start(&self, shutdown: ShutdownTrigger) -> Result<SchedulerHandle> {
        let signal = shutdown.subscribe();
        let period = self.inner.config.check_interval;

        self.inner.emit_event(SchedulerEvent::Started {
            domain: self.inner.request.primary_domain().to_string(),
            check_interval: period,
        });
        info!(
            domain = %self.inner.request.primary_domain(),
            threshold_days = self.inner.config.threshold_days,
            check_interval_secs = period.as_secs(),
            "Renewal scheduler starting"
        );

        if let Err(e) = self.inner.run_once(&signal).await {
            let reason = if e.is_cancelled() {
                "Shutdown during startup check"
            } else {
                "Startup check failed"
            };
            self.inner.emit_event(SchedulerEvent::Stopped {
                reason: reason.to_string(),
            });
            return Err(e);
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.run_loop(signal, period).await;
        });

        Ok(SchedulerHandle {
            shutdown,
            task,
        })
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("domain", &self.inner.request.primary_domain())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SchedulerInner {
    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<TickOutcome> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Renewal cycle already in progress, skipping tick");
            self.emit_event(SchedulerEvent::CycleInProgress);
            return Ok(TickOutcome::CycleInProgress);
        };

        let metadata = match self.store.read_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.emit_failure(&e);
                return Err(e);
            }
        };

        let decision = evaluate(
            self.clock.now_ms(),
            metadata.as_ref(),
            self.config.threshold_days,
        );
        self.emit_event(SchedulerEvent::Checked { decision });

        if !decision.should_renew {
            info!(
                remaining_days = decision.remaining_days().unwrap_or_default(),
                "Certificate still valid, no renewal needed"
            );
            return Ok(TickOutcome::Skipped(decision));
        }

        match decision.reason {
            RenewalReason::NoCertificateFound => info!("No certificate found, issuing"),
            _ => info!(
                remaining_days = decision.remaining_days().unwrap_or_default(),
                threshold_days = self.config.threshold_days,
                "Certificate expiring soon, renewing"
            ),
        }
        self.emit_event(SchedulerEvent::RenewalStarted {
            reason: decision.reason,
        });

        let bundle = match self.orchestrator.issue(&self.request, shutdown).await {
            Ok(bundle) => bundle,
            Err(e) => {
                self.emit_failure(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.store.write_bundle(&bundle).await {
            let e = match e {
                Error::PersistenceFailed(_) => e,
                other => Error::persistence(other.to_string()),
            };
            error!(error = %e, "Failed to persist issued bundle");
            self.emit_failure(&e);
            return Err(e);
        }

        info!(
            expires_at = bundle.expires_at_epoch_ms(),
            staging = bundle.is_staging_issued(),
            "Certificate bundle stored"
        );
        self.emit_event(SchedulerEvent::RenewalSucceeded {
            metadata: bundle.metadata,
        });

        Ok(TickOutcome::Renewed(bundle.metadata))
    }

    async fn run_loop(&self, shutdown: ShutdownSignal, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    break "Shutdown signal";
                }

                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(outcome) => debug!(outcome = ?outcome, "Periodic check finished"),
                        Err(e) if e.is_cancelled() => break "Shutdown signal",
                        Err(e) => {
                            // Keep running; the next tick retries
                            error!(step = %e.step(), error = %e, "Periodic renewal failed");
                        }
                    }
                }
            }
        };

        info!(reason, "Renewal scheduler stopped");
        self.emit_event(SchedulerEvent::Stopped {
            reason: reason.to_string(),
        });
    }

    fn emit_failure(&self, error: &Error) {
        self.emit_event(SchedulerEvent::RenewalFailed {
            step: error.step(),
            error: error.to_string(),
        });
    }

    fn emit_event(&self, event: SchedulerEvent) {
        // Dropped rather than blocking a cycle on a slow consumer
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping scheduler event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Handle to the background renewal loop
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Fire shutdown and wait for the loop to exit
    ///
    /// A cycle past finalization completes (and is persisted) first.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for the loop to exit without firing shutdown
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Renewal loop task failed");
        }
    }
}
