// # wildcert-core
//
// Core library for ACME DNS-01 wildcard certificate issuance and renewal.
//
// ## Architecture Overview
//
// - **AcmeClient**: Trait for the ACME wire protocol (directory, account,
//   order, challenge, finalize, download)
// - **DnsChallengeProvider**: Trait for publishing and removing DNS-01 TXT
//   records and waiting for them to propagate
// - **CertificateStore**: Trait for persisting the latest bundle
// - **AcmeOrchestrator**: Runs one issuance cycle for `<domain>` and
//   `*.<domain>`
// - **RenewalScheduler**: Decides when to renew and keeps the store fresh
//
// ## Design Principles
//
// 1. **Library-First**: The daemon is a thin shell over this crate
// 2. **Fresh Keys**: Every cycle generates a new certificate key
// 3. **Atomic Replacement**: A bundle is stored whole or not at all
// 4. **Clean Up**: Challenge records never outlive their cycle

pub mod bundle;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use bundle::{BundleMetadata, CertificateBundle};
pub use clock::{Clock, SystemClock};
pub use config::{IssuanceRequest, KeyStrength, OrchestratorSettings, PollPolicy, RenewalConfig};
pub use error::{Error, IssuanceStep, ProtocolProblem, Result};
pub use orchestrator::AcmeOrchestrator;
pub use scheduler::{
    RenewalDecision, RenewalReason, RenewalScheduler, SchedulerEvent, SchedulerHandle,
    TickOutcome, evaluate,
};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use store::{FileCertificateStore, MemoryCertificateStore};
pub use traits::{AcmeClient, AcmeSession, CertificateStore, DnsChallengeProvider};
