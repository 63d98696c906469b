//! Error types for wildcert
//!
//! Every issuance cycle failure maps to exactly one variant, and every
//! variant knows which [`IssuanceStep`] it belongs to. The scheduler logs
//! that step alongside the error so operators can tell a DNS problem from
//! a CA rejection without reading the message text.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for wildcert operations
pub type Result<T> = std::result::Result<T, Error>;

/// A problem reported by the ACME server or the transport talking to it
///
/// Mirrors the RFC 8555 problem document (`type`, `detail`, `status`). Transport
/// failures that never reached the server only carry a `message`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolProblem {
    /// Human readable summary
    pub message: String,
    /// Problem type URN, e.g. `urn:ietf:params:acme:error:unauthorized`
    pub problem_type: Option<String>,
    /// Problem detail as sent by the CA
    pub detail: Option<String>,
    /// HTTP status of the response that carried the problem
    pub status: Option<u16>,
}

impl ProtocolProblem {
    /// Create a problem that only carries a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Create a problem from an RFC 8555 problem document
    pub fn from_document(
        problem_type: Option<String>,
        detail: Option<String>,
        status: Option<u16>,
    ) -> Self {
        let message = detail
            .clone()
            .or_else(|| problem_type.clone())
            .unwrap_or_else(|| "ACME server reported an unspecified problem".to_string());

        Self {
            message,
            problem_type,
            detail,
            status,
        }
    }
}

impl fmt::Display for ProtocolProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref problem_type) = self.problem_type {
            write!(f, " ({})", problem_type)?;
        }
        if let Some(status) = self.status {
            write!(f, " [HTTP {}]", status)?;
        }
        Ok(())
    }
}

/// Steps of an issuance cycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceStep {
    Configuration,
    KeyGeneration,
    CsrConstruction,
    DirectoryDiscovery,
    AccountRegistration,
    OrderCreation,
    ChallengePreparation,
    PropagationWait,
    Validation,
    Finalization,
    Download,
    Persistence,
}

impl IssuanceStep {
    /// Stable lowercase name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStep::Configuration => "configuration",
            IssuanceStep::KeyGeneration => "key_generation",
            IssuanceStep::CsrConstruction => "csr_construction",
            IssuanceStep::DirectoryDiscovery => "directory_discovery",
            IssuanceStep::AccountRegistration => "account_registration",
            IssuanceStep::OrderCreation => "order_creation",
            IssuanceStep::ChallengePreparation => "challenge_preparation",
            IssuanceStep::PropagationWait => "propagation_wait",
            IssuanceStep::Validation => "validation",
            IssuanceStep::Finalization => "finalization",
            IssuanceStep::Download => "download",
            IssuanceStep::Persistence => "persistence",
        }
    }
}

impl fmt::Display for IssuanceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for wildcert
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key pair could not be generated
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// CSR could not be built or signed
    #[error("CSR construction failed: {0}")]
    CsrConstruction(String),

    /// The ACME directory could not be fetched or parsed
    #[error("ACME directory unreachable at {url}: {problem}")]
    DirectoryUnreachable {
        /// Directory URL that was queried
        url: String,
        /// What went wrong
        problem: ProtocolProblem,
    },

    /// The CA refused or failed the account registration
    #[error("Account registration failed: {0}")]
    AccountRegistrationFailed(ProtocolProblem),

    /// The order could not be created or has no usable DNS-01 challenge
    #[error("Order creation failed: {0}")]
    OrderCreationFailed(ProtocolProblem),

    /// The TXT record could not be published
    #[error("Publishing challenge record {record_name} failed: {message}")]
    ChallengePublishFailed {
        /// `_acme-challenge.<domain>`
        record_name: String,
        /// Provider error
        message: String,
    },

    /// The TXT record did not become publicly resolvable in time
    #[error("Challenge record {record_name} did not propagate within {}s", .timeout.as_secs())]
    ChallengePropagationTimeout {
        /// `_acme-challenge.<domain>`
        record_name: String,
        /// Wait bound that was exceeded
        timeout: Duration,
    },

    /// The CA marked an authorization invalid, or it never became valid
    #[error("Challenge validation failed for {domain}: {problem}")]
    ChallengeValidationFailed {
        /// Identifier of the failed authorization
        domain: String,
        /// Problem detail from the CA
        problem: ProtocolProblem,
    },

    /// Order finalization was rejected or never completed
    #[error("Order finalization failed: {0}")]
    FinalizationFailed(ProtocolProblem),

    /// The issued certificate could not be downloaded
    #[error("Certificate download failed: {0}")]
    DownloadFailed(ProtocolProblem),

    /// The bundle could not be written or read back
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// DNS provider error outside of publishing (lookups, cleanup)
    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    /// The cycle was cancelled by shutdown before finalization
    #[error("Issuance cancelled during {step}")]
    Cancelled {
        /// Step that observed the shutdown
        step: IssuanceStep,
    },

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a key generation error
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    /// Create a CSR construction error
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::CsrConstruction(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailed(msg.into())
    }

    /// Create a DNS provider error
    pub fn dns_provider(msg: impl Into<String>) -> Self {
        Self::DnsProvider(msg.into())
    }

    /// The issuance step this error belongs to
    pub fn step(&self) -> IssuanceStep {
        match self {
            Error::Config(_) => IssuanceStep::Configuration,
            Error::KeyGeneration(_) => IssuanceStep::KeyGeneration,
            Error::CsrConstruction(_) => IssuanceStep::CsrConstruction,
            Error::DirectoryUnreachable { .. } => IssuanceStep::DirectoryDiscovery,
            Error::AccountRegistrationFailed(_) => IssuanceStep::AccountRegistration,
            Error::OrderCreationFailed(_) => IssuanceStep::OrderCreation,
            Error::ChallengePublishFailed { .. } => IssuanceStep::ChallengePreparation,
            Error::ChallengePropagationTimeout { .. } | Error::DnsProvider(_) => {
                IssuanceStep::PropagationWait
            }
            Error::ChallengeValidationFailed { .. } => IssuanceStep::Validation,
            Error::FinalizationFailed(_) => IssuanceStep::Finalization,
            Error::DownloadFailed(_) => IssuanceStep::Download,
            Error::PersistenceFailed(_) | Error::Io(_) | Error::Json(_) => {
                IssuanceStep::Persistence
            }
            Error::Cancelled { step } => *step,
        }
    }

    /// The CA problem attached to this error, if any
    pub fn problem(&self) -> Option<&ProtocolProblem> {
        match self {
            Error::DirectoryUnreachable { problem, .. }
            | Error::ChallengeValidationFailed { problem, .. } => Some(problem),
            Error::AccountRegistrationFailed(problem)
            | Error::OrderCreationFailed(problem)
            | Error::FinalizationFailed(problem)
            | Error::DownloadFailed(problem) => Some(problem),
            _ => None,
        }
    }

    /// Whether the cycle stopped because of shutdown rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
