// # ACME Client Trait
//
// Defines the interface to the ACME wire protocol.
//
// ## Purpose
//
// The orchestrator owns the order of operations (discover, register, order,
// challenge, finalize, download) and the error taxonomy. Everything that
// talks JWS over HTTPS lives behind this trait so the state machine can be
// exercised against a scripted CA.
//
// ## Sessions
//
// `AcmeClient::open()` performs directory discovery and returns a session.
// A session is single-use: it registers one account, holds one order and is
// dropped when the cycle ends. Nothing is shared between cycles.
//
// ## Failures
//
// Every session method reports failures as a `ProtocolProblem`; the
// orchestrator decides which cycle error it becomes.

use async_trait::async_trait;

use crate::error::ProtocolProblem;

/// Result type for ACME transport calls
pub type ProtocolResult<T> = std::result::Result<T, ProtocolProblem>;

/// Account registration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccountRequest {
    /// Contact URIs, e.g. `mailto:ops@example.com`
    pub contact: Vec<String>,
    /// Agree to the CA's terms of service
    pub terms_of_service_agreed: bool,
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account URL assigned by the CA
    pub account_url: String,
}

/// Authorization states (RFC 8555 §7.1.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    Deactivated,
    Revoked,
}

/// Order states (RFC 8555 §7.1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// The DNS-01 challenge offered by an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dns01Challenge {
    /// Challenge URL to POST to once the record is live
    pub url: String,
    /// Challenge token
    pub token: String,
    /// `token + "." + account_key_thumbprint`
    pub key_authorization: String,
}

/// One authorization of a freshly created order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    /// Authorization URL, used for status polling
    pub url: String,
    /// Identifier this authorization covers (`example.com`, `*.example.com`)
    pub identifier: String,
    /// Current status
    pub status: AuthorizationStatus,
    /// The DNS-01 challenge, if the CA offered one
    pub dns01: Option<Dns01Challenge>,
}

/// Authorization status as seen while polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    pub status: AuthorizationStatus,
    /// Problem attached to the DNS-01 challenge, if any
    pub problem: Option<ProtocolProblem>,
}

/// Order status as seen while polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Problem attached to the order, if any
    pub problem: Option<ProtocolProblem>,
}

/// The downloaded certificate, split into leaf and issuer chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub leaf_pem: String,
    pub chain_pem: String,
}

/// Factory for ACME sessions
///
/// # Trust Level: Untrusted (Transport)
///
/// Implementations perform network I/O only. They must not retry, sleep,
/// persist anything, or touch DNS; the orchestrator owns all of that.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Fetch the directory at `directory_url` and open a session against it
    ///
    /// # Returns
    ///
    /// - `Err(ProtocolProblem)`: The directory is unreachable or malformed
    async fn open(&self, directory_url: &str) -> ProtocolResult<Box<dyn AcmeSession>>;

    /// Client name for logging
    fn client_name(&self) -> &'static str;
}

/// One cycle's conversation with the CA
#[async_trait]
pub trait AcmeSession: Send {
    /// Register a new account
    async fn register_account(&mut self, request: &NewAccountRequest) -> ProtocolResult<AccountInfo>;

    /// Create an order for `identifiers` and fetch its authorizations
    ///
    /// The returned authorizations are in the order the CA listed them.
    async fn create_order(&mut self, identifiers: &[String]) -> ProtocolResult<Vec<PendingAuthorization>>;

    /// Tell the CA the challenge at `challenge_url` can be validated
    async fn set_challenge_ready(&mut self, challenge_url: &str) -> ProtocolResult<()>;

    /// Fetch the current state of an authorization
    async fn authorization_status(&mut self, authorization_url: &str) -> ProtocolResult<AuthorizationState>;

    /// Submit the DER encoded CSR
    async fn finalize(&mut self, csr_der: &[u8]) -> ProtocolResult<()>;

    /// Fetch the current state of the order
    async fn order_status(&mut self) -> ProtocolResult<OrderState>;

    /// Download the issued certificate
    async fn download_certificate(&mut self) -> ProtocolResult<IssuedCertificate>;
}

/// Split a PEM chain into the first certificate and the rest
///
/// Returns `None` if the input holds no complete certificate block.
pub fn split_leaf_and_chain(chain_pem: &str) -> Option<IssuedCertificate> {
    const END_MARKER: &str = "-----END CERTIFICATE-----";

    let end = chain_pem.find(END_MARKER)? + END_MARKER.len();
    let leaf_pem = chain_pem[..end].trim().to_string();
    let chain_pem = chain_pem[end..].trim().to_string();

    if !leaf_pem.starts_with("-----BEGIN CERTIFICATE-----") {
        return None;
    }

    Some(IssuedCertificate { leaf_pem, chain_pem })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_separates_leaf_from_issuers() {
        let chain = "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n\
                     -----BEGIN CERTIFICATE-----\nR11\n-----END CERTIFICATE-----\n";

        let issued = split_leaf_and_chain(chain).unwrap();
        assert_eq!(
            issued.leaf_pem,
            "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----"
        );
        assert_eq!(
            issued.chain_pem,
            "-----BEGIN CERTIFICATE-----\nR11\n-----END CERTIFICATE-----"
        );
    }

    #[test]
    fn split_rejects_garbage() {
        assert!(split_leaf_and_chain("not a certificate").is_none());
        assert!(split_leaf_and_chain("junk -----END CERTIFICATE-----").is_none());
    }
}
