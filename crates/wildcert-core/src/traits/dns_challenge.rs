// # DNS Challenge Provider Trait
//
// Defines the interface for publishing DNS-01 challenge records.
//
// ## Purpose
//
// A provider owns three things for a challenge: creating the TXT record,
// confirming public resolvers can see it, and deleting it afterwards.
// Which API it talks to and which resolvers it asks is its own business.
//
// ## Implementations
//
// - Cloudflare: `wildcert-dns-cloudflare`

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::domain::challenge_record_name;

/// A TXT record to publish for one authorization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxtChallenge {
    /// Identifier being validated (`example.com` or `*.example.com`)
    pub identifier: String,
    /// Challenge token, unique per authorization
    pub token: String,
    /// `_acme-challenge.<base domain>`
    pub record_name: String,
    /// Record content
    pub value: String,
}

impl TxtChallenge {
    /// Derive the record for an identifier from its key authorization
    pub fn new(identifier: &str, token: &str, key_authorization: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            token: token.to_string(),
            record_name: challenge_record_name(identifier),
            value: dns01_txt_value(key_authorization),
        }
    }
}

/// DNS-01 record value: base64url(SHA-256(key authorization)), unpadded
pub fn dns01_txt_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Trait for DNS-01 challenge providers
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Untrusted (DNS Provider)
///
/// ## Allowed Capabilities
/// - Perform HTTP/HTTPS API calls to the provider's endpoints
/// - Query public resolvers while waiting for propagation
/// - Remember record ids between `publish()` and `remove()`
///
/// ## Forbidden Capabilities
/// - Retry publish/remove on its own (the cycle fails instead)
/// - Talk to the ACME server
/// - Touch the certificate store
#[async_trait]
pub trait DnsChallengeProvider: Send + Sync {
    /// Create the TXT record
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Record created
    /// - `Err(Error)`: Provider rejected the record or was unreachable
    async fn publish(&self, challenge: &TxtChallenge) -> crate::Result<()>;

    /// Wait until the record is publicly resolvable
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Record observed with the expected value
    /// - `Ok(false)`: `timeout` elapsed first
    /// - `Err(Error)`: The check itself could not run
    async fn await_propagation(&self, challenge: &TxtChallenge, timeout: Duration)
    -> crate::Result<bool>;

    /// Delete the TXT record
    ///
    /// Removing a record that is already gone is not an error.
    async fn remove(&self, challenge: &TxtChallenge) -> crate::Result<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
