//! Issued certificate bundle and its stored metadata

use serde::{Deserialize, Serialize};

/// One day in milliseconds
pub const DAY_MS: i64 = 86_400_000;

/// Validity window recorded for every issued bundle
pub const VALIDITY_WINDOW_MS: i64 = 90 * DAY_MS;

/// Metadata persisted next to the artifacts
///
/// Serialized as `{"iat": .., "exp": .., "staging": ..}` in `data.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Issuance time, epoch milliseconds
    #[serde(rename = "iat")]
    pub issued_at_epoch_ms: i64,

    /// Recorded expiry, epoch milliseconds
    #[serde(rename = "exp")]
    pub expires_at_epoch_ms: i64,

    /// Issued by the staging directory
    #[serde(rename = "staging")]
    pub is_staging_issued: bool,
}

impl BundleMetadata {
    /// Metadata for a bundle issued at `issued_at_epoch_ms`
    pub fn issued_at(issued_at_epoch_ms: i64, is_staging_issued: bool) -> Self {
        Self {
            issued_at_epoch_ms,
            expires_at_epoch_ms: issued_at_epoch_ms + VALIDITY_WINDOW_MS,
            is_staging_issued,
        }
    }

    /// Milliseconds of validity left at `now_ms` (negative once expired)
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expires_at_epoch_ms - now_ms
    }
}

/// Everything produced by one successful issuance cycle
///
/// Immutable; a later cycle's bundle replaces it wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Leaf followed by the issuer chain
    pub leaf_and_chain_pem: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
    pub csr_pem: String,
    pub metadata: BundleMetadata,
}

impl CertificateBundle {
    /// Assemble a bundle, joining leaf and chain as `leaf\nchain\n`
    pub fn new(
        leaf_pem: &str,
        chain_pem: &str,
        private_key_pem: impl Into<String>,
        public_key_pem: impl Into<String>,
        csr_pem: impl Into<String>,
        metadata: BundleMetadata,
    ) -> Self {
        Self {
            leaf_and_chain_pem: format!("{}\n{}\n", leaf_pem.trim_end(), chain_pem.trim_end()),
            private_key_pem: private_key_pem.into(),
            public_key_pem: public_key_pem.into(),
            csr_pem: csr_pem.into(),
            metadata,
        }
    }

    pub fn issued_at_epoch_ms(&self) -> i64 {
        self.metadata.issued_at_epoch_ms
    }

    pub fn expires_at_epoch_ms(&self) -> i64 {
        self.metadata.expires_at_epoch_ms
    }

    pub fn is_staging_issued(&self) -> bool {
        self.metadata.is_staging_issued
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("leaf_and_chain_pem", &format!("<{} bytes>", self.leaf_and_chain_pem.len()))
            .field("private_key_pem", &"<REDACTED>")
            .field("metadata", &self.metadata)
            .finish()
    }
}
