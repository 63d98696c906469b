// # Certificate Store Trait
//
// Defines the interface for persisting issued bundles.
//
// ## Purpose
//
// The store holds exactly one bundle: the latest. The scheduler reads its
// metadata on every tick to decide whether to renew, and writes a new
// bundle after a successful cycle. History is not retained.
//
// ## Atomicity
//
// `write_bundle()` replaces all artifacts at once. A reader must never see
// a certificate from one cycle next to a key from another.
//
// ## Implementations
//
// - File-based: `FileCertificateStore` (PEM files + `data.json`)
// - In-memory: `MemoryCertificateStore`

use async_trait::async_trait;

use crate::bundle::{BundleMetadata, CertificateBundle};

/// Trait for certificate store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - Perform I/O for persistent storage
/// - Implement locking for atomic replacement
///
/// ## Forbidden Capabilities
/// - Decide when to renew (owned by `RenewalScheduler`)
/// - Talk to the CA or the DNS provider
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Atomically replace the stored bundle
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All artifacts and metadata committed
    /// - `Err(Error)`: Nothing was committed
    async fn write_bundle(&self, bundle: &CertificateBundle) -> crate::Result<()>;

    /// Read the stored bundle's metadata
    ///
    /// # Returns
    ///
    /// - `Ok(Some(BundleMetadata))`: A bundle is stored
    /// - `Ok(None)`: Nothing stored yet
    /// - `Err(Error)`: Storage error
    async fn read_metadata(&self) -> crate::Result<Option<BundleMetadata>>;

    /// Read the full stored bundle
    async fn read_bundle(&self) -> crate::Result<Option<CertificateBundle>>;

    /// Whether a bundle is stored
    async fn exists(&self) -> crate::Result<bool> {
        Ok(self.read_metadata().await?.is_some())
    }
}
