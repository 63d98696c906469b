// # Memory Certificate Store
//
// In-memory implementation of CertificateStore.
//
// ## Crash Behavior
//
// - The bundle is lost on restart
// - The first tick after a restart finds no certificate and issues one
//
// ## When to Use
//
// - Tests
// - Embedding wildcert where the caller persists bundles itself

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bundle::{BundleMetadata, CertificateBundle};
use crate::error::Result;
use crate::traits::certificate_store::CertificateStore;

/// In-memory certificate store
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCertificateStore {
    inner: Arc<RwLock<Option<CertificateBundle>>>,
}

impl MemoryCertificateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `bundle`
    pub fn with_bundle(bundle: CertificateBundle) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(bundle))),
        }
    }

    /// Drop the stored bundle
    pub async fn clear(&self) {
        self.inner.write().await.take();
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn write_bundle(&self, bundle: &CertificateBundle) -> Result<()> {
        *self.inner.write().await = Some(bundle.clone());
        Ok(())
    }

    async fn read_metadata(&self) -> Result<Option<BundleMetadata>> {
        Ok(self.inner.read().await.as_ref().map(|bundle| bundle.metadata))
    }

    async fn read_bundle(&self) -> Result<Option<CertificateBundle>> {
        Ok(self.inner.read().await.clone())
    }
}
