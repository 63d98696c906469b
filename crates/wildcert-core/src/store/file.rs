// # File Certificate Store
//
// File-based implementation of CertificateStore with crash recovery.
//
// ## Layout
//
// ```text
// pems/
// ├── certificate.pem   leaf + chain
// ├── privateKey.pem    PKCS#8
// ├── publicKey.pem     SubjectPublicKeyInfo
// ├── csr.pem           PKCS#10
// └── data.json         {"iat": .., "exp": .., "staging": ..}
// ```
//
// ## Crash Recovery
//
// - Staged writes: a new bundle is written to `.pending/` first
// - Commit marker: `.pending/COMMIT` is written once every artifact is staged
// - Backup: each live artifact is copied to `.previous/` before it is replaced
// - Rollback: if any rename fails, the replaced artifacts are restored from
//   `.previous/` and artifacts with no predecessor are removed
// - Roll forward: on open, a committed `.pending/` is moved into place
// - Discard: on open, an uncommitted `.pending/` and a stale `.previous/`
//   are deleted
// - Fallback: if `data.json` is missing or corrupted, the expiry is read
//   from the certificate's notAfter

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::bundle::{BundleMetadata, CertificateBundle};
use crate::error::{Error, Result};
use crate::traits::certificate_store::CertificateStore;

pub const CERTIFICATE_FILE: &str = "certificate.pem";
pub const PRIVATE_KEY_FILE: &str = "privateKey.pem";
pub const PUBLIC_KEY_FILE: &str = "publicKey.pem";
pub const CSR_FILE: &str = "csr.pem";
pub const METADATA_FILE: &str = "data.json";

const PENDING_DIR: &str = ".pending";
const COMMIT_MARKER: &str = "COMMIT";
const PREVIOUS_DIR: &str = ".previous";

/// Commit order; metadata goes last
const ARTIFACTS: [&str; 5] = [
    CERTIFICATE_FILE,
    PRIVATE_KEY_FILE,
    PUBLIC_KEY_FILE,
    CSR_FILE,
    METADATA_FILE,
];

/// File-based certificate store
///
/// # Example
///
/// ```rust,no_run
/// use wildcert_core::store::FileCertificateStore;
/// use wildcert_core::traits::CertificateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCertificateStore::new("./pems").await?;
///
///     if let Some(metadata) = store.read_metadata().await? {
///         println!("expires at {}", metadata.expires_at_epoch_ms);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCertificateStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileCertificateStore {
    /// Open (or create) a store rooted at `dir`
    ///
    /// This will:
    /// 1. Create the directory if needed
    /// 2. Roll a committed `.pending/` forward
    /// 3. Discard an uncommitted `.pending/`
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to create certificate directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Self::recover_pending(&dir).await?;

        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    /// Directory holding the artifacts
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Path of one artifact, e.g. `artifact_path(CERTIFICATE_FILE)`
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn recover_pending(dir: &Path) -> Result<()> {
        let pending = dir.join(PENDING_DIR);
        if fs::try_exists(&pending).await? {
            if fs::try_exists(pending.join(COMMIT_MARKER)).await? {
                tracing::warn!(
                    "Found committed but unapplied bundle in {}. Rolling forward.",
                    pending.display()
                );
                Self::commit_pending(dir, &pending).await?;
            } else {
                tracing::warn!(
                    "Found incomplete bundle in {}. Discarding it.",
                    pending.display()
                );
            }

            Self::remove_dir(&pending).await?;
        }

        // Left behind only when a finished commit was interrupted during cleanup
        let previous = dir.join(PREVIOUS_DIR);
        if fs::try_exists(&previous).await? {
            Self::remove_dir(&previous).await?;
        }
        Ok(())
    }

    async fn remove_dir(path: &Path) -> Result<()> {
        fs::remove_dir_all(path).await.map_err(|e| {
            Error::persistence(format!("Failed to remove {}: {}", path.display(), e))
        })
    }

    /// Move staged artifacts into place, metadata last
    ///
    /// Either every staged artifact ends up live, or the live directory is
    /// restored to what it held before the call.
    async fn commit_pending(dir: &Path, pending: &Path) -> Result<()> {
        let previous = dir.join(PREVIOUS_DIR);
        if fs::try_exists(&previous).await? {
            Self::remove_dir(&previous).await?;
        }
        fs::create_dir_all(&previous).await.map_err(|e| {
            Error::persistence(format!("Failed to create {}: {}", previous.display(), e))
        })?;

        let mut replaced: Vec<(&str, bool)> = Vec::with_capacity(ARTIFACTS.len());
        let mut outcome = Ok(());
        for name in ARTIFACTS {
            match Self::replace_artifact(dir, pending, &previous, name).await {
                Ok(Some(backed_up)) => replaced.push((name, backed_up)),
                // already moved by an interrupted commit
                Ok(None) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if outcome.is_err() {
            Self::roll_back(dir, &previous, &replaced).await;
        }

        if let Err(e) = fs::remove_dir_all(&previous).await {
            tracing::warn!("Failed to clean up {}: {}", previous.display(), e);
        }
        outcome
    }

    /// Back up the live artifact, then rename the staged one over it
    ///
    /// Returns `None` if nothing is staged under `name`, otherwise whether a
    /// live artifact was backed up.
    async fn replace_artifact(
        dir: &Path,
        pending: &Path,
        previous: &Path,
        name: &str,
    ) -> Result<Option<bool>> {
        let staged = pending.join(name);
        if !fs::try_exists(&staged).await? {
            return Ok(None);
        }

        let target = dir.join(name);
        let backed_up = match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => {
                let backup = previous.join(name);
                fs::copy(&target, &backup).await.map_err(|e| {
                    Error::persistence(format!(
                        "Failed to back up {} to {}: {}",
                        target.display(),
                        backup.display(),
                        e
                    ))
                })?;
                true
            }
            _ => false,
        };

        fs::rename(&staged, &target).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                staged.display(),
                target.display(),
                e
            ))
        })?;
        Ok(Some(backed_up))
    }

    /// Undo the renames of a failed commit, newest first
    async fn roll_back(dir: &Path, previous: &Path, replaced: &[(&str, bool)]) {
        for (name, backed_up) in replaced.iter().rev() {
            let target = dir.join(name);
            let restored = if *backed_up {
                fs::rename(previous.join(name), &target).await
            } else {
                fs::remove_file(&target).await
            };

            if let Err(e) = restored {
                tracing::error!("Failed to roll back {}: {}", target.display(), e);
            }
        }
    }

    async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            Error::persistence(format!("Failed to create {}: {}", path.display(), e))
        })?;

        file.write_all(contents).await.map_err(|e| {
            Error::persistence(format!("Failed to write {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::persistence(format!("Failed to sync {}: {}", path.display(), e))
        })
    }

    async fn stage(&self, pending: &Path, bundle: &CertificateBundle) -> Result<()> {
        if fs::try_exists(pending).await? {
            fs::remove_dir_all(pending).await?;
        }
        fs::create_dir_all(pending).await.map_err(|e| {
            Error::persistence(format!("Failed to create {}: {}", pending.display(), e))
        })?;

        let metadata = serde_json::to_string_pretty(&bundle.metadata)?;

        let files: [(&str, &[u8]); 5] = [
            (CERTIFICATE_FILE, bundle.leaf_and_chain_pem.as_bytes()),
            (PRIVATE_KEY_FILE, bundle.private_key_pem.as_bytes()),
            (PUBLIC_KEY_FILE, bundle.public_key_pem.as_bytes()),
            (CSR_FILE, bundle.csr_pem.as_bytes()),
            (METADATA_FILE, metadata.as_bytes()),
        ];
        for (name, contents) in files {
            Self::write_file(&pending.join(name), contents).await?;
        }

        Self::write_file(&pending.join(COMMIT_MARKER), b"").await
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Metadata from `data.json`, falling back to the certificate itself
    async fn load_metadata(&self) -> Result<Option<BundleMetadata>> {
        let Some(certificate) = Self::read_optional(&self.artifact_path(CERTIFICATE_FILE)).await?
        else {
            tracing::debug!("No certificate in {}", self.dir.display());
            return Ok(None);
        };

        match Self::read_optional(&self.artifact_path(METADATA_FILE)).await? {
            Some(content) => match serde_json::from_str::<BundleMetadata>(&content) {
                Ok(metadata) => return Ok(Some(metadata)),
                Err(e) => {
                    tracing::warn!(
                        "{} appears corrupted: {}. Reading expiry from the certificate.",
                        METADATA_FILE,
                        e
                    );
                }
            },
            None => {
                tracing::warn!(
                    "{} missing next to {}. Reading expiry from the certificate.",
                    METADATA_FILE,
                    CERTIFICATE_FILE
                );
            }
        }

        match metadata_from_certificate(&certificate) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                tracing::warn!("Stored certificate is unreadable: {}. Treating as absent.", e);
                Ok(None)
            }
        }
    }
}

/// Derive metadata from the first certificate of a PEM chain
///
/// Let's Encrypt staging issuers carry a `(STAGING)` prefix in their name.
pub fn metadata_from_certificate(certificate_pem: &str) -> Result<BundleMetadata> {
    let block = pem::parse(certificate_pem)
        .map_err(|e| Error::persistence(format!("Invalid certificate PEM: {}", e)))?;

    let (_, certificate) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| Error::persistence(format!("Invalid X.509 certificate: {}", e)))?;

    let validity = certificate.validity();
    let issuer = certificate.issuer().to_string();

    Ok(BundleMetadata {
        issued_at_epoch_ms: validity.not_before.timestamp() * 1000,
        expires_at_epoch_ms: validity.not_after.timestamp() * 1000,
        is_staging_issued: issuer.contains("STAGING"),
    })
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn write_bundle(&self, bundle: &CertificateBundle) -> Result<()> {
        let _guard = self.lock.write().await;
        let pending = self.dir.join(PENDING_DIR);

        if let Err(e) = self.stage(&pending, bundle).await {
            if let Err(cleanup) = fs::remove_dir_all(&pending).await {
                tracing::warn!("Failed to clean up {}: {}", pending.display(), cleanup);
            }
            return Err(e);
        }

        if let Err(e) = Self::commit_pending(&self.dir, &pending).await {
            if let Err(cleanup) = fs::remove_dir_all(&pending).await {
                tracing::warn!("Failed to clean up {}: {}", pending.display(), cleanup);
            }
            return Err(e);
        }

        Self::remove_dir(&pending).await?;

        tracing::debug!("Bundle committed to {}", self.dir.display());
        Ok(())
    }

    async fn read_metadata(&self) -> Result<Option<BundleMetadata>> {
        let _guard = self.lock.read().await;
        self.load_metadata().await
    }

    async fn read_bundle(&self) -> Result<Option<CertificateBundle>> {
        let _guard = self.lock.read().await;

        let Some(metadata) = self.load_metadata().await? else {
            return Ok(None);
        };

        let mut contents = Vec::with_capacity(4);
        for name in [CERTIFICATE_FILE, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, CSR_FILE] {
            let content = Self::read_optional(&self.artifact_path(name))
                .await?
                .ok_or_else(|| Error::persistence(format!("Bundle is missing {}", name)))?;
            contents.push(content);
        }

        let mut contents = contents.into_iter();
        let mut next = || contents.next().unwrap_or_default();

        Ok(Some(CertificateBundle {
            leaf_and_chain_pem: next(),
            private_key_pem: next(),
            public_key_pem: next(),
            csr_pem: next(),
            metadata,
        }))
    }

    async fn exists(&self) -> Result<bool> {
        let _guard = self.lock.read().await;
        Ok(self.load_metadata().await?.is_some())
    }
}
