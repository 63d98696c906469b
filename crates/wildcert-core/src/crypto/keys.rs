//! Key pair generation
//!
//! RSA keys back the certificate, elliptic-curve keys back ACME accounts.
//! Both are exported as PEM: PKCS#8 for the private half and
//! SubjectPublicKeyInfo for the public half.

use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};

use crate::config::KeyStrength;
use crate::error::{Error, Result};

/// Algorithm family of a key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
}

/// A PEM encoded key pair
///
/// The `Debug` output never includes the private key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    kind: KeyKind,
    bits: u32,
    private_key_pem: String,
    public_key_pem: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kind", &self.kind)
            .field("bits", &self.bits)
            .field("private_key_pem", &"<REDACTED>")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

impl KeyPair {
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// RSA modulus size or EC curve size in bits
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Parse the private half back into an openssl key
    pub fn private_key(&self) -> Result<PKey<Private>> {
        PKey::private_key_from_pem(self.private_key_pem.as_bytes())
            .map_err(|e| Error::key_generation(format!("Failed to parse private key: {}", e)))
    }

    /// Parse the public half back into an openssl key
    pub fn public_key(&self) -> Result<PKey<Public>> {
        PKey::public_key_from_pem(self.public_key_pem.as_bytes())
            .map_err(|e| Error::key_generation(format!("Failed to parse public key: {}", e)))
    }

    /// Sign `data` with SHA-256 using the private key
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.private_key()?;
        let mut signer = Signer::new(MessageDigest::sha256(), &key)
            .map_err(|e| Error::key_generation(format!("Failed to create signer: {}", e)))?;
        signer
            .update(data)
            .and_then(|_| signer.sign_to_vec())
            .map_err(|e| Error::key_generation(format!("Signing failed: {}", e)))
    }

    /// Verify a SHA-256 signature over `data` with the public key
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let key = self.public_key()?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)
            .map_err(|e| Error::key_generation(format!("Failed to create verifier: {}", e)))?;
        verifier
            .update(data)
            .and_then(|_| verifier.verify(signature))
            .map_err(|e| Error::key_generation(format!("Verification failed: {}", e)))
    }
}

/// Generates fresh key material
///
/// Stateless; every call draws new entropy. RSA generation at 4096 bits
/// takes long enough that async callers should run it on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMaterialGenerator;

impl KeyMaterialGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a key pair
    ///
    /// # Parameters
    ///
    /// - `kind`: RSA or EC
    /// - `strength_bits`: RSA modulus (1024/2048/3072/4096, default 4096) or
    ///   EC curve size (256/384, default 256)
    ///
    /// # Returns
    ///
    /// - `Err(Error::KeyGeneration)`: If the strength is unsupported or
    ///   the backend fails
    pub fn generate(&self, kind: KeyKind, strength_bits: Option<u32>) -> Result<KeyPair> {
        match kind {
            KeyKind::Rsa => {
                let strength = match strength_bits {
                    Some(bits) => KeyStrength::try_from(bits).map_err(|_| {
                        Error::key_generation(format!("Unsupported RSA key size: {}", bits))
                    })?,
                    None => KeyStrength::default(),
                };
                self.generate_rsa(strength)
            }
            KeyKind::Ec => {
                let nid = match strength_bits.unwrap_or(256) {
                    256 => Nid::X9_62_PRIME256V1,
                    384 => Nid::SECP384R1,
                    other => {
                        return Err(Error::key_generation(format!(
                            "Unsupported EC curve size: {}. Supported sizes: 256, 384",
                            other
                        )));
                    }
                };
                self.generate_ec(nid, strength_bits.unwrap_or(256))
            }
        }
    }

    /// Generate an RSA key pair for the certificate
    pub fn generate_rsa(&self, strength: KeyStrength) -> Result<KeyPair> {
        let rsa = Rsa::generate(strength.bits()).map_err(|e| {
            Error::key_generation(format!("RSA-{} generation failed: {}", strength, e))
        })?;
        let key = PKey::from_rsa(rsa)
            .map_err(|e| Error::key_generation(format!("Failed to wrap RSA key: {}", e)))?;

        export(KeyKind::Rsa, strength.bits(), &key)
    }

    fn generate_ec(&self, nid: Nid, bits: u32) -> Result<KeyPair> {
        let group = EcGroup::from_curve_name(nid)
            .map_err(|e| Error::key_generation(format!("Unknown EC curve: {}", e)))?;
        let ec = EcKey::generate(&group)
            .map_err(|e| Error::key_generation(format!("EC generation failed: {}", e)))?;
        let key = PKey::from_ec_key(ec)
            .map_err(|e| Error::key_generation(format!("Failed to wrap EC key: {}", e)))?;

        export(KeyKind::Ec, bits, &key)
    }
}

fn export(kind: KeyKind, bits: u32, key: &PKey<Private>) -> Result<KeyPair> {
    let private_key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| Error::key_generation(format!("Failed to export private key: {}", e)))?;
    let public_key_pem = key
        .public_key_to_pem()
        .map_err(|e| Error::key_generation(format!("Failed to export public key: {}", e)))?;

    Ok(KeyPair {
        kind,
        bits,
        private_key_pem: pem_string(private_key_pem)?,
        public_key_pem: pem_string(public_key_pem)?,
    })
}

fn pem_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::key_generation(format!("PEM is not UTF-8: {}", e)))
}
