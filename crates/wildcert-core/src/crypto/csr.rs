//! PKCS#10 certificate signing requests

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509ReqBuilder};

use super::keys::KeyPair;
use crate::domain::validate_dns_name;
use crate::error::{Error, Result};

/// A signed CSR in both encodings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    pem: String,
    der: Vec<u8>,
    domains: Vec<String>,
}

impl CertificateSigningRequest {
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER bytes, the form submitted at finalization
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Requested names in SAN order
    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

/// Builds CSRs for a domain and its wildcard
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrBuilder;

impl CsrBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a CSR signed with SHA-256
    ///
    /// The first domain becomes the subject CN; all domains are listed in the
    /// subjectAltName extension in the order given.
    ///
    /// # Returns
    ///
    /// - `Err(Error::CsrConstruction)`: Empty domain list, malformed name,
    ///   or a signing failure
    pub fn build(&self, key: &KeyPair, domains: &[String]) -> Result<CertificateSigningRequest> {
        let common_name = domains
            .first()
            .ok_or_else(|| Error::csr("At least one domain is required"))?;

        for domain in domains {
            validate_dns_name(domain, true).map_err(Error::csr)?;
        }

        let private_key = key
            .private_key()
            .map_err(|e| Error::csr(format!("Unusable private key: {}", e)))?;

        let mut builder = X509ReqBuilder::new().map_err(openssl_error)?;
        builder.set_pubkey(&private_key).map_err(openssl_error)?;

        let mut subject = X509NameBuilder::new().map_err(openssl_error)?;
        subject
            .append_entry_by_nid(Nid::COMMONNAME, common_name)
            .map_err(openssl_error)?;
        let subject = subject.build();
        builder.set_subject_name(&subject).map_err(openssl_error)?;

        let mut san = SubjectAlternativeName::new();
        for domain in domains {
            san.dns(domain);
        }
        let san = san
            .build(&builder.x509v3_context(None))
            .map_err(openssl_error)?;

        let mut extensions = Stack::new().map_err(openssl_error)?;
        extensions.push(san).map_err(openssl_error)?;
        builder.add_extensions(&extensions).map_err(openssl_error)?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(openssl_error)?;
        let request = builder.build();

        let pem = request.to_pem().map_err(openssl_error)?;
        let der = request.to_der().map_err(openssl_error)?;

        Ok(CertificateSigningRequest {
            pem: String::from_utf8(pem).map_err(|e| Error::csr(format!("PEM is not UTF-8: {}", e)))?,
            der,
            domains: domains.to_vec(),
        })
    }
}

fn openssl_error(err: openssl::error::ErrorStack) -> Error {
    Error::csr(err.to_string())
}
