//! Key material and CSR construction
//!
//! Pure CPU work: nothing in this module touches the network or the disk.

pub mod csr;
pub mod keys;

pub use csr::{CertificateSigningRequest, CsrBuilder};
pub use keys::{KeyKind, KeyMaterialGenerator, KeyPair};
