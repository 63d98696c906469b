// # Certificate Store Implementations
//
// This module provides implementations of the CertificateStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileCertificateStore, metadata_from_certificate};
pub use memory::MemoryCertificateStore;
