//! Collaborator traits
//!
//! This module defines the interfaces the orchestrator and scheduler are
//! written against.
//!
//! - [`AcmeClient`]: ACME wire transport
//! - [`DnsChallengeProvider`]: DNS-01 TXT record management
//! - [`CertificateStore`]: Persistence of the latest bundle

pub mod acme_client;
pub mod certificate_store;
pub mod dns_challenge;

pub use acme_client::{
    AccountInfo, AcmeClient, AcmeSession, AuthorizationState, AuthorizationStatus,
    Dns01Challenge, IssuedCertificate, NewAccountRequest, OrderState, OrderStatus,
    PendingAuthorization, ProtocolResult, split_leaf_and_chain,
};
pub use certificate_store::CertificateStore;
pub use dns_challenge::{DnsChallengeProvider, TxtChallenge, dns01_txt_value};
