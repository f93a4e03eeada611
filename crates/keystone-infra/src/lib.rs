//! Certificate authority, identity issuance, and trust bundle management

#![deny(missing_docs)]

pub mod cert_dir;
pub mod client_config;
pub mod pki;

pub use cert_dir::{CertDir, IssuedIdentity, LoadedAuthority};
pub use client_config::ClientConfigFile;
pub use pki::{CertificateAuthority, PkiError, TrustBundle};
