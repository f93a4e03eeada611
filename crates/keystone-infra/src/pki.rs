//! In-memory PKI operations
//!
//! The master acts as the cluster's certificate authority. It signs one server
//! identity for its own listeners and one client identity per internal
//! consumer; every issued certificate chains to the CA.
//!
//! # Trust Bundle
//!
//! Listeners verify clients against a [`TrustBundle`], not just the current CA
//! certificate. The bundle accumulates every CA certificate the node has ever
//! used, so identities issued before the CA was regenerated keep verifying.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// Default validity period for CA certificates (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Default validity period for server and client certificates (2 years)
pub const CERT_VALIDITY_YEARS: i64 = 2;

/// Organization placed in every subject
const ORGANIZATION: &str = "Keystone";

/// PEM tag for certificates
const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Compute certificate validity period from now
fn compute_validity(years: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(years * 365);
    (now, not_after)
}

fn now_unix() -> i64 {
    ::time::OffsetDateTime::now_utc().unix_timestamp()
}

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Filesystem error on certificate material
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Client configuration could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PkiError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn encode_certificate(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new(CERTIFICATE_TAG, der.to_vec()))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Information about an issued certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Subject alternative names (DNS names and IP literals)
    pub sans: BTreeSet<String>,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let mut sans = BTreeSet::new();
        if let Ok(Some(ext)) = cert.subject_alternative_name() {
            for name in &ext.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => {
                        sans.insert(dns.to_string());
                    }
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            sans.insert(ip.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            sans,
        })
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.not_after
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Normalize requested SANs the way they will read back from a certificate
///
/// IP literals are canonicalized; DNS names are kept as given.
pub fn normalize_sans(sans: &[&str]) -> BTreeSet<String> {
    sans.iter()
        .map(|san| match san.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => san.to_string(),
        })
        .collect()
}

fn san_entries(sans: &[&str]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| {
            if let Ok(ip) = san.parse::<IpAddr>() {
                Ok(SanType::IpAddress(ip))
            } else {
                Ia5String::try_from(san.to_string())
                    .map(SanType::DnsName)
                    .map_err(|e| {
                        PkiError::CertificateGenerationFailed(format!(
                            "invalid DNS name '{}': {}",
                            san, e
                        ))
                    })
            }
        })
        .collect()
}

/// A signed certificate and its private key, both PEM-encoded
pub struct SignedCertificate {
    /// Certificate PEM
    pub cert_pem: String,
    /// Private key PEM (zeroized on drop)
    pub key_pem: Zeroizing<String>,
}

/// Certificate Authority for signing internal identities
#[derive(Clone)]
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone, so it is re-parsed per signature)
    ca_key_pem: Zeroizing<String>,
    /// PEM-encoded CA certificate
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem: Zeroizing::new(key_pair.serialize_pem()),
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load CA from PEM
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        CertificateInfo::from_pem(cert_pem)?;

        Ok(Self {
            ca_key_pem: Zeroizing::new(key_pem.to_string()),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// CA private key in PEM format (for persistence)
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Validity and subject information for the CA certificate
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    fn sign(&self, params: CertificateParams, what: &str) -> Result<SignedCertificate> {
        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate {} key: {}", what, e))
        })?;
        let key_pem = Zeroizing::new(key.serialize_pem());

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign {} cert: {}", what, e))
        })?;

        Ok(SignedCertificate {
            cert_pem: cert.pem(),
            key_pem,
        })
    }

    /// Generate a TLS server certificate valid for the given host names and IPs
    pub fn generate_server_cert(
        &self,
        common_name: &str,
        sans: &[&str],
    ) -> Result<SignedCertificate> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;
        params.subject_alt_names = san_entries(sans)?;

        self.sign(params, "server")
    }

    /// Generate a TLS client certificate whose subject is the given user name
    pub fn generate_client_cert(&self, user: &str) -> Result<SignedCertificate> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(user);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        self.sign(params, "client")
    }
}

/// Every CA certificate this node has ever trusted
///
/// Order is first-trusted first. Adding a certificate already present is a
/// no-op, so the bundle only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustBundle {
    roots: Vec<Vec<u8>>,
}

impl TrustBundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a bundle of concatenated PEM certificates
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let blocks = ::pem::parse_many(pem_data.as_bytes())
            .map_err(|e| PkiError::ParseError(format!("failed to parse trust bundle: {}", e)))?;

        let mut bundle = Self::new();
        for block in blocks.iter().filter(|b| b.tag() == CERTIFICATE_TAG) {
            bundle.add_der(block.contents().to_vec());
        }
        Ok(bundle)
    }

    fn add_der(&mut self, der: Vec<u8>) -> bool {
        if self.roots.contains(&der) {
            return false;
        }
        self.roots.push(der);
        true
    }

    /// Add a PEM certificate; returns whether it was new
    pub fn add_pem(&mut self, cert_pem: &str) -> Result<bool> {
        let der = parse_pem(cert_pem)?;
        Ok(self.add_der(der))
    }

    /// Whether every root in `other` is also in this bundle
    pub fn is_superset_of(&self, other: &TrustBundle) -> bool {
        other.roots.iter().all(|root| self.roots.contains(root))
    }

    /// Number of trusted roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if bundle is empty
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// All roots as concatenated PEM
    pub fn to_pem(&self) -> String {
        self.roots
            .iter()
            .map(|der| encode_certificate(der))
            .collect::<Vec<_>>()
            .join("")
    }

    /// Verify a certificate was signed by any root in the bundle
    pub fn verify(&self, cert_der: &[u8]) -> Result<VerificationResult> {
        for root in &self.roots {
            match verify_cert_der(cert_der, root) {
                Ok(result) if result.valid => return Ok(result),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(VerificationResult::invalid(
            "certificate not signed by any trusted CA",
        ))
    }
}

/// Outcome of verifying a certificate against a CA
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Subject common name of the verified certificate
    pub common_name: String,
    /// Whether the certificate is valid
    pub valid: bool,
    /// Reason if invalid
    pub reason: Option<String>,
}

impl VerificationResult {
    fn invalid(reason: &str) -> Self {
        Self {
            common_name: String::new(),
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Verify a certificate was signed by the given CA and is currently valid
pub fn verify_cert(cert_der: &[u8], ca_cert_pem: &str) -> Result<VerificationResult> {
    let ca_der = parse_pem(ca_cert_pem)?;
    verify_cert_der(cert_der, &ca_der)
}

fn verify_cert_der(cert_der: &[u8], ca_der: &[u8]) -> Result<VerificationResult> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    let (_, ca_cert) = X509Certificate::from_der(ca_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    if cert.verify_signature(Some(ca_cert.public_key())).is_err() {
        return Ok(VerificationResult::invalid("signature verification failed"));
    }

    let now = now_unix();
    if now < cert.validity().not_before.timestamp() {
        return Ok(VerificationResult::invalid("certificate not yet valid"));
    }
    if now > cert.validity().not_after.timestamp() {
        return Ok(VerificationResult::invalid("certificate expired"));
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();

    Ok(VerificationResult {
        common_name,
        valid: true,
        reason: None,
    })
}
