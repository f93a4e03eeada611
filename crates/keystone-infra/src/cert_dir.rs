//! On-disk certificate directory
//!
//! Layout under the directory root:
//!
//! ```text
//! ca.crt            current CA certificate
//! ca.key            current CA private key
//! ca-bundle.crt     every CA certificate ever trusted here (append-only)
//! <name>/cert.crt   identity certificate
//! <name>/key.key    identity private key
//! <name>/root.crt   roots the identity's peer should trust (the bundle)
//! <name>/client.yaml  client identities only
//! ```
//!
//! Material already on disk wins over regeneration. An identity is only
//! reissued when it no longer chains to the current CA, has expired, or (for
//! server identities) was issued for a different set of names.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::client_config::ClientConfigFile;
use crate::pki::{
    normalize_sans, parse_pem, verify_cert, CertificateAuthority, CertificateInfo, PkiError,
    Result, SignedCertificate, TrustBundle,
};

/// CA certificate file name
pub const CA_CERT_FILE: &str = "ca.crt";
/// CA private key file name
pub const CA_KEY_FILE: &str = "ca.key";
/// Aggregated trust bundle file name
pub const BUNDLE_FILE: &str = "ca-bundle.crt";
/// Identity certificate file name
pub const CERT_FILE: &str = "cert.crt";
/// Identity private key file name
pub const KEY_FILE: &str = "key.key";
/// Identity root certificate file name
pub const ROOT_FILE: &str = "root.crt";
/// Client configuration file name
pub const CLIENT_CONFIG_FILE: &str = "client.yaml";

/// CA loaded from (or freshly written to) a certificate directory
pub struct LoadedAuthority {
    /// The signing CA
    pub ca: CertificateAuthority,
    /// Aggregated roots, including the CA above
    pub bundle: TrustBundle,
    /// Whether the CA was generated during this call
    pub created: bool,
}

/// A certificate and key bound to one logical role, persisted on disk
#[derive(Clone)]
pub struct IssuedIdentity {
    /// Role name (also the subdirectory name)
    pub name: String,
    /// Certificate path
    pub cert_file: PathBuf,
    /// Private key path
    pub key_file: PathBuf,
    /// Root bundle path for this identity
    pub root_file: PathBuf,
    /// Certificate PEM
    pub cert_pem: String,
    /// Private key PEM
    pub key_pem: Zeroizing<String>,
    /// True when existing material was kept rather than reissued
    pub reused: bool,
}

impl fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("name", &self.name)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("root_file", &self.root_file)
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}

/// Handle on a certificate directory
#[derive(Debug, Clone)]
pub struct CertDir {
    root: PathBuf,
}

impl CertDir {
    /// Use `root` as the certificate directory; nothing is touched until a
    /// load or issue call
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the aggregated trust bundle
    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(BUNDLE_FILE)
    }

    /// Directory holding the named identity
    pub fn identity_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Load the CA, or create and persist one named `common_name`
    ///
    /// The CA certificate is appended to the bundle if it is not already
    /// there; existing bundle entries are never removed.
    pub fn load_or_create_ca(&self, common_name: &str) -> Result<LoadedAuthority> {
        create_dir(&self.root)?;

        let cert_path = self.root.join(CA_CERT_FILE);
        let key_path = self.root.join(CA_KEY_FILE);

        let existing = match (read_optional(&cert_path)?, read_optional(&key_path)?) {
            (Some(cert), Some(key)) => Some(CertificateAuthority::from_pem(&cert, &key)?),
            (None, None) => None,
            _ => {
                warn!(
                    dir = %self.root.display(),
                    "Incomplete CA material on disk, generating a new CA"
                );
                None
            }
        };

        let existing = match existing {
            Some(ca) => {
                let info = ca.cert_info()?;
                if info.is_expired() {
                    warn!(
                        dir = %self.root.display(),
                        common_name = %info.common_name,
                        "CA on disk has expired, generating a new CA"
                    );
                    None
                } else {
                    Some(ca)
                }
            }
            None => None,
        };

        let (ca, created) = match existing {
            Some(ca) => {
                debug!(dir = %self.root.display(), "Loaded existing CA");
                (ca, false)
            }
            None => {
                let ca = CertificateAuthority::new(common_name)?;
                write_file(&cert_path, ca.ca_cert_pem(), false)?;
                write_file(&key_path, ca.ca_key_pem(), true)?;
                info!(
                    dir = %self.root.display(),
                    common_name = %common_name,
                    "Created new CA"
                );
                (ca, true)
            }
        };

        let mut bundle = self.load_bundle()?;
        if bundle.add_pem(ca.ca_cert_pem())? {
            self.write_bundle(&bundle)?;
            info!(roots = bundle.len(), "Added CA to trust bundle");
        }

        Ok(LoadedAuthority {
            ca,
            bundle,
            created,
        })
    }

    /// Read the persisted trust bundle (empty if absent)
    pub fn load_bundle(&self) -> Result<TrustBundle> {
        match read_optional(&self.bundle_path())? {
            Some(pem) => TrustBundle::from_pem(&pem),
            None => Ok(TrustBundle::new()),
        }
    }

    fn write_bundle(&self, bundle: &TrustBundle) -> Result<()> {
        let path = self.bundle_path();
        let tmp = self.root.join(format!("{}.tmp", BUNDLE_FILE));
        write_file(&tmp, &bundle.to_pem(), false)?;
        std::fs::rename(&tmp, &path).map_err(|e| PkiError::io(&path, e))
    }

    /// Ensure a server identity valid for exactly `sans` exists
    pub fn ensure_server_identity(
        &self,
        authority: &LoadedAuthority,
        name: &str,
        sans: &[&str],
    ) -> Result<IssuedIdentity> {
        let wanted = normalize_sans(sans);
        self.ensure_identity(authority, name, |info| info.sans == wanted, || {
            authority.ca.generate_server_cert(name, sans)
        })
    }

    /// Ensure a client identity for `name` exists
    pub fn ensure_client_identity(
        &self,
        authority: &LoadedAuthority,
        name: &str,
    ) -> Result<IssuedIdentity> {
        self.ensure_identity(authority, name, |info| info.common_name == name, || {
            authority.ca.generate_client_cert(name)
        })
    }

    fn ensure_identity(
        &self,
        authority: &LoadedAuthority,
        name: &str,
        matches: impl Fn(&CertificateInfo) -> bool,
        issue: impl FnOnce() -> Result<SignedCertificate>,
    ) -> Result<IssuedIdentity> {
        let dir = self.identity_dir(name);
        create_dir(&dir)?;

        let cert_file = dir.join(CERT_FILE);
        let key_file = dir.join(KEY_FILE);
        let root_file = dir.join(ROOT_FILE);

        let existing = self.reusable(authority, &cert_file, &key_file, &matches)?;
        let (cert_pem, key_pem, reused) = match existing {
            Some((cert, key)) => {
                debug!(identity = %name, "Reusing existing identity");
                (cert, key, true)
            }
            None => {
                let signed = issue()?;
                write_file(&cert_file, &signed.cert_pem, false)?;
                write_file(&key_file, &signed.key_pem, true)?;
                info!(identity = %name, "Issued identity");
                (signed.cert_pem, signed.key_pem, false)
            }
        };

        // Always refreshed so peers pick up roots added since the last run
        write_file(&root_file, &authority.bundle.to_pem(), false)?;

        Ok(IssuedIdentity {
            name: name.to_string(),
            cert_file,
            key_file,
            root_file,
            cert_pem,
            key_pem,
            reused,
        })
    }

    fn reusable(
        &self,
        authority: &LoadedAuthority,
        cert_file: &Path,
        key_file: &Path,
        matches: &impl Fn(&CertificateInfo) -> bool,
    ) -> Result<Option<(String, Zeroizing<String>)>> {
        let (Some(cert_pem), Some(key_pem)) = (read_optional(cert_file)?, read_optional(key_file)?)
        else {
            return Ok(None);
        };
        let key_pem = Zeroizing::new(key_pem);

        if rcgen::KeyPair::from_pem(&key_pem).is_err() {
            warn!(path = %key_file.display(), "Unreadable identity key, reissuing");
            return Ok(None);
        }
        let info = match CertificateInfo::from_pem(&cert_pem) {
            Ok(info) => info,
            Err(e) => {
                warn!(path = %cert_file.display(), error = %e, "Unreadable identity certificate, reissuing");
                return Ok(None);
            }
        };
        if info.is_expired() || !matches(&info) {
            return Ok(None);
        }

        let der = parse_pem(&cert_pem)?;
        if !verify_cert(&der, authority.ca.ca_cert_pem())?.valid {
            debug!(path = %cert_file.display(), "Identity not signed by current CA, reissuing");
            return Ok(None);
        }

        Ok(Some((cert_pem, key_pem)))
    }

    /// Write `client.yaml` for a client identity
    pub fn write_client_config(
        &self,
        identity: &IssuedIdentity,
        server_url: &str,
    ) -> Result<ClientConfigFile> {
        let config = ClientConfigFile {
            server: server_url.to_string(),
            certificate_authority: Some(identity.root_file.clone()),
            client_certificate: Some(identity.cert_file.clone()),
            client_key: Some(identity.key_file.clone()),
        };
        config.write_to(&self.identity_dir(&identity.name).join(CLIENT_CONFIG_FILE))?;
        Ok(config)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| PkiError::io(path, e))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PkiError::io(path, e)),
    }
}

fn write_file(path: &Path, contents: &str, private: bool) -> Result<()> {
    if private {
        return write_private(path, contents);
    }
    std::fs::write(path, contents).map_err(|e| PkiError::io(path, e))
}

/// Write a file that only the owner may read
///
/// New files are created 0600; an existing file is narrowed to 0600 before
/// the new contents go in.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| PkiError::io(path, e))?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(|e| PkiError::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| PkiError::io(path, e))
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| PkiError::io(path, e))
}
