//! Trust bootstrap
//!
//! Loads or creates the cluster CA, then makes sure every internal consumer
//! has its own identity signed by it:
//!
//! | identity                        | used by                                   |
//! |---------------------------------|-------------------------------------------|
//! | `master-server`                 | API and asset listeners                   |
//! | `platform-api-client`           | build and deployment-config controllers   |
//! | `deployment-trigger-client`     | deployment controllers and triggers       |
//! | `admin-client`                  | the operator                              |
//! | `workload-orchestration-client` | embedded orchestration loops (if any)     |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use keystone_common::{Addr, Error, Result, CONTAINER_BRIDGE_ADDR};
use keystone_infra::{CertDir, ClientConfigFile, IssuedIdentity, PkiError, TrustBundle};

/// Server identity for the master listeners
pub const MASTER_SERVER: &str = "master-server";
/// Client identity for platform API consumers
pub const PLATFORM_API_CLIENT: &str = "platform-api-client";
/// Client identity for deployment controllers
pub const DEPLOYMENT_TRIGGER_CLIENT: &str = "deployment-trigger-client";
/// Client identity for the operator
pub const ADMIN_CLIENT: &str = "admin-client";
/// Client identity for embedded orchestration
pub const WORKLOAD_ORCHESTRATION_CLIENT: &str = "workload-orchestration-client";

/// Client identities to issue, in issuance order
pub fn client_roles(embedded_orchestration: bool) -> Vec<&'static str> {
    let mut roles = vec![PLATFORM_API_CLIENT, DEPLOYMENT_TRIGGER_CLIENT, ADMIN_CLIENT];
    if embedded_orchestration {
        roles.push(WORKLOAD_ORCHESTRATION_CLIENT);
    }
    roles
}

/// Names the master server certificate must cover
pub fn server_sans(master: &Addr) -> Vec<String> {
    let mut sans = Vec::new();
    for san in [master.host(), "localhost", "127.0.0.1", CONTAINER_BRIDGE_ADDR] {
        if !sans.iter().any(|s| s == san) {
            sans.push(san.to_string());
        }
    }
    sans
}

/// A client identity together with the configuration pointing it at the master
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    /// The issued identity
    pub identity: IssuedIdentity,
    /// Connection settings written next to it
    pub config: ClientConfigFile,
}

/// Everything the master needs to serve and call itself over TLS
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    /// Current CA certificate file
    pub ca_cert_file: PathBuf,
    /// Aggregated bundle file handed to listeners
    pub bundle_file: PathBuf,
    /// Aggregated bundle contents
    pub bundle: TrustBundle,
    /// Listener identity
    pub server: IssuedIdentity,
    /// Client identities keyed by role name
    pub clients: BTreeMap<String, ClientCredentials>,
}

impl TrustMaterial {
    /// Every identity name, server first
    pub fn identity_names(&self) -> Vec<String> {
        std::iter::once(self.server.name.clone())
            .chain(self.clients.keys().cloned())
            .collect()
    }

    /// Client config for `role`, if issued
    pub fn client_config(&self, role: &str) -> Option<&ClientConfigFile> {
        self.clients.get(role).map(|c| &c.config)
    }
}

fn pki_error(context: &str) -> impl Fn(PkiError) -> Error + '_ {
    move |e| Error::trust_for(context, e.to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Load or create the CA and every identity under `cert_dir`
///
/// Only meaningful for an encrypted master; callers skip it for plain `http`.
pub fn bootstrap_trust(
    cert_dir: &CertDir,
    master: &Addr,
    embedded_orchestration: bool,
) -> Result<TrustMaterial> {
    let common_name = format!("{}@{}", master.host(), unix_now());
    let authority = cert_dir
        .load_or_create_ca(&common_name)
        .map_err(pki_error("ca"))?;

    let sans = server_sans(master);
    let san_refs: Vec<&str> = sans.iter().map(String::as_str).collect();
    let server = cert_dir
        .ensure_server_identity(&authority, MASTER_SERVER, &san_refs)
        .map_err(pki_error(MASTER_SERVER))?;

    let server_url = master.url();
    let mut clients = BTreeMap::new();
    for role in client_roles(embedded_orchestration) {
        let identity = cert_dir
            .ensure_client_identity(&authority, role)
            .map_err(pki_error(role))?;
        let config = cert_dir
            .write_client_config(&identity, &server_url)
            .map_err(pki_error(role))?;
        clients.insert(role.to_string(), ClientCredentials { identity, config });
    }

    tracing::info!(
        dir = %cert_dir.root().display(),
        ca_created = authority.created,
        roots = authority.bundle.len(),
        identities = clients.len() + 1,
        "Trust bootstrap complete"
    );

    Ok(TrustMaterial {
        ca_cert_file: cert_dir.root().join(keystone_infra::cert_dir::CA_CERT_FILE),
        bundle_file: cert_dir.bundle_path(),
        bundle: authority.bundle,
        server,
        clients,
    })
}
