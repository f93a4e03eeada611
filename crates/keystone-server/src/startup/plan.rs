//! Startup plan
//!
//! Turns the negotiated configuration, the role, and any trust material into
//! the concrete settings each collaborator is started with. Pure: nothing
//! here touches the network or the filesystem.

use std::path::PathBuf;

use keystone_common::addr::join_host_port;
use keystone_common::config::Cidr;
use keystone_common::{Config, Error, Result};
use keystone_infra::ClientConfigFile;

use super::role::RolePlan;
use super::trust::{
    TrustMaterial, ADMIN_CLIENT, DEPLOYMENT_TRIGGER_CLIENT, PLATFORM_API_CLIENT,
    WORKLOAD_ORCHESTRATION_CLIENT,
};

/// Peer port for the embedded store
pub const STORE_PEER_PORT: u16 = 7001;

/// Origins always allowed in addition to the operator's list
const LOCAL_ORIGINS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Embedded store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Client API bind address
    pub client_bind: String,
    /// Peer API bind address
    pub peer_bind: String,
    /// Client URL advertised to the rest of the cluster
    pub advertise_url: String,
    /// Data directory
    pub data_dir: PathBuf,
}

/// Files a TLS listener is started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerTls {
    /// Server certificate
    pub cert_file: PathBuf,
    /// Server private key
    pub key_file: PathBuf,
    /// Aggregated bundle used to verify client certificates
    pub client_ca_file: PathBuf,
}

/// Authentication settings for the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Public master URL, used as the token issuer
    pub master_url: String,
    /// Roots clients are verified against; absent for plain transport
    pub master_roots_pem: Option<String>,
}

/// Client settings for every internal consumer of the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfigs {
    /// Build and deployment-config controllers
    pub platform_api: ClientConfigFile,
    /// Deployment controllers and triggers
    pub deployment_trigger: ClientConfigFile,
    /// Operator
    pub admin: ClientConfigFile,
    /// Orchestration layer (local master when embedded, external otherwise)
    pub orchestration: ClientConfigFile,
}

/// Master settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// API listener bind address
    pub bind_addr: String,
    /// Public master URL
    pub master_url: String,
    /// Asset listener address (`master_host:(listen_port + 1)`)
    pub asset_addr: String,
    /// Public URL of the asset listener
    pub asset_url: String,
    /// Store URL
    pub store_url: String,
    /// Orchestration endpoint URL
    pub orchestration_url: String,
    /// Service network
    pub portal_net: Cidr,
    /// Reject anonymous API requests
    pub require_authentication: bool,
    /// Storage schema version tag
    pub storage_version: String,
    /// Namespace holding the master service
    pub master_service_namespace: String,
    /// Allowed CORS origins, local origins appended
    pub cors_allowed_origins: Vec<String>,
    /// Listener TLS files; `None` for plain transport
    pub tls: Option<ListenerTls>,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Client settings for internal consumers
    pub clients: ClientConfigs,
}

/// Embedded orchestration settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationConfig {
    /// Master host the control loops talk to
    pub master_host: String,
    /// Master port
    pub master_port: u16,
    /// Nodes registered at startup
    pub node_hosts: Vec<String>,
    /// Service network
    pub portal_net: Cidr,
    /// Namespace holding the master service
    pub master_service_namespace: String,
}

/// Node settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Host the agent and proxy bind to
    pub bind_host: String,
    /// Name this node registers under
    pub node_host: String,
    /// Master URL
    pub master_url: String,
    /// Store URL the agent watches
    pub store_url: String,
    /// Volume directory
    pub volume_dir: PathBuf,
    /// Image for per-workload network containers
    pub network_container_image: String,
    /// Namespace holding the master service
    pub master_service_namespace: String,
    /// Container runtime endpoint
    pub container_runtime: String,
}

/// Settings for every collaborator this process starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPlan {
    /// Role that produced this plan
    pub role: RolePlan,
    /// Embedded store, if started here
    pub store: Option<StoreConfig>,
    /// Master, if started here
    pub master: Option<MasterConfig>,
    /// Embedded orchestration loops, if started here
    pub orchestration: Option<OrchestrationConfig>,
    /// Node, if started here
    pub node: Option<NodeConfig>,
}

/// `master_host:(listen_port + 1)`
pub fn asset_addr(config: &Config) -> Result<String> {
    let port = config.listen.port().checked_add(1).ok_or_else(|| {
        Error::invalid_arguments(format!(
            "listen port {} leaves no room for the asset listener",
            config.listen.port()
        ))
    })?;
    Ok(join_host_port(config.master.host(), port))
}

/// Operator origins plus the asset listener and local origins
pub fn cors_origins(config: &Config, asset_addr: &str) -> Vec<String> {
    let mut origins = config.cors_allowed_origins.clone();
    origins.push(asset_addr.to_string());
    origins.extend(LOCAL_ORIGINS.iter().map(|s| s.to_string()));
    origins
}

/// Node list with the single-loopback default replaced by `hostname`
pub fn node_hosts(config: &Config) -> Vec<String> {
    let nodes = if config.node_list.len() == 1 && config.node_list[0] == "127.0.0.1" {
        vec![config.hostname.clone()]
    } else {
        config.node_list.clone()
    };
    for node in &nodes {
        tracing::info!(node = %node, "Registering node");
    }
    nodes
}

/// Embedded store settings from the negotiated configuration
pub fn store_config(config: &Config) -> StoreConfig {
    StoreConfig {
        client_bind: join_host_port(config.listen.host(), config.etcd.port()),
        peer_bind: join_host_port(config.listen.host(), STORE_PEER_PORT),
        advertise_url: config.etcd.url(),
        data_dir: config.etcd_dir.clone(),
    }
}

fn client_configs(
    config: &Config,
    role: &RolePlan,
    trust: Option<&TrustMaterial>,
) -> ClientConfigs {
    let master_url = config.master.url();
    let issued = |name: &str| {
        trust
            .and_then(|t| t.client_config(name))
            .cloned()
            .unwrap_or_else(|| ClientConfigFile::anonymous(&master_url))
    };

    let orchestration = if role.embedded_orchestration {
        issued(WORKLOAD_ORCHESTRATION_CLIENT)
    } else {
        ClientConfigFile::anonymous(config.kubernetes.url())
    };

    ClientConfigs {
        platform_api: issued(PLATFORM_API_CLIENT),
        deployment_trigger: issued(DEPLOYMENT_TRIGGER_CLIENT),
        admin: issued(ADMIN_CLIENT),
        orchestration,
    }
}

fn master_config(
    config: &Config,
    role: &RolePlan,
    trust: Option<&TrustMaterial>,
) -> Result<MasterConfig> {
    let asset_addr = asset_addr(config)?;
    let tls = trust.map(|t| ListenerTls {
        cert_file: t.server.cert_file.clone(),
        key_file: t.server.key_file.clone(),
        client_ca_file: t.bundle_file.clone(),
    });

    Ok(MasterConfig {
        bind_addr: config.listen.host_port(),
        master_url: config.master.url(),
        asset_url: format!("{}://{}", config.master.scheme(), asset_addr),
        cors_allowed_origins: cors_origins(config, &asset_addr),
        asset_addr,
        store_url: config.etcd.url(),
        orchestration_url: config.kubernetes.url(),
        portal_net: config.portal_net,
        require_authentication: config.require_authentication,
        storage_version: config.storage_version.clone(),
        master_service_namespace: config.master_service_namespace.clone(),
        tls,
        auth: AuthConfig {
            master_url: config.master.url(),
            master_roots_pem: trust.map(|t| t.bundle.to_pem()),
        },
        clients: client_configs(config, role, trust),
    })
}

/// Build the plan for `role` from a negotiated configuration
///
/// The master entry stays empty until [`StartupPlan::settle_master`] is
/// called with the trust material, which only exists once the store is up.
pub fn build_plan(config: &Config, role: &RolePlan) -> StartupPlan {
    let orchestration = (role.start_master && role.embedded_orchestration).then(|| {
        OrchestrationConfig {
            master_host: config.master.host().to_string(),
            master_port: config.master.port(),
            node_hosts: node_hosts(config),
            portal_net: config.portal_net,
            master_service_namespace: config.master_service_namespace.clone(),
        }
    });

    let node = role.start_node.then(|| NodeConfig {
        bind_host: config.listen.host().to_string(),
        node_host: config.hostname.clone(),
        master_url: config.master.url(),
        store_url: config.etcd.url(),
        volume_dir: config.volume_dir.clone(),
        network_container_image: config.network_container_image.clone(),
        master_service_namespace: config.master_service_namespace.clone(),
        container_runtime: config.docker_endpoint.clone(),
    });

    StartupPlan {
        role: *role,
        store: role.start_store.then(|| store_config(config)),
        master: None,
        orchestration,
        node,
    }
}

impl StartupPlan {
    /// Fill in the master settings; `trust` is `None` for plain transport
    pub fn settle_master(
        &mut self,
        config: &Config,
        trust: Option<&TrustMaterial>,
    ) -> Result<()> {
        if self.role.start_master {
            self.master = Some(master_config(config, &self.role, trust)?);
        }
        Ok(())
    }
}
