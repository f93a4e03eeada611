//! Immutable node configuration
//!
//! A [`Config`] is built once from the command line and threaded by reference
//! through every bootstrap stage. Stages that fill in defaults return a new
//! `Config` rather than mutating the one they were given.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::addr::{Addr, AddrError};
use crate::{
    DEFAULT_MASTER_PORT, DEFAULT_NETWORK_CONTAINER_IMAGE, DEFAULT_PORTAL_NET, DEFAULT_STORE_PORT,
};

/// Errors building a [`Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An address flag could not be parsed
    #[error("invalid --{flag}: {source}")]
    Addr {
        /// Flag name without dashes
        flag: &'static str,
        /// Parse failure
        #[source]
        source: AddrError,
    },

    /// The portal network was not valid CIDR notation
    #[error("invalid CIDR {0:?}")]
    Cidr(String),
}

/// An IP network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    /// Network address
    pub addr: IpAddr,
    /// Prefix length in bits
    pub prefix: u8,
}

impl FromStr for Cidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConfigError::Cidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(err)?;
        let addr: IpAddr = addr.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(err());
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Everything the operator can tell a node at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to listen for connections on
    pub listen: Addr,
    /// Address the master is reachable at by the rest of the cluster
    pub master: Addr,
    /// Backing store address
    pub etcd: Addr,
    /// Workload-orchestration endpoint; unset means run it locally
    pub kubernetes: Addr,
    /// Range portal (service) IPs are allocated from
    pub portal_net: Cidr,
    /// Name this node registers with
    pub hostname: String,
    /// Volume storage directory
    pub volume_dir: PathBuf,
    /// Embedded store data directory
    pub etcd_dir: PathBuf,
    /// Certificate directory
    pub cert_dir: PathBuf,
    /// Storage schema version tag; empty selects the latest
    pub storage_version: String,
    /// Hostnames of every node the master should manage
    pub node_list: Vec<String>,
    /// Additional CORS origins for the API listener
    pub cors_allowed_origins: Vec<String>,
    /// Require an authentication token for API access
    pub require_authentication: bool,
    /// Namespace master services are injected from
    pub master_service_namespace: String,
    /// Container runtime endpoint
    pub docker_endpoint: String,
    /// Image used for per-workload network setup
    pub network_container_image: String,
}

impl Config {
    /// Default listen address (all interfaces, https)
    pub fn default_listen() -> Addr {
        Addr::unset("https", DEFAULT_MASTER_PORT).allow_prefix()
    }

    /// Default public master address (https)
    pub fn default_master() -> Addr {
        Addr::unset("https", DEFAULT_MASTER_PORT).allow_prefix()
    }

    /// Default store address (http)
    pub fn default_etcd() -> Addr {
        Addr::unset("http", DEFAULT_STORE_PORT)
    }

    /// Default orchestration endpoint (https, left unset)
    pub fn default_kubernetes() -> Addr {
        Addr::unset("https", DEFAULT_MASTER_PORT)
    }

    /// Start a builder with every default filled in
    pub fn builder(hostname: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(hostname.into())
    }
}

/// Builder applying operator flags on top of defaults
///
/// Address setters record the value as provided; anything left alone keeps
/// its default and stays not-provided. The first invalid flag is kept and
/// reported by [`ConfigBuilder::build`].
#[derive(Debug)]
pub struct ConfigBuilder {
    state: Result<Config, ConfigError>,
}

impl ConfigBuilder {
    fn new(hostname: String) -> Self {
        Self {
            state: Self::defaults(hostname),
        }
    }

    fn defaults(hostname: String) -> Result<Config, ConfigError> {
        Ok(Config {
            listen: Config::default_listen()
                .with_default("0.0.0.0:8443")
                .map_err(|source| ConfigError::Addr { flag: "listen", source })?,
            master: Config::default_master()
                .with_default("localhost:8443")
                .map_err(|source| ConfigError::Addr { flag: "master", source })?,
            etcd: Config::default_etcd()
                .with_default("0.0.0.0:4001")
                .map_err(|source| ConfigError::Addr { flag: "etcd", source })?,
            kubernetes: Config::default_kubernetes(),
            portal_net: DEFAULT_PORTAL_NET.parse()?,
            hostname,
            volume_dir: PathBuf::from("keystone.local.volumes"),
            etcd_dir: PathBuf::from("keystone.local.etcd"),
            cert_dir: PathBuf::from("keystone.local.certificates"),
            storage_version: String::new(),
            node_list: vec!["127.0.0.1".to_string()],
            cors_allowed_origins: Vec::new(),
            require_authentication: false,
            master_service_namespace: "default".to_string(),
            docker_endpoint: "unix:///var/run/docker.sock".to_string(),
            network_container_image: DEFAULT_NETWORK_CONTAINER_IMAGE.to_string(),
        })
    }

    fn update(mut self, f: impl FnOnce(&mut Config) -> Result<(), ConfigError>) -> Self {
        if let Ok(config) = &mut self.state {
            if let Err(e) = f(config) {
                self.state = Err(e);
            }
        }
        self
    }

    fn set_addr(self, flag: &'static str, value: &str) -> Self {
        self.update(|config| {
            let target = match flag {
                "listen" => &mut config.listen,
                "master" => &mut config.master,
                "etcd" => &mut config.etcd,
                _ => &mut config.kubernetes,
            };
            target
                .set(value)
                .map_err(|source| ConfigError::Addr { flag, source })
        })
    }

    /// `--listen`
    pub fn listen(self, value: &str) -> Self {
        self.set_addr("listen", value)
    }

    /// `--master`
    pub fn master(self, value: &str) -> Self {
        self.set_addr("master", value)
    }

    /// `--etcd`
    pub fn etcd(self, value: &str) -> Self {
        self.set_addr("etcd", value)
    }

    /// `--kubernetes`
    pub fn kubernetes(self, value: &str) -> Self {
        self.set_addr("kubernetes", value)
    }

    /// `--portal-net`
    pub fn portal_net(self, value: &str) -> Self {
        self.update(|config| {
            config.portal_net = value.parse()?;
            Ok(())
        })
    }

    /// `--volume-dir`
    pub fn volume_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.update(|config| {
            config.volume_dir = dir;
            Ok(())
        })
    }

    /// `--etcd-dir`
    pub fn etcd_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.update(|config| {
            config.etcd_dir = dir;
            Ok(())
        })
    }

    /// `--cert-dir`
    pub fn cert_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.update(|config| {
            config.cert_dir = dir;
            Ok(())
        })
    }

    /// `--storage-version`
    pub fn storage_version(self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.update(|config| {
            config.storage_version = version;
            Ok(())
        })
    }

    /// `--nodes`
    pub fn node_list(self, nodes: Vec<String>) -> Self {
        self.update(|config| {
            config.node_list = nodes;
            Ok(())
        })
    }

    /// `--cors-allowed-origins`
    pub fn cors_allowed_origins(self, origins: Vec<String>) -> Self {
        self.update(|config| {
            config.cors_allowed_origins = origins;
            Ok(())
        })
    }

    /// `--require-authentication`
    pub fn require_authentication(self, required: bool) -> Self {
        self.update(|config| {
            config.require_authentication = required;
            Ok(())
        })
    }

    /// `--master-service-namespace`
    pub fn master_service_namespace(self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.update(|config| {
            config.master_service_namespace = namespace;
            Ok(())
        })
    }

    /// `--docker`
    pub fn docker_endpoint(self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.update(|config| {
            config.docker_endpoint = endpoint;
            Ok(())
        })
    }

    /// Network container image (from the environment)
    pub fn network_container_image(self, image: impl Into<String>) -> Self {
        let image = image.into();
        self.update(|config| {
            config.network_container_image = image;
            Ok(())
        })
    }

    /// Finish, returning the first error encountered
    pub fn build(self) -> Result<Config, ConfigError> {
        self.state
    }
}

/// Split a comma-delimited flag value, dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::builder("node-a").build().unwrap();
        assert_eq!(config.listen.url(), "https://0.0.0.0:8443");
        assert_eq!(config.master.url(), "https://localhost:8443");
        assert_eq!(config.etcd.url(), "http://0.0.0.0:4001");
        assert!(!config.kubernetes.is_set());
        assert!(!config.listen.provided());
        assert!(!config.master.provided());
        assert!(!config.etcd.provided());
        assert!(!config.kubernetes.provided());
        assert_eq!(config.portal_net.to_string(), "172.30.17.0/24");
        assert_eq!(config.node_list, vec!["127.0.0.1"]);
        assert_eq!(config.master_service_namespace, "default");
        assert_eq!(config.hostname, "node-a");
    }

    #[test]
    fn flags_mark_addresses_provided() {
        let config = Config::builder("node-a")
            .master("203.0.113.9:9443")
            .etcd("store.internal")
            .build()
            .unwrap();
        assert!(config.master.provided());
        assert_eq!(config.master.url(), "https://203.0.113.9:9443");
        assert!(config.etcd.provided());
        assert_eq!(config.etcd.url(), "http://store.internal:4001");
        assert!(!config.listen.provided());
    }

    #[test]
    fn first_bad_flag_is_reported() {
        let err = Config::builder("node-a")
            .listen("host:notaport")
            .portal_net("10.0.0.0/99")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("--listen"));
    }

    #[test]
    fn cidr_parsing() {
        let cidr: Cidr = "10.1.0.0/16".parse().unwrap();
        assert_eq!(cidr.prefix, 16);
        assert!("10.1.0.0".parse::<Cidr>().is_err());
        assert!("10.1.0.0/33".parse::<Cidr>().is_err());
        assert!("fd00::/64".parse::<Cidr>().is_ok());
    }

    #[test]
    fn list_splitting_ignores_blanks() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
