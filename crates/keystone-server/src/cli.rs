//! Command line

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use keystone_common::config::{split_list, ConfigError};
use keystone_common::host::{hostname_or_fallback, SystemHostname};
use keystone_common::telemetry::LogFormat;
use keystone_common::{network_container_image, Config};

/// Keystone - single-binary cluster node bootstrap
#[derive(Parser, Debug)]
#[command(name = "keystone")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log line format: text or json
    #[arg(long, global = true, default_value = "text", env = "KEYSTONE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Keystone subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a master, a node, or both (the default)
    ///
    /// With no role the store, master, and node all run in this process.
    /// `master` skips the node; `node` runs only the agent and proxy and
    /// connects to an existing master.
    Start(StartArgs),
}

/// Arguments to `start`
#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Role to run: master or node (default: both)
    #[arg(value_name = "ROLE")]
    pub roles: Vec<String>,

    /// Address the master listens on
    #[arg(long)]
    pub listen: Option<String>,

    /// Public master address (discovered when omitted)
    #[arg(long)]
    pub master: Option<String>,

    /// Store address; the store is embedded when omitted
    #[arg(long)]
    pub etcd: Option<String>,

    /// Workload-orchestration endpoint; orchestration is embedded when omitted
    #[arg(long)]
    pub kubernetes: Option<String>,

    /// Service network CIDR
    #[arg(long)]
    pub portal_net: Option<String>,

    /// Directory for workload volumes
    #[arg(long)]
    pub volume_dir: Option<PathBuf>,

    /// Directory for embedded store data
    #[arg(long)]
    pub etcd_dir: Option<PathBuf>,

    /// Directory for certificates
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Name this node registers under (default: `hostname -f`)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Comma-separated node names to register with embedded orchestration
    #[arg(long)]
    pub nodes: Option<String>,

    /// Comma-separated CORS origins for the API
    #[arg(long)]
    pub cors_allowed_origins: Option<String>,

    /// Reject anonymous API requests
    #[arg(long)]
    pub require_authentication: bool,

    /// Namespace holding the master service
    #[arg(long)]
    pub master_service_namespace: Option<String>,

    /// Storage schema version tag
    #[arg(long)]
    pub storage_version: Option<String>,

    /// Container runtime endpoint
    #[arg(long, env = "DOCKER_HOST")]
    pub docker: Option<String>,
}

impl StartArgs {
    /// Build the immutable configuration these flags describe
    pub fn to_config(&self) -> Result<Config, ConfigError> {
        let hostname = self
            .hostname
            .clone()
            .unwrap_or_else(|| hostname_or_fallback(&SystemHostname));
        let mut builder = Config::builder(hostname)
            .require_authentication(self.require_authentication)
            .network_container_image(network_container_image());

        if let Some(v) = &self.listen {
            builder = builder.listen(v);
        }
        if let Some(v) = &self.master {
            builder = builder.master(v);
        }
        if let Some(v) = &self.etcd {
            builder = builder.etcd(v);
        }
        if let Some(v) = &self.kubernetes {
            builder = builder.kubernetes(v);
        }
        if let Some(v) = &self.portal_net {
            builder = builder.portal_net(v);
        }
        if let Some(v) = &self.volume_dir {
            builder = builder.volume_dir(v);
        }
        if let Some(v) = &self.etcd_dir {
            builder = builder.etcd_dir(v);
        }
        if let Some(v) = &self.cert_dir {
            builder = builder.cert_dir(v);
        }
        if let Some(v) = &self.nodes {
            builder = builder.node_list(split_list(v));
        }
        if let Some(v) = &self.cors_allowed_origins {
            builder = builder.cors_allowed_origins(split_list(v));
        }
        if let Some(v) = &self.master_service_namespace {
            builder = builder.master_service_namespace(v);
        }
        if let Some(v) = &self.storage_version {
            builder = builder.storage_version(v);
        }
        if let Some(v) = &self.docker {
            builder = builder.docker_endpoint(v);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> StartArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Start(args) => args,
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn positional_roles_collected() {
        assert!(parse(&["keystone", "start"]).roles.is_empty());
        assert_eq!(parse(&["keystone", "start", "node"]).roles, vec!["node"]);
        assert_eq!(
            parse(&["keystone", "start", "master", "node"]).roles,
            vec!["master", "node"]
        );
    }

    #[test]
    fn flags_become_provided_addresses() {
        let args = parse(&[
            "keystone",
            "start",
            "master",
            "--master=203.0.113.9:9443",
            "--hostname=node1",
            "--nodes=a, b",
            "--cors-allowed-origins=console.example.com",
            "--require-authentication",
        ]);
        let config = args.to_config().unwrap();

        assert!(config.master.provided());
        assert_eq!(config.master.url(), "https://203.0.113.9:9443");
        assert!(!config.etcd.provided());
        assert_eq!(config.hostname, "node1");
        assert_eq!(config.node_list, vec!["a", "b"]);
        assert_eq!(config.cors_allowed_origins, vec!["console.example.com"]);
        assert!(config.require_authentication);
    }

    #[test]
    fn bad_address_reported_with_flag_name() {
        let args = parse(&[
            "keystone",
            "start",
            "--etcd=http://store:notaport",
            "--hostname=h",
        ]);
        let err = args.to_config().unwrap_err();
        assert!(err.to_string().contains("--etcd"));
    }

    #[test]
    fn log_format_is_global() {
        let cli = Cli::try_parse_from(["keystone", "start", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["keystone", "--log-format", "yaml", "start"]).is_err());
    }
}
