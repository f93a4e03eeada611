//! Startup sequencing
//!
//! Master launch order: API server, embedded orchestration loops, event
//! recorder, asset server, then the platform controllers. Node launch order:
//! volume directory, container runtime check, proxy, agent.

use std::future::Future;
use std::path::Path;

use keystone_common::{Error, Result};
use keystone_infra::ClientConfigFile;

use super::plan::{MasterConfig, NodeConfig, OrchestrationConfig, StoreConfig};
use crate::launcher::{LaunchSpec, Launcher};

/// Store program
pub const STORE_PROGRAM: &str = "etcd";
/// API server program
pub const API_SERVER_PROGRAM: &str = "keystone-apiserver";
/// Orchestration control loop program
pub const ORCHESTRATOR_PROGRAM: &str = "keystone-orchestrator";
/// Controller program
pub const CONTROLLER_PROGRAM: &str = "keystone-controller";
/// Asset server program
pub const ASSETS_PROGRAM: &str = "keystone-assets";
/// Network proxy program
pub const PROXY_PROGRAM: &str = "keystone-proxy";
/// Node agent program
pub const AGENT_PROGRAM: &str = "keystone-agent";

/// Environment variable carrying the roots the API server authenticates
/// clients against
pub const MASTER_ROOTS_ENV: &str = "KEYSTONE_MASTER_ROOTS";

/// Orchestration control loops, in start order
pub const ORCHESTRATION_LOOPS: [&str; 4] = ["scheduler", "replication", "endpoint", "node"];

/// Which client identity a controller runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerClient {
    PlatformApi,
    DeploymentTrigger,
}

/// Platform controllers, in start order
const CONTROLLERS: [(&str, ControllerClient); 6] = [
    ("build", ControllerClient::PlatformApi),
    ("build-image-trigger", ControllerClient::PlatformApi),
    ("deployment", ControllerClient::DeploymentTrigger),
    ("deployment-config", ControllerClient::PlatformApi),
    ("deployment-config-change", ControllerClient::DeploymentTrigger),
    ("deployment-image-trigger", ControllerClient::DeploymentTrigger),
];

/// Container runtime endpoint schemes the agent understands
const RUNTIME_SCHEMES: [&str; 2] = ["unix://", "tcp://"];

fn with_client(spec: LaunchSpec, client: &ClientConfigFile) -> LaunchSpec {
    let mut spec = spec.flag("master", &client.server);
    if let (Some(ca), Some(cert), Some(key)) = (
        &client.certificate_authority,
        &client.client_certificate,
        &client.client_key,
    ) {
        spec = spec
            .flag("certificate-authority", ca.display())
            .flag("client-certificate", cert.display())
            .flag("client-key", key.display());
    }
    spec
}

/// Launch spec for the embedded store
pub fn store_spec(store: &StoreConfig) -> LaunchSpec {
    LaunchSpec::new("store", STORE_PROGRAM)
        .flag("name", "keystone")
        .flag("data-dir", store.data_dir.display())
        .flag("listen-client-urls", format!("http://{}", store.client_bind))
        .flag("advertise-client-urls", &store.advertise_url)
        .flag("listen-peer-urls", format!("http://{}", store.peer_bind))
}

/// Launch spec for the API server
pub fn api_server_spec(master: &MasterConfig) -> LaunchSpec {
    let mut spec = LaunchSpec::new("api-server", API_SERVER_PROGRAM)
        .flag("bind-address", &master.bind_addr)
        .flag("public-url", &master.master_url)
        .flag("store-url", &master.store_url)
        .flag("orchestration-url", &master.orchestration_url)
        .flag("portal-net", master.portal_net)
        .flag("master-service-namespace", &master.master_service_namespace)
        .flag("cors-allowed-origins", master.cors_allowed_origins.join(","))
        .flag("auth-issuer", &master.auth.master_url)
        .switch("require-authentication", master.require_authentication);

    if let Some(roots) = &master.auth.master_roots_pem {
        spec = spec.env(MASTER_ROOTS_ENV, roots);
    }

    if !master.storage_version.is_empty() {
        spec = spec.flag("storage-version", &master.storage_version);
    }
    if let Some(tls) = &master.tls {
        spec = spec
            .flag("tls-cert-file", tls.cert_file.display())
            .flag("tls-key-file", tls.key_file.display())
            .flag("client-ca-file", tls.client_ca_file.display());
    }
    spec
}

/// Launch specs for the embedded orchestration loops
pub fn orchestration_specs(
    orchestration: &OrchestrationConfig,
    client: &ClientConfigFile,
) -> Vec<LaunchSpec> {
    ORCHESTRATION_LOOPS
        .iter()
        .map(|name| {
            let spec = LaunchSpec::new(format!("{}-loop", name), ORCHESTRATOR_PROGRAM)
                .flag("loop", name)
                .flag("master-service-host", &orchestration.master_host)
                .flag("master-service-port", orchestration.master_port)
                .flag("portal-net", orchestration.portal_net)
                .flag(
                    "master-service-namespace",
                    &orchestration.master_service_namespace,
                );
            let spec = if *name == "node" {
                spec.flag("nodes", orchestration.node_hosts.join(","))
            } else {
                spec
            };
            with_client(spec, client)
        })
        .collect()
}

/// Launch spec for event recording
pub fn event_recorder_spec(master: &MasterConfig) -> LaunchSpec {
    with_client(
        LaunchSpec::new("event-recorder", CONTROLLER_PROGRAM).flag("controller", "event-recorder"),
        &master.clients.orchestration,
    )
}

/// Launch spec for the asset listener
pub fn assets_spec(master: &MasterConfig) -> LaunchSpec {
    let mut spec = LaunchSpec::new("asset-server", ASSETS_PROGRAM)
        .flag("bind-address", &master.asset_addr)
        .flag("public-url", &master.asset_url)
        .flag("master-url", &master.master_url);
    if let Some(tls) = &master.tls {
        spec = spec
            .flag("tls-cert-file", tls.cert_file.display())
            .flag("tls-key-file", tls.key_file.display());
    }
    spec
}

/// Launch specs for the platform controllers
pub fn controller_specs(master: &MasterConfig) -> Vec<LaunchSpec> {
    CONTROLLERS
        .iter()
        .map(|(name, client)| {
            let client = match client {
                ControllerClient::PlatformApi => &master.clients.platform_api,
                ControllerClient::DeploymentTrigger => &master.clients.deployment_trigger,
            };
            with_client(
                LaunchSpec::new(format!("{}-controller", name), CONTROLLER_PROGRAM)
                    .flag("controller", name),
                client,
            )
        })
        .collect()
}

/// Launch spec for the network proxy
pub fn proxy_spec(node: &NodeConfig) -> LaunchSpec {
    LaunchSpec::new("proxy", PROXY_PROGRAM)
        .flag("bind-address", &node.bind_host)
        .flag("store-url", &node.store_url)
}

/// Launch spec for the node agent
pub fn agent_spec(node: &NodeConfig) -> LaunchSpec {
    LaunchSpec::new("agent", AGENT_PROGRAM)
        .flag("hostname", &node.node_host)
        .flag("bind-address", &node.bind_host)
        .flag("master", &node.master_url)
        .flag("store-url", &node.store_url)
        .flag("root-dir", node.volume_dir.display())
        .flag("network-container-image", &node.network_container_image)
        .flag("master-service-namespace", &node.master_service_namespace)
        .flag("container-runtime-endpoint", &node.container_runtime)
}

/// Launch the embedded store
pub async fn start_store(launcher: &dyn Launcher, store: &StoreConfig) -> Result<()> {
    tokio::fs::create_dir_all(&store.data_dir)
        .await
        .map_err(|e| {
            Error::dependency_start(
                "store",
                format!("cannot create {}: {}", store.data_dir.display(), e),
            )
        })?;
    launcher.launch(store_spec(store)).await
}

/// Launch the master and, when embedded, the orchestration loops
pub async fn start_master(
    launcher: &dyn Launcher,
    master: &MasterConfig,
    orchestration: Option<&OrchestrationConfig>,
) -> Result<()> {
    launcher.launch(api_server_spec(master)).await?;
    tracing::info!(url = %master.master_url, "API server started");

    if let Some(orchestration) = orchestration {
        for spec in orchestration_specs(orchestration, &master.clients.orchestration) {
            launcher.launch(spec).await?;
        }
        tracing::info!("Embedded orchestration started");
    }

    launcher.launch(event_recorder_spec(master)).await?;
    launcher.launch(assets_spec(master)).await?;
    tracing::info!(url = %master.asset_url, "Asset server started");

    for spec in controller_specs(master) {
        launcher.launch(spec).await?;
    }
    tracing::info!("Controllers started");
    Ok(())
}

/// Check the container runtime endpoint looks usable
pub fn ensure_container_runtime(endpoint: &str) -> Result<()> {
    let Some(scheme) = RUNTIME_SCHEMES.iter().find(|s| endpoint.starts_with(**s)) else {
        return Err(Error::dependency_start(
            "container-runtime",
            format!(
                "unsupported endpoint {:?}, expected unix:// or tcp://",
                endpoint
            ),
        ));
    };

    let target = &endpoint[scheme.len()..];
    if target.is_empty() {
        return Err(Error::dependency_start(
            "container-runtime",
            format!("endpoint {:?} has no target", endpoint),
        ));
    }
    if *scheme == "unix://" && !Path::new(target).exists() {
        tracing::warn!(socket = %target, "Container runtime socket not present yet");
    }
    Ok(())
}

/// Prepare the node and launch the proxy and agent
pub async fn start_node(launcher: &dyn Launcher, node: &NodeConfig) -> Result<()> {
    tokio::fs::create_dir_all(&node.volume_dir)
        .await
        .map_err(|e| {
            Error::dependency_start(
                "volume-dir",
                format!("cannot create {}: {}", node.volume_dir.display(), e),
            )
        })?;
    ensure_container_runtime(&node.container_runtime)?;

    launcher.launch(proxy_spec(node)).await?;
    launcher.launch(agent_spec(node)).await?;
    tracing::info!(node = %node.node_host, "Node started");
    Ok(())
}

/// Wait for `shutdown`
///
/// Collaborators keep running until then; nothing is drained.
pub async fn park<F>(shutdown: F)
where
    F: Future<Output = ()>,
{
    tracing::info!("Startup complete, waiting for shutdown signal");
    shutdown.await;
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use keystone_common::config::Cidr;

    use super::*;
    use crate::launcher::MockLauncher;
    use crate::startup::plan::{AuthConfig, ClientConfigs, ListenerTls};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LaunchSpec>>);

    impl Recorder {
        fn components(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.component.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Launcher for Recorder {
        async fn launch(&self, spec: LaunchSpec) -> Result<()> {
            self.0.lock().unwrap().push(spec);
            Ok(())
        }
    }

    fn authenticated(name: &str) -> ClientConfigFile {
        let dir = PathBuf::from("/certs").join(name);
        ClientConfigFile {
            server: "https://10.0.0.5:8443".to_string(),
            certificate_authority: Some(dir.join("root.crt")),
            client_certificate: Some(dir.join("cert.crt")),
            client_key: Some(dir.join("key.key")),
        }
    }

    fn portal() -> Cidr {
        "172.30.17.0/24".parse().unwrap()
    }

    fn master() -> MasterConfig {
        MasterConfig {
            bind_addr: "0.0.0.0:8443".to_string(),
            master_url: "https://10.0.0.5:8443".to_string(),
            asset_addr: "10.0.0.5:8444".to_string(),
            asset_url: "https://10.0.0.5:8444".to_string(),
            store_url: "http://10.0.0.5:4001".to_string(),
            orchestration_url: "https://10.0.0.5:8443".to_string(),
            portal_net: portal(),
            require_authentication: false,
            storage_version: String::new(),
            master_service_namespace: "default".to_string(),
            cors_allowed_origins: vec!["localhost".to_string()],
            tls: Some(ListenerTls {
                cert_file: PathBuf::from("/certs/master-server/cert.crt"),
                key_file: PathBuf::from("/certs/master-server/key.key"),
                client_ca_file: PathBuf::from("/certs/ca-bundle.crt"),
            }),
            auth: AuthConfig {
                master_url: "https://10.0.0.5:8443".to_string(),
                master_roots_pem: Some("-----BEGIN CERTIFICATE-----\n".to_string()),
            },
            clients: ClientConfigs {
                platform_api: authenticated("platform-api-client"),
                deployment_trigger: authenticated("deployment-trigger-client"),
                admin: authenticated("admin-client"),
                orchestration: authenticated("workload-orchestration-client"),
            },
        }
    }

    fn orchestration() -> OrchestrationConfig {
        OrchestrationConfig {
            master_host: "10.0.0.5".to_string(),
            master_port: 8443,
            node_hosts: vec!["node1".to_string()],
            portal_net: portal(),
            master_service_namespace: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn master_components_start_in_dependency_order() {
        let recorder = Recorder::default();
        start_master(&recorder, &master(), Some(&orchestration()))
            .await
            .unwrap();

        assert_eq!(
            recorder.components(),
            vec![
                "api-server",
                "scheduler-loop",
                "replication-loop",
                "endpoint-loop",
                "node-loop",
                "event-recorder",
                "asset-server",
                "build-controller",
                "build-image-trigger-controller",
                "deployment-controller",
                "deployment-config-controller",
                "deployment-config-change-controller",
                "deployment-image-trigger-controller",
            ]
        );
    }

    #[tokio::test]
    async fn external_orchestration_skips_loops() {
        let recorder = Recorder::default();
        start_master(&recorder, &master(), None).await.unwrap();

        let components = recorder.components();
        assert_eq!(components[0], "api-server");
        assert_eq!(components[1], "event-recorder");
        assert!(!components.iter().any(|c| c.ends_with("-loop")));
    }

    #[tokio::test]
    async fn first_launch_failure_stops_sequence() {
        let mut launcher = MockLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .returning(|spec| Err(Error::dependency_start(spec.component, "address in use")));

        let err = start_master(&launcher, &master(), Some(&orchestration()))
            .await
            .unwrap_err();
        assert_eq!(err.component(), Some("api-server"));
    }

    #[test]
    fn controllers_use_their_own_identity() {
        let specs = controller_specs(&master());
        let key_for = |component: &str| {
            specs
                .iter()
                .find(|s| s.component == component)
                .and_then(|s| s.flag_value("client-key"))
                .map(str::to_string)
        };

        assert_eq!(
            key_for("build-controller").as_deref(),
            Some("/certs/platform-api-client/key.key")
        );
        assert_eq!(
            key_for("deployment-controller").as_deref(),
            Some("/certs/deployment-trigger-client/key.key")
        );
    }

    #[test]
    fn api_server_gets_listener_tls_and_bundle() {
        let spec = api_server_spec(&master());
        assert_eq!(spec.flag_value("client-ca-file"), Some("/certs/ca-bundle.crt"));
        assert_eq!(spec.flag_value("cors-allowed-origins"), Some("localhost"));
        assert_eq!(spec.flag_value("storage-version"), None);
    }

    #[test]
    fn api_server_authenticates_against_master_roots() {
        let spec = api_server_spec(&master());
        assert_eq!(spec.flag_value("auth-issuer"), Some("https://10.0.0.5:8443"));
        assert_eq!(
            spec.env,
            vec![(
                MASTER_ROOTS_ENV.to_string(),
                "-----BEGIN CERTIFICATE-----\n".to_string()
            )]
        );

        let mut plain = master();
        plain.auth.master_roots_pem = None;
        assert!(api_server_spec(&plain).env.is_empty());
    }

    #[test]
    fn orchestration_loops_know_the_master_service_address() {
        let specs = orchestration_specs(&orchestration(), &master().clients.orchestration);
        assert_eq!(specs.len(), ORCHESTRATION_LOOPS.len());
        for spec in &specs {
            assert_eq!(spec.flag_value("master-service-host"), Some("10.0.0.5"));
            assert_eq!(spec.flag_value("master-service-port"), Some("8443"));
        }
        let node_loop = specs.iter().find(|s| s.component == "node-loop").unwrap();
        assert_eq!(node_loop.flag_value("nodes"), Some("node1"));
    }

    #[test]
    fn anonymous_clients_pass_only_master() {
        let spec = with_client(
            LaunchSpec::new("x", "y"),
            &ClientConfigFile::anonymous("http://10.0.0.5:8443"),
        );
        assert_eq!(spec.args, vec!["--master", "http://10.0.0.5:8443"]);
    }

    #[test]
    fn container_runtime_endpoint_validation() {
        assert!(ensure_container_runtime("unix:///var/run/docker.sock").is_ok());
        assert!(ensure_container_runtime("tcp://10.0.0.5:2375").is_ok());

        let err = ensure_container_runtime("http://10.0.0.5:2375").unwrap_err();
        assert_eq!(err.component(), Some("container-runtime"));
        assert!(ensure_container_runtime("tcp://").is_err());
    }

    #[tokio::test]
    async fn node_prepares_volume_dir_then_starts_proxy_and_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let node = NodeConfig {
            bind_host: "0.0.0.0".to_string(),
            node_host: "node1".to_string(),
            master_url: "https://10.0.0.5:8443".to_string(),
            store_url: "http://10.0.0.5:4001".to_string(),
            volume_dir: tmp.path().join("volumes"),
            network_container_image: "kubernetes/pause:latest".to_string(),
            master_service_namespace: "default".to_string(),
            container_runtime: "tcp://127.0.0.1:2375".to_string(),
        };

        let recorder = Recorder::default();
        start_node(&recorder, &node).await.unwrap();

        assert!(node.volume_dir.is_dir());
        assert_eq!(recorder.components(), vec!["proxy", "agent"]);
    }

    #[tokio::test]
    async fn park_returns_on_shutdown() {
        park(async {}).await;
    }
}
