//! Bootstrap stages
//!
//! Each stage consumes the previous stage's output: role, addresses, store
//! readiness, trust, and finally the launch sequence.

mod address;
mod plan;
mod polling;
mod role;
mod sequencer;
mod store;
mod trust;

pub use address::negotiate;
pub use plan::{
    asset_addr, build_plan, cors_origins, node_hosts, store_config, AuthConfig, ClientConfigs,
    ListenerTls, MasterConfig, NodeConfig, OrchestrationConfig, StartupPlan, StoreConfig,
    STORE_PEER_PORT,
};
pub use polling::{poll_until_ready, PollBudget, PollExhausted};
pub use role::{resolve_role, Role, RolePlan};
pub use sequencer::{
    agent_spec, api_server_spec, ensure_container_runtime, park, proxy_spec, start_master,
    start_node, start_store, store_spec, MASTER_ROOTS_ENV, ORCHESTRATION_LOOPS,
};
pub use store::{wait_for_store, EtcdProbe, ProbeError, ProbeOutcome, StoreProbe};
pub use trust::{
    bootstrap_trust, client_roles, server_sans, ClientCredentials, TrustMaterial, ADMIN_CLIENT,
    DEPLOYMENT_TRIGGER_CLIENT, MASTER_SERVER, PLATFORM_API_CLIENT, WORKLOAD_ORCHESTRATION_CLIENT,
};
