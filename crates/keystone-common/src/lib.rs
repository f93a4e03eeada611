//! Common types for keystone: configuration, addresses, errors, telemetry

#![deny(missing_docs)]

pub mod addr;
pub mod config;
pub mod error;
pub mod host;
pub mod network;
pub mod telemetry;

pub use addr::Addr;
pub use config::Config;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default port for the master API listener
pub const DEFAULT_MASTER_PORT: u16 = 8443;

/// Default port for the backing store's client API
pub const DEFAULT_STORE_PORT: u16 = 4001;

/// Default portal (service) network
pub const DEFAULT_PORTAL_NET: &str = "172.30.17.0/24";

/// Container bridge address workloads use to call back to the master
pub const CONTAINER_BRIDGE_ADDR: &str = "172.17.42.1";

/// Environment variable overriding the per-workload network container image
pub const NETWORK_CONTAINER_IMAGE_ENV: &str = "KUBERNETES_NETWORK_CONTAINER_IMAGE";

/// Default per-workload network container image
pub const DEFAULT_NETWORK_CONTAINER_IMAGE: &str = "kubernetes/pause:latest";

/// Read the network container image from the environment, falling back to the
/// built-in default
pub fn network_container_image() -> String {
    std::env::var(NETWORK_CONTAINER_IMAGE_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_NETWORK_CONTAINER_IMAGE.to_string())
}
