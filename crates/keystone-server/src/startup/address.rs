//! Address negotiation
//!
//! Fills in every address the operator left out, before anything binds or
//! dials. The fallback chain is:
//!
//! - master: listen scheme/port if `--listen` was given, else the master
//!   defaults, with the host's first routable IPv4 as the host
//! - store: the discovered IP when the master was discovered, otherwise the
//!   master host, always on the store's default port
//! - orchestration endpoint: the master address

use keystone_common::addr::{join_host_port, AddrError};
use keystone_common::network::{default_local_ipv4, LocalAddressSource};
use keystone_common::{Addr, Config, Error, Result};

fn negotiated(field: &str, err: AddrError) -> Error {
    Error::address_discovery(format!("negotiated {} address is invalid: {}", field, err))
}

fn store_on(host: &str, etcd: &Addr) -> Result<Addr> {
    let url = format!(
        "{}://{}",
        etcd.scheme(),
        join_host_port(host, etcd.default_port())
    );
    etcd.provided_with(&url).map_err(|e| negotiated("store", e))
}

/// Return a copy of `config` with every address concrete and marked provided
///
/// Running this on its own output returns the same value.
pub fn negotiate(config: &Config, source: &dyn LocalAddressSource) -> Result<Config> {
    let mut out = config.clone();

    if !config.master.provided() {
        let (scheme, port) = if config.listen.provided() {
            (config.listen.scheme(), config.listen.port())
        } else {
            (config.master.scheme(), config.master.default_port())
        };

        let ip = default_local_ipv4(source)?;
        let url = format!("{}://{}", scheme, join_host_port(&ip.to_string(), port));
        out.master = config
            .master
            .provided_with(&url)
            .map_err(|e| negotiated("master", e))?;
        tracing::info!(master = %out.master, "Discovered master address");

        if !config.etcd.provided() {
            out.etcd = store_on(&ip.to_string(), &config.etcd)?;
        }
    } else if !config.etcd.provided() {
        out.etcd = store_on(config.master.host(), &config.etcd)?;
    }

    if !config.kubernetes.provided() {
        out.kubernetes = out.master.clone();
    }

    Ok(out)
}
