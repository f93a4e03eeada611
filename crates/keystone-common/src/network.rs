//! Local network address discovery
//!
//! When the operator does not say where the master is reachable, keystone
//! picks the first IPv4 address on an interface that is up and not loopback.
//! That is the address other hosts (and containers on this host) will most
//! likely be able to reach.

use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use crate::{Error, Result};

/// One IPv4 address bound to a local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Interface name (e.g., "eth0")
    pub interface: String,
    /// Address assigned to the interface
    pub ip: Ipv4Addr,
    /// Interface is administratively up
    pub up: bool,
    /// Interface is a loopback device
    pub loopback: bool,
}

/// Source of local interface addresses
///
/// Abstracted so address negotiation can be tested without depending on the
/// host's real interface table.
#[cfg_attr(test, mockall::automock)]
pub trait LocalAddressSource: Send + Sync {
    /// List IPv4 addresses in interface-table order
    fn ipv4_addresses(&self) -> Result<Vec<InterfaceAddress>>;
}

/// Reads addresses from the host's interface table
#[derive(Debug, Clone, Copy, Default)]
pub struct HostInterfaces;

impl LocalAddressSource for HostInterfaces {
    fn ipv4_addresses(&self) -> Result<Vec<InterfaceAddress>> {
        let addrs = getifaddrs()
            .map_err(|e| Error::address_discovery(format!("failed to list interfaces: {}", e)))?;

        Ok(addrs
            .filter_map(|ifa| {
                let sin = ifa.address.as_ref()?.as_sockaddr_in()?;
                Some(InterfaceAddress {
                    ip: *SocketAddrV4::from(*sin).ip(),
                    up: ifa.flags.contains(InterfaceFlags::IFF_UP),
                    loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                    interface: ifa.interface_name,
                })
            })
            .collect())
    }
}

/// Select the default routable IPv4 address from `source`
///
/// Returns `AddressDiscoveryFailed` when no up, non-loopback IPv4 address
/// exists.
pub fn default_local_ipv4(source: &dyn LocalAddressSource) -> Result<Ipv4Addr> {
    let addrs = source.ipv4_addresses()?;
    let chosen = addrs
        .iter()
        .find(|a| a.up && !a.loopback && !a.ip.is_loopback() && !a.ip.is_unspecified());

    match chosen {
        Some(addr) => {
            tracing::debug!(interface = %addr.interface, ip = %addr.ip, "selected local address");
            Ok(addr.ip)
        }
        None => Err(Error::address_discovery(format!(
            "no usable IPv4 address among {} candidates; pass --master explicitly",
            addrs.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: [u8; 4], up: bool, loopback: bool) -> InterfaceAddress {
        InterfaceAddress {
            interface: name.to_string(),
            ip: Ipv4Addr::from(ip),
            up,
            loopback,
        }
    }

    #[test]
    fn skips_loopback_and_down_interfaces() {
        let mut source = MockLocalAddressSource::new();
        source.expect_ipv4_addresses().returning(|| {
            Ok(vec![
                iface("lo", [127, 0, 0, 1], true, true),
                iface("eth1", [192, 168, 1, 10], false, false),
                iface("eth0", [10, 0, 0, 5], true, false),
                iface("docker0", [172, 17, 42, 1], true, false),
            ])
        });

        assert_eq!(
            default_local_ipv4(&source).unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn fails_when_only_loopback_exists() {
        let mut source = MockLocalAddressSource::new();
        source
            .expect_ipv4_addresses()
            .returning(|| Ok(vec![iface("lo", [127, 0, 0, 1], true, true)]));

        let err = default_local_ipv4(&source).unwrap_err();
        assert!(matches!(err, Error::AddressDiscoveryFailed { .. }));
        assert!(err.to_string().contains("--master"));
    }

    #[test]
    fn interface_listing_errors_propagate() {
        let mut source = MockLocalAddressSource::new();
        source
            .expect_ipv4_addresses()
            .returning(|| Err(Error::address_discovery("permission denied")));

        assert!(default_local_ipv4(&source).is_err());
    }
}
