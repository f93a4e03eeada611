//! Hostname lookup

use std::process::Command;

/// Name used when the hostname cannot be determined
pub const FALLBACK_HOSTNAME: &str = "localhost";

/// Source of this machine's hostname
#[cfg_attr(test, mockall::automock)]
pub trait HostnameSource: Send + Sync {
    /// Look up the hostname
    fn hostname(&self) -> std::io::Result<String>;
}

/// Fully qualified hostname from `hostname -f`
///
/// The FQDN is what other nodes resolve; the kernel hostname alone is often a
/// short name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostname;

impl HostnameSource for SystemHostname {
    fn hostname(&self) -> std::io::Result<String> {
        let output = Command::new("hostname").arg("-f").output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "hostname -f exited with {}",
                output.status
            )));
        }
        fqdn_from_output(&output.stdout)
    }
}

fn fqdn_from_output(stdout: &[u8]) -> std::io::Result<String> {
    let fqdn = String::from_utf8_lossy(stdout).trim().to_string();
    if fqdn.is_empty() {
        return Err(std::io::Error::other("hostname -f returned nothing"));
    }
    Ok(fqdn)
}

/// Hostname from `source`, or [`FALLBACK_HOSTNAME`] with a warning when
/// lookup fails
pub fn hostname_or_fallback(source: &dyn HostnameSource) -> String {
    match source.hostname() {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(
                error = %e,
                fallback = FALLBACK_HOSTNAME,
                "Unable to look up hostname, using fallback"
            );
            FALLBACK_HOSTNAME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_lookup_falls_back_to_localhost() {
        let mut source = MockHostnameSource::new();
        source
            .expect_hostname()
            .times(1)
            .returning(|| Err(std::io::Error::other("hostname: not found")));

        assert_eq!(hostname_or_fallback(&source), FALLBACK_HOSTNAME);
    }

    #[test]
    fn successful_lookup_is_used_as_is() {
        let mut source = MockHostnameSource::new();
        source
            .expect_hostname()
            .returning(|| Ok("node1.example.com".to_string()));

        assert_eq!(hostname_or_fallback(&source), "node1.example.com");
    }

    #[test]
    fn command_output_is_trimmed_and_must_be_non_empty() {
        assert_eq!(
            fqdn_from_output(b"node1.example.com\n").unwrap(),
            "node1.example.com"
        );
        assert!(fqdn_from_output(b"  \n").is_err());
    }
}
