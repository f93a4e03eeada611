//! Client configuration files
//!
//! Each internal client (the platform API client, the deployment trigger, the
//! admin, the orchestration layer) reads one of these to find the master and
//! the credentials to present to it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pki::{PkiError, Result};

/// Connection settings for one internal client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigFile {
    /// Master URL the client talks to
    pub server: String,
    /// Roots to verify the server with; absent for plain transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<PathBuf>,
    /// Certificate presented to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<PathBuf>,
    /// Private key for `client_certificate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
}

impl ClientConfigFile {
    /// Config for a client that connects without credentials
    pub fn anonymous(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            certificate_authority: None,
            client_certificate: None,
            client_key: None,
        }
    }

    /// Whether the client presents a certificate
    pub fn is_authenticated(&self) -> bool {
        self.client_certificate.is_some()
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| PkiError::Serialization(e.to_string()))
    }

    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PkiError::Serialization(e.to_string()))
    }

    /// Write the YAML form to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|e| PkiError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_config_omits_credentials() {
        let config = ClientConfigFile::anonymous("http://10.0.0.5:8443");
        let yaml = config.to_yaml().unwrap();

        assert!(yaml.contains("server: http://10.0.0.5:8443"));
        assert!(!yaml.contains("clientCertificate"));
        assert!(!config.is_authenticated());
    }

    #[test]
    fn authenticated_config_parses_back() {
        let config = ClientConfigFile {
            server: "https://10.0.0.5:8443".to_string(),
            certificate_authority: Some(PathBuf::from("/certs/admin-client/root.crt")),
            client_certificate: Some(PathBuf::from("/certs/admin-client/cert.crt")),
            client_key: Some(PathBuf::from("/certs/admin-client/key.key")),
        };

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("certificateAuthority"));

        let parsed = ClientConfigFile::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.is_authenticated());
    }
}
