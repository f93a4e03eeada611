//! Collaborator launching
//!
//! Every collaborator (store, API server, controllers, proxy, agent) is a
//! separate program. The sequencer describes each one as a [`LaunchSpec`] and
//! hands it to a [`Launcher`]; the production launcher spawns a child process
//! and leaves it running.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use keystone_common::{Error, Result};

/// How to start one collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Component name used in logs and errors
    pub component: String,
    /// Program to execute
    pub program: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Start a spec for `component` running `program`
    pub fn new(component: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append `--name value`
    pub fn flag(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.args.push(format!("--{}", name));
        self.args.push(value.to_string());
        self
    }

    /// Append `--name` when `enabled`
    pub fn switch(mut self, name: &str, enabled: bool) -> Self {
        if enabled {
            self.args.push(format!("--{}", name));
        }
        self
    }

    /// Value following `--name`, if present
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        let flag = format!("--{}", name);
        self.args
            .iter()
            .position(|a| *a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Starts collaborators
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the collaborator and return once it has been started
    ///
    /// Failing to start is reported as `DependencyStartFailed`; the
    /// collaborator's later exit is not.
    async fn launch(&self, spec: LaunchSpec) -> Result<()>;
}

/// Spawns each collaborator as a child process
///
/// Children are killed when the runtime shuts down.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<()> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::dependency_start(
                    &spec.component,
                    format!("failed to execute {}: {}", spec.program, e),
                )
            })?;

        tracing::info!(
            component = %spec.component,
            program = %spec.program,
            pid = child.id(),
            "Started"
        );

        let component = spec.component;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(component = %component, "Exited");
                }
                Ok(status) => {
                    tracing::error!(component = %component, %status, "Exited with failure");
                }
                Err(e) => {
                    tracing::error!(component = %component, error = %e, "Lost track of process");
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_switches() {
        let spec = LaunchSpec::new("api-server", "keystone-apiserver")
            .flag("bind-address", "0.0.0.0:8443")
            .switch("require-authentication", true)
            .switch("insecure", false)
            .env("KEY", "value");

        assert_eq!(
            spec.args,
            vec!["--bind-address", "0.0.0.0:8443", "--require-authentication"]
        );
        assert_eq!(spec.flag_value("bind-address"), Some("0.0.0.0:8443"));
        assert_eq!(spec.flag_value("insecure"), None);
        assert_eq!(spec.env, vec![("KEY".to_string(), "value".to_string())]);
    }

    #[tokio::test]
    async fn missing_program_is_dependency_failure() {
        let spec = LaunchSpec::new("proxy", "/nonexistent/keystone-proxy");
        let err = ProcessLauncher.launch(spec).await.unwrap_err();

        assert!(matches!(err, Error::DependencyStartFailed { .. }));
        assert_eq!(err.component(), Some("proxy"));
    }
}
