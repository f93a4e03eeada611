//! Role resolution
//!
//! The single positional argument to `start` decides which subsystems run on
//! this host. Everything else in bootstrap branches on the resulting
//! [`RolePlan`].

use std::fmt;

use keystone_common::{Config, Error, Result};

/// Which part of the cluster this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Store (unless external), master, and node in one process
    AllInOne,
    /// Store (unless external) and master
    MasterOnly,
    /// Node agent and proxy only
    NodeOnly,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::AllInOne => "all-in-one",
            Role::MasterOnly => "master",
            Role::NodeOnly => "node",
        })
    }
}

/// Subsystems selected for this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePlan {
    /// Resolved role
    pub role: Role,
    /// Launch the embedded store
    pub start_store: bool,
    /// Launch the master
    pub start_master: bool,
    /// Launch the node agent and proxy
    pub start_node: bool,
    /// Run the workload-orchestration control loops inside this master
    pub embedded_orchestration: bool,
}

/// Resolve the role from the positional arguments
///
/// Must see the operator's configuration before negotiation: the store and
/// orchestration choices depend on whether those addresses were given on the
/// command line, and negotiation fills them in.
pub fn resolve_role(args: &[String], config: &Config) -> Result<RolePlan> {
    let role = match args {
        [] => Role::AllInOne,
        [one] => match one.as_str() {
            "master" => Role::MasterOnly,
            "node" => Role::NodeOnly,
            other => {
                return Err(Error::invalid_arguments(format!(
                    "unrecognized role {:?}, expected \"master\" or \"node\"",
                    other
                )))
            }
        },
        many => {
            return Err(Error::invalid_arguments(format!(
                "expected at most one role, got {}: {}",
                many.len(),
                many.join(" ")
            )))
        }
    };

    let start_master = role != Role::NodeOnly;
    let plan = RolePlan {
        role,
        start_store: start_master && !config.etcd.provided(),
        start_master,
        start_node: role != Role::MasterOnly,
        embedded_orchestration: start_master && !config.kubernetes.provided(),
    };

    tracing::info!(
        role = %plan.role,
        start_store = plan.start_store,
        start_master = plan.start_master,
        start_node = plan.start_node,
        embedded_orchestration = plan.embedded_orchestration,
        "Resolved startup role"
    );

    Ok(plan)
}
