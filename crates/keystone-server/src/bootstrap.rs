//! The bootstrap pipeline
//!
//! Runs the stages in order and stops at the first error:
//!
//! 1. resolve the role from the positional arguments
//! 2. negotiate addresses
//! 3. build the startup plan and launch the embedded store, if any
//! 4. wait for the store (master only)
//! 5. bootstrap trust (encrypted master only)
//! 6. settle the master's plan and launch the master, then the node

use std::future::Future;
use std::sync::Arc;

use keystone_common::network::{HostInterfaces, LocalAddressSource};
use keystone_common::{Addr, Config, Result};
use keystone_infra::CertDir;

use crate::launcher::{Launcher, ProcessLauncher};
use crate::startup::{
    bootstrap_trust, build_plan, negotiate, park, resolve_role, start_master, start_node,
    start_store, wait_for_store, EtcdProbe, PollBudget, RolePlan, StartupPlan, StoreProbe,
    TrustMaterial,
};

/// Builds a store probe for the negotiated store address
pub type ProbeFactory = Box<dyn Fn(&Addr) -> Result<Arc<dyn StoreProbe>> + Send + Sync>;

/// Everything bootstrap talks to outside its own process
pub struct Collaborators {
    /// Local interface table
    pub addresses: Arc<dyn LocalAddressSource>,
    /// Starts collaborator processes
    pub launcher: Arc<dyn Launcher>,
    /// Store probe construction
    pub store_probe: ProbeFactory,
    /// Store readiness budget
    pub store_budget: PollBudget,
}

impl Collaborators {
    /// Real interfaces, child processes, and an HTTP store probe
    pub fn production() -> Self {
        Self {
            addresses: Arc::new(HostInterfaces),
            launcher: Arc::new(ProcessLauncher),
            store_probe: Box::new(|store: &Addr| {
                let probe: Arc<dyn StoreProbe> = Arc::new(EtcdProbe::new(store)?);
                Ok(probe)
            }),
            store_budget: PollBudget::STORE,
        }
    }
}

/// What bootstrap resolved and started
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// Resolved role
    pub role: RolePlan,
    /// Negotiated configuration
    pub config: Config,
    /// Trust material, when the master runs encrypted
    pub trust: Option<TrustMaterial>,
    /// Settings every collaborator was started with
    pub plan: StartupPlan,
}

/// Run every stage and launch all collaborators
///
/// Returns once everything has been started.
pub async fn bootstrap(
    args: &[String],
    config: &Config,
    collaborators: &Collaborators,
) -> Result<BootstrapOutcome> {
    let role = resolve_role(args, config)?;
    let config = negotiate(config, collaborators.addresses.as_ref())?;

    tracing::info!(
        role = %role.role,
        listen = %config.listen,
        master = %config.master,
        store = %config.etcd,
        orchestration = %config.kubernetes,
        "Starting"
    );

    let mut plan = build_plan(&config, &role);
    if let Some(store) = &plan.store {
        start_store(collaborators.launcher.as_ref(), store).await?;
    }

    let trust = if role.start_master {
        let probe = (collaborators.store_probe)(&config.etcd)?;
        wait_for_store(probe.as_ref(), collaborators.store_budget).await?;

        if config.master.is_tls() {
            let cert_dir = CertDir::new(&config.cert_dir);
            Some(bootstrap_trust(
                &cert_dir,
                &config.master,
                role.embedded_orchestration,
            )?)
        } else {
            tracing::info!("Master is not encrypted, skipping trust bootstrap");
            None
        }
    } else {
        None
    };

    plan.settle_master(&config, trust.as_ref())?;
    if let Some(master) = &plan.master {
        start_master(
            collaborators.launcher.as_ref(),
            master,
            plan.orchestration.as_ref(),
        )
        .await?;
    }
    if let Some(node) = &plan.node {
        start_node(collaborators.launcher.as_ref(), node).await?;
    }

    Ok(BootstrapOutcome {
        role,
        config,
        trust,
        plan,
    })
}

/// Bootstrap, then park until `shutdown` resolves
pub async fn run<F>(
    args: &[String],
    config: &Config,
    collaborators: &Collaborators,
    shutdown: F,
) -> Result<BootstrapOutcome>
where
    F: Future<Output = ()>,
{
    let outcome = bootstrap(args, config, collaborators).await?;
    park(shutdown).await;
    Ok(outcome)
}
