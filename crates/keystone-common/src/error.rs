//! Error types for keystone bootstrap
//!
//! Every error raised while bootstrapping a node is fatal to the process.
//! Variants carry enough context (component names, endpoints, attempt
//! counts) to produce a single useful diagnostic before exit.

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bad command line shape (user error, not retried)
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// Description of what was wrong with the arguments
        message: String,
    },

    /// No usable local network address could be found
    #[error("address discovery failed: {message}")]
    AddressDiscoveryFailed {
        /// Description of what failed
        message: String,
    },

    /// The backing store did not answer within the retry budget
    #[error("could not reach store at {endpoint} after {attempts} attempts: {message}")]
    StoreUnreachable {
        /// Store endpoint that was probed
        endpoint: String,
        /// Number of probes issued before giving up
        attempts: u32,
        /// Last transport error observed
        message: String,
    },

    /// CA load/create or certificate signing failed
    #[error("trust bootstrap failed [{context}]: {message}")]
    TrustBootstrapFailed {
        /// Description of what failed
        message: String,
        /// Identity or file being processed (e.g., "ca", "admin-client")
        context: String,
    },

    /// An external collaborator's own startup returned an error
    #[error("failed to start {component}: {message}")]
    DependencyStartFailed {
        /// Component that failed to start (e.g., "api-server", "proxy")
        component: String,
        /// Underlying error reported by the component
        message: String,
    },
}

impl Error {
    /// Create an invalid-arguments error
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: msg.into(),
        }
    }

    /// Create an address discovery error
    pub fn address_discovery(msg: impl Into<String>) -> Self {
        Self::AddressDiscoveryFailed {
            message: msg.into(),
        }
    }

    /// Create a store-unreachable error
    pub fn store_unreachable(
        endpoint: impl Into<String>,
        attempts: u32,
        msg: impl Into<String>,
    ) -> Self {
        Self::StoreUnreachable {
            endpoint: endpoint.into(),
            attempts,
            message: msg.into(),
        }
    }

    /// Create a trust bootstrap error for a specific identity or file
    pub fn trust_for(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TrustBootstrapFailed {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create a dependency start error for the named component
    pub fn dependency_start(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DependencyStartFailed {
            component: component.into(),
            message: msg.into(),
        }
    }

    /// Process exit status for this error
    ///
    /// Usage errors exit with 2 (the conventional CLI usage status), everything
    /// else with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArguments { .. } => 2,
            _ => 1,
        }
    }

    /// Get the component name if this error is associated with one
    pub fn component(&self) -> Option<&str> {
        match self {
            Error::DependencyStartFailed { component, .. } => Some(component),
            Error::TrustBootstrapFailed { context, .. } => Some(context),
            _ => None,
        }
    }
}
