pub mod error;
pub mod routes;

use std::sync::Arc;

use relforge_deployment::Deployment;

/// The presentation layer is generic over `Deployment`; `relforge-local-deployment`
/// is the only implementation today, wired up in `src/bin/relforge_server.rs`.
pub type DeploymentState = Arc<dyn Deployment>;
