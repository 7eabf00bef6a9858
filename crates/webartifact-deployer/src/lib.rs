//! Deploys versioned web artifacts as replica-sets behind `NodePort` services.
//!
//! The [`orchestrator::DeploymentOrchestrator`] builds a container image for
//! every artifact version and manages the replica-set, service and replica
//! pods of each `(tenant, appName)` deployment. The collaborators it drives
//! are traits, implemented on top of Kubernetes and docker in [`cluster`] and
//! [`image::docker`], and in memory in [`memory`].

pub mod cli;
pub mod client;
pub mod cluster;
pub mod image;
pub mod kvp;
pub mod lock;
pub mod logging;
pub mod memory;
pub mod naming;
pub mod orchestrator;
pub mod saga;

// External re-exports
pub use k8s_openapi;
pub use kube;
