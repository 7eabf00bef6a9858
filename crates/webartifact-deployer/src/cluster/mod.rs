//! The cluster-side contracts the orchestrator composes: replica-sets,
//! services and pods, all addressed by component name.

use async_trait::async_trait;
use snafu::Snafu;

use crate::kvp::LabelError;

pub mod pod;
pub mod replica_set;
pub mod service;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to {action} {kind} {name:?}"))]
    KubeRequest {
        source: kube::Error,
        action: &'static str,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("failed to build labels for {kind} {name:?}"))]
    BuildLabels {
        source: LabelError,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("{kind} {name:?} is missing {field}"))]
    MissingField {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    #[snafu(display("no address found for any cluster node"))]
    NoNodeAddress,

    #[snafu(display("cluster rejected {action} of {kind} {name:?}: {reason}"))]
    Rejected {
        action: &'static str,
        kind: &'static str,
        name: String,
        reason: String,
    },
}

/// The observed state of a replica-set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaSetState {
    /// Desired number of replicas.
    pub replicas: i32,
    /// Image of the first container, which is the deployed build.
    pub image: String,
}

/// A replica instance as listed by the [`PodManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    /// Component name recorded in the ownership label, if any.
    pub owner: Option<String>,
}

impl PodSummary {
    pub fn is_owned_by(&self, component: &str) -> bool {
        self.owner.as_deref() == Some(component)
    }
}

#[async_trait]
pub trait ReplicaSetManager: Send + Sync {
    /// Creates the replica-set `name`, or updates an existing one of the same
    /// name. Pods already running keep their image.
    async fn create(&self, name: &str, label: &str, image: &str, replicas: i32) -> Result<()>;

    /// Deletes the replica-set `name` together with its pods. Deleting an
    /// absent replica-set succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<ReplicaSetState>>;

    /// Changes the desired replica count. The count is passed on without
    /// validation.
    async fn set_replica_count(&self, name: &str, replicas: i32) -> Result<()>;
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Creates the service `name` selecting pods labelled `label`, replacing an
    /// existing one of the same name.
    async fn create(&self, name: &str, label: &str) -> Result<()>;

    /// Deletes the service `name`. Deleting an absent service succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Returns the cluster-internal address of `context_path` behind service
    /// `name`.
    async fn cluster_address(&self, name: &str, context_path: &str) -> Result<String>;

    /// Returns the node-exposed address of `context_path` behind service
    /// `name`.
    async fn node_address(&self, name: &str, context_path: &str) -> Result<String>;
}

#[async_trait]
pub trait PodManager: Send + Sync {
    async fn list_all(&self) -> Result<Vec<PodSummary>>;

    /// Deletes the pod `name`. Deleting an absent pod succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Creates a standalone replica instance owned by component `label`.
    async fn create(&self, name: &str, label: &str, image: &str) -> Result<()>;
}
