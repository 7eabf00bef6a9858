//! The contract of the image provider which builds, looks up and removes the
//! container images backing every deployed version.
//!
//! Images are addressed by `(tenant, appName, version)`. Every build of such a
//! version produces a new [`BuildId`], the full image reference that
//! replica-sets are created from.

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use snafu::Snafu;

pub mod docker;
mod readiness;

pub use readiness::ReadinessPolicy;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{component:?} is not a valid image repository component"))]
    InvalidRepositoryName { component: String },

    #[snafu(display("{tag:?} is not a valid image tag"))]
    InvalidTag { tag: String },

    #[snafu(display("artifact {path:?} does not exist or is not a file"))]
    ArtifactMissing { path: PathBuf },

    #[snafu(display("failed to prepare the build context for {path:?}"))]
    PrepareBuildContext {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to spawn `{command}`"))]
    SpawnCommand {
        source: std::io::Error,
        command: String,
    },

    #[snafu(display("`{command}` did not finish within {}", humantime::format_duration(*timeout)))]
    CommandTimeout { command: String, timeout: Duration },

    #[snafu(display("`{command}` failed (exit code {code:?}): {stderr}"))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("image {build_id} did not become ready after {attempts} checks"))]
    NotReady { build_id: BuildId, attempts: u32 },

    #[snafu(display("image provider rejected {operation}: {reason}"))]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// The reference of one concrete built image, e.g.
/// `acme/shop:1.0-20240101120000`.
///
/// Ordering is plain string ordering. A build is considered older ("minor")
/// than another one exactly when its identifier sorts before it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BuildId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BuildId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Builds and manages the container images of web artifacts.
//
// async-trait is required to keep the provider usable as a trait object.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Builds a new image for `(tenant, app_name, version)` serving the
    /// artifact at `artifact_path` and returns its build identifier.
    async fn build(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
        artifact_path: &Path,
    ) -> Result<BuildId>;

    /// Returns every build of `(tenant, app_name, version)` in the provider's
    /// native order.
    async fn lookup(&self, tenant: &str, app_name: &str, version: &str) -> Result<Vec<BuildId>>;

    /// Removes every build of `(tenant, app_name, version)` and returns the
    /// removed build identifiers.
    async fn remove(&self, tenant: &str, app_name: &str, version: &str) -> Result<Vec<BuildId>>;

    /// Returns whether `build_id` can be pulled by the cluster.
    async fn is_ready(&self, build_id: &BuildId) -> Result<bool>;
}
