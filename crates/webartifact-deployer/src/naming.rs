//! Deterministic names shared by every resource of a deployment.
//!
//! A deployment of `appName` for `tenant` is represented by a replica-set, a
//! service and a group of pods in the cluster. All of them are correlated by
//! a single [`ComponentName`], which is derived from the deployment identity
//! and nothing else.

use std::{
    fmt::{self, Display},
    ops::Deref,
    path::{Path, PathBuf},
};

use snafu::{OptionExt, Snafu};

/// Number of trailing characters stripped from an artifact file name to get
/// its display name (the length of the `.war` extension).
pub const ARTIFACT_EXTENSION_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("artifact path {path:?} has no file name"))]
    MissingFileName { path: PathBuf },

    #[snafu(display(
        "artifact file name {file_name:?} is shorter than the {ARTIFACT_EXTENSION_LEN} character extension"
    ))]
    FileNameTooShort { file_name: String },
}

/// The join key of a running deployment: `appName + "-" + tenant`.
///
/// Callers must namespace tenants and app names so that two distinct pairs
/// never produce the same name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentName(String);

impl ComponentName {
    pub fn new(tenant: &str, app_name: &str) -> Self {
        Self(format!("{app_name}-{tenant}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ComponentName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a logical version of a web artifact, rendered as
/// `tenant/appName:version`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactCoordinate {
    pub tenant: String,
    pub app_name: String,
    pub version: String,
}

impl ArtifactCoordinate {
    pub fn new(tenant: &str, app_name: &str, version: &str) -> Self {
        Self {
            tenant: tenant.to_owned(),
            app_name: app_name.to_owned(),
            version: version.to_owned(),
        }
    }

    pub fn component_name(&self) -> ComponentName {
        ComponentName::new(&self.tenant, &self.app_name)
    }
}

impl Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.tenant, self.app_name, self.version)
    }
}

/// Returns the display name of an artifact: its file name without the last
/// [`ARTIFACT_EXTENSION_LEN`] characters, e.g. `myapp` for `/tmp/myapp.war`.
pub fn artifact_display_name(artifact_path: &Path) -> Result<String, Error> {
    let file_name = artifact_path
        .file_name()
        .context(MissingFileNameSnafu {
            path: artifact_path,
        })?
        .to_string_lossy();

    let char_count = file_name.chars().count();
    if char_count < ARTIFACT_EXTENSION_LEN {
        return FileNameTooShortSnafu {
            file_name: file_name.into_owned(),
        }
        .fail();
    }

    Ok(file_name
        .chars()
        .take(char_count - ARTIFACT_EXTENSION_LEN)
        .collect())
}
