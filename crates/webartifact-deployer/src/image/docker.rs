//! An [`ImageProvider`] driving the `docker` command line.
//!
//! Every build copies the artifact next to a generated Dockerfile in a
//! temporary build context, which layers the artifact onto the configured
//! servlet container base image.

use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
    sync::LazyLock,
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{
    ArtifactMissingSnafu, BuildId, CommandFailedSnafu, CommandTimeoutSnafu, ImageProvider,
    InvalidRepositoryNameSnafu, InvalidTagSnafu, PrepareBuildContextSnafu, Result,
    SpawnCommandSnafu,
};
use crate::cli::ImageOptions;

static REPOSITORY_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$")
        .expect("failed to compile repository component regex")
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("failed to compile tag regex")
});

/// Format of the seconds part of the build suffix appended to the version in
/// every tag. UTC and zero padded, so later builds of a version sort after
/// earlier ones.
const BUILD_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Length of the build suffix: the timestamp followed by six digits of
/// microseconds.
const BUILD_SUFFIX_LEN: usize = 20;

fn build_suffix(timestamp: jiff::Timestamp) -> String {
    format!(
        "{}{:06}",
        timestamp.strftime(BUILD_TIMESTAMP_FORMAT),
        timestamp.subsec_microsecond()
    )
}

fn is_build_suffix(suffix: &str) -> bool {
    suffix.len() == BUILD_SUFFIX_LEN && suffix.bytes().all(|byte| byte.is_ascii_digit())
}

#[derive(Clone, Debug)]
pub struct DockerImageProvider {
    docker_binary: PathBuf,
    base_image: String,
    webapps_dir: String,
    registry: Option<String>,
    push: bool,
    command_timeout: Duration,
}

impl DockerImageProvider {
    pub fn new(options: &ImageOptions) -> Self {
        Self {
            docker_binary: options.docker_binary.clone(),
            base_image: options.base_image.clone(),
            webapps_dir: options.webapps_dir.trim_end_matches('/').to_owned(),
            registry: options
                .image_registry
                .as_ref()
                .map(|registry| registry.trim_end_matches('/').to_owned()),
            push: options.push_images,
            command_timeout: options.docker_timeout,
        }
    }

    /// Returns the repository holding all builds of `app_name` for `tenant`.
    pub fn repository(&self, tenant: &str, app_name: &str) -> Result<String> {
        for component in [tenant, app_name] {
            ensure!(
                REPOSITORY_COMPONENT_REGEX.is_match(component),
                InvalidRepositoryNameSnafu { component }
            );
        }

        Ok(match &self.registry {
            Some(registry) => format!("{registry}/{tenant}/{app_name}"),
            None => format!("{tenant}/{app_name}"),
        })
    }

    fn dockerfile(&self, artifact_file_name: &str) -> String {
        format!(
            "FROM {base_image}\nCOPY [\"{artifact_file_name}\", \"{webapps_dir}/{artifact_file_name}\"]\n",
            base_image = self.base_image,
            webapps_dir = self.webapps_dir,
        )
    }

    async fn run(&self, args: &[&str]) -> Result<(String, Output)> {
        let command = format!("{} {}", self.docker_binary.display(), args.join(" "));
        debug!(%command, "running docker");

        let child = Command::new(&self.docker_binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnCommandSnafu { command: &command })?;

        let Ok(output) = tokio::time::timeout(self.command_timeout, child.wait_with_output()).await
        else {
            return CommandTimeoutSnafu {
                command,
                timeout: self.command_timeout,
            }
            .fail();
        };
        let output = output.context(SpawnCommandSnafu { command: &command })?;

        Ok((command, output))
    }

    /// Runs docker and returns its stdout, failing on a non-zero exit code.
    async fn docker(&self, args: &[&str]) -> Result<String> {
        let (command, output) = self.run(args).await?;
        ensure!(
            output.status.success(),
            CommandFailedSnafu {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim(),
            }
        );

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ImageProvider for DockerImageProvider {
    #[instrument(skip(self))]
    async fn build(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
        artifact_path: &Path,
    ) -> Result<BuildId> {
        let repository = self.repository(tenant, app_name)?;
        let tag = format!("{version}-{}", build_suffix(jiff::Timestamp::now()));
        ensure!(TAG_REGEX.is_match(&tag), InvalidTagSnafu { tag });
        let reference = format!("{repository}:{tag}");

        let file_name = artifact_path
            .file_name()
            .context(ArtifactMissingSnafu {
                path: artifact_path,
            })?
            .to_string_lossy()
            .into_owned();
        let is_file = tokio::fs::metadata(artifact_path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        ensure!(
            is_file,
            ArtifactMissingSnafu {
                path: artifact_path
            }
        );

        let context_dir = tempfile::tempdir().context(PrepareBuildContextSnafu {
            path: artifact_path,
        })?;
        tokio::fs::copy(artifact_path, context_dir.path().join(&file_name))
            .await
            .context(PrepareBuildContextSnafu {
                path: artifact_path,
            })?;
        tokio::fs::write(
            context_dir.path().join("Dockerfile"),
            self.dockerfile(&file_name),
        )
        .await
        .context(PrepareBuildContextSnafu {
            path: artifact_path,
        })?;

        let context_path = context_dir.path().to_string_lossy().into_owned();
        self.docker(&["build", "--tag", &reference, &context_path])
            .await?;
        if self.push {
            self.docker(&["push", &reference]).await?;
        }

        info!(%reference, "built image");
        Ok(BuildId::new(reference))
    }

    #[instrument(skip(self))]
    async fn lookup(&self, tenant: &str, app_name: &str, version: &str) -> Result<Vec<BuildId>> {
        let repository = self.repository(tenant, app_name)?;
        let listing = self
            .docker(&[
                "images",
                "--format",
                "{{.Repository}}:{{.Tag}}",
                &repository,
            ])
            .await?;

        Ok(parse_image_listing(&listing, &repository, version))
    }

    #[instrument(skip(self))]
    async fn remove(&self, tenant: &str, app_name: &str, version: &str) -> Result<Vec<BuildId>> {
        let builds = self.lookup(tenant, app_name, version).await?;
        for build in &builds {
            self.docker(&["rmi", build.as_str()]).await?;
            debug!(%build, "removed image");
        }

        Ok(builds)
    }

    async fn is_ready(&self, build_id: &BuildId) -> Result<bool> {
        // A pushed image has to be visible in the registry, a local one only
        // in the local image store.
        let args = if self.push {
            ["manifest", "inspect", build_id.as_str()]
        } else {
            ["image", "inspect", build_id.as_str()]
        };
        let (_, output) = self.run(&args).await?;

        Ok(output.status.success())
    }
}

/// Extracts the builds of `version` from `docker images` output, keeping the
/// listing order. Only tags made of exactly the version and a build suffix
/// count, so `1.0` does not pick up builds of `1.0-rc`.
fn parse_image_listing(listing: &str, repository: &str, version: &str) -> Vec<BuildId> {
    let prefix = format!("{repository}:{version}-");

    listing
        .lines()
        .map(str::trim)
        .filter(|line| line.strip_prefix(&prefix).is_some_and(is_build_suffix))
        .map(BuildId::from)
        .collect()
}
