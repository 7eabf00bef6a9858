//! Command line and environment options to configure a deployer.
//!
//! All structs are meant to be flattened into the arguments of a binary:
//!
//! ```rust
//! use clap::Parser;
//! use webartifact_deployer::cli::DeployerOptions;
//!
//! #[derive(Parser)]
//! struct Opts {
//!     #[command(flatten)]
//!     deployer: DeployerOptions,
//! }
//!
//! let opts = Opts::parse_from(["webartifactctl", "--namespace", "shop"]);
//! assert_eq!(opts.deployer.kubernetes.namespace, "shop");
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Args;

use crate::image::ReadinessPolicy;

/// Everything needed to build a deployer backed by Kubernetes and Docker.
#[derive(Clone, Debug, PartialEq, Eq, Args)]
pub struct DeployerOptions {
    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub kubernetes: KubernetesOptions,

    #[command(flatten)]
    pub image: ImageOptions,

    #[command(flatten)]
    pub readiness: ReadinessOptions,

    #[command(flatten)]
    pub service: ServiceOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Kubernetes Options")]
pub struct KubernetesOptions {
    /// The namespace replica-sets, services and pods are managed in.
    #[arg(long, env, default_value = "default")]
    pub namespace: String,

    /// The field manager used for server-side apply.
    #[arg(long, env, default_value = "webartifact-deployer")]
    pub field_manager: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Image Options")]
pub struct ImageOptions {
    /// Path or name of the docker executable.
    #[arg(long, env, default_value = "docker")]
    pub docker_binary: PathBuf,

    /// The servlet container image artifacts are copied into.
    #[arg(long, env, default_value = "tomcat:9-jre17")]
    pub base_image: String,

    /// Directory inside the base image that serves web artifacts.
    #[arg(long, env, default_value = "/usr/local/tomcat/webapps")]
    pub webapps_dir: String,

    /// Registry prefix of built images, e.g. `registry.example.com:5000`.
    ///
    /// Without a registry, images only exist in the local docker daemon, which
    /// the cluster nodes must share.
    #[arg(long, env)]
    pub image_registry: Option<String>,

    /// Push every built image to the registry.
    #[arg(long, env, requires = "image_registry")]
    pub push_images: bool,

    /// Maximum runtime of a single docker command.
    #[arg(long, env, default_value = "10m", value_parser = humantime::parse_duration)]
    pub docker_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Image Readiness Options")]
pub struct ReadinessOptions {
    /// How often a freshly built image is checked before the deployment is
    /// given up.
    #[arg(long, env, default_value_t = 10)]
    pub readiness_attempts: u32,

    /// Delay after the first failed readiness check. It doubles after every
    /// further check.
    #[arg(long, env, default_value = "250ms", value_parser = humantime::parse_duration)]
    pub readiness_initial_backoff: Duration,

    /// Upper bound of the delay between two readiness checks.
    #[arg(long, env, default_value = "5s", value_parser = humantime::parse_duration)]
    pub readiness_max_backoff: Duration,
}

impl From<&ReadinessOptions> for ReadinessPolicy {
    fn from(options: &ReadinessOptions) -> Self {
        Self {
            max_attempts: options.readiness_attempts,
            initial_backoff: options.readiness_initial_backoff,
            max_backoff: options.readiness_max_backoff,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Service Options")]
pub struct ServiceOptions {
    /// Port the web container listens on.
    #[arg(long, env, default_value_t = 8080)]
    pub container_port: i32,

    /// Port the service exposes inside the cluster.
    #[arg(long, env, default_value_t = 80)]
    pub service_port: i32,

    /// Address reported for node ports instead of the first node's IP.
    #[arg(long, env)]
    pub node_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Opts {
        #[command(flatten)]
        deployer: DeployerOptions,
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;

        Opts::command().print_long_help().unwrap();
        Opts::command().debug_assert()
    }

    #[test]
    fn defaults_match_readiness_policy() {
        let opts = Opts::parse_from(["webartifactctl"]);
        assert_eq!(
            ReadinessPolicy::from(&opts.deployer.readiness),
            ReadinessPolicy::default()
        );
        assert_eq!(opts.deployer.service.container_port, 8080);
        assert_eq!(opts.deployer.image.image_registry, None);
    }

    #[test]
    fn durations_are_human_readable() {
        let opts = Opts::parse_from([
            "webartifactctl",
            "--readiness-initial-backoff",
            "1s",
            "--docker-timeout",
            "2m 30s",
        ]);
        assert_eq!(
            opts.deployer.readiness.readiness_initial_backoff,
            Duration::from_secs(1)
        );
        assert_eq!(opts.deployer.image.docker_timeout, Duration::from_secs(150));
    }

    #[test]
    fn pushing_requires_registry() {
        assert!(Opts::try_parse_from(["webartifactctl", "--push-images"]).is_err());
    }
}
