use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Snafu};
use webartifact_deployer::{
    cli::DeployerOptions,
    client::Client,
    image::BuildId,
    kube,
    logging::{self, LogFormat},
    orchestrator::{self, DeploymentOrchestrator},
};

const APP_NAME: &str = "webartifactctl";
const LOG_ENV: &str = "WEBARTIFACTCTL_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("web artifact operation failed"))]
    Operation { source: orchestrator::Error },
}

#[derive(Debug, Parser)]
#[command(name = APP_NAME, author, version, about)]
struct Opts {
    #[command(subcommand)]
    command: Command,

    /// Format of log lines.
    #[arg(long, env = "WEBARTIFACTCTL_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    #[command(flatten)]
    deployer: DeployerOptions,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an image of a web artifact and run it, replacing the running
    /// version.
    Deploy {
        #[command(flatten)]
        version: VersionArgs,

        /// Path to the web artifact, e.g. `shop.war`.
        #[arg(long)]
        artifact: PathBuf,

        #[arg(long, default_value_t = 1)]
        replicas: i32,
    },

    /// Run an earlier build, keeping the current replica count.
    RollBack {
        #[command(flatten)]
        version: VersionArgs,

        /// Build to run, as printed by `builds`.
        #[arg(long)]
        build: String,
    },

    /// Change the replica count of the running version.
    Scale {
        #[command(flatten)]
        app: AppArgs,

        #[arg(long, allow_negative_numbers = true)]
        replicas: i32,
    },

    /// Print the replica count of the running version.
    Replicas {
        #[command(flatten)]
        app: AppArgs,
    },

    /// List all builds of a version.
    Builds {
        #[command(flatten)]
        version: VersionArgs,
    },

    /// List the builds of a version older than the running build.
    MinorBuilds {
        #[command(flatten)]
        version: VersionArgs,
    },

    /// Stop the running version and delete its service. Images are kept.
    Remove {
        #[command(flatten)]
        version: VersionArgs,
    },

    /// Delete all images of a version.
    RemoveBuilds {
        #[command(flatten)]
        version: VersionArgs,
    },

    /// Print the addresses the web artifact is served at.
    Access {
        #[command(flatten)]
        app: AppArgs,

        #[arg(long)]
        artifact: PathBuf,
    },
}

#[derive(Debug, Args)]
struct AppArgs {
    #[arg(long)]
    tenant: String,

    #[arg(long = "app")]
    app_name: String,
}

#[derive(Debug, Args)]
struct VersionArgs {
    #[command(flatten)]
    app: AppArgs,

    #[arg(long = "artifact-version")]
    version: String,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME, opts.log_format)
        .context(InitializeLoggingSnafu)?;

    let client = Client::try_default(&opts.deployer.kubernetes)
        .await
        .context(CreateClientSnafu)?;
    tracing::debug!(namespace = client.namespace(), "connected to Kubernetes");

    let orchestrator = DeploymentOrchestrator::kubernetes(client, &opts.deployer);
    run(&orchestrator, opts.command)
        .await
        .context(OperationSnafu)
}

async fn run(orchestrator: &DeploymentOrchestrator, command: Command) -> orchestrator::Result<()> {
    match command {
        Command::Deploy {
            version: VersionArgs { app, version },
            artifact,
            replicas,
        } => {
            let build_id = orchestrator
                .deploy(&app.tenant, &app.app_name, &artifact, &version, replicas)
                .await?;
            println!("{build_id}");
        }
        Command::RollBack {
            version: VersionArgs { app, version },
            build,
        } => {
            orchestrator
                .roll_back(&app.tenant, &app.app_name, &version, &BuildId::from(build))
                .await?;
        }
        Command::Scale { app, replicas } => {
            orchestrator
                .scale(&app.tenant, &app.app_name, replicas)
                .await?;
        }
        Command::Replicas { app } => {
            let replicas = orchestrator
                .replica_count(&app.tenant, &app.app_name)
                .await?;
            println!("{replicas}");
        }
        Command::Builds {
            version: VersionArgs { app, version },
        } => {
            let builds = orchestrator
                .list_existing_build_artifacts(&app.tenant, &app.app_name, &version)
                .await?;
            print_builds(&builds);
        }
        Command::MinorBuilds {
            version: VersionArgs { app, version },
        } => {
            let builds = orchestrator
                .list_minor_build_artifact_versions(&app.tenant, &app.app_name, &version)
                .await?;
            print_builds(&builds);
        }
        Command::Remove {
            version: VersionArgs { app, version },
        } => {
            orchestrator
                .remove(&app.tenant, &app.app_name, &version)
                .await?;
        }
        Command::RemoveBuilds {
            version: VersionArgs { app, version },
        } => {
            let builds = orchestrator
                .remove_build_artifacts(&app.tenant, &app.app_name, &version)
                .await?;
            print_builds(&builds);
        }
        Command::Access { app, artifact } => {
            let access = orchestrator
                .service_access_ips(&app.tenant, &app.app_name, &artifact)
                .await?;
            print!("{access}");
        }
    }

    Ok(())
}

fn print_builds(builds: &[BuildId]) {
    for build in builds {
        println!("{build}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;

        Opts::command().print_long_help().unwrap();
        Opts::command().debug_assert()
    }

    #[test]
    fn scale_accepts_negative_counts() {
        let opts = Opts::parse_from([
            APP_NAME,
            "scale",
            "--tenant",
            "acme",
            "--app",
            "shop",
            "--replicas",
            "-1",
        ]);

        let Command::Scale { app, replicas } = opts.command else {
            panic!("expected scale command");
        };
        assert_eq!(app.app_name, "shop");
        assert_eq!(replicas, -1);
    }
}
