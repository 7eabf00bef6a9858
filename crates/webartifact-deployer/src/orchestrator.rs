//! The deployment orchestrator composes the image provider and the cluster
//! managers into the operations on a web artifact deployment.
//!
//! Every deployment of `appName` for `tenant` consists of a replica-set, a
//! service and the replica pods, all named or labelled with the same
//! [`ComponentName`]. Nothing is cached: every operation re-reads the state it
//! depends on from the managers.
//!
//! Mutating operations hold a per-component lock for their whole duration and
//! record their steps in a [`Progress`], which is attached to their error.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cli::DeployerOptions,
    client::Client,
    cluster::{
        self, PodManager, ReplicaSetManager, ReplicaSetState, ServiceManager, pod::KubePodManager,
        replica_set::KubeReplicaSetManager, service::KubeServiceManager,
    },
    image::{self, BuildId, ImageProvider, ReadinessPolicy, docker::DockerImageProvider},
    lock::ComponentLocks,
    naming::{self, ArtifactCoordinate, ComponentName, artifact_display_name},
    saga::{Progress, Step},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The cause of a failed operation.
#[derive(Debug, Snafu)]
pub enum StepError {
    #[snafu(display("image provider request failed"))]
    Image { source: image::Error },

    #[snafu(display("image {build_id} did not become ready after {attempts} checks"))]
    ImageNotReady { build_id: BuildId, attempts: u32 },

    #[snafu(display("cluster request failed"))]
    Cluster { source: cluster::Error },

    #[snafu(display("no deployment of {component} is running"))]
    NoRunningDeployment { component: ComponentName },

    #[snafu(display("invalid artifact name"))]
    InvalidArtifactName { source: naming::Error },
}

/// One variant per operation, naming the subject the operation failed for.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deploy web artifact {path:?} ({progress})"))]
    Deploy {
        source: StepError,
        path: PathBuf,
        progress: Progress,
    },

    #[snafu(display("failed to roll back to build {build_id} ({progress})"))]
    RollBack {
        source: StepError,
        build_id: BuildId,
        progress: Progress,
    },

    #[snafu(display("failed to scale {component} to {replicas} replicas"))]
    Scale {
        source: StepError,
        component: ComponentName,
        replicas: i32,
    },

    #[snafu(display("failed to get the replica count of {component}"))]
    ReplicaCount {
        source: StepError,
        component: ComponentName,
    },

    #[snafu(display("failed to list the builds of web artifact {coordinate}"))]
    ListBuilds {
        source: StepError,
        coordinate: ArtifactCoordinate,
    },

    #[snafu(display("failed to list the minor builds of web artifact {coordinate}"))]
    ListMinorBuilds {
        source: StepError,
        coordinate: ArtifactCoordinate,
    },

    #[snafu(display("failed to remove web artifact {coordinate} ({progress})"))]
    Remove {
        source: StepError,
        coordinate: ArtifactCoordinate,
        progress: Progress,
    },

    #[snafu(display("failed to remove the builds of web artifact {coordinate}"))]
    RemoveBuilds {
        source: StepError,
        coordinate: ArtifactCoordinate,
    },

    #[snafu(display("failed to get the service addresses of web artifact {path:?}"))]
    ServiceAccess { source: StepError, path: PathBuf },
}

fn report<T>(result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        error!(error = err as &dyn std::error::Error, "operation failed");
    }
    result
}

/// Awaits a compensating step, logging instead of returning its failure.
async fn compensate(
    progress: &mut Progress,
    step: Step,
    step_result: impl Future<Output = cluster::Result<()>>,
) {
    match progress.compensate(step, step_result).await {
        Ok(()) => warn!(%step, "compensated partial change"),
        Err(err) => warn!(
            %step,
            error = &err as &dyn std::error::Error,
            "failed to compensate partial change"
        ),
    }
}

#[derive(Clone)]
pub struct DeploymentOrchestrator {
    images: Arc<dyn ImageProvider>,
    replica_sets: Arc<dyn ReplicaSetManager>,
    services: Arc<dyn ServiceManager>,
    pods: Arc<dyn PodManager>,
    readiness: ReadinessPolicy,
    locks: ComponentLocks,
}

impl DeploymentOrchestrator {
    pub fn new(
        images: Arc<dyn ImageProvider>,
        replica_sets: Arc<dyn ReplicaSetManager>,
        services: Arc<dyn ServiceManager>,
        pods: Arc<dyn PodManager>,
    ) -> Self {
        Self {
            images,
            replica_sets,
            services,
            pods,
            readiness: ReadinessPolicy::default(),
            locks: ComponentLocks::new(),
        }
    }

    /// Creates an orchestrator building images with docker and running them
    /// in the namespace of `client`.
    pub fn kubernetes(client: Client, options: &DeployerOptions) -> Self {
        let service = &options.service;
        Self::new(
            Arc::new(DockerImageProvider::new(&options.image)),
            Arc::new(KubeReplicaSetManager::new(
                client.clone(),
                service.container_port,
            )),
            Arc::new(KubeServiceManager::new(
                client.clone(),
                service.service_port,
                service.container_port,
                service.node_address.clone(),
            )),
            Arc::new(KubePodManager::new(client)),
        )
        .with_readiness_policy(ReadinessPolicy::from(&options.readiness))
    }

    pub fn with_readiness_policy(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Builds an image of the artifact at `artifact_path` and runs it with
    /// `replicas` replicas, replacing any running deployment of the same app.
    ///
    /// The replica-set is only created once the image is ready. A running
    /// replica-set is deleted with its pods first. If creating the replica-set
    /// or service fails, the previous replica-set is restored,
    /// or the new one deleted if there was none. Built images are kept.
    #[instrument(skip(self))]
    pub async fn deploy(
        &self,
        tenant: &str,
        app_name: &str,
        artifact_path: &Path,
        version: &str,
        replicas: i32,
    ) -> Result<BuildId> {
        let component = ComponentName::new(tenant, app_name);
        let _guard = self.locks.lock(&component).await;

        let mut progress = Progress::new();
        let result = self
            .try_deploy(
                &component,
                &ArtifactCoordinate::new(tenant, app_name, version),
                artifact_path,
                replicas,
                &mut progress,
            )
            .await;

        report(result.context(DeploySnafu {
            path: artifact_path,
            progress,
        }))
        .inspect(|build_id| info!(%component, %build_id, "deployed web artifact"))
    }

    async fn try_deploy(
        &self,
        component: &ComponentName,
        coordinate: &ArtifactCoordinate,
        artifact_path: &Path,
        replicas: i32,
        progress: &mut Progress,
    ) -> Result<BuildId, StepError> {
        let build_id = progress
            .run(
                Step::BuildImage,
                self.images.build(
                    &coordinate.tenant,
                    &coordinate.app_name,
                    &coordinate.version,
                    artifact_path,
                ),
            )
            .await
            .context(ImageSnafu)?;
        debug!(%build_id, "built image");

        progress
            .run(
                Step::AwaitImage,
                self.readiness
                    .wait_until_ready(self.images.as_ref(), &build_id),
            )
            .await
            .map_err(|source| match source {
                image::Error::NotReady { build_id, attempts } => {
                    StepError::ImageNotReady { build_id, attempts }
                }
                source => StepError::Image { source },
            })?;

        let previous = progress
            .run(Step::ReadReplicaSet, self.replica_sets.get(component))
            .await
            .context(ClusterSnafu)?;

        if let Err(err) = self
            .redeploy(
                component,
                previous.is_some(),
                build_id.as_str(),
                replicas,
                progress,
            )
            .await
        {
            match previous {
                Some(previous) => {
                    self.restore_replica_set(component, &previous, progress)
                        .await;
                }
                None => {
                    compensate(
                        progress,
                        Step::DeleteReplicaSet,
                        self.replica_sets.delete(component),
                    )
                    .await;
                }
            }
            return Err(err).context(ClusterSnafu);
        }

        Ok(build_id)
    }

    /// Puts the `previous` replica-set back in place. A replica-set created by
    /// the failed operation is deleted first, so none of its pods survive.
    async fn restore_replica_set(
        &self,
        component: &ComponentName,
        previous: &ReplicaSetState,
        progress: &mut Progress,
    ) {
        if progress.has_completed(Step::CreateReplicaSet) {
            compensate(
                progress,
                Step::DeleteReplicaSet,
                self.replica_sets.delete(component),
            )
            .await;
        }
        compensate(
            progress,
            Step::RestoreReplicaSet,
            self.replica_sets.create(
                component,
                component,
                &previous.image,
                previous.replicas,
            ),
        )
        .await;
    }

    /// Creates the replica-set and service, first deleting the running
    /// replica-set if `replace` is set. Re-applying a replica-set does not
    /// touch the pods it already runs.
    async fn redeploy(
        &self,
        component: &ComponentName,
        replace: bool,
        image: &str,
        replicas: i32,
        progress: &mut Progress,
    ) -> cluster::Result<()> {
        if replace {
            progress
                .run(Step::DeleteReplicaSet, self.replica_sets.delete(component))
                .await?;
        }
        self.create_deployment(component, image, replicas, progress)
            .await
    }

    async fn create_deployment(
        &self,
        component: &ComponentName,
        image: &str,
        replicas: i32,
        progress: &mut Progress,
    ) -> cluster::Result<()> {
        progress
            .run(
                Step::CreateReplicaSet,
                self.replica_sets
                    .create(component, component, image, replicas),
            )
            .await?;
        progress
            .run(
                Step::CreateService,
                self.services.create(component, component),
            )
            .await
    }

    /// Replaces the running deployment with one running `build_id`, keeping
    /// the current replica count. Does nothing if no deployment is running.
    ///
    /// The current replica-set and service are deleted before the new ones are
    /// created. If that fails, the replica-set and service are restored to
    /// their state before the roll back.
    #[instrument(skip(self, build_id), fields(%build_id))]
    pub async fn roll_back(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
        build_id: &BuildId,
    ) -> Result<()> {
        let component = ComponentName::new(tenant, app_name);
        let _guard = self.locks.lock(&component).await;

        let mut progress = Progress::new();
        let result = self.try_roll_back(&component, build_id, &mut progress).await;

        report(result.context(RollBackSnafu {
            build_id: build_id.clone(),
            progress,
        }))
    }

    async fn try_roll_back(
        &self,
        component: &ComponentName,
        build_id: &BuildId,
        progress: &mut Progress,
    ) -> Result<(), StepError> {
        let Some(previous) = progress
            .run(Step::ReadReplicaSet, self.replica_sets.get(component))
            .await
            .context(ClusterSnafu)?
        else {
            info!(%component, "no deployment running, nothing to roll back");
            return Ok(());
        };

        if let Err(err) = self
            .replace_deployment(component, build_id, &previous, progress)
            .await
        {
            self.restore_replica_set(component, &previous, progress)
                .await;
            compensate(
                progress,
                Step::RestoreService,
                self.services.create(component, component),
            )
            .await;
            return Err(err).context(ClusterSnafu);
        }

        info!(%component, replicas = previous.replicas, "rolled back");
        Ok(())
    }

    async fn replace_deployment(
        &self,
        component: &ComponentName,
        build_id: &BuildId,
        previous: &ReplicaSetState,
        progress: &mut Progress,
    ) -> cluster::Result<()> {
        progress
            .run(Step::DeleteReplicaSet, self.replica_sets.delete(component))
            .await?;
        progress
            .run(Step::DeleteService, self.services.delete(component))
            .await?;
        self.create_deployment(component, build_id.as_str(), previous.replicas, progress)
            .await
    }

    /// Changes the replica count of the running deployment. The count is not
    /// validated here.
    #[instrument(skip(self))]
    pub async fn scale(&self, tenant: &str, app_name: &str, replicas: i32) -> Result<()> {
        let component = ComponentName::new(tenant, app_name);
        let _guard = self.locks.lock(&component).await;

        let result = self
            .replica_sets
            .set_replica_count(&component, replicas)
            .await
            .context(ClusterSnafu);

        report(result.context(ScaleSnafu {
            component,
            replicas,
        }))
    }

    /// Returns the desired replica count of the running deployment.
    #[instrument(skip(self))]
    pub async fn replica_count(&self, tenant: &str, app_name: &str) -> Result<i32> {
        let component = ComponentName::new(tenant, app_name);
        let result = self.running_deployment(&component).await;

        report(result.map(|state| state.replicas).context(ReplicaCountSnafu { component }))
    }

    async fn running_deployment(
        &self,
        component: &ComponentName,
    ) -> Result<ReplicaSetState, StepError> {
        self.replica_sets
            .get(component)
            .await
            .context(ClusterSnafu)?
            .context(NoRunningDeploymentSnafu {
                component: component.clone(),
            })
    }

    /// Returns every build of the version in the image provider's order.
    #[instrument(skip(self))]
    pub async fn list_existing_build_artifacts(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
    ) -> Result<Vec<BuildId>> {
        let result = self
            .images
            .lookup(tenant, app_name, version)
            .await
            .context(ImageSnafu);

        report(result.context(ListBuildsSnafu {
            coordinate: ArtifactCoordinate::new(tenant, app_name, version),
        }))
    }

    /// Returns the builds of the version that sort strictly before the
    /// currently deployed build.
    ///
    /// Builds are compared as plain strings, so `"10"` sorts before `"9"`.
    #[instrument(skip(self))]
    pub async fn list_minor_build_artifact_versions(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
    ) -> Result<Vec<BuildId>> {
        let component = ComponentName::new(tenant, app_name);
        let result = async {
            let current = BuildId::new(self.running_deployment(&component).await?.image);
            let builds = self
                .images
                .lookup(tenant, app_name, version)
                .await
                .context(ImageSnafu)?;

            Ok::<Vec<BuildId>, StepError>(
                builds.into_iter().filter(|build| *build < current).collect(),
            )
        }
        .await;

        report(result.context(ListMinorBuildsSnafu {
            coordinate: ArtifactCoordinate::new(tenant, app_name, version),
        }))
    }

    /// Deletes the replica-set, the replica pods and the service of the
    /// deployment. Built images are kept.
    ///
    /// All three steps are attempted even if one of them fails. The first
    /// failure is returned, nothing is restored.
    #[instrument(skip(self))]
    pub async fn remove(&self, tenant: &str, app_name: &str, version: &str) -> Result<()> {
        let component = ComponentName::new(tenant, app_name);
        let _guard = self.locks.lock(&component).await;

        let mut progress = Progress::new();
        let replica_set = progress
            .run(Step::DeleteReplicaSet, self.replica_sets.delete(&component))
            .await;
        let pods = progress
            .run(Step::DeletePods, self.delete_replica_pods(&component))
            .await;
        let service = progress
            .run(Step::DeleteService, self.services.delete(&component))
            .await;

        let first_failure = [replica_set.err(), pods.err(), service.err()]
            .into_iter()
            .flatten()
            .next();
        let result = match first_failure {
            Some(err) => Err(err).context(ClusterSnafu),
            None => Ok(()),
        };

        report(result.context(RemoveSnafu {
            coordinate: ArtifactCoordinate::new(tenant, app_name, version),
            progress,
        }))
        .inspect(|()| info!(%component, "removed web artifact"))
    }

    /// Deletes every pod labelled as owned by `component`, continuing past
    /// failed deletions. Returns the number of deleted pods.
    async fn delete_replica_pods(&self, component: &ComponentName) -> cluster::Result<usize> {
        let pods = self.pods.list_all().await?;

        let mut deleted = 0;
        let mut first_failure = None;
        for pod in pods.iter().filter(|pod| pod.is_owned_by(component)) {
            match self.pods.delete(&pod.name).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(
                        pod = pod.name,
                        error = &err as &dyn std::error::Error,
                        "failed to delete replica pod"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        debug!(deleted, "deleted replica pods");
        match first_failure {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }

    /// Removes every build of the version from the image provider and
    /// returns the removed builds.
    #[instrument(skip(self))]
    pub async fn remove_build_artifacts(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
    ) -> Result<Vec<BuildId>> {
        let result = self
            .images
            .remove(tenant, app_name, version)
            .await
            .context(ImageSnafu);

        report(result.context(RemoveBuildsSnafu {
            coordinate: ArtifactCoordinate::new(tenant, app_name, version),
        }))
    }

    /// Returns the cluster and node port addresses the artifact at
    /// `artifact_path` is served at, as two lines.
    #[instrument(skip(self))]
    pub async fn service_access_ips(
        &self,
        tenant: &str,
        app_name: &str,
        artifact_path: &Path,
    ) -> Result<String> {
        let component = ComponentName::new(tenant, app_name);
        let result = async {
            let context_path =
                artifact_display_name(artifact_path).context(InvalidArtifactNameSnafu)?;
            let cluster_address = self
                .services
                .cluster_address(&component, &context_path)
                .await
                .context(ClusterSnafu)?;
            let node_address = self
                .services
                .node_address(&component, &context_path)
                .await
                .context(ClusterSnafu)?;

            Ok::<_, StepError>(format!(
                "Cluster IP: {cluster_address}\nNodePort: {node_address}\n\n"
            ))
        }
        .await;

        report(result.context(ServiceAccessSnafu {
            path: artifact_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::memory::{ClusterOperation, ImageOperation, InMemoryCluster, InMemoryImageProvider};

    const TENANT: &str = "acme";
    const APP: &str = "shop";
    const COMPONENT: &str = "shop-acme";

    struct Harness {
        orchestrator: DeploymentOrchestrator,
        cluster: InMemoryCluster,
        images: InMemoryImageProvider,
    }

    impl Harness {
        fn with_images(images: InMemoryImageProvider) -> Self {
            let cluster = InMemoryCluster::new();
            let orchestrator = DeploymentOrchestrator::new(
                Arc::new(images.clone()),
                Arc::new(cluster.clone()),
                Arc::new(cluster.clone()),
                Arc::new(cluster.clone()),
            )
            .with_readiness_policy(ReadinessPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            });

            Self {
                orchestrator,
                cluster,
                images,
            }
        }

        async fn deploy(&self, version: &str, replicas: i32) -> BuildId {
            self.orchestrator
                .deploy(TENANT, APP, Path::new("/srv/shop.war"), version, replicas)
                .await
                .unwrap()
        }

        fn replica_set(&self) -> ReplicaSetState {
            self.cluster.replica_set(COMPONENT).unwrap()
        }
    }

    #[fixture]
    fn harness() -> Harness {
        Harness::with_images(InMemoryImageProvider::new())
    }

    #[rstest]
    #[case(3)]
    #[case(0)]
    #[tokio::test]
    async fn deploy_runs_requested_replicas(harness: Harness, #[case] replicas: i32) {
        let build_id = harness.deploy("1.0", replicas).await;

        assert_eq!(
            harness.orchestrator.replica_count(TENANT, APP).await.unwrap(),
            replicas
        );
        assert_eq!(harness.replica_set().image, build_id.as_str());
        assert!(harness.cluster.has_service(COMPONENT));
    }

    #[rstest]
    #[tokio::test]
    async fn deploy_replaces_running_deployment(harness: Harness) {
        harness.deploy("1.0", 2).await;
        let deployed = harness.cluster.journal().len();
        let second = harness.deploy("2.0", 4).await;

        assert_eq!(
            harness.replica_set(),
            ReplicaSetState {
                replicas: 4,
                image: second.to_string(),
            }
        );
        assert_eq!(harness.cluster.pod_images(), vec![second.to_string(); 4]);
        assert_eq!(
            harness.cluster.journal()[deployed..],
            [
                "delete-replica-set shop-acme",
                "create-replica-set shop-acme",
                "create-service shop-acme",
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn failed_build_creates_nothing(harness: Harness) {
        harness.images.fail_on(ImageOperation::Build);

        let err = harness
            .orchestrator
            .deploy(TENANT, APP, Path::new("/srv/shop.war"), "1.0", 1)
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::Deploy { source: StepError::Image { .. }, path, .. } if path == Path::new("/srv/shop.war")
        ));
        assert!(harness.cluster.journal().is_empty());
    }

    #[tokio::test]
    async fn image_must_be_ready_before_replica_set_is_created() {
        let harness = Harness::with_images(InMemoryImageProvider::new().with_ready_after(5));

        let err = harness
            .orchestrator
            .deploy(TENANT, APP, Path::new("/srv/shop.war"), "1.0", 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Deploy {
                source: StepError::ImageNotReady { attempts: 3, .. },
                ..
            }
        ));
        assert!(harness.cluster.journal().is_empty());
    }

    #[tokio::test]
    async fn slow_image_is_awaited() {
        let harness = Harness::with_images(InMemoryImageProvider::new().with_ready_after(3));

        let build_id = harness.deploy("1.0", 1).await;
        assert_eq!(harness.images.readiness_checks(&build_id), 3);
        assert_eq!(harness.replica_set().image, build_id.as_str());
    }

    #[rstest]
    #[tokio::test]
    async fn failed_first_deploy_deletes_new_replica_set(harness: Harness) {
        harness.cluster.fail_on(ClusterOperation::CreateService);

        let err = harness
            .orchestrator
            .deploy(TENANT, APP, Path::new("/srv/shop.war"), "1.0", 2)
            .await
            .unwrap_err();

        let Error::Deploy { progress, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(progress.has_completed(Step::CreateReplicaSet));
        assert_eq!(progress.failed, vec![Step::CreateService]);
        assert_eq!(progress.compensated, vec![Step::DeleteReplicaSet]);
        assert_eq!(harness.cluster.replica_set(COMPONENT), None);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_deploy_restores_previous_replica_set(harness: Harness) {
        let first = harness.deploy("1.0", 2).await;
        harness.cluster.fail_times(ClusterOperation::CreateService, 1);

        let err = harness
            .orchestrator
            .deploy(TENANT, APP, Path::new("/srv/shop.war"), "2.0", 5)
            .await
            .unwrap_err();

        assert!(
            err.to_string()
                .contains("compensated: delete-replica-set, restore-replica-set")
        );
        assert_eq!(
            harness.replica_set(),
            ReplicaSetState {
                replicas: 2,
                image: first.to_string(),
            }
        );
        assert_eq!(harness.cluster.pod_images(), vec![first.to_string(); 2]);
    }

    #[rstest]
    #[tokio::test]
    async fn roll_back_keeps_replica_count(harness: Harness) {
        let first = harness.deploy("1.0", 3).await;
        harness.deploy("2.0", 3).await;
        harness.orchestrator.scale(TENANT, APP, 5).await.unwrap();

        harness
            .orchestrator
            .roll_back(TENANT, APP, "1.0", &first)
            .await
            .unwrap();

        assert_eq!(
            harness.orchestrator.replica_count(TENANT, APP).await.unwrap(),
            5
        );
        assert_eq!(harness.replica_set().image, first.as_str());
        assert_eq!(harness.cluster.pod_images(), vec![first.to_string(); 5]);
        assert!(harness.cluster.has_service(COMPONENT));
    }

    #[rstest]
    #[tokio::test]
    async fn roll_back_deletes_before_creating(harness: Harness) {
        let first = harness.deploy("1.0", 1).await;
        let deployed = harness.cluster.journal().len();

        harness
            .orchestrator
            .roll_back(TENANT, APP, "1.0", &first)
            .await
            .unwrap();

        assert_eq!(
            harness.cluster.journal()[deployed..],
            [
                "delete-replica-set shop-acme",
                "delete-service shop-acme",
                "create-replica-set shop-acme",
                "create-service shop-acme",
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn roll_back_without_deployment_does_nothing(harness: Harness) {
        harness
            .orchestrator
            .roll_back(TENANT, APP, "1.0", &BuildId::from("acme/shop:1.0-000001"))
            .await
            .unwrap();

        assert!(harness.cluster.journal().is_empty());
        assert_eq!(harness.cluster.replica_set(COMPONENT), None);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_roll_back_restores_deployment(harness: Harness) {
        harness.deploy("1.0", 2).await;
        let second = harness.deploy("2.0", 2).await;
        harness
            .cluster
            .fail_times(ClusterOperation::CreateReplicaSet, 1);

        let target = BuildId::from("acme/shop:1.0-000001");
        let err = harness
            .orchestrator
            .roll_back(TENANT, APP, "1.0", &target)
            .await
            .unwrap_err();

        let Error::RollBack {
            build_id, progress, ..
        } = &err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(build_id, &target);
        assert_eq!(
            progress.compensated,
            vec![Step::RestoreReplicaSet, Step::RestoreService]
        );
        assert_eq!(
            harness.replica_set(),
            ReplicaSetState {
                replicas: 2,
                image: second.to_string(),
            }
        );
        assert!(harness.cluster.has_service(COMPONENT));
    }

    #[rstest]
    #[tokio::test]
    async fn scale_is_delegated(harness: Harness) {
        harness.deploy("1.0", 1).await;

        harness.orchestrator.scale(TENANT, APP, 4).await.unwrap();
        assert_eq!(harness.cluster.pod_names().len(), 4);

        let err = harness.orchestrator.scale(TENANT, APP, -1).await.unwrap_err();
        assert!(matches!(err, Error::Scale { replicas: -1, .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn replica_count_requires_running_deployment(harness: Harness) {
        let err = harness
            .orchestrator
            .replica_count(TENANT, APP)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ReplicaCount {
                source: StepError::NoRunningDeployment { .. },
                ..
            }
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn builds_are_listed_in_provider_order(harness: Harness) {
        for build in ["c", "a", "b"] {
            harness
                .images
                .insert_build(TENANT, APP, "1.0", BuildId::from(build));
        }

        let builds = harness
            .orchestrator
            .list_existing_build_artifacts(TENANT, APP, "1.0")
            .await
            .unwrap();
        assert_eq!(builds, ["c", "a", "b"].map(BuildId::from));
    }

    #[rstest]
    #[case(&["a", "b", "c"], "b", &["a"])]
    #[case(&["a", "b", "c"], "a", &[])]
    #[case(&["c", "a", "b"], "d", &["c", "a", "b"])]
    #[case(&["9", "10"], "9", &["10"])]
    #[tokio::test]
    async fn minor_builds_sort_strictly_before_current(
        harness: Harness,
        #[case] builds: &[&str],
        #[case] current: &str,
        #[case] expected: &[&str],
    ) {
        for build in builds {
            harness
                .images
                .insert_build(TENANT, APP, "1.0", BuildId::from(*build));
        }
        ReplicaSetManager::create(&harness.cluster, COMPONENT, COMPONENT, current, 1)
            .await
            .unwrap();

        let minor = harness
            .orchestrator
            .list_minor_build_artifact_versions(TENANT, APP, "1.0")
            .await
            .unwrap();
        let expected: Vec<BuildId> = expected.iter().copied().map(BuildId::from).collect();
        assert_eq!(minor, expected);
    }

    #[rstest]
    #[tokio::test]
    async fn minor_builds_require_running_deployment(harness: Harness) {
        harness
            .images
            .insert_build(TENANT, APP, "1.0", BuildId::from("a"));

        let err = harness
            .orchestrator
            .list_minor_build_artifact_versions(TENANT, APP, "1.0")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ListMinorBuilds {
                source: StepError::NoRunningDeployment { .. },
                ..
            }
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn remove_deletes_only_owned_pods(harness: Harness) {
        harness.deploy("1.0", 2).await;
        harness
            .orchestrator
            .deploy("acme-corp", APP, Path::new("/srv/shop.war"), "1.0", 1)
            .await
            .unwrap();
        harness
            .orchestrator
            .remove(TENANT, APP, "1.0")
            .await
            .unwrap();

        assert_eq!(harness.cluster.replica_set(COMPONENT), None);
        assert!(!harness.cluster.has_service(COMPONENT));
        assert_eq!(harness.cluster.pod_names(), ["shop-acme-corp-0"]);
        assert!(harness.cluster.has_service("shop-acme-corp"));
    }

    #[rstest]
    #[tokio::test]
    async fn remove_keeps_going_after_failure(harness: Harness) {
        harness.deploy("1.0", 2).await;
        harness.cluster.fail_on(ClusterOperation::DeleteReplicaSet);

        let err = harness
            .orchestrator
            .remove(TENANT, APP, "1.0")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to remove web artifact acme/shop:1.0"));
        let Error::Remove { progress, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(progress.failed, vec![Step::DeleteReplicaSet]);
        assert_eq!(
            progress.completed,
            vec![Step::DeletePods, Step::DeleteService]
        );
        assert!(harness.cluster.pod_names().is_empty());
        assert!(!harness.cluster.has_service(COMPONENT));
    }

    #[rstest]
    #[tokio::test]
    async fn remove_of_absent_deployment_succeeds(harness: Harness) {
        harness
            .orchestrator
            .remove(TENANT, APP, "1.0")
            .await
            .unwrap();
        assert!(harness.cluster.journal().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn remove_keeps_images(harness: Harness) {
        let build_id = harness.deploy("1.0", 1).await;
        harness
            .orchestrator
            .remove(TENANT, APP, "1.0")
            .await
            .unwrap();

        let removed = harness
            .orchestrator
            .remove_build_artifacts(TENANT, APP, "1.0")
            .await
            .unwrap();
        assert_eq!(removed, vec![build_id]);
        assert!(
            harness
                .orchestrator
                .list_existing_build_artifacts(TENANT, APP, "1.0")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[rstest]
    #[tokio::test]
    async fn access_addresses_use_artifact_name(harness: Harness) {
        harness.deploy("1.0", 1).await;

        let access = harness
            .orchestrator
            .service_access_ips(TENANT, APP, Path::new("/srv/myapp.war"))
            .await
            .unwrap();
        assert_eq!(
            access,
            "Cluster IP: http://10.96.0.1:80/myapp\nNodePort: http://192.0.2.10:30001/myapp\n\n"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn access_rejects_short_artifact_name(harness: Harness) {
        harness.deploy("1.0", 1).await;

        let err = harness
            .orchestrator
            .service_access_ips(TENANT, APP, Path::new("war"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ServiceAccess {
                source: StepError::InvalidArtifactName { .. },
                ..
            }
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_deploys_do_not_interleave(harness: Harness) {
        let orchestrator = harness.orchestrator.clone();
        let (first, second) = tokio::join!(
            harness
                .orchestrator
                .deploy(TENANT, APP, Path::new("/srv/shop.war"), "1.0", 1),
            orchestrator.deploy(TENANT, APP, Path::new("/srv/shop.war"), "2.0", 1),
        );
        first.unwrap();
        second.unwrap();

        let mutations: Vec<String> = harness
            .cluster
            .journal()
            .into_iter()
            .filter(|entry| entry.starts_with("create"))
            .collect();
        assert_eq!(
            mutations,
            [
                "create-replica-set shop-acme",
                "create-service shop-acme",
                "create-replica-set shop-acme",
                "create-service shop-acme",
            ]
        );
    }
}
