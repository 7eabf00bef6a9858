//! In-memory implementations of the image provider and the cluster managers.
//!
//! They keep all state in process, record every successful mutation in a
//! journal and can be told to fail selected operations, which makes them
//! suitable for tests and dry runs of the orchestrator.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use snafu::OptionExt;
use strum::{Display, IntoStaticStr};

use crate::{
    cluster::{
        self, NotFoundSnafu, PodManager, PodSummary, ReplicaSetManager, ReplicaSetState,
        ServiceManager,
    },
    image::{self, BuildId, ImageProvider},
};

/// Operations of [`InMemoryCluster`] that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ClusterOperation {
    CreateReplicaSet,
    DeleteReplicaSet,
    GetReplicaSet,
    ScaleReplicaSet,
    CreateService,
    DeleteService,
    ServiceAddress,
    ListPods,
    DeletePod,
    CreatePod,
}

/// Operations of [`InMemoryImageProvider`] that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ImageOperation {
    Build,
    Lookup,
    Remove,
    IsReady,
}

/// Remaining injected failures per operation.
#[derive(Debug)]
struct Failures<Op>(HashMap<Op, u32>);

impl<Op> Default for Failures<Op> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<Op: Copy + Eq + std::hash::Hash> Failures<Op> {
    fn set(&mut self, operation: Op, times: u32) {
        self.0.insert(operation, times);
    }

    /// Consumes one injected failure of `operation`, if any is left.
    fn take(&mut self, operation: Op) -> bool {
        match self.0.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct ReplicaSetRecord {
    label: String,
    image: String,
    replicas: i32,
}

#[derive(Debug)]
struct ServiceRecord {
    cluster_ip: String,
    node_port: i32,
}

#[derive(Debug)]
struct PodRecord {
    owner: Option<String>,
    replica_set: Option<String>,
    image: String,
}

#[derive(Debug, Default)]
struct ClusterState {
    replica_sets: BTreeMap<String, ReplicaSetRecord>,
    services: BTreeMap<String, ServiceRecord>,
    pods: BTreeMap<String, PodRecord>,
    failures: Failures<ClusterOperation>,
    journal: Vec<String>,
    services_created: u16,
}

impl ClusterState {
    fn check(&mut self, operation: ClusterOperation, name: &str) -> cluster::Result<()> {
        if self.failures.take(operation) {
            return cluster::RejectedSnafu {
                action: <&'static str>::from(operation),
                kind: "object",
                name,
                reason: "injected failure",
            }
            .fail();
        }
        Ok(())
    }

    fn record(&mut self, operation: ClusterOperation, name: &str) {
        self.journal.push(format!("{operation} {name}"));
    }

    /// Brings the pods of replica-set `name` to its desired count.
    fn reconcile_pods(&mut self, name: &str) {
        let desired = self
            .replica_sets
            .get(name)
            .map(|rs| {
                (
                    rs.label.clone(),
                    rs.image.clone(),
                    usize::try_from(rs.replicas).unwrap_or(0),
                )
            });
        let Some((label, image, desired)) = desired else {
            return;
        };

        let current: Vec<String> = self
            .pods
            .iter()
            .filter(|(_, pod)| pod.replica_set.as_deref() == Some(name))
            .map(|(pod_name, _)| pod_name.clone())
            .collect();

        for surplus in current.iter().skip(desired) {
            self.pods.remove(surplus);
        }
        let mut missing = desired.saturating_sub(current.len());
        let mut index = 0;
        while missing > 0 {
            let pod_name = format!("{name}-{index}");
            if !self.pods.contains_key(&pod_name) {
                self.pods.insert(
                    pod_name,
                    PodRecord {
                        owner: Some(label.clone()),
                        replica_set: Some(name.to_owned()),
                        image: image.clone(),
                    },
                );
                missing -= 1;
            }
            index += 1;
        }
    }
}

/// An in-memory cluster implementing all three manager contracts.
///
/// Replica-sets keep replica pods named `<replica-set>-<index>` in sync with
/// their replica count. Like the Kubernetes controller, re-applying a
/// replica-set only changes the template of pods created afterwards, and
/// deleting it deletes its pods. Standalone pods stay until deleted explicitly.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call of `operation` fail.
    pub fn fail_on(&self, operation: ClusterOperation) {
        self.fail_times(operation, u32::MAX);
    }

    /// Makes the next `times` calls of `operation` fail.
    pub fn fail_times(&self, operation: ClusterOperation, times: u32) {
        lock(&self.state).failures.set(operation, times);
    }

    /// Returns all successful mutations in order, e.g.
    /// `create-replica-set shop-acme`.
    pub fn journal(&self) -> Vec<String> {
        lock(&self.state).journal.clone()
    }

    pub fn replica_set(&self, name: &str) -> Option<ReplicaSetState> {
        lock(&self.state)
            .replica_sets
            .get(name)
            .map(|rs| ReplicaSetState {
                replicas: rs.replicas,
                image: rs.image.clone(),
            })
    }

    pub fn has_service(&self, name: &str) -> bool {
        lock(&self.state).services.contains_key(name)
    }

    pub fn pod_names(&self) -> Vec<String> {
        lock(&self.state).pods.keys().cloned().collect()
    }

    /// Returns the image every pod runs, ordered by pod name.
    pub fn pod_images(&self) -> Vec<String> {
        lock(&self.state)
            .pods
            .values()
            .map(|pod| pod.image.clone())
            .collect()
    }
}

#[async_trait]
impl ReplicaSetManager for InMemoryCluster {
    async fn create(&self, name: &str, label: &str, image: &str, replicas: i32) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::CreateReplicaSet, name)?;

        state.replica_sets.insert(
            name.to_owned(),
            ReplicaSetRecord {
                label: label.to_owned(),
                image: image.to_owned(),
                replicas,
            },
        );
        state.reconcile_pods(name);
        state.record(ClusterOperation::CreateReplicaSet, name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::DeleteReplicaSet, name)?;

        if state.replica_sets.remove(name).is_some() {
            state
                .pods
                .retain(|_, pod| pod.replica_set.as_deref() != Some(name));
            state.record(ClusterOperation::DeleteReplicaSet, name);
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> cluster::Result<Option<ReplicaSetState>> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::GetReplicaSet, name)?;

        Ok(state.replica_sets.get(name).map(|rs| ReplicaSetState {
            replicas: rs.replicas,
            image: rs.image.clone(),
        }))
    }

    async fn set_replica_count(&self, name: &str, replicas: i32) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::ScaleReplicaSet, name)?;

        if replicas < 0 {
            return cluster::RejectedSnafu {
                action: "scale",
                kind: "replica-set",
                name,
                reason: format!("replica count {replicas} must not be negative"),
            }
            .fail();
        }

        let replica_set = state.replica_sets.get_mut(name).context(NotFoundSnafu {
            kind: "replica-set",
            name,
        })?;
        replica_set.replicas = replicas;
        state.reconcile_pods(name);
        state.record(ClusterOperation::ScaleReplicaSet, name);
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for InMemoryCluster {
    async fn create(&self, name: &str, _label: &str) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::CreateService, name)?;

        state.services_created = state.services_created.wrapping_add(1);
        let index = state.services_created;
        state.services.insert(
            name.to_owned(),
            ServiceRecord {
                cluster_ip: format!("10.96.{}.{}", index / 256, index % 256),
                node_port: 30000 + i32::from(index % 2768),
            },
        );
        state.record(ClusterOperation::CreateService, name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::DeleteService, name)?;

        if state.services.remove(name).is_some() {
            state.record(ClusterOperation::DeleteService, name);
        }
        Ok(())
    }

    async fn cluster_address(&self, name: &str, context_path: &str) -> cluster::Result<String> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::ServiceAddress, name)?;

        let service = state
            .services
            .get(name)
            .context(NotFoundSnafu { kind: "service", name })?;
        Ok(format!("http://{}:80/{context_path}", service.cluster_ip))
    }

    async fn node_address(&self, name: &str, context_path: &str) -> cluster::Result<String> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::ServiceAddress, name)?;

        let service = state
            .services
            .get(name)
            .context(NotFoundSnafu { kind: "service", name })?;
        Ok(format!("http://192.0.2.10:{}/{context_path}", service.node_port))
    }
}

#[async_trait]
impl PodManager for InMemoryCluster {
    async fn list_all(&self) -> cluster::Result<Vec<PodSummary>> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::ListPods, "*")?;

        Ok(state
            .pods
            .iter()
            .map(|(name, pod)| PodSummary {
                name: name.clone(),
                owner: pod.owner.clone(),
            })
            .collect())
    }

    async fn delete(&self, name: &str) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::DeletePod, name)?;

        if state.pods.remove(name).is_some() {
            state.record(ClusterOperation::DeletePod, name);
        }
        Ok(())
    }

    async fn create(&self, name: &str, label: &str, image: &str) -> cluster::Result<()> {
        let mut state = lock(&self.state);
        state.check(ClusterOperation::CreatePod, name)?;

        state.pods.insert(
            name.to_owned(),
            PodRecord {
                owner: Some(label.to_owned()),
                replica_set: None,
                image: image.to_owned(),
            },
        );
        state.record(ClusterOperation::CreatePod, name);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ImageState {
    builds: BTreeMap<(String, String, String), Vec<BuildId>>,
    builds_created: u64,
    readiness_checks: HashMap<BuildId, u32>,
    failures: Failures<ImageOperation>,
}

impl ImageState {
    fn check(&mut self, operation: ImageOperation) -> image::Result<()> {
        if self.failures.take(operation) {
            return image::RejectedSnafu {
                operation: <&'static str>::from(operation),
                reason: "injected failure",
            }
            .fail();
        }
        Ok(())
    }
}

fn image_key(tenant: &str, app_name: &str, version: &str) -> (String, String, String) {
    (tenant.to_owned(), app_name.to_owned(), version.to_owned())
}

/// An in-memory image store.
///
/// Builds are named `<tenant>/<app>:<version>-<counter>` with a zero padded,
/// store-wide counter, so later builds sort after earlier ones.
#[derive(Clone, Debug)]
pub struct InMemoryImageProvider {
    state: Arc<Mutex<ImageState>>,
    ready_after: u32,
}

impl Default for InMemoryImageProvider {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            ready_after: 1,
        }
    }
}

impl InMemoryImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports builds ready only on their `checks`-th readiness check.
    pub fn with_ready_after(mut self, checks: u32) -> Self {
        self.ready_after = checks;
        self
    }

    pub fn fail_on(&self, operation: ImageOperation) {
        self.fail_times(operation, u32::MAX);
    }

    pub fn fail_times(&self, operation: ImageOperation, times: u32) {
        lock(&self.state).failures.set(operation, times);
    }

    /// Registers an existing build of `(tenant, app_name, version)`.
    pub fn insert_build(&self, tenant: &str, app_name: &str, version: &str, build_id: BuildId) {
        lock(&self.state)
            .builds
            .entry(image_key(tenant, app_name, version))
            .or_default()
            .push(build_id);
    }

    pub fn readiness_checks(&self, build_id: &BuildId) -> u32 {
        lock(&self.state)
            .readiness_checks
            .get(build_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ImageProvider for InMemoryImageProvider {
    async fn build(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
        _artifact_path: &Path,
    ) -> image::Result<BuildId> {
        let mut state = lock(&self.state);
        state.check(ImageOperation::Build)?;

        state.builds_created += 1;
        let build_id = BuildId::new(format!(
            "{tenant}/{app_name}:{version}-{:06}",
            state.builds_created
        ));
        state
            .builds
            .entry(image_key(tenant, app_name, version))
            .or_default()
            .push(build_id.clone());
        Ok(build_id)
    }

    async fn lookup(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
    ) -> image::Result<Vec<BuildId>> {
        let mut state = lock(&self.state);
        state.check(ImageOperation::Lookup)?;

        Ok(state
            .builds
            .get(&image_key(tenant, app_name, version))
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(
        &self,
        tenant: &str,
        app_name: &str,
        version: &str,
    ) -> image::Result<Vec<BuildId>> {
        let mut state = lock(&self.state);
        state.check(ImageOperation::Remove)?;

        Ok(state
            .builds
            .remove(&image_key(tenant, app_name, version))
            .unwrap_or_default())
    }

    async fn is_ready(&self, build_id: &BuildId) -> image::Result<bool> {
        let mut state = lock(&self.state);
        state.check(ImageOperation::IsReady)?;

        let known = state.builds.values().flatten().any(|build| build == build_id);
        let checks = state.readiness_checks.entry(build_id.clone()).or_insert(0);
        *checks += 1;

        Ok(known && *checks >= self.ready_after)
    }
}
