use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{ReplicaSet, ReplicaSetSpec},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, instrument};

use super::{
    BuildLabelsSnafu, KubeRequestSnafu, MissingFieldSnafu, ReplicaSetManager, ReplicaSetState,
    Result,
};
use crate::{client::Client, kvp};

const KIND: &str = "replica-set";

/// Kubernetes defaults `spec.replicas` to one when it is not set.
const DEFAULT_REPLICAS: i32 = 1;

/// Manages `apps/v1` replica-sets running a single web container.
#[derive(Clone)]
pub struct KubeReplicaSetManager {
    client: Client,
    container_port: i32,
}

impl KubeReplicaSetManager {
    pub fn new(client: Client, container_port: i32) -> Self {
        Self {
            client,
            container_port,
        }
    }
}

/// Builds a replica-set whose pods carry the component labels of `label` and
/// run one container named `label`.
pub fn build_replica_set(
    name: &str,
    label: &str,
    image: &str,
    replicas: i32,
    container_port: i32,
) -> Result<ReplicaSet> {
    let labels = kvp::component_labels(label).context(BuildLabelsSnafu { kind: KIND, name })?;
    let selector = kvp::selector_labels(label).context(BuildLabelsSnafu { kind: KIND, name })?;

    Ok(ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: label.to_owned(),
                        image: Some(image.to_owned()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_owned()),
                            container_port,
                            ..ContainerPort::default()
                        }]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            }),
            ..ReplicaSetSpec::default()
        }),
        ..ReplicaSet::default()
    })
}

fn state_of(name: &str, replica_set: &ReplicaSet) -> Result<ReplicaSetState> {
    let spec = replica_set.spec.as_ref().context(MissingFieldSnafu {
        kind: KIND,
        name,
        field: "spec",
    })?;
    let image = spec
        .template
        .as_ref()
        .and_then(|template| template.spec.as_ref())
        .and_then(|pod_spec| pod_spec.containers.first())
        .and_then(|container| container.image.clone())
        .context(MissingFieldSnafu {
            kind: KIND,
            name,
            field: "container image",
        })?;

    Ok(ReplicaSetState {
        replicas: spec.replicas.unwrap_or(DEFAULT_REPLICAS),
        image,
    })
}

#[async_trait]
impl ReplicaSetManager for KubeReplicaSetManager {
    #[instrument(skip(self))]
    async fn create(&self, name: &str, label: &str, image: &str, replicas: i32) -> Result<()> {
        let replica_set = build_replica_set(name, label, image, replicas, self.container_port)?;
        self.client
            .apply(name, &replica_set)
            .await
            .context(KubeRequestSnafu {
                action: "create",
                kind: KIND,
                name,
            })?;

        debug!("created replica-set");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let deleted = self
            .client
            .delete::<ReplicaSet>(name)
            .await
            .context(KubeRequestSnafu {
                action: "delete",
                kind: KIND,
                name,
            })?;

        debug!(deleted, "deleted replica-set");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ReplicaSetState>> {
        let replica_set = self
            .client
            .get_opt::<ReplicaSet>(name)
            .await
            .context(KubeRequestSnafu {
                action: "get",
                kind: KIND,
                name,
            })?;

        replica_set
            .map(|replica_set| state_of(name, &replica_set))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn set_replica_count(&self, name: &str, replicas: i32) -> Result<()> {
        self.client
            .merge_patch::<ReplicaSet>(
                name,
                serde_json::json!({ "spec": { "replicas": replicas } }),
            )
            .await
            .context(KubeRequestSnafu {
                action: "scale",
                kind: KIND,
                name,
            })?;

        debug!("changed replica count");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cluster::Error, kvp::COMPONENT_KEY};

    #[test]
    fn replica_set_selects_its_own_pods() {
        let replica_set =
            build_replica_set("shop-acme", "shop-acme", "acme/shop:1.0-1", 3, 8080).unwrap();
        let spec = replica_set.spec.as_ref().unwrap();
        let selector = spec.selector.match_labels.as_ref().unwrap();
        let pod_labels = spec
            .template
            .as_ref()
            .and_then(|template| template.metadata.as_ref())
            .and_then(|metadata| metadata.labels.as_ref())
            .unwrap();

        assert_eq!(selector.get(COMPONENT_KEY).unwrap(), "shop-acme");
        for (key, value) in selector {
            assert_eq!(pod_labels.get(key), Some(value));
        }
        assert_eq!(
            state_of("shop-acme", &replica_set).unwrap(),
            ReplicaSetState {
                replicas: 3,
                image: "acme/shop:1.0-1".to_owned(),
            }
        );
    }

    #[test]
    fn missing_replicas_default_to_one() {
        let mut replica_set =
            build_replica_set("shop-acme", "shop-acme", "acme/shop:1.0-1", 3, 8080).unwrap();
        if let Some(spec) = replica_set.spec.as_mut() {
            spec.replicas = None;
        }

        assert_eq!(state_of("shop-acme", &replica_set).unwrap().replicas, 1);
    }

    #[test]
    fn missing_image_is_reported() {
        let replica_set = ReplicaSet {
            spec: Some(ReplicaSetSpec::default()),
            ..ReplicaSet::default()
        };

        let err = state_of("shop-acme", &replica_set).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField {
                field: "container image",
                ..
            }
        ));
    }

    #[test]
    fn invalid_label_is_rejected() {
        let err = build_replica_set("shop acme", "shop acme", "img", 1, 8080).unwrap_err();
        assert!(matches!(err, Error::BuildLabels { .. }));
    }
}
