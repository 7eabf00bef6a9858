use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Container, Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::ResourceExt;
use snafu::ResultExt;
use tracing::{debug, instrument};

use super::{BuildLabelsSnafu, KubeRequestSnafu, PodManager, PodSummary, Result};
use crate::{
    client::Client,
    kvp::{self, COMPONENT_KEY},
};

const KIND: &str = "pod";

/// Lists, creates and deletes the individual replica instances.
#[derive(Clone)]
pub struct KubePodManager {
    client: Client,
}

impl KubePodManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Builds a standalone pod owned by component `label`.
pub fn build_pod(name: &str, label: &str, image: &str) -> Result<Pod> {
    let labels = kvp::component_labels(label).context(BuildLabelsSnafu { kind: KIND, name })?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: label.to_owned(),
                image: Some(image.to_owned()),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        ..Pod::default()
    })
}

fn summarize(pod: &Pod) -> PodSummary {
    PodSummary {
        name: pod.name_any(),
        owner: pod.labels().get(COMPONENT_KEY).cloned(),
    }
}

#[async_trait]
impl PodManager for KubePodManager {
    async fn list_all(&self) -> Result<Vec<PodSummary>> {
        let pods = self
            .client
            .list::<Pod>()
            .await
            .context(KubeRequestSnafu {
                action: "list",
                kind: KIND,
                name: "*",
            })?;

        Ok(pods.iter().map(summarize).collect())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let deleted = self
            .client
            .delete::<Pod>(name)
            .await
            .context(KubeRequestSnafu {
                action: "delete",
                kind: KIND,
                name,
            })?;

        debug!(deleted, "deleted pod");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create(&self, name: &str, label: &str, image: &str) -> Result<()> {
        let pod = build_pod(name, label, image)?;
        self.client
            .apply(name, &pod)
            .await
            .context(KubeRequestSnafu {
                action: "create",
                kind: KIND,
                name,
            })?;

        debug!("created pod");
        Ok(())
    }
}
