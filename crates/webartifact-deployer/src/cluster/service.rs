use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Node, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use kube::{Api, api::ListParams};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, instrument};

use super::{
    BuildLabelsSnafu, KubeRequestSnafu, MissingFieldSnafu, NoNodeAddressSnafu, NotFoundSnafu,
    Result, ServiceManager,
};
use crate::{client::Client, kvp};

const KIND: &str = "service";

/// Node address types in order of preference for reaching a node port.
const NODE_ADDRESS_TYPES: [&str; 2] = ["ExternalIP", "InternalIP"];

/// Manages `NodePort` services exposing the web container of a component.
#[derive(Clone)]
pub struct KubeServiceManager {
    client: Client,
    service_port: i32,
    container_port: i32,
    node_address: Option<String>,
}

impl KubeServiceManager {
    /// `node_address` overrides the node IP reported by the cluster.
    pub fn new(
        client: Client,
        service_port: i32,
        container_port: i32,
        node_address: Option<String>,
    ) -> Self {
        Self {
            client,
            service_port,
            container_port,
            node_address,
        }
    }

    async fn get_service(&self, name: &str) -> Result<(Service, ServicePort)> {
        let service = self
            .client
            .get_opt::<Service>(name)
            .await
            .context(KubeRequestSnafu {
                action: "get",
                kind: KIND,
                name,
            })?
            .context(NotFoundSnafu { kind: KIND, name })?;

        let port = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.first())
            .cloned()
            .context(MissingFieldSnafu {
                kind: KIND,
                name,
                field: "ports",
            })?;

        Ok((service, port))
    }

    async fn node_ip(&self) -> Result<String> {
        if let Some(address) = &self.node_address {
            return Ok(address.clone());
        }

        let nodes: Api<Node> = Api::all(self.client.as_kube_client());
        let nodes = nodes
            .list(&ListParams::default())
            .await
            .context(KubeRequestSnafu {
                action: "list",
                kind: "node",
                name: "*",
            })?;

        preferred_node_ip(&nodes.items).context(NoNodeAddressSnafu)
    }
}

/// Builds a `NodePort` service forwarding `service_port` to the container
/// port of all pods labelled with component `label`.
pub fn build_service(
    name: &str,
    label: &str,
    service_port: i32,
    container_port: i32,
) -> Result<Service> {
    let labels = kvp::component_labels(label).context(BuildLabelsSnafu { kind: KIND, name })?;
    let selector = kvp::selector_labels(label).context(BuildLabelsSnafu { kind: KIND, name })?;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_owned()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_owned()),
                protocol: Some("TCP".to_owned()),
                port: service_port,
                target_port: Some(IntOrString::Int(container_port)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

fn format_address(host: &str, port: i32, context_path: &str) -> String {
    format!("http://{host}:{port}/{}", context_path.trim_start_matches('/'))
}

/// Returns the first node address, preferring external over internal IPs.
fn preferred_node_ip(nodes: &[Node]) -> Option<String> {
    NODE_ADDRESS_TYPES.iter().find_map(|address_type| {
        nodes
            .iter()
            .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
            .flatten()
            .find(|address| address.type_ == *address_type)
            .map(|address| address.address.clone())
    })
}

#[async_trait]
impl ServiceManager for KubeServiceManager {
    #[instrument(skip(self))]
    async fn create(&self, name: &str, label: &str) -> Result<()> {
        let service = build_service(name, label, self.service_port, self.container_port)?;
        self.client
            .apply(name, &service)
            .await
            .context(KubeRequestSnafu {
                action: "create",
                kind: KIND,
                name,
            })?;

        debug!("created service");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let deleted = self
            .client
            .delete::<Service>(name)
            .await
            .context(KubeRequestSnafu {
                action: "delete",
                kind: KIND,
                name,
            })?;

        debug!(deleted, "deleted service");
        Ok(())
    }

    async fn cluster_address(&self, name: &str, context_path: &str) -> Result<String> {
        let (service, port) = self.get_service(name).await?;
        let cluster_ip = service
            .spec
            .and_then(|spec| spec.cluster_ip)
            .context(MissingFieldSnafu {
                kind: KIND,
                name,
                field: "cluster IP",
            })?;

        Ok(format_address(&cluster_ip, port.port, context_path))
    }

    async fn node_address(&self, name: &str, context_path: &str) -> Result<String> {
        let (_, port) = self.get_service(name).await?;
        let node_port = port.node_port.context(MissingFieldSnafu {
            kind: KIND,
            name,
            field: "node port",
        })?;
        let node_ip = self.node_ip().await?;

        Ok(format_address(&node_ip, node_port, context_path))
    }
}
