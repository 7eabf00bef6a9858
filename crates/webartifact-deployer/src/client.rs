use std::fmt::Debug;

use kube::{
    Api,
    api::{DeleteParams, ListParams, Patch, PatchParams},
    client::Client as KubeClient,
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::cli::KubernetesOptions;

/// This `Client` can be used to access the Kubernetes namespace all
/// deployments live in.
///
/// It wraps an underlying [`kube::Client`] and applies objects with a fixed
/// field manager.
#[derive(Clone)]
pub struct Client {
    client: KubeClient,
    namespace: String,
    apply_patch_params: PatchParams,
    merge_patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: KubeClient, namespace: impl Into<String>, field_manager: &str) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            apply_patch_params: PatchParams::apply(field_manager).force(),
            merge_patch_params: PatchParams {
                field_manager: Some(field_manager.to_owned()),
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }

    /// Connects using the inferred kubeconfig or in-cluster configuration.
    pub async fn try_default(options: &KubernetesOptions) -> kube::Result<Self> {
        let client = KubeClient::try_default().await?;
        Ok(Self::new(
            client,
            options.namespace.clone(),
            &options.field_manager,
        ))
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> KubeClient {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Retrieves the object `name`, if it exists.
    pub async fn get_opt<T>(&self, name: &str) -> kube::Result<Option<T>>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.get_api().get_opt(name).await
    }

    /// Lists all objects of the requested type in the namespace.
    pub async fn list<T>(&self) -> kube::Result<Vec<T>>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.get_api().list(&ListParams::default()).await?.items)
    }

    /// Server-side applies `resource`, creating it or replacing the fields
    /// owned by this client's field manager.
    pub async fn apply<T>(&self, name: &str, resource: &T) -> kube::Result<T>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        debug!(name, "applying object");
        self.get_api()
            .patch(name, &self.apply_patch_params, &Patch::Apply(resource))
            .await
    }

    /// Patches the existing object `name` using a JSON merge patch.
    pub async fn merge_patch<T>(&self, name: &str, patch: serde_json::Value) -> kube::Result<T>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.get_api()
            .patch(name, &self.merge_patch_params, &Patch::Merge(patch))
            .await
    }

    /// Deletes the object `name`. Returns `false` without doing anything if it
    /// does not exist.
    pub async fn delete<T>(&self, name: &str) -> kube::Result<bool>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<T> = self.get_api();
        match api.delete(name, &self.delete_params).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => {
                debug!(name, "object already absent");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns an [`Api`] scoped to the client's namespace.
    pub fn get_api<T>(&self) -> Api<T>
    where
        T: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Returns true if the API server answered with `404 Not Found`.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}
