use const_format::concatcp;

/// The well-known Kubernetes app key prefix.
const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";

/// The deployer-specific key prefix.
const WEBARTIFACT_KEY_PREFIX: &str = "webartifact.stackable.tech/";

/// The well-known Kubernetes app instance key `app.kubernetes.io/instance`.
pub const K8S_APP_INSTANCE_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "instance");

/// The well-known Kubernetes app managed-by key `app.kubernetes.io/managed-by`.
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

/// The component key `webartifact.stackable.tech/component`. Its value is the
/// component name of the deployment the object belongs to.
pub const COMPONENT_KEY: &str = concatcp!(WEBARTIFACT_KEY_PREFIX, "component");

pub const MANAGED_BY_VALUE: &str = "webartifact-deployer";
