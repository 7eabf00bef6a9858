//! Labels attached to every object created for a deployment.
//!
//! The component label doubles as the selector of replica-sets and services
//! and as the exact ownership key of replica pods.

use std::collections::BTreeMap;

use snafu::{Snafu, ensure};

mod keys;

pub use keys::*;

/// Kubernetes limits label values to this many characters.
pub const LABEL_VALUE_MAX_LEN: usize = 63;

/// A component name that cannot be used as a label value.
#[derive(Debug, PartialEq, Snafu)]
pub enum LabelError {
    #[snafu(display(
        "component {component:?} has {length} characters, labels allow at most {LABEL_VALUE_MAX_LEN}"
    ))]
    ComponentTooLong { component: String, length: usize },

    #[snafu(display(
        "component {component:?} must consist of ASCII letters, digits, '-', '_' or '.' and start and end with a letter or digit"
    ))]
    ComponentMalformed { component: String },
}

/// Checks that `component` can be used as the value of every label of its
/// objects. Tenants and app names are chosen by callers, so a bad pair is
/// only noticed here, before anything is sent to the cluster.
pub fn validate_component(component: &str) -> Result<(), LabelError> {
    let length = component.chars().count();
    ensure!(
        length <= LABEL_VALUE_MAX_LEN,
        ComponentTooLongSnafu { component, length }
    );

    let bytes = component.as_bytes();
    let well_formed = match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|byte| byte.is_ascii_alphanumeric() || b"-_.".contains(byte))
        }
        _ => false,
    };
    ensure!(well_formed, ComponentMalformedSnafu { component });

    Ok(())
}

/// Returns the selector labels of a component: only the component label.
pub fn selector_labels(component: &str) -> Result<BTreeMap<String, String>, LabelError> {
    validate_component(component)?;
    Ok(BTreeMap::from([(
        COMPONENT_KEY.to_owned(),
        component.to_owned(),
    )]))
}

/// Returns the full set of labels for objects belonging to `component`.
pub fn component_labels(component: &str) -> Result<BTreeMap<String, String>, LabelError> {
    let mut labels = selector_labels(component)?;
    labels.extend([
        (K8S_APP_INSTANCE_KEY.to_owned(), component.to_owned()),
        (K8S_APP_MANAGED_BY_KEY.to_owned(), MANAGED_BY_VALUE.to_owned()),
    ]);
    Ok(labels)
}
