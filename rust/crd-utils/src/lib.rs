//! Reference types shared between the ClusterPool CRD model and the cleanup controller.

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::runtime::reflector::ObjectRef,
    schemars::{self, JsonSchema},
};

/// Name of a [`Secret`] in the same namespace as the object holding the reference.
///
/// Unlike k8s-openapi's `LocalObjectReference`, the name is mandatory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalSecretReference {
    /// Name of the Secret being referred to.
    pub name: String,
}

impl LocalSecretReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Resolves the reference against the namespace of the referring object.
    pub fn within(&self, namespace: &str) -> ObjectRef<Secret> {
        ObjectRef::<Secret>::new(&self.name).within(namespace)
    }

    /// Whether both references point at the same Secret.
    ///
    /// An empty name refers to nothing, so it never matches.
    pub fn refers_to_same(&self, other: &LocalSecretReference) -> bool {
        !self.name.is_empty() && self.name == other.name
    }
}
