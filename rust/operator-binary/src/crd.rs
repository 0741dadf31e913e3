//! Typed view of Hive's `ClusterPool`, restricted to the fields the cleanup controller reads.
//!
//! The CRD itself is owned by Hive. Unknown fields are ignored when deserializing, and the
//! controller never writes the spec back, so the subset is safe to use against the real objects.

use clusterpool_operator_crd_utils::LocalSecretReference;
use serde::{Deserialize, Serialize};
use stackable_operator::{
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use strum::{Display, EnumIter, IntoEnumIterator};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterPool",
    plural = "clusterpools",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoolSpec {
    /// Cloud platform the pool provisions clusters on.
    #[serde(default)]
    pub platform: Platform,

    /// Pull secret used when installing clusters of this pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret_ref: Option<LocalSecretReference>,

    /// Secret holding the install-config template of this pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_config_secret_template_ref: Option<LocalSecretReference>,
}

/// Exactly one of the fields is expected to be set. Platforms other than AWS, GCP and Azure
/// are not modelled and leave all of them empty.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<CloudPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<CloudPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<CloudPlatform>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudPlatform {
    /// Secret holding the cloud provider credentials.
    pub credentials_secret_ref: LocalSecretReference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PlatformKind {
    Aws,
    Gcp,
    Azure,
}

/// Provider credentials of a pool, tagged with the platform they belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderCredentials<'a> {
    pub kind: PlatformKind,
    pub secret: &'a LocalSecretReference,
}

impl ProviderCredentials<'_> {
    /// Credentials are only shared between pools of the same platform; a name collision across
    /// platforms refers to two different uses of the Secret.
    pub fn is_shared_with(&self, other: &ProviderCredentials) -> bool {
        self.kind == other.kind && self.secret.refers_to_same(other.secret)
    }
}

impl Platform {
    fn get(&self, kind: PlatformKind) -> Option<&CloudPlatform> {
        match kind {
            PlatformKind::Aws => self.aws.as_ref(),
            PlatformKind::Gcp => self.gcp.as_ref(),
            PlatformKind::Azure => self.azure.as_ref(),
        }
    }

    /// The first configured platform, in the order AWS, GCP, Azure.
    pub fn kind(&self) -> Option<PlatformKind> {
        PlatformKind::iter().find(|kind| self.get(*kind).is_some())
    }

    pub fn credentials(&self) -> Option<ProviderCredentials<'_>> {
        let kind = self.kind()?;
        self.get(kind).map(|platform| ProviderCredentials {
            kind,
            secret: &platform.credentials_secret_ref,
        })
    }
}
