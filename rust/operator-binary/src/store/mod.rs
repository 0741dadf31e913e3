//! Access to the objects the cleanup controller reads and mutates
//!
//! The controller only ever talks to the API server through [`ResourceStore`], so that the
//! finalizer and teardown logic can be driven against [`memory::MemoryStore`] in tests.

pub mod k8s;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use snafu::Snafu;
use stackable_operator::{
    k8s_openapi::api::core::v1::{Namespace, Secret},
    kube::runtime::reflector::ObjectRef,
};

use crate::crd::ClusterPool;

pub use k8s::KubeStore;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{pool} has no namespace"))]
    PoolHasNoNamespace { pool: ObjectRef<ClusterPool> },

    #[snafu(display("failed to get {pool}"))]
    GetPool {
        source: stackable_operator::kube::Error,
        pool: ObjectRef<ClusterPool>,
    },

    #[snafu(display("failed to list ClusterPools in namespace {namespace:?}"))]
    ListPools {
        source: stackable_operator::kube::Error,
        namespace: String,
    },

    #[snafu(display("failed to patch {pool}"))]
    PatchPool {
        source: stackable_operator::kube::Error,
        pool: ObjectRef<ClusterPool>,
    },

    #[snafu(display("failed to update {pool}"))]
    UpdatePool {
        source: stackable_operator::kube::Error,
        pool: ObjectRef<ClusterPool>,
    },

    #[snafu(display("failed to get {secret}"))]
    GetSecret {
        source: stackable_operator::kube::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to delete {secret}"))]
    DeleteSecret {
        source: stackable_operator::kube::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to get {namespace}"))]
    GetNamespace {
        source: stackable_operator::kube::Error,
        namespace: ObjectRef<Namespace>,
    },

    #[snafu(display("failed to delete {namespace}"))]
    DeleteNamespace {
        source: stackable_operator::kube::Error,
        namespace: ObjectRef<Namespace>,
    },
}

/// Namespaced ClusterPools and Secrets, and cluster-scoped Namespaces.
///
/// Lookups return `None` instead of failing when the object does not exist, and deletes
/// succeed when the object is already gone.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<ClusterPool>, Error>;

    /// Returns `None` when the namespace itself cannot be found.
    async fn list_pools(&self, namespace: &str) -> Result<Option<Vec<ClusterPool>>, Error>;

    /// Persists the finalizers of `modified` as a merge patch computed against `base`.
    ///
    /// The patch carries no resource version, so concurrent changes to other fields are kept.
    async fn merge_patch_pool(
        &self,
        base: &ClusterPool,
        modified: &ClusterPool,
    ) -> Result<(), Error>;

    /// Persists the finalizers of `pool`, failing with a conflict if the stored object has
    /// moved past `pool`'s resource version.
    async fn update_pool(&self, pool: &ClusterPool) -> Result<(), Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    async fn delete_secret(&self, secret: &Secret) -> Result<(), Error>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<(), Error>;
}

pub(crate) fn is_not_found(err: &stackable_operator::kube::Error) -> bool {
    matches!(err, stackable_operator::kube::Error::Api(response) if response.code == 404)
}
