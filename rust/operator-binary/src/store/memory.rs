//! In-memory [`ResourceStore`] with fault injection and a log of all calls made against it.
//!
//! Mimics the parts of the API server the controller relies on: resource versions are checked
//! on update, and a pool that is marked for deletion disappears once its last finalizer is gone.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use clusterpool_operator_crd_utils::LocalSecretReference;
use snafu::ResultExt as _;
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{Namespace, Secret},
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::Utc,
    },
    kube::{
        api::ObjectMeta, error::ErrorResponse, runtime::reflector::ObjectRef, ResourceExt,
    },
};

use super::{
    DeleteNamespaceSnafu, DeleteSecretSnafu, Error, GetNamespaceSnafu, GetPoolSnafu,
    GetSecretSnafu, ListPoolsSnafu, PatchPoolSnafu, ResourceStore, UpdatePoolSnafu,
};
use crate::{
    crd::{ClusterPool, ClusterPoolSpec, CloudPlatform, Platform, PlatformKind},
    teardown::{NAMESPACE_MANAGED_BY_LABEL, NAMESPACE_MANAGED_BY_VALUE},
};

/// A request made against the store, identified by the name of the object (or namespace, for
/// listings) it concerns.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Call {
    GetPool(String),
    ListPools(String),
    PatchPool(String),
    UpdatePool(String),
    GetSecret(String),
    DeleteSecret(String),
    GetNamespace(String),
    DeleteNamespace(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::PatchPool(_)
                | Call::UpdatePool(_)
                | Call::DeleteSecret(_)
                | Call::DeleteNamespace(_)
        )
    }
}

type Key = (String, String);

#[derive(Default)]
struct State {
    pools: BTreeMap<Key, ClusterPool>,
    secrets: BTreeMap<Key, Secret>,
    namespaces: BTreeMap<String, Namespace>,
    failures: BTreeSet<Call>,
    calls: Vec<Call>,
    last_resource_version: u64,
}

impl State {
    fn record(&mut self, call: Call) -> Result<(), stackable_operator::kube::Error> {
        let fail = self.failures.contains(&call);
        self.calls.push(call);
        if fail {
            Err(api_error(500, "InternalError"))
        } else {
            Ok(())
        }
    }

    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }

    /// Stores `pool`, or drops it if it was only held back by its finalizers.
    fn persist_pool(&mut self, key: Key, mut pool: ClusterPool) {
        if pool.metadata.deletion_timestamp.is_some() && pool.finalizers().is_empty() {
            self.pools.remove(&key);
        } else {
            pool.metadata.resource_version = Some(self.next_resource_version());
            self.pools.insert(key, pool);
        }
    }
}

fn api_error(code: u16, reason: &str) -> stackable_operator::kube::Error {
    stackable_operator::kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} injected by test"),
        reason: reason.to_string(),
        code,
    })
}

fn pool_key(pool: &ClusterPool) -> Key {
    (pool.namespace().unwrap_or_default(), pool.name_any())
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("MemoryStore lock poisoned")
    }

    pub fn add_namespace(&self, name: &str, managed: bool) {
        let labels = managed.then(|| {
            BTreeMap::from([(
                NAMESPACE_MANAGED_BY_LABEL.to_string(),
                NAMESPACE_MANAGED_BY_VALUE.to_string(),
            )])
        });
        self.lock().namespaces.insert(
            name.to_string(),
            Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    labels,
                    ..ObjectMeta::default()
                },
                ..Namespace::default()
            },
        );
    }

    pub fn add_pool(&self, pool: ClusterPool) {
        let mut state = self.lock();
        state.persist_pool(pool_key(&pool), pool);
    }

    pub fn add_secret(&self, namespace: &str, name: &str) {
        self.lock().secrets.insert(
            (namespace.to_string(), name.to_string()),
            Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                ..Secret::default()
            },
        );
    }

    /// Sets the deletion timestamp, like the API server does when a client deletes the pool.
    pub fn request_pool_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        if let Some(mut pool) = state.pools.get(&key).cloned() {
            pool.metadata.deletion_timestamp = Some(Time(Utc::now()));
            state.persist_pool(key, pool);
        }
    }

    pub fn pool(&self, namespace: &str, name: &str) -> Option<ClusterPool> {
        self.lock()
            .pools
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .secrets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains_key(name)
    }

    /// Makes every subsequent occurrence of `call` fail with an internal server error.
    pub fn fail_on(&self, call: Call) {
        self.lock().failures.insert(call);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<ClusterPool>, Error> {
        let mut state = self.lock();
        state
            .record(Call::GetPool(name.to_string()))
            .with_context(|_| GetPoolSnafu {
                pool: ObjectRef::<ClusterPool>::new(name).within(namespace),
            })?;
        Ok(state
            .pools
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_pools(&self, namespace: &str) -> Result<Option<Vec<ClusterPool>>, Error> {
        let mut state = self.lock();
        state
            .record(Call::ListPools(namespace.to_string()))
            .context(ListPoolsSnafu { namespace })?;
        if !state.namespaces.contains_key(namespace) {
            return Ok(None);
        }
        Ok(Some(
            state
                .pools
                .iter()
                .filter(|((pool_namespace, _), _)| pool_namespace == namespace)
                .map(|(_, pool)| pool.clone())
                .collect(),
        ))
    }

    async fn merge_patch_pool(
        &self,
        _base: &ClusterPool,
        modified: &ClusterPool,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let key = pool_key(modified);
        let pool_ref = ObjectRef::from_obj(modified);
        state
            .record(Call::PatchPool(key.1.clone()))
            .with_context(|_| PatchPoolSnafu {
                pool: pool_ref.clone(),
            })?;
        let mut stored = state
            .pools
            .get(&key)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
            .context(PatchPoolSnafu { pool: pool_ref })?;
        stored.metadata.finalizers = modified.metadata.finalizers.clone();
        state.persist_pool(key, stored);
        Ok(())
    }

    async fn update_pool(&self, pool: &ClusterPool) -> Result<(), Error> {
        let mut state = self.lock();
        let key = pool_key(pool);
        let pool_ref = ObjectRef::from_obj(pool);
        state
            .record(Call::UpdatePool(key.1.clone()))
            .with_context(|_| UpdatePoolSnafu {
                pool: pool_ref.clone(),
            })?;
        let mut stored = match state.pools.get(&key) {
            Some(stored) if stored.metadata.resource_version == pool.metadata.resource_version => {
                Ok(stored.clone())
            }
            Some(_) => Err(api_error(409, "Conflict")),
            None => Err(api_error(404, "NotFound")),
        }
        .context(UpdatePoolSnafu { pool: pool_ref })?;
        stored.metadata.finalizers = pool.metadata.finalizers.clone();
        state.persist_pool(key, stored);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let mut state = self.lock();
        state
            .record(Call::GetSecret(name.to_string()))
            .with_context(|_| GetSecretSnafu {
                secret: ObjectRef::<Secret>::new(name).within(namespace),
            })?;
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_secret(&self, secret: &Secret) -> Result<(), Error> {
        let mut state = self.lock();
        let secret_ref = ObjectRef::from_obj(secret);
        state
            .record(Call::DeleteSecret(secret_ref.name.clone()))
            .context(DeleteSecretSnafu {
                secret: secret_ref.clone(),
            })?;
        state.secrets.remove(&(
            secret_ref.namespace.unwrap_or_default(),
            secret_ref.name,
        ));
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let mut state = self.lock();
        state
            .record(Call::GetNamespace(name.to_string()))
            .with_context(|_| GetNamespaceSnafu {
                namespace: ObjectRef::<Namespace>::new(name),
            })?;
        Ok(state.namespaces.get(name).cloned())
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let mut state = self.lock();
        let name = namespace.name_any();
        state
            .record(Call::DeleteNamespace(name.clone()))
            .with_context(|_| DeleteNamespaceSnafu {
                namespace: ObjectRef::from_obj(namespace),
            })?;
        // Contents are not cascaded
        state.namespaces.remove(&name);
        Ok(())
    }
}

/// Builds a pool in `namespace` that references the given Secrets.
///
/// Empty names leave the corresponding reference unset.
pub fn cluster_pool(
    namespace: &str,
    name: &str,
    platform: Option<(PlatformKind, &str)>,
    pull_secret: &str,
    install_config_secret: &str,
) -> ClusterPool {
    let secret_ref =
        |name: &str| (!name.is_empty()).then(|| LocalSecretReference::new(name));
    let mut platform_spec = Platform::default();
    if let Some((kind, credentials)) = platform {
        let cloud = Some(CloudPlatform {
            credentials_secret_ref: LocalSecretReference::new(credentials),
        });
        match kind {
            PlatformKind::Aws => platform_spec.aws = cloud,
            PlatformKind::Gcp => platform_spec.gcp = cloud,
            PlatformKind::Azure => platform_spec.azure = cloud,
        }
    }
    let mut pool = ClusterPool::new(
        name,
        ClusterPoolSpec {
            platform: platform_spec,
            pull_secret_ref: secret_ref(pull_secret),
            install_config_secret_template_ref: secret_ref(install_config_secret),
        },
    );
    pool.metadata.namespace = Some(namespace.to_string());
    pool
}
