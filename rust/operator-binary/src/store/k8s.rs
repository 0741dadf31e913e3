//! [`ResourceStore`] backed by the Kubernetes API server

use async_trait::async_trait;
use serde_json::json;
use snafu::{OptionExt as _, ResultExt as _};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Namespace, Secret},
    kube::{
        api::{Api, DeleteParams, ListParams, Patch, PatchParams},
        runtime::reflector::ObjectRef,
        Client, ResourceExt,
    },
};

use super::{
    is_not_found, DeleteNamespaceSnafu, DeleteSecretSnafu, Error, GetNamespaceSnafu,
    GetPoolSnafu, GetSecretSnafu, ListPoolsSnafu, PatchPoolSnafu, PoolHasNoNamespaceSnafu,
    ResourceStore, UpdatePoolSnafu,
};
use crate::crd::ClusterPool;

pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn pool_api(&self, pool: &ClusterPool) -> Result<Api<ClusterPool>, Error> {
        let namespace = pool.namespace().with_context(|| PoolHasNoNamespaceSnafu {
            pool: ObjectRef::from_obj(pool),
        })?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_pool(&self, namespace: &str, name: &str) -> Result<Option<ClusterPool>, Error> {
        Api::<ClusterPool>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetPoolSnafu {
                pool: ObjectRef::<ClusterPool>::new(name).within(namespace),
            })
    }

    async fn list_pools(&self, namespace: &str) -> Result<Option<Vec<ClusterPool>>, Error> {
        match Api::<ClusterPool>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await
        {
            Ok(pools) => Ok(Some(pools.items)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context(ListPoolsSnafu { namespace }),
        }
    }

    async fn merge_patch_pool(
        &self,
        base: &ClusterPool,
        modified: &ClusterPool,
    ) -> Result<(), Error> {
        // Finalizers are the only field the controller ever changes
        if base.finalizers() == modified.finalizers() {
            return Ok(());
        }
        let patch = json!({
            "metadata": {
                "finalizers": modified.finalizers(),
            }
        });
        self.pool_api(modified)?
            .patch(&modified.name_any(), &self.patch_params(), &Patch::Merge(&patch))
            .await
            .with_context(|_| PatchPoolSnafu {
                pool: ObjectRef::from_obj(modified),
            })?;
        Ok(())
    }

    async fn update_pool(&self, pool: &ClusterPool) -> Result<(), Error> {
        // The resource version turns the patch into a compare-and-swap. The `spec` is never sent,
        // because the typed view does not carry every field Hive stores.
        let patch = json!({
            "metadata": {
                "resourceVersion": pool.resource_version(),
                "finalizers": pool.finalizers(),
            }
        });
        self.pool_api(pool)?
            .patch(&pool.name_any(), &self.patch_params(), &Patch::Merge(&patch))
            .await
            .with_context(|_| UpdatePoolSnafu {
                pool: ObjectRef::from_obj(pool),
            })?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetSecretSnafu {
                secret: ObjectRef::<Secret>::new(name).within(namespace),
            })
    }

    async fn delete_secret(&self, secret: &Secret) -> Result<(), Error> {
        let secret_ref = ObjectRef::from_obj(secret);
        let api = Api::<Secret>::namespaced(
            self.client.clone(),
            secret_ref.namespace.as_deref().unwrap_or_default(),
        );
        let deleted = api.delete(&secret_ref.name, &DeleteParams::default()).await;
        match deleted {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context(DeleteSecretSnafu { secret: secret_ref }),
        }
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        Api::<Namespace>::all(self.client.clone())
            .get_opt(name)
            .await
            .with_context(|_| GetNamespaceSnafu {
                namespace: ObjectRef::<Namespace>::new(name),
            })
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let namespace_ref = ObjectRef::from_obj(namespace);
        let deleted = Api::<Namespace>::all(self.client.clone())
            .delete(&namespace_ref.name, &DeleteParams::default())
            .await;
        match deleted {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context(DeleteNamespaceSnafu {
                namespace: namespace_ref,
            }),
        }
    }
}
