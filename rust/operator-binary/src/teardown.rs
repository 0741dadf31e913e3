//! Releases the Secrets and the Namespace of a deleted [`ClusterPool`] once no sibling pool
//! refers to them any more.
//!
//! Sharing is decided by name: pools in the same namespace that reference a Secret of the same
//! name keep it alive. Provider credentials are only shared between pools of the same platform.

use clusterpool_operator_crd_utils::LocalSecretReference;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Namespace, Secret},
    kube::{api::DynamicObject, runtime::reflector::ObjectRef, ResourceExt},
};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info};

use crate::{
    crd::ClusterPool,
    store::{self, ResourceStore},
};

pub const NAMESPACE_MANAGED_BY_LABEL: &str = "open-cluster-management.io/managed-by";
pub const NAMESPACE_MANAGED_BY_VALUE: &str = "clusterpools";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("ClusterPool has no namespace"))]
    PoolHasNoNamespace,

    #[snafu(display("failed to list the ClusterPools sharing namespace {namespace:?}"))]
    ListPools {
        source: store::Error,
        namespace: String,
    },

    #[snafu(display("failed to look up {slot} {secret}"))]
    GetSecret {
        source: store::Error,
        slot: SecretSlot,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to delete {slot} {secret}"))]
    DeleteSecret {
        source: store::Error,
        slot: SecretSlot,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to look up {namespace}"))]
    GetNamespace {
        source: store::Error,
        namespace: ObjectRef<Namespace>,
    },

    #[snafu(display("failed to delete {namespace}"))]
    DeleteNamespace {
        source: store::Error,
        namespace: ObjectRef<Namespace>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The Secret or Namespace that the failed request concerned, if any.
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::PoolHasNoNamespace => None,
            Error::ListPools { .. } => None,
            Error::GetSecret { secret, .. } => Some(secret.clone().erase()),
            Error::DeleteSecret { secret, .. } => Some(secret.clone().erase()),
            Error::GetNamespace { namespace, .. } => Some(namespace.clone().erase()),
            Error::DeleteNamespace { namespace, .. } => Some(namespace.clone().erase()),
        }
    }
}

/// The Secrets a pool refers to, in the order they are released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum SecretSlot {
    #[strum(serialize = "install-config secret")]
    InstallConfig,
    #[strum(serialize = "pull secret")]
    PullSecret,
    #[strum(serialize = "provider credential secret")]
    ProviderCredentials,
}

impl SecretSlot {
    fn reference(self, pool: &ClusterPool) -> Option<&LocalSecretReference> {
        match self {
            SecretSlot::InstallConfig => pool.spec.install_config_secret_template_ref.as_ref(),
            SecretSlot::PullSecret => pool.spec.pull_secret_ref.as_ref(),
            SecretSlot::ProviderCredentials => pool
                .spec
                .platform
                .credentials()
                .map(|credentials| credentials.secret),
        }
    }
}

/// Which of a pool's Secrets are still referenced by another pool in its namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedSecrets {
    pub install_config: bool,
    pub pull_secret: bool,
    pub provider_credentials: bool,
}

impl SharedSecrets {
    /// Compares `pool` against every other pool in `pools`.
    ///
    /// `pools` may contain `pool` itself; it is recognized by name and skipped.
    pub fn scan(pool: &ClusterPool, pools: &[ClusterPool]) -> Self {
        let name = pool.name_any();
        let own_credentials = pool.spec.platform.credentials();
        pools
            .iter()
            .filter(|sibling| sibling.name_any() != name)
            .fold(Self::default(), |mut shared, sibling| {
                shared.install_config |= refer_to_same(
                    &pool.spec.install_config_secret_template_ref,
                    &sibling.spec.install_config_secret_template_ref,
                );
                shared.pull_secret |=
                    refer_to_same(&pool.spec.pull_secret_ref, &sibling.spec.pull_secret_ref);
                shared.provider_credentials |= matches!(
                    (own_credentials, sibling.spec.platform.credentials()),
                    (Some(own), Some(theirs)) if own.is_shared_with(&theirs)
                );
                shared
            })
    }

    pub fn is_shared(&self, slot: SecretSlot) -> bool {
        match slot {
            SecretSlot::InstallConfig => self.install_config,
            SecretSlot::PullSecret => self.pull_secret,
            SecretSlot::ProviderCredentials => self.provider_credentials,
        }
    }
}

fn refer_to_same(own: &Option<LocalSecretReference>, theirs: &Option<LocalSecretReference>) -> bool {
    matches!((own, theirs), (Some(own), Some(theirs)) if own.refers_to_same(theirs))
}

/// What happened to the pool's namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceDisposition {
    /// Other pools were listed in the namespace, so it was not considered.
    OtherPoolsRemain,
    /// The listing contained no pools at all, not even the one being deleted. The namespace is
    /// only considered when the pool is seen as the last one in it.
    PoolNotListed,
    /// The namespace is not labeled as managed by the pool provisioning.
    NotManaged,
    /// The namespace was already gone.
    NotFound,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownReport {
    pub shared: SharedSecrets,
    /// Secrets that this teardown deleted, in deletion order.
    pub deleted_secrets: Vec<String>,
    /// Unshared Secrets that did not exist (any more).
    pub absent_secrets: Vec<String>,
    pub namespace: NamespaceDisposition,
}

/// Deletes every Secret of `pool` that no sibling pool refers to, followed by the namespace if
/// `pool` is the last pool in it and the namespace is managed.
///
/// Safe to run repeatedly: Secrets and namespaces that are already gone are skipped.
pub async fn release_pool_resources(
    store: &dyn ResourceStore,
    pool: &ClusterPool,
) -> Result<TeardownReport> {
    let namespace = pool.namespace().context(PoolHasNoNamespaceSnafu)?;
    let Some(pools) = store
        .list_pools(&namespace)
        .await
        .with_context(|_| ListPoolsSnafu {
            namespace: namespace.clone(),
        })?
    else {
        info!(%namespace, "no ClusterPools found, nothing to clean up");
        return Ok(TeardownReport {
            shared: SharedSecrets::default(),
            deleted_secrets: Vec::new(),
            absent_secrets: Vec::new(),
            namespace: NamespaceDisposition::NotFound,
        });
    };

    let shared = SharedSecrets::scan(pool, &pools);
    info!(
        install_config = shared.install_config,
        pull_secret = shared.pull_secret,
        provider_credentials = shared.provider_credentials,
        "checked which secrets are still referenced by other ClusterPools"
    );
    debug!(
        platform = ?pool.spec.platform.kind(),
        provider_secret = ?SecretSlot::ProviderCredentials.reference(pool).map(|secret| &secret.name),
        "resolved provider credentials"
    );

    let mut deleted_secrets = Vec::new();
    let mut absent_secrets = Vec::new();
    for slot in SecretSlot::iter() {
        if shared.is_shared(slot) {
            continue;
        }
        let Some(secret) = slot.reference(pool).filter(|secret| !secret.name.is_empty()) else {
            continue;
        };
        if delete_secret_if_present(store, &namespace, slot, secret).await? {
            deleted_secrets.push(secret.name.clone());
        } else {
            absent_secrets.push(secret.name.clone());
        }
    }

    // The pool may already be missing from the listing, so siblings are counted by name
    let name = pool.name_any();
    let siblings = pools.iter().filter(|other| other.name_any() != name).count();
    info!(pools = pools.len(), siblings, %namespace, "counted ClusterPools in namespace");
    let disposition = if siblings > 0 {
        NamespaceDisposition::OtherPoolsRemain
    } else if pools.is_empty() {
        NamespaceDisposition::PoolNotListed
    } else {
        delete_namespace_if_managed(store, &namespace).await?
    };
    Ok(TeardownReport {
        shared,
        deleted_secrets,
        absent_secrets,
        namespace: disposition,
    })
}

/// Returns whether the Secret existed.
async fn delete_secret_if_present(
    store: &dyn ResourceStore,
    namespace: &str,
    slot: SecretSlot,
    secret_ref: &LocalSecretReference,
) -> Result<bool> {
    let secret_obj_ref = secret_ref.within(namespace);
    let Some(secret) = store
        .get_secret(namespace, &secret_ref.name)
        .await
        .with_context(|_| GetSecretSnafu {
            slot,
            secret: secret_obj_ref.clone(),
        })?
    else {
        debug!(secret = %secret_obj_ref, "{slot} is already gone");
        return Ok(false);
    };
    store
        .delete_secret(&secret)
        .await
        .with_context(|_| DeleteSecretSnafu {
            slot,
            secret: secret_obj_ref.clone(),
        })?;
    info!(secret = %secret_obj_ref, "deleted {slot}");
    Ok(true)
}

async fn delete_namespace_if_managed(
    store: &dyn ResourceStore,
    name: &str,
) -> Result<NamespaceDisposition> {
    let namespace_ref = ObjectRef::<Namespace>::new(name);
    let Some(namespace) = store
        .get_namespace(name)
        .await
        .with_context(|_| GetNamespaceSnafu {
            namespace: namespace_ref.clone(),
        })?
    else {
        return Ok(NamespaceDisposition::NotFound);
    };
    if !is_managed(&namespace) {
        info!(namespace = name, "did not delete namespace, it is still in use");
        return Ok(NamespaceDisposition::NotManaged);
    }
    store
        .delete_namespace(&namespace)
        .await
        .context(DeleteNamespaceSnafu {
            namespace: namespace_ref,
        })?;
    info!(namespace = name, "deleted namespace");
    Ok(NamespaceDisposition::Deleted)
}

fn is_managed(namespace: &Namespace) -> bool {
    namespace
        .labels()
        .get(NAMESPACE_MANAGED_BY_LABEL)
        .is_some_and(|value| value == NAMESPACE_MANAGED_BY_VALUE)
}
