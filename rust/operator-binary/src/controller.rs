//! Finalizer-gated cleanup of [`ClusterPool`]s
//!
//! Every live pool gets [`FINALIZER`]. Once a pool is marked for deletion, the Secrets and the
//! namespace it no longer shares with other pools are released, and the finalizer is removed so
//! that the API server can finish deleting the pool.

use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use futures::StreamExt;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    kube::{
        api::DynamicObject,
        runtime::{controller, reflector::ObjectRef, watcher, Controller},
        ResourceExt,
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
    namespace::WatchNamespace,
};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    crd::ClusterPool,
    store::{self, KubeStore, ResourceStore},
    teardown::{self, TeardownReport},
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "clusterpool-cleanup";
pub const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

/// Blocks the removal of a pool until its resources have been released.
pub const FINALIZER: &str = "clusterpools-controller.open-cluster-management.io/cleanup";

pub struct ControllerConfig {
    pub max_concurrent_reconciles: u16,
    pub error_requeue_interval: Duration,
}

pub async fn start(
    client: &stackable_operator::client::Client,
    watch_namespace: &WatchNamespace,
    config: ControllerConfig,
) {
    if config.max_concurrent_reconciles > 1 {
        warn!(
            max_concurrent_reconciles = config.max_concurrent_reconciles,
            "reconciling ClusterPools concurrently, pools deleted at the same time may race on shared secrets"
        );
    }
    // Deleted pools are not dispatched, the final update carrying the deletion timestamp is
    Controller::new(
        watch_namespace.get_api::<ClusterPool>(client),
        watcher::Config::default(),
    )
    .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
    .shutdown_on_signal()
    .run(
        reconcile,
        error_policy,
        Arc::new(Ctx {
            store: Box::new(KubeStore::new(
                client.as_kube_client(),
                FULL_CONTROLLER_NAME,
            )),
            error_requeue_interval: config.error_requeue_interval,
        }),
    )
    .for_each(|res| async move {
        report_controller_reconciled(client, FULL_CONTROLLER_NAME, &res);
    })
    .await;
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("ClusterPool has no namespace"))]
    PoolHasNoNamespace,

    #[snafu(display("failed to get ClusterPool"))]
    GetPool { source: store::Error },

    #[snafu(display("failed to add finalizer to ClusterPool"))]
    AddFinalizer { source: store::Error },

    #[snafu(display("failed to release resources of ClusterPool"))]
    Teardown { source: teardown::Error },

    #[snafu(display("failed to remove finalizer from ClusterPool"))]
    RemoveFinalizer { source: store::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::PoolHasNoNamespace => None,
            Error::GetPool { .. } => None,
            Error::AddFinalizer { .. } => None,
            Error::Teardown { source } => source.secondary_object(),
            Error::RemoveFinalizer { .. } => None,
        }
    }
}

struct Ctx {
    store: Box<dyn ResourceStore>,
    error_requeue_interval: Duration,
}

/// Lifecycle of a pool as seen by this controller.
#[derive(Debug)]
pub enum PoolState {
    /// The pool no longer exists.
    Gone,
    NoFinalizer(ClusterPool),
    FinalizerSet(ClusterPool),
    /// The pool carries a deletion timestamp, with or without our finalizer.
    Deleting(ClusterPool),
}

impl PoolState {
    pub fn of(pool: Option<ClusterPool>) -> Self {
        match pool {
            None => PoolState::Gone,
            Some(pool) if pool.metadata.deletion_timestamp.is_some() => PoolState::Deleting(pool),
            Some(pool) if has_finalizer(&pool) => PoolState::FinalizerSet(pool),
            Some(pool) => PoolState::NoFinalizer(pool),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Gone,
    /// The finalizer was already in place, nothing was written.
    AlreadyRegistered,
    FinalizerAdded,
    Finalized {
        report: TeardownReport,
        /// `false` if the finalizer had already been removed (or was never added).
        finalizer_removed: bool,
    },
}

async fn reconcile(pool: Arc<ClusterPool>, ctx: Arc<Ctx>) -> Result<controller::Action> {
    let namespace = pool.namespace().context(PoolHasNoNamespaceSnafu)?;
    let outcome = reconcile_pool(ctx.store.as_ref(), &namespace, &pool.name_any()).await?;
    debug!(?outcome, "reconciled ClusterPool");
    Ok(controller::Action::await_change())
}

fn error_policy(_pool: Arc<ClusterPool>, _error: &Error, ctx: Arc<Ctx>) -> controller::Action {
    controller::Action::requeue(ctx.error_requeue_interval)
}

/// Drives the pool `namespace`/`name` one step through its [`PoolState`]s.
///
/// The pool is always read fresh from `store`, so redelivered and stale events are harmless.
pub async fn reconcile_pool(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<Outcome> {
    let pool = store.get_pool(namespace, name).await.context(GetPoolSnafu)?;
    match PoolState::of(pool) {
        PoolState::Gone => {
            info!(namespace, name, "ClusterPool is gone");
            Ok(Outcome::Gone)
        }
        PoolState::FinalizerSet(_) => Ok(Outcome::AlreadyRegistered),
        PoolState::NoFinalizer(pool) => {
            add_finalizer(store, &pool).await?;
            Ok(Outcome::FinalizerAdded)
        }
        PoolState::Deleting(pool) => {
            info!(namespace, name, "releasing resources of deleted ClusterPool");
            let report = teardown::release_pool_resources(store, &pool)
                .await
                .context(TeardownSnafu)?;
            info!(
                namespace,
                name,
                deleted_secrets = ?report.deleted_secrets,
                namespace_disposition = ?report.namespace,
                "released resources of ClusterPool"
            );
            let finalizer_removed = remove_finalizer(store, pool).await?;
            Ok(Outcome::Finalized {
                report,
                finalizer_removed,
            })
        }
    }
}

fn has_finalizer(pool: &ClusterPool) -> bool {
    pool.finalizers().iter().any(|finalizer| finalizer == FINALIZER)
}

async fn add_finalizer(store: &dyn ResourceStore, pool: &ClusterPool) -> Result<()> {
    let mut modified = pool.clone();
    modified.finalizers_mut().push(FINALIZER.to_string());
    store
        .merge_patch_pool(pool, &modified)
        .await
        .context(AddFinalizerSnafu)?;
    info!(pool = %ObjectRef::from_obj(pool), "added finalizer to ClusterPool");
    Ok(())
}

/// Returns whether the finalizer had to be removed.
async fn remove_finalizer(store: &dyn ResourceStore, mut pool: ClusterPool) -> Result<bool> {
    if !has_finalizer(&pool) {
        return Ok(false);
    }
    pool.finalizers_mut().retain(|finalizer| finalizer != FINALIZER);
    store
        .update_pool(&pool)
        .await
        .context(RemoveFinalizerSnafu)?;
    info!(pool = %ObjectRef::from_obj(&pool), "removed finalizer from ClusterPool");
    Ok(true)
}
