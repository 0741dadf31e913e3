use clap::{crate_description, crate_version, Parser};
use stackable_operator::{
    cli::Command, logging::TracingTarget, namespace::WatchNamespace, CustomResourceExt,
};

use crate::controller::ControllerConfig;

mod controller;
mod crd;
mod store;
mod teardown;

pub const APP_NAME: &str = "clusterpool-cleanup";
pub const OPERATOR_NAME: &str = "clusterpools.open-cluster-management.io";

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<ClusterPoolOperatorRun>,
}

#[derive(clap::Parser)]
struct ClusterPoolOperatorRun {
    /// Namespace to watch for ClusterPools, all namespaces if empty
    #[arg(long, env, default_value = "")]
    watch_namespace: WatchNamespace,
    /// Number of ClusterPools that may be reconciled at the same time
    #[arg(long, env, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    max_concurrent_reconciles: u16,
    /// Delay before a failed reconciliation is retried
    #[arg(long, env, default_value = "5s")]
    error_requeue_interval: stackable_operator::time::Duration,
    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            crd::ClusterPool::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(ClusterPoolOperatorRun {
            watch_namespace,
            max_concurrent_reconciles,
            error_requeue_interval,
            tracing_target,
        }) => {
            stackable_operator::logging::initialize_logging(
                "CLUSTERPOOL_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string()))
                    .await?;
            controller::start(
                &client,
                &watch_namespace,
                ControllerConfig {
                    max_concurrent_reconciles,
                    error_requeue_interval: error_requeue_interval.into(),
                },
            )
            .await;
        }
    }
    Ok(())
}
