use crate::{
    index::{self, Collaborators, Node, NodeMetrics, VnidMap},
    KubeCluster, KubeStore, RuleIndex,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "vnid-controller",
    about = "Keeps a node's dataplane in sync with its cluster's VNID assignments"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "vnid_controller=info,warn",
        env = "VNID_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The logical network whose NetNamespaces this node follows.
    #[clap(long, default_value = "default", env = "VNID_CONTROLLER_NETWORK")]
    network_name: String,

    /// The name of the node this controller runs on.
    #[clap(long, env = "NODE_NAME")]
    node_name: String,

    /// How long to wait, in milliseconds, before resubscribing to a failed watch.
    #[clap(long, default_value = "1000")]
    watch_restart_delay: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            network_name,
            node_name,
            watch_restart_delay,
        } = self;

        let vnids = VnidMap::shared();

        let mut prom = <Registry>::default();
        let node_reg = prom.sub_registry_with_prefix("node");
        let node_metrics = NodeMetrics::register(node_reg);
        index::metrics::register_vnids(node_reg, vnids.clone());
        let dataplane = RuleIndex::shared(vnids.clone());
        RuleIndex::register(
            prom.sub_registry_with_prefix("dataplane"),
            dataplane.clone(),
        );
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let cluster = Arc::new(KubeCluster::new(runtime.client(), node_name.clone()));
        let node = Node::new(
            index::Config {
                network: network_name,
                watch_restart_delay: Duration::from_millis(watch_restart_delay),
            },
            vnids,
            Collaborators {
                store: Arc::new(KubeStore::new(runtime.client())),
                cluster: cluster.clone(),
                pods: cluster,
                dataplane,
            },
            node_metrics,
        );

        // Serving pods or services from a partial table could grant or deny connectivity
        // incorrectly, so startup fails if the assignments can't be loaded.
        node.start(runtime.shutdown_handle()).await?;
        info!(node = %node_name, "Started");

        // Block the main thread on the shutdown signal. Once it fires, wait for the watches to
        // stop before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
