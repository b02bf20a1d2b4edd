use crate::{
    index,
    manager::{self, FlowManager},
    transport::{central, collector},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use k8s_openapi::api::core::v1 as k8s;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use tokio::{net::TcpListener, sync::mpsc, time::Duration};
use tracing::{error, info_span, Instrument};

// At most one update is produced per cycle.
const UPDATE_QUEUE_SIZE: usize = 4;

#[derive(Debug, Parser)]
#[clap(name = "flow-sensor", about = "Reports network flows between cluster entities")]
pub struct Args {
    #[clap(long, default_value = "flow_sensor=info,warn", env = "FLOW_SENSOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The address on which node collectors connect.
    #[clap(long, default_value = "0.0.0.0:8443")]
    collector_addr: SocketAddr,

    /// The `host:port` of the central service that receives flow updates.
    #[clap(long)]
    central_addr: String,

    #[clap(long, default_value = "30")]
    flow_update_interval_secs: u64,

    /// How long an unresolved connection may wait for cluster state before it is attributed to
    /// the internet.
    #[clap(long, default_value = "10")]
    freshness_window_secs: u64,

    /// How long a disconnected collector's connections are retained.
    #[clap(long, default_value = "300")]
    host_deletion_grace_period_secs: u64,
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
            collector_addr,
            central_addr,
            flow_update_interval_secs,
            freshness_window_secs,
            host_deletion_grace_period_secs,
        } = self;

        let config = manager::Config {
            cycle_interval: Duration::from_secs(flow_update_interval_secs),
            freshness_window: Duration::from_secs(freshness_window_secs),
            deletion_grace_period: Duration::from_secs(host_deletion_grace_period_secs),
        };

        // Build the index of cluster entities against which connections are resolved.
        let index = index::Index::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("flow_index"), index.clone());
        let metrics = manager::Metrics::register(prom.sub_registry_with_prefix("flow_manager"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(index.clone(), pods).instrument(info_span!("pods")));

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index.clone(), nodes).instrument(info_span!("nodes")));

        let flows = FlowManager::new(index, config, metrics.clone());

        // Accept collector sessions into the manager's host ledgers.
        let listener = TcpListener::bind(collector_addr)
            .await
            .with_context(|| format!("failed to bind collector server on {collector_addr}"))?;
        tokio::spawn(
            collector::serve(
                listener,
                flows.registry(),
                metrics,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("collector")),
        );

        // Forward flow updates to the central service. If the forwarder fails, its receiver is
        // dropped and the driver stops.
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_SIZE);
        tokio::spawn(
            async move {
                if let Err(error) = central::forward(central_addr, updates_rx).await {
                    error!(?error, "Flow forwarder failed");
                }
            }
            .instrument(info_span!("central")),
        );

        let driver = tokio::spawn(
            flows
                .run(updates_tx, runtime.shutdown_handle())
                .instrument(info_span!("flows")),
        );

        // Block the main thread on the shutdown signal, unless flow updates can no longer be
        // delivered.
        let run = runtime.run();
        tokio::pin!(run);
        let res = tokio::select! {
            res = &mut run => res,
            res = driver => {
                // The driver only stops on its own when updates can no longer be delivered.
                res.context("flow driver panicked")??;
                run.await
            }
        };
        if res.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
