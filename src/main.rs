use std::{path::Path, time::Duration};

use anyhow::anyhow;
use clap::Parser;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use kubeletdnat::*;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_logging("KUBELETDNAT_LOG_LEVEL");
    print_startup_string(APP_NAME);

    let opts = Opts::parse();
    debug!("parsed options: {opts:?}");

    let translator = Translator::from(OctetPrefix::new(opts.node_access_network)?);
    info!("translating kubelet addresses into {}", opts.node_access_network);

    let client = kube_client(opts.kubeconfig.as_deref()).await?;
    let (nodes, events) = watch_nodes(client);

    info!("waiting for node cache to sync");
    nodes
        .wait_until_ready()
        .await
        .map_err(|_| anyhow!("node watch stopped before the cache synced"))?;

    let mut operator = Operator::new(IptablesBackend::new(opts.executor), Some(translator));

    // single consumer: reconciles never overlap
    let triggers = Schedule::new(
        ReceiverStream::new(events),
        Duration::from_secs(opts.resync_period_secs),
        Duration::from_millis(opts.debounce_millis),
    );
    tokio::pin!(triggers);

    if let Err(e) = operator.reconcile("startup", &nodes) {
        warn!("{e}");
    }
    while let Some(trigger) = triggers.next().await {
        match operator.reconcile(&trigger.to_string(), &nodes) {
            Ok(outcome) => debug!("{outcome}"),
            Err(e) => warn!("{e}"),
        }
    }

    Err(anyhow!("node event stream ended"))
}

async fn kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}
