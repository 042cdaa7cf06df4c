use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use kube::{
    runtime::{
        reflector::{self, Store},
        utils::StreamBackoff,
        watcher::{self, Config},
    },
    Api, Client,
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::{logging::*, CoreNode, NodeEvent, NodeSet};

const EVENT_BUFFER: usize = 1024;

/// Starts a reflector over all nodes. The returned store is the node cache;
/// the receiver gets one [`NodeEvent`] per add, update or delete.
/// The receiver closes if the watch task stops.
pub fn watch_nodes(client: Client) -> (Store<CoreNode>, mpsc::Receiver<NodeEvent>) {
    let (reader, writer) = reflector::store();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let stream = reflector::reflector(
        writer,
        StreamBackoff::new(
            watcher::watcher(Api::<CoreNode>::all(client), Config::default()),
            backoff(),
        ),
    );

    tokio::spawn(async move {
        let mut nodes = NodeSet::default();
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("node watch failed: {e}");
                    continue;
                }
            };
            for node_event in nodes.observe(event) {
                debug!("{node_event}");
                if tx.send(node_event).await.is_err() {
                    info!("node event receiver dropped, stopping watch");
                    return;
                }
            }
        }
        warn!("node watch ended");
    });

    (reader, rx)
}

fn backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(800))
        .with_max_interval(Duration::from_secs(30))
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build()
}
