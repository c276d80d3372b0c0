//! # Node aggregator: one task per node per spec.
//!
//! Owns one [`NodeRecord`] and appends every routed message to it. A snapshot
//! request is answered with a clone of the record; after that the task accepts
//! nothing else and exits.

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::core::child::Child;
use crate::model::{NodeMessage, NodeRecord, NodeTest};

pub(crate) enum NodeCommand {
    Put(NodeMessage),
    Snapshot(oneshot::Sender<NodeRecord>),
    /// Stops processing without exiting, to exercise snapshot deadlines.
    #[cfg(test)]
    Stall,
}

pub(crate) fn spawn(node: &NodeTest) -> Child<NodeCommand> {
    let record = NodeRecord::new(node.index, node.role.clone());
    Child::spawn(move |rx| run(record, rx))
}

async fn run(mut record: NodeRecord, mut rx: mpsc::UnboundedReceiver<NodeCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            NodeCommand::Put(message) => {
                if !record.put(message) {
                    trace!(node = record.node_index(), "dropped message for another node");
                }
            }
            NodeCommand::Snapshot(reply) => {
                let _ = reply.send(record.clone());
                break;
            }
            #[cfg(test)]
            NodeCommand::Stall => std::future::pending::<()>().await,
        }
    }
}
