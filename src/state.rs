use std::{collections::BTreeSet, fmt, mem};

use kube::{runtime::watcher::Event, ResourceExt};

use crate::CoreNode;

/// What the reconcile loop remembers between runs.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct ControllerState {
    last_applied_hash: Option<String>,
}

impl ControllerState {
    pub fn is_current(&self, hash: &str) -> bool {
        self.last_applied_hash.as_deref() == Some(hash)
    }

    /// Only call after the ruleset with this hash has been applied.
    pub fn commit(&mut self, hash: String) {
        self.last_applied_hash = Some(hash);
    }

    pub fn reset(&mut self) {
        self.last_applied_hash = None;
    }

    pub fn last_applied_hash(&self) -> Option<&str> {
        self.last_applied_hash.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    Added(String),
    Updated(String),
    Deleted(String),
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Added(name) => write!(f, "node added: {name}"),
            NodeEvent::Updated(name) => write!(f, "node updated: {name}"),
            NodeEvent::Deleted(name) => write!(f, "node deleted: {name}"),
        }
    }
}

/// Tracks node names seen on the watch so applied objects can be told apart
/// as additions or updates, and relists can report the nodes that vanished.
#[derive(Default, Debug)]
pub struct NodeSet {
    known: BTreeSet<String>,
    relisted: Option<BTreeSet<String>>,
}

impl NodeSet {
    pub fn observe(&mut self, event: Event<CoreNode>) -> Vec<NodeEvent> {
        match event {
            Event::Apply(node) => vec![self.applied(node.name_any())],
            Event::Delete(node) => {
                let name = node.name_any();
                self.known.remove(&name);
                vec![NodeEvent::Deleted(name)]
            }
            Event::Init => {
                self.relisted = Some(BTreeSet::new());
                Vec::new()
            }
            Event::InitApply(node) => {
                let name = node.name_any();
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(name.clone());
                }
                vec![self.applied(name)]
            }
            Event::InitDone => match self.relisted.take() {
                Some(relisted) => {
                    let gone = mem::replace(&mut self.known, relisted);
                    gone.difference(&self.known)
                        .cloned()
                        .map(NodeEvent::Deleted)
                        .collect()
                }
                None => Vec::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    fn applied(&mut self, name: String) -> NodeEvent {
        if self.known.insert(name.clone()) {
            NodeEvent::Added(name)
        } else {
            NodeEvent::Updated(name)
        }
    }
}
