use std::time::Duration;

pub mod backend;
pub mod cli;
pub mod error;
pub mod executor;
pub mod logging;
pub mod operator;
pub mod res;
pub mod rules;
pub mod schedule;
pub mod state;
pub mod translate;
pub mod watcher;

pub use backend::{Backend, IptablesBackend, MemoryBackend};
pub use cli::*;
pub use error::{Error, Result};
pub use logging::*;
pub use operator::{Operator, Outcome};
pub use res::{compile, NodeLister, PREFERRED_ADDRESS_TYPES};
pub use rules::{Canonical, DnatRule, RuleSet};
pub use schedule::{Schedule, Trigger};
pub use state::{ControllerState, NodeEvent, NodeSet};
pub use translate::{OctetPrefix, Translate, Translator};
pub use watcher::watch_nodes;

pub use k8s_openapi::api::core::v1::Node as CoreNode;

pub const APP_NAME: &str = "kubeletdnat-controller";
pub const CHAIN: &str = "node-translation";
pub const NAT_TABLE: &str = "nat";
pub const OUTPUT_CHAIN: &str = "OUTPUT";
pub const DEFAULT_KUBELET_PORT: i32 = 10250;
pub const RESYNC_PERIOD: Duration = Duration::from_secs(15);
pub const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(500);
