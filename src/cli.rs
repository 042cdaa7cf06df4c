use std::path::PathBuf;

use clap::{crate_description, Args, Parser};
use ipnet::IpNet;

#[derive(Parser, Debug)]
#[clap(about = crate_description!())]
pub struct Opts {
    /// Path to the kubeconfig used to watch cluster nodes (in-cluster config when absent)
    #[clap(long, value_parser, env = "KUBELETDNAT_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Network (CIDR) through which node kubelets are reachable
    #[clap(long, value_parser, env = "KUBELETDNAT_NODE_ACCESS_NETWORK")]
    pub node_access_network: IpNet,

    /// Reconcile at least this often, even without node events
    #[clap(long, value_parser, env = "KUBELETDNAT_RESYNC_PERIOD_SECS", default_value = "15")]
    pub resync_period_secs: u64,

    /// Coalesce node events arriving within this window into one reconcile
    #[clap(long, value_parser, env = "KUBELETDNAT_DEBOUNCE_MILLIS", default_value = "500")]
    pub debounce_millis: u64,

    #[clap(flatten)]
    pub executor: Executor,
}

#[derive(Args, Debug, Clone)]
pub struct Executor {
    /// iptables binary used for the jump rule
    #[clap(long, value_parser, env = "KUBELETDNAT_IPTABLES", default_value = "iptables")]
    pub iptables: String,

    /// iptables-restore binary used to replace the managed chain
    #[clap(
        long,
        value_parser,
        env = "KUBELETDNAT_IPTABLES_RESTORE",
        default_value = "iptables-restore"
    )]
    pub iptables_restore: String,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            iptables: "iptables".to_owned(),
            iptables_restore: "iptables-restore".to_owned(),
        }
    }
}
