use std::io;

use k8s_openapi::api::core::v1::NodeAddress;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node {node} has no preferred address (addresses: {})", format_addresses(.addresses))]
    NoPreferredAddress {
        node: String,
        addresses: Vec<NodeAddress>,
    },
    #[error("unsupported node-access network {network}: {reason}")]
    UnsupportedNetwork { network: String, reason: &'static str },
    #[error("cannot translate address {address}: not an IPv4 address")]
    UnsupportedAddress { address: String },
    #[error("failed to list nodes: {0}")]
    ListNodes(String),
    #[error("failed to ensure jump rule from {chain}: {source}")]
    JumpRule {
        chain: String,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to execute `{command}`: {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with code {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("`{command}` terminated abnormally")]
    Terminated { command: String },
}

fn format_addresses(addresses: &[NodeAddress]) -> String {
    let formatted = addresses
        .iter()
        .map(|a| format!("{}={}", a.type_, a.address))
        .collect::<Vec<_>>();
    format!("[{}]", formatted.join(", "))
}
