//! Strategies mapping a node's (address, port) to the destination reachable
//! through the node-access network.

use std::net::Ipv4Addr;

use enum_dispatch::enum_dispatch;
use ipnet::{IpNet, Ipv4Net};

use crate::{Error, Result};

#[enum_dispatch]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translator {
    OctetPrefix,
}

#[enum_dispatch(Translator)]
pub trait Translate {
    /// Returns the `address:port` destination for an iptables `--to` argument.
    fn translate(&self, address: &str, port: &str) -> Result<String>;
}

/// Keeps the first two octets of the node-access network and the last two
/// octets of the node address. Not a routing computation: nodes are assumed
/// to follow the same /16 addressing convention as the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OctetPrefix {
    network: Ipv4Net,
}

impl OctetPrefix {
    pub fn new(network: IpNet) -> Result<Self> {
        let unsupported =
            |reason| Error::UnsupportedNetwork { network: network.to_string(), reason };
        match network {
            IpNet::V4(net) if net.prefix_len() <= 16 => Ok(Self { network: net }),
            IpNet::V4(_) => Err(unsupported("prefix must be /16 or shorter")),
            IpNet::V6(_) => Err(unsupported("only IPv4 networks are supported")),
        }
    }
}

impl Translate for OctetPrefix {
    fn translate(&self, address: &str, port: &str) -> Result<String> {
        let original: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::UnsupportedAddress { address: address.to_owned() })?;
        let [a, b, ..] = self.network.network().octets();
        let [.., c, d] = original.octets();
        Ok(format!("{}:{port}", Ipv4Addr::new(a, b, c, d)))
    }
}
