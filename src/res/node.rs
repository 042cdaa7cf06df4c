use k8s_openapi::api::core::v1::NodeStatus;
use kube::ResourceExt;

use crate::{CoreNode, DnatRule, Error, Result, Translator, DEFAULT_KUBELET_PORT};

/// Address types tried, in order, when picking the address a rule matches on.
pub const PREFERRED_ADDRESS_TYPES: &[&str] = &["ExternalIP"];

pub fn compile<'a>(node: &CoreNode, translator: Option<&'a Translator>) -> Result<DnatRule<'a>> {
    let status = node.status.as_ref();
    let original_address = preferred_address(status).ok_or_else(|| Error::NoPreferredAddress {
        node: node.name_any(),
        addresses: status.and_then(|s| s.addresses.clone()).unwrap_or_default(),
    })?;

    Ok(DnatRule {
        node: node.name_any(),
        original_address,
        original_port: kubelet_port(status).to_string(),
        translator,
    })
}

fn preferred_address(status: Option<&NodeStatus>) -> Option<String> {
    let addresses = status?.addresses.as_ref()?;
    PREFERRED_ADDRESS_TYPES.iter().find_map(|preferred| {
        addresses
            .iter()
            .find(|a| a.type_ == *preferred)
            .map(|a| a.address.to_owned())
    })
}

fn kubelet_port(status: Option<&NodeStatus>) -> i32 {
    status
        .and_then(|s| s.daemon_endpoints.as_ref())
        .and_then(|d| d.kubelet_endpoint.as_ref())
        .map(|e| e.port)
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_KUBELET_PORT)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::{
        api::core::v1::{DaemonEndpoint, NodeAddress, NodeDaemonEndpoints, NodeStatus},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    use crate::CoreNode;

    pub fn node(name: &str, addresses: &[(&str, &str)], port: i32) -> CoreNode {
        CoreNode {
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(type_, address)| NodeAddress {
                            type_: (*type_).into(),
                            address: (*address).into(),
                        })
                        .collect(),
                ),
                daemon_endpoints: Some(NodeDaemonEndpoints {
                    kubelet_endpoint: Some(DaemonEndpoint { port }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn external(name: &str, ip: &str, port: i32) -> CoreNode {
        node(name, &[("InternalIP", "192.168.0.1"), ("ExternalIP", ip)], port)
    }
}
