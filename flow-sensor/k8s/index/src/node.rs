//! Node addresses

use crate::Index;
use k8s_openapi::api::core::v1 as k8s;
use std::net::IpAddr;
use tracing::{debug, instrument, warn};

const ADDRESS_TYPES: [&str; 2] = ["InternalIP", "ExternalIP"];

impl kubert::index::IndexClusterResource<k8s::Node> for Index {
    fn apply(&mut self, node: k8s::Node) {
        self.apply_node(node)
    }

    fn delete(&mut self, name: String) {
        self.delete_node(&name)
    }
}

impl Index {
    #[instrument(skip(self, node), fields(name = ?node.metadata.name))]
    fn apply_node(&mut self, node: k8s::Node) {
        let name = match node.metadata.name {
            Some(name) => name,
            None => {
                warn!("Ignoring node without a name");
                return;
            }
        };

        let mut ips = Vec::new();
        let addresses = node
            .status
            .iter()
            .flat_map(|status| status.addresses.iter().flatten())
            .filter(|addr| ADDRESS_TYPES.contains(&addr.type_.as_str()));
        for addr in addresses {
            match addr.address.parse::<IpAddr>() {
                Ok(ip) if !ips.contains(&ip) => ips.push(ip),
                Ok(_) => {}
                Err(error) => warn!(%error, address = %addr.address, "Invalid node address"),
            }
        }

        self.delete_node(&name);
        for ip in &ips {
            self.nodes_by_ip.insert(*ip, name.clone());
        }
        debug!(?ips, "Indexed");
        self.nodes.insert(name, ips);
    }

    #[instrument(skip(self))]
    fn delete_node(&mut self, name: &str) {
        if let Some(ips) = self.nodes.remove(name) {
            for ip in ips {
                if self.nodes_by_ip.get(&ip).is_some_and(|node| node == name) {
                    self.nodes_by_ip.remove(&ip);
                }
            }
            debug!("Deleted");
        }
    }
}
