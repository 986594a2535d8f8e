//! Topology validation.

use std::collections::{HashMap, HashSet};

use crate::{RangecoreError, RangecoreResult};

use super::topology::{GatewayDef, ServerDef, Topology};
use super::EXTERNAL_NET_ID;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Topology {
    /// Performs comprehensive validation of the topology.
    /// This includes checking for:
    /// - Unique network, gateway and server ids within their category
    /// - Valid network references from gateways and servers
    /// - Valid checker/attacker server references
    /// - Declared fixed IPs falling inside their network's CIDR
    /// - A network path to the external namespace for every server flagged
    ///   `external`
    ///
    /// All violations are collected and reported together rather than
    /// failing on the first.
    pub fn validate(&self) -> RangecoreResult<()> {
        self.validate_with(EXTERNAL_NET_ID)
    }

    /// Like [`Topology::validate`] but with an explicit external namespace id.
    pub fn validate_with(&self, external_net_id: &str) -> RangecoreResult<()> {
        let mut errors = Vec::new();

        let network_ids = self.validate_network_ids(&mut errors);
        let server_ids = self.validate_server_ids(&mut errors);
        self.validate_gateway_ids(&mut errors);

        for gateway in self.get_gateways() {
            self.validate_gateway_nets(gateway, &network_ids, external_net_id, &mut errors);
        }

        let external_gateways = self.external_gateway_nets(external_net_id);

        for server in self.get_servers() {
            self.validate_server_nets(server, &network_ids, external_net_id, &mut errors);
            self.validate_server_references(server, &server_ids, &mut errors);
            self.validate_server_fixed_ips(server, &mut errors);
            if *server.get_external() {
                self.validate_external_reachability(
                    server,
                    external_net_id,
                    &external_gateways,
                    &mut errors,
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RangecoreError::TopologyValidation(errors))
        }
    }

    /// Ensures network ids are unique within the topology.
    fn validate_network_ids(&self, errors: &mut Vec<String>) -> HashSet<&str> {
        let mut network_ids = HashSet::new();

        for network in self.get_networks() {
            let id = network.get_id().as_str();
            if !network_ids.insert(id) {
                errors.push(format!("duplicate network id '{id}'"));
            }
        }

        network_ids
    }

    /// Ensures gateway ids are unique within the topology.
    fn validate_gateway_ids(&self, errors: &mut Vec<String>) -> HashSet<&str> {
        let mut gateway_ids = HashSet::new();

        for gateway in self.get_gateways() {
            let id = gateway.get_id().as_str();
            if !gateway_ids.insert(id) {
                errors.push(format!("duplicate gateway id '{id}'"));
            }
        }

        gateway_ids
    }

    /// Ensures server ids are unique within the topology.
    fn validate_server_ids(&self, errors: &mut Vec<String>) -> HashSet<&str> {
        let mut server_ids = HashSet::new();

        for server in self.get_servers() {
            let id = server.get_id().as_str();
            if !server_ids.insert(id) {
                errors.push(format!("duplicate server id '{id}'"));
            }
        }

        server_ids
    }

    /// Validates that every net a gateway connects resolves to a declared
    /// network id or the external namespace.
    fn validate_gateway_nets(
        &self,
        gateway: &GatewayDef,
        network_ids: &HashSet<&str>,
        external_net_id: &str,
        errors: &mut Vec<String>,
    ) {
        for net in gateway.get_nets() {
            if net != external_net_id && !network_ids.contains(net.as_str()) {
                errors.push(format!(
                    "gateway '{}' references undeclared network '{}'",
                    gateway.get_id(),
                    net
                ));
            }
        }
    }

    /// Validates that every net a server attaches to resolves to a declared
    /// network id or the external namespace.
    fn validate_server_nets(
        &self,
        server: &ServerDef,
        network_ids: &HashSet<&str>,
        external_net_id: &str,
        errors: &mut Vec<String>,
    ) {
        for attachment in server.get_nets() {
            let net = attachment.get_net();
            if net != external_net_id && !network_ids.contains(net.as_str()) {
                errors.push(format!(
                    "server '{}' references undeclared network '{}'",
                    server.get_id(),
                    net
                ));
            }
        }
    }

    /// Validates checker/attacker references resolve to another declared
    /// server.
    fn validate_server_references(
        &self,
        server: &ServerDef,
        server_ids: &HashSet<&str>,
        errors: &mut Vec<String>,
    ) {
        for (label, reference) in [
            ("checker", server.get_checker()),
            ("attacker", server.get_attacker()),
        ] {
            if let Some(target) = reference {
                if target == server.get_id() {
                    errors.push(format!(
                        "server '{}' references itself as {label}",
                        server.get_id()
                    ));
                } else if !server_ids.contains(target.as_str()) {
                    errors.push(format!(
                        "server '{}' references undeclared server '{}' as {label}",
                        server.get_id(),
                        target
                    ));
                }
            }
        }
    }

    /// Validates that declared fixed IPs fall inside their network's declared
    /// CIDR.
    fn validate_server_fixed_ips(&self, server: &ServerDef, errors: &mut Vec<String>) {
        for attachment in server.get_nets() {
            let (Some(ip), Some(network)) = (attachment.get_ip(), self.network(attachment.get_net()))
            else {
                continue;
            };
            if let Some(cidr) = network.get_cidr() {
                if !cidr.contains(*ip) {
                    errors.push(format!(
                        "server '{}' declares ip {} outside network '{}' cidr {}",
                        server.get_id(),
                        ip,
                        attachment.get_net(),
                        cidr
                    ));
                }
            }
        }
    }

    /// Validates that an `external` server has a path to the external
    /// namespace: direct membership, or membership of a net that an
    /// external-connected gateway also connects.
    fn validate_external_reachability(
        &self,
        server: &ServerDef,
        external_net_id: &str,
        external_gateway_nets: &HashSet<&str>,
        errors: &mut Vec<String>,
    ) {
        let reachable = server.get_nets().iter().any(|attachment| {
            let net = attachment.get_net().as_str();
            net == external_net_id || external_gateway_nets.contains(net)
        });

        if !reachable {
            errors.push(format!(
                "server '{}' is flagged external but has no path to '{}'",
                server.get_id(),
                external_net_id
            ));
        }
    }

    /// Collects the nets reachable to the external namespace through
    /// gateways. Gateways chain: a net is external-connected if any gateway
    /// connects it, directly or transitively, to the external namespace.
    pub(crate) fn external_gateway_nets(&self, external_net_id: &str) -> HashSet<&str> {
        // Adjacency: each gateway makes all of its nets mutually reachable.
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for gateway in self.get_gateways() {
            for net in gateway.get_nets() {
                let peers = gateway
                    .get_nets()
                    .iter()
                    .map(String::as_str)
                    .filter(|peer| *peer != net.as_str())
                    .collect::<Vec<_>>();
                adjacency.entry(net.as_str()).or_default().extend(peers);
            }
        }

        let mut reached = HashSet::new();
        let mut frontier = vec![external_net_id];
        while let Some(net) = frontier.pop() {
            if let Some(peers) = adjacency.get(net) {
                for peer in peers {
                    if reached.insert(*peer) {
                        frontier.push(peer);
                    }
                }
            }
        }

        reached
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
