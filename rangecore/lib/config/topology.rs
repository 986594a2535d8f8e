//! Declarative scene topology types.

use std::net::Ipv4Addr;

use getset::Getters;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::RangecoreResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The declarative description of one scene: networks, gateways and servers
/// plus their interconnections. Immutable input to the provisioning pipeline.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Topology {
    /// The name of the scene.
    pub(super) name: String,

    /// The networks in the scene.
    #[serde(default)]
    pub(super) networks: Vec<NetworkDef>,

    /// The gateways in the scene.
    #[serde(default)]
    pub(super) gateways: Vec<GatewayDef>,

    /// The servers in the scene.
    #[serde(default)]
    pub(super) servers: Vec<ServerDef>,
}

/// A network declaration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct NetworkDef {
    /// The topology-local id of the network.
    #[builder(setter(transform = |id: impl AsRef<str>| id.as_ref().to_string()))]
    pub(super) id: String,

    /// The display name of the network.
    #[builder(setter(transform = |name: impl AsRef<str>| name.as_ref().to_string()))]
    pub(super) name: String,

    /// The subnet CIDR. Assigned randomly from the segment pool when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) cidr: Option<Ipv4Network>,

    /// The gateway address of the subnet.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) gateway: Option<Ipv4Addr>,

    /// The DNS servers announced on the subnet.
    #[serde(default)]
    #[builder(default)]
    pub(super) dns: Vec<Ipv4Addr>,

    /// Whether DHCP is enabled on the subnet.
    #[serde(default = "NetworkDef::default_dhcp")]
    #[builder(default = NetworkDef::default_dhcp())]
    pub(super) dhcp: bool,

    /// Whether the net is backed by a physical (vlan) network.
    #[serde(default)]
    #[builder(default)]
    pub(super) is_real: bool,

    /// Physical interface ids for vlan-backed nets.
    #[serde(default)]
    #[builder(default)]
    pub(super) interfaces: Vec<String>,
}

/// The kind of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// A router connecting networks.
    Router,

    /// A firewall with ingress/egress rule sets.
    Firewall,
}

/// A gateway declaration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct GatewayDef {
    /// The topology-local id of the gateway.
    #[builder(setter(transform = |id: impl AsRef<str>| id.as_ref().to_string()))]
    pub(super) id: String,

    /// The display name of the gateway.
    #[builder(setter(transform = |name: impl AsRef<str>| name.as_ref().to_string()))]
    pub(super) name: String,

    /// The kind of gateway.
    #[serde(rename = "type")]
    pub(super) kind: GatewayKind,

    /// The ids of the networks this gateway connects.
    #[serde(default)]
    #[builder(default)]
    pub(super) nets: Vec<String>,

    /// Static routes installed on the gateway.
    #[serde(default)]
    #[builder(default)]
    pub(super) static_routing: Vec<StaticRoute>,

    /// Firewall rules, meaningful for [`GatewayKind::Firewall`].
    #[serde(default)]
    #[builder(default)]
    pub(super) firewall_rules: Vec<FirewallRule>,

    /// Whether runtime route/rule mutation is permitted.
    #[serde(default)]
    #[builder(default)]
    pub(super) can_user_configure: bool,
}

/// A static route entry.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct StaticRoute {
    /// The destination CIDR.
    pub(super) destination: Ipv4Network,

    /// The next hop address.
    pub(super) nexthop: Ipv4Addr,
}

/// The direction a firewall rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    /// Traffic entering the protected networks.
    Ingress,

    /// Traffic leaving the protected networks.
    Egress,
}

/// The action a firewall rule takes on matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Permit matching traffic.
    Allow,

    /// Drop matching traffic.
    Deny,
}

/// A firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct FirewallRule {
    /// The direction the rule applies to.
    pub(super) direction: RuleDirection,

    /// The action to take on matching traffic.
    pub(super) action: RuleAction,

    /// The IP protocol, e.g. "tcp" or "udp". Matches all when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) protocol: Option<String>,

    /// The destination port, when the protocol carries ports.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) port: Option<u16>,

    /// The source CIDR. Matches all when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) source: Option<Ipv4Network>,

    /// The destination CIDR. Matches all when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) destination: Option<Ipv4Network>,
}

/// The backing kind of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    /// A full virtual machine.
    Vm,

    /// A container.
    Container,

    /// A physical device attached through a vlan-backed net.
    Real,
}

/// The role of a server within the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// The machine the user operates from.
    Operator,

    /// A machine to be attacked or defended.
    Target,

    /// A supporting machine.
    Wingman,

    /// A machine providing routing for others.
    Gateway,

    /// A machine running scoring or checking logic.
    Executer,
}

/// A server declaration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ServerDef {
    /// The topology-local id of the server.
    #[builder(setter(transform = |id: impl AsRef<str>| id.as_ref().to_string()))]
    pub(super) id: String,

    /// The display name of the server.
    #[builder(setter(transform = |name: impl AsRef<str>| name.as_ref().to_string()))]
    pub(super) name: String,

    /// The backing kind of the server.
    #[serde(rename = "image_type", default = "ServerDef::default_kind")]
    #[builder(default = ServerDef::default_kind())]
    pub(super) kind: TerminalKind,

    /// The operating system family of the image.
    #[serde(default)]
    #[builder(default, setter(transform = |s: impl AsRef<str>| s.as_ref().to_string()))]
    pub(super) system_type: String,

    /// The source image reference.
    #[builder(setter(transform = |image: impl AsRef<str>| image.as_ref().to_string()))]
    pub(super) image: String,

    /// The role of the server.
    #[serde(default = "ServerDef::default_role")]
    #[builder(default = ServerDef::default_role())]
    pub(super) role: ServerRole,

    /// The networks the server attaches to.
    #[serde(default)]
    #[builder(default)]
    pub(super) nets: Vec<NetAttachment>,

    /// The compute flavor of the server.
    #[serde(default)]
    #[builder(default)]
    pub(super) flavor: Flavor,

    /// Whether the server must be reachable from the external network.
    #[serde(default)]
    #[builder(default)]
    pub(super) external: bool,

    /// The id of the server that checks this one, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) checker: Option<String>,

    /// The id of the server that attacks this one, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) attacker: Option<String>,

    /// The init script run on first boot. Supports `{server.net}` tokens that
    /// resolve to another server's assigned IP.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) init_script: Option<String>,

    /// Volume ids attached once the server reaches a using-state.
    #[serde(default)]
    #[builder(default)]
    pub(super) volumes: Vec<String>,

    /// Remote-protocol ports proxied at the host when no floating IP exists.
    #[serde(default)]
    #[builder(default)]
    pub(super) remote_ports: Vec<u16>,

    /// The service port the reachability probe polls. Probing is skipped
    /// when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) service_port: Option<u16>,
}

/// A server's attachment to one network.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct NetAttachment {
    /// The id of the network to attach to.
    #[builder(setter(transform = |net: impl AsRef<str>| net.as_ref().to_string()))]
    pub(super) net: String,

    /// A declared fixed IP. Assigned from the free pool when absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) ip: Option<Ipv4Addr>,

    /// Guest interface names to bind, when the image needs explicit ones.
    #[serde(default)]
    #[builder(default)]
    pub(super) interfaces: Vec<String>,
}

/// The compute flavor of a server.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Flavor {
    /// The number of vCPUs.
    #[serde(default = "Flavor::default_cpus")]
    #[builder(default = Flavor::default_cpus())]
    pub(super) cpus: u8,

    /// The amount of RAM in MiB.
    #[serde(default = "Flavor::default_ram")]
    #[builder(default = Flavor::default_ram())]
    pub(super) ram: u32,

    /// The disk size in GiB.
    #[serde(default = "Flavor::default_disk")]
    #[builder(default = Flavor::default_disk())]
    pub(super) disk: u32,

    /// An egress/ingress bandwidth cap in Mbit/s, enforced via a QoS policy.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub(super) bandwidth: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Topology {
    /// Creates a topology with just a name. Entities are supplied through the
    /// struct literal in tests or deserialized from YAML in production.
    pub fn new(
        name: impl AsRef<str>,
        networks: Vec<NetworkDef>,
        gateways: Vec<GatewayDef>,
        servers: Vec<ServerDef>,
    ) -> Self {
        Self {
            name: name.as_ref().to_string(),
            networks,
            gateways,
            servers,
        }
    }

    /// Parses a topology from YAML.
    pub fn from_yaml(text: &str) -> RangecoreResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Looks up a network declaration by id.
    pub fn network(&self, id: &str) -> Option<&NetworkDef> {
        self.networks.iter().find(|n| n.id == id)
    }

    /// Looks up a server declaration by id.
    pub fn server(&self, id: &str) -> Option<&ServerDef> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Looks up a gateway declaration by id.
    pub fn gateway(&self, id: &str) -> Option<&GatewayDef> {
        self.gateways.iter().find(|g| g.id == id)
    }
}

impl NetworkDef {
    fn default_dhcp() -> bool {
        true
    }
}

impl GatewayKind {
    /// Returns the kind as the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Router => "router",
            GatewayKind::Firewall => "firewall",
        }
    }
}

impl TerminalKind {
    /// Returns the kind as the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalKind::Vm => "vm",
            TerminalKind::Container => "container",
            TerminalKind::Real => "real",
        }
    }
}

impl ServerRole {
    /// Returns the role as the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Operator => "operator",
            ServerRole::Target => "target",
            ServerRole::Wingman => "wingman",
            ServerRole::Gateway => "gateway",
            ServerRole::Executer => "executer",
        }
    }
}

impl ServerDef {
    fn default_kind() -> TerminalKind {
        TerminalKind::Vm
    }

    fn default_role() -> ServerRole {
        ServerRole::Target
    }
}

impl Flavor {
    fn default_cpus() -> u8 {
        super::DEFAULT_NUM_VCPUS
    }

    fn default_ram() -> u32 {
        super::DEFAULT_RAM_MIB
    }

    fn default_disk() -> u32 {
        super::DEFAULT_DISK_GIB
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Flavor {
    fn default() -> Self {
        Self {
            cpus: Flavor::default_cpus(),
            ram: Flavor::default_ram(),
            disk: Flavor::default_disk(),
            bandwidth: None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_from_yaml() -> anyhow::Result<()> {
        let yaml = r#"
name: demo
networks:
  - id: net1
    name: intranet
    cidr: 192.168.10.0/24
gateways:
  - id: gw1
    name: edge
    type: router
    nets: [net1, internet]
servers:
  - id: srv1
    name: operator-box
    image: ubuntu-22.04
    role: operator
    nets:
      - net: net1
  - id: srv2
    name: target-box
    image: centos-7
    external: true
    nets:
      - net: net1
        ip: 192.168.10.50
"#;
        let topology = Topology::from_yaml(yaml)?;
        assert_eq!(topology.get_name(), "demo");
        assert_eq!(topology.get_networks().len(), 1);
        assert_eq!(topology.get_gateways()[0].get_kind(), &GatewayKind::Router);
        assert_eq!(
            *topology.get_servers()[1].get_nets()[0].get_ip(),
            Some("192.168.10.50".parse::<std::net::Ipv4Addr>()?)
        );
        assert!(topology.get_servers()[1].get_external());
        Ok(())
    }

    #[test]
    fn test_flavor_defaults() {
        let flavor = Flavor::default();
        assert_eq!(*flavor.get_cpus(), 1);
        assert_eq!(*flavor.get_ram(), 1024);
        assert!(flavor.get_bandwidth().is_none());
    }
}
