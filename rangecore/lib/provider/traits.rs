use std::{collections::HashMap, net::Ipv4Addr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{FirewallRule, Flavor, StaticRoute, TerminalKind};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a cloud provider operation.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// An error returned by a cloud provider call.
///
/// `NotFound` is distinguishable from other failures so that idempotent
/// deletes can treat it as success.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The referenced resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The provider API call failed.
    #[error("{op} failed: {message}")]
    Api {
        /// The operation that failed.
        op: String,

        /// The provider's failure message.
        message: String,
    },
}

/// A created cloud network with its subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedNetwork {
    /// The cloud network handle.
    pub net_id: String,

    /// The cloud subnet handle.
    pub subnet_id: String,

    /// The vlan id, present for vlan-backed networks.
    pub vlan_id: Option<String>,
}

/// A created firewall with its rule and policy objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFirewall {
    /// The cloud firewall handle.
    pub firewall_id: String,

    /// The handles of the created rule objects.
    pub rule_ids: Vec<String>,

    /// The handle of the created policy object.
    pub policy_id: String,
}

/// Reproducible creation parameters for one terminal, persisted so the
/// terminal can be recreated idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCreateParams {
    /// The backing kind of the terminal.
    pub kind: TerminalKind,

    /// The namespaced display name of the instance.
    pub name: String,

    /// The resolved image reference.
    pub image: String,

    /// The operating system family of the image.
    pub system_type: String,

    /// The compute flavor.
    pub flavor: Flavor,

    /// The cloud port handles to attach, in attachment order.
    pub port_ids: Vec<String>,

    /// The rendered init script, with all address tokens substituted.
    pub init_script: Option<String>,
}

/// The provider-side status of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteServerStatus {
    /// The instance is being built.
    Building,

    /// The instance is up.
    Active,

    /// The instance is paused.
    Paused,

    /// The instance is stopped.
    Stopped,

    /// The instance is in an error state.
    Error,
}

/// The entity a status event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    /// A scene-level status change.
    Scene,

    /// A terminal-level status change.
    Terminal,
}

/// A status-change event emitted after every persisted state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    /// The kind of entity that changed.
    pub entity_type: EntityType,

    /// The id of the entity that changed.
    pub entity_id: String,

    /// The new persisted status.
    pub new_status: String,

    /// The id of the scene the entity belongs to.
    pub scene_id: String,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Cloud resource operations the orchestrator consumes.
///
/// Implementations wrap the vendor SDKs (Nova/Neutron/Cinder/Zun
/// equivalents). Every call must be issued with a bounded timeout by the
/// implementation; the core tolerates arbitrarily slow calls but never
/// retries them itself.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Creates a virtual network with one subnet.
    async fn create_network(
        &self,
        name: &str,
        cidr: &str,
        dns: &[String],
        dhcp: bool,
    ) -> ProviderResult<CreatedNetwork>;

    /// Creates a vlan-backed network bound to physical interfaces.
    async fn create_vlan_network(
        &self,
        name: &str,
        cidr: &str,
        gateway: Option<&str>,
        interfaces: &[String],
    ) -> ProviderResult<CreatedNetwork>;

    /// Deletes a virtual network.
    async fn delete_network(&self, net_id: &str) -> ProviderResult<()>;

    /// Deletes a vlan-backed network.
    async fn delete_vlan_network(&self, net_id: &str, vlan_id: &str) -> ProviderResult<()>;

    /// Sets the gateway address on a subnet.
    async fn set_subnet_gateway(&self, subnet_id: &str, gateway_ip: &str) -> ProviderResult<()>;

    /// Lists floating IPs currently available in the shared pool.
    async fn list_available_fips(&self) -> ProviderResult<Vec<Ipv4Addr>>;

    /// Claims the given floating IPs from the shared pool. All-or-nothing:
    /// either every address is claimed or the call fails without effect.
    async fn preallocate_fips(
        &self,
        ips: &[Ipv4Addr],
    ) -> ProviderResult<HashMap<Ipv4Addr, String>>;

    /// Reserves `count` ports with addresses on the given network.
    /// All-or-nothing, like [`CloudProvider::preallocate_fips`].
    async fn preallocate_ports(
        &self,
        net_id: &str,
        count: usize,
    ) -> ProviderResult<Vec<(Ipv4Addr, String)>>;

    /// Creates a port with a fixed IP on a network.
    async fn create_port(&self, net_id: &str, name: &str, ip: &str) -> ProviderResult<String>;

    /// Deletes a port.
    async fn delete_port(&self, port_id: &str) -> ProviderResult<()>;

    /// Returns a claimed floating IP to the shared pool.
    async fn release_fip(&self, fip_id: &str) -> ProviderResult<()>;

    /// Binds a claimed floating IP to a port.
    async fn bind_fip(&self, fip_id: &str, port_id: &str) -> ProviderResult<()>;

    /// Creates a router connecting the given subnets, optionally gatewayed
    /// to an external network.
    async fn create_router(
        &self,
        name: &str,
        subnet_ids: &[String],
        external_net_id: Option<&str>,
    ) -> ProviderResult<String>;

    /// Deletes a router.
    async fn delete_router(&self, router_id: &str) -> ProviderResult<()>;

    /// Replaces the static routes installed on a router.
    async fn update_router_routes(
        &self,
        router_id: &str,
        routes: &[StaticRoute],
    ) -> ProviderResult<()>;

    /// Creates a firewall with its ingress/egress rule set and policy.
    async fn create_firewall(
        &self,
        name: &str,
        rules: &[FirewallRule],
    ) -> ProviderResult<CreatedFirewall>;

    /// Binds a firewall to the given subnets.
    async fn attach_firewall(&self, firewall_id: &str, subnet_ids: &[String])
        -> ProviderResult<()>;

    /// Deletes a firewall and its rule/policy objects.
    async fn delete_firewall(&self, firewall_id: &str) -> ProviderResult<()>;

    /// Resolves an image reference to the most recent snapshot derived from
    /// it, falling back to the base image, falling back to the reference
    /// itself.
    async fn resolve_image(&self, image: &str) -> ProviderResult<String>;

    /// Creates a virtual machine.
    async fn create_vm(&self, params: &ServerCreateParams) -> ProviderResult<String>;

    /// Creates a container.
    async fn create_container(&self, params: &ServerCreateParams) -> ProviderResult<String>;

    /// Returns the provider-side status of an instance.
    async fn get_server_status(&self, server_id: &str) -> ProviderResult<RemoteServerStatus>;

    /// Starts a stopped instance.
    async fn start_server(&self, server_id: &str) -> ProviderResult<()>;

    /// Stops a running instance gracefully.
    async fn stop_server(&self, server_id: &str) -> ProviderResult<()>;

    /// Pauses a running instance.
    async fn pause_server(&self, server_id: &str) -> ProviderResult<()>;

    /// Unpauses a paused instance.
    async fn unpause_server(&self, server_id: &str) -> ProviderResult<()>;

    /// Deletes an instance.
    async fn delete_server(&self, server_id: &str) -> ProviderResult<()>;

    /// Attaches a disk volume to an instance.
    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> ProviderResult<()>;

    /// Detaches a disk volume from an instance.
    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> ProviderResult<()>;

    /// Creates a bandwidth-limiting QoS policy on a port.
    async fn create_qos_policy(
        &self,
        name: &str,
        bandwidth_mbps: u32,
        port_id: &str,
    ) -> ProviderResult<String>;

    /// Deletes a QoS policy.
    async fn delete_qos_policy(&self, policy_id: &str) -> ProviderResult<()>;

    /// Checks whether a TCP service answers at `ip:port`.
    async fn probe_port(&self, ip: Ipv4Addr, port: u16) -> ProviderResult<bool>;
}

/// Host-level reverse-proxy operations the orchestrator consumes.
///
/// `restart` is batched: callers invoke it once per scene operation after all
/// per-terminal mutations, never once per terminal.
#[async_trait]
pub trait ProxyRegistrar: Send + Sync {
    /// Creates proxy mappings for the given guest ports, returning
    /// `(guest_port, host_port)` pairs.
    async fn create_proxy(&self, ip: Ipv4Addr, ports: &[u16]) -> ProviderResult<Vec<(u16, u16)>>;

    /// Removes proxy mappings for the given guest ports.
    async fn delete_proxy(&self, ip: Ipv4Addr, ports: &[u16]) -> ProviderResult<()>;

    /// Reloads the proxy service so accumulated mapping changes take effect.
    async fn restart(&self) -> ProviderResult<()>;
}

/// Receives status-change events after every persisted state transition.
///
/// Delivery is fire-and-forget: implementations must not block the caller,
/// and the orchestrator never waits on delivery.
pub trait StatusSink: Send + Sync {
    /// Delivers one status-change event.
    fn notify(&self, event: StatusEvent);
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProviderError {
    /// Creates an API failure error.
    pub fn api(op: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        ProviderError::Api {
            op: op.as_ref().to_string(),
            message: message.as_ref().to_string(),
        }
    }

    /// Returns true if the error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

impl EntityType {
    /// Returns the entity type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Scene => "scene",
            EntityType::Terminal => "terminal",
        }
    }
}
