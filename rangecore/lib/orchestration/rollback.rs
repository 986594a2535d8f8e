//! The rollback ledger for partially-provisioned scenes.

use crate::provider::CloudProvider;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One cloud resource created by the provisioning pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedResource {
    /// A claimed floating IP.
    FloatingIp {
        /// The cloud handle of the floating IP.
        fip_id: String,
    },

    /// A port reserved on the external network.
    ExternalPort {
        /// The cloud handle of the port.
        port_id: String,
    },

    /// A port created on a scene network.
    Port {
        /// The cloud handle of the port.
        port_id: String,
    },

    /// A QoS policy.
    QosPolicy {
        /// The cloud handle of the policy.
        policy_id: String,
    },

    /// A compute instance or container.
    Server {
        /// The cloud handle of the instance.
        server_id: String,
    },

    /// A firewall with its rule/policy objects.
    Firewall {
        /// The cloud handle of the firewall.
        firewall_id: String,
    },

    /// A router, including NAT/proxy routers.
    Router {
        /// The cloud handle of the router.
        router_id: String,
    },

    /// A network with its subnet.
    Network {
        /// The cloud handle of the network.
        net_id: String,

        /// The vlan id for vlan-backed networks.
        vlan_id: Option<String>,
    },
}

/// An ordered record of every resource handle the pipeline created.
///
/// On failure the ledger is replayed in reverse creation order, deleting only
/// what was actually created. Individual deletion failures are logged and
/// swallowed so one stuck resource cannot strand the rest.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    created: Vec<CreatedResource>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ResourceLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one created resource.
    pub fn record(&mut self, resource: CreatedResource) {
        self.created.push(resource);
    }

    /// Returns the number of recorded resources.
    pub fn len(&self) -> usize {
        self.created.len()
    }

    /// Returns true when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// Deletes every recorded resource in reverse creation order.
    pub async fn rollback(self, provider: &dyn CloudProvider) {
        for resource in self.created.into_iter().rev() {
            let (label, result) = match &resource {
                CreatedResource::FloatingIp { fip_id } => {
                    ("floating ip", provider.release_fip(fip_id).await)
                }
                CreatedResource::ExternalPort { port_id } => {
                    ("external port", provider.delete_port(port_id).await)
                }
                CreatedResource::Port { port_id } => ("port", provider.delete_port(port_id).await),
                CreatedResource::QosPolicy { policy_id } => {
                    ("qos policy", provider.delete_qos_policy(policy_id).await)
                }
                CreatedResource::Server { server_id } => {
                    ("server", provider.delete_server(server_id).await)
                }
                CreatedResource::Firewall { firewall_id } => {
                    ("firewall", provider.delete_firewall(firewall_id).await)
                }
                CreatedResource::Router { router_id } => {
                    ("router", provider.delete_router(router_id).await)
                }
                CreatedResource::Network { net_id, vlan_id } => match vlan_id {
                    Some(vlan_id) => (
                        "vlan network",
                        provider.delete_vlan_network(net_id, vlan_id).await,
                    ),
                    None => ("network", provider.delete_network(net_id).await),
                },
            };

            if let Err(error) = result {
                if !error.is_not_found() {
                    tracing::error!("rollback failed to delete {label}: {error}");
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockCloud, ServerCreateParams};
    use crate::config::{Flavor, TerminalKind};

    fn params(name: &str) -> ServerCreateParams {
        ServerCreateParams {
            kind: TerminalKind::Vm,
            name: name.to_string(),
            image: "ubuntu-22.04".to_string(),
            system_type: "linux".to_string(),
            flavor: Flavor::default(),
            port_ids: vec![],
            init_script: None,
        }
    }

    #[tokio::test]
    async fn test_rollback_deletes_in_reverse_creation_order() -> anyhow::Result<()> {
        let cloud = MockCloud::new();
        let mut ledger = ResourceLedger::new();

        let net = cloud.create_network("n", "10.0.0.0/24", &[], true).await?;
        ledger.record(CreatedResource::Network {
            net_id: net.net_id,
            vlan_id: None,
        });
        let router_id = cloud.create_router("r", &[], None).await?;
        ledger.record(CreatedResource::Router { router_id });
        let server_id = cloud.create_vm(&params("srv")).await?;
        ledger.record(CreatedResource::Server { server_id });

        ledger.rollback(&cloud).await;

        assert_eq!(cloud.live_resources(), 0);
        let calls = cloud.calls();
        let deletes: Vec<&String> = calls
            .iter()
            .filter(|op| op.starts_with("delete_"))
            .collect();
        assert_eq!(
            deletes,
            ["delete_server", "delete_router", "delete_network"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_rollback_swallows_individual_failures() -> anyhow::Result<()> {
        let cloud = MockCloud::new();
        let mut ledger = ResourceLedger::new();

        let net = cloud.create_network("n", "10.0.0.0/24", &[], true).await?;
        ledger.record(CreatedResource::Network {
            net_id: net.net_id,
            vlan_id: None,
        });
        let server_id = cloud.create_vm(&params("srv")).await?;
        ledger.record(CreatedResource::Server { server_id });

        // The server deletion fails, the network deletion must still run.
        cloud.fail_once("delete_server");
        ledger.rollback(&cloud).await;

        assert_eq!(cloud.live_servers(), 1, "failed delete is left behind");
        assert!(cloud.calls().contains(&"delete_network".to_string()));

        Ok(())
    }

    #[tokio::test]
    async fn test_rollback_tolerates_already_gone_resources() {
        let cloud = MockCloud::new();
        let mut ledger = ResourceLedger::new();
        ledger.record(CreatedResource::Server {
            server_id: "vm-gone".to_string(),
        });
        ledger.record(CreatedResource::FloatingIp {
            fip_id: "fip-gone".to_string(),
        });

        // NotFound everywhere; rollback must not panic or error.
        ledger.rollback(&cloud).await;
    }
}
