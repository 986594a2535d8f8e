//! Scene teardown.
//!
//! Deletion reverses creation order: terminals, then gateways, then nets.
//! Every step is independently best-effort: one stuck resource is logged
//! and skipped, never aborting the rest. Rows are flipped to deleted before
//! any cloud cleanup so concurrent status reports and repeat delete calls
//! observe the deletion and no-op.

use std::net::Ipv4Addr;

use crate::{
    models::{SceneGateway, SceneNet, SceneTerminal},
    provider::{ProviderError, ProviderResult},
    store,
    RangecoreError, RangecoreResult,
};

use super::Orchestrator;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Deletes a scene and all of its cloud resources.
    ///
    /// Idempotent: a repeat call observes the deleted scene row and no-ops.
    /// When `shutdown` is set, instances are gracefully stopped before
    /// deletion.
    pub async fn delete_scene(&self, scene_id: &str, shutdown: bool) -> RangecoreResult<()> {
        let scene = store::get_scene(&self.pool, scene_id)
            .await?
            .ok_or_else(|| RangecoreError::SceneNotFound(scene_id.to_string()))?;

        if !store::mark_scene_deleted(&self.pool, scene_id).await? {
            tracing::info!("scene {scene_id} ({}) is already deleted", scene.name);
            return Ok(());
        }
        store::mark_all_terminals_deleted(&self.pool, scene_id).await?;
        self.notify_scene(scene_id, "deleted");
        for terminal in store::list_terminals(&self.pool, scene_id).await? {
            self.notify_terminal(&terminal, crate::models::TerminalStatus::Deleted);
        }

        self.teardown_scene_resources(scene_id, shutdown).await;

        store::push_progress(&self.pool, scene_id, "scene resources released").await?;

        Ok(())
    }

    /// Releases every cloud resource recorded on a scene's rows, in reverse
    /// dependency order. Never raises: each failure is logged and the sweep
    /// continues.
    pub(super) async fn teardown_scene_resources(&self, scene_id: &str, shutdown: bool) {
        let (terminals, gateways, nets) = match (
            store::list_terminals(&self.pool, scene_id).await,
            store::list_gateways(&self.pool, scene_id).await,
            store::list_nets(&self.pool, scene_id).await,
        ) {
            (Ok(terminals), Ok(gateways), Ok(nets)) => (terminals, gateways, nets),
            _ => {
                tracing::error!("failed to load rows of scene {scene_id}, teardown skipped");
                return;
            }
        };

        let mut proxied = false;
        for terminal in terminals.iter().filter(|t| !t.is_real()) {
            if terminal
                .host_proxy_ports()
                .map(|ports| !ports.is_empty())
                .unwrap_or(false)
            {
                proxied = true;
            }
            self.teardown_terminal(terminal, shutdown).await;
        }
        // One proxy reload for the whole scene, not one per terminal.
        if proxied {
            swallow("proxy restart", self.proxy.restart().await);
        }

        for gateway in &gateways {
            self.teardown_gateway(gateway).await;
        }

        for net in &nets {
            self.teardown_net(net).await;
        }
    }

    /// Releases one terminal's resources: host proxies, volumes, QoS
    /// policies, the instance itself, its ports, and its floating IP.
    pub(super) async fn teardown_terminal(&self, terminal: &SceneTerminal, shutdown: bool) {
        if terminal.is_real() {
            return;
        }

        if let (Ok(mappings), Some(host_ip)) =
            (terminal.host_proxy_ports(), terminal.host_ip.as_deref())
        {
            if !mappings.is_empty() {
                if let Ok(ip) = host_ip.parse::<Ipv4Addr>() {
                    let guest_ports: Vec<u16> =
                        mappings.iter().map(|(guest, _)| *guest).collect();
                    swallow(
                        "proxy mapping removal",
                        self.proxy.delete_proxy(ip, &guest_ports).await,
                    );
                }
            }
        }

        if let Some(server_id) = terminal.server_id.as_deref() {
            if let Ok(volumes) = terminal.volumes() {
                for volume_id in volumes {
                    swallow(
                        "volume detach",
                        self.provider.detach_volume(server_id, &volume_id).await,
                    );
                }
            }

            if shutdown {
                swallow("instance stop", self.provider.stop_server(server_id).await);
            }
            swallow(
                "instance deletion",
                self.provider.delete_server(server_id).await,
            );
        }

        if let Ok(policies) = terminal.policies() {
            for policy_id in policies {
                swallow(
                    "qos policy deletion",
                    self.provider.delete_qos_policy(&policy_id).await,
                );
            }
        }

        if let Ok(net_configs) = terminal.net_configs() {
            for config in net_configs {
                if let Some(port_id) = &config.port_id {
                    swallow("port deletion", self.provider.delete_port(port_id).await);
                }
            }
        }

        if let Some(fip_id) = terminal.float_ip_id.as_deref() {
            swallow(
                "floating ip release",
                self.provider.release_fip(fip_id).await,
            );
        }
    }

    async fn teardown_gateway(&self, gateway: &SceneGateway) {
        if let Some(firewall_id) = gateway.firewall_id.as_deref() {
            swallow(
                "firewall deletion",
                self.provider.delete_firewall(firewall_id).await,
            );
        }
        if let Some(router_id) = gateway.router_id.as_deref() {
            swallow(
                "router deletion",
                self.provider.delete_router(router_id).await,
            );
        }
    }

    async fn teardown_net(&self, net: &SceneNet) {
        if let Some(router_id) = net.proxy_router_id.as_deref() {
            swallow(
                "proxy router deletion",
                self.provider.delete_router(router_id).await,
            );
        }

        let Some(net_id) = net.net_id.as_deref() else {
            return;
        };
        let result = match net.vlan_id.as_deref() {
            Some(vlan_id) => self.provider.delete_vlan_network(net_id, vlan_id).await,
            None => self.provider.delete_network(net_id).await,
        };
        swallow("network deletion", result);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Logs a failed deletion and moves on. A missing resource counts as
/// successfully deleted.
fn swallow(label: &str, result: ProviderResult<()>) {
    match result {
        Ok(()) => {}
        Err(ProviderError::NotFound(_)) => {}
        Err(error) => tracing::error!("{label} failed during teardown: {error}"),
    }
}
