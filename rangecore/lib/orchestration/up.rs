//! The provisioning pipeline.
//!
//! Structural steps run sequentially inside one task because each depends on
//! the previous step's output: CIDR assignment, networks, gateways, shared
//! pool reservation, per-terminal addressing, ports, and only then the
//! per-terminal creation fan-out. Any failure along the way rolls back every
//! handle recorded so far and marks the scene errored.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use uuid::Uuid;

use crate::{
    alloc::{first_host, random_cidr, FixedDemand, Reservation, ReservationDemand},
    config::{GatewayKind, ServerRole, Topology},
    models::{IpKind, NetConfig, TerminalStatus},
    provider::ServerCreateParams,
    store,
    RangecoreError, RangecoreResult,
};

use super::{
    rollback::{CreatedResource, ResourceLedger},
    utils::{render_script, resource_name},
    Orchestrator,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Working state of one scene net during provisioning.
struct NetPlan {
    row_id: i64,
    sub_id: String,
    name: String,
    cidr: Ipv4Network,
    gateway_ip: Ipv4Addr,
    dns: Vec<String>,
    dhcp: bool,
    is_real: bool,
    interfaces: Vec<String>,
    net_id: String,
    subnet_id: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Validates a topology, persists its scene structure and launches
    /// provisioning. Returns the new scene id as soon as the structure is
    /// durable; the cloud work continues asynchronously.
    pub async fn create_scene(
        &self,
        topology: Topology,
        prefix: Option<&str>,
    ) -> RangecoreResult<String> {
        topology.validate_with(&self.settings.external_net_id)?;

        let scene_id = Uuid::new_v4().to_string();
        let prefix = prefix
            .unwrap_or(&self.settings.default_prefix)
            .to_string();
        let scene_name = topology.get_name().clone();
        let named = |entity: &str| {
            resource_name(&self.settings.name_group, &prefix, &scene_name, entity)
        };

        let nets = topology
            .get_networks()
            .iter()
            .map(|net| store::NewNet {
                sub_id: net.get_id().clone(),
                name: named(net.get_name()),
                cidr: net.get_cidr().map(|c| c.to_string()),
                gateway_ip: net.get_gateway().map(|g| g.to_string()),
                dns_json: dns_json(net.get_dns(), &self.settings.dns),
                dhcp: *net.get_dhcp(),
                is_real: *net.get_is_real(),
                interfaces_json: to_json(net.get_interfaces()),
            })
            .collect::<Vec<_>>();

        let gateways = topology
            .get_gateways()
            .iter()
            .map(|gateway| store::NewGateway {
                sub_id: gateway.get_id().clone(),
                name: named(gateway.get_name()),
                kind: gateway.get_kind().as_str().to_string(),
                net_sub_ids_json: to_json(gateway.get_nets()),
                static_routing_json: to_json(gateway.get_static_routing()),
                firewall_rules_json: to_json(gateway.get_firewall_rules()),
                can_user_configure: *gateway.get_can_user_configure(),
            })
            .collect::<Vec<_>>();

        let terminals = topology
            .get_servers()
            .iter()
            .map(|server| store::NewTerminal {
                sub_id: server.get_id().clone(),
                name: named(server.get_name()),
                kind: server.get_kind().as_str().to_string(),
                system_type: server.get_system_type().clone(),
                image: server.get_image().clone(),
                role: server.get_role().as_str().to_string(),
                volumes_json: to_json(server.get_volumes()),
                remote_ports_json: to_json(server.get_remote_ports()),
                service_port: server.get_service_port().map(i64::from),
            })
            .collect::<Vec<_>>();

        store::create_scene_structure(
            &self.pool,
            &store::NewScene {
                id: scene_id.clone(),
                name: scene_name.clone(),
                prefix,
            },
            &nets,
            &gateways,
            &terminals,
        )
        .await?;

        store::push_progress(&self.pool, &scene_id, "scene structure persisted").await?;
        self.notify_scene(&scene_id, "creating");

        let orchestrator = self.clone();
        let task_scene_id = scene_id.clone();
        self.spawn_task(async move {
            orchestrator.provision_scene(&task_scene_id, &topology).await;
        });

        Ok(scene_id)
    }

    /// Runs the structural pipeline, rolling back recorded handles and
    /// marking the scene errored on any failure.
    pub(super) async fn provision_scene(&self, scene_id: &str, topology: &Topology) {
        let mut ledger = ResourceLedger::new();

        if let Err(error) = self.provision_steps(scene_id, topology, &mut ledger).await {
            tracing::error!("provisioning of scene {scene_id} failed: {error}");

            let message = error.to_string();
            let _ = store::push_progress(
                &self.pool,
                scene_id,
                &format!("provisioning failed: {message}"),
            )
            .await;

            ledger.rollback(self.provider.as_ref()).await;

            match store::mark_scene_error(&self.pool, scene_id, &message).await {
                Ok(true) => self.notify_scene(scene_id, "error"),
                Ok(false) => {}
                Err(db_error) => {
                    tracing::error!("failed to mark scene {scene_id} errored: {db_error}")
                }
            }
        }
    }

    async fn provision_steps(
        &self,
        scene_id: &str,
        topology: &Topology,
        ledger: &mut ResourceLedger,
    ) -> RangecoreResult<()> {
        // One scene construction at a time per scene name.
        let _guard = self
            .locks
            .acquire(
                &format!("scene.create.{}", topology.get_name()),
                self.settings.lock_attempts,
                self.settings.lock_backoff,
            )
            .await?;

        let external_net_id = self.settings.external_net_id.as_str();
        let external_nets: HashSet<String> = topology
            .external_gateway_nets(external_net_id)
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut plans = self.assign_cidrs(scene_id).await?;
        self.create_networks(topology, &external_nets, &mut plans, ledger)
            .await?;
        store::push_progress(&self.pool, scene_id, "networks created").await?;

        self.create_gateways(scene_id, &plans, ledger).await?;
        store::push_progress(&self.pool, scene_id, "gateways created").await?;

        let kinds = classify_ip_kinds(topology, external_net_id);
        let reservation = self
            .reserve_addresses(topology, &kinds, &plans, ledger)
            .await?;
        store::push_progress(&self.pool, scene_id, "addressing resources reserved").await?;

        self.prepare_terminals(scene_id, topology, &kinds, &plans, reservation, ledger)
            .await?;

        // Gateway-role terminals first: other terminals may depend on their
        // routing. Their creation failures abort the pipeline.
        let terminals = store::list_terminals(&self.pool, scene_id).await?;
        for terminal in terminals
            .iter()
            .filter(|t| t.role == ServerRole::Gateway.as_str())
        {
            self.create_terminal(terminal.id, Some(&mut *ledger)).await?;
        }

        for terminal in terminals
            .iter()
            .filter(|t| t.role != ServerRole::Gateway.as_str())
        {
            let orchestrator = self.clone();
            let terminal_id = terminal.id;
            self.spawn_task(async move {
                orchestrator.run_terminal_task(terminal_id).await;
            });
        }

        // Vlan-backed nets got their gateway at creation.
        for plan in plans.iter().filter(|plan| !plan.is_real) {
            self.provider
                .set_subnet_gateway(&plan.subnet_id, &plan.gateway_ip.to_string())
                .await?;
        }

        store::push_progress(&self.pool, scene_id, "terminals launching").await?;

        // A scene without asynchronous terminals completes here.
        self.check_scene_complete(scene_id).await?;

        Ok(())
    }

    /// Assigns a random non-overlapping CIDR to every net that declared none
    /// and settles each net's gateway address.
    async fn assign_cidrs(&self, scene_id: &str) -> RangecoreResult<Vec<NetPlan>> {
        let rows = store::list_nets(&self.pool, scene_id).await?;

        let mut taken: HashSet<Ipv4Network> = rows
            .iter()
            .filter_map(|row| row.cidr.as_deref())
            .filter_map(|cidr| cidr.parse().ok())
            .collect();

        let mut plans = Vec::with_capacity(rows.len());
        for row in rows {
            let cidr = match row.cidr.as_deref() {
                Some(cidr) => cidr
                    .parse()
                    .map_err(|_| RangecoreError::custom(anyhow::anyhow!(
                        "net '{}' has malformed cidr '{cidr}'",
                        row.sub_id
                    )))?,
                None => {
                    let cidr = random_cidr(&self.settings.subnet_segments, &taken)?;
                    store::set_net_cidr(&self.pool, row.id, &cidr.to_string()).await?;
                    cidr
                }
            };
            taken.insert(cidr);

            let gateway_ip = match row.gateway_ip.as_deref() {
                Some(ip) => ip.parse().map_err(|_| {
                    RangecoreError::custom(anyhow::anyhow!(
                        "net '{}' has malformed gateway ip '{ip}'",
                        row.sub_id
                    ))
                })?,
                None => {
                    let gateway_ip = first_host(cidr);
                    store::set_net_gateway_ip(&self.pool, row.id, &gateway_ip.to_string())
                        .await?;
                    gateway_ip
                }
            };

            plans.push(NetPlan {
                row_id: row.id,
                sub_id: row.sub_id.clone(),
                name: row.name.clone(),
                cidr,
                gateway_ip,
                dns: row.dns()?,
                dhcp: row.dhcp,
                is_real: row.is_real,
                interfaces: row.interfaces()?,
                net_id: String::new(),
                subnet_id: String::new(),
            });
        }

        Ok(plans)
    }

    /// Creates the cloud network for every net, vlan-backed for real nets,
    /// plus a NAT router for virtual nets that need platform-side proxying.
    async fn create_networks(
        &self,
        topology: &Topology,
        external_nets: &HashSet<String>,
        plans: &mut [NetPlan],
        ledger: &mut ResourceLedger,
    ) -> RangecoreResult<()> {
        let gatewayed: HashSet<&str> = topology
            .get_gateways()
            .iter()
            .flat_map(|g| g.get_nets().iter().map(String::as_str))
            .collect();

        for plan in plans.iter_mut() {
            let created = if plan.is_real {
                self.provider
                    .create_vlan_network(
                        &plan.name,
                        &plan.cidr.to_string(),
                        Some(&plan.gateway_ip.to_string()),
                        &plan.interfaces,
                    )
                    .await?
            } else {
                self.provider
                    .create_network(&plan.name, &plan.cidr.to_string(), &plan.dns, plan.dhcp)
                    .await?
            };

            ledger.record(CreatedResource::Network {
                net_id: created.net_id.clone(),
                vlan_id: created.vlan_id.clone(),
            });
            store::set_net_cloud_ids(
                &self.pool,
                plan.row_id,
                &created.net_id,
                &created.subnet_id,
                created.vlan_id.as_deref(),
            )
            .await?;
            plan.net_id = created.net_id;
            plan.subnet_id = created.subnet_id;

            // A virtual net with no route to the outside and no declared
            // gateway still needs a NAT router when a terminal on it is
            // reached through the platform proxy.
            let needs_proxy_router = !plan.is_real
                && !external_nets.contains(&plan.sub_id)
                && !gatewayed.contains(plan.sub_id.as_str())
                && topology.get_servers().iter().any(|server| {
                    !server.get_remote_ports().is_empty()
                        && server
                            .get_nets()
                            .iter()
                            .any(|a| a.get_net() == &plan.sub_id)
                });
            if needs_proxy_router {
                let router_id = self
                    .provider
                    .create_router(
                        &format!("{}.proxy", plan.name),
                        std::slice::from_ref(&plan.subnet_id),
                        Some(&self.settings.external_cloud_net_id),
                    )
                    .await?;
                ledger.record(CreatedResource::Router {
                    router_id: router_id.clone(),
                });
                store::set_net_proxy_router(&self.pool, plan.row_id, &router_id).await?;
            }
        }

        Ok(())
    }

    /// Creates the cloud router or firewall for every gateway.
    async fn create_gateways(
        &self,
        scene_id: &str,
        plans: &[NetPlan],
        ledger: &mut ResourceLedger,
    ) -> RangecoreResult<()> {
        let subnet_of: HashMap<&str, &NetPlan> = plans
            .iter()
            .map(|plan| (plan.sub_id.as_str(), plan))
            .collect();

        for gateway in store::list_gateways(&self.pool, scene_id).await? {
            let member_nets = gateway.net_sub_ids()?;
            let external = member_nets
                .iter()
                .any(|net| net == &self.settings.external_net_id);
            let subnet_ids: Vec<String> = member_nets
                .iter()
                .filter_map(|net| subnet_of.get(net.as_str()))
                .map(|plan| plan.subnet_id.clone())
                .collect();

            if gateway.kind == GatewayKind::Firewall.as_str() {
                let rules: Vec<crate::config::FirewallRule> =
                    serde_json::from_str(&gateway.firewall_rules_json)?;
                let created = self
                    .provider
                    .create_firewall(&gateway.name, &rules)
                    .await?;
                ledger.record(CreatedResource::Firewall {
                    firewall_id: created.firewall_id.clone(),
                });
                store::set_gateway_firewall(&self.pool, gateway.id, &created.firewall_id)
                    .await?;
            } else {
                let router_id = self
                    .provider
                    .create_router(
                        &gateway.name,
                        &subnet_ids,
                        external.then_some(self.settings.external_cloud_net_id.as_str()),
                    )
                    .await?;
                ledger.record(CreatedResource::Router {
                    router_id: router_id.clone(),
                });
                store::set_gateway_router(&self.pool, gateway.id, &router_id).await?;

                let routes: Vec<crate::config::StaticRoute> =
                    serde_json::from_str(&gateway.static_routing_json)?;
                if !routes.is_empty() {
                    self.provider
                        .update_router_routes(&router_id, &routes)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Computes the scene's exact addressing demand and reserves it.
    async fn reserve_addresses(
        &self,
        topology: &Topology,
        kinds: &HashMap<String, IpKind>,
        plans: &[NetPlan],
        ledger: &mut ResourceLedger,
    ) -> RangecoreResult<Reservation> {
        let float_count = kinds
            .values()
            .filter(|kind| **kind == IpKind::Float)
            .count();
        let external_port_count = topology
            .get_servers()
            .iter()
            .flat_map(|server| server.get_nets())
            .filter(|a| a.get_net() == &self.settings.external_net_id)
            .count();

        let mut fixed = Vec::new();
        for plan in plans {
            let declared: HashSet<Ipv4Addr> = topology
                .get_servers()
                .iter()
                .flat_map(|server| server.get_nets())
                .filter(|a| a.get_net() == &plan.sub_id)
                .filter_map(|a| *a.get_ip())
                .collect();
            let unassigned = topology
                .get_servers()
                .iter()
                .flat_map(|server| server.get_nets())
                .filter(|a| a.get_net() == &plan.sub_id && a.get_ip().is_none())
                .count();

            if unassigned == 0 {
                continue;
            }

            let mut reserved = declared;
            reserved.insert(plan.gateway_ip);
            fixed.push(FixedDemand {
                net_sub_id: plan.sub_id.clone(),
                cidr: plan.cidr,
                reserved,
                count: unassigned,
            });
        }

        let demand = ReservationDemand {
            float_count,
            external_port_count,
            fixed,
        };
        let reservation = self
            .prealloc
            .reserve(self.provider.as_ref(), &demand)
            .await?;

        for (_, fip_id) in &reservation.floating {
            ledger.record(CreatedResource::FloatingIp {
                fip_id: fip_id.clone(),
            });
        }
        for (_, port_id) in &reservation.external_ports {
            ledger.record(CreatedResource::ExternalPort {
                port_id: port_id.clone(),
            });
        }

        Ok(reservation)
    }

    /// Assigns every terminal its final per-network addresses, creates its
    /// ports and persists its reproducible creation parameters.
    async fn prepare_terminals(
        &self,
        scene_id: &str,
        topology: &Topology,
        kinds: &HashMap<String, IpKind>,
        plans: &[NetPlan],
        mut reservation: Reservation,
        ledger: &mut ResourceLedger,
    ) -> RangecoreResult<()> {
        let plan_of: HashMap<&str, &NetPlan> = plans
            .iter()
            .map(|plan| (plan.sub_id.as_str(), plan))
            .collect();
        let rows = store::list_terminals(&self.pool, scene_id).await?;
        let row_of: HashMap<&str, &crate::models::SceneTerminal> =
            rows.iter().map(|row| (row.sub_id.as_str(), row)).collect();

        // Declared addresses win; the rest come from the sampled pools.
        let mut assignments: HashMap<&str, Vec<NetConfig>> = HashMap::new();
        let mut addresses: HashMap<String, String> = HashMap::new();
        let mut external_ports = reservation.external_ports.iter();
        let mut floats = reservation.floating.iter();

        for server in topology.get_servers() {
            let mut configs = Vec::new();
            for attachment in server.get_nets() {
                let net = attachment.get_net().as_str();
                let (ip, port_id) = if net == self.settings.external_net_id {
                    let (ip, port_id) = external_ports.next().ok_or_else(|| {
                        RangecoreError::Reservation(
                            "external port reservation exhausted".to_string(),
                        )
                    })?;
                    (*ip, Some(port_id.clone()))
                } else if let Some(ip) = attachment.get_ip() {
                    (*ip, None)
                } else {
                    let pool = reservation.fixed.get_mut(net);
                    let ip = pool
                        .and_then(|pool| {
                            if pool.is_empty() {
                                None
                            } else {
                                Some(pool.remove(0))
                            }
                        })
                        .ok_or_else(|| {
                            RangecoreError::Reservation(format!(
                                "no fixed ip reserved for net '{net}'"
                            ))
                        })?;
                    (ip, None)
                };

                addresses.insert(
                    format!("{}.{}", server.get_id(), net),
                    ip.to_string(),
                );
                configs.push(NetConfig {
                    net_sub_id: net.to_string(),
                    ip: ip.to_string(),
                    port_id,
                });
            }
            assignments.insert(server.get_id().as_str(), configs);
        }

        for server in topology.get_servers() {
            let row = row_of.get(server.get_id().as_str()).ok_or_else(|| {
                RangecoreError::TerminalNotFound(server.get_id().clone())
            })?;
            let mut configs = assignments
                .remove(server.get_id().as_str())
                .unwrap_or_default();

            // Floating terminals get their pool address now; binding happens
            // in the terminal task once the port exists.
            if kinds.get(server.get_id()) == Some(&IpKind::Float) {
                let (ip, fip_id) = floats.next().ok_or_else(|| {
                    RangecoreError::Reservation("floating ip reservation exhausted".to_string())
                })?;
                store::set_terminal_float_ip(&self.pool, row.id, &ip.to_string(), fip_id)
                    .await?;
            }

            let host_ip = match kinds.get(server.get_id()) {
                Some(IpKind::OuterFixed) => configs
                    .iter()
                    .find(|c| c.net_sub_id == self.settings.external_net_id)
                    .map(|c| c.ip.clone()),
                _ => configs
                    .iter()
                    .find(|c| c.net_sub_id != self.settings.external_net_id)
                    .map(|c| c.ip.clone()),
            };
            if let Some(host_ip) = &host_ip {
                store::set_terminal_host_ip(&self.pool, row.id, host_ip).await?;
            }

            // Ports with pre-assigned fixed IPs, one per internal
            // attachment. A failure releases this terminal's earlier ports
            // before aborting the pipeline.
            let mut created_ports: Vec<String> = Vec::new();
            let mut port_error = None;
            for config in configs
                .iter_mut()
                .filter(|c| c.net_sub_id != self.settings.external_net_id)
            {
                let Some(plan) = plan_of.get(config.net_sub_id.as_str()) else {
                    continue;
                };
                if plan.is_real {
                    continue;
                }
                match self
                    .provider
                    .create_port(
                        &plan.net_id,
                        &format!("{}.{}", row.name, config.net_sub_id),
                        &config.ip,
                    )
                    .await
                {
                    Ok(port_id) => {
                        config.port_id = Some(port_id.clone());
                        created_ports.push(port_id);
                    }
                    Err(error) => {
                        port_error = Some(error);
                        break;
                    }
                }
            }
            if let Some(error) = port_error {
                for port_id in &created_ports {
                    if let Err(delete_error) = self.provider.delete_port(port_id).await {
                        if !delete_error.is_not_found() {
                            tracing::error!(
                                "failed to roll back port {port_id}: {delete_error}"
                            );
                        }
                    }
                }
                return Err(error.into());
            }
            for port_id in created_ports {
                ledger.record(CreatedResource::Port { port_id });
            }

            store::set_terminal_net_configs(&self.pool, row.id, &to_json(&configs)).await?;

            let init_script = server
                .get_init_script()
                .as_ref()
                .map(|script| render_script(script, &addresses));
            // The newest snapshot of the declared image wins, so recreated
            // terminals keep accumulated state.
            let image = self.provider.resolve_image(server.get_image()).await?;
            let params = ServerCreateParams {
                kind: *server.get_kind(),
                name: row.name.clone(),
                image,
                system_type: server.get_system_type().clone(),
                flavor: server.get_flavor().clone(),
                port_ids: configs.iter().filter_map(|c| c.port_id.clone()).collect(),
                init_script,
            };
            store::set_terminal_create_params(&self.pool, row.id, &to_json(&params)).await?;

            if store::apply_terminal_status(&self.pool, row.id, TerminalStatus::Prepared).await? {
                self.notify_terminal(row, TerminalStatus::Prepared);
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Classifies every server's IP assignment:
/// - direct membership of the external net means a fixed external port;
/// - an `external` server routed to the outside through a gateway gets a
///   floating IP;
/// - a routed server hanging off an externally-addressed checker/attacker
///   gets a floating IP;
/// - everything else keeps scene-private fixed addresses.
pub(super) fn classify_ip_kinds(
    topology: &Topology,
    external_net_id: &str,
) -> HashMap<String, IpKind> {
    let external_nets = topology.external_gateway_nets(external_net_id);
    let mut kinds: HashMap<String, IpKind> = HashMap::new();

    for server in topology.get_servers() {
        let direct = server
            .get_nets()
            .iter()
            .any(|a| a.get_net() == external_net_id);
        let routed = server
            .get_nets()
            .iter()
            .any(|a| external_nets.contains(a.get_net().as_str()));

        let kind = if direct {
            IpKind::OuterFixed
        } else if *server.get_external() && routed {
            IpKind::Float
        } else {
            IpKind::InnerFixed
        };
        kinds.insert(server.get_id().clone(), kind);
    }

    let snapshot = kinds.clone();
    for server in topology.get_servers() {
        if snapshot.get(server.get_id()) != Some(&IpKind::InnerFixed) {
            continue;
        }
        let routed = server
            .get_nets()
            .iter()
            .any(|a| external_nets.contains(a.get_net().as_str()));
        if !routed {
            continue;
        }
        let hangs_external = [server.get_checker(), server.get_attacker()]
            .iter()
            .any(|reference| {
                reference.as_ref().is_some_and(|target| {
                    matches!(
                        snapshot.get(target.as_str()),
                        Some(IpKind::Float | IpKind::OuterFixed)
                    )
                })
            });
        if hangs_external {
            kinds.insert(server.get_id().clone(), IpKind::Float);
        }
    }

    kinds
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn dns_json(declared: &[Ipv4Addr], default: &[Ipv4Addr]) -> String {
    let dns: Vec<String> = if declared.is_empty() {
        default.iter().map(Ipv4Addr::to_string).collect()
    } else {
        declared.iter().map(Ipv4Addr::to_string).collect()
    };
    to_json(&dns)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayDef, NetAttachment, NetworkDef, ServerDef};

    fn topology_with_gateway() -> Topology {
        let net1 = NetworkDef::builder().id("net1").name("intranet").build();
        let gw1 = GatewayDef::builder()
            .id("gw1")
            .name("edge")
            .kind(GatewayKind::Router)
            .nets(vec!["net1".to_string(), "internet".to_string()])
            .build();
        let srv1 = ServerDef::builder()
            .id("srv1")
            .name("operator-box")
            .image("ubuntu-22.04")
            .nets(vec![NetAttachment::builder().net("net1").build()])
            .build();
        let srv2 = ServerDef::builder()
            .id("srv2")
            .name("target-box")
            .image("centos-7")
            .external(true)
            .nets(vec![NetAttachment::builder().net("net1").build()])
            .build();
        Topology::new("demo", vec![net1], vec![gw1], vec![srv1, srv2])
    }

    #[test]
    fn test_classification_of_gateway_routed_servers() {
        let kinds = classify_ip_kinds(&topology_with_gateway(), "internet");

        assert_eq!(kinds["srv1"], IpKind::InnerFixed);
        assert_eq!(kinds["srv2"], IpKind::Float);
    }

    #[test]
    fn test_direct_external_membership_is_outer_fixed() {
        let srv = ServerDef::builder()
            .id("srv1")
            .name("bastion")
            .image("ubuntu-22.04")
            .nets(vec![NetAttachment::builder().net("internet").build()])
            .build();
        let topology = Topology::new("demo", vec![], vec![], vec![srv]);

        let kinds = classify_ip_kinds(&topology, "internet");
        assert_eq!(kinds["srv1"], IpKind::OuterFixed);
    }

    #[test]
    fn test_hang_reference_promotes_to_float() {
        let net1 = NetworkDef::builder().id("net1").name("intranet").build();
        let gw1 = GatewayDef::builder()
            .id("gw1")
            .name("edge")
            .kind(GatewayKind::Router)
            .nets(vec!["net1".to_string(), "internet".to_string()])
            .build();
        let target = ServerDef::builder()
            .id("target")
            .name("target")
            .image("centos-7")
            .external(true)
            .nets(vec![NetAttachment::builder().net("net1").build()])
            .build();
        let checker = ServerDef::builder()
            .id("checker")
            .name("checker")
            .image("ubuntu-22.04")
            .checker(Some("target".to_string()))
            .nets(vec![NetAttachment::builder().net("net1").build()])
            .build();
        let topology = Topology::new("demo", vec![net1], vec![gw1], vec![target, checker]);

        let kinds = classify_ip_kinds(&topology, "internet");
        assert_eq!(kinds["target"], IpKind::Float);
        assert_eq!(kinds["checker"], IpKind::Float);
    }

    #[test]
    fn test_unrouted_servers_stay_inner_fixed() {
        let net1 = NetworkDef::builder().id("net1").name("intranet").build();
        let srv = ServerDef::builder()
            .id("srv1")
            .name("isolated")
            .image("ubuntu-22.04")
            .external(true)
            .nets(vec![NetAttachment::builder().net("net1").build()])
            .build();
        // No gateway: external flag alone cannot produce a float.
        let topology = Topology::new("demo", vec![net1], vec![], vec![srv]);

        let kinds = classify_ip_kinds(&topology, "internet");
        assert_eq!(kinds["srv1"], IpKind::InnerFixed);
    }
}
