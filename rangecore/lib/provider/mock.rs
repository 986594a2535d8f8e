//! In-memory collaborator fakes.
//!
//! [`MockCloud`], [`MockProxy`] and [`MockSink`] record every call and can
//! inject failures at chosen operations, so pipeline and teardown behavior
//! can be exercised deterministically without a cloud backend.

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::config::{FirewallRule, StaticRoute};

use super::{
    CloudProvider, CreatedFirewall, CreatedNetwork, ProviderError, ProviderResult,
    ProxyRegistrar, RemoteServerStatus, ServerCreateParams, StatusEvent, StatusSink,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory cloud provider.
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<MockCloudState>,
}

#[derive(Debug, Default)]
struct MockCloudState {
    counter: u64,
    networks: HashMap<String, bool>,
    routers: HashMap<String, ()>,
    firewalls: HashMap<String, ()>,
    ports: HashMap<String, ()>,
    fip_pool: Vec<Ipv4Addr>,
    claimed_fips: HashMap<String, Ipv4Addr>,
    servers: HashMap<String, RemoteServerStatus>,
    qos_policies: HashMap<String, ()>,
    attached_volumes: HashMap<String, Vec<String>>,
    probe_reachable: bool,
    fail_ops: HashMap<String, u32>,
    calls: Vec<String>,
}

/// An in-memory proxy registrar.
#[derive(Debug, Default)]
pub struct MockProxy {
    state: Mutex<MockProxyState>,
}

#[derive(Debug, Default)]
struct MockProxyState {
    next_host_port: u16,
    mappings: HashMap<Ipv4Addr, Vec<(u16, u16)>>,
    restarts: u32,
}

/// A status sink that records every delivered event.
#[derive(Debug, Default)]
pub struct MockSink {
    events: Mutex<Vec<StatusEvent>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockCloud {
    /// Creates a mock with an empty floating-IP pool and a reachable probe.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().probe_reachable = true;
        mock
    }

    /// Creates a mock whose shared pool holds the given floating IPs.
    pub fn with_fip_pool(ips: Vec<Ipv4Addr>) -> Self {
        let mock = Self::default();
        {
            let mut state = mock.state.lock().unwrap();
            state.fip_pool = ips;
            state.probe_reachable = true;
        }
        mock
    }

    /// Makes the next `times` calls to `op` fail.
    pub fn fail_times(&self, op: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .fail_ops
            .insert(op.to_string(), times);
    }

    /// Makes the next call to `op` fail.
    pub fn fail_once(&self, op: &str) {
        self.fail_times(op, 1);
    }

    /// Controls whether [`CloudProvider::probe_port`] reports reachable.
    pub fn set_probe_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().probe_reachable = reachable;
    }

    /// Returns the recorded call log.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Returns the number of floating IPs still available in the pool.
    pub fn available_fip_count(&self) -> usize {
        self.state.lock().unwrap().fip_pool.len()
    }

    /// Returns the total number of live cloud resources: networks, routers,
    /// firewalls, ports, servers, QoS policies and claimed floating IPs.
    pub fn live_resources(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.networks.len()
            + state.routers.len()
            + state.firewalls.len()
            + state.ports.len()
            + state.servers.len()
            + state.qos_policies.len()
            + state.claimed_fips.len()
    }

    /// Returns the number of live compute instances.
    pub fn live_servers(&self) -> usize {
        self.state.lock().unwrap().servers.len()
    }

    fn record(state: &mut MockCloudState, op: &str) -> ProviderResult<()> {
        state.calls.push(op.to_string());
        if let Some(remaining) = state.fail_ops.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::api(op, "injected failure"));
            }
        }
        Ok(())
    }

    fn next_handle(state: &mut MockCloudState, prefix: &str) -> String {
        state.counter += 1;
        format!("{prefix}-{}", state.counter)
    }
}

impl MockProxy {
    /// Creates a mock proxy registrar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of restarts issued.
    pub fn restarts(&self) -> u32 {
        self.state.lock().unwrap().restarts
    }

    /// Returns the number of live proxy mappings.
    pub fn live_mappings(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .mappings
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl MockSink {
    /// Creates a mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event delivered so far.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CloudProvider for MockCloud {
    async fn create_network(
        &self,
        _name: &str,
        _cidr: &str,
        _dns: &[String],
        _dhcp: bool,
    ) -> ProviderResult<CreatedNetwork> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_network")?;
        let net_id = Self::next_handle(&mut state, "net");
        let subnet_id = Self::next_handle(&mut state, "subnet");
        state.networks.insert(net_id.clone(), false);
        Ok(CreatedNetwork {
            net_id,
            subnet_id,
            vlan_id: None,
        })
    }

    async fn create_vlan_network(
        &self,
        _name: &str,
        _cidr: &str,
        _gateway: Option<&str>,
        _interfaces: &[String],
    ) -> ProviderResult<CreatedNetwork> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_vlan_network")?;
        let net_id = Self::next_handle(&mut state, "vlan-net");
        let subnet_id = Self::next_handle(&mut state, "subnet");
        let vlan_id = Self::next_handle(&mut state, "vlan");
        state.networks.insert(net_id.clone(), true);
        Ok(CreatedNetwork {
            net_id,
            subnet_id,
            vlan_id: Some(vlan_id),
        })
    }

    async fn delete_network(&self, net_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_network")?;
        state
            .networks
            .remove(net_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(net_id.to_string()))
    }

    async fn delete_vlan_network(&self, net_id: &str, _vlan_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_vlan_network")?;
        state
            .networks
            .remove(net_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(net_id.to_string()))
    }

    async fn set_subnet_gateway(&self, _subnet_id: &str, _gateway_ip: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "set_subnet_gateway")
    }

    async fn list_available_fips(&self) -> ProviderResult<Vec<Ipv4Addr>> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "list_available_fips")?;
        Ok(state.fip_pool.clone())
    }

    async fn preallocate_fips(
        &self,
        ips: &[Ipv4Addr],
    ) -> ProviderResult<HashMap<Ipv4Addr, String>> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "preallocate_fips")?;
        if ips.iter().any(|ip| !state.fip_pool.contains(ip)) {
            return Err(ProviderError::api(
                "preallocate_fips",
                "requested address not in pool",
            ));
        }
        let mut claimed = HashMap::new();
        for ip in ips {
            let fip_id = Self::next_handle(&mut state, "fip");
            state.fip_pool.retain(|candidate| candidate != ip);
            state.claimed_fips.insert(fip_id.clone(), *ip);
            claimed.insert(*ip, fip_id);
        }
        Ok(claimed)
    }

    async fn preallocate_ports(
        &self,
        _net_id: &str,
        count: usize,
    ) -> ProviderResult<Vec<(Ipv4Addr, String)>> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "preallocate_ports")?;
        let mut reserved = Vec::new();
        for index in 0..count {
            let port_id = Self::next_handle(&mut state, "ext-port");
            state.ports.insert(port_id.clone(), ());
            reserved.push((Ipv4Addr::new(203, 0, 113, index as u8 + 1), port_id));
        }
        Ok(reserved)
    }

    async fn create_port(&self, _net_id: &str, _name: &str, _ip: &str) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_port")?;
        let port_id = Self::next_handle(&mut state, "port");
        state.ports.insert(port_id.clone(), ());
        Ok(port_id)
    }

    async fn delete_port(&self, port_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_port")?;
        state
            .ports
            .remove(port_id)
            .ok_or_else(|| ProviderError::NotFound(port_id.to_string()))
    }

    async fn release_fip(&self, fip_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "release_fip")?;
        match state.claimed_fips.remove(fip_id) {
            Some(ip) => {
                state.fip_pool.push(ip);
                Ok(())
            }
            None => Err(ProviderError::NotFound(fip_id.to_string())),
        }
    }

    async fn bind_fip(&self, fip_id: &str, _port_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "bind_fip")?;
        if state.claimed_fips.contains_key(fip_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(fip_id.to_string()))
        }
    }

    async fn create_router(
        &self,
        _name: &str,
        _subnet_ids: &[String],
        _external_net_id: Option<&str>,
    ) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_router")?;
        let router_id = Self::next_handle(&mut state, "router");
        state.routers.insert(router_id.clone(), ());
        Ok(router_id)
    }

    async fn delete_router(&self, router_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_router")?;
        state
            .routers
            .remove(router_id)
            .ok_or_else(|| ProviderError::NotFound(router_id.to_string()))
    }

    async fn update_router_routes(
        &self,
        router_id: &str,
        _routes: &[StaticRoute],
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "update_router_routes")?;
        if state.routers.contains_key(router_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(router_id.to_string()))
        }
    }

    async fn create_firewall(
        &self,
        _name: &str,
        rules: &[FirewallRule],
    ) -> ProviderResult<CreatedFirewall> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_firewall")?;
        let firewall_id = Self::next_handle(&mut state, "fw");
        let policy_id = Self::next_handle(&mut state, "fw-policy");
        let rule_ids = (0..rules.len())
            .map(|_| Self::next_handle(&mut state, "fw-rule"))
            .collect();
        state.firewalls.insert(firewall_id.clone(), ());
        Ok(CreatedFirewall {
            firewall_id,
            rule_ids,
            policy_id,
        })
    }

    async fn attach_firewall(
        &self,
        firewall_id: &str,
        _subnet_ids: &[String],
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "attach_firewall")?;
        if state.firewalls.contains_key(firewall_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(firewall_id.to_string()))
        }
    }

    async fn delete_firewall(&self, firewall_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_firewall")?;
        state
            .firewalls
            .remove(firewall_id)
            .ok_or_else(|| ProviderError::NotFound(firewall_id.to_string()))
    }

    async fn resolve_image(&self, image: &str) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "resolve_image")?;
        Ok(image.to_string())
    }

    async fn create_vm(&self, _params: &ServerCreateParams) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_vm")?;
        let server_id = Self::next_handle(&mut state, "vm");
        state.servers.insert(server_id.clone(), RemoteServerStatus::Active);
        Ok(server_id)
    }

    async fn create_container(&self, _params: &ServerCreateParams) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_container")?;
        let server_id = Self::next_handle(&mut state, "container");
        state.servers.insert(server_id.clone(), RemoteServerStatus::Active);
        Ok(server_id)
    }

    async fn get_server_status(&self, server_id: &str) -> ProviderResult<RemoteServerStatus> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "get_server_status")?;
        state
            .servers
            .get(server_id)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(server_id.to_string()))
    }

    async fn start_server(&self, server_id: &str) -> ProviderResult<()> {
        self.set_server_status(server_id, "start_server", RemoteServerStatus::Active)
    }

    async fn stop_server(&self, server_id: &str) -> ProviderResult<()> {
        self.set_server_status(server_id, "stop_server", RemoteServerStatus::Stopped)
    }

    async fn pause_server(&self, server_id: &str) -> ProviderResult<()> {
        self.set_server_status(server_id, "pause_server", RemoteServerStatus::Paused)
    }

    async fn unpause_server(&self, server_id: &str) -> ProviderResult<()> {
        self.set_server_status(server_id, "unpause_server", RemoteServerStatus::Active)
    }

    async fn delete_server(&self, server_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_server")?;
        state
            .servers
            .remove(server_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(server_id.to_string()))
    }

    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "attach_volume")?;
        state
            .attached_volumes
            .entry(server_id.to_string())
            .or_default()
            .push(volume_id.to_string());
        Ok(())
    }

    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "detach_volume")?;
        match state.attached_volumes.get_mut(server_id) {
            Some(volumes) => {
                volumes.retain(|v| v != volume_id);
                Ok(())
            }
            None => Err(ProviderError::NotFound(volume_id.to_string())),
        }
    }

    async fn create_qos_policy(
        &self,
        _name: &str,
        _bandwidth_mbps: u32,
        _port_id: &str,
    ) -> ProviderResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "create_qos_policy")?;
        let policy_id = Self::next_handle(&mut state, "qos");
        state.qos_policies.insert(policy_id.clone(), ());
        Ok(policy_id)
    }

    async fn delete_qos_policy(&self, policy_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "delete_qos_policy")?;
        state
            .qos_policies
            .remove(policy_id)
            .ok_or_else(|| ProviderError::NotFound(policy_id.to_string()))
    }

    async fn probe_port(&self, _ip: Ipv4Addr, _port: u16) -> ProviderResult<bool> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, "probe_port")?;
        Ok(state.probe_reachable)
    }
}

impl MockCloud {
    fn set_server_status(
        &self,
        server_id: &str,
        op: &str,
        status: RemoteServerStatus,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, op)?;
        match state.servers.get_mut(server_id) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => Err(ProviderError::NotFound(server_id.to_string())),
        }
    }
}

#[async_trait]
impl ProxyRegistrar for MockProxy {
    async fn create_proxy(&self, ip: Ipv4Addr, ports: &[u16]) -> ProviderResult<Vec<(u16, u16)>> {
        let mut state = self.state.lock().unwrap();
        let mut mapped = Vec::new();
        for port in ports {
            state.next_host_port += 1;
            let host_port = 30000 + state.next_host_port;
            mapped.push((*port, host_port));
        }
        state.mappings.entry(ip).or_default().extend(mapped.clone());
        Ok(mapped)
    }

    async fn delete_proxy(&self, ip: Ipv4Addr, ports: &[u16]) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(mappings) = state.mappings.get_mut(&ip) {
            mappings.retain(|(guest, _)| !ports.contains(guest));
        }
        Ok(())
    }

    async fn restart(&self) -> ProviderResult<()> {
        self.state.lock().unwrap().restarts += 1;
        Ok(())
    }
}

impl StatusSink for MockSink {
    fn notify(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}
