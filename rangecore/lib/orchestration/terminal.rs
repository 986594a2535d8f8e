//! Per-terminal creation tasks and the reachability probe.

use std::net::Ipv4Addr;

use crate::{
    config::TerminalKind,
    models::{SceneStatus, TerminalStatus},
    provider::ServerCreateParams,
    store,
    RangecoreError, RangecoreResult,
};

use super::{
    rollback::{CreatedResource, ResourceLedger},
    Orchestrator,
};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Runs one terminal's asynchronous creation. A failure marks the
    /// terminal errored and escalates to whole-scene rollback: siblings are
    /// not left running under a scene stuck in creating.
    pub(super) async fn run_terminal_task(&self, terminal_id: i64) {
        if let Err(error) = self.create_terminal(terminal_id, None).await {
            tracing::error!("terminal {terminal_id} creation failed: {error}");
            self.escalate_terminal_failure(terminal_id, &error.to_string())
                .await;
        }
    }

    /// Creates one terminal's compute instance, binds its floating IP or
    /// host proxy, probes reachability and reports it running.
    ///
    /// `ledger` is passed by the synchronous gateway-terminal path so the
    /// pipeline's rollback covers the instance; spawned tasks pass `None`
    /// and rely on row-driven teardown instead.
    pub(super) async fn create_terminal(
        &self,
        terminal_id: i64,
        mut ledger: Option<&mut ResourceLedger>,
    ) -> RangecoreResult<()> {
        let terminal = store::get_terminal(&self.pool, terminal_id)
            .await?
            .ok_or_else(|| RangecoreError::TerminalNotFound(terminal_id.to_string()))?;

        if !self.scene_still_creating(&terminal.scene_id).await? {
            tracing::info!(
                "scene {} is no longer creating, skipping terminal {}",
                terminal.scene_id,
                terminal.sub_id
            );
            return Ok(());
        }

        self.report_terminal_status(terminal_id, TerminalStatus::Creating)
            .await?;

        let kind = match terminal.kind.as_str() {
            "vm" => TerminalKind::Vm,
            "container" => TerminalKind::Container,
            _ => TerminalKind::Real,
        };

        let server_id = match kind {
            TerminalKind::Real => None,
            TerminalKind::Vm | TerminalKind::Container => {
                let params: ServerCreateParams = serde_json::from_str(
                    terminal.create_params_json.as_deref().ok_or_else(|| {
                        RangecoreError::custom(anyhow::anyhow!(
                            "terminal '{}' has no creation parameters",
                            terminal.sub_id
                        ))
                    })?,
                )?;

                let server_id = match kind {
                    TerminalKind::Vm => self.provider.create_vm(&params).await?,
                    _ => self.provider.create_container(&params).await?,
                };
                if let Some(ledger) = ledger.as_deref_mut() {
                    ledger.record(CreatedResource::Server {
                        server_id: server_id.clone(),
                    });
                }
                store::set_terminal_server(&self.pool, terminal_id, &server_id).await?;
                self.report_terminal_status(terminal_id, TerminalStatus::Hatching)
                    .await?;
                Some(server_id)
            }
        };

        // The scene may have errored or been deleted while the instance was
        // building; resources created after its teardown must not leak.
        if !self.scene_still_creating(&terminal.scene_id).await? {
            let Some(current) = store::get_terminal(&self.pool, terminal_id).await? else {
                return Ok(());
            };
            self.teardown_terminal(&current, false).await;
            return Ok(());
        }

        if let Some(server_id) = &server_id {
            // One status read settles whether the instance came up.
            let _ = self.provider.get_server_status(server_id).await?;
        }
        self.report_terminal_status(terminal_id, TerminalStatus::Starting)
            .await?;
        self.report_terminal_status(terminal_id, TerminalStatus::Deploying)
            .await?;

        self.attach_addressing(&terminal, server_id.as_deref()).await?;

        // Reachability is best-effort: a probe timeout still yields a
        // running terminal.
        let current = store::get_terminal(&self.pool, terminal_id)
            .await?
            .ok_or_else(|| RangecoreError::TerminalNotFound(terminal_id.to_string()))?;
        if let (Some(host_ip), Some(port)) = (current.host_ip.as_deref(), current.service_port) {
            if let Ok(ip) = host_ip.parse::<Ipv4Addr>() {
                if !self.probe_reachability(ip, port as u16).await {
                    tracing::warn!(
                        "terminal {} did not answer on port {port} within the probe budget",
                        terminal.sub_id
                    );
                }
            }
        }

        self.report_terminal_status(terminal_id, TerminalStatus::Running)
            .await?;

        Ok(())
    }

    /// Binds the preallocated floating IP, or falls back to a host-level
    /// port proxy when remote protocols are configured without one.
    async fn attach_addressing(
        &self,
        terminal: &crate::models::SceneTerminal,
        server_id: Option<&str>,
    ) -> RangecoreResult<()> {
        if server_id.is_none() {
            return Ok(());
        }

        let net_configs = terminal.net_configs()?;
        let first_port = net_configs.iter().find_map(|c| c.port_id.clone());

        if let (Some(fip_id), Some(port_id)) = (terminal.float_ip_id.as_deref(), &first_port) {
            self.provider.bind_fip(fip_id, port_id).await?;
            if let Some(float_ip) = terminal.float_ip.as_deref() {
                store::set_terminal_host_ip(&self.pool, terminal.id, float_ip).await?;
            }
            return Ok(());
        }

        let remote_ports = terminal.remote_ports()?;
        if remote_ports.is_empty() {
            return Ok(());
        }
        let Some(host_ip) = terminal.host_ip.as_deref() else {
            return Ok(());
        };
        let Ok(ip) = host_ip.parse::<Ipv4Addr>() else {
            return Ok(());
        };

        let mappings = self.proxy.create_proxy(ip, &remote_ports).await?;
        store::set_terminal_host_proxy_ports(
            &self.pool,
            terminal.id,
            &serde_json::to_string(&mappings)?,
        )
        .await?;

        Ok(())
    }

    /// Polls the service port until it answers or the probe budget elapses.
    pub(super) async fn probe_reachability(&self, ip: Ipv4Addr, port: u16) -> bool {
        let deadline = tokio::time::Instant::now() + self.settings.probe_timeout;

        loop {
            match self.provider.probe_port(ip, port).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(error) => tracing::debug!("reachability probe error: {error}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.settings.probe_step).await;
        }
    }

    /// Marks a failed terminal errored and escalates to whole-scene
    /// rollback. The first terminal to fail wins the scene-error flip and
    /// runs the teardown; later failers only record their own error.
    pub(super) async fn escalate_terminal_failure(&self, terminal_id: i64, message: &str) {
        let terminal = match store::get_terminal(&self.pool, terminal_id).await {
            Ok(Some(terminal)) => terminal,
            Ok(None) => return,
            Err(error) => {
                tracing::error!("failed to load terminal {terminal_id}: {error}");
                return;
            }
        };

        match store::mark_terminal_error(&self.pool, terminal_id, message).await {
            Ok(true) => self.notify_terminal(&terminal, TerminalStatus::Error),
            Ok(false) => {}
            Err(error) => {
                tracing::error!("failed to mark terminal {terminal_id} errored: {error}")
            }
        }

        match store::mark_scene_error(&self.pool, &terminal.scene_id, message).await {
            Ok(true) => {
                let _ = store::push_progress(
                    &self.pool,
                    &terminal.scene_id,
                    &format!("terminal '{}' failed: {message}", terminal.sub_id),
                )
                .await;
                self.notify_scene(&terminal.scene_id, "error");
                self.teardown_scene_resources(&terminal.scene_id, false).await;
            }
            Ok(false) => {}
            Err(error) => {
                tracing::error!(
                    "failed to mark scene {} errored: {error}",
                    terminal.scene_id
                );
            }
        }
    }

    async fn scene_still_creating(&self, scene_id: &str) -> RangecoreResult<bool> {
        Ok(matches!(
            store::scene_status(&self.pool, scene_id).await?,
            Some(SceneStatus::Creating)
        ))
    }
}
