//! Terminal status application and scene completion aggregation.

use crate::{
    models::{SceneStatus, SceneTerminal, TerminalStatus},
    provider::ServerCreateParams,
    store,
    RangecoreError, RangecoreResult,
};

use super::Orchestrator;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Applies one asynchronous terminal status report.
    ///
    /// Process-state reports are applied only when not stale; stale reports
    /// are dropped silently. A `Deleted` report against a terminal already
    /// in a using-state tears that terminal's resources down immediately (a
    /// late report arriving after user-initiated scene deletion). The first
    /// transition into a using-state records completion timestamps, attaches
    /// pending volumes and re-checks scene completion.
    pub async fn report_terminal_status(
        &self,
        terminal_id: i64,
        status: TerminalStatus,
    ) -> RangecoreResult<()> {
        let terminal = store::get_terminal(&self.pool, terminal_id)
            .await?
            .ok_or_else(|| RangecoreError::TerminalNotFound(terminal_id.to_string()))?;
        let current = terminal.status()?;

        match status {
            TerminalStatus::Deleted => {
                if current.is_using() {
                    self.teardown_terminal(&terminal, false).await;
                }
                store::mark_terminal_deleted(&self.pool, terminal_id).await?;
                self.notify_terminal(&terminal, TerminalStatus::Deleted);
            }
            TerminalStatus::Error => {
                if store::mark_terminal_error(&self.pool, terminal_id, "reported error").await? {
                    self.notify_terminal(&terminal, TerminalStatus::Error);
                }
            }
            _ => {
                let was_using = current.is_using();
                if !store::apply_terminal_status(&self.pool, terminal_id, status).await? {
                    tracing::debug!(
                        "stale status report {status:?} for terminal {} dropped",
                        terminal.sub_id
                    );
                    return Ok(());
                }
                self.notify_terminal(&terminal, status);

                if status.is_using() && !was_using {
                    if store::mark_terminal_ready(&self.pool, terminal_id).await? {
                        self.attach_pending_volumes(&terminal).await;
                    }
                    self.check_scene_complete(&terminal.scene_id).await?;
                }
            }
        }

        Ok(())
    }

    /// Checks whether every terminal of a scene reached a using-state and,
    /// if so, completes the scene.
    ///
    /// The aggregation re-queries the persisted terminal set; when two
    /// terminals complete simultaneously both re-check, and the conditional
    /// running flip lets exactly one proceed to the post-creation steps.
    /// A scene deleted in the interim is torn down instead.
    pub(super) async fn check_scene_complete(&self, scene_id: &str) -> RangecoreResult<()> {
        if store::count_terminals_not_using(&self.pool, scene_id).await? > 0 {
            return Ok(());
        }

        match store::scene_status(&self.pool, scene_id).await? {
            Some(SceneStatus::Creating) => {
                if store::mark_scene_running(&self.pool, scene_id).await? {
                    self.post_create(scene_id).await;
                    store::push_progress(&self.pool, scene_id, "scene running").await?;
                    self.notify_scene(scene_id, "running");
                }
            }
            Some(SceneStatus::Deleted) => {
                self.teardown_scene_resources(scene_id, false).await;
            }
            _ => {}
        }

        Ok(())
    }

    /// Attaches the disk volumes recorded on a terminal row. Failures are
    /// logged; a missing volume never blocks the terminal from running.
    async fn attach_pending_volumes(&self, terminal: &SceneTerminal) {
        let Some(server_id) = terminal.server_id.as_deref() else {
            return;
        };
        let volumes = match terminal.volumes() {
            Ok(volumes) => volumes,
            Err(error) => {
                tracing::error!(
                    "terminal {} has malformed volume list: {error}",
                    terminal.sub_id
                );
                return;
            }
        };

        for volume_id in volumes {
            if let Err(error) = self.provider.attach_volume(server_id, &volume_id).await {
                tracing::error!(
                    "failed to attach volume {volume_id} to terminal {}: {error}",
                    terminal.sub_id
                );
            }
        }
    }

    /// Post-creation steps once every terminal is using: QoS policies for
    /// bandwidth-capped terminals, firewall attachment, and one proxy reload
    /// for the whole scene. Each step is best-effort.
    async fn post_create(&self, scene_id: &str) {
        let terminals = match store::list_terminals(&self.pool, scene_id).await {
            Ok(terminals) => terminals,
            Err(error) => {
                tracing::error!("failed to load terminals of scene {scene_id}: {error}");
                return;
            }
        };

        let mut proxied = false;
        for terminal in &terminals {
            if terminal
                .host_proxy_ports()
                .map(|ports| !ports.is_empty())
                .unwrap_or(false)
            {
                proxied = true;
            }
            self.apply_bandwidth_policy(terminal).await;
        }

        self.attach_firewalls(scene_id).await;

        if proxied {
            if let Err(error) = self.proxy.restart().await {
                tracing::error!("failed to reload proxy service for scene {scene_id}: {error}");
            }
        }
    }

    async fn apply_bandwidth_policy(&self, terminal: &SceneTerminal) {
        let Some(params_json) = terminal.create_params_json.as_deref() else {
            return;
        };
        let Ok(params) = serde_json::from_str::<ServerCreateParams>(params_json) else {
            return;
        };
        let Some(bandwidth) = *params.flavor.get_bandwidth() else {
            return;
        };
        let Some(port_id) = params.port_ids.first() else {
            return;
        };

        match self
            .provider
            .create_qos_policy(&format!("{}.qos", terminal.name), bandwidth, port_id)
            .await
        {
            Ok(policy_id) => {
                if let Err(error) = store::set_terminal_policies(
                    &self.pool,
                    terminal.id,
                    &format!("[\"{policy_id}\"]"),
                )
                .await
                {
                    tracing::error!(
                        "failed to record qos policy for terminal {}: {error}",
                        terminal.sub_id
                    );
                }
            }
            Err(error) => {
                tracing::error!(
                    "failed to create qos policy for terminal {}: {error}",
                    terminal.sub_id
                );
            }
        }
    }

    async fn attach_firewalls(&self, scene_id: &str) {
        let (gateways, nets) = match (
            store::list_gateways(&self.pool, scene_id).await,
            store::list_nets(&self.pool, scene_id).await,
        ) {
            (Ok(gateways), Ok(nets)) => (gateways, nets),
            _ => {
                tracing::error!("failed to load gateways of scene {scene_id}");
                return;
            }
        };

        for gateway in gateways.iter().filter(|g| g.firewall_id.is_some()) {
            let member_nets = match gateway.net_sub_ids() {
                Ok(member_nets) => member_nets,
                Err(error) => {
                    tracing::error!(
                        "gateway {} has malformed net list: {error}",
                        gateway.sub_id
                    );
                    continue;
                }
            };
            let subnet_ids: Vec<String> = nets
                .iter()
                .filter(|net| member_nets.contains(&net.sub_id))
                .filter_map(|net| net.subnet_id.clone())
                .collect();

            let firewall_id = gateway.firewall_id.as_deref().unwrap_or_default();
            if let Err(error) = self.provider.attach_firewall(firewall_id, &subnet_ids).await {
                tracing::error!(
                    "failed to attach firewall {} of gateway {}: {error}",
                    firewall_id,
                    gateway.sub_id
                );
            }
        }
    }
}
