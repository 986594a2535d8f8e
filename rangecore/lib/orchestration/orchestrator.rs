use std::sync::{Arc, Mutex as StdMutex};

use sqlx::{Pool, Sqlite};
use tokio::task::JoinHandle;

use crate::{
    alloc::{NamedLocks, Preallocator},
    config::{GatewayKind, OrchestratorSettings, StaticRoute},
    models::{Scene, SceneTerminal, TerminalStatus},
    provider::{CloudProvider, EntityType, ProxyRegistrar, StatusEvent, StatusSink},
    store,
    RangecoreError, RangecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The scene construction and lifecycle orchestrator.
///
/// Cheap to clone: spawned per-terminal tasks capture a clone and share the
/// same provider, store and task registry.
#[derive(Clone)]
pub struct Orchestrator {
    /// Platform configuration.
    pub(super) settings: Arc<OrchestratorSettings>,

    /// The cloud resource provider.
    pub(super) provider: Arc<dyn CloudProvider>,

    /// The host-level proxy registrar.
    pub(super) proxy: Arc<dyn ProxyRegistrar>,

    /// The status notification sink.
    pub(super) sink: Arc<dyn StatusSink>,

    /// The scene database pool.
    pub(super) pool: Pool<Sqlite>,

    /// The shared-pool preallocator.
    pub(super) prealloc: Arc<Preallocator>,

    /// The named lock registry.
    pub(super) locks: Arc<NamedLocks>,

    /// Handles of spawned provisioning and teardown tasks.
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

/// A scene with its terminals and progress log.
#[derive(Debug, Clone)]
pub struct SceneOverview {
    /// The scene row.
    pub scene: Scene,

    /// The terminal rows.
    pub terminals: Vec<SceneTerminal>,

    /// The ordered progress messages.
    pub progress: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        settings: OrchestratorSettings,
        provider: Arc<dyn CloudProvider>,
        proxy: Arc<dyn ProxyRegistrar>,
        sink: Arc<dyn StatusSink>,
        pool: Pool<Sqlite>,
    ) -> Self {
        let locks = Arc::new(NamedLocks::new());
        let prealloc = Arc::new(Preallocator::new(
            locks.clone(),
            &settings.external_cloud_net_id,
            settings.lock_attempts,
            settings.lock_backoff,
        ));

        Self {
            settings: Arc::new(settings),
            provider,
            proxy,
            sink,
            pool,
            prealloc,
            locks,
            tasks: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Returns a scene with its terminals and progress log.
    pub async fn scene_overview(&self, scene_id: &str) -> RangecoreResult<SceneOverview> {
        let scene = store::get_scene(&self.pool, scene_id)
            .await?
            .ok_or_else(|| RangecoreError::SceneNotFound(scene_id.to_string()))?;
        let terminals = store::list_terminals(&self.pool, scene_id).await?;
        let progress = store::list_progress(&self.pool, scene_id).await?;

        Ok(SceneOverview {
            scene,
            terminals,
            progress,
        })
    }

    /// Pauses a running scene, propagating the pause to every non-real
    /// terminal. Individual terminal failures are logged and do not abort
    /// the sweep.
    pub async fn pause_scene(&self, scene_id: &str) -> RangecoreResult<()> {
        self.swap_scene(scene_id, "pause").await
    }

    /// Recovers a paused scene back to running.
    pub async fn recover_scene(&self, scene_id: &str) -> RangecoreResult<()> {
        self.swap_scene(scene_id, "recover").await
    }

    async fn swap_scene(&self, scene_id: &str, operation: &str) -> RangecoreResult<()> {
        use crate::models::SceneStatus;

        let (from, to, terminal_status) = match operation {
            "pause" => (SceneStatus::Running, SceneStatus::Pause, TerminalStatus::Pause),
            _ => (SceneStatus::Pause, SceneStatus::Running, TerminalStatus::Running),
        };

        let scene = store::get_scene(&self.pool, scene_id)
            .await?
            .ok_or_else(|| RangecoreError::SceneNotFound(scene_id.to_string()))?;

        if !store::swap_scene_status(&self.pool, scene_id, from, to).await? {
            return Err(RangecoreError::InvalidSceneState {
                scene: scene_id.to_string(),
                status: scene.status,
                operation: operation.to_string(),
            });
        }

        for terminal in store::list_terminals(&self.pool, scene_id).await? {
            if terminal.is_real() {
                continue;
            }
            let Some(server_id) = terminal.server_id.as_deref() else {
                continue;
            };

            let result = match to {
                SceneStatus::Pause => self.provider.pause_server(server_id).await,
                _ => self.provider.unpause_server(server_id).await,
            };
            if let Err(error) = result {
                tracing::error!(
                    "failed to {operation} terminal {}: {error}",
                    terminal.sub_id
                );
                continue;
            }

            if store::apply_terminal_status(&self.pool, terminal.id, terminal_status).await? {
                self.notify_terminal(&terminal, terminal_status);
            }
        }

        self.notify_scene(scene_id, to.as_str());

        Ok(())
    }

    /// Replaces the static routes of a user-configurable router gateway.
    pub async fn update_gateway_routes(
        &self,
        scene_id: &str,
        gateway_sub_id: &str,
        routes: Vec<StaticRoute>,
    ) -> RangecoreResult<()> {
        let gateways = store::list_gateways(&self.pool, scene_id).await?;
        let gateway = gateways
            .iter()
            .find(|g| g.sub_id == gateway_sub_id)
            .ok_or_else(|| RangecoreError::SceneNotFound(format!(
                "{scene_id}/{gateway_sub_id}"
            )))?;

        if !gateway.can_user_configure {
            return Err(RangecoreError::GatewayNotConfigurable(
                gateway_sub_id.to_string(),
            ));
        }

        let router_id = gateway.router_id.as_deref().ok_or_else(|| {
            RangecoreError::InvalidSceneState {
                scene: scene_id.to_string(),
                status: GatewayKind::Router.as_str().to_string(),
                operation: "update routes before provisioning".to_string(),
            }
        })?;

        self.provider
            .update_router_routes(router_id, &routes)
            .await?;
        store::set_gateway_routes(&self.pool, gateway.id, &serde_json::to_string(&routes)?)
            .await?;

        Ok(())
    }

    /// Spawns a tracked background task.
    pub(super) fn spawn_task<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .push(handle);
    }

    /// Awaits every spawned task, including tasks spawned while waiting.
    /// Lets callers and tests observe completion deterministically.
    pub async fn wait_idle(&self) {
        loop {
            let drained: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().expect("task registry poisoned");
                tasks.drain(..).collect()
            };
            if drained.is_empty() {
                break;
            }
            for result in futures::future::join_all(drained).await {
                if let Err(error) = result {
                    tracing::error!("background task panicked: {error}");
                }
            }
        }
    }

    /// Emits a terminal status event. Fire-and-forget.
    pub(super) fn notify_terminal(&self, terminal: &SceneTerminal, status: TerminalStatus) {
        self.sink.notify(StatusEvent {
            entity_type: EntityType::Terminal,
            entity_id: terminal.sub_id.clone(),
            new_status: format!("{status:?}").to_lowercase(),
            scene_id: terminal.scene_id.clone(),
        });
    }

    /// Emits a scene status event. Fire-and-forget.
    pub(super) fn notify_scene(&self, scene_id: &str, status: &str) {
        self.sink.notify(StatusEvent {
            entity_type: EntityType::Scene,
            entity_id: scene_id.to_string(),
            new_status: status.to_string(),
            scene_id: scene_id.to_string(),
        });
    }
}
