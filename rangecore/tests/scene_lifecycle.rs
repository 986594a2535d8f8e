//! End-to-end scene lifecycle tests against the in-memory collaborators.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use rangecore::{
    config::{
        GatewayDef, GatewayKind, NetAttachment, NetworkDef, OrchestratorSettings, ServerDef,
        ServerRole, Topology,
    },
    models::TerminalStatus,
    orchestration::Orchestrator,
    provider::{EntityType, MockCloud, MockProxy, MockSink},
    store,
    RangecoreError,
};

//--------------------------------------------------------------------------------------------------
// Harness
//--------------------------------------------------------------------------------------------------

struct Harness {
    orchestrator: Orchestrator,
    cloud: Arc<MockCloud>,
    proxy: Arc<MockProxy>,
    sink: Arc<MockSink>,
    pool: sqlx::Pool<sqlx::Sqlite>,
    _temp_dir: tempfile::TempDir,
}

async fn harness(cloud: MockCloud) -> anyhow::Result<Harness> {
    let temp_dir = tempfile::tempdir()?;
    let pool = store::init_db(temp_dir.path().join("scene.db"), &store::SCENE_DB_MIGRATOR).await?;

    let settings = OrchestratorSettings::builder()
        .external_cloud_net_id("ext-net-1")
        .platform_ip(Ipv4Addr::new(10, 0, 0, 1))
        .lock_attempts(3)
        .lock_backoff(Duration::from_millis(5))
        .probe_timeout(Duration::from_millis(50))
        .probe_step(Duration::from_millis(5))
        .build();

    let cloud = Arc::new(cloud);
    let proxy = Arc::new(MockProxy::new());
    let sink = Arc::new(MockSink::new());
    let orchestrator = Orchestrator::new(
        settings,
        cloud.clone(),
        proxy.clone(),
        sink.clone(),
        pool.clone(),
    );

    Ok(Harness {
        orchestrator,
        cloud,
        proxy,
        sink,
        pool,
        _temp_dir: temp_dir,
    })
}

fn fip_pool(count: u8) -> Vec<Ipv4Addr> {
    (1..=count).map(|i| Ipv4Addr::new(198, 51, 100, i)).collect()
}

/// One network without a CIDR, a router to the outside, an internal operator
/// box and an external target box.
fn demo_topology() -> Topology {
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
        .role(ServerRole::Operator)
        .nets(vec![NetAttachment::builder().net("net1").build()])
        .build();
    let srv2 = ServerDef::builder()
        .id("srv2")
        .name("target-box")
        .image("centos-7")
        .role(ServerRole::Target)
        .external(true)
        .service_port(Some(22))
        .nets(vec![NetAttachment::builder().net("net1").build()])
        .build();
    Topology::new("demo", vec![net1], vec![gw1], vec![srv1, srv2])
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_scene_reaches_running_with_expected_resources() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h
        .orchestrator
        .create_scene(demo_topology(), Some("lab"))
        .await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "running", "{:?}", overview.progress);
    assert!(overview.scene.ready_at.is_some());
    assert!(overview.scene.consume_secs.is_some());

    for terminal in &overview.terminals {
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Running);
        assert!(terminal.server_id.is_some());
        assert!(terminal.ready_at.is_some());
        assert!(terminal.name.starts_with("rangecore.lab.demo."));
    }

    // The net got a random CIDR and cloud handles.
    let nets = store::list_nets(&h.pool, &scene_id).await?;
    assert!(nets[0].cidr.is_some());
    assert!(nets[0].net_id.is_some());
    assert!(nets[0].gateway_ip.is_some());

    // The router was created and bound.
    let gateways = store::list_gateways(&h.pool, &scene_id).await?;
    assert!(gateways[0].router_id.is_some());

    // Only srv2 qualifies for a floating IP, leaving one in the pool.
    assert_eq!(h.cloud.available_fip_count(), 1);
    let srv2 = overview
        .terminals
        .iter()
        .find(|t| t.sub_id == "srv2")
        .unwrap();
    assert!(srv2.float_ip.is_some());
    let srv1 = overview
        .terminals
        .iter()
        .find(|t| t.sub_id == "srv1")
        .unwrap();
    assert!(srv1.float_ip.is_none());

    Ok(())
}

#[tokio::test]
async fn test_scene_running_event_emitted_exactly_once() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    let running_events = h
        .sink
        .events()
        .into_iter()
        .filter(|event| {
            event.entity_type == EntityType::Scene
                && event.scene_id == scene_id
                && event.new_status == "running"
        })
        .count();
    assert_eq!(running_events, 1);

    Ok(())
}

#[tokio::test]
async fn test_validation_failure_touches_nothing() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let mut topology = demo_topology();
    // Duplicate the first server id.
    let broken = topology.get_servers()[0].clone();
    topology = Topology::new(
        topology.get_name().clone(),
        topology.get_networks().clone(),
        topology.get_gateways().clone(),
        vec![
            broken.clone(),
            broken,
            topology.get_servers()[1].clone(),
        ],
    );

    let result = h.orchestrator.create_scene(topology, None).await;
    assert!(matches!(
        result,
        Err(RangecoreError::TopologyValidation(_))
    ));
    assert!(h.cloud.calls().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_structural_failures_roll_back_created_resources() -> anyhow::Result<()> {
    for failing_op in ["create_network", "create_router", "create_port"] {
        let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;
        h.cloud.fail_once(failing_op);

        let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
        h.orchestrator.wait_idle().await;

        let overview = h.orchestrator.scene_overview(&scene_id).await?;
        assert_eq!(
            overview.scene.status, "error",
            "scene must fail when {failing_op} fails"
        );
        assert!(overview.scene.error.is_some());
        assert_eq!(
            h.cloud.live_resources(),
            0,
            "rollback after {failing_op} failure must release everything"
        );
        assert_eq!(h.cloud.available_fip_count(), 2);
    }

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_terminal_task_failure_escalates_to_scene_rollback() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;
    h.cloud.fail_once("create_vm");

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "error");
    assert!(overview
        .terminals
        .iter()
        .any(|t| t.status().unwrap() == TerminalStatus::Error));
    assert_eq!(h.cloud.live_resources(), 0);
    assert_eq!(h.cloud.available_fip_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_fip_shortfall_aborts_and_rolls_back() -> anyhow::Result<()> {
    // srv2 needs one floating IP; the pool is empty.
    let h = harness(MockCloud::with_fip_pool(vec![])).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "error");
    assert_eq!(h.cloud.live_resources(), 0);
    assert_eq!(h.cloud.live_servers(), 0, "no terminal creation after a failed reservation");

    Ok(())
}

#[tokio::test]
async fn test_delete_scene_is_idempotent() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    h.orchestrator.delete_scene(&scene_id, true).await?;
    assert_eq!(h.cloud.live_resources(), 0);
    assert_eq!(h.cloud.available_fip_count(), 2);

    let calls_after_first = h.cloud.calls().len();

    // The repeat call observes the deleted scene and no-ops.
    h.orchestrator.delete_scene(&scene_id, true).await?;
    assert_eq!(h.cloud.calls().len(), calls_after_first);

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "deleted");
    for terminal in &overview.terminals {
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Deleted);
    }

    Ok(())
}

#[tokio::test]
async fn test_delete_during_provisioning_tears_everything_down() -> anyhow::Result<()> {
    let cloud = MockCloud::with_fip_pool(fip_pool(2));
    // Terminals never answer the probe, keeping their tasks in flight.
    cloud.set_probe_reachable(false);
    let h = harness(cloud).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;

    // Wait until the structural steps are done and the terminal tasks are in
    // their probe loops, then delete out from under them.
    for _ in 0..200 {
        let progress = store::list_progress(&h.pool, &scene_id).await?;
        if progress.iter().any(|m| m == "terminals launching") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    h.orchestrator.delete_scene(&scene_id, false).await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "deleted");
    assert_eq!(h.cloud.live_resources(), 0);
    assert_eq!(h.cloud.available_fip_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_late_deleted_report_tears_down_single_terminal() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    let servers_before = h.cloud.live_servers();
    let terminals = store::list_terminals(&h.pool, &scene_id).await?;
    let target = terminals.iter().find(|t| t.sub_id == "srv2").unwrap();

    h.orchestrator
        .report_terminal_status(target.id, TerminalStatus::Deleted)
        .await?;

    assert_eq!(h.cloud.live_servers(), servers_before - 1);
    let target = store::get_terminal(&h.pool, target.id).await?.unwrap();
    assert_eq!(target.status().unwrap(), TerminalStatus::Deleted);

    Ok(())
}

#[tokio::test]
async fn test_pause_and_recover_propagate_to_terminals() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    h.orchestrator.pause_scene(&scene_id).await?;
    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "pause");
    for terminal in &overview.terminals {
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Pause);
    }

    // Pausing a paused scene is refused.
    assert!(matches!(
        h.orchestrator.pause_scene(&scene_id).await,
        Err(RangecoreError::InvalidSceneState { .. })
    ));

    h.orchestrator.recover_scene(&scene_id).await?;
    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "running");
    for terminal in &overview.terminals {
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Running);
    }

    Ok(())
}

#[tokio::test]
async fn test_gateway_route_mutation_respects_configure_flag() -> anyhow::Result<()> {
    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    // demo_topology's gateway does not allow user configuration.
    let result = h
        .orchestrator
        .update_gateway_routes(&scene_id, "gw1", vec![])
        .await;
    assert!(matches!(
        result,
        Err(RangecoreError::GatewayNotConfigurable(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_probe_timeout_still_marks_terminal_running() -> anyhow::Result<()> {
    let cloud = MockCloud::with_fip_pool(fip_pool(2));
    cloud.set_probe_reachable(false);
    let h = harness(cloud).await?;

    let scene_id = h.orchestrator.create_scene(demo_topology(), None).await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(
        overview.scene.status, "running",
        "an unanswered probe is non-fatal"
    );

    Ok(())
}

#[tokio::test]
async fn test_remote_ports_fall_back_to_host_proxy() -> anyhow::Result<()> {
    // srv1 has remote protocols but no floating IP, so its ports are
    // proxied at the host.
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
        .remote_ports(vec![3389, 22])
        .nets(vec![NetAttachment::builder().net("net1").build()])
        .build();
    let topology = Topology::new("proxy-demo", vec![net1], vec![gw1], vec![srv1]);

    let h = harness(MockCloud::with_fip_pool(fip_pool(2))).await?;
    let scene_id = h.orchestrator.create_scene(topology, None).await?;
    h.orchestrator.wait_idle().await;

    let overview = h.orchestrator.scene_overview(&scene_id).await?;
    assert_eq!(overview.scene.status, "running");
    let srv1 = &overview.terminals[0];
    assert_eq!(srv1.host_proxy_ports()?.len(), 2);
    assert_eq!(h.proxy.live_mappings(), 2);
    assert_eq!(h.proxy.restarts(), 1, "one reload per scene operation");

    // Deletion removes the mappings and reloads once more.
    h.orchestrator.delete_scene(&scene_id, false).await?;
    assert_eq!(h.proxy.live_mappings(), 0);
    assert_eq!(h.proxy.restarts(), 2);

    Ok(())
}
