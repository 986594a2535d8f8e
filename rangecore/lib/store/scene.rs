//! Scene persistence.
//!
//! Status mutations that participate in races (asynchronous terminal status
//! reports, the scene-completion flip) are single conditional `UPDATE`
//! statements whose `rows_affected` tells the caller whether its write won.

use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

use crate::{
    models::{Scene, SceneGateway, SceneNet, SceneTerminal, SceneStatus, TerminalStatus},
    RangecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A scene row to insert.
#[derive(Debug, Clone)]
pub struct NewScene {
    /// The scene id.
    pub id: String,

    /// The display name of the scene.
    pub name: String,

    /// The resource-name prefix.
    pub prefix: String,
}

/// A net row to insert.
#[derive(Debug, Clone)]
pub struct NewNet {
    /// The topology-local id.
    pub sub_id: String,

    /// The display name.
    pub name: String,

    /// The declared CIDR, if any.
    pub cidr: Option<String>,

    /// The declared gateway address, if any.
    pub gateway_ip: Option<String>,

    /// JSON list of DNS servers.
    pub dns_json: String,

    /// Whether DHCP is enabled.
    pub dhcp: bool,

    /// Whether the net is vlan-backed.
    pub is_real: bool,

    /// JSON list of physical interfaces.
    pub interfaces_json: String,
}

/// A gateway row to insert.
#[derive(Debug, Clone)]
pub struct NewGateway {
    /// The topology-local id.
    pub sub_id: String,

    /// The display name.
    pub name: String,

    /// The kind: "router" or "firewall".
    pub kind: String,

    /// JSON list of connected net sub_ids.
    pub net_sub_ids_json: String,

    /// JSON list of static routes.
    pub static_routing_json: String,

    /// JSON list of firewall rules.
    pub firewall_rules_json: String,

    /// Whether runtime mutation is permitted.
    pub can_user_configure: bool,
}

/// A terminal row to insert.
#[derive(Debug, Clone)]
pub struct NewTerminal {
    /// The topology-local id.
    pub sub_id: String,

    /// The display name.
    pub name: String,

    /// The kind: "vm", "container" or "real".
    pub kind: String,

    /// The operating system family.
    pub system_type: String,

    /// The source image reference.
    pub image: String,

    /// The role string.
    pub role: String,

    /// JSON list of volume ids pending attachment.
    pub volumes_json: String,

    /// JSON list of remote-protocol ports proxied at the host.
    pub remote_ports_json: String,

    /// The service port the reachability probe polls, if any.
    pub service_port: Option<i64>,
}

//--------------------------------------------------------------------------------------------------
// Functions: structure
//--------------------------------------------------------------------------------------------------

/// Persists a scene and all of its owned rows inside one transaction.
/// Terminals start in `Preparing`, the scene in `Creating`.
pub async fn create_scene_structure(
    pool: &Pool<Sqlite>,
    scene: &NewScene,
    nets: &[NewNet],
    gateways: &[NewGateway],
    terminals: &[NewTerminal],
) -> RangecoreResult<()> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO scenes (id, name, prefix, status, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&scene.id)
    .bind(&scene.name)
    .bind(&scene.prefix)
    .bind(SceneStatus::Creating.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for net in nets {
        sqlx::query(
            r#"
            INSERT INTO scene_nets (
                scene_id, sub_id, name, cidr, gateway_ip,
                dns_json, dhcp, is_real, interfaces_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scene.id)
        .bind(&net.sub_id)
        .bind(&net.name)
        .bind(&net.cidr)
        .bind(&net.gateway_ip)
        .bind(&net.dns_json)
        .bind(net.dhcp)
        .bind(net.is_real)
        .bind(&net.interfaces_json)
        .execute(&mut *tx)
        .await?;
    }

    for gateway in gateways {
        sqlx::query(
            r#"
            INSERT INTO scene_gateways (
                scene_id, sub_id, name, kind, net_sub_ids_json,
                static_routing_json, firewall_rules_json, can_user_configure
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scene.id)
        .bind(&gateway.sub_id)
        .bind(&gateway.name)
        .bind(&gateway.kind)
        .bind(&gateway.net_sub_ids_json)
        .bind(&gateway.static_routing_json)
        .bind(&gateway.firewall_rules_json)
        .bind(gateway.can_user_configure)
        .execute(&mut *tx)
        .await?;
    }

    for terminal in terminals {
        sqlx::query(
            r#"
            INSERT INTO scene_terminals (
                scene_id, sub_id, name, kind, system_type, image, role,
                status, volumes_json, remote_ports_json, service_port, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scene.id)
        .bind(&terminal.sub_id)
        .bind(&terminal.name)
        .bind(&terminal.kind)
        .bind(&terminal.system_type)
        .bind(&terminal.image)
        .bind(&terminal.role)
        .bind(TerminalStatus::Preparing.code())
        .bind(&terminal.volumes_json)
        .bind(&terminal.remote_ports_json)
        .bind(terminal.service_port)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: reads
//--------------------------------------------------------------------------------------------------

/// Fetches a scene row by id.
pub async fn get_scene(pool: &Pool<Sqlite>, scene_id: &str) -> RangecoreResult<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>("SELECT * FROM scenes WHERE id = ?")
        .bind(scene_id)
        .fetch_optional(pool)
        .await?;

    Ok(scene)
}

/// Fetches the nets owned by a scene.
pub async fn list_nets(pool: &Pool<Sqlite>, scene_id: &str) -> RangecoreResult<Vec<SceneNet>> {
    let nets =
        sqlx::query_as::<_, SceneNet>("SELECT * FROM scene_nets WHERE scene_id = ? ORDER BY id")
            .bind(scene_id)
            .fetch_all(pool)
            .await?;

    Ok(nets)
}

/// Fetches the gateways owned by a scene.
pub async fn list_gateways(
    pool: &Pool<Sqlite>,
    scene_id: &str,
) -> RangecoreResult<Vec<SceneGateway>> {
    let gateways = sqlx::query_as::<_, SceneGateway>(
        "SELECT * FROM scene_gateways WHERE scene_id = ? ORDER BY id",
    )
    .bind(scene_id)
    .fetch_all(pool)
    .await?;

    Ok(gateways)
}

/// Fetches the terminals owned by a scene.
pub async fn list_terminals(
    pool: &Pool<Sqlite>,
    scene_id: &str,
) -> RangecoreResult<Vec<SceneTerminal>> {
    let terminals = sqlx::query_as::<_, SceneTerminal>(
        "SELECT * FROM scene_terminals WHERE scene_id = ? ORDER BY id",
    )
    .bind(scene_id)
    .fetch_all(pool)
    .await?;

    Ok(terminals)
}

/// Fetches a terminal row by id.
pub async fn get_terminal(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
) -> RangecoreResult<Option<SceneTerminal>> {
    let terminal =
        sqlx::query_as::<_, SceneTerminal>("SELECT * FROM scene_terminals WHERE id = ?")
            .bind(terminal_id)
            .fetch_optional(pool)
            .await?;

    Ok(terminal)
}

/// Returns the number of terminals in a scene not yet in a using-state.
///
/// Callers re-query this after every using-state transition instead of
/// caching a counter, so concurrent completions cannot double-count.
pub async fn count_terminals_not_using(
    pool: &Pool<Sqlite>,
    scene_id: &str,
) -> RangecoreResult<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS remaining FROM scene_terminals WHERE scene_id = ? AND status NOT IN (5, 6)",
    )
    .bind(scene_id)
    .fetch_one(pool)
    .await?;

    Ok(row.get::<i64, _>("remaining"))
}

//--------------------------------------------------------------------------------------------------
// Functions: entity updates
//--------------------------------------------------------------------------------------------------

/// Stores the CIDR assigned to a net.
pub async fn set_net_cidr(pool: &Pool<Sqlite>, net_id: i64, cidr: &str) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_nets SET cidr = ? WHERE id = ?")
        .bind(cidr)
        .bind(net_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the cloud handles assigned to a net.
pub async fn set_net_cloud_ids(
    pool: &Pool<Sqlite>,
    net_id: i64,
    cloud_net_id: &str,
    subnet_id: &str,
    vlan_id: Option<&str>,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_nets SET net_id = ?, subnet_id = ?, vlan_id = ? WHERE id = ?")
        .bind(cloud_net_id)
        .bind(subnet_id)
        .bind(vlan_id)
        .bind(net_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the gateway address of a net.
pub async fn set_net_gateway_ip(
    pool: &Pool<Sqlite>,
    net_id: i64,
    gateway_ip: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_nets SET gateway_ip = ? WHERE id = ?")
        .bind(gateway_ip)
        .bind(net_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the proxy router created for a net.
pub async fn set_net_proxy_router(
    pool: &Pool<Sqlite>,
    net_id: i64,
    router_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_nets SET proxy_router_id = ? WHERE id = ?")
        .bind(router_id)
        .bind(net_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the cloud router handle of a gateway.
pub async fn set_gateway_router(
    pool: &Pool<Sqlite>,
    gateway_id: i64,
    router_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_gateways SET router_id = ? WHERE id = ?")
        .bind(router_id)
        .bind(gateway_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the cloud firewall handle of a gateway.
pub async fn set_gateway_firewall(
    pool: &Pool<Sqlite>,
    gateway_id: i64,
    firewall_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_gateways SET firewall_id = ? WHERE id = ?")
        .bind(firewall_id)
        .bind(gateway_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Replaces a gateway's static routes.
pub async fn set_gateway_routes(
    pool: &Pool<Sqlite>,
    gateway_id: i64,
    static_routing_json: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_gateways SET static_routing_json = ? WHERE id = ?")
        .bind(static_routing_json)
        .bind(gateway_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's per-network IP assignments.
pub async fn set_terminal_net_configs(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    net_configs_json: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET net_configs_json = ? WHERE id = ?")
        .bind(net_configs_json)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's serialized creation parameters.
pub async fn set_terminal_create_params(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    create_params_json: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET create_params_json = ? WHERE id = ?")
        .bind(create_params_json)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's cloud compute handle.
pub async fn set_terminal_server(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    server_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET server_id = ? WHERE id = ?")
        .bind(server_id)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's bound floating IP.
pub async fn set_terminal_float_ip(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    float_ip: &str,
    float_ip_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET float_ip = ?, float_ip_id = ? WHERE id = ?")
        .bind(float_ip)
        .bind(float_ip_id)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores the address the platform reaches a terminal at.
pub async fn set_terminal_host_ip(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    host_ip: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET host_ip = ? WHERE id = ?")
        .bind(host_ip)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's host-level proxy port mappings.
pub async fn set_terminal_host_proxy_ports(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    host_proxy_ports_json: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET host_proxy_ports_json = ? WHERE id = ?")
        .bind(host_proxy_ports_json)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stores a terminal's QoS policy handles.
pub async fn set_terminal_policies(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    policies_json: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET policies_json = ? WHERE id = ?")
        .bind(policies_json)
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: status transitions
//--------------------------------------------------------------------------------------------------

/// Applies a process-state status report if and only if it is not stale.
///
/// Returns true when the report was applied. Stale reports (rank below the
/// persisted status) and reports against absorbed terminals (`Deleted`,
/// `Error`) leave the row untouched and return false. `Running` and `Pause`
/// share a rank, so the two using-states can replace each other.
pub async fn apply_terminal_status(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    status: TerminalStatus,
) -> RangecoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scene_terminals SET status = ?2
        WHERE id = ?1
          AND status NOT IN (0, 7)
          AND (CASE WHEN status = 6 THEN 5 ELSE status END)
              <= (CASE WHEN ?2 = 6 THEN 5 ELSE ?2 END)
        "#,
    )
    .bind(terminal_id)
    .bind(status.code())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks a terminal errored with the failure message. Absorbing: only a
/// deleted terminal resists.
pub async fn mark_terminal_error(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
    message: &str,
) -> RangecoreResult<bool> {
    let result = sqlx::query(
        "UPDATE scene_terminals SET status = ?, error = ? WHERE id = ? AND status != 0",
    )
    .bind(TerminalStatus::Error.code())
    .bind(message)
    .bind(terminal_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks one terminal deleted.
pub async fn mark_terminal_deleted(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET status = ? WHERE id = ?")
        .bind(TerminalStatus::Deleted.code())
        .bind(terminal_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Marks every terminal of a scene deleted.
pub async fn mark_all_terminals_deleted(
    pool: &Pool<Sqlite>,
    scene_id: &str,
) -> RangecoreResult<()> {
    sqlx::query("UPDATE scene_terminals SET status = ? WHERE scene_id = ?")
        .bind(TerminalStatus::Deleted.code())
        .bind(scene_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Records the first transition of a terminal into a using-state.
///
/// Returns true only for the write that claims it: `ready_at IS NULL` makes
/// the claim atomic under concurrent duplicate reports.
pub async fn mark_terminal_ready(
    pool: &Pool<Sqlite>,
    terminal_id: i64,
) -> RangecoreResult<bool> {
    let Some(terminal) = get_terminal(pool, terminal_id).await? else {
        return Ok(false);
    };

    let now = Utc::now();
    let consume_secs = (now - terminal.created_at).num_seconds();

    let result = sqlx::query(
        "UPDATE scene_terminals SET ready_at = ?, consume_secs = ? WHERE id = ? AND ready_at IS NULL",
    )
    .bind(now)
    .bind(consume_secs)
    .bind(terminal_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Returns the persisted status of a scene, if the scene exists.
pub async fn scene_status(
    pool: &Pool<Sqlite>,
    scene_id: &str,
) -> RangecoreResult<Option<SceneStatus>> {
    let row = sqlx::query("SELECT status FROM scenes WHERE id = ?")
        .bind(scene_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(SceneStatus::parse(&row.get::<String, _>("status"))?)),
        None => Ok(None),
    }
}

/// Flips a creating scene to running, recording completion timestamps.
///
/// Returns true only for the caller that wins the flip: the
/// `status = 'creating'` guard makes the transition exactly-once when two
/// terminals complete simultaneously.
pub async fn mark_scene_running(pool: &Pool<Sqlite>, scene_id: &str) -> RangecoreResult<bool> {
    let Some(scene) = get_scene(pool, scene_id).await? else {
        return Ok(false);
    };

    let now = Utc::now();
    let consume_secs = (now - scene.created_at).num_seconds();

    let result = sqlx::query(
        r#"
        UPDATE scenes SET status = 'running', ready_at = ?, consume_secs = ?
        WHERE id = ? AND status = 'creating'
        "#,
    )
    .bind(now)
    .bind(consume_secs)
    .bind(scene_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks a scene errored with the captured failure message. The first failer
/// wins; deleted and already-errored scenes resist.
pub async fn mark_scene_error(
    pool: &Pool<Sqlite>,
    scene_id: &str,
    message: &str,
) -> RangecoreResult<bool> {
    let result = sqlx::query(
        "UPDATE scenes SET status = 'error', error = ? WHERE id = ? AND status NOT IN ('error', 'deleted')",
    )
    .bind(message)
    .bind(scene_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks a scene deleted. Returns false when the scene was already deleted,
/// letting repeat delete calls no-op.
pub async fn mark_scene_deleted(pool: &Pool<Sqlite>, scene_id: &str) -> RangecoreResult<bool> {
    let result = sqlx::query("UPDATE scenes SET status = 'deleted' WHERE id = ? AND status != 'deleted'")
        .bind(scene_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Conditionally moves a scene between two statuses (pause/recover).
pub async fn swap_scene_status(
    pool: &Pool<Sqlite>,
    scene_id: &str,
    from: SceneStatus,
    to: SceneStatus,
) -> RangecoreResult<bool> {
    let result = sqlx::query("UPDATE scenes SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(scene_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

//--------------------------------------------------------------------------------------------------
// Functions: progress log
//--------------------------------------------------------------------------------------------------

/// Appends a progress message to a scene's ordered log.
pub async fn push_progress(
    pool: &Pool<Sqlite>,
    scene_id: &str,
    message: &str,
) -> RangecoreResult<()> {
    sqlx::query("INSERT INTO scene_progress (scene_id, message, created_at) VALUES (?, ?, ?)")
        .bind(scene_id)
        .bind(message)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns a scene's progress messages in append order.
pub async fn list_progress(pool: &Pool<Sqlite>, scene_id: &str) -> RangecoreResult<Vec<String>> {
    let rows = sqlx::query("SELECT message FROM scene_progress WHERE scene_id = ? ORDER BY id")
        .bind(scene_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("message"))
        .collect())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{init_db, SCENE_DB_MIGRATOR};
    use tempfile::tempdir;

    async fn seeded_pool() -> RangecoreResult<(tempfile::TempDir, Pool<Sqlite>, i64)> {
        let temp_dir = tempdir()?;
        let pool = init_db(temp_dir.path().join("scene.db"), &SCENE_DB_MIGRATOR).await?;

        let scene = NewScene {
            id: "scene-1".to_string(),
            name: "demo".to_string(),
            prefix: "scene".to_string(),
        };
        let terminals = vec![
            NewTerminal {
                sub_id: "srv1".to_string(),
                name: "srv1".to_string(),
                kind: "vm".to_string(),
                system_type: "linux".to_string(),
                image: "ubuntu-22.04".to_string(),
                role: "operator".to_string(),
                volumes_json: "[]".to_string(),
                remote_ports_json: "[]".to_string(),
                service_port: None,
            },
            NewTerminal {
                sub_id: "srv2".to_string(),
                name: "srv2".to_string(),
                kind: "vm".to_string(),
                system_type: "linux".to_string(),
                image: "centos-7".to_string(),
                role: "target".to_string(),
                volumes_json: "[]".to_string(),
                remote_ports_json: "[]".to_string(),
                service_port: None,
            },
        ];
        create_scene_structure(&pool, &scene, &[], &[], &terminals).await?;

        let first = list_terminals(&pool, "scene-1").await?[0].id;
        Ok((temp_dir, pool, first))
    }

    #[tokio::test]
    async fn test_structure_insert_is_transactional() -> RangecoreResult<()> {
        let (_guard, pool, _) = seeded_pool().await?;

        let scene = get_scene(&pool, "scene-1").await?.unwrap();
        assert_eq!(scene.status, "creating");

        let terminals = list_terminals(&pool, "scene-1").await?;
        assert_eq!(terminals.len(), 2);
        assert_eq!(
            terminals[0].status().unwrap(),
            TerminalStatus::Preparing
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_stale_status_report_is_dropped() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        assert!(apply_terminal_status(&pool, terminal_id, TerminalStatus::Deploying).await?);
        // An out-of-order Creating report must not regress the status.
        assert!(!apply_terminal_status(&pool, terminal_id, TerminalStatus::Creating).await?);

        let terminal = get_terminal(&pool, terminal_id).await?.unwrap();
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Deploying);

        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_order_reports_settle_at_maximum() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        for status in [
            TerminalStatus::Starting,
            TerminalStatus::Creating,
            TerminalStatus::Running,
            TerminalStatus::Hatching,
            TerminalStatus::Deploying,
        ] {
            let _ = apply_terminal_status(&pool, terminal_id, status).await?;
        }

        let terminal = get_terminal(&pool, terminal_id).await?.unwrap();
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Running);

        Ok(())
    }

    #[tokio::test]
    async fn test_pause_and_running_replace_each_other() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        assert!(apply_terminal_status(&pool, terminal_id, TerminalStatus::Running).await?);
        assert!(apply_terminal_status(&pool, terminal_id, TerminalStatus::Pause).await?);
        assert!(apply_terminal_status(&pool, terminal_id, TerminalStatus::Running).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_error_is_absorbing() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        assert!(mark_terminal_error(&pool, terminal_id, "boom").await?);
        assert!(!apply_terminal_status(&pool, terminal_id, TerminalStatus::Running).await?);

        let terminal = get_terminal(&pool, terminal_id).await?.unwrap();
        assert_eq!(terminal.status().unwrap(), TerminalStatus::Error);
        assert_eq!(terminal.error.as_deref(), Some("boom"));

        Ok(())
    }

    #[tokio::test]
    async fn test_scene_running_flip_is_exactly_once() -> RangecoreResult<()> {
        let (_guard, pool, _) = seeded_pool().await?;

        assert!(mark_scene_running(&pool, "scene-1").await?);
        assert!(!mark_scene_running(&pool, "scene-1").await?);

        let scene = get_scene(&pool, "scene-1").await?.unwrap();
        assert_eq!(scene.status, "running");
        assert!(scene.ready_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_ready_claim_is_exactly_once() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        assert!(mark_terminal_ready(&pool, terminal_id).await?);
        assert!(!mark_terminal_ready(&pool, terminal_id).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_aggregation_counts_latest_statuses() -> RangecoreResult<()> {
        let (_guard, pool, _) = seeded_pool().await?;

        let terminals = list_terminals(&pool, "scene-1").await?;
        assert_eq!(count_terminals_not_using(&pool, "scene-1").await?, 2);

        apply_terminal_status(&pool, terminals[0].id, TerminalStatus::Running).await?;
        assert_eq!(count_terminals_not_using(&pool, "scene-1").await?, 1);

        apply_terminal_status(&pool, terminals[1].id, TerminalStatus::Pause).await?;
        assert_eq!(count_terminals_not_using(&pool, "scene-1").await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_marks_then_resists_repeat() -> RangecoreResult<()> {
        let (_guard, pool, terminal_id) = seeded_pool().await?;

        assert!(mark_scene_deleted(&pool, "scene-1").await?);
        mark_all_terminals_deleted(&pool, "scene-1").await?;
        assert!(!mark_scene_deleted(&pool, "scene-1").await?);

        // Late process reports against a deleted terminal are dropped.
        assert!(!apply_terminal_status(&pool, terminal_id, TerminalStatus::Running).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_progress_log_preserves_order() -> RangecoreResult<()> {
        let (_guard, pool, _) = seeded_pool().await?;

        push_progress(&pool, "scene-1", "structure persisted").await?;
        push_progress(&pool, "scene-1", "networks created").await?;

        let log = list_progress(&pool, "scene-1").await?;
        assert_eq!(log, vec!["structure persisted", "networks created"]);

        Ok(())
    }
}
