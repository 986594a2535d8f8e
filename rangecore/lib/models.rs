//! Database models for rangecore scenes and their owned entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RangecoreError, RangecoreResult};

//--------------------------------------------------------------------------------------------------
// Types: Status
//--------------------------------------------------------------------------------------------------

/// The lifecycle status of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneStatus {
    /// The scene structure is persisted and provisioning is in flight.
    Creating,

    /// Every terminal reached a using-state.
    Running,

    /// The scene is paused.
    Pause,

    /// An unrecoverable provisioning failure occurred.
    Error,

    /// The scene was deleted.
    Deleted,
}

/// The lifecycle status of a terminal.
///
/// The integer codes define a total order used for monotonic progress
/// comparison of asynchronous status reports. `Running` and `Pause` share a
/// rank: both are using-states and neither supersedes the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    /// The terminal row exists but no resources are assigned yet.
    Preparing,

    /// Addressing resources are assigned; cloud creation has not started.
    Prepared,

    /// The terminal's resources were deleted.
    Deleted,

    /// The cloud create call is in flight.
    Creating,

    /// The cloud handle exists; the instance is coming up.
    Hatching,

    /// The instance is booting.
    Starting,

    /// Init scripts are being applied.
    Deploying,

    /// The terminal is fully provisioned and operable.
    Running,

    /// The terminal is paused.
    Pause,

    /// The terminal failed. Absorbing: no process report overrides it.
    Error,
}

/// IP assignment classification for a terminal, derived from its network
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpKind {
    /// A fixed address on a scene-private network.
    InnerFixed,

    /// A fixed address directly on the external network.
    OuterFixed,

    /// A floating IP bound to a private fixed address.
    Float,
}

//--------------------------------------------------------------------------------------------------
// Types: Rows
//--------------------------------------------------------------------------------------------------

/// A scene is one instantiated cyber-range topology with a lifecycle.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Scene {
    /// The unique identifier for the scene.
    pub id: String,

    /// The display name of the scene.
    pub name: String,

    /// The name prefix used when namespacing cloud resources.
    pub prefix: String,

    /// The status of the scene.
    pub status: String,

    /// The last human-readable failure message, if any.
    pub error: Option<String>,

    /// When provisioning started.
    pub created_at: DateTime<Utc>,

    /// When every terminal reached a using-state.
    pub ready_at: Option<DateTime<Utc>>,

    /// Seconds elapsed between `created_at` and `ready_at`.
    pub consume_secs: Option<i64>,
}

/// A network owned by a scene.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SceneNet {
    /// The unique identifier for the net row.
    pub id: i64,

    /// The ID of the scene that owns this net.
    pub scene_id: String,

    /// The topology-local id, unique within the scene.
    pub sub_id: String,

    /// The display name of the network.
    pub name: String,

    /// The CIDR of the subnet, assigned at provisioning time if not declared.
    pub cidr: Option<String>,

    /// The gateway address of the subnet.
    pub gateway_ip: Option<String>,

    /// JSON list of DNS server addresses.
    pub dns_json: String,

    /// Whether DHCP is enabled on the subnet.
    pub dhcp: bool,

    /// Whether the net is backed by a physical (vlan) network.
    pub is_real: bool,

    /// JSON list of physical interface ids for vlan-backed nets.
    pub interfaces_json: String,

    /// The cloud network handle, null until provisioned.
    pub net_id: Option<String>,

    /// The cloud subnet handle, null until provisioned.
    pub subnet_id: Option<String>,

    /// The vlan id for vlan-backed nets, null otherwise.
    pub vlan_id: Option<String>,

    /// The NAT router created for platform-side connection proxying, if any.
    pub proxy_router_id: Option<String>,
}

/// A router or firewall owned by a scene.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SceneGateway {
    /// The unique identifier for the gateway row.
    pub id: i64,

    /// The ID of the scene that owns this gateway.
    pub scene_id: String,

    /// The topology-local id, unique within the scene.
    pub sub_id: String,

    /// The display name of the gateway.
    pub name: String,

    /// The kind of gateway: "router" or "firewall".
    pub kind: String,

    /// JSON list of net sub_ids this gateway connects.
    pub net_sub_ids_json: String,

    /// JSON list of static routes.
    pub static_routing_json: String,

    /// JSON list of firewall rules.
    pub firewall_rules_json: String,

    /// Whether runtime route/rule mutation is permitted.
    pub can_user_configure: bool,

    /// The cloud router handle, null until provisioned.
    pub router_id: Option<String>,

    /// The cloud firewall handle, null until provisioned.
    pub firewall_id: Option<String>,
}

/// A provisioned compute endpoint within a scene.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SceneTerminal {
    /// The unique identifier for the terminal row.
    pub id: i64,

    /// The ID of the scene that owns this terminal.
    pub scene_id: String,

    /// The topology-local id, unique within the scene.
    pub sub_id: String,

    /// The display name of the terminal.
    pub name: String,

    /// The kind of terminal: "vm", "container" or "real".
    pub kind: String,

    /// The operating system family of the image.
    pub system_type: String,

    /// The source image reference.
    pub image: String,

    /// The role of the terminal within the scene.
    pub role: String,

    /// The status code of the terminal (see [`TerminalStatus`]).
    pub status: i64,

    /// JSON per-network IP assignment list.
    pub net_configs_json: String,

    /// The cloud compute handle, null until provisioned.
    pub server_id: Option<String>,

    /// The bound floating IP address, if any.
    pub float_ip: Option<String>,

    /// The cloud handle of the bound floating IP, if any.
    pub float_ip_id: Option<String>,

    /// The address the platform reaches the terminal at.
    pub host_ip: Option<String>,

    /// Serialized creation parameters enabling idempotent recreation.
    pub create_params_json: Option<String>,

    /// JSON list of QoS policy handles applied to the terminal.
    pub policies_json: String,

    /// JSON map of host-level proxy port mappings.
    pub host_proxy_ports_json: String,

    /// JSON list of volume ids pending attachment.
    pub volumes_json: String,

    /// JSON list of remote-protocol ports proxied at the host.
    pub remote_ports_json: String,

    /// The service port the reachability probe polls, if any.
    pub service_port: Option<i64>,

    /// The last human-readable failure message, if any.
    pub error: Option<String>,

    /// When the terminal row was created.
    pub created_at: DateTime<Utc>,

    /// When the terminal first reached a using-state.
    pub ready_at: Option<DateTime<Utc>>,

    /// Seconds elapsed between `created_at` and `ready_at`.
    pub consume_secs: Option<i64>,
}

/// One terminal-network pairing with its assigned address and port handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// The sub_id of the network the terminal attaches to.
    pub net_sub_id: String,

    /// The assigned fixed IP on that network.
    pub ip: String,

    /// The cloud port handle, null until the port is created.
    pub port_id: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SceneStatus {
    /// Returns the status as the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::Creating => "creating",
            SceneStatus::Running => "running",
            SceneStatus::Pause => "pause",
            SceneStatus::Error => "error",
            SceneStatus::Deleted => "deleted",
        }
    }

    /// Parses a status from its database representation.
    pub fn parse(s: &str) -> RangecoreResult<Self> {
        match s {
            "creating" => Ok(SceneStatus::Creating),
            "running" => Ok(SceneStatus::Running),
            "pause" => Ok(SceneStatus::Pause),
            "error" => Ok(SceneStatus::Error),
            "deleted" => Ok(SceneStatus::Deleted),
            other => Err(RangecoreError::custom(anyhow::anyhow!(
                "unknown scene status '{other}'"
            ))),
        }
    }
}

impl TerminalStatus {
    /// Returns the integer code stored in the database.
    pub fn code(&self) -> i64 {
        match self {
            TerminalStatus::Preparing => -2,
            TerminalStatus::Prepared => -1,
            TerminalStatus::Deleted => 0,
            TerminalStatus::Creating => 1,
            TerminalStatus::Hatching => 2,
            TerminalStatus::Starting => 3,
            TerminalStatus::Deploying => 4,
            TerminalStatus::Running => 5,
            TerminalStatus::Pause => 6,
            TerminalStatus::Error => 7,
        }
    }

    /// Parses a status from its database code.
    pub fn from_code(code: i64) -> RangecoreResult<Self> {
        match code {
            -2 => Ok(TerminalStatus::Preparing),
            -1 => Ok(TerminalStatus::Prepared),
            0 => Ok(TerminalStatus::Deleted),
            1 => Ok(TerminalStatus::Creating),
            2 => Ok(TerminalStatus::Hatching),
            3 => Ok(TerminalStatus::Starting),
            4 => Ok(TerminalStatus::Deploying),
            5 => Ok(TerminalStatus::Running),
            6 => Ok(TerminalStatus::Pause),
            7 => Ok(TerminalStatus::Error),
            other => Err(RangecoreError::custom(anyhow::anyhow!(
                "unknown terminal status code {other}"
            ))),
        }
    }

    /// The rank used for monotonic progress comparison. `Running` and
    /// `Pause` share a rank.
    pub fn rank(&self) -> i64 {
        match self {
            TerminalStatus::Pause => 5,
            other => other.code(),
        }
    }

    /// Returns true if the terminal is fully provisioned and operable.
    pub fn is_using(&self) -> bool {
        matches!(self, TerminalStatus::Running | TerminalStatus::Pause)
    }

    /// Returns true for states reported during normal provisioning progress.
    pub fn is_process(&self) -> bool {
        (1..=6).contains(&self.code())
    }
}

impl Scene {
    /// Returns the parsed status of the scene.
    pub fn status(&self) -> RangecoreResult<SceneStatus> {
        SceneStatus::parse(&self.status)
    }
}

impl SceneNet {
    /// Returns the DNS server list.
    pub fn dns(&self) -> RangecoreResult<Vec<String>> {
        Ok(serde_json::from_str(&self.dns_json)?)
    }

    /// Returns the physical interface list for vlan-backed nets.
    pub fn interfaces(&self) -> RangecoreResult<Vec<String>> {
        Ok(serde_json::from_str(&self.interfaces_json)?)
    }
}

impl SceneGateway {
    /// Returns the sub_ids of the nets this gateway connects.
    pub fn net_sub_ids(&self) -> RangecoreResult<Vec<String>> {
        Ok(serde_json::from_str(&self.net_sub_ids_json)?)
    }
}

impl SceneTerminal {
    /// Returns the parsed status of the terminal.
    pub fn status(&self) -> RangecoreResult<TerminalStatus> {
        TerminalStatus::from_code(self.status)
    }

    /// Returns the per-network IP assignment list.
    pub fn net_configs(&self) -> RangecoreResult<Vec<NetConfig>> {
        Ok(serde_json::from_str(&self.net_configs_json)?)
    }

    /// Returns the QoS policy handles applied to the terminal.
    pub fn policies(&self) -> RangecoreResult<Vec<String>> {
        Ok(serde_json::from_str(&self.policies_json)?)
    }

    /// Returns the host-level proxy port mappings.
    pub fn host_proxy_ports(&self) -> RangecoreResult<Vec<(u16, u16)>> {
        Ok(serde_json::from_str(&self.host_proxy_ports_json)?)
    }

    /// Returns the volume ids pending attachment.
    pub fn volumes(&self) -> RangecoreResult<Vec<String>> {
        Ok(serde_json::from_str(&self.volumes_json)?)
    }

    /// Returns the remote-protocol ports proxied at the host.
    pub fn remote_ports(&self) -> RangecoreResult<Vec<u16>> {
        Ok(serde_json::from_str(&self.remote_ports_json)?)
    }

    /// Returns true if the terminal is backed by a physical device.
    pub fn is_real(&self) -> bool {
        self.kind == "real"
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_codes_round_trip() {
        for status in [
            TerminalStatus::Preparing,
            TerminalStatus::Prepared,
            TerminalStatus::Deleted,
            TerminalStatus::Creating,
            TerminalStatus::Hatching,
            TerminalStatus::Starting,
            TerminalStatus::Deploying,
            TerminalStatus::Running,
            TerminalStatus::Pause,
            TerminalStatus::Error,
        ] {
            assert_eq!(
                TerminalStatus::from_code(status.code()).unwrap(),
                status
            );
        }
    }

    #[test]
    fn test_terminal_status_order_is_monotonic() {
        assert!(TerminalStatus::Preparing.rank() < TerminalStatus::Prepared.rank());
        assert!(TerminalStatus::Prepared.rank() < TerminalStatus::Deleted.rank());
        assert!(TerminalStatus::Deleted.rank() < TerminalStatus::Creating.rank());
        assert!(TerminalStatus::Creating.rank() < TerminalStatus::Hatching.rank());
        assert!(TerminalStatus::Hatching.rank() < TerminalStatus::Starting.rank());
        assert!(TerminalStatus::Starting.rank() < TerminalStatus::Deploying.rank());
        assert!(TerminalStatus::Deploying.rank() < TerminalStatus::Running.rank());
    }

    #[test]
    fn test_running_and_pause_share_a_rank() {
        assert_eq!(
            TerminalStatus::Running.rank(),
            TerminalStatus::Pause.rank()
        );
        assert!(TerminalStatus::Running.is_using());
        assert!(TerminalStatus::Pause.is_using());
        assert!(!TerminalStatus::Deploying.is_using());
    }

    #[test]
    fn test_scene_status_round_trip() {
        for status in [
            SceneStatus::Creating,
            SceneStatus::Running,
            SceneStatus::Pause,
            SceneStatus::Error,
            SceneStatus::Deleted,
        ] {
            assert_eq!(SceneStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SceneStatus::parse("bogus").is_err());
    }
}
