use std::{sync::LazyLock, time::Duration};

use ipnetwork::Ipv4Network;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The fixed group name prefixed to every cloud resource display name.
pub const RESOURCE_GROUP_NAME: &str = "rangecore";

/// The default scene name prefix used when the caller supplies none.
pub const DEFAULT_SCENE_PREFIX: &str = "scene";

/// The topology-local id that denotes the external network namespace.
pub const EXTERNAL_NET_ID: &str = "internet";

/// The name of the cross-scene preallocation lock.
pub const PREALLOCATE_LOCK_NAME: &str = "rangecore.preallocate";

/// The default number of acquisition attempts for named locks.
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 20;

/// The default sleep between named lock acquisition attempts.
pub const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_millis(500);

/// The default overall budget for the terminal reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(180);

/// The default interval between reachability probe polls.
pub const DEFAULT_PROBE_STEP: Duration = Duration::from_secs(5);

/// The default number of vCPUs for a terminal flavor.
pub const DEFAULT_NUM_VCPUS: u8 = 1;

/// The default amount of RAM in MiB for a terminal flavor.
pub const DEFAULT_RAM_MIB: u32 = 1024;

/// The default disk size in GiB for a terminal flavor.
pub const DEFAULT_DISK_GIB: u32 = 20;

/// The subnet segments scenes draw random CIDRs from when a net declares none.
pub static DEFAULT_SUBNET_SEGMENTS: LazyLock<Vec<Ipv4Network>> = LazyLock::new(|| {
    (0..=255)
        .map(|third| Ipv4Network::new([10, 77, third, 0].into(), 24).unwrap())
        .collect()
});
