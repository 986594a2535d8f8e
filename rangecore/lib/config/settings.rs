//! Orchestrator settings.
//!
//! All platform-level knobs live in one explicit struct handed to the
//! [`Orchestrator`](crate::orchestration::Orchestrator) constructor. Nothing
//! in the crate reads ambient/global configuration.

use std::{net::Ipv4Addr, time::Duration};

use getset::Getters;
use ipnetwork::Ipv4Network;
use typed_builder::TypedBuilder;

use super::{
    DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF, DEFAULT_PROBE_STEP, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_SCENE_PREFIX, DEFAULT_SUBNET_SEGMENTS, EXTERNAL_NET_ID, RESOURCE_GROUP_NAME,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Platform configuration for the orchestrator.
#[derive(Debug, Clone, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OrchestratorSettings {
    /// The fixed group name prefixed to every cloud resource display name.
    #[builder(default = RESOURCE_GROUP_NAME.to_string(),
              setter(transform = |s: impl AsRef<str>| s.as_ref().to_string()))]
    pub(crate) name_group: String,

    /// The scene name prefix used when the caller supplies none.
    #[builder(default = DEFAULT_SCENE_PREFIX.to_string(),
              setter(transform = |s: impl AsRef<str>| s.as_ref().to_string()))]
    pub(crate) default_prefix: String,

    /// The topology-local id that denotes the external network namespace.
    #[builder(default = EXTERNAL_NET_ID.to_string(),
              setter(transform = |s: impl AsRef<str>| s.as_ref().to_string()))]
    pub(crate) external_net_id: String,

    /// The cloud handle of the external network, used when routers need an
    /// external gateway and when external ports are reserved.
    #[builder(setter(transform = |s: impl AsRef<str>| s.as_ref().to_string()))]
    pub(crate) external_cloud_net_id: String,

    /// The subnet segments scenes draw random CIDRs from.
    #[builder(default = DEFAULT_SUBNET_SEGMENTS.clone())]
    pub(crate) subnet_segments: Vec<Ipv4Network>,

    /// The address of the platform host that terminates host-level proxies.
    pub(crate) platform_ip: Ipv4Addr,

    /// DNS servers announced on subnets that declare none.
    #[builder(default)]
    pub(crate) dns: Vec<Ipv4Addr>,

    /// The number of acquisition attempts for the preallocation lock.
    #[builder(default = DEFAULT_LOCK_ATTEMPTS)]
    pub(crate) lock_attempts: u32,

    /// The sleep between preallocation lock acquisition attempts.
    #[builder(default = DEFAULT_LOCK_BACKOFF)]
    pub(crate) lock_backoff: Duration,

    /// The overall budget for the terminal reachability probe.
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    pub(crate) probe_timeout: Duration,

    /// The interval between reachability probe polls.
    #[builder(default = DEFAULT_PROBE_STEP)]
    pub(crate) probe_step: Duration,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = OrchestratorSettings::builder()
            .external_cloud_net_id("ext-net-1")
            .platform_ip(Ipv4Addr::new(10, 0, 0, 1))
            .build();

        assert_eq!(settings.get_name_group(), "rangecore");
        assert_eq!(settings.get_external_net_id(), "internet");
        assert_eq!(*settings.get_lock_attempts(), DEFAULT_LOCK_ATTEMPTS);
        assert_eq!(settings.get_subnet_segments().len(), 256);
    }
}
