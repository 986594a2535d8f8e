//! Preallocation of scarce shared addressing resources.
//!
//! Floating IPs and external ports come from pools shared across scenes, so
//! concurrent scene creations serialize on one named lock around the
//! read-reserve-write sequence. Fixed IPs are scene-private and sampled
//! without touching the provider.

use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
    sync::Arc,
    time::Duration,
};

use ipnetwork::Ipv4Network;
use tokio::sync::Mutex;

use crate::{
    config::PREALLOCATE_LOCK_NAME,
    provider::CloudProvider,
    RangecoreError, RangecoreResult,
};

use super::{cidr::sample_free_ips, NamedLocks};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The exact addressing demand of one scene, computed from terminal ip-type
/// classification before any cloud mutation.
#[derive(Debug, Clone, Default)]
pub struct ReservationDemand {
    /// The number of floating IPs to claim from the shared pool.
    pub float_count: usize,

    /// The number of ports to reserve on the external network.
    pub external_port_count: usize,

    /// Per-network fixed-IP demand.
    pub fixed: Vec<FixedDemand>,
}

/// Fixed-IP demand for one scene network.
#[derive(Debug, Clone)]
pub struct FixedDemand {
    /// The sub_id of the network.
    pub net_sub_id: String,

    /// The network's CIDR.
    pub cidr: Ipv4Network,

    /// Addresses excluded from the free pool: the gateway and every
    /// declared static IP.
    pub reserved: HashSet<Ipv4Addr>,

    /// The number of addresses to sample.
    pub count: usize,
}

/// The granted reservation. All-or-nothing: either every requested resource
/// is present or `reserve` failed without leaking a partial grant.
#[derive(Debug, Clone, Default)]
pub struct Reservation {
    /// Claimed floating IPs with their cloud handles, in claim order.
    pub floating: Vec<(Ipv4Addr, String)>,

    /// Reserved external ports with their cloud handles.
    pub external_ports: Vec<(Ipv4Addr, String)>,

    /// Sampled fixed IPs per network sub_id, in assignment order.
    pub fixed: HashMap<String, Vec<Ipv4Addr>>,
}

/// Reserves floating IPs, external ports and fixed IPs for scenes.
#[derive(Debug)]
pub struct Preallocator {
    locks: Arc<NamedLocks>,
    fip_cache: Mutex<Vec<Ipv4Addr>>,
    external_cloud_net_id: String,
    lock_attempts: u32,
    lock_backoff: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Preallocator {
    /// Creates a preallocator sharing the given lock registry.
    pub fn new(
        locks: Arc<NamedLocks>,
        external_cloud_net_id: impl AsRef<str>,
        lock_attempts: u32,
        lock_backoff: Duration,
    ) -> Self {
        Self {
            locks,
            fip_cache: Mutex::new(Vec::new()),
            external_cloud_net_id: external_cloud_net_id.as_ref().to_string(),
            lock_attempts,
            lock_backoff,
        }
    }

    /// Reserves everything `demand` asks for, or fails without granting
    /// anything.
    ///
    /// Fixed IPs are sampled first: a short free pool aborts before any
    /// provider call. Floating IPs and external ports are then claimed under
    /// the named pool lock; a failure after floating IPs were claimed
    /// releases them before returning.
    pub async fn reserve(
        &self,
        provider: &dyn CloudProvider,
        demand: &ReservationDemand,
    ) -> RangecoreResult<Reservation> {
        let mut reservation = Reservation::default();

        for fixed in &demand.fixed {
            let sampled = sample_free_ips(fixed.cidr, &fixed.reserved, fixed.count)?;
            reservation
                .fixed
                .insert(fixed.net_sub_id.clone(), sampled);
        }

        if demand.float_count == 0 && demand.external_port_count == 0 {
            return Ok(reservation);
        }

        // The named lock serializes every scene's read-reserve-write against
        // the shared pools. Held across the provider calls below.
        let _guard = self
            .locks
            .acquire(PREALLOCATE_LOCK_NAME, self.lock_attempts, self.lock_backoff)
            .await?;

        if demand.float_count > 0 {
            reservation.floating = self.claim_fips(provider, demand.float_count).await?;
        }

        if demand.external_port_count > 0 {
            match provider
                .preallocate_ports(&self.external_cloud_net_id, demand.external_port_count)
                .await
            {
                Ok(ports) => reservation.external_ports = ports,
                Err(error) => {
                    self.release_fips(provider, &reservation.floating).await;
                    return Err(error.into());
                }
            }
        }

        Ok(reservation)
    }

    /// Claims `count` floating IPs from the shared pool.
    ///
    /// The local cache is only an optimization: whenever it cannot satisfy
    /// the request it is rebuilt from the provider's snapshot while the lock
    /// is held, and claims pop from that snapshot.
    async fn claim_fips(
        &self,
        provider: &dyn CloudProvider,
        count: usize,
    ) -> RangecoreResult<Vec<(Ipv4Addr, String)>> {
        let mut cache = self.fip_cache.lock().await;

        if cache.len() < count {
            *cache = provider.list_available_fips().await?;
        }

        if cache.len() < count {
            return Err(RangecoreError::Reservation(format!(
                "floating ip pool has {} available, {count} needed",
                cache.len()
            )));
        }

        let split_at = cache.len() - count;
        let ips: Vec<Ipv4Addr> = cache.split_off(split_at);

        match provider.preallocate_fips(&ips).await {
            Ok(mut claimed) => {
                let mut floating = Vec::with_capacity(ips.len());
                for ip in ips {
                    let fip_id = claimed.remove(&ip).ok_or_else(|| {
                        RangecoreError::Reservation(format!(
                            "provider did not claim requested floating ip {ip}"
                        ))
                    })?;
                    floating.push((ip, fip_id));
                }
                Ok(floating)
            }
            Err(error) => {
                // Nothing was claimed; the addresses go back to the cache.
                cache.extend(ips);
                Err(error.into())
            }
        }
    }

    /// Releases claimed floating IPs, swallowing individual failures.
    async fn release_fips(&self, provider: &dyn CloudProvider, floating: &[(Ipv4Addr, String)]) {
        for (ip, fip_id) in floating {
            if let Err(error) = provider.release_fip(fip_id).await {
                if !error.is_not_found() {
                    tracing::error!("failed to release floating ip {ip} ({fip_id}): {error}");
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockCloud;

    fn pool(count: u8) -> Vec<Ipv4Addr> {
        (1..=count).map(|i| Ipv4Addr::new(198, 51, 100, i)).collect()
    }

    fn preallocator() -> Preallocator {
        Preallocator::new(
            Arc::new(NamedLocks::new()),
            "ext-net-1",
            2,
            Duration::from_millis(1),
        )
    }

    fn demand(float_count: usize, external_port_count: usize) -> ReservationDemand {
        ReservationDemand {
            float_count,
            external_port_count,
            fixed: vec![FixedDemand {
                net_sub_id: "net1".to_string(),
                cidr: "192.168.1.0/24".parse().unwrap(),
                reserved: HashSet::new(),
                count: 2,
            }],
        }
    }

    #[tokio::test]
    async fn test_reserve_grants_exact_counts() -> RangecoreResult<()> {
        let cloud = MockCloud::with_fip_pool(pool(5));
        let prealloc = preallocator();

        let reservation = prealloc.reserve(&cloud, &demand(2, 1)).await?;

        assert_eq!(reservation.floating.len(), 2);
        assert_eq!(reservation.external_ports.len(), 1);
        assert_eq!(reservation.fixed["net1"].len(), 2);
        assert_eq!(cloud.available_fip_count(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_fip_shortfall_leaves_pool_unchanged() -> RangecoreResult<()> {
        let cloud = MockCloud::with_fip_pool(pool(1));
        let prealloc = preallocator();

        let result = prealloc.reserve(&cloud, &demand(3, 0)).await;

        assert!(matches!(result, Err(RangecoreError::Reservation(_))));
        assert_eq!(cloud.available_fip_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_shortfall_aborts_before_any_provider_call() -> RangecoreResult<()> {
        let cloud = MockCloud::with_fip_pool(pool(5));
        let prealloc = preallocator();

        let mut short = demand(2, 0);
        short.fixed[0].cidr = "10.0.0.0/30".parse().unwrap();
        short.fixed[0].count = 5;

        let result = prealloc.reserve(&cloud, &short).await;

        assert!(matches!(result, Err(RangecoreError::Reservation(_))));
        assert!(cloud.calls().is_empty(), "no provider call expected");
        assert_eq!(cloud.available_fip_count(), 5);

        Ok(())
    }

    #[tokio::test]
    async fn test_port_failure_releases_claimed_fips() -> RangecoreResult<()> {
        let cloud = MockCloud::with_fip_pool(pool(4));
        let prealloc = preallocator();
        cloud.fail_once("preallocate_ports");

        let result = prealloc.reserve(&cloud, &demand(2, 1)).await;

        assert!(result.is_err());
        assert_eq!(
            cloud.available_fip_count(),
            4,
            "claimed floating ips must be released on failure"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_contends_on_the_named_lock() -> RangecoreResult<()> {
        let locks = Arc::new(NamedLocks::new());
        let prealloc = Preallocator::new(locks.clone(), "ext-net-1", 2, Duration::from_millis(1));
        let cloud = MockCloud::with_fip_pool(pool(4));

        let _held = locks
            .acquire(PREALLOCATE_LOCK_NAME, 1, Duration::from_millis(1))
            .await?;

        let result = prealloc.reserve(&cloud, &demand(1, 0)).await;
        assert!(matches!(
            result,
            Err(RangecoreError::LockTimeout { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cache_refresh_uses_provider_snapshot() -> RangecoreResult<()> {
        let cloud = MockCloud::with_fip_pool(pool(3));
        let prealloc = preallocator();

        // First reservation fills the cache from the provider snapshot and
        // claims two of three addresses.
        prealloc.reserve(&cloud, &demand(2, 0)).await?;
        // The cache holds one leftover address; asking for two forces a
        // refresh, and the refreshed snapshot still cannot satisfy the
        // request.
        let result = prealloc.reserve(&cloud, &demand(2, 0)).await;

        assert!(matches!(result, Err(RangecoreError::Reservation(_))));
        let refreshes = cloud
            .calls()
            .iter()
            .filter(|op| op.as_str() == "list_available_fips")
            .count();
        assert_eq!(refreshes, 2);
        assert_eq!(cloud.available_fip_count(), 1);

        Ok(())
    }
}
