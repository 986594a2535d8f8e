//! CIDR assignment and free-address sampling.

use std::{collections::HashSet, net::Ipv4Addr};

use ipnetwork::Ipv4Network;
use rand::seq::SliceRandom;

use crate::{RangecoreError, RangecoreResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks a random CIDR from the configured segment pool that does not overlap
/// any already-taken CIDR.
pub fn random_cidr(
    segments: &[Ipv4Network],
    taken: &HashSet<Ipv4Network>,
) -> RangecoreResult<Ipv4Network> {
    let candidates: Vec<Ipv4Network> = segments
        .iter()
        .filter(|segment| !taken.iter().any(|used| segment.overlaps(*used)))
        .copied()
        .collect();

    candidates
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| {
            RangecoreError::Reservation(format!(
                "subnet segment pool exhausted: {} segments, {} taken",
                segments.len(),
                taken.len()
            ))
        })
}

/// Samples `count` distinct free addresses from a CIDR.
///
/// The free pool is every host address in the range minus the network and
/// broadcast addresses and minus `reserved` (declared static IPs, the gateway
/// address, addresses claimed earlier in the same batch). Sampling is without
/// replacement; a pool smaller than `count` fails the whole request.
pub fn sample_free_ips(
    cidr: Ipv4Network,
    reserved: &HashSet<Ipv4Addr>,
    count: usize,
) -> RangecoreResult<Vec<Ipv4Addr>> {
    let network = cidr.network();
    let broadcast = cidr.broadcast();
    let free: Vec<Ipv4Addr> = cidr
        .iter()
        .filter(|ip| *ip != network && *ip != broadcast && !reserved.contains(ip))
        .collect();

    if free.len() < count {
        return Err(RangecoreError::Reservation(format!(
            "network {cidr} has {} free addresses, {count} needed",
            free.len()
        )));
    }

    Ok(free
        .choose_multiple(&mut rand::thread_rng(), count)
        .copied()
        .collect())
}

/// Returns the conventional gateway address of a CIDR: its first host.
pub fn first_host(cidr: Ipv4Network) -> Ipv4Addr {
    let network = u32::from(cidr.network());
    Ipv4Addr::from(network + 1)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(text: &str) -> Ipv4Network {
        text.parse().unwrap()
    }

    #[test]
    fn test_random_cidr_avoids_taken_segments() -> RangecoreResult<()> {
        let segments = vec![cidr("10.77.0.0/24"), cidr("10.77.1.0/24")];
        let taken: HashSet<Ipv4Network> = [cidr("10.77.0.0/24")].into_iter().collect();

        for _ in 0..20 {
            assert_eq!(random_cidr(&segments, &taken)?, cidr("10.77.1.0/24"));
        }

        Ok(())
    }

    #[test]
    fn test_random_cidr_detects_overlap_with_fixed_nets() {
        // A declared /16 covers every pool segment inside it.
        let segments = vec![cidr("10.77.0.0/24")];
        let taken: HashSet<Ipv4Network> = [cidr("10.77.0.0/16")].into_iter().collect();

        assert!(matches!(
            random_cidr(&segments, &taken),
            Err(RangecoreError::Reservation(_))
        ));
    }

    #[test]
    fn test_sample_free_ips_without_replacement() -> RangecoreResult<()> {
        let reserved: HashSet<Ipv4Addr> = ["192.168.1.1".parse().unwrap()].into_iter().collect();
        let sampled = sample_free_ips(cidr("192.168.1.0/24"), &reserved, 50)?;

        assert_eq!(sampled.len(), 50);
        let unique: HashSet<_> = sampled.iter().collect();
        assert_eq!(unique.len(), 50, "sampled addresses must be distinct");
        for ip in &sampled {
            assert!(!reserved.contains(ip));
            assert_ne!(*ip, "192.168.1.0".parse::<Ipv4Addr>().unwrap());
            assert_ne!(*ip, "192.168.1.255".parse::<Ipv4Addr>().unwrap());
        }

        Ok(())
    }

    #[test]
    fn test_sample_free_ips_rejects_short_pool() {
        // A /30 has two usable hosts.
        let result = sample_free_ips(cidr("10.0.0.0/30"), &HashSet::new(), 3);
        assert!(matches!(result, Err(RangecoreError::Reservation(_))));
    }

    #[test]
    fn test_first_host() {
        assert_eq!(
            first_host(cidr("192.168.10.0/24")),
            "192.168.10.1".parse::<Ipv4Addr>().unwrap()
        );
    }
}
