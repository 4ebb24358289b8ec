//! /24 subnet allocation inside a network block
//!
//! Candidates vary the third octet of the network address. Anything outside
//! the block or overlapping a known subnet is dropped up front; the provider
//! still has the final say, and a conflict there moves on to the next
//! candidate. Two callers searching at once can pick the same block, in
//! which case one of them sees the conflict and retries.

use anyhow::{Context, Result};
use egress_common::defaults::DEFAULT_SUBNET_PREFIX;
use egress_common::model::Subnet;
use egress_common::{Ec2Api, classify_anyhow_error};
use ipnetwork::Ipv4Network;
use rand::Rng;
use rand::seq::SliceRandom;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn within(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    outer.contains(inner.network()) && outer.contains(inner.broadcast())
}

/// Shuffled /24 candidates inside `network_cidr` that avoid `existing`.
///
/// Unparseable existing CIDRs are ignored; an unparseable network CIDR is
/// an error.
pub fn candidate_subnets<R: Rng + ?Sized>(
    network_cidr: &str,
    existing: &[String],
    max_attempts: usize,
    rng: &mut R,
) -> Result<Vec<Ipv4Network>> {
    let network: Ipv4Network = network_cidr
        .parse()
        .with_context(|| format!("Invalid network CIDR: {network_cidr}"))?;
    let taken: Vec<Ipv4Network> = existing.iter().filter_map(|c| c.parse().ok()).collect();
    let [a, b, _, _] = network.network().octets();

    let mut candidates: Vec<Ipv4Network> = (0..=255u8)
        .filter_map(|x| Ipv4Network::new(Ipv4Addr::new(a, b, x, 0), DEFAULT_SUBNET_PREFIX).ok())
        .filter(|c| within(&network, c))
        .filter(|c| !taken.iter().any(|t| overlaps(t, c)))
        .collect();

    candidates.shuffle(rng);
    candidates.truncate(max_attempts);
    debug!(network = %network, available = candidates.len(), "Computed subnet candidates");
    Ok(candidates)
}

/// Create a subnet from the first candidate the provider accepts.
pub async fn allocate_subnet<E: Ec2Api>(
    ec2: &E,
    network_id: &str,
    name: &str,
    candidates: &[Ipv4Network],
) -> Result<Subnet> {
    for (attempt, cidr) in candidates.iter().enumerate() {
        let cidr = cidr.to_string();
        match ec2.create_subnet(network_id, &cidr, name).await {
            Ok(subnet) => {
                info!(subnet_id = %subnet.id, cidr = %cidr, attempt = attempt + 1, "Allocated subnet");
                return Ok(subnet);
            }
            Err(e) if classify_anyhow_error(&e).is_cidr_conflict() => {
                warn!(cidr = %cidr, "Subnet CIDR conflict, trying next candidate");
            }
            Err(e) => return Err(e.context(format!("Subnet allocation aborted at {cidr}"))),
        }
    }

    anyhow::bail!(
        "No free /{} block found in network {} after {} attempts",
        DEFAULT_SUBNET_PREFIX,
        network_id,
        candidates.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn candidates_avoid_existing_subnets() {
        let existing: Vec<String> = (0..40).map(|x| format!("10.0.{x}.0/24")).collect();
        let candidates = candidate_subnets("10.0.0.0/16", &existing, 256, &mut rng()).unwrap();

        assert_eq!(candidates.len(), 256 - 40);
        for c in &candidates {
            assert!(c.network().octets()[2] >= 40, "{c} collides with an existing subnet");
            assert_eq!(c.prefix(), 24);
        }
    }

    #[test]
    fn larger_existing_blocks_are_respected() {
        let existing = vec!["10.0.0.0/20".to_string()];
        let candidates = candidate_subnets("10.0.0.0/16", &existing, 256, &mut rng()).unwrap();
        assert!(candidates.iter().all(|c| c.network().octets()[2] >= 16));
    }

    #[test]
    fn candidates_stay_inside_small_networks() {
        let candidates = candidate_subnets("172.31.16.0/20", &[], 256, &mut rng()).unwrap();
        assert_eq!(candidates.len(), 16);
        let network: Ipv4Network = "172.31.16.0/20".parse().unwrap();
        assert!(candidates.iter().all(|c| within(&network, c)));
    }

    #[test]
    fn attempts_are_capped() {
        let candidates = candidate_subnets("10.0.0.0/16", &[], 50, &mut rng()).unwrap();
        assert_eq!(candidates.len(), 50);
    }

    #[test]
    fn invalid_network_cidr_is_an_error() {
        assert!(candidate_subnets("not-a-cidr", &[], 50, &mut rng()).is_err());
    }

    #[test]
    fn full_network_yields_no_candidates() {
        let existing = vec!["10.0.0.0/16".to_string()];
        let candidates = candidate_subnets("10.0.0.0/16", &existing, 50, &mut rng()).unwrap();
        assert!(candidates.is_empty());
    }
}
