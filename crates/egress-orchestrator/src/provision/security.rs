//! Security policy upsert with additive rule reconciliation

use super::locator::{Located, reuse_or_create};
use anyhow::{Context, Result};
use egress_common::model::{IngressRule, SecurityGroup};
use egress_common::{Ec2Api, ResourceKind, ignore_already_exists};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub group: Located<SecurityGroup>,
    /// Rules that were not present before this call
    pub rules_added: usize,
}

/// Find or create the group `group_name` in the network and make sure every
/// rule in `rules` is authorized.
///
/// Rules are only ever added. Extra rules already on the group are left in
/// place, and duplicates count as success. Allow-all egress is authorized
/// on first creation only.
#[instrument(skip(ec2, rules), fields(rules = rules.len()))]
pub async fn upsert_security_policy<E: Ec2Api>(
    ec2: &E,
    network_id: &str,
    group_name: &str,
    rules: &[IngressRule],
) -> Result<SecurityPolicy> {
    let existing = ec2
        .security_groups_by_name(group_name, network_id)
        .await
        .context("Failed to look up security group")?;

    let description = format!("Regional egress security group for {group_name}");
    let group = reuse_or_create(ec2, ResourceKind::SecurityGroup, group_name, existing, || {
        ec2.create_security_group(group_name, &description, network_id)
    })
    .await
    .context("Failed to create security group")?;

    let sg_id = group.resource.id.clone();
    let mut rules_added = 0;
    for rule in rules {
        let added = ignore_already_exists(ec2.authorize_ingress(&sg_id, rule).await)
            .with_context(|| format!("Failed to authorize ingress {rule} on {sg_id}"))?;
        if added {
            rules_added += 1;
        } else {
            debug!(sg_id = %sg_id, rule = %rule, "Ingress rule already present");
        }
    }

    if group.created() {
        ignore_already_exists(ec2.authorize_egress_all(&sg_id).await)
            .with_context(|| format!("Failed to authorize egress on {sg_id}"))?;
    }

    info!(sg_id = %sg_id, origin = ?group.origin, rules_added, "Security policy reconciled");
    Ok(SecurityPolicy { group, rules_added })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use egress_test_utils::FakeEc2;

    #[tokio::test]
    async fn new_group_gets_every_rule() {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let rules = NetworkConfig::default_ingress_rules();

        let policy = upsert_security_policy(&fake, &vpc, "acme", &rules).await.unwrap();

        assert!(policy.group.created());
        assert_eq!(policy.rules_added, rules.len());
        let groups = fake.all_security_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ingress, rules);
        assert!(fake.egress_open(&groups[0].id));
    }

    #[tokio::test]
    async fn repeated_upsert_adds_nothing() {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let rules = NetworkConfig::default_ingress_rules();

        let first = upsert_security_policy(&fake, &vpc, "acme", &rules).await.unwrap();
        let second = upsert_security_policy(&fake, &vpc, "acme", &rules).await.unwrap();

        assert!(!second.group.created());
        assert_eq!(second.group.resource.id, first.group.resource.id);
        assert_eq!(second.rules_added, 0);
        assert_eq!(fake.all_security_groups()[0].ingress.len(), rules.len());
        assert_eq!(fake.calls("authorize_egress_all"), 1);
    }

    #[tokio::test]
    async fn missing_rules_are_added_and_extras_kept() {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let custom = IngressRule::tcp(8080, "192.0.2.0/24");
        upsert_security_policy(&fake, &vpc, "acme", &[custom.clone(), IngressRule::tcp(22, "0.0.0.0/0")])
            .await
            .unwrap();

        let rules = NetworkConfig::default_ingress_rules();
        let policy = upsert_security_policy(&fake, &vpc, "acme", &rules).await.unwrap();

        assert_eq!(policy.rules_added, rules.len() - 1);
        let ingress = &fake.all_security_groups()[0].ingress;
        assert!(ingress.contains(&custom));
        assert!(rules.iter().all(|r| ingress.contains(r)));
    }

    #[tokio::test]
    async fn rule_order_does_not_change_the_result() {
        let rules = NetworkConfig::default_ingress_rules();
        let mut reversed = rules.clone();
        reversed.reverse();
        let subset: Vec<_> = rules.iter().step_by(2).cloned().collect();

        let mut finals = Vec::new();
        for passes in [vec![rules.clone()], vec![reversed.clone()], vec![subset, reversed]] {
            let fake = FakeEc2::with_default_network("10.0.0.0/16");
            let vpc = fake.default_network_id().unwrap();
            for pass in &passes {
                upsert_security_policy(&fake, &vpc, "acme", pass).await.unwrap();
            }
            finals.push(fake.all_security_groups()[0].ingress.clone());
        }

        for ingress in &finals {
            assert_eq!(ingress.len(), rules.len());
            assert!(rules.iter().all(|r| ingress.contains(r)));
        }
    }
}
