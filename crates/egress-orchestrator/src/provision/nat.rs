//! Managed NAT gateway egress

use crate::wait::{WaitConfig, wait_for_resource};
use anyhow::{Context, Result};
use egress_common::model::{NatGateway, NatGatewayState};
use egress_common::{Ec2Api, classify_anyhow_error};
use tracing::{debug, info, instrument, warn};

/// A NAT gateway and the floating IP it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatEgress {
    pub nat_gateway_id: String,
    pub allocation_id: Option<String>,
    pub public_ip: Option<String>,
    /// Reused rather than created by this call
    pub reused: bool,
    /// Non-fatal problems, e.g. tags that could not be applied
    pub notes: Vec<String>,
}

/// Find the live NAT gateway tagged `name` in the subnet, or create one
/// with a fresh floating IP. Does not wait for it to become available.
///
/// A new gateway is tagged straight away so a later call finds it even if
/// this one never sees it become available. The floating IP is released
/// again when creation fails.
#[instrument(skip(ec2))]
pub async fn ensure_nat_gateway<E: Ec2Api>(ec2: &E, name: &str, subnet_id: &str) -> Result<NatEgress> {
    let live = ec2
        .nat_gateways_by_name(name, subnet_id)
        .await
        .context("Failed to look up NAT gateways")?
        .into_iter()
        .find(|n| n.state.is_live());

    if let Some(nat) = live {
        info!(nat_gateway_id = %nat.id, state = ?nat.state, "Reusing NAT gateway");
        return Ok(NatEgress {
            nat_gateway_id: nat.id,
            allocation_id: nat.allocation_id,
            public_ip: nat.public_ip,
            reused: true,
            notes: Vec::new(),
        });
    }

    let mut notes = Vec::new();
    let address = ec2
        .allocate_address(None)
        .await
        .context("Failed to allocate floating IP for NAT gateway")?;
    if let Err(e) = ec2.set_name_tag(&address.allocation_id, name).await {
        warn!(allocation_id = %address.allocation_id, error = %e, "Failed to tag NAT floating IP");
        notes.push(format!("Floating IP {} left untagged: {e}", address.allocation_id));
    }

    let created = match ec2.create_nat_gateway(subnet_id, &address.allocation_id).await {
        Ok(nat) => nat,
        Err(e) => {
            // An existing association means the address is still wanted
            if !classify_anyhow_error(&e).is_already_exists() {
                release_quietly(ec2, &address.allocation_id).await;
            }
            return Err(e.context("Failed to create NAT gateway"));
        }
    };
    info!(nat_gateway_id = %created.id, allocation_id = %address.allocation_id, "Created NAT gateway");

    if let Err(e) = ec2.set_name_tag(&created.id, name).await {
        warn!(nat_gateway_id = %created.id, error = %e, "Failed to tag NAT gateway");
        notes.push(format!("NAT gateway {} left untagged: {e}", created.id));
    }

    Ok(NatEgress {
        nat_gateway_id: created.id,
        allocation_id: Some(address.allocation_id),
        public_ip: Some(address.public_ip),
        reused: false,
        notes,
    })
}

/// Wait until the gateway is available and fill in its address.
///
/// A gateway created by this call that ends up failed gives its floating
/// IP back.
#[instrument(skip(ec2, nat, wait), fields(nat_gateway_id = %nat.nat_gateway_id))]
pub async fn wait_for_nat_gateway<E: Ec2Api>(ec2: &E, nat: NatEgress, wait: WaitConfig) -> Result<NatEgress> {
    match wait_for_available(ec2, &nat.nat_gateway_id, wait).await {
        Ok(ready) => {
            let mut nat = nat;
            nat.allocation_id = ready.allocation_id.or(nat.allocation_id);
            nat.public_ip = ready.public_ip.or(nat.public_ip);
            Ok(nat)
        }
        Err(e) => {
            if let (false, Some(allocation_id)) = (nat.reused, &nat.allocation_id) {
                if matches!(
                    ec2.nat_gateway(&nat.nat_gateway_id).await,
                    Ok(Some(NatGateway { state: NatGatewayState::Failed, .. }))
                ) {
                    release_quietly(ec2, allocation_id).await;
                }
            }
            Err(e)
        }
    }
}

async fn wait_for_available<E: Ec2Api>(ec2: &E, nat_id: &str, wait: WaitConfig) -> Result<NatGateway> {
    wait_for_resource(
        wait,
        None,
        move || async move {
            // DescribeNatGateways can lag behind CreateNatGateway
            let Some(nat) = ec2.nat_gateway(nat_id).await? else {
                debug!(nat_gateway_id = %nat_id, "NAT gateway not visible yet");
                return Ok(None);
            };
            match nat.state {
                NatGatewayState::Available => Ok(Some(nat)),
                NatGatewayState::Pending => Ok(None),
                NatGatewayState::Failed => anyhow::bail!(
                    "NAT gateway {} failed: {}",
                    nat_id,
                    nat.failure_message.as_deref().unwrap_or("no reason given")
                ),
                state => anyhow::bail!("NAT gateway {} entered unexpected state: {:?}", nat_id, state),
            }
        },
        &format!("NAT gateway {nat_id} available"),
    )
    .await
}

async fn release_quietly<E: Ec2Api>(ec2: &E, allocation_id: &str) {
    match ec2.release_address(allocation_id).await {
        Ok(()) => info!(allocation_id = %allocation_id, "Released unused floating IP"),
        Err(e) => warn!(allocation_id = %allocation_id, error = %e, "Failed to release floating IP"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitSettings;
    use egress_common::AwsError;
    use egress_test_utils::FakeEc2;
    use std::time::Duration;

    fn setup() -> (FakeEc2, String) {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let subnet = fake.add_subnet(&vpc, "10.0.9.0/24", Some("acme"));
        (fake, subnet)
    }

    async fn upsert(fake: &FakeEc2, subnet: &str, wait: WaitConfig) -> Result<NatEgress> {
        let nat = ensure_nat_gateway(fake, "acme", subnet).await?;
        wait_for_nat_gateway(fake, nat, wait).await
    }

    #[tokio::test]
    async fn creates_and_waits_for_available() {
        let (fake, subnet) = setup();

        let nat = upsert(&fake, &subnet, WaitSettings::immediate().nat_gateway)
            .await
            .unwrap();

        assert!(!nat.reused);
        assert!(nat.notes.is_empty());
        let gateways = fake.all_nat_gateways();
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].state, NatGatewayState::Available);
        assert_eq!(gateways[0].name.as_deref(), Some("acme"));

        let addresses = fake.all_addresses();
        assert_eq!(nat.allocation_id.as_deref(), Some(addresses[0].allocation_id.as_str()));
        assert_eq!(nat.public_ip.as_deref(), Some(addresses[0].public_ip.as_str()));
        assert_eq!(addresses[0].name.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn live_gateway_is_reused() {
        let (fake, subnet) = setup();
        let wait = WaitSettings::immediate().nat_gateway;

        let first = upsert(&fake, &subnet, wait).await.unwrap();
        let second = upsert(&fake, &subnet, wait).await.unwrap();

        assert!(second.reused);
        assert_eq!(second.nat_gateway_id, first.nat_gateway_id);
        assert_eq!(fake.all_nat_gateways().len(), 1);
        assert_eq!(fake.calls("allocate_address"), 1);
    }

    #[tokio::test]
    async fn gateway_missing_from_describe_is_waited_for() {
        let (fake, subnet) = setup();
        fake.set_describe_lag(3);

        let nat = upsert(&fake, &subnet, WaitSettings::immediate().nat_gateway)
            .await
            .unwrap();

        assert_eq!(fake.all_nat_gateways()[0].state, NatGatewayState::Available);
        assert!(nat.public_ip.is_some());
    }

    #[tokio::test]
    async fn gateway_is_tagged_before_the_wait() {
        let (fake, subnet) = setup();
        fake.set_nat_polls(u32::MAX);
        let wait = WaitConfig {
            timeout: Duration::from_millis(20),
            ..WaitSettings::immediate().nat_gateway
        };

        let pending = ensure_nat_gateway(&fake, "acme", &subnet).await.unwrap();
        assert!(wait_for_nat_gateway(&fake, pending.clone(), wait).await.is_err());
        assert_eq!(fake.all_nat_gateways()[0].name.as_deref(), Some("acme"));
        assert_eq!(fake.all_addresses().len(), 1);

        let again = ensure_nat_gateway(&fake, "acme", &subnet).await.unwrap();
        assert!(again.reused);
        assert_eq!(again.nat_gateway_id, pending.nat_gateway_id);
        assert_eq!(again.allocation_id, pending.allocation_id);
        assert_eq!(fake.calls("create_nat_gateway"), 1);
    }

    #[tokio::test]
    async fn failed_gateway_releases_its_address() {
        let (fake, subnet) = setup();
        fake.fail_nat_gateways("Subnet has insufficient free addresses");

        let err = upsert(&fake, &subnet, WaitSettings::immediate().nat_gateway)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("insufficient free addresses"));
        assert!(fake.all_addresses().is_empty());
    }

    #[tokio::test]
    async fn create_failure_releases_the_address() {
        let (fake, subnet) = setup();
        fake.fail_on(
            "create_nat_gateway",
            AwsError::Sdk {
                code: Some("NatGatewayLimitExceeded".to_string()),
                message: "limit".to_string(),
            },
        );

        let result = upsert(&fake, &subnet, WaitSettings::immediate().nat_gateway).await;

        assert!(result.is_err());
        assert!(fake.all_addresses().is_empty());
        assert!(fake.all_nat_gateways().is_empty());
    }

    #[tokio::test]
    async fn tag_failures_become_notes() {
        let (fake, subnet) = setup();
        fake.fail_on("set_name_tag", AwsError::Throttled);

        let nat = upsert(&fake, &subnet, WaitSettings::immediate().nat_gateway)
            .await
            .unwrap();

        assert_eq!(nat.notes.len(), 1);
        assert!(nat.notes[0].contains("left untagged"));
    }
}
