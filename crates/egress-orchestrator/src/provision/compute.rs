//! Compute egress: image resolution, instance lookup/launch and floating IPs

use crate::wait::{WaitConfig, wait_for_resource};
use anyhow::{Context, Result};
use egress_common::model::{Address, Image, ImageQuery, Instance, InstanceState, LaunchSpec};
use egress_common::{Ec2Api, classify_anyhow_error};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Newest image matching the query, by creation date.
pub async fn resolve_image<E: Ec2Api>(ec2: &E, query: &ImageQuery) -> Result<Image> {
    let mut images = ec2.images(query).await.context("Failed to describe images")?;
    // ISO 8601 timestamps sort lexicographically
    images.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));

    let image = images
        .into_iter()
        .next()
        .with_context(|| format!("No image found matching {}", query.name_pattern))?;

    info!(ami = %image.id, name = ?image.name, "Resolved machine image");
    Ok(image)
}

/// Instances carrying the egress name, sorted by what can be done with them
#[derive(Debug, Default)]
pub struct InstanceLookup {
    pub running: Option<Instance>,
    /// Pending, stopping or stopped with the expected image
    pub recoverable: Option<Instance>,
    /// Live instances built from a different image, left untouched
    pub stale: Vec<Instance>,
}

/// Sort the live instances tagged `name` in the network. Instances on
/// another image are reported as stale and deliberately left running.
pub async fn find_instance<E: Ec2Api>(
    ec2: &E,
    name: &str,
    network_id: &str,
    image_id: &str,
) -> Result<InstanceLookup> {
    let instances = ec2
        .instances_by_name(name, network_id)
        .await
        .context("Failed to look up egress instances")?;

    let mut lookup = InstanceLookup::default();
    for instance in instances {
        if instance.state.is_gone() {
            continue;
        }
        if instance.image_id != image_id {
            lookup.stale.push(instance);
        } else if instance.state == InstanceState::Running {
            lookup.running.get_or_insert(instance);
        } else {
            lookup.recoverable.get_or_insert(instance);
        }
    }
    Ok(lookup)
}

async fn wait_for_state<E: Ec2Api>(
    ec2: &E,
    instance_id: &str,
    target: InstanceState,
    wait: WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Instance> {
    wait_for_resource(
        wait,
        cancel,
        move || async move {
            // DescribeInstances can lag behind RunInstances; not found
            // counts as not ready until the wait times out
            let Some(instance) = ec2.instance(instance_id).await? else {
                debug!(instance_id = %instance_id, "Instance not visible yet");
                return Ok(None);
            };
            if instance.state == target {
                return Ok(Some(instance));
            }
            if instance.state.is_gone() {
                anyhow::bail!("Instance {} entered unexpected state: {}", instance_id, instance.state);
            }
            Ok(None)
        },
        &format!("EC2 instance {instance_id} {target}"),
    )
    .await
}

pub async fn wait_for_running<E: Ec2Api>(
    ec2: &E,
    instance_id: &str,
    wait: WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Instance> {
    wait_for_state(ec2, instance_id, InstanceState::Running, wait, cancel).await
}

/// Stop and start a running instance that came up without a public
/// address, so EC2 assigns one. Done once per call.
#[instrument(skip(ec2, instance, wait), fields(instance_id = %instance.id))]
pub async fn cycle_for_public_address<E: Ec2Api>(
    ec2: &E,
    instance: &Instance,
    wait: WaitConfig,
) -> Result<Instance> {
    warn!("Running instance has no public IP, restarting it");
    ec2.stop_instance(&instance.id).await?;
    wait_for_state(ec2, &instance.id, InstanceState::Stopped, wait, None).await?;
    ec2.start_instance(&instance.id).await?;
    wait_for_running(ec2, &instance.id, wait, None).await
}

/// Start a stopped (or stopping) instance without waiting for it to run.
pub async fn resume_instance<E: Ec2Api>(
    ec2: &E,
    instance: &Instance,
    wait: WaitConfig,
) -> Result<()> {
    match instance.state {
        InstanceState::Pending | InstanceState::Running => Ok(()),
        InstanceState::Stopping => {
            wait_for_state(ec2, &instance.id, InstanceState::Stopped, wait, None).await?;
            ec2.start_instance(&instance.id).await
        }
        _ => ec2.start_instance(&instance.id).await,
    }
}

/// Launch the instance and return immediately.
pub async fn launch_instance<E: Ec2Api>(ec2: &E, spec: &LaunchSpec) -> Result<Instance> {
    ec2.run_instance(spec)
        .await
        .with_context(|| format!("Failed to launch instance {}", spec.name))
}

/// Where a floating IP came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressOrigin {
    /// Already bound to the instance
    AlreadyBound,
    /// Orphaned tagged address, now associated
    Reused,
    Allocated,
}

#[derive(Debug, Clone)]
pub struct FloatingIp {
    pub address: Address,
    pub origin: AddressOrigin,
}

/// Make sure `instance_id` has a floating IP tagged `name`.
///
/// Order of preference: an address already bound to the instance, an
/// unassociated address tagged `name`, a freshly allocated one. If
/// association fails a freshly allocated address is released again; a
/// reused one stays allocated for the next attempt.
#[instrument(skip(ec2))]
pub async fn upsert_floating_ip<E: Ec2Api>(
    ec2: &E,
    name: &str,
    instance_id: &str,
) -> Result<FloatingIp> {
    let bound = ec2
        .addresses_for_instance(instance_id)
        .await
        .context("Failed to look up addresses bound to the instance")?;
    if let Some(address) = bound.into_iter().next() {
        info!(allocation_id = %address.allocation_id, public_ip = %address.public_ip, "Instance already has a floating IP");
        return Ok(FloatingIp {
            address,
            origin: AddressOrigin::AlreadyBound,
        });
    }

    let orphan = ec2
        .addresses_by_name(name)
        .await
        .context("Failed to look up tagged addresses")?
        .into_iter()
        .find(|a| !a.is_associated());

    let (mut address, origin) = match orphan {
        Some(address) => (address, AddressOrigin::Reused),
        None => (
            ec2.allocate_address(Some(name))
                .await
                .context("Failed to allocate floating IP")?,
            AddressOrigin::Allocated,
        ),
    };

    match ec2.associate_address(&address.allocation_id, instance_id).await {
        Ok(association_id) => {
            address.association_id = Some(association_id);
            address.instance_id = Some(instance_id.to_string());
            info!(allocation_id = %address.allocation_id, public_ip = %address.public_ip, origin = ?origin, "Floating IP associated");
            Ok(FloatingIp { address, origin })
        }
        Err(e) => {
            if origin == AddressOrigin::Allocated {
                if let Err(release_err) = ec2.release_address(&address.allocation_id).await {
                    warn!(
                        allocation_id = %address.allocation_id,
                        error = %release_err,
                        "Failed to release floating IP after association failure"
                    );
                }
            }
            warn!(kind = ?classify_anyhow_error(&e), "Floating IP association failed");
            Err(e.context(format!(
                "Failed to associate {} with {}",
                address.public_ip, instance_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitSettings;
    use egress_common::AwsError;
    use egress_test_utils::FakeEc2;

    const AMI: &str = "ami-al2023-new";

    struct Setup {
        fake: FakeEc2,
        vpc: String,
        subnet: String,
    }

    async fn setup() -> Setup {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let subnet = fake.add_subnet(&vpc, "10.0.7.0/24", Some("acme"));
        fake.enable_public_ip_on_launch(&subnet).await.unwrap();
        Setup { fake, vpc, subnet }
    }

    #[tokio::test]
    async fn newest_image_wins() {
        let Setup { fake, .. } = setup().await;
        fake.add_image("ami-old", "2024-01-01T00:00:00.000Z");
        fake.add_image("ami-newest", "2026-02-01T00:00:00.000Z");

        let image = resolve_image(&fake, &ImageQuery::default()).await.unwrap();
        assert_eq!(image.id, "ami-newest");
    }

    #[tokio::test]
    async fn no_image_is_an_error() {
        let fake = FakeEc2::new();
        let err = resolve_image(&fake, &ImageQuery::default()).await.unwrap_err();
        assert!(err.to_string().contains("No image found"));
    }

    #[tokio::test]
    async fn lookup_sorts_instances_by_usefulness() {
        let Setup { fake, vpc, subnet } = setup().await;
        let running = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, Some("198.51.100.1"));
        let stopped = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Stopped, None);
        let stale = fake.add_instance("acme", &vpc, &subnet, "ami-old", InstanceState::Running, None);
        fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Terminated, None);
        fake.add_instance("other", &vpc, &subnet, AMI, InstanceState::Running, None);

        let lookup = find_instance(&fake, "acme", &vpc, AMI).await.unwrap();
        assert_eq!(lookup.running.map(|i| i.id), Some(running));
        assert_eq!(lookup.recoverable.map(|i| i.id), Some(stopped));
        assert_eq!(lookup.stale.into_iter().map(|i| i.id).collect::<Vec<_>>(), vec![stale]);
    }

    #[tokio::test]
    async fn cycling_assigns_a_public_address() {
        let Setup { fake, vpc, subnet } = setup().await;
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, None);
        let instance = fake.instance(&id).await.unwrap().unwrap();

        let cycled = cycle_for_public_address(&fake, &instance, WaitSettings::immediate().instance)
            .await
            .unwrap();

        assert_eq!(cycled.state, InstanceState::Running);
        assert!(cycled.public_ip.is_some());
        assert_eq!(fake.calls("stop_instance"), 1);
        assert_eq!(fake.calls("start_instance"), 1);
    }

    #[tokio::test]
    async fn stopped_instance_is_started_without_waiting() {
        let Setup { fake, vpc, subnet } = setup().await;
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Stopped, None);
        let instance = fake.instance(&id).await.unwrap().unwrap();

        resume_instance(&fake, &instance, WaitSettings::immediate().instance)
            .await
            .unwrap();

        assert_eq!(fake.all_instances()[0].state, InstanceState::Pending);
    }

    #[tokio::test]
    async fn waiting_fails_when_instance_terminates() {
        let Setup { fake, vpc, subnet } = setup().await;
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Pending, None);
        fake.terminate_instance(&id).await.unwrap();

        let err = wait_for_running(&fake, &id, WaitSettings::immediate().instance, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected state"));
    }

    #[tokio::test]
    async fn instance_missing_from_describe_is_waited_for() {
        let Setup { fake, .. } = setup().await;
        let wait = WaitConfig {
            timeout: std::time::Duration::from_millis(30),
            ..WaitSettings::immediate().instance
        };

        let err = wait_for_running(&fake, "i-not-visible", wait, None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Timeout"), "{err}");
        assert!(fake.calls("instance") > 1);
    }

    #[tokio::test]
    async fn floating_ip_is_allocated_once() {
        let Setup { fake, vpc, subnet } = setup().await;
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, None);

        let first = upsert_floating_ip(&fake, "acme", &id).await.unwrap();
        assert_eq!(first.origin, AddressOrigin::Allocated);
        assert_eq!(first.address.instance_id.as_deref(), Some(id.as_str()));
        assert!(first.address.association_id.is_some());

        let second = upsert_floating_ip(&fake, "acme", &id).await.unwrap();
        assert_eq!(second.origin, AddressOrigin::AlreadyBound);
        assert_eq!(second.address.allocation_id, first.address.allocation_id);
        assert_eq!(fake.all_addresses().len(), 1);
    }

    #[tokio::test]
    async fn orphaned_tagged_address_is_reused() {
        let Setup { fake, vpc, subnet } = setup().await;
        let orphan = fake.add_address(Some("acme"), None);
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, None);

        let ip = upsert_floating_ip(&fake, "acme", &id).await.unwrap();
        assert_eq!(ip.origin, AddressOrigin::Reused);
        assert_eq!(ip.address.allocation_id, orphan);
        assert_eq!(fake.calls("allocate_address"), 0);
    }

    #[tokio::test]
    async fn failed_association_releases_fresh_address() {
        let Setup { fake, vpc, subnet } = setup().await;
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, None);
        fake.fail_on(
            "associate_address",
            AwsError::Sdk {
                code: Some("InvalidInstanceID".to_string()),
                message: "not ready".to_string(),
            },
        );

        let err = upsert_floating_ip(&fake, "acme", &id).await.unwrap_err();
        assert!(err.to_string().contains("Failed to associate"));
        assert!(fake.all_addresses().is_empty());
    }

    #[tokio::test]
    async fn failed_association_keeps_reused_address() {
        let Setup { fake, vpc, subnet } = setup().await;
        let orphan = fake.add_address(Some("acme"), None);
        let id = fake.add_instance("acme", &vpc, &subnet, AMI, InstanceState::Running, None);
        fake.fail_on("associate_address", AwsError::Throttled);

        assert!(upsert_floating_ip(&fake, "acme", &id).await.is_err());
        let addresses = fake.all_addresses();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].allocation_id, orphan);
    }
}
