//! Teardown: two independent background workers
//!
//! The instance worker releases floating IPs and terminates the instance,
//! then sweeps orphaned addresses tagged with the egress name. The network
//! worker removes the security group (and an explicitly named subnet).
//! Neither waits for the other, so a security group still held by a
//! terminating instance comes back as `InUse`.

use super::types::{CleanupEntry, CleanupResult, DeletionRequest, DeletionResult, DeletionStatus, Teardown};
use super::worker::{TeardownHandle, WorkerHandle};
use anyhow::Result;
use egress_common::model::Address;
use egress_common::{Ec2Api, ResourceKind, classify_anyhow_error, ignore_not_found};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Map a failed cleanup call to its entry.
///
/// Only not-found counts as already deleted. A malformed id is the
/// caller's mistake and stays `Failed`, since the resource they meant may
/// still exist.
fn entry_for_error(kind: ResourceKind, id: &str, e: &anyhow::Error) -> CleanupEntry {
    let classified = classify_anyhow_error(e);
    if classified.is_not_found() {
        return CleanupEntry::new(kind, id, CleanupResult::AlreadyDeleted);
    }
    let result = if classified.is_dependency_violation() {
        CleanupResult::InUse
    } else {
        CleanupResult::Failed
    };
    warn!(kind = %kind, id = %id, error = %format!("{e:#}"), result = ?result, "Cleanup step failed");
    CleanupEntry::new(kind, id, result).with_message(format!("{e:#}"))
}

fn blank_to_none(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Tears down egress points in a single region
pub struct TeardownOrchestrator<E> {
    ec2: Arc<E>,
    region: String,
}

impl<E: Ec2Api + 'static> TeardownOrchestrator<E> {
    pub fn new(ec2: Arc<E>, region: impl Into<String>) -> Self {
        Self {
            ec2,
            region: region.into(),
        }
    }

    /// Validate the request and start both workers without waiting for
    /// them. Must be called from within a tokio runtime.
    #[instrument(skip(self, request), fields(name = %request.name, region = %self.region))]
    pub fn delete(&self, request: &DeletionRequest) -> Teardown {
        let region = Some(self.region.clone());
        let name = match super::validate_name(&request.name) {
            Ok(name) => name.to_string(),
            Err(reason) => {
                return Teardown {
                    result: DeletionResult::failure(request, region, reason),
                    handle: None,
                };
            }
        };

        let instance_id = blank_to_none(&request.instance_id);
        let network_id = blank_to_none(&request.network_id);
        let subnet_id = blank_to_none(&request.subnet_id);
        let group_name = request.security_group_name().trim().to_string();

        let mut result = DeletionResult::new(request, region, DeletionStatus::DeletionInitiated);
        match &instance_id {
            Some(id) => result.notes.push(format!("Terminating instance {id} and releasing its floating IPs")),
            None => result.notes.push("No instance id given; only tagged floating IPs are released".to_string()),
        }
        result.notes.push(format!(
            "Deleting security group {} in {}",
            group_name,
            network_id.as_deref().unwrap_or("the default VPC")
        ));
        if let Some(subnet) = &subnet_id {
            result.notes.push(format!("Deleting subnet {subnet}"));
        }

        let instance = {
            let ec2 = Arc::clone(&self.ec2);
            WorkerHandle::spawn("instance-teardown", move |cancel| async move {
                teardown_instance_and_addresses(&*ec2, &name, instance_id.as_deref(), &cancel).await
            })
        };
        let network = {
            let ec2 = Arc::clone(&self.ec2);
            WorkerHandle::spawn("network-teardown", move |cancel| async move {
                teardown_network(&*ec2, &group_name, network_id.as_deref(), subnet_id.as_deref(), &cancel)
                    .await
            })
        };

        info!("Teardown initiated");
        Teardown {
            result,
            handle: Some(TeardownHandle { instance, network }),
        }
    }
}

/// Instance worker: release, terminate, then sweep tagged addresses.
#[instrument(skip(ec2, cancel))]
pub(crate) async fn teardown_instance_and_addresses<E: Ec2Api>(
    ec2: &E,
    name: &str,
    instance_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<CleanupEntry>> {
    let mut entries = Vec::new();
    if let Some(id) = instance_id {
        entries.extend(teardown_instance(ec2, id).await);
    }

    if cancel.is_cancelled() {
        anyhow::bail!("Teardown of {} cancelled before the address sweep", name);
    }
    entries.extend(sweep_addresses(ec2, name, instance_id).await);
    Ok(entries)
}

async fn teardown_instance<E: Ec2Api>(ec2: &E, instance_id: &str) -> Vec<CleanupEntry> {
    let kind = ResourceKind::Ec2Instance;
    let instance = match ignore_not_found(ec2.instance(instance_id).await).map(Option::flatten) {
        Ok(Some(instance)) => instance,
        Ok(None) => {
            info!(instance_id = %instance_id, "Instance already gone");
            return vec![CleanupEntry::new(kind, instance_id, CleanupResult::AlreadyDeleted)];
        }
        Err(e) => return vec![entry_for_error(kind, instance_id, &e)],
    };

    if instance.state.is_gone() {
        info!(instance_id = %instance_id, state = %instance.state, "Instance already terminating");
        return vec![
            CleanupEntry::new(kind, instance_id, CleanupResult::Skipped)
                .with_message(format!("already {}", instance.state)),
        ];
    }

    let mut entries = Vec::new();
    match ec2.addresses_for_instance(instance_id).await {
        Ok(addresses) => {
            for address in &addresses {
                entries.push(release_address(ec2, address).await);
            }
        }
        Err(e) => entries.push(entry_for_error(ResourceKind::ElasticIp, instance_id, &e)),
    }

    entries.push(match ec2.terminate_instance(instance_id).await {
        Ok(()) => {
            info!(instance_id = %instance_id, "Instance termination requested");
            CleanupEntry::new(kind, instance_id, CleanupResult::Deleted)
        }
        Err(e) => entry_for_error(kind, instance_id, &e),
    });
    entries
}

/// Release every floating IP tagged `name` that is not in use elsewhere.
async fn sweep_addresses<E: Ec2Api>(
    ec2: &E,
    name: &str,
    target_instance: Option<&str>,
) -> Vec<CleanupEntry> {
    let kind = ResourceKind::ElasticIp;
    let addresses = match ec2.addresses_by_name(name).await {
        Ok(addresses) => addresses,
        Err(e) => return vec![entry_for_error(kind, name, &e)],
    };

    let mut entries = Vec::new();
    for address in &addresses {
        let entry = match (&address.association_id, address.instance_id.as_deref()) {
            (None, _) => release_address(ec2, address).await,
            (Some(_), Some(owner)) if Some(owner) == target_instance => {
                release_address(ec2, address).await
            }
            (Some(_), Some(owner)) => {
                CleanupEntry::new(kind, &address.allocation_id, CleanupResult::Skipped)
                    .with_message(format!("associated with another instance {owner}"))
            }
            (Some(_), None) => {
                CleanupEntry::new(kind, &address.allocation_id, CleanupResult::Skipped)
                    .with_message("bound to a non-instance target")
            }
        };
        entries.push(entry);
    }
    info!(name = %name, found = addresses.len(), "Floating IP sweep finished");
    entries
}

async fn release_address<E: Ec2Api>(ec2: &E, address: &Address) -> CleanupEntry {
    let kind = ResourceKind::ElasticIp;
    let id = address.allocation_id.as_str();

    if let Some(association_id) = &address.association_id {
        if let Err(e) = ignore_not_found(ec2.disassociate_address(association_id).await) {
            return entry_for_error(kind, id, &e);
        }
    }
    match ec2.release_address(id).await {
        Ok(()) => {
            info!(allocation_id = %id, public_ip = %address.public_ip, "Released floating IP");
            CleanupEntry::new(kind, id, CleanupResult::Deleted)
        }
        Err(e) => entry_for_error(kind, id, &e),
    }
}

/// Network worker: security group, then the optional subnet.
#[instrument(skip(ec2, cancel))]
pub(crate) async fn teardown_network<E: Ec2Api>(
    ec2: &E,
    group_name: &str,
    network_id: Option<&str>,
    subnet_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<CleanupEntry>> {
    let mut steps = vec![ResourceKind::SecurityGroup];
    if subnet_id.is_some() {
        steps.push(ResourceKind::Subnet);
    }
    steps.sort_by_key(|kind| kind.cleanup_priority());

    let mut entries = Vec::new();
    for kind in steps {
        if cancel.is_cancelled() {
            anyhow::bail!("Network teardown cancelled before {}", kind);
        }
        match (kind, subnet_id) {
            (ResourceKind::SecurityGroup, _) => {
                entries.extend(delete_security_group(ec2, group_name, network_id).await);
            }
            (ResourceKind::Subnet, Some(subnet_id)) => {
                entries.push(delete_subnet(ec2, subnet_id).await);
            }
            _ => {}
        }
    }
    Ok(entries)
}

async fn delete_security_group<E: Ec2Api>(
    ec2: &E,
    group_name: &str,
    network_id: Option<&str>,
) -> Vec<CleanupEntry> {
    let kind = ResourceKind::SecurityGroup;
    let network_id = match network_id {
        Some(id) => id.to_string(),
        None => match ec2.default_network().await {
            Ok(Some(network)) => network.id,
            Ok(None) => {
                return vec![
                    CleanupEntry::new(kind, group_name, CleanupResult::Failed)
                        .with_message("no network given and no default VPC to search"),
                ];
            }
            Err(e) => return vec![entry_for_error(kind, group_name, &e)],
        },
    };

    let groups = match ec2.security_groups_by_name(group_name, &network_id).await {
        Ok(groups) => groups,
        Err(e) => return vec![entry_for_error(kind, group_name, &e)],
    };
    if groups.is_empty() {
        info!(group_name = %group_name, vpc_id = %network_id, "Security group already gone");
        return vec![CleanupEntry::new(kind, group_name, CleanupResult::AlreadyDeleted)];
    }

    let mut entries = Vec::new();
    for group in &groups {
        entries.push(match ec2.delete_security_group(&group.id).await {
            Ok(()) => {
                info!(sg_id = %group.id, "Deleted security group");
                CleanupEntry::new(kind, &group.id, CleanupResult::Deleted)
            }
            Err(e) => entry_for_error(kind, &group.id, &e),
        });
    }
    entries
}

async fn delete_subnet<E: Ec2Api>(ec2: &E, subnet_id: &str) -> CleanupEntry {
    match ec2.delete_subnet(subnet_id).await {
        Ok(()) => {
            info!(subnet_id = %subnet_id, "Deleted subnet");
            CleanupEntry::new(ResourceKind::Subnet, subnet_id, CleanupResult::Deleted)
        }
        Err(e) => entry_for_error(ResourceKind::Subnet, subnet_id, &e),
    }
}
