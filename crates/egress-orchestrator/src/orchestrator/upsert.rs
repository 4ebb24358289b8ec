//! Upsert: compose fabric, policy and egress point for one request

use super::types::{EgressOutcome, EgressRequest, EgressResult, EgressType, InstanceProgress, Upsert};
use super::worker::{CompletionHandle, CompletionReport, WorkerHandle};
use crate::config::OrchestratorConfig;
use crate::provision::compute::{
    cycle_for_public_address, find_instance, launch_instance, resolve_image, resume_instance,
    upsert_floating_ip, wait_for_running,
};
use crate::provision::{
    NetworkFabric, RouteAction, ensure_nat_gateway, render_boot_script, upsert_security_policy,
    wait_for_nat_gateway,
};
use crate::wait::WaitConfig;
use anyhow::Result;
use egress_common::Ec2Api;
use egress_common::model::{LaunchSpec, Network};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Provisions egress points in a single region
pub struct EgressOrchestrator<E> {
    ec2: Arc<E>,
    config: OrchestratorConfig,
    region: String,
}

impl<E: Ec2Api + 'static> EgressOrchestrator<E> {
    pub fn new(ec2: Arc<E>, config: OrchestratorConfig, region: impl Into<String>) -> Self {
        Self {
            ec2,
            config,
            region: region.into(),
        }
    }

    /// Bring the egress point named in `request` into existence.
    ///
    /// Never fails: problems come back as `Failure` (nothing provisioned)
    /// or `PartialFailure` (stopped part-way, with everything done so far).
    #[instrument(skip(self, request), fields(name = %request.name, region = %self.region))]
    pub async fn upsert(&self, request: &EgressRequest) -> Upsert {
        let name = match super::validate_name(&request.name) {
            Ok(name) => name,
            Err(reason) => return Upsert::finished(EgressOutcome::failure(reason)),
        };
        let egress_type = request.egress_type();

        let boot_script = match (egress_type, request.vpn_profile.as_deref()) {
            (EgressType::ComputeEgress, Some(profile)) => match render_boot_script(profile) {
                Ok(script) => Some(script),
                Err(e) => {
                    return Upsert::finished(EgressOutcome::failure(format!("Invalid VPN profile: {e}")));
                }
            },
            _ => None,
        };

        let fabric = NetworkFabric::new(&*self.ec2);
        let network = match fabric.default_network().await {
            Ok(Some(network)) => network,
            Ok(None) => {
                return Upsert::finished(EgressOutcome::failure(format!(
                    "No default VPC in region {}",
                    self.region
                )));
            }
            Err(e) => return Upsert::finished(EgressOutcome::failure(format!("{e:#}"))),
        };

        info!(egress_type = ?egress_type, vpc_id = %network.id, "Upserting regional egress");
        let mut progress = EgressResult::new(name, &self.region, egress_type);
        progress.network_id = Some(network.id.clone());
        progress.network_cidr = Some(network.cidr.clone());

        let step = match (egress_type, boot_script) {
            (EgressType::ComputeEgress, Some(script)) => {
                self.compute_egress(&fabric, &network, name, script, &mut progress)
                    .await
            }
            (EgressType::NatGateway, _) => self
                .nat_egress(&fabric, &network, name, &mut progress)
                .await
                .map(|()| None),
            _ => self
                .gateway_only(&fabric, &network, name, &mut progress)
                .await
                .map(|()| None),
        };

        match step {
            Ok(completion) => {
                info!(notes = progress.notes.len(), "Regional egress ready");
                Upsert {
                    outcome: EgressOutcome::Success(progress),
                    completion,
                }
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Regional egress upsert stopped early");
                Upsert::finished(EgressOutcome::PartialFailure {
                    completed: progress,
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    /// Gateway, subnet and default route shared by both public branches.
    /// Returns the subnet id.
    async fn fabric(
        &self,
        fabric: &NetworkFabric<'_, E>,
        network: &Network,
        name: &str,
        progress: &mut EgressResult,
    ) -> Result<String> {
        let gateway = fabric.upsert_gateway(network, name).await?;
        progress.gateway_id = Some(gateway.resource.id.clone());

        let subnet = fabric
            .upsert_subnet(
                network,
                name,
                self.config.network.cidr_attempts,
                self.config.waits.subnet,
            )
            .await?;
        progress.subnet_id = Some(subnet.resource.id.clone());
        progress.subnet_cidr = Some(subnet.resource.cidr.clone());

        let route = fabric
            .ensure_default_route(&network.id, &subnet.resource.id, &gateway.resource.id)
            .await?;
        progress.route_table_id = Some(route.route_table_id.clone());
        if route.action == RouteAction::Replaced {
            progress.note(format!(
                "Default route in {} replaced to target {}",
                route.route_table_id, gateway.resource.id
            ));
        }

        Ok(subnet.resource.id)
    }

    async fn gateway_only(
        &self,
        fabric: &NetworkFabric<'_, E>,
        network: &Network,
        name: &str,
        progress: &mut EgressResult,
    ) -> Result<()> {
        let gateway = fabric.upsert_gateway(network, name).await?;
        progress.gateway_id = Some(gateway.resource.id);
        progress.note("Private egress: internet gateway only, no dedicated address");
        Ok(())
    }

    async fn nat_egress(
        &self,
        fabric: &NetworkFabric<'_, E>,
        network: &Network,
        name: &str,
        progress: &mut EgressResult,
    ) -> Result<()> {
        let subnet_id = self.fabric(fabric, network, name, progress).await?;

        let mut nat = ensure_nat_gateway(&*self.ec2, name, &subnet_id).await?;
        progress.nat_gateway_id = Some(nat.nat_gateway_id.clone());
        progress.allocation_id = nat.allocation_id.clone();
        progress.notes.append(&mut nat.notes);

        let nat = wait_for_nat_gateway(&*self.ec2, nat, self.config.waits.nat_gateway).await?;
        progress.allocation_id = nat.allocation_id;
        progress.public_ip = nat.public_ip;
        Ok(())
    }

    async fn compute_egress(
        &self,
        fabric: &NetworkFabric<'_, E>,
        network: &Network,
        name: &str,
        boot_script: String,
        progress: &mut EgressResult,
    ) -> Result<Option<CompletionHandle>> {
        let ec2 = &*self.ec2;
        let subnet_id = self.fabric(fabric, network, name, progress).await?;

        let policy =
            upsert_security_policy(ec2, &network.id, name, &self.config.network.ingress_rules).await?;
        progress.security_group_id = Some(policy.group.resource.id.clone());
        progress.security_group_name = Some(policy.group.resource.group_name.clone());
        if policy.rules_added > 0 && !policy.group.created() {
            progress.note(format!(
                "Added {} missing ingress rule(s) to {}",
                policy.rules_added, policy.group.resource.id
            ));
        }

        let image = resolve_image(ec2, &self.config.instance.image).await?;
        let lookup = find_instance(ec2, name, &network.id, &image.id).await?;
        for stale in &lookup.stale {
            progress.note(format!(
                "Instance {} runs image {} instead of {}; left untouched",
                stale.id, stale.image_id, image.id
            ));
        }

        let wait = self.config.waits.instance;

        if let Some(instance) = lookup.running {
            progress.instance_id = Some(instance.id.clone());
            let instance = if instance.public_ip.is_none() {
                progress.note(format!("Instance {} had no public IP and was restarted", instance.id));
                cycle_for_public_address(ec2, &instance, wait).await?
            } else {
                instance
            };

            let ip = upsert_floating_ip(ec2, name, &instance.id).await?;
            progress.instance_state = Some(InstanceProgress::Running);
            progress.allocation_id = Some(ip.address.allocation_id);
            progress.public_ip = Some(ip.address.public_ip);
            return Ok(None);
        }

        if let Some(instance) = lookup.recoverable {
            info!(instance_id = %instance.id, state = %instance.state, "Resuming existing instance");
            progress.instance_id = Some(instance.id.clone());
            resume_instance(ec2, &instance, wait).await?;
            progress.instance_state = Some(InstanceProgress::Pending);
            return Ok(Some(self.spawn_completion(name, &instance.id)));
        }

        let spec = LaunchSpec {
            name: name.to_string(),
            image_id: image.id,
            instance_type: self.config.instance.instance_type.clone(),
            key_name: self.config.instance.key_name.clone(),
            subnet_id,
            security_group_ids: vec![policy.group.resource.id],
            user_data: boot_script,
        };
        let instance = launch_instance(ec2, &spec).await?;
        progress.instance_id = Some(instance.id.clone());
        progress.instance_state = Some(InstanceProgress::ProvisioningStarted);

        Ok(Some(self.spawn_completion(name, &instance.id)))
    }

    fn spawn_completion(&self, name: &str, instance_id: &str) -> CompletionHandle {
        let ec2 = Arc::clone(&self.ec2);
        let name = name.to_string();
        let instance_id = instance_id.to_string();
        let wait = self.config.waits.instance;

        WorkerHandle::spawn("instance-completion", move |cancel| async move {
            complete_instance(&*ec2, &name, &instance_id, wait, &cancel).await
        })
    }
}

/// Wait for the instance to run, then bind its floating IP.
#[instrument(skip(ec2, wait, cancel))]
pub(crate) async fn complete_instance<E: Ec2Api>(
    ec2: &E,
    name: &str,
    instance_id: &str,
    wait: WaitConfig,
    cancel: &CancellationToken,
) -> Result<CompletionReport> {
    let instance = wait_for_running(ec2, instance_id, wait, Some(cancel)).await?;
    if cancel.is_cancelled() {
        anyhow::bail!("Completion of {} cancelled", instance_id);
    }

    let ip = upsert_floating_ip(ec2, name, &instance.id).await?;
    info!(
        instance_id = %instance.id,
        public_ip = %ip.address.public_ip,
        "Egress instance ready"
    );

    Ok(CompletionReport {
        instance_id: instance.id,
        public_ip: ip.address.public_ip,
        allocation_id: ip.address.allocation_id,
    })
}
