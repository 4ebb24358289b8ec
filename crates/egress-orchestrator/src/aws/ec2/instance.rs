//! EC2 instance lifecycle operations

use super::{Ec2Client, types};
use crate::aws::error::{SdkResultExt, ignore_not_found};
use crate::aws::tags::{self, filter, name_filter};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, InstanceType, ResourceType};
use egress_common::model::{Instance, LaunchSpec};
use tracing::info;

/// States considered "present" when looking an egress instance up by name
const LIVE_STATES: &[&str] = &["pending", "running", "stopping", "stopped"];

impl Ec2Client {
    pub async fn instances_by_name(&self, name: &str, network_id: &str) -> Result<Vec<Instance>> {
        let states = LIVE_STATES
            .iter()
            .fold(Filter::builder().name("instance-state-name"), |b, s| {
                b.values(*s)
            })
            .build();

        let response = self
            .client
            .describe_instances()
            .filters(name_filter(name))
            .filters(filter("vpc-id", network_id))
            .filters(states)
            .send()
            .await
            .aws_context("Failed to describe instances")?;

        Ok(response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(types::instance)
            .collect())
    }

    pub async fn instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        let result = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .aws_context("Failed to describe instance");

        Ok(ignore_not_found(result)?.and_then(|response| {
            response
                .reservations()
                .iter()
                .flat_map(|r| r.instances())
                .find_map(types::instance)
        }))
    }

    /// Launch one instance and return without waiting for it to run
    pub async fn run_instance(&self, spec: &LaunchSpec) -> Result<Instance> {
        let instance_type: InstanceType = spec
            .instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {}", spec.instance_type))?;

        let user_data_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            spec.user_data.as_bytes(),
        );

        info!(
            name = %spec.name,
            instance_type = %spec.instance_type,
            ami = %spec.image_id,
            subnet_id = %spec.subnet_id,
            "Launching instance"
        );

        let mut request = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(instance_type)
            .min_count(1)
            .max_count(1)
            .subnet_id(&spec.subnet_id)
            .user_data(user_data_b64)
            .tag_specifications(tags::ec2_tag_spec(ResourceType::Instance, &spec.name));

        for sg in &spec.security_group_ids {
            request = request.security_group_ids(sg);
        }

        if let Some(key) = &spec.key_name {
            request = request.key_name(key);
        }

        let response = request
            .send()
            .await
            .aws_context("Failed to launch instance")?;

        let instance = response
            .instances()
            .first()
            .and_then(types::instance)
            .context("No instance returned")?;

        info!(instance_id = %instance.id, "Instance launched");
        Ok(instance)
    }

    pub async fn start_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Starting instance");
        self.client
            .start_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .aws_context("Failed to start instance")?;
        Ok(())
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Stopping instance");
        self.client
            .stop_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .aws_context("Failed to stop instance")?;
        Ok(())
    }

    /// Terminate an instance without waiting for it to finish
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Terminating instance");
        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .aws_context("Failed to terminate instance")?;
        Ok(())
    }
}
