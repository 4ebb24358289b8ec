//! Elastic IP operations

use super::{Ec2Client, types};
use crate::aws::error::SdkResultExt;
use crate::aws::tags::{self, filter, name_filter};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{DomainType, ResourceType};
use egress_common::model::Address;
use tracing::info;

impl Ec2Client {
    pub async fn addresses_by_name(&self, name: &str) -> Result<Vec<Address>> {
        let response = self
            .client
            .describe_addresses()
            .filters(name_filter(name))
            .send()
            .await
            .aws_context("Failed to describe addresses")?;

        Ok(response.addresses().iter().filter_map(types::address).collect())
    }

    /// Addresses currently bound to an instance
    pub async fn addresses_for_instance(&self, instance_id: &str) -> Result<Vec<Address>> {
        let response = self
            .client
            .describe_addresses()
            .filters(filter("instance-id", instance_id))
            .send()
            .await
            .aws_context("Failed to describe instance addresses")?;

        Ok(response.addresses().iter().filter_map(types::address).collect())
    }

    pub async fn allocate_address(&self, name: Option<&str>) -> Result<Address> {
        let mut request = self.client.allocate_address().domain(DomainType::Vpc);
        if let Some(name) = name {
            request = request.tag_specifications(tags::ec2_tag_spec(ResourceType::ElasticIp, name));
        }

        let response = request
            .send()
            .await
            .aws_context("Failed to allocate Elastic IP")?;

        let address = Address {
            allocation_id: response
                .allocation_id()
                .context("No allocation ID in response")?
                .to_string(),
            public_ip: response
                .public_ip()
                .context("No public IP in response")?
                .to_string(),
            association_id: None,
            instance_id: None,
            name: name.map(str::to_string),
        };

        info!(allocation_id = %address.allocation_id, public_ip = %address.public_ip, "Allocated Elastic IP");
        Ok(address)
    }

    pub async fn associate_address(&self, allocation_id: &str, instance_id: &str) -> Result<String> {
        let response = self
            .client
            .associate_address()
            .allocation_id(allocation_id)
            .instance_id(instance_id)
            .send()
            .await
            .aws_context("Failed to associate Elastic IP")?;

        let association_id = response
            .association_id()
            .context("No association ID in response")?
            .to_string();

        info!(allocation_id = %allocation_id, instance_id = %instance_id, association_id = %association_id, "Associated Elastic IP");
        Ok(association_id)
    }

    pub async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        self.client
            .disassociate_address()
            .association_id(association_id)
            .send()
            .await
            .aws_context("Failed to disassociate Elastic IP")?;

        info!(association_id = %association_id, "Disassociated Elastic IP");
        Ok(())
    }

    pub async fn release_address(&self, allocation_id: &str) -> Result<()> {
        self.client
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await
            .aws_context("Failed to release Elastic IP")?;

        info!(allocation_id = %allocation_id, "Released Elastic IP");
        Ok(())
    }
}
