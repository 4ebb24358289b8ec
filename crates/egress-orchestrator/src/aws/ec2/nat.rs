//! NAT gateway operations

use super::{Ec2Client, types};
use crate::aws::error::{SdkResultExt, ignore_not_found};
use crate::aws::tags::{filter, name_filter};
use anyhow::{Context, Result};
use egress_common::model::NatGateway;
use tracing::info;

impl Ec2Client {
    pub async fn nat_gateways_by_name(&self, name: &str, subnet_id: &str) -> Result<Vec<NatGateway>> {
        let response = self
            .client
            .describe_nat_gateways()
            .filter(name_filter(name))
            .filter(filter("subnet-id", subnet_id))
            .send()
            .await
            .aws_context("Failed to describe NAT gateways")?;

        Ok(response
            .nat_gateways()
            .iter()
            .filter_map(types::nat_gateway)
            .collect())
    }

    /// Create a public NAT gateway. Tagging happens once it is available.
    pub async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> Result<NatGateway> {
        let response = self
            .client
            .create_nat_gateway()
            .subnet_id(subnet_id)
            .allocation_id(allocation_id)
            .send()
            .await
            .aws_context("Failed to create NAT gateway")?;

        let nat = response
            .nat_gateway()
            .and_then(types::nat_gateway)
            .context("No NAT gateway in response")?;

        info!(nat_id = %nat.id, subnet_id = %subnet_id, "Created NAT gateway");
        Ok(nat)
    }

    pub async fn nat_gateway(&self, nat_id: &str) -> Result<Option<NatGateway>> {
        let result = self
            .client
            .describe_nat_gateways()
            .nat_gateway_ids(nat_id)
            .send()
            .await
            .aws_context("Failed to describe NAT gateway");

        Ok(ignore_not_found(result)?
            .and_then(|response| response.nat_gateways().iter().find_map(types::nat_gateway)))
    }
}
