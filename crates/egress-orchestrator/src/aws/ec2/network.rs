//! VPC, internet gateway, subnet and route table operations

use super::{Ec2Client, types};
use crate::aws::error::{SdkResultExt, ignore_not_found};
use crate::aws::tags::{self, filter};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{AttributeBooleanValue, ResourceType};
use egress_common::model::{InternetGateway, Network, RouteTable, Subnet};
use tracing::{debug, info};

impl Ec2Client {
    /// Look up the default VPC of the region
    pub async fn default_network(&self) -> Result<Option<Network>> {
        let response = self
            .client
            .describe_vpcs()
            .filters(filter("isDefault", "true"))
            .send()
            .await
            .aws_context("Failed to describe VPCs")?;

        Ok(response.vpcs().iter().find_map(types::network))
    }

    pub async fn internet_gateways_for_network(
        &self,
        network_id: &str,
    ) -> Result<Vec<InternetGateway>> {
        let response = self
            .client
            .describe_internet_gateways()
            .filters(filter("attachment.vpc-id", network_id))
            .send()
            .await
            .aws_context("Failed to describe internet gateways")?;

        Ok(response
            .internet_gateways()
            .iter()
            .filter_map(types::internet_gateway)
            .collect())
    }

    pub async fn create_internet_gateway(&self, name: &str) -> Result<InternetGateway> {
        let response = self
            .client
            .create_internet_gateway()
            .tag_specifications(tags::ec2_tag_spec(ResourceType::InternetGateway, name))
            .send()
            .await
            .aws_context("Failed to create internet gateway")?;

        let igw = response
            .internet_gateway()
            .and_then(types::internet_gateway)
            .context("No internet gateway in response")?;

        info!(igw_id = %igw.id, name = %name, "Created internet gateway");
        Ok(igw)
    }

    pub async fn attach_internet_gateway(&self, gateway_id: &str, network_id: &str) -> Result<()> {
        self.client
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(network_id)
            .send()
            .await
            .aws_context("Failed to attach internet gateway")?;

        info!(igw_id = %gateway_id, vpc_id = %network_id, "Attached internet gateway");
        Ok(())
    }

    pub async fn subnets(&self, network_id: &str) -> Result<Vec<Subnet>> {
        let response = self
            .client
            .describe_subnets()
            .filters(filter("vpc-id", network_id))
            .send()
            .await
            .aws_context("Failed to describe subnets")?;

        Ok(response.subnets().iter().filter_map(types::subnet).collect())
    }

    pub async fn subnet(&self, subnet_id: &str) -> Result<Option<Subnet>> {
        let result = self
            .client
            .describe_subnets()
            .subnet_ids(subnet_id)
            .send()
            .await
            .aws_context("Failed to describe subnet");

        Ok(ignore_not_found(result)?
            .and_then(|response| response.subnets().iter().find_map(types::subnet)))
    }

    pub async fn create_subnet(&self, network_id: &str, cidr: &str, name: &str) -> Result<Subnet> {
        let response = self
            .client
            .create_subnet()
            .vpc_id(network_id)
            .cidr_block(cidr)
            .tag_specifications(tags::ec2_tag_spec(ResourceType::Subnet, name))
            .send()
            .await
            .aws_context("Failed to create subnet")?;

        let subnet = response
            .subnet()
            .and_then(types::subnet)
            .context("No subnet in response")?;

        info!(subnet_id = %subnet.id, cidr = %cidr, "Created subnet");
        Ok(subnet)
    }

    pub async fn enable_public_ip_on_launch(&self, subnet_id: &str) -> Result<()> {
        self.client
            .modify_subnet_attribute()
            .subnet_id(subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .aws_context("Failed to enable public IP on launch")?;

        debug!(subnet_id = %subnet_id, "Enabled auto-assign public IP");
        Ok(())
    }

    pub async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .aws_context("Failed to delete subnet")?;

        info!(subnet_id = %subnet_id, "Subnet deleted");
        Ok(())
    }

    pub async fn route_table_for_subnet(&self, subnet_id: &str) -> Result<Option<RouteTable>> {
        let response = self
            .client
            .describe_route_tables()
            .filters(filter("association.subnet-id", subnet_id))
            .send()
            .await
            .aws_context("Failed to describe route tables")?;

        Ok(response.route_tables().iter().find_map(types::route_table))
    }

    pub async fn main_route_table(&self, network_id: &str) -> Result<Option<RouteTable>> {
        let response = self
            .client
            .describe_route_tables()
            .filters(filter("vpc-id", network_id))
            .filters(filter("association.main", "true"))
            .send()
            .await
            .aws_context("Failed to describe main route table")?;

        Ok(response.route_tables().iter().find_map(types::route_table))
    }

    pub async fn route_table(&self, route_table_id: &str) -> Result<Option<RouteTable>> {
        let result = self
            .client
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .aws_context("Failed to describe route table");

        Ok(ignore_not_found(result)?
            .and_then(|response| response.route_tables().iter().find_map(types::route_table)))
    }

    pub async fn create_route(
        &self,
        route_table_id: &str,
        destination: &str,
        gateway_id: &str,
    ) -> Result<()> {
        self.client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination)
            .gateway_id(gateway_id)
            .send()
            .await
            .aws_context("Failed to create route")?;

        info!(route_table_id = %route_table_id, destination = %destination, gateway_id = %gateway_id, "Created route");
        Ok(())
    }

    pub async fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        gateway_id: &str,
    ) -> Result<()> {
        self.client
            .replace_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination)
            .gateway_id(gateway_id)
            .send()
            .await
            .aws_context("Failed to replace route")?;

        info!(route_table_id = %route_table_id, destination = %destination, gateway_id = %gateway_id, "Replaced route");
        Ok(())
    }

    /// Set (or overwrite) the `Name` tag of any EC2 resource
    pub async fn set_name_tag(&self, resource_id: &str, name: &str) -> Result<()> {
        self.client
            .create_tags()
            .resources(resource_id)
            .tags(
                aws_sdk_ec2::types::Tag::builder()
                    .key(tags::TAG_NAME)
                    .value(name)
                    .build(),
            )
            .send()
            .await
            .aws_context("Failed to tag resource")?;

        debug!(resource_id = %resource_id, name = %name, "Tagged resource");
        Ok(())
    }
}
