//! `Ec2Api` implementation for the SDK-backed client

use super::Ec2Client;
use anyhow::Result;
use egress_common::Ec2Api;
use egress_common::model::{
    Address, Image, ImageQuery, IngressRule, Instance, InternetGateway, LaunchSpec, NatGateway,
    Network, RouteTable, SecurityGroup, Subnet,
};

impl Ec2Api for Ec2Client {
    async fn default_network(&self) -> Result<Option<Network>> {
        Ec2Client::default_network(self).await
    }

    async fn internet_gateways_for_network(&self, network_id: &str) -> Result<Vec<InternetGateway>> {
        Ec2Client::internet_gateways_for_network(self, network_id).await
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<InternetGateway> {
        Ec2Client::create_internet_gateway(self, name).await
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, network_id: &str) -> Result<()> {
        Ec2Client::attach_internet_gateway(self, gateway_id, network_id).await
    }

    async fn subnets(&self, network_id: &str) -> Result<Vec<Subnet>> {
        Ec2Client::subnets(self, network_id).await
    }

    async fn subnet(&self, subnet_id: &str) -> Result<Option<Subnet>> {
        Ec2Client::subnet(self, subnet_id).await
    }

    async fn create_subnet(&self, network_id: &str, cidr: &str, name: &str) -> Result<Subnet> {
        Ec2Client::create_subnet(self, network_id, cidr, name).await
    }

    async fn enable_public_ip_on_launch(&self, subnet_id: &str) -> Result<()> {
        Ec2Client::enable_public_ip_on_launch(self, subnet_id).await
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        Ec2Client::delete_subnet(self, subnet_id).await
    }

    async fn route_table_for_subnet(&self, subnet_id: &str) -> Result<Option<RouteTable>> {
        Ec2Client::route_table_for_subnet(self, subnet_id).await
    }

    async fn main_route_table(&self, network_id: &str) -> Result<Option<RouteTable>> {
        Ec2Client::main_route_table(self, network_id).await
    }

    async fn route_table(&self, route_table_id: &str) -> Result<Option<RouteTable>> {
        Ec2Client::route_table(self, route_table_id).await
    }

    async fn create_route(&self, route_table_id: &str, destination: &str, gateway_id: &str) -> Result<()> {
        Ec2Client::create_route(self, route_table_id, destination, gateway_id).await
    }

    async fn replace_route(&self, route_table_id: &str, destination: &str, gateway_id: &str) -> Result<()> {
        Ec2Client::replace_route(self, route_table_id, destination, gateway_id).await
    }

    async fn security_groups_by_name(&self, group_name: &str, network_id: &str) -> Result<Vec<SecurityGroup>> {
        Ec2Client::security_groups_by_name(self, group_name, network_id).await
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        network_id: &str,
    ) -> Result<SecurityGroup> {
        Ec2Client::create_security_group(self, group_name, description, network_id).await
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        Ec2Client::authorize_ingress(self, group_id, rule).await
    }

    async fn authorize_egress_all(&self, group_id: &str) -> Result<()> {
        Ec2Client::authorize_egress_all(self, group_id).await
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        Ec2Client::delete_security_group(self, group_id).await
    }

    async fn set_name_tag(&self, resource_id: &str, name: &str) -> Result<()> {
        Ec2Client::set_name_tag(self, resource_id, name).await
    }

    async fn images(&self, query: &ImageQuery) -> Result<Vec<Image>> {
        Ec2Client::images(self, query).await
    }

    async fn instances_by_name(&self, name: &str, network_id: &str) -> Result<Vec<Instance>> {
        Ec2Client::instances_by_name(self, name, network_id).await
    }

    async fn instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        Ec2Client::instance(self, instance_id).await
    }

    async fn run_instance(&self, spec: &LaunchSpec) -> Result<Instance> {
        Ec2Client::run_instance(self, spec).await
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        Ec2Client::start_instance(self, instance_id).await
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        Ec2Client::stop_instance(self, instance_id).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        Ec2Client::terminate_instance(self, instance_id).await
    }

    async fn addresses_by_name(&self, name: &str) -> Result<Vec<Address>> {
        Ec2Client::addresses_by_name(self, name).await
    }

    async fn addresses_for_instance(&self, instance_id: &str) -> Result<Vec<Address>> {
        Ec2Client::addresses_for_instance(self, instance_id).await
    }

    async fn allocate_address(&self, name: Option<&str>) -> Result<Address> {
        Ec2Client::allocate_address(self, name).await
    }

    async fn associate_address(&self, allocation_id: &str, instance_id: &str) -> Result<String> {
        Ec2Client::associate_address(self, allocation_id, instance_id).await
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        Ec2Client::disassociate_address(self, association_id).await
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        Ec2Client::release_address(self, allocation_id).await
    }

    async fn nat_gateways_by_name(&self, name: &str, subnet_id: &str) -> Result<Vec<NatGateway>> {
        Ec2Client::nat_gateways_by_name(self, name, subnet_id).await
    }

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> Result<NatGateway> {
        Ec2Client::create_nat_gateway(self, subnet_id, allocation_id).await
    }

    async fn nat_gateway(&self, nat_id: &str) -> Result<Option<NatGateway>> {
        Ec2Client::nat_gateway(self, nat_id).await
    }
}
