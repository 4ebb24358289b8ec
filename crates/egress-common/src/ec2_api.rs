//! EC2 control-plane operations the orchestrator depends on
//!
//! Implemented by the SDK-backed client in `egress-orchestrator` and by the
//! in-memory fake in `egress-test-utils`. Failures are reported as
//! `anyhow::Error` chains carrying a classified [`crate::AwsError`].

use crate::model::{
    Address, Image, ImageQuery, IngressRule, Instance, InternetGateway, LaunchSpec, NatGateway,
    Network, RouteTable, SecurityGroup, Subnet,
};
use anyhow::Result;
use std::future::Future;

/// Trait for EC2 operations that can be faked in tests.
pub trait Ec2Api: Send + Sync {
    // Networks and gateways

    /// The account's default VPC in the client's region, if any
    fn default_network(&self) -> impl Future<Output = Result<Option<Network>>> + Send;

    fn internet_gateways_for_network(
        &self,
        network_id: &str,
    ) -> impl Future<Output = Result<Vec<InternetGateway>>> + Send;

    /// Create an internet gateway tagged with `name`
    fn create_internet_gateway(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<InternetGateway>> + Send;

    fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        network_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    // Subnets

    /// All subnets of a network
    fn subnets(&self, network_id: &str) -> impl Future<Output = Result<Vec<Subnet>>> + Send;

    fn subnet(&self, subnet_id: &str) -> impl Future<Output = Result<Option<Subnet>>> + Send;

    /// Create a subnet tagged with `name`. Overlaps fail with `CidrConflict`.
    fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        name: &str,
    ) -> impl Future<Output = Result<Subnet>> + Send;

    fn enable_public_ip_on_launch(&self, subnet_id: &str)
    -> impl Future<Output = Result<()>> + Send;

    fn delete_subnet(&self, subnet_id: &str) -> impl Future<Output = Result<()>> + Send;

    // Routing

    /// Route table explicitly associated with the subnet
    fn route_table_for_subnet(
        &self,
        subnet_id: &str,
    ) -> impl Future<Output = Result<Option<RouteTable>>> + Send;

    fn main_route_table(
        &self,
        network_id: &str,
    ) -> impl Future<Output = Result<Option<RouteTable>>> + Send;

    fn route_table(
        &self,
        route_table_id: &str,
    ) -> impl Future<Output = Result<Option<RouteTable>>> + Send;

    /// Fails with `AlreadyExists` when the destination is already routed
    fn create_route(
        &self,
        route_table_id: &str,
        destination: &str,
        gateway_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        gateway_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    // Security groups

    fn security_groups_by_name(
        &self,
        group_name: &str,
        network_id: &str,
    ) -> impl Future<Output = Result<Vec<SecurityGroup>>> + Send;

    /// Create a group tagged with `Name = group_name`
    fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        network_id: &str,
    ) -> impl Future<Output = Result<SecurityGroup>> + Send;

    /// Fails with `AlreadyExists` for a duplicate permission
    fn authorize_ingress(
        &self,
        group_id: &str,
        rule: &IngressRule,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Allow all protocols to 0.0.0.0/0
    fn authorize_egress_all(&self, group_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn delete_security_group(&self, group_id: &str) -> impl Future<Output = Result<()>> + Send;

    // Tags and images

    fn set_name_tag(
        &self,
        resource_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn images(&self, query: &ImageQuery) -> impl Future<Output = Result<Vec<Image>>> + Send;

    // Instances

    /// Non-terminated instances tagged `name` in the network
    fn instances_by_name(
        &self,
        name: &str,
        network_id: &str,
    ) -> impl Future<Output = Result<Vec<Instance>>> + Send;

    /// `Ok(None)` when the instance does not exist
    fn instance(&self, instance_id: &str) -> impl Future<Output = Result<Option<Instance>>> + Send;

    fn run_instance(&self, spec: &LaunchSpec) -> impl Future<Output = Result<Instance>> + Send;

    fn start_instance(&self, instance_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn stop_instance(&self, instance_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn terminate_instance(&self, instance_id: &str) -> impl Future<Output = Result<()>> + Send;

    // Floating IPs

    fn addresses_by_name(&self, name: &str) -> impl Future<Output = Result<Vec<Address>>> + Send;

    fn addresses_for_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// Allocate a VPC address, tagged at allocation when `name` is given
    fn allocate_address(
        &self,
        name: Option<&str>,
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Returns the association id
    fn associate_address(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn disassociate_address(&self, association_id: &str)
    -> impl Future<Output = Result<()>> + Send;

    fn release_address(&self, allocation_id: &str) -> impl Future<Output = Result<()>> + Send;

    // NAT gateways

    fn nat_gateways_by_name(
        &self,
        name: &str,
        subnet_id: &str,
    ) -> impl Future<Output = Result<Vec<NatGateway>>> + Send;

    fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> impl Future<Output = Result<NatGateway>> + Send;

    fn nat_gateway(&self, nat_id: &str) -> impl Future<Output = Result<Option<NatGateway>>> + Send;
}
