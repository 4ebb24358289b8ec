//! Conversions from SDK shapes into the provider-neutral model

use crate::aws::tags::name_from_tags;
use aws_sdk_ec2::types as sdk;
use egress_common::model::{
    Address, Image, IngressRule, Instance, InstanceState, InternetGateway, NatGateway,
    NatGatewayState, Network, Protocol, Route, RouteState, RouteTable, SecurityGroup, Subnet,
};

pub(super) fn network(vpc: &sdk::Vpc) -> Option<Network> {
    Some(Network {
        id: vpc.vpc_id()?.to_string(),
        cidr: vpc.cidr_block()?.to_string(),
        is_default: vpc.is_default().unwrap_or(false),
        name: name_from_tags(vpc.tags()),
    })
}

pub(super) fn internet_gateway(igw: &sdk::InternetGateway) -> Option<InternetGateway> {
    Some(InternetGateway {
        id: igw.internet_gateway_id()?.to_string(),
        name: name_from_tags(igw.tags()),
        attached_networks: igw
            .attachments()
            .iter()
            .filter_map(|a| a.vpc_id())
            .map(str::to_string)
            .collect(),
    })
}

pub(super) fn subnet(subnet: &sdk::Subnet) -> Option<Subnet> {
    Some(Subnet {
        id: subnet.subnet_id()?.to_string(),
        network_id: subnet.vpc_id()?.to_string(),
        cidr: subnet.cidr_block()?.to_string(),
        name: name_from_tags(subnet.tags()),
        available: subnet.state() == Some(&sdk::SubnetState::Available),
        map_public_ip_on_launch: subnet.map_public_ip_on_launch().unwrap_or(false),
    })
}

pub(super) fn route_table(table: &sdk::RouteTable) -> Option<RouteTable> {
    let associations = table.associations();
    Some(RouteTable {
        id: table.route_table_id()?.to_string(),
        network_id: table.vpc_id()?.to_string(),
        main: associations.iter().any(|a| a.main().unwrap_or(false)),
        subnet_ids: associations
            .iter()
            .filter_map(|a| a.subnet_id())
            .map(str::to_string)
            .collect(),
        routes: table
            .routes()
            .iter()
            .filter_map(|r| {
                Some(Route {
                    destination: r.destination_cidr_block()?.to_string(),
                    gateway_id: r.gateway_id().map(str::to_string),
                    state: match r.state() {
                        Some(sdk::RouteState::Blackhole) => RouteState::Blackhole,
                        _ => RouteState::Active,
                    },
                })
            })
            .collect(),
    })
}

pub(super) fn security_group(group: &sdk::SecurityGroup) -> Option<SecurityGroup> {
    let ingress = group
        .ip_permissions()
        .iter()
        .flat_map(|perm| {
            let protocol = perm.ip_protocol().and_then(Protocol::parse);
            let from_port = perm.from_port().unwrap_or(-1);
            let to_port = perm.to_port().unwrap_or(-1);
            perm.ip_ranges().iter().filter_map(move |range| {
                Some(IngressRule {
                    protocol: protocol?,
                    from_port,
                    to_port,
                    cidr: range.cidr_ip()?.to_string(),
                })
            })
        })
        .collect();

    Some(SecurityGroup {
        id: group.group_id()?.to_string(),
        group_name: group.group_name()?.to_string(),
        network_id: group.vpc_id().unwrap_or_default().to_string(),
        name: name_from_tags(group.tags()),
        ingress,
    })
}

pub(super) fn image(image: &sdk::Image) -> Option<Image> {
    Some(Image {
        id: image.image_id()?.to_string(),
        name: image.name().map(str::to_string),
        creation_date: image.creation_date().map(str::to_string),
    })
}

pub(super) fn instance_state(name: Option<&sdk::InstanceStateName>) -> InstanceState {
    name.and_then(|n| InstanceState::parse(n.as_str()))
        .unwrap_or(InstanceState::Pending)
}

pub(super) fn instance(instance: &sdk::Instance) -> Option<Instance> {
    Some(Instance {
        id: instance.instance_id()?.to_string(),
        state: instance_state(instance.state().and_then(|s| s.name())),
        image_id: instance.image_id().unwrap_or_default().to_string(),
        network_id: instance.vpc_id().map(str::to_string),
        subnet_id: instance.subnet_id().map(str::to_string),
        public_ip: instance.public_ip_address().map(str::to_string),
        name: name_from_tags(instance.tags()),
        security_group_ids: instance
            .security_groups()
            .iter()
            .filter_map(|g| g.group_id())
            .map(str::to_string)
            .collect(),
    })
}

pub(super) fn address(address: &sdk::Address) -> Option<Address> {
    Some(Address {
        allocation_id: address.allocation_id()?.to_string(),
        public_ip: address.public_ip()?.to_string(),
        association_id: address.association_id().map(str::to_string),
        instance_id: address
            .instance_id()
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        name: name_from_tags(address.tags()),
    })
}

pub(super) fn nat_gateway(nat: &sdk::NatGateway) -> Option<NatGateway> {
    let primary = nat.nat_gateway_addresses().first();
    Some(NatGateway {
        id: nat.nat_gateway_id()?.to_string(),
        subnet_id: nat.subnet_id().unwrap_or_default().to_string(),
        state: match nat.state() {
            Some(sdk::NatGatewayState::Available) => NatGatewayState::Available,
            Some(sdk::NatGatewayState::Failed) => NatGatewayState::Failed,
            Some(sdk::NatGatewayState::Deleting) => NatGatewayState::Deleting,
            Some(sdk::NatGatewayState::Deleted) => NatGatewayState::Deleted,
            _ => NatGatewayState::Pending,
        },
        allocation_id: primary.and_then(|a| a.allocation_id()).map(str::to_string),
        public_ip: primary.and_then(|a| a.public_ip()).map(str::to_string),
        failure_message: nat.failure_message().map(str::to_string),
        name: name_from_tags(nat.tags()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_tag(value: &str) -> sdk::Tag {
        sdk::Tag::builder().key("Name").value(value).build()
    }

    #[test]
    fn route_table_detects_main_and_blackhole() {
        let table = sdk::RouteTable::builder()
            .route_table_id("rtb-1")
            .vpc_id("vpc-1")
            .associations(sdk::RouteTableAssociation::builder().main(true).build())
            .routes(
                sdk::Route::builder()
                    .destination_cidr_block("0.0.0.0/0")
                    .gateway_id("igw-1")
                    .state(sdk::RouteState::Blackhole)
                    .build(),
            )
            .build();

        let table = route_table(&table).unwrap();
        assert!(table.main);
        let route = table.route_to("0.0.0.0/0").unwrap();
        assert_eq!(route.state, RouteState::Blackhole);
        assert_eq!(route.gateway_id.as_deref(), Some("igw-1"));
    }

    #[test]
    fn security_group_flattens_ranges() {
        let group = sdk::SecurityGroup::builder()
            .group_id("sg-1")
            .group_name("acme")
            .vpc_id("vpc-1")
            .tags(name_tag("acme"))
            .ip_permissions(
                sdk::IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(sdk::IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .ip_ranges(sdk::IpRange::builder().cidr_ip("10.0.0.0/8").build())
                    .build(),
            )
            .build();

        let group = security_group(&group).unwrap();
        assert_eq!(group.name.as_deref(), Some("acme"));
        assert_eq!(
            group.ingress,
            vec![
                IngressRule::tcp(22, "0.0.0.0/0"),
                IngressRule::tcp(22, "10.0.0.0/8")
            ]
        );
    }

    #[test]
    fn instance_without_state_is_pending() {
        let inst = sdk::Instance::builder()
            .instance_id("i-1")
            .tags(name_tag("acme"))
            .build();
        let inst = instance(&inst).unwrap();
        assert_eq!(inst.state, InstanceState::Pending);
        assert_eq!(inst.public_ip, None);
    }

    #[test]
    fn address_without_instance() {
        let addr = sdk::Address::builder()
            .allocation_id("eipalloc-1")
            .public_ip("203.0.113.7")
            .association_id("eipassoc-1")
            .build();
        let addr = address(&addr).unwrap();
        assert!(addr.is_associated());
        assert_eq!(addr.instance_id, None);
    }
}
