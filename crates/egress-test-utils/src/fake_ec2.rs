//! Stateful in-memory EC2 for orchestrator tests
//!
//! Models just enough provider behaviour to exercise the orchestrator:
//! CIDR conflicts, duplicate rules and routes, dependency violations on
//! in-use groups and addresses, instances that boot after a few polls and
//! NAT gateways that become available (or fail) after a few polls. Every
//! call is logged and any operation can be made to fail once with a chosen
//! [`AwsError`].

use anyhow::Result;
use egress_common::model::{
    Address, Image, ImageQuery, IngressRule, Instance, InstanceState, InternetGateway, LaunchSpec,
    NatGateway, NatGatewayState, Network, Route, RouteState, RouteTable, SecurityGroup, Subnet,
};
use egress_common::{AwsError, Ec2Api, classify_aws_error};
use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

fn aws_err(code: &str, message: impl AsRef<str>) -> anyhow::Error {
    anyhow::Error::new(classify_aws_error(Some(code), Some(message.as_ref())))
}

#[derive(Debug, Clone)]
struct FakeInstance {
    instance: Instance,
    /// Polls of `instance()` left before a transitional state settles
    polls_left: u32,
    /// Describe calls that still answer not-found
    hidden_polls: u32,
}

#[derive(Debug, Clone)]
struct FakeNat {
    nat: NatGateway,
    polls_left: u32,
    /// Failure message to settle into instead of `available`
    fails_with: Option<String>,
    hidden_polls: u32,
}

#[derive(Debug, Default)]
struct State {
    counter: u64,
    ip_counter: u32,
    networks: Vec<Network>,
    gateways: Vec<InternetGateway>,
    subnets: Vec<Subnet>,
    route_tables: Vec<RouteTable>,
    security_groups: Vec<SecurityGroup>,
    egress_open: HashSet<String>,
    images: Vec<Image>,
    instances: Vec<FakeInstance>,
    launches: Vec<LaunchSpec>,
    addresses: Vec<Address>,
    nat_gateways: Vec<FakeNat>,
    failures: HashMap<&'static str, VecDeque<AwsError>>,
    calls: Vec<&'static str>,
    boot_polls: u32,
    nat_polls: u32,
    nat_failure: Option<String>,
    describe_lag: u32,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}-{:08x}", self.counter)
    }

    fn next_ip(&mut self) -> String {
        self.ip_counter += 1;
        format!("203.0.113.{}", (self.ip_counter % 254) + 1)
    }

    fn subnet_maps_public_ip(&self, subnet_id: Option<&str>) -> bool {
        self.subnets
            .iter()
            .any(|s| Some(s.id.as_str()) == subnet_id && s.map_public_ip_on_launch)
    }

    fn elastic_ip_of(&self, instance_id: &str) -> Option<String> {
        self.addresses
            .iter()
            .find(|a| a.instance_id.as_deref() == Some(instance_id))
            .map(|a| a.public_ip.clone())
    }

    fn instance_mut(&mut self, instance_id: &str) -> Result<&mut FakeInstance> {
        self.instances
            .iter_mut()
            .find(|i| i.instance.id == instance_id)
            .ok_or_else(|| aws_err("InvalidInstanceID.NotFound", instance_id))
    }

    fn live_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances
            .iter()
            .map(|i| &i.instance)
            .filter(|i| i.state != InstanceState::Terminated)
    }

    /// Move a transitional instance one poll closer to its settled state.
    fn advance_instance(&mut self, instance_id: &str) {
        let Some(idx) = self.instances.iter().position(|i| i.instance.id == instance_id) else {
            return;
        };
        if self.instances[idx].polls_left > 0 {
            self.instances[idx].polls_left -= 1;
            return;
        }

        let state = self.instances[idx].instance.state;
        let settled = match state {
            InstanceState::Pending => InstanceState::Running,
            InstanceState::Stopping => InstanceState::Stopped,
            InstanceState::ShuttingDown => InstanceState::Terminated,
            other => other,
        };
        if settled == state {
            return;
        }

        let public_ip = match settled {
            InstanceState::Running => {
                let current = self.instances[idx].instance.public_ip.clone();
                let subnet = self.instances[idx].instance.subnet_id.clone();
                match current {
                    Some(ip) => Some(ip),
                    None if self.subnet_maps_public_ip(subnet.as_deref()) => Some(self.next_ip()),
                    None => None,
                }
            }
            _ => self.elastic_ip_of(instance_id),
        };
        let entry = &mut self.instances[idx].instance;
        entry.state = settled;
        entry.public_ip = public_ip;
    }

    fn advance_nat(&mut self, nat_id: &str) {
        let Some(idx) = self.nat_gateways.iter().position(|n| n.nat.id == nat_id) else {
            return;
        };
        let fake = &mut self.nat_gateways[idx];
        if fake.nat.state != NatGatewayState::Pending {
            return;
        }
        if fake.polls_left > 0 {
            fake.polls_left -= 1;
            return;
        }
        match fake.fails_with.clone() {
            Some(message) => {
                fake.nat.state = NatGatewayState::Failed;
                fake.nat.failure_message = Some(message);
                // A failed gateway lets go of its address
                if let Some(allocation_id) = fake.nat.allocation_id.clone() {
                    for address in self
                        .addresses
                        .iter_mut()
                        .filter(|a| a.allocation_id == allocation_id)
                    {
                        address.association_id = None;
                    }
                }
            }
            None => fake.nat.state = NatGatewayState::Available,
        }
    }
}

/// In-memory [`Ec2Api`] implementation
#[derive(Debug)]
pub struct FakeEc2 {
    state: Mutex<State>,
}

impl Default for FakeEc2 {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEc2 {
    /// Empty account. Instances need two polls to boot, NAT gateways two
    /// polls to become available.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                boot_polls: 2,
                nat_polls: 2,
                ..State::default()
            }),
        }
    }

    /// Account with a default VPC and one Amazon Linux image
    pub fn with_default_network(cidr: &str) -> Self {
        let fake = Self::new();
        fake.add_network(cidr, true);
        fake.add_image("ami-al2023-new", "2025-06-01T00:00:00.000Z");
        fake
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log the call, apply any injected failure and hand out the state.
    fn enter(&self, op: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        trace!(op, "FakeEc2 call");
        state.calls.push(op);
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(anyhow::Error::new(err));
        }
        Ok(state)
    }

    // Behaviour knobs

    /// Make the next call of `op` fail with `error`. Repeated calls queue.
    pub fn fail_on(&self, op: &'static str, error: AwsError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Polls an instance needs before a transition settles
    pub fn set_boot_polls(&self, polls: u32) {
        self.lock().boot_polls = polls;
    }

    pub fn set_nat_polls(&self, polls: u32) {
        self.lock().nat_polls = polls;
    }

    /// Instances and NAT gateways created from now on answer not-found to
    /// the first `polls` describe calls, like EC2's eventual consistency
    pub fn set_describe_lag(&self, polls: u32) {
        self.lock().describe_lag = polls;
    }

    /// NAT gateways created from now on end up `failed` with `message`
    pub fn fail_nat_gateways(&self, message: &str) {
        self.lock().nat_failure = Some(message.to_string());
    }

    // Seeding

    /// Add a VPC with a main route table; returns the VPC id.
    pub fn add_network(&self, cidr: &str, is_default: bool) -> String {
        let mut s = self.lock();
        let id = s.next_id("vpc");
        let rtb = s.next_id("rtb");
        s.networks.push(Network {
            id: id.clone(),
            cidr: cidr.to_string(),
            is_default,
            name: None,
        });
        s.route_tables.push(RouteTable {
            id: rtb,
            network_id: id.clone(),
            main: true,
            subnet_ids: Vec::new(),
            routes: vec![Route {
                destination: cidr.to_string(),
                gateway_id: Some("local".to_string()),
                state: RouteState::Active,
            }],
        });
        id
    }

    pub fn add_image(&self, id: &str, creation_date: &str) {
        self.lock().images.push(Image {
            id: id.to_string(),
            name: Some(format!("al2023-ami-2023.{id}-kernel-6.1-x86_64")),
            creation_date: Some(creation_date.to_string()),
        });
    }

    /// Add an available subnet; returns its id.
    pub fn add_subnet(&self, network_id: &str, cidr: &str, name: Option<&str>) -> String {
        let mut s = self.lock();
        let id = s.next_id("subnet");
        s.subnets.push(Subnet {
            id: id.clone(),
            network_id: network_id.to_string(),
            cidr: cidr.to_string(),
            name: name.map(str::to_string),
            available: true,
            map_public_ip_on_launch: false,
        });
        id
    }

    pub fn add_internet_gateway(&self, network_id: &str, name: Option<&str>) -> String {
        let mut s = self.lock();
        let id = s.next_id("igw");
        s.gateways.push(InternetGateway {
            id: id.clone(),
            name: name.map(str::to_string),
            attached_networks: vec![network_id.to_string()],
        });
        id
    }

    /// Add or overwrite a route in a table.
    pub fn put_route(&self, route_table_id: &str, destination: &str, gateway_id: &str, state: RouteState) {
        let mut s = self.lock();
        if let Some(table) = s.route_tables.iter_mut().find(|t| t.id == route_table_id) {
            table.routes.retain(|r| r.destination != destination);
            table.routes.push(Route {
                destination: destination.to_string(),
                gateway_id: Some(gateway_id.to_string()),
                state,
            });
        }
    }

    /// Add an instance in the given state; returns its id.
    pub fn add_instance(
        &self,
        name: &str,
        network_id: &str,
        subnet_id: &str,
        image_id: &str,
        state: InstanceState,
        public_ip: Option<&str>,
    ) -> String {
        let mut s = self.lock();
        let id = s.next_id("i");
        let polls_left = s.boot_polls;
        s.instances.push(FakeInstance {
            instance: Instance {
                id: id.clone(),
                state,
                image_id: image_id.to_string(),
                network_id: Some(network_id.to_string()),
                subnet_id: Some(subnet_id.to_string()),
                public_ip: public_ip.map(str::to_string),
                name: Some(name.to_string()),
                security_group_ids: Vec::new(),
            },
            polls_left,
            hidden_polls: 0,
        });
        id
    }

    /// Add an address, optionally tagged and bound to an instance;
    /// returns the allocation id.
    pub fn add_address(&self, name: Option<&str>, instance_id: Option<&str>) -> String {
        let mut s = self.lock();
        let allocation_id = s.next_id("eipalloc");
        let public_ip = s.next_ip();
        let association_id = instance_id.map(|_| s.next_id("eipassoc"));
        if let Some(fake) = s
            .instances
            .iter_mut()
            .find(|i| Some(i.instance.id.as_str()) == instance_id)
        {
            fake.instance.public_ip = Some(public_ip.clone());
        }
        s.addresses.push(Address {
            allocation_id: allocation_id.clone(),
            public_ip,
            association_id,
            instance_id: instance_id.map(str::to_string),
            name: name.map(str::to_string),
        });
        allocation_id
    }

    /// Address bound to a non-instance target such as a NAT gateway
    pub fn add_nat_bound_address(&self, name: &str) -> String {
        let mut s = self.lock();
        let allocation_id = s.next_id("eipalloc");
        let public_ip = s.next_ip();
        let association_id = Some(s.next_id("eipassoc"));
        s.addresses.push(Address {
            allocation_id: allocation_id.clone(),
            public_ip,
            association_id,
            instance_id: None,
            name: Some(name.to_string()),
        });
        allocation_id
    }

    // Inspection

    /// Number of calls made to `op`
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn default_network_id(&self) -> Option<String> {
        self.lock()
            .networks
            .iter()
            .find(|n| n.is_default)
            .map(|n| n.id.clone())
    }

    pub fn main_route_table_id(&self, network_id: &str) -> Option<String> {
        self.lock()
            .route_tables
            .iter()
            .find(|t| t.main && t.network_id == network_id)
            .map(|t| t.id.clone())
    }

    pub fn all_gateways(&self) -> Vec<InternetGateway> {
        self.lock().gateways.clone()
    }

    pub fn all_subnets(&self) -> Vec<Subnet> {
        self.lock().subnets.clone()
    }

    pub fn all_route_tables(&self) -> Vec<RouteTable> {
        self.lock().route_tables.clone()
    }

    pub fn all_security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().security_groups.clone()
    }

    pub fn egress_open(&self, group_id: &str) -> bool {
        self.lock().egress_open.contains(group_id)
    }

    pub fn all_instances(&self) -> Vec<Instance> {
        self.lock().instances.iter().map(|i| i.instance.clone()).collect()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.lock().launches.clone()
    }

    pub fn all_addresses(&self) -> Vec<Address> {
        self.lock().addresses.clone()
    }

    pub fn all_nat_gateways(&self) -> Vec<NatGateway> {
        self.lock().nat_gateways.iter().map(|n| n.nat.clone()).collect()
    }
}

impl Ec2Api for FakeEc2 {
    async fn default_network(&self) -> Result<Option<Network>> {
        let s = self.enter("default_network")?;
        Ok(s.networks.iter().find(|n| n.is_default).cloned())
    }

    async fn internet_gateways_for_network(&self, network_id: &str) -> Result<Vec<InternetGateway>> {
        let s = self.enter("internet_gateways_for_network")?;
        Ok(s.gateways
            .iter()
            .filter(|g| g.attached_networks.iter().any(|n| n == network_id))
            .cloned()
            .collect())
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<InternetGateway> {
        let mut s = self.enter("create_internet_gateway")?;
        let gateway = InternetGateway {
            id: s.next_id("igw"),
            name: Some(name.to_string()),
            attached_networks: Vec::new(),
        };
        s.gateways.push(gateway.clone());
        Ok(gateway)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, network_id: &str) -> Result<()> {
        let mut s = self.enter("attach_internet_gateway")?;
        if !s.networks.iter().any(|n| n.id == network_id) {
            return Err(aws_err("InvalidVpcID.NotFound", network_id));
        }
        let gateway = s
            .gateways
            .iter_mut()
            .find(|g| g.id == gateway_id)
            .ok_or_else(|| aws_err("InvalidInternetGatewayID.NotFound", gateway_id))?;
        if !gateway.attached_networks.is_empty() {
            return Err(aws_err("Resource.AlreadyAssociated", gateway_id));
        }
        gateway.attached_networks.push(network_id.to_string());
        Ok(())
    }

    async fn subnets(&self, network_id: &str) -> Result<Vec<Subnet>> {
        let s = self.enter("subnets")?;
        Ok(s.subnets
            .iter()
            .filter(|sub| sub.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn subnet(&self, subnet_id: &str) -> Result<Option<Subnet>> {
        let mut s = self.enter("subnet")?;
        let Some(subnet) = s.subnets.iter_mut().find(|sub| sub.id == subnet_id) else {
            return Ok(None);
        };
        let snapshot = subnet.clone();
        // New subnets turn available on the first poll after creation
        subnet.available = true;
        Ok(Some(snapshot))
    }

    async fn create_subnet(&self, network_id: &str, cidr: &str, name: &str) -> Result<Subnet> {
        let mut s = self.enter("create_subnet")?;
        let network = s
            .networks
            .iter()
            .find(|n| n.id == network_id)
            .cloned()
            .ok_or_else(|| aws_err("InvalidVpcID.NotFound", network_id))?;

        let block: Ipv4Network = network
            .cidr
            .parse()
            .map_err(|_| aws_err("InvalidParameterValue", &network.cidr))?;
        let requested: Ipv4Network = cidr
            .parse()
            .map_err(|_| aws_err("InvalidParameterValue", cidr))?;
        if !block.contains(requested.network()) || !block.contains(requested.broadcast()) {
            return Err(aws_err("InvalidSubnet.Range", format!("{cidr} is outside {}", network.cidr)));
        }
        let overlaps = s
            .subnets
            .iter()
            .filter(|sub| sub.network_id == network_id)
            .filter_map(|sub| sub.cidr.parse::<Ipv4Network>().ok())
            .any(|existing| existing.contains(requested.network()) || requested.contains(existing.network()));
        if overlaps {
            return Err(aws_err("InvalidSubnet.Conflict", format!("The CIDR '{cidr}' conflicts with another subnet")));
        }

        let subnet = Subnet {
            id: s.next_id("subnet"),
            network_id: network_id.to_string(),
            cidr: cidr.to_string(),
            name: Some(name.to_string()),
            available: false,
            map_public_ip_on_launch: false,
        };
        s.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn enable_public_ip_on_launch(&self, subnet_id: &str) -> Result<()> {
        let mut s = self.enter("enable_public_ip_on_launch")?;
        let subnet = s
            .subnets
            .iter_mut()
            .find(|sub| sub.id == subnet_id)
            .ok_or_else(|| aws_err("InvalidSubnetID.NotFound", subnet_id))?;
        subnet.map_public_ip_on_launch = true;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut s = self.enter("delete_subnet")?;
        if !s.subnets.iter().any(|sub| sub.id == subnet_id) {
            return Err(aws_err("InvalidSubnetID.NotFound", subnet_id));
        }
        let in_use = s.live_instances().any(|i| i.subnet_id.as_deref() == Some(subnet_id))
            || s.nat_gateways
                .iter()
                .any(|n| n.nat.subnet_id == subnet_id && n.nat.state.is_live());
        if in_use {
            return Err(aws_err(
                "DependencyViolation",
                format!("The subnet '{subnet_id}' has dependencies and cannot be deleted."),
            ));
        }
        s.subnets.retain(|sub| sub.id != subnet_id);
        for table in &mut s.route_tables {
            table.subnet_ids.retain(|id| id != subnet_id);
        }
        Ok(())
    }

    async fn route_table_for_subnet(&self, subnet_id: &str) -> Result<Option<RouteTable>> {
        let s = self.enter("route_table_for_subnet")?;
        Ok(s.route_tables
            .iter()
            .find(|t| t.subnet_ids.iter().any(|id| id == subnet_id))
            .cloned())
    }

    async fn main_route_table(&self, network_id: &str) -> Result<Option<RouteTable>> {
        let s = self.enter("main_route_table")?;
        Ok(s.route_tables
            .iter()
            .find(|t| t.main && t.network_id == network_id)
            .cloned())
    }

    async fn route_table(&self, route_table_id: &str) -> Result<Option<RouteTable>> {
        let s = self.enter("route_table")?;
        Ok(s.route_tables.iter().find(|t| t.id == route_table_id).cloned())
    }

    async fn create_route(&self, route_table_id: &str, destination: &str, gateway_id: &str) -> Result<()> {
        let mut s = self.enter("create_route")?;
        let table = s
            .route_tables
            .iter_mut()
            .find(|t| t.id == route_table_id)
            .ok_or_else(|| aws_err("InvalidRouteTableID.NotFound", route_table_id))?;
        if table.route_to(destination).is_some() {
            return Err(aws_err(
                "RouteAlreadyExists",
                format!("The route identified by {destination} already exists."),
            ));
        }
        table.routes.push(Route {
            destination: destination.to_string(),
            gateway_id: Some(gateway_id.to_string()),
            state: RouteState::Active,
        });
        Ok(())
    }

    async fn replace_route(&self, route_table_id: &str, destination: &str, gateway_id: &str) -> Result<()> {
        let mut s = self.enter("replace_route")?;
        let table = s
            .route_tables
            .iter_mut()
            .find(|t| t.id == route_table_id)
            .ok_or_else(|| aws_err("InvalidRouteTableID.NotFound", route_table_id))?;
        let route = table
            .routes
            .iter_mut()
            .find(|r| r.destination == destination)
            .ok_or_else(|| aws_err("InvalidRoute.NotFound", destination))?;
        route.gateway_id = Some(gateway_id.to_string());
        route.state = RouteState::Active;
        Ok(())
    }

    async fn security_groups_by_name(&self, group_name: &str, network_id: &str) -> Result<Vec<SecurityGroup>> {
        let s = self.enter("security_groups_by_name")?;
        Ok(s.security_groups
            .iter()
            .filter(|g| g.group_name == group_name && g.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        _description: &str,
        network_id: &str,
    ) -> Result<SecurityGroup> {
        let mut s = self.enter("create_security_group")?;
        if s.security_groups
            .iter()
            .any(|g| g.group_name == group_name && g.network_id == network_id)
        {
            return Err(aws_err(
                "InvalidGroup.Duplicate",
                format!("The security group '{group_name}' already exists"),
            ));
        }
        let group = SecurityGroup {
            id: s.next_id("sg"),
            group_name: group_name.to_string(),
            network_id: network_id.to_string(),
            name: Some(group_name.to_string()),
            ingress: Vec::new(),
        };
        // New groups come with allow-all egress
        s.egress_open.insert(group.id.clone());
        s.security_groups.push(group.clone());
        Ok(group)
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        let mut s = self.enter("authorize_ingress")?;
        let group = s
            .security_groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| aws_err("InvalidGroup.NotFound", group_id))?;
        if group.ingress.contains(rule) {
            return Err(aws_err(
                "InvalidPermission.Duplicate",
                format!("the specified rule \"{rule}\" already exists"),
            ));
        }
        group.ingress.push(rule.clone());
        Ok(())
    }

    async fn authorize_egress_all(&self, group_id: &str) -> Result<()> {
        let mut s = self.enter("authorize_egress_all")?;
        if !s.security_groups.iter().any(|g| g.id == group_id) {
            return Err(aws_err("InvalidGroup.NotFound", group_id));
        }
        if !s.egress_open.insert(group_id.to_string()) {
            return Err(aws_err("InvalidPermission.Duplicate", "egress rule already exists"));
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let mut s = self.enter("delete_security_group")?;
        if !s.security_groups.iter().any(|g| g.id == group_id) {
            return Err(aws_err("InvalidGroup.NotFound", group_id));
        }
        if s.live_instances().any(|i| i.security_group_ids.iter().any(|g| g == group_id)) {
            return Err(aws_err(
                "DependencyViolation",
                format!("resource {group_id} has a dependent object"),
            ));
        }
        s.security_groups.retain(|g| g.id != group_id);
        s.egress_open.remove(group_id);
        Ok(())
    }

    async fn set_name_tag(&self, resource_id: &str, name: &str) -> Result<()> {
        let mut s = self.enter("set_name_tag")?;
        let name = Some(name.to_string());

        if let Some(r) = s.networks.iter_mut().find(|r| r.id == resource_id) {
            r.name = name;
        } else if let Some(r) = s.gateways.iter_mut().find(|r| r.id == resource_id) {
            r.name = name;
        } else if let Some(r) = s.subnets.iter_mut().find(|r| r.id == resource_id) {
            r.name = name;
        } else if let Some(r) = s.security_groups.iter_mut().find(|r| r.id == resource_id) {
            r.name = name;
        } else if let Some(r) = s.instances.iter_mut().find(|r| r.instance.id == resource_id) {
            r.instance.name = name;
        } else if let Some(r) = s.addresses.iter_mut().find(|r| r.allocation_id == resource_id) {
            r.name = name;
        } else if let Some(r) = s.nat_gateways.iter_mut().find(|r| r.nat.id == resource_id) {
            r.nat.name = name;
        } else {
            return Err(aws_err("InvalidID", format!("The ID '{resource_id}' is not valid")));
        }
        Ok(())
    }

    async fn images(&self, _query: &ImageQuery) -> Result<Vec<Image>> {
        let s = self.enter("images")?;
        Ok(s.images.clone())
    }

    async fn instances_by_name(&self, name: &str, network_id: &str) -> Result<Vec<Instance>> {
        let s = self.enter("instances_by_name")?;
        Ok(s.instances
            .iter()
            .map(|i| &i.instance)
            .filter(|i| i.name.as_deref() == Some(name))
            .filter(|i| i.network_id.as_deref() == Some(network_id))
            .filter(|i| !i.state.is_gone())
            .cloned()
            .collect())
    }

    async fn instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        let mut s = self.enter("instance")?;
        if let Some(fake) = s
            .instances
            .iter_mut()
            .find(|i| i.instance.id == instance_id && i.hidden_polls > 0)
        {
            fake.hidden_polls -= 1;
            return Ok(None);
        }
        s.advance_instance(instance_id);
        Ok(s.instances
            .iter()
            .find(|i| i.instance.id == instance_id)
            .map(|i| i.instance.clone()))
    }

    async fn run_instance(&self, spec: &LaunchSpec) -> Result<Instance> {
        let mut s = self.enter("run_instance")?;
        let subnet = s
            .subnets
            .iter()
            .find(|sub| sub.id == spec.subnet_id)
            .cloned()
            .ok_or_else(|| aws_err("InvalidSubnetID.NotFound", &spec.subnet_id))?;
        if !s.images.iter().any(|i| i.id == spec.image_id) {
            return Err(aws_err(
                "InvalidAMIID.NotFound",
                format!("The image id '[{}]' does not exist", spec.image_id),
            ));
        }
        if let Some(missing) = spec
            .security_group_ids
            .iter()
            .find(|id| !s.security_groups.iter().any(|g| &g.id == *id))
        {
            return Err(aws_err("InvalidGroup.NotFound", missing));
        }

        let instance = Instance {
            id: s.next_id("i"),
            state: InstanceState::Pending,
            image_id: spec.image_id.clone(),
            network_id: Some(subnet.network_id),
            subnet_id: Some(subnet.id),
            public_ip: None,
            name: Some(spec.name.clone()),
            security_group_ids: spec.security_group_ids.clone(),
        };
        let polls_left = s.boot_polls;
        let hidden_polls = s.describe_lag;
        s.instances.push(FakeInstance {
            instance: instance.clone(),
            polls_left,
            hidden_polls,
        });
        s.launches.push(spec.clone());
        Ok(instance)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        let mut s = self.enter("start_instance")?;
        let polls = s.boot_polls;
        let fake = s.instance_mut(instance_id)?;
        match fake.instance.state {
            InstanceState::Stopped => {
                fake.instance.state = InstanceState::Pending;
                fake.polls_left = polls;
                Ok(())
            }
            InstanceState::Pending | InstanceState::Running => Ok(()),
            state => Err(aws_err(
                "IncorrectInstanceState",
                format!("The instance '{instance_id}' is not in a state from which it can be started ({state})"),
            )),
        }
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        let mut s = self.enter("stop_instance")?;
        let polls = s.boot_polls;
        let elastic_ip = s.elastic_ip_of(instance_id);
        let fake = s.instance_mut(instance_id)?;
        match fake.instance.state {
            InstanceState::Running | InstanceState::Pending => {
                fake.instance.state = InstanceState::Stopping;
                fake.instance.public_ip = elastic_ip;
                fake.polls_left = polls;
                Ok(())
            }
            InstanceState::Stopping | InstanceState::Stopped => Ok(()),
            state => Err(aws_err(
                "IncorrectInstanceState",
                format!("The instance '{instance_id}' cannot be stopped ({state})"),
            )),
        }
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut s = self.enter("terminate_instance")?;
        let fake = s.instance_mut(instance_id)?;
        fake.instance.state = InstanceState::Terminated;
        fake.instance.public_ip = None;
        for address in s
            .addresses
            .iter_mut()
            .filter(|a| a.instance_id.as_deref() == Some(instance_id))
        {
            address.association_id = None;
            address.instance_id = None;
        }
        Ok(())
    }

    async fn addresses_by_name(&self, name: &str) -> Result<Vec<Address>> {
        let s = self.enter("addresses_by_name")?;
        Ok(s.addresses
            .iter()
            .filter(|a| a.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn addresses_for_instance(&self, instance_id: &str) -> Result<Vec<Address>> {
        let s = self.enter("addresses_for_instance")?;
        Ok(s.addresses
            .iter()
            .filter(|a| a.instance_id.as_deref() == Some(instance_id))
            .cloned()
            .collect())
    }

    async fn allocate_address(&self, name: Option<&str>) -> Result<Address> {
        let mut s = self.enter("allocate_address")?;
        let address = Address {
            allocation_id: s.next_id("eipalloc"),
            public_ip: s.next_ip(),
            association_id: None,
            instance_id: None,
            name: name.map(str::to_string),
        };
        s.addresses.push(address.clone());
        Ok(address)
    }

    async fn associate_address(&self, allocation_id: &str, instance_id: &str) -> Result<String> {
        let mut s = self.enter("associate_address")?;
        let association_id = s.next_id("eipassoc");

        let live = s
            .instances
            .iter()
            .any(|i| i.instance.id == instance_id && !i.instance.state.is_gone());
        if !live {
            return Err(aws_err("InvalidInstanceID.NotFound", instance_id));
        }
        let address = s
            .addresses
            .iter_mut()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| aws_err("InvalidAllocationID.NotFound", allocation_id))?;
        if address.is_associated() && address.instance_id.as_deref() != Some(instance_id) {
            return Err(aws_err(
                "Resource.AlreadyAssociated",
                format!("resource {allocation_id} is already associated"),
            ));
        }
        address.association_id = Some(association_id.clone());
        address.instance_id = Some(instance_id.to_string());
        let public_ip = address.public_ip.clone();

        let fake = s.instance_mut(instance_id)?;
        fake.instance.public_ip = Some(public_ip);
        Ok(association_id)
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        let mut s = self.enter("disassociate_address")?;
        let address = s
            .addresses
            .iter_mut()
            .find(|a| a.association_id.as_deref() == Some(association_id))
            .ok_or_else(|| aws_err("InvalidAssociationID.NotFound", association_id))?;
        address.association_id = None;
        let previous = address.instance_id.take();
        if let Some(instance_id) = previous {
            if let Ok(fake) = s.instance_mut(&instance_id) {
                fake.instance.public_ip = None;
            }
        }
        Ok(())
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        let mut s = self.enter("release_address")?;
        let address = s
            .addresses
            .iter()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| aws_err("InvalidAllocationID.NotFound", allocation_id))?;
        if address.is_associated() {
            return Err(aws_err(
                "InvalidIPAddress.InUse",
                format!("Address {} is in use", address.public_ip),
            ));
        }
        s.addresses.retain(|a| a.allocation_id != allocation_id);
        Ok(())
    }

    async fn nat_gateways_by_name(&self, name: &str, subnet_id: &str) -> Result<Vec<NatGateway>> {
        let s = self.enter("nat_gateways_by_name")?;
        Ok(s.nat_gateways
            .iter()
            .map(|n| &n.nat)
            .filter(|n| n.name.as_deref() == Some(name) && n.subnet_id == subnet_id)
            .cloned()
            .collect())
    }

    async fn create_nat_gateway(&self, subnet_id: &str, allocation_id: &str) -> Result<NatGateway> {
        let mut s = self.enter("create_nat_gateway")?;
        if !s.subnets.iter().any(|sub| sub.id == subnet_id) {
            return Err(aws_err("InvalidSubnetID.NotFound", subnet_id));
        }
        let association_id = s.next_id("eipassoc");
        let nat_id = s.next_id("nat");
        let address = s
            .addresses
            .iter_mut()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| aws_err("InvalidAllocationID.NotFound", allocation_id))?;
        if address.is_associated() {
            return Err(aws_err(
                "Resource.AlreadyAssociated",
                format!("Elastic IP address [{allocation_id}] is already associated"),
            ));
        }
        address.association_id = Some(association_id);
        let public_ip = address.public_ip.clone();

        let nat = NatGateway {
            id: nat_id,
            subnet_id: subnet_id.to_string(),
            state: NatGatewayState::Pending,
            allocation_id: Some(allocation_id.to_string()),
            public_ip: Some(public_ip),
            failure_message: None,
            name: None,
        };
        let polls_left = s.nat_polls;
        let fails_with = s.nat_failure.clone();
        let hidden_polls = s.describe_lag;
        s.nat_gateways.push(FakeNat {
            nat: nat.clone(),
            polls_left,
            fails_with,
            hidden_polls,
        });
        Ok(nat)
    }

    async fn nat_gateway(&self, nat_id: &str) -> Result<Option<NatGateway>> {
        let mut s = self.enter("nat_gateway")?;
        if let Some(fake) = s
            .nat_gateways
            .iter_mut()
            .find(|n| n.nat.id == nat_id && n.hidden_polls > 0)
        {
            fake.hidden_polls -= 1;
            return Ok(None);
        }
        s.advance_nat(nat_id);
        Ok(s.nat_gateways
            .iter()
            .find(|n| n.nat.id == nat_id)
            .map(|n| n.nat.clone()))
    }
}
