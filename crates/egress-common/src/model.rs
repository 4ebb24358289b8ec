//! Provider-neutral views of the EC2 resources the orchestrator manages

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cloud resource addressable by id and discoverable by its `Name` tag.
pub trait TaggedResource {
    fn id(&self) -> &str;
    fn name_tag(&self) -> Option<&str>;
}

macro_rules! tagged {
    ($ty:ty, $id:ident) => {
        impl TaggedResource for $ty {
            fn id(&self) -> &str {
                &self.$id
            }
            fn name_tag(&self) -> Option<&str> {
                self.name.as_deref()
            }
        }
    };
}

/// Virtual network (VPC)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub cidr: String,
    pub is_default: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternetGateway {
    pub id: String,
    pub name: Option<String>,
    pub attached_networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub cidr: String,
    pub name: Option<String>,
    pub available: bool,
    pub map_public_ip_on_launch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Active,
    Blackhole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: String,
    /// Internet gateway the route targets, if any
    pub gateway_id: Option<String>,
    pub state: RouteState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub id: String,
    pub network_id: String,
    pub main: bool,
    pub subnet_ids: Vec<String>,
    pub routes: Vec<Route>,
}

impl RouteTable {
    pub fn route_to(&self, destination: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.destination == destination)
    }
}

/// IP protocol of an ingress rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl Protocol {
    /// Protocol string as EC2 expects it
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "-1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tcp" | "6" => Some(Protocol::Tcp),
            "udp" | "17" => Some(Protocol::Udp),
            "icmp" | "1" => Some(Protocol::Icmp),
            "-1" | "all" => Some(Protocol::All),
            _ => None,
        }
    }
}

/// A single CIDR-scoped ingress permission.
///
/// ICMP and all-protocol rules use `-1` for both ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
}

impl IngressRule {
    pub fn tcp(port: i32, cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            cidr: cidr.into(),
        }
    }

    pub fn udp(port: i32, cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Udp,
            from_port: port,
            to_port: port,
            cidr: cidr.into(),
        }
    }

    pub fn icmp(cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Icmp,
            from_port: -1,
            to_port: -1,
            cidr: cidr.into(),
        }
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Icmp | Protocol::All => write!(f, "{} from {}", self.protocol.as_str(), self.cidr),
            _ if self.from_port == self.to_port => {
                write!(f, "{}/{} from {}", self.protocol.as_str(), self.from_port, self.cidr)
            }
            _ => write!(
                f,
                "{}/{}-{} from {}",
                self.protocol.as_str(),
                self.from_port,
                self.to_port,
                self.cidr
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: String,
    /// Provider-unique group name
    pub group_name: String,
    pub network_id: String,
    pub name: Option<String>,
    pub ingress: Vec<IngressRule>,
}

/// Machine image filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub owner: String,
    pub name_pattern: String,
    pub architecture: String,
    pub virtualization: String,
    pub root_device: String,
}

impl Default for ImageQuery {
    fn default() -> Self {
        use crate::defaults::*;
        Self {
            owner: DEFAULT_IMAGE_OWNER.to_string(),
            name_pattern: DEFAULT_IMAGE_NAME_PATTERN.to_string(),
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            virtualization: "hvm".to_string(),
            root_device: "ebs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub name: Option<String>,
    /// ISO 8601 timestamp as reported by EC2
    pub creation_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InstanceState::Pending),
            "running" => Some(InstanceState::Running),
            "shutting-down" => Some(InstanceState::ShuttingDown),
            "terminated" => Some(InstanceState::Terminated),
            "stopping" => Some(InstanceState::Stopping),
            "stopped" => Some(InstanceState::Stopped),
            _ => None,
        }
    }

    /// Terminated or on its way there
    pub fn is_gone(self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    pub image_id: String,
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub public_ip: Option<String>,
    pub name: Option<String>,
    pub security_group_ids: Vec<String>,
}

/// Everything needed for a single RunInstances call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    /// Raw boot script; the client handles encoding
    pub user_data: String,
}

/// Floating IP (Elastic IP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub allocation_id: String,
    pub public_ip: String,
    pub association_id: Option<String>,
    /// Set only when bound to an instance; NAT-bound addresses carry an
    /// association without an instance.
    pub instance_id: Option<String>,
    pub name: Option<String>,
}

impl Address {
    pub fn is_associated(&self) -> bool {
        self.association_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatGatewayState {
    Pending,
    Available,
    Failed,
    Deleting,
    Deleted,
}

impl NatGatewayState {
    /// Reusable without creating a replacement
    pub fn is_live(self) -> bool {
        matches!(self, NatGatewayState::Pending | NatGatewayState::Available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatGateway {
    pub id: String,
    pub subnet_id: String,
    pub state: NatGatewayState,
    pub allocation_id: Option<String>,
    pub public_ip: Option<String>,
    pub failure_message: Option<String>,
    pub name: Option<String>,
}

tagged!(Network, id);
tagged!(InternetGateway, id);
tagged!(Subnet, id);
tagged!(SecurityGroup, id);
tagged!(Instance, id);
tagged!(Address, allocation_id);
tagged!(NatGateway, id);
