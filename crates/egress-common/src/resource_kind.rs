//! AWS resource types and teardown ordering

use serde::{Deserialize, Serialize};

/// Types of AWS resources managed by regional-egress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// EC2 instance (must be terminated before its security group can go)
    Ec2Instance,
    /// Elastic IP
    ElasticIp,
    NatGateway,
    /// Security group (depends on instances being terminated)
    SecurityGroup,
    Subnet,
    InternetGateway,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Ec2Instance => "ec2_instance",
            ResourceKind::ElasticIp => "elastic_ip",
            ResourceKind::NatGateway => "nat_gateway",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
        }
    }

    /// Get cleanup priority (lower number = cleanup first)
    ///
    /// - 0: Release addresses (must be detached before the instance is gone)
    /// - 1: Terminate instances
    /// - 2: Delete NAT gateways
    /// - 3: Delete security groups
    /// - 4: Delete subnets (after everything placed in them)
    /// - 5: Internet gateways
    pub fn cleanup_priority(self) -> u8 {
        match self {
            ResourceKind::ElasticIp => 0,
            ResourceKind::Ec2Instance => 1,
            ResourceKind::NatGateway => 2,
            ResourceKind::SecurityGroup => 3,
            ResourceKind::Subnet => 4,
            ResourceKind::InternetGateway => 5,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
