//! Security group management

use super::{Ec2Client, types};
use crate::aws::error::SdkResultExt;
use crate::aws::tags::{self, filter};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{IpPermission, IpRange, ResourceType};
use egress_common::defaults::ANY_IPV4;
use egress_common::model::{IngressRule, SecurityGroup};
use tracing::{debug, info};

fn ip_permission(rule: &IngressRule) -> IpPermission {
    IpPermission::builder()
        .ip_protocol(rule.protocol.as_str())
        .from_port(rule.from_port)
        .to_port(rule.to_port)
        .ip_ranges(IpRange::builder().cidr_ip(&rule.cidr).build())
        .build()
}

impl Ec2Client {
    pub async fn security_groups_by_name(
        &self,
        group_name: &str,
        network_id: &str,
    ) -> Result<Vec<SecurityGroup>> {
        let response = self
            .client
            .describe_security_groups()
            .filters(filter("group-name", group_name))
            .filters(filter("vpc-id", network_id))
            .send()
            .await
            .aws_context("Failed to describe security groups")?;

        Ok(response
            .security_groups()
            .iter()
            .filter_map(types::security_group)
            .collect())
    }

    /// Create a security group tagged with its own name
    ///
    /// EC2 adds an allow-all egress rule to new VPC groups on its own.
    pub async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        network_id: &str,
    ) -> Result<SecurityGroup> {
        info!(name = %group_name, vpc_id = %network_id, "Creating security group");

        let response = self
            .client
            .create_security_group()
            .group_name(group_name)
            .description(description)
            .vpc_id(network_id)
            .tag_specifications(tags::ec2_tag_spec(ResourceType::SecurityGroup, group_name))
            .send()
            .await
            .aws_context("Failed to create security group")?;

        let sg_id = response
            .group_id()
            .context("No security group ID in response")?
            .to_string();

        info!(sg_id = %sg_id, "Created security group");

        Ok(SecurityGroup {
            id: sg_id,
            group_name: group_name.to_string(),
            network_id: network_id.to_string(),
            name: Some(group_name.to_string()),
            ingress: Vec::new(),
        })
    }

    pub async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(ip_permission(rule))
            .send()
            .await
            .aws_context("Failed to authorize ingress rule")?;

        debug!(sg_id = %group_id, rule = %rule, "Authorized ingress rule");
        Ok(())
    }

    pub async fn authorize_egress_all(&self, group_id: &str) -> Result<()> {
        self.client
            .authorize_security_group_egress()
            .group_id(group_id)
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol("-1")
                    .ip_ranges(IpRange::builder().cidr_ip(ANY_IPV4).build())
                    .build(),
            )
            .send()
            .await
            .aws_context("Failed to authorize egress rule")?;

        debug!(sg_id = %group_id, "Authorized allow-all egress");
        Ok(())
    }

    /// Delete a security group. Callers decide how to treat not-found and
    /// dependency violations.
    pub async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        info!(sg_id = %group_id, "Deleting security group");

        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .aws_context("Failed to delete security group")?;

        info!(sg_id = %group_id, "Security group deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icmp_permission_uses_wildcard_ports() {
        let perm = ip_permission(&IngressRule::icmp(ANY_IPV4));
        assert_eq!(perm.ip_protocol(), Some("icmp"));
        assert_eq!(perm.from_port(), Some(-1));
        assert_eq!(perm.to_port(), Some(-1));
        assert_eq!(perm.ip_ranges()[0].cidr_ip(), Some(ANY_IPV4));
    }
}
