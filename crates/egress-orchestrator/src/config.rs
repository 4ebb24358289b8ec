//! Configuration types for the orchestrator

use crate::wait::WaitConfig;
use egress_common::defaults::{
    ANY_IPV4, DEFAULT_CIDR_ATTEMPTS, DEFAULT_INSTANCE_TYPE, DEFAULT_INSTANCE_WAIT_TIMEOUT_SECS,
    DEFAULT_KEY_NAME, DEFAULT_NAT_WAIT_TIMEOUT_SECS, DEFAULT_SUBNET_WAIT_TIMEOUT_SECS,
    DEFAULT_VPN_PORT,
};
use egress_common::model::{ImageQuery, IngressRule};
use std::time::Duration;

/// AWS credential and region resolution
#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    /// Region used when a request does not name one
    pub default_region: Option<String>,
    /// AWS profile name (overrides default credential resolution)
    pub aws_profile: Option<String>,
}

/// Compute egress instance settings
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub instance_type: String,
    /// Key pair for SSH access; `None` launches without one
    pub key_name: Option<String>,
    pub image: ImageQuery,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            key_name: Some(DEFAULT_KEY_NAME.to_string()),
            image: ImageQuery::default(),
        }
    }
}

/// Subnet allocation and security policy settings
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Maximum number of CIDR candidates tried per subnet allocation
    pub cidr_attempts: usize,
    /// Ingress rules every egress security group must allow
    pub ingress_rules: Vec<IngressRule>,
}

impl NetworkConfig {
    /// SSH, OpenVPN, HTTPS and ICMP from anywhere
    pub fn default_ingress_rules() -> Vec<IngressRule> {
        vec![
            IngressRule::tcp(22, ANY_IPV4),
            IngressRule::udp(DEFAULT_VPN_PORT, ANY_IPV4),
            IngressRule::tcp(443, ANY_IPV4),
            IngressRule::icmp(ANY_IPV4),
        ]
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr_attempts: DEFAULT_CIDR_ATTEMPTS,
            ingress_rules: Self::default_ingress_rules(),
        }
    }
}

/// Polling behaviour for the slow resources
#[derive(Debug, Clone, Copy)]
pub struct WaitSettings {
    pub instance: WaitConfig,
    pub nat_gateway: WaitConfig,
    pub subnet: WaitConfig,
}

impl WaitSettings {
    /// Millisecond polling, for fakes that settle after a few polls
    pub fn immediate() -> Self {
        let fast = WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(10),
        };
        Self {
            instance: fast,
            nat_gateway: fast,
            subnet: fast,
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            instance: WaitConfig::with_timeout(Duration::from_secs(
                DEFAULT_INSTANCE_WAIT_TIMEOUT_SECS,
            )),
            nat_gateway: WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
                timeout: Duration::from_secs(DEFAULT_NAT_WAIT_TIMEOUT_SECS),
            },
            subnet: WaitConfig::with_timeout(Duration::from_secs(
                DEFAULT_SUBNET_WAIT_TIMEOUT_SECS,
            )),
        }
    }
}

/// Configuration for the egress orchestrator
///
/// Composed of focused sub-configs.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub aws: AwsConfig,
    pub instance: InstanceConfig,
    pub network: NetworkConfig,
    pub waits: WaitSettings,
}

impl OrchestratorConfig {
    /// Pick the request region, falling back to the configured default.
    /// Blank values count as absent.
    pub fn resolve_region(&self, requested: Option<&str>) -> Option<String> {
        [requested, self.aws.default_region.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|r| !r.is_empty())
            .map(str::to_string)
    }
}
