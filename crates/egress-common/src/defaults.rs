//! Default configuration values
//!
//! These constants keep the CLI, the orchestrator config and the test fakes
//! in agreement.

/// Instance type for compute egress points
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.small";

/// Key pair attached to compute egress instances
pub const DEFAULT_KEY_NAME: &str = "mcp_openvpn";

/// Owner of the base machine image
pub const DEFAULT_IMAGE_OWNER: &str = "amazon";

/// Amazon Linux 2023 image name pattern
pub const DEFAULT_IMAGE_NAME_PATTERN: &str = "al2023-ami-2023.*-kernel-*-x86_64";

pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Destination of the default route
pub const DEFAULT_ROUTE_DESTINATION: &str = "0.0.0.0/0";

/// Open CIDR used for the default ingress rules and egress
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Prefix length of allocated subnets
pub const DEFAULT_SUBNET_PREFIX: u8 = 24;

/// Maximum number of CIDR candidates tried before giving up
pub const DEFAULT_CIDR_ATTEMPTS: usize = 50;

/// Default VPN (OpenVPN) UDP port
pub const DEFAULT_VPN_PORT: i32 = 1194;

/// Timeout for instances to reach running (10 minutes)
pub const DEFAULT_INSTANCE_WAIT_TIMEOUT_SECS: u64 = 600;

/// Timeout for NAT gateways to become available (15 minutes)
pub const DEFAULT_NAT_WAIT_TIMEOUT_SECS: u64 = 900;

/// Timeout for subnets to become available
pub const DEFAULT_SUBNET_WAIT_TIMEOUT_SECS: u64 = 120;
