//! Idempotent provisioners for the resources an egress point is built from

pub mod boot_script;
pub mod cidr;
pub mod compute;
pub mod fabric;
pub mod locator;
pub mod nat;
pub mod security;

pub use boot_script::{BootScriptError, render_boot_script, validate_profile};
pub use compute::{AddressOrigin, FloatingIp, upsert_floating_ip};
pub use fabric::{DefaultRoute, NetworkFabric, RouteAction};
pub use locator::{Located, Origin};
pub use nat::{NatEgress, ensure_nat_gateway, wait_for_nat_gateway};
pub use security::{SecurityPolicy, upsert_security_policy};
