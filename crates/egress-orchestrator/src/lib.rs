//! egress-orchestrator - regional network egress on AWS
//!
//! Provisions and tears down per-name egress points: a subnet with a
//! default route through the internet gateway, plus either a VPN client
//! instance with a floating IP or a managed NAT gateway. Every resource is
//! found again by its `Name` tag, so repeated calls converge.

pub mod aws;
pub mod config;
pub mod orchestrator;
pub mod provision;
pub mod wait;

pub use orchestrator::{delete_regional_egress, upsert_regional_egress};
